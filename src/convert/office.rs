//! Office documents, converted to PDF by an external office suite.
//!
//! Each attempt runs behind the [`OfficeGate`], in a fresh temporary
//! directory with its own user profile, under a timeout. A failed attempt is
//! retried once with a new profile before the job is given up.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use lopdf::Document;

use crate::config::OfficeConfig;
use crate::convert::classify::extension_for;
use crate::convert::gate::OfficeGate;
use crate::convert::vector::normalize;
use crate::convert::Converter;
use crate::error::{Error, Result};
use crate::model::job::{ConversionJob, JobStatus};
use crate::model::message::Part;
use crate::model::page::{ContentKind, PageSet, PageSource};
use crate::process::{file_url, find_program, run_with_timeout};

/// Where LibreOffice usually lives when it is not on `PATH`.
const SOFFICE_LOCATIONS: &[&str] = &[
    "/usr/bin/soffice",
    "/usr/lib/libreoffice/program/soffice",
    "/opt/libreoffice/program/soffice",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
    "C:\\Program Files\\LibreOffice\\program\\soffice.exe",
];

/// Longest sanitized stem used for the temporary input file.
const MAX_STEM_LEN: usize = 120;

/// Something that turns an office file into PDF bytes.
pub trait OfficeEngine: Send + Sync {
    /// Convert `input` using `workdir` as scratch space.
    fn convert(&self, input: &Path, workdir: &Path, timeout: Duration) -> Result<Vec<u8>>;
}

/// LibreOffice in headless mode.
#[derive(Debug, Clone, Default)]
pub struct SofficeEngine {
    configured: Option<PathBuf>,
}

impl SofficeEngine {
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self { configured }
    }

    /// Locate the executable: configured path, then `PATH`, then the usual install dirs.
    pub fn program(&self) -> Result<PathBuf> {
        if let Some(path) = &self.configured {
            return find_program(path, &[])
                .ok_or_else(|| Error::resource(path.display().to_string(), "not found"));
        }
        find_program(Path::new("soffice"), SOFFICE_LOCATIONS)
            .or_else(|| find_program(Path::new("libreoffice"), &[]))
            .ok_or_else(|| Error::resource("soffice", "LibreOffice is not installed"))
    }
}

impl OfficeEngine for SofficeEngine {
    fn convert(&self, input: &Path, workdir: &Path, timeout: Duration) -> Result<Vec<u8>> {
        let program = self.program()?;
        let profile = workdir.join("profile");
        let outdir = workdir.join("out");
        std::fs::create_dir_all(&outdir).map_err(|e| Error::io(&outdir, e))?;

        let mut cmd = Command::new(&program);
        cmd.arg("--headless")
            .arg("--norestore")
            .arg("--nolockcheck")
            .arg(format!("-env:UserInstallation={}", file_url(&profile)))
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(&outdir)
            .arg(input);
        run_with_timeout(&mut cmd, timeout, workdir)?;

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = outdir.join(format!("{stem}.pdf"));
        std::fs::read(&output).map_err(|_| {
            Error::resource(program.display().to_string(), "produced no PDF output")
        })
    }
}

/// Converter for office attachments.
pub struct OfficeConverter {
    engine: Arc<dyn OfficeEngine>,
    gate: Arc<OfficeGate>,
    timeout: Duration,
    retries: u32,
}

impl OfficeConverter {
    pub fn new(
        engine: Arc<dyn OfficeEngine>,
        gate: Arc<OfficeGate>,
        timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            engine,
            gate,
            timeout,
            retries,
        }
    }

    /// LibreOffice-backed converter with the configured timeout and retry count.
    pub fn from_config(config: &OfficeConfig, gate: Arc<OfficeGate>) -> Self {
        Self::new(
            Arc::new(SofficeEngine::new(config.soffice_path.clone())),
            gate,
            config.timeout(),
            config.retries,
        )
    }

    /// Same gate and limits, different engine.
    pub fn with_engine(self, engine: Arc<dyn OfficeEngine>) -> Self {
        Self { engine, ..self }
    }

    fn attempt(&self, part: &Part, name: &str) -> Result<Document> {
        let workdir = tempfile::Builder::new()
            .prefix("eml2pdf-office-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let input = workdir.path().join(input_file_name(part, name));
        std::fs::write(&input, &part.payload).map_err(|e| Error::io(&input, e))?;

        let bytes = {
            let _guard = self.gate.acquire()?;
            self.engine.convert(&input, workdir.path(), self.timeout)?
        };
        normalize(Document::load_mem(&bytes)?)
    }
}

impl Converter for OfficeConverter {
    fn convert(&self, part: &Part, job: &mut ConversionJob) -> Result<PageSet> {
        let name = part.display_name();
        loop {
            job.start_attempt();
            match self.attempt(part, &name) {
                Ok(doc) => {
                    job.succeed();
                    return Ok(PageSet::new(
                        PageSource::Attachment {
                            index: part.index,
                            filename: name,
                        },
                        ContentKind::Vector,
                        doc,
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        filename = %name,
                        attempt = job.attempts(),
                        error = %e,
                        "Office conversion attempt failed"
                    );
                    if job.fail_attempt(&e, self.retries) == JobStatus::Failed {
                        return Err(Error::conversion(
                            &name,
                            format!("{e} (after {} attempts)", job.attempts()),
                        ));
                    }
                }
            }
        }
    }
}

/// Safe temporary filename that keeps the extension the office suite uses to pick a filter.
fn input_file_name(part: &Part, name: &str) -> String {
    let ext = part
        .extension()
        .unwrap_or_else(|| extension_for(&part.content_type).to_string());
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    format!("{}.{}", sanitize_filename_part(stem, MAX_STEM_LEN), ext)
}

/// Replace characters that are unsafe in filenames with `_` and truncate.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "attachment".to_string()
    } else {
        sanitized
    }
}
