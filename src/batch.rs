//! Converting a file or a directory tree of `.eml` files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::parser::eml::read_eml;
use crate::pipeline::{ConversionSummary, Pipeline};

/// Which files each message produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputFormat {
    #[serde(rename = "pdf")]
    Pdf,
    #[serde(rename = "pdf+tiff")]
    PdfTiff,
}

impl OutputFormat {
    pub fn wants_raster(self) -> bool {
        self == Self::PdfTiff
    }
}

/// Input and output paths of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchJob {
    pub input: PathBuf,
    pub pdf: PathBuf,
    pub tiff: Option<PathBuf>,
}

/// Result of one file.
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub input: PathBuf,
    pub pdf: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiff: Option<PathBuf>,
    pub ok: bool,
    /// Bytes written (PDF plus TIFF).
    pub bytes: u64,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ConversionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a whole run, in input order.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn placeholders(&self) -> usize {
        self.files
            .iter()
            .filter_map(|f| f.summary.as_ref())
            .map(ConversionSummary::placeholders)
            .sum()
    }

    /// Process exit status: 1 on any failed file, 2 on placeholders when
    /// `fail_on_placeholder` is set, 0 otherwise.
    pub fn exit_code(&self, fail_on_placeholder: bool) -> i32 {
        if self.failed() > 0 {
            1
        } else if fail_on_placeholder && self.placeholders() > 0 {
            2
        } else {
            0
        }
    }
}

/// Work out the output paths for `input`.
///
/// A file input writes next to itself, into the `output` directory, or to
/// `output` itself when it names a `.pdf`. A directory input is searched
/// recursively for `.eml` files, and the relative layout is mirrored under
/// `output` (default: the input directory).
pub fn plan(input: &Path, output: Option<&Path>, format: OutputFormat) -> Result<Vec<BatchJob>> {
    let meta = std::fs::metadata(input).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound(input.to_path_buf())
        } else {
            Error::io(input, e)
        }
    })?;

    let job = |input: PathBuf, pdf: PathBuf| {
        let tiff = format.wants_raster().then(|| pdf.with_extension("tiff"));
        BatchJob { input, pdf, tiff }
    };

    if meta.is_file() {
        let pdf = match output {
            Some(out) if has_extension(out, "pdf") => out.to_path_buf(),
            Some(dir) => dir.join(pdf_name(input)),
            None => input.with_extension("pdf"),
        };
        return Ok(vec![job(input.to_path_buf(), pdf)]);
    }

    let mut found = Vec::new();
    find_eml_files(input, &mut found)?;
    found.sort();
    let out_root = output.unwrap_or(input);
    Ok(found
        .into_iter()
        .map(|path| {
            let rel_dir = path
                .parent()
                .and_then(|p| p.strip_prefix(input).ok())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let pdf = out_root.join(rel_dir).join(pdf_name(&path));
            job(path, pdf)
        })
        .collect())
}

fn pdf_name(input: &Path) -> PathBuf {
    Path::new(input.file_name().unwrap_or_default()).with_extension("pdf")
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

fn find_eml_files(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            find_eml_files(&path, found)?;
        } else if file_type.is_file() && has_extension(&path, "eml") {
            found.push(path);
        }
    }
    Ok(())
}

/// Convert every job on a pool of `threads` workers (0 = available parallelism).
///
/// A failing file is recorded in the report and never stops the batch.
/// `progress` is called with `(done, total)` after each file.
pub fn run(
    pipeline: &Pipeline,
    jobs: &[BatchJob],
    threads: usize,
    progress: Option<&(dyn Fn(usize, usize) + Sync)>,
) -> Result<BatchReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("eml2pdf-worker-{i}"))
        .build()
        .map_err(|e| Error::Config(format!("cannot start worker pool: {e}")))?;

    let done = AtomicUsize::new(0);
    let total = jobs.len();
    let files = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                let report = run_one(pipeline, job);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = progress {
                    cb(n, total);
                }
                report
            })
            .collect()
    });
    Ok(BatchReport { files })
}

fn run_one(pipeline: &Pipeline, job: &BatchJob) -> FileReport {
    let start = Instant::now();
    let result = convert_file(pipeline, job);
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok((summary, bytes)) => FileReport {
            input: job.input.clone(),
            pdf: job.pdf.clone(),
            tiff: job.tiff.clone(),
            ok: true,
            bytes,
            elapsed_ms,
            summary: Some(summary),
            error: None,
        },
        Err(e) => {
            tracing::error!(input = %job.input.display(), error = %e, "Conversion failed");
            FileReport {
                input: job.input.clone(),
                pdf: job.pdf.clone(),
                tiff: job.tiff.clone(),
                ok: false,
                bytes: 0,
                elapsed_ms,
                summary: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn convert_file(pipeline: &Pipeline, job: &BatchJob) -> Result<(ConversionSummary, u64)> {
    let raw = read_eml(&job.input)?;
    let conversion = pipeline.convert_message(&raw, job.tiff.is_some())?;

    let mut bytes = conversion.pdf.len() as u64;
    write_atomic(&job.pdf, &conversion.pdf)?;
    if let (Some(path), Some(tiff)) = (&job.tiff, &conversion.tiff) {
        write_atomic(path, tiff)?;
        bytes += tiff.len() as u64;
    }
    tracing::debug!(input = %job.input.display(), output = %job.pdf.display(), bytes, "Wrote output");
    Ok((conversion.summary, bytes))
}

/// Write through a temporary file in the target directory, then rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(data).map_err(|e| Error::io(path, e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("note.eml");
        std::fs::write(&input, "Subject: x\n\nbody\n").unwrap();

        let jobs = plan(&input, None, OutputFormat::Pdf).unwrap();
        assert_eq!(jobs[0].pdf, dir.path().join("note.pdf"));
        assert_eq!(jobs[0].tiff, None);

        let named = dir.path().join("custom.PDF");
        let jobs = plan(&input, Some(&named), OutputFormat::PdfTiff).unwrap();
        assert_eq!(jobs[0].pdf, named);
        assert_eq!(jobs[0].tiff, Some(dir.path().join("custom.tiff")));

        let out = dir.path().join("out");
        let jobs = plan(&input, Some(&out), OutputFormat::Pdf).unwrap();
        assert_eq!(jobs[0].pdf, out.join("note.pdf"));
    }

    #[test]
    fn test_plan_directory_mirrors_layout() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2025").join("july");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a.eml"), "x").unwrap();
        std::fs::write(nested.join("b.EML"), "x").unwrap();
        std::fs::write(nested.join("notes.txt"), "x").unwrap();

        let out = dir.path().join("pdf");
        let jobs = plan(dir.path(), Some(&out), OutputFormat::Pdf).unwrap();
        let pdfs: Vec<_> = jobs.iter().map(|j| j.pdf.clone()).collect();
        assert_eq!(pdfs, vec![out.join("2025/july/b.pdf"), out.join("a.pdf")]);
    }

    #[test]
    fn test_plan_missing_input() {
        let err = plan(Path::new("/no/such/input.eml"), None, OutputFormat::Pdf).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn test_exit_codes() {
        let file = |ok| FileReport {
            input: PathBuf::from("a.eml"),
            pdf: PathBuf::from("a.pdf"),
            tiff: None,
            ok,
            bytes: 0,
            elapsed_ms: 0,
            summary: None,
            error: None,
        };
        let report = BatchReport {
            files: vec![file(true), file(false)],
        };
        assert_eq!(report.exit_code(false), 1);
        let report = BatchReport {
            files: vec![file(true)],
        };
        assert_eq!(report.exit_code(true), 0);
    }

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deep/dir/out.pdf");
        write_atomic(&target, b"%PDF-1.5").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.5");
        let leftovers = std::fs::read_dir(target.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
