//! Rasterizer: merged PDF → multi-frame TIFF.

pub mod tiff;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RasterConfig;
use crate::error::{Error, Result};
use crate::process::run_with_timeout;

/// An external PDF → TIFF renderer.
pub trait RasterTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Render every page of `pdf` at `dpi` into one multi-page TIFF at `out`.
    fn rasterize(&self, pdf: &Path, out: &Path, dpi: u32, timeout: Duration) -> Result<()>;
}

/// Ghostscript's `tiff24nc` device.
#[derive(Debug, Clone)]
pub struct GhostscriptTool {
    program: PathBuf,
}

impl GhostscriptTool {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl RasterTool for GhostscriptTool {
    fn name(&self) -> &'static str {
        "ghostscript"
    }

    fn rasterize(&self, pdf: &Path, out: &Path, dpi: u32, timeout: Duration) -> Result<()> {
        let log_dir = out.parent().unwrap_or_else(|| Path::new("."));
        let mut cmd = Command::new(&self.program);
        cmd.args(["-q", "-dNOPAUSE", "-dBATCH", "-dSAFER"])
            .arg("-sDEVICE=tiff24nc")
            .arg(format!("-r{dpi}"))
            .arg("-sCompression=lzw")
            .arg(format!("-sOutputFile={}", out.display()))
            .arg(pdf);
        run_with_timeout(&mut cmd, timeout, log_dir)?;
        Ok(())
    }
}

/// Turns merged documents into TIFF files with one frame per page.
#[derive(Clone)]
pub struct Rasterizer {
    tool: Arc<dyn RasterTool>,
    dpi: u32,
    timeout: Duration,
}

impl Rasterizer {
    pub fn new(tool: Arc<dyn RasterTool>, dpi: u32, timeout: Duration) -> Self {
        Self { tool, dpi, timeout }
    }

    pub fn from_config(config: &RasterConfig) -> Self {
        Self::new(
            Arc::new(GhostscriptTool::new(config.gs_path.clone())),
            config.dpi,
            config.timeout(),
        )
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Rasterize `pdf`, which must have `page_count` pages.
    ///
    /// A frame count that differs from the page count is an error; the
    /// output is never silently truncated.
    pub fn rasterize(&self, pdf: &[u8], page_count: usize) -> Result<Vec<u8>> {
        let dir = tempfile::Builder::new()
            .prefix("eml2pdf-raster-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let input = dir.path().join("document.pdf");
        let output = dir.path().join("document.tiff");
        std::fs::write(&input, pdf).map_err(|e| Error::io(&input, e))?;

        self.tool.rasterize(&input, &output, self.dpi, self.timeout)?;
        let tiff = std::fs::read(&output).map_err(|e| Error::io(&output, e))?;

        let frames = tiff::count_frames(&tiff)?;
        if frames != page_count {
            return Err(Error::resource(
                self.tool.name(),
                format!("produced {frames} frames for {page_count} pages"),
            ));
        }
        tracing::debug!(
            tool = self.tool.name(),
            frames,
            dpi = self.dpi,
            bytes = tiff.len(),
            "Rasterized document"
        );
        Ok(tiff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes a TIFF with a fixed number of frames.
    struct FixedFrames(usize);

    impl RasterTool for FixedFrames {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn rasterize(&self, pdf: &Path, out: &Path, _dpi: u32, _timeout: Duration) -> Result<()> {
            assert!(pdf.exists());
            std::fs::write(out, tiff::sample(self.0)).unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_frame_count_matches() {
        let r = Rasterizer::new(Arc::new(FixedFrames(4)), 200, Duration::from_secs(5));
        let tiff = r.rasterize(b"%PDF-1.5", 4).unwrap();
        assert_eq!(tiff::count_frames(&tiff).unwrap(), 4);
    }

    #[test]
    fn test_frame_count_mismatch_is_error() {
        let r = Rasterizer::new(Arc::new(FixedFrames(3)), 200, Duration::from_secs(5));
        let err = r.rasterize(b"%PDF-1.5", 4).unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }

    #[test]
    fn test_missing_ghostscript_is_resource_error() {
        let r = Rasterizer::new(
            Arc::new(GhostscriptTool::new(PathBuf::from("eml2pdf-no-such-gs"))),
            200,
            Duration::from_secs(5),
        );
        assert!(matches!(
            r.rasterize(b"%PDF-1.5", 1),
            Err(Error::Resource { .. })
        ));
    }
}
