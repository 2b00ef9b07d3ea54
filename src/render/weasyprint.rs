//! External layout through the WeasyPrint command-line tool.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use lopdf::Document;

use crate::error::{Error, Result};
use crate::process::run_with_timeout;
use crate::render::LayoutEngine;

/// Page and image rules applied on top of the message's own styles.
pub fn print_stylesheet(margin_pt: f32) -> String {
    format!(
        "@page {{ size: A4; margin: {margin_pt:.2}pt; }}\n\
         body {{ font-family: sans-serif; }}\n\
         img {{ max-width: 100%; height: auto; }}\n\
         pre {{ white-space: pre-wrap; word-wrap: break-word; }}\n"
    )
}

/// Runs `weasyprint` on the prepared markup.
#[derive(Debug, Clone)]
pub struct WeasyPrintEngine {
    program: PathBuf,
    timeout: Duration,
}

impl WeasyPrintEngine {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }
}

impl LayoutEngine for WeasyPrintEngine {
    fn name(&self) -> &'static str {
        "weasyprint"
    }

    fn layout(&self, html: &str, margin_pt: f32) -> Result<Document> {
        let dir = tempfile::Builder::new()
            .prefix("eml2pdf-body-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let input = dir.path().join("body.html");
        let css = dir.path().join("print.css");
        let output = dir.path().join("body.pdf");
        std::fs::write(&input, html).map_err(|e| Error::io(&input, e))?;
        std::fs::write(&css, print_stylesheet(margin_pt)).map_err(|e| Error::io(&css, e))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--stylesheet")
            .arg(&css)
            .arg("--base-url")
            .arg(dir.path())
            .arg(&input)
            .arg(&output);
        run_with_timeout(&mut cmd, self.timeout, dir.path())
            .map_err(|e| Error::Render(e.to_string()))?;

        let bytes = std::fs::read(&output).map_err(|e| Error::io(&output, e))?;
        Document::load_mem(&bytes).map_err(|e| Error::Render(format!("unreadable output: {e}")))
    }
}
