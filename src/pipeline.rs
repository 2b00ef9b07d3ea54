//! One message in, one A4 document out.
//!
//! The body is rendered first, attachments are converted in parallel, and
//! the resulting page sets are merged in part order. An attachment that
//! cannot be converted is replaced by a placeholder page; only parse,
//! merge, and rasterizer failures abort the message.

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::{Config, PolicyConfig, UnsupportedPolicy};
use crate::convert::classify::AttachmentKind;
use crate::convert::gate::OfficeGate;
use crate::convert::image::ImageConverter;
use crate::convert::office::{OfficeConverter, OfficeEngine};
use crate::convert::placeholder::{placeholder_page, PlaceholderReason};
use crate::convert::vector::VectorConverter;
use crate::convert::Converter;
use crate::error::Result;
use crate::model::job::{ConversionJob, JobStatus};
use crate::model::message::{Message, Part};
use crate::model::page::PageSet;
use crate::parser::header::pdf_date;
use crate::parser::mime::parse_message;
use crate::pdf::merge::{merge, MergeOptions};
use crate::raster::{RasterTool, Rasterizer};
use crate::render::{BodyRenderer, LayoutEngine};

/// What happened to one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Converted,
    Placeholder,
    Skipped,
}

/// Per-attachment line of the conversion report.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentOutcome {
    pub index: usize,
    pub filename: String,
    pub content_type: String,
    pub kind: AttachmentKind,
    pub outcome: Outcome,
    pub status: JobStatus,
    pub attempts: u32,
    pub pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report for one converted message.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary {
    pub subject: String,
    pub body_engine: &'static str,
    pub body_pages: usize,
    pub page_count: usize,
    pub frames: Option<usize>,
    pub attachments: Vec<AttachmentOutcome>,
}

impl ConversionSummary {
    /// Number of attachments shown as a placeholder page.
    pub fn placeholders(&self) -> usize {
        self.attachments
            .iter()
            .filter(|a| a.outcome == Outcome::Placeholder)
            .count()
    }
}

/// The finished output of one message.
#[derive(Debug)]
pub struct Conversion {
    pub pdf: Vec<u8>,
    pub tiff: Option<Vec<u8>>,
    pub summary: ConversionSummary,
}

/// Converters and policies shared by every message of a run.
pub struct Pipeline {
    policy: PolicyConfig,
    renderer: BodyRenderer,
    image: ImageConverter,
    vector: VectorConverter,
    office: OfficeConverter,
    rasterizer: Rasterizer,
}

impl Pipeline {
    /// Build the pipeline with the real external tools.
    ///
    /// One [`OfficeGate`] is created here and shared by every worker that
    /// uses this pipeline.
    pub fn new(config: &Config) -> Self {
        let gate = Arc::new(OfficeGate::new(
            config.office.lock_file_path(),
            std::time::Duration::from_secs(config.office.lock_wait_secs),
        ));
        Self {
            policy: config.policy.clone(),
            renderer: BodyRenderer::from_config(&config.render),
            image: ImageConverter,
            vector: VectorConverter,
            office: OfficeConverter::from_config(&config.office, gate),
            rasterizer: Rasterizer::from_config(&config.raster),
        }
    }

    pub fn with_layout_engine(mut self, engine: Arc<dyn LayoutEngine>) -> Self {
        self.renderer = self.renderer.with_engine(engine);
        self
    }

    pub fn with_office_engine(mut self, engine: Arc<dyn OfficeEngine>) -> Self {
        self.office = self.office.with_engine(engine);
        self
    }

    pub fn with_raster_tool(mut self, tool: Arc<dyn RasterTool>) -> Self {
        self.rasterizer = Rasterizer::new(tool, self.rasterizer.dpi(), self.rasterizer.timeout());
        self
    }

    /// Parse and convert raw message bytes.
    pub fn convert_message(&self, raw: &[u8], want_raster: bool) -> Result<Conversion> {
        let message = parse_message(raw)?;
        self.convert(&message, want_raster)
    }

    /// Convert an already parsed message.
    pub fn convert(&self, message: &Message, want_raster: bool) -> Result<Conversion> {
        let body = self.renderer.render(message)?;
        let body_pages = body.page_count();

        let attachments: Vec<&Part> = message.attachments().collect();
        // Indexed collect keeps part order whatever order the jobs finish in.
        let converted: Vec<(Option<PageSet>, AttachmentOutcome)> = attachments
            .par_iter()
            .map(|part| self.convert_attachment(part))
            .collect::<Result<Vec<_>>>()?;

        let mut sets = Vec::with_capacity(converted.len() + 1);
        sets.push(body);
        let mut outcomes = Vec::with_capacity(converted.len());
        for (set, outcome) in converted {
            sets.extend(set);
            outcomes.push(outcome);
        }

        let merged = merge(sets, &merge_options(message))?;
        let tiff = if want_raster {
            Some(self.rasterizer.rasterize(&merged.bytes, merged.page_count)?)
        } else {
            None
        };

        let summary = ConversionSummary {
            subject: message.subject().to_string(),
            body_engine: self.renderer.engine_name(),
            body_pages,
            page_count: merged.page_count,
            frames: tiff.as_ref().map(|_| merged.page_count),
            attachments: outcomes,
        };
        tracing::info!(
            subject = %summary.subject,
            pages = summary.page_count,
            attachments = summary.attachments.len(),
            placeholders = summary.placeholders(),
            "Converted message"
        );

        Ok(Conversion {
            pdf: merged.bytes,
            tiff,
            summary,
        })
    }

    /// Classify and convert one attachment, degrading to a placeholder.
    ///
    /// Only a failure to build the placeholder itself is returned as an error.
    fn convert_attachment(&self, part: &Part) -> Result<(Option<PageSet>, AttachmentOutcome)> {
        let name = part.display_name();
        let kind = AttachmentKind::classify(&part.content_type, part.filename.as_deref());
        let mut job = ConversionJob::new(part.index, &name);

        let converter: &dyn Converter = match kind {
            AttachmentKind::Image => &self.image,
            AttachmentKind::VectorDocument => &self.vector,
            AttachmentKind::OfficeDocument => &self.office,
            AttachmentKind::Unsupported => {
                let detail = format!("Content type: {}", part.content_type);
                return match self.policy.unsupported {
                    UnsupportedPolicy::Skip => {
                        tracing::info!(
                            filename = %name,
                            content_type = %part.content_type,
                            "Skipping unsupported attachment"
                        );
                        Ok((None, outcome(part, kind, &job, Outcome::Skipped, 0, None)))
                    }
                    UnsupportedPolicy::Placeholder => {
                        tracing::warn!(
                            filename = %name,
                            content_type = %part.content_type,
                            "Unsupported attachment type"
                        );
                        let set = placeholder_page(
                            part.index,
                            &name,
                            PlaceholderReason::Unsupported,
                            &detail,
                        )?;
                        let out = outcome(part, kind, &job, Outcome::Placeholder, 1, Some(detail));
                        Ok((Some(set), out))
                    }
                };
            }
        };

        match converter.convert(part, &mut job) {
            Ok(set) => {
                let pages = set.page_count();
                tracing::debug!(filename = %name, ?kind, pages, "Converted attachment");
                Ok((Some(set), outcome(part, kind, &job, Outcome::Converted, pages, None)))
            }
            Err(e) => {
                tracing::warn!(
                    filename = %name,
                    ?kind,
                    error = %e,
                    "Attachment replaced by placeholder"
                );
                let reason = e.to_string();
                let set = placeholder_page(part.index, &name, PlaceholderReason::Failed, &reason)?;
                let out = outcome(part, kind, &job, Outcome::Placeholder, 1, Some(reason));
                Ok((Some(set), out))
            }
        }
    }
}

fn outcome(
    part: &Part,
    kind: AttachmentKind,
    job: &ConversionJob,
    outcome: Outcome,
    pages: usize,
    error: Option<String>,
) -> AttachmentOutcome {
    AttachmentOutcome {
        index: part.index,
        filename: job.filename.clone(),
        content_type: part.content_type.clone(),
        kind,
        outcome,
        status: job.status(),
        attempts: job.attempts(),
        pages,
        error,
    }
}

/// Document metadata taken from the message headers.
fn merge_options(message: &Message) -> MergeOptions {
    let subject = message.subject();
    MergeOptions {
        title: (!subject.is_empty()).then(|| subject.to_string()),
        author: message.headers.get("from").map(String::from),
        creation_date: message.date.as_ref().map(pdf_date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::flow::FlowEngine;

    fn pipeline(dir: &std::path::Path) -> Pipeline {
        let mut config = Config::default();
        config.office.lock_file = Some(dir.join("office.lock"));
        Pipeline::new(&config).with_layout_engine(Arc::new(FlowEngine))
    }

    #[test]
    fn test_plain_message_is_one_body_page() {
        let dir = tempfile::tempdir().unwrap();
        let raw = b"From: a@example.com\r\nSubject: Short\r\nDate: Tue, 1 Jul 2025 10:00:00 +0000\r\n\r\nHello.\r\n";
        let out = pipeline(dir.path()).convert_message(raw, false).unwrap();
        assert_eq!(out.summary.page_count, 1);
        assert_eq!(out.summary.body_pages, 1);
        assert!(out.summary.attachments.is_empty());
        assert!(out.tiff.is_none());
        assert!(out.pdf.starts_with(b"%PDF-"));
    }

    #[test]
    fn test_unsupported_attachment_policy() {
        let dir = tempfile::tempdir().unwrap();
        let raw = "Subject: Zip\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached.\r\n\
--b\r\n\
Content-Type: application/zip; name=\"data.zip\"\r\n\
Content-Disposition: attachment; filename=\"data.zip\"\r\n\
\r\n\
PK\r\n\
--b--\r\n";

        let out = pipeline(dir.path()).convert_message(raw.as_bytes(), false).unwrap();
        assert_eq!(out.summary.page_count, 2);
        assert_eq!(out.summary.placeholders(), 1);
        assert_eq!(out.summary.attachments[0].kind, AttachmentKind::Unsupported);

        let mut config = Config::default();
        config.office.lock_file = Some(dir.path().join("office.lock"));
        config.policy.unsupported = UnsupportedPolicy::Skip;
        let skipping = Pipeline::new(&config).with_layout_engine(Arc::new(FlowEngine));
        let out = skipping.convert_message(raw.as_bytes(), false).unwrap();
        assert_eq!(out.summary.page_count, 1);
        assert_eq!(out.summary.attachments[0].outcome, Outcome::Skipped);
    }

    #[test]
    fn test_merge_options_from_headers() {
        let msg = parse_message(
            b"From: Alice <a@example.com>\r\nSubject: Minutes\r\nDate: Tue, 1 Jul 2025 10:00:00 +0200\r\n\r\nx\r\n",
        )
        .unwrap();
        let opts = merge_options(&msg);
        assert_eq!(opts.title.as_deref(), Some("Minutes"));
        assert_eq!(opts.author.as_deref(), Some("Alice <a@example.com>"));
        assert_eq!(opts.creation_date.as_deref(), Some("D:20250701080000+00'00'"));
    }
}
