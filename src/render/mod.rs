//! Body Renderer: message body → A4 page set.

pub mod flow;
pub mod html;
pub mod markup;
pub mod remote;
pub mod weasyprint;

use std::sync::Arc;

use lopdf::Document;

use crate::config::{EngineChoice, RenderConfig};
use crate::convert::vector::normalize;
use crate::error::Result;
use crate::model::message::{Body, Message};
use crate::model::page::{ContentKind, PageSet, PageSource};
use crate::pdf::fonts::configure_unicode_font;
use crate::pdf::geometry::mm_to_pt;
use crate::process::find_program;

use self::flow::FlowEngine;
use self::remote::{HttpFetcher, ImageFetcher};
use self::weasyprint::WeasyPrintEngine;

/// Lays out an HTML document on A4 pages.
pub trait LayoutEngine: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Lay out `html` with `margin_pt` on every side.
    ///
    /// Returns [`crate::error::Error::Render`] when the markup cannot be laid out.
    fn layout(&self, html: &str, margin_pt: f32) -> Result<Document>;
}

/// Renders message bodies with a primary engine and a plain-text fallback.
pub struct BodyRenderer {
    engine: Arc<dyn LayoutEngine>,
    margin_pt: f32,
    header_block: bool,
    fetcher: Option<Arc<dyn ImageFetcher>>,
}

impl BodyRenderer {
    pub fn new(engine: Arc<dyn LayoutEngine>, margin_mm: f32, header_block: bool) -> Self {
        Self {
            engine,
            margin_pt: mm_to_pt(margin_mm),
            header_block,
            fetcher: None,
        }
    }

    /// Pick the engine the configuration asks for.
    ///
    /// `auto` uses WeasyPrint when it is installed and the built-in engine otherwise.
    pub fn from_config(config: &RenderConfig) -> Self {
        configure_unicode_font(config.unicode_font.as_deref());
        let weasyprint = || {
            Arc::new(WeasyPrintEngine::new(
                config.weasyprint_path.clone(),
                config.timeout(),
            )) as Arc<dyn LayoutEngine>
        };
        let engine: Arc<dyn LayoutEngine> = match config.engine {
            EngineChoice::Builtin => Arc::new(FlowEngine),
            EngineChoice::Weasyprint => weasyprint(),
            EngineChoice::Auto => match find_program(&config.weasyprint_path, &[]) {
                Some(_) => weasyprint(),
                None => Arc::new(FlowEngine),
            },
        };
        tracing::debug!(engine = engine.name(), "Selected layout engine");
        let renderer = Self::new(engine, config.margin_mm, config.header_block);
        if config.fetch_remote_images {
            renderer.with_fetcher(Arc::new(HttpFetcher::new(
                config.fetch_timeout(),
                config.fetch_max_bytes,
            )))
        } else {
            renderer
        }
    }

    /// Same settings, different engine.
    pub fn with_engine(self, engine: Arc<dyn LayoutEngine>) -> Self {
        Self { engine, ..self }
    }

    /// Embed remote images fetched by `fetcher` before layout.
    pub fn with_fetcher(self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            fetcher: Some(fetcher),
            ..self
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Lay out the body of `message`.
    ///
    /// A layout failure is logged and the body is laid out again as plain text
    /// with the built-in engine. Every resulting page is exactly A4.
    pub fn render(&self, message: &Message) -> Result<PageSet> {
        let laid_out = markup::prepare(message, self.header_block, self.fetcher.as_deref())
            .and_then(|html| self.engine.layout(&html, self.margin_pt));
        let doc = match laid_out {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(
                    engine = self.engine.name(),
                    error = %e,
                    "Body layout failed, falling back to plain text"
                );
                let text = match &message.body {
                    Body::Html(html) => markup::html_to_text(html),
                    Body::Plain(text) => text.clone(),
                };
                let mut fallback = markup::plain_document(&text);
                if self.header_block {
                    if let Some(block) = markup::header_block(&message.headers) {
                        fallback = markup::insert_after_body_open(&fallback, &block);
                    }
                }
                FlowEngine.layout(&fallback, self.margin_pt)?
            }
        };
        let doc = normalize(doc)?;
        Ok(PageSet::new(PageSource::Body, ContentKind::Vector, doc))
    }
}
