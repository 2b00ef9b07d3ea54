//! Fixtures shared by the integration tests: MIME messages, images, and PDFs
//! built in memory, plus fake external engines.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId};

use eml2pdf::config::Config;
use eml2pdf::convert::office::OfficeEngine;
use eml2pdf::error::{Error, Result};
use eml2pdf::pipeline::Pipeline;
use eml2pdf::render::flow::FlowEngine;

/// One MIME leaf of a test message.
pub struct Leaf {
    pub headers: Vec<String>,
    pub payload: Vec<u8>,
    /// Written as-is instead of base64.
    pub raw: bool,
}

impl Leaf {
    pub fn attachment(content_type: &str, filename: &str, payload: Vec<u8>) -> Self {
        Self {
            headers: vec![
                format!("Content-Type: {content_type}; name=\"{filename}\""),
                format!("Content-Disposition: attachment; filename=\"{filename}\""),
            ],
            payload,
            raw: false,
        }
    }

    /// A forwarded message, kept unencoded as `message/rfc822` requires.
    pub fn message(filename: &str, payload: Vec<u8>) -> Self {
        Self {
            headers: vec![
                "Content-Type: message/rfc822".to_string(),
                format!("Content-Disposition: attachment; filename=\"{filename}\""),
            ],
            payload,
            raw: true,
        }
    }

    pub fn inline(content_type: &str, cid: &str, payload: Vec<u8>) -> Self {
        Self {
            headers: vec![
                format!("Content-Type: {content_type}"),
                format!("Content-ID: <{cid}>"),
                "Content-Disposition: inline".to_string(),
            ],
            payload,
            raw: false,
        }
    }
}

/// Builds an RFC 5322 message with an HTML or plain body, related inline
/// parts, and mixed attachments.
pub struct MessageBuilder {
    subject: String,
    html: Option<String>,
    text: Option<String>,
    inline: Vec<Leaf>,
    attachments: Vec<Leaf>,
}

impl MessageBuilder {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            html: None,
            text: None,
            inline: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn html(mut self, html: &str) -> Self {
        self.html = Some(html.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn inline(mut self, leaf: Leaf) -> Self {
        self.inline.push(leaf);
        self
    }

    pub fn attach(mut self, leaf: Leaf) -> Self {
        self.attachments.push(leaf);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut body_parts = Vec::new();
        if let Some(text) = &self.text {
            body_parts.push(text_leaf("text/plain", text));
        }
        if let Some(html) = &self.html {
            body_parts.push(text_leaf("text/html", html));
        }
        let mut body = match body_parts.len() {
            0 => text_leaf("text/plain", ""),
            1 => body_parts.remove(0),
            _ => multipart("alternative", "alt-boundary", body_parts),
        };
        if !self.inline.is_empty() {
            let mut related = vec![body];
            related.extend(self.inline.into_iter().map(binary_leaf));
            body = multipart("related", "rel-boundary", related);
        }
        if !self.attachments.is_empty() {
            let mut mixed = vec![body];
            mixed.extend(self.attachments.into_iter().map(binary_leaf));
            body = multipart("mixed", "mixed-boundary", mixed);
        }

        let mut out = String::new();
        out.push_str("From: Alice Example <alice@example.com>\r\n");
        out.push_str("To: bob@example.com\r\n");
        out.push_str(&format!("Subject: {}\r\n", self.subject));
        out.push_str("Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n");
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str(&body);
        out.into_bytes()
    }
}

/// Headers + blank line + content, ready to nest.
fn text_leaf(content_type: &str, text: &str) -> String {
    format!(
        "Content-Type: {content_type}; charset=utf-8\r\nContent-Transfer-Encoding: base64\r\n\r\n{}\r\n",
        wrapped_base64(text.as_bytes())
    )
}

fn binary_leaf(leaf: Leaf) -> String {
    let mut out = String::new();
    for h in &leaf.headers {
        out.push_str(h);
        out.push_str("\r\n");
    }
    if leaf.raw {
        out.push_str("\r\n");
        out.push_str(&String::from_utf8_lossy(&leaf.payload));
    } else {
        out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        out.push_str(&wrapped_base64(&leaf.payload));
        out.push_str("\r\n");
    }
    out
}

fn multipart(subtype: &str, boundary: &str, parts: Vec<String>) -> String {
    let mut out = format!("Content-Type: multipart/{subtype}; boundary=\"{boundary}\"\r\n\r\n");
    for part in parts {
        out.push_str(&format!("--{boundary}\r\n"));
        out.push_str(&part);
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out
}

fn wrapped_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// PNG of `w` × `h` pixels.
pub fn png(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(w, h, image::Rgb([200, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Multi-page TIFF with `frames` tiny grayscale frames.
pub fn tiff_frames(frames: usize) -> Vec<u8> {
    use tiff::encoder::{colortype::Gray8, TiffEncoder};

    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut out).unwrap();
        for _ in 0..frames {
            encoder.write_image::<Gray8>(2, 2, &[0, 64, 128, 255]).unwrap();
        }
    }
    out.into_inner()
}

/// PDF with one page per entry of `labels`, each `width` × `height` points,
/// showing its label as text.
pub fn pdf(labels: &[&str], width: f32, height: f32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let mut kids: Vec<Object> = Vec::new();
    for label in labels {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 50.into()]),
                Operation::new("Tj", vec![Object::string_literal(*label)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id =
            doc.add_object(lopdf::Stream::new(lopdf::Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Office engine that returns a fixed PDF after an optional delay.
pub struct FakeOffice {
    pub pdf: Vec<u8>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeOffice {
    pub fn new(labels: &[&str], delay: Duration) -> Self {
        Self {
            pdf: pdf(labels, 612.0, 792.0),
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

impl OfficeEngine for FakeOffice {
    fn convert(&self, _input: &Path, _workdir: &Path, _timeout: Duration) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(self.pdf.clone())
    }
}

/// Office engine whose every invocation times out.
pub struct HangingOffice {
    pub calls: AtomicUsize,
}

impl OfficeEngine for HangingOffice {
    fn convert(&self, _input: &Path, _workdir: &Path, timeout: Duration) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::resource(
            "soffice",
            format!("timed out after {:.1}s", timeout.as_secs_f32()),
        ))
    }
}

/// Pipeline with the built-in layout engine and a private office lock file.
pub fn pipeline(lock_dir: &Path) -> Pipeline {
    let mut config = Config::default();
    config.office.lock_file = Some(lock_dir.join("office.lock"));
    Pipeline::new(&config).with_layout_engine(Arc::new(FlowEngine))
}

/// Page ids of a PDF in page order.
pub fn pages(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// XObjects named in a page's own resources.
pub fn page_xobjects(doc: &Document, page: ObjectId) -> Vec<ObjectId> {
    doc.get_dictionary(page)
        .ok()
        .and_then(|p| p.get(b"Resources").ok())
        .and_then(|r| match r {
            Object::Reference(id) => doc.get_dictionary(*id).ok(),
            Object::Dictionary(d) => Some(d),
            _ => None,
        })
        .and_then(|r| r.get(b"XObject").ok())
        .and_then(|x| x.as_dict().ok())
        .map(|x| x.iter().filter_map(|(_, v)| v.as_reference().ok()).collect())
        .unwrap_or_default()
}

/// Decoded bytes of a stream object.
pub fn stream_bytes(doc: &Document, id: ObjectId) -> Vec<u8> {
    let stream = doc.get_object(id).and_then(Object::as_stream).unwrap();
    stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone())
}

/// Subtype of an XObject (`Image` or `Form`).
pub fn xobject_subtype(doc: &Document, id: ObjectId) -> String {
    let stream = doc.get_object(id).and_then(Object::as_stream).unwrap();
    match stream.dict.get(b"Subtype") {
        Ok(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
        _ => String::new(),
    }
}

/// Text drawn by a page, including the content of its form XObjects.
pub fn page_text(doc: &Document, page: ObjectId) -> String {
    let content = doc.get_page_content(page).unwrap_or_default();
    let mut text = String::from_utf8_lossy(&content).into_owned();
    for id in page_xobjects(doc, page) {
        if xobject_subtype(doc, id) == "Form" {
            text.push_str(&String::from_utf8_lossy(&stream_bytes(doc, id)));
        }
    }
    text
}
