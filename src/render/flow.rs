//! Built-in layout engine: flows simple HTML onto A4 pages with the base-14
//! fonts, falling back to an embedded TrueType font outside WinAnsi.
//!
//! Supports what mail bodies actually use: paragraphs, line breaks, headings,
//! bold and monospace runs, preformatted text, lists, quotes, table rows as
//! lines, rules, and images embedded as `data:` URIs. CSS is ignored.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use lopdf::content::Operation;
use lopdf::{dictionary, Dictionary, Document};

use crate::convert::image::{decode_oriented, flatten};
use crate::error::{Error, Result};
use crate::pdf::builder::{draw_xobject, horizontal_rule, PdfBuilder};
use crate::pdf::fonts::Font;
use crate::pdf::geometry::PageSize;
use crate::render::html::{tokenize, Token};
use crate::render::LayoutEngine;

const BODY_SIZE: f32 = 10.5;
const PRE_SIZE: f32 = 9.0;
const HEADING_SIZES: [f32; 6] = [20.0, 16.0, 14.0, 12.0, 11.0, 10.0];
const LINE_SPACING: f32 = 1.3;
const INDENT_STEP: f32 = 18.0;
/// CSS pixels to points.
const PX_TO_PT: f32 = 0.75;
const TAB: &str = "    ";

/// Elements whose content never reaches the page.
const HIDDEN: &[&str] = &["head", "title", "style", "script", "noscript", "template"];
/// Elements that start and end a block.
const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "main", "nav", "aside", "center",
    "address", "table", "tbody", "thead", "tfoot", "tr", "dl", "dt", "dd", "figure", "figcaption",
    "form", "fieldset", "body", "html",
];

/// The built-in engine. Needs no external tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlowEngine;

impl LayoutEngine for FlowEngine {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn layout(&self, html: &str, margin_pt: f32) -> Result<Document> {
        let tokens = tokenize(html)?;
        let blocks = build_blocks(&tokens);
        tracing::trace!(tokens = tokens.len(), blocks = blocks.len(), "Flow layout");
        paginate(&blocks, PageSize::A4, margin_pt)
    }
}

// ── Block model ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Word {
    font: Font,
    text: String,
    space_before: bool,
}

#[derive(Debug)]
enum Block {
    Paragraph {
        words: Vec<Word>,
        size: f32,
        indent: f32,
        gap: f32,
    },
    Preformatted {
        lines: Vec<String>,
        indent: f32,
    },
    Rule,
    Image {
        image: RgbImage,
        /// Requested width in points.
        width: f32,
        indent: f32,
    },
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    words: Vec<Word>,
    pending_space: bool,
    pre_text: String,
    hidden: usize,
    bold: usize,
    mono: usize,
    pre: usize,
    quote: usize,
    heading: Option<usize>,
    /// One entry per open list: `Some(n)` counts items of an ordered list.
    lists: Vec<Option<usize>>,
}

fn build_blocks(tokens: &[Token]) -> Vec<Block> {
    let mut b = BlockBuilder::default();
    for token in tokens {
        match token {
            Token::Text(text) => b.text(text),
            Token::Start { name, .. } => b.start(name, token),
            Token::End(name) => b.end(name),
        }
    }
    b.flush(0.0);
    b.flush_pre();
    b.blocks
}

impl BlockBuilder {
    fn font(&self) -> Font {
        if self.mono > 0 {
            Font::Mono
        } else if self.bold > 0 || self.heading.is_some() {
            Font::Bold
        } else {
            Font::Regular
        }
    }

    fn indent(&self) -> f32 {
        (self.quote + self.lists.len()) as f32 * INDENT_STEP
    }

    fn size(&self) -> f32 {
        match self.heading {
            Some(level) => HEADING_SIZES[level.clamp(1, 6) - 1],
            None => BODY_SIZE,
        }
    }

    fn text(&mut self, text: &str) {
        if self.hidden > 0 {
            return;
        }
        if self.pre > 0 {
            self.pre_text.push_str(text);
            return;
        }
        let font = self.font();
        let mut word_open = false;
        for c in text.chars() {
            if matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}' | '\u{ad}') {
                continue;
            }
            if c.is_whitespace() && c != '\u{a0}' {
                self.pending_space = true;
                word_open = false;
                continue;
            }
            let c = if c == '\u{a0}' { ' ' } else { c };
            let extend = word_open
                || (!self.pending_space
                    && self.words.last().is_some_and(|w| w.font == font));
            if extend {
                if let Some(last) = self.words.last_mut() {
                    last.text.push(c);
                    word_open = true;
                    continue;
                }
            }
            self.words.push(Word {
                font,
                text: c.to_string(),
                space_before: self.pending_space && !self.words.is_empty(),
            });
            self.pending_space = false;
            word_open = true;
        }
    }

    fn start(&mut self, name: &str, token: &Token) {
        if HIDDEN.contains(&name) {
            self.hidden += 1;
            return;
        }
        if self.hidden > 0 {
            return;
        }
        match name {
            "b" | "strong" | "th" => {
                if name == "th" {
                    self.pending_space = true;
                }
                self.bold += 1;
            }
            "code" | "tt" | "kbd" | "samp" => self.mono += 1,
            "pre" => {
                self.flush(0.0);
                self.pre += 1;
            }
            "br" => {
                if self.pre > 0 {
                    self.pre_text.push('\n');
                } else if self.words.is_empty() {
                    // Consecutive breaks leave a blank line.
                    self.flush(BODY_SIZE * LINE_SPACING);
                } else {
                    self.flush(0.0);
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush(0.0);
                self.heading = name[1..].parse().ok();
            }
            "ul" | "ol" => {
                self.flush(0.0);
                self.lists.push((name == "ol").then_some(0));
            }
            "li" => {
                self.flush(0.0);
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        *n += 1;
                        format!("{n}.")
                    }
                    _ => "•".to_string(),
                };
                self.words.push(Word {
                    font: Font::Regular,
                    text: marker,
                    space_before: false,
                });
                self.pending_space = true;
            }
            "blockquote" => {
                self.flush(0.0);
                self.quote += 1;
            }
            "td" => self.pending_space = true,
            "hr" => {
                self.flush(0.0);
                self.blocks.push(Block::Rule);
            }
            "img" => self.image(token),
            _ if BLOCKS.contains(&name) => self.flush(0.0),
            _ => {}
        }
    }

    fn end(&mut self, name: &str) {
        if HIDDEN.contains(&name) {
            self.hidden = self.hidden.saturating_sub(1);
            return;
        }
        if self.hidden > 0 {
            return;
        }
        match name {
            "b" | "strong" | "th" => self.bold = self.bold.saturating_sub(1),
            "code" | "tt" | "kbd" | "samp" => self.mono = self.mono.saturating_sub(1),
            "pre" => {
                self.pre = self.pre.saturating_sub(1);
                if self.pre == 0 {
                    self.flush_pre();
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let gap = self.size() * 0.5;
                self.flush(gap);
                self.heading = None;
            }
            "ul" | "ol" => {
                self.flush(0.0);
                self.lists.pop();
            }
            "li" => self.flush(2.0),
            "blockquote" => {
                self.flush(0.0);
                self.quote = self.quote.saturating_sub(1);
            }
            "p" => self.flush(BODY_SIZE * 0.6),
            _ if BLOCKS.contains(&name) => self.flush(0.0),
            _ => {}
        }
    }

    fn image(&mut self, token: &Token) {
        let Some(src) = token.attr("src") else { return };
        let src = src.trim();
        if let Some(data) = src.strip_prefix("data:") {
            match decode_data_uri(data) {
                Some(image) => {
                    let natural = image.width() as f32 * PX_TO_PT;
                    let width = css_px(token.attr("width"))
                        .map(|w| w * PX_TO_PT)
                        .or_else(|| {
                            css_px(token.attr("height")).map(|h| {
                                h * PX_TO_PT * image.width() as f32 / image.height() as f32
                            })
                        })
                        .unwrap_or(natural);
                    self.flush(0.0);
                    let indent = self.indent();
                    self.blocks.push(Block::Image {
                        image,
                        width,
                        indent,
                    });
                }
                None => tracing::debug!("Skipping undecodable embedded image"),
            }
        } else if src.starts_with("http://") || src.starts_with("https://") {
            self.text(&format!(" [image: {src}] "));
        } else {
            tracing::debug!(src = %src, "Dropping image with unresolvable source");
        }
    }

    /// Close the current paragraph, if any, followed by `gap` points of space.
    fn flush(&mut self, gap: f32) {
        self.pending_space = false;
        if self.words.is_empty() {
            if gap > 0.0 {
                if let Some(Block::Paragraph { gap: last, .. }) = self.blocks.last_mut() {
                    *last = last.max(gap);
                }
            }
            return;
        }
        let words = std::mem::take(&mut self.words);
        self.blocks.push(Block::Paragraph {
            words,
            size: self.size(),
            indent: self.indent(),
            gap,
        });
    }

    fn flush_pre(&mut self) {
        if self.pre_text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pre_text);
        let text = text.strip_prefix('\n').unwrap_or(&text);
        let lines = text
            .trim_end_matches(['\n', '\r'])
            .lines()
            .map(|l| l.replace('\t', TAB))
            .collect();
        self.blocks.push(Block::Preformatted {
            lines,
            indent: self.indent(),
        });
    }
}

fn css_px(value: Option<&str>) -> Option<f32> {
    let v = value?.trim().trim_end_matches("px");
    v.parse::<f32>().ok().filter(|w| *w > 0.0)
}

/// Decode the part of a `data:` URI after the scheme into an image.
fn decode_data_uri(data: &str) -> Option<RgbImage> {
    let (meta, payload) = data.split_once(',')?;
    if !meta.to_ascii_lowercase().ends_with(";base64") {
        return None;
    }
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(cleaned).ok()?;
    let img = decode_oriented(&bytes).ok()?;
    (img.width() > 0 && img.height() > 0).then(|| flatten(img))
}

// ── Pagination ──────────────────────────────────────────────────

struct Pager {
    builder: PdfBuilder,
    fonts: Dictionary,
    ops: Vec<Operation>,
    xobjects: Dictionary,
    images: usize,
    left: f32,
    width: f32,
    top: f32,
    bottom: f32,
    y: f32,
}

impl Pager {
    fn is_page_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn finish_page(&mut self) -> Result<()> {
        let ops = std::mem::take(&mut self.ops);
        let xobjects = std::mem::take(&mut self.xobjects);
        let mut resources = dictionary! { "Font" => self.fonts.clone() };
        if !xobjects.is_empty() {
            resources.set("XObject", xobjects);
        }
        self.builder.add_page(ops, resources)?;
        self.y = self.top;
        Ok(())
    }

    /// Start a new page unless `height` still fits on this one.
    fn reserve(&mut self, height: f32) -> Result<()> {
        if self.y - height < self.bottom && !self.is_page_empty() {
            self.finish_page()?;
        }
        Ok(())
    }
}

fn paginate(blocks: &[Block], page: PageSize, margin: f32) -> Result<Document> {
    let width = page.width - 2.0 * margin;
    let height = page.height - 2.0 * margin;
    if width < 72.0 || height < 72.0 {
        return Err(Error::Render(format!("margin of {margin}pt leaves no room for content")));
    }
    let mut builder = PdfBuilder::new(page);
    let fonts = builder.font_resources();
    let mut p = Pager {
        builder,
        fonts,
        ops: Vec::new(),
        xobjects: Dictionary::new(),
        images: 0,
        left: margin,
        width,
        top: page.height - margin,
        bottom: margin,
        y: page.height - margin,
    };

    for block in blocks {
        match block {
            Block::Paragraph {
                words,
                size,
                indent,
                gap,
            } => {
                let indent = indent.min(width / 2.0);
                let line_height = size * LINE_SPACING;
                for runs in wrap_words(words, *size, width - indent) {
                    p.reserve(line_height)?;
                    let baseline = p.y - size;
                    let line = p.builder.text_line(&runs, *size, p.left + indent, baseline);
                    p.ops.extend(line);
                    p.y -= line_height;
                }
                p.y -= gap;
            }
            Block::Preformatted { lines, indent } => {
                let indent = indent.min(width / 2.0);
                let line_height = PRE_SIZE * LINE_SPACING;
                let max_chars = ((width - indent) / Font::Mono.text_width(" ", PRE_SIZE)) as usize;
                for line in lines {
                    for chunk in split_chars(line, max_chars.max(1)) {
                        p.reserve(line_height)?;
                        if !chunk.is_empty() {
                            let baseline = p.y - PRE_SIZE;
                            let line = p.builder.text_line(
                                &[(Font::Mono, chunk)],
                                PRE_SIZE,
                                p.left + indent,
                                baseline,
                            );
                            p.ops.extend(line);
                        }
                        p.y -= line_height;
                    }
                }
                p.y -= PRE_SIZE * 0.6;
            }
            Block::Rule => {
                p.reserve(8.0)?;
                p.y -= 4.0;
                let (x0, x1) = (p.left, p.left + p.width);
                p.ops.extend(horizontal_rule(x0, x1, p.y, 0.5));
                p.y -= 4.0;
            }
            Block::Image {
                image,
                width: wanted,
                indent,
            } => {
                let indent = indent.min(width / 2.0);
                let aspect = image.height() as f32 / image.width() as f32;
                let mut w = wanted.min(width - indent);
                let mut h = w * aspect;
                if h > height {
                    h = height;
                    w = h / aspect;
                }
                p.reserve(h)?;
                let id = p.builder.add_image(image)?;
                let name = format!("Im{}", p.images);
                p.images += 1;
                p.xobjects.set(name.as_bytes().to_vec(), id);
                p.ops.extend(draw_xobject(
                    &name,
                    [w, 0.0, 0.0, h, p.left + indent, p.y - h],
                ));
                p.y -= h + 4.0;
            }
        }
    }

    if !p.is_page_empty() || p.builder.page_count() == 0 {
        p.finish_page()?;
    }
    p.builder.finish()
}

/// Break words into lines no wider than `max_width`, merging same-font runs.
fn wrap_words(words: &[Word], size: f32, max_width: f32) -> Vec<Vec<(Font, String)>> {
    let mut lines: Vec<Vec<(Font, String)>> = Vec::new();
    let mut line: Vec<(Font, String)> = Vec::new();
    let mut line_width = 0.0;

    for word in words {
        let word_width = word.font.text_width(&word.text, size);
        let space = if word.space_before && !line.is_empty() {
            word.font.text_width(" ", size)
        } else {
            0.0
        };

        if line_width + space + word_width > max_width && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
            line_width = 0.0;
        }

        if word_width > max_width {
            // A single word wider than the column is split by characters.
            let per_char = (word_width / word.text.chars().count() as f32).max(0.1);
            let max_chars = ((max_width / per_char) as usize).max(1);
            let mut chunks = split_chars(&word.text, max_chars).into_iter().peekable();
            while let Some(chunk) = chunks.next() {
                if chunks.peek().is_some() {
                    lines.push(vec![(word.font, chunk)]);
                } else {
                    line_width = word.font.text_width(&chunk, size);
                    line.push((word.font, chunk));
                }
            }
            continue;
        }

        let leading = if line.is_empty() { 0.0 } else { space };
        let text = if leading > 0.0 {
            format!(" {}", word.text)
        } else {
            word.text.clone()
        };
        match line.last_mut() {
            Some((font, run)) if *font == word.font => run.push_str(&text),
            _ => line.push((word.font, text)),
        }
        line_width += leading + word_width;
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn split_chars(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::page::{media_box_size, number};
    use lopdf::content::Content;

    fn layout(html: &str) -> Document {
        FlowEngine.layout(html, 56.69).unwrap()
    }

    fn page_text(doc: &Document, page: usize) -> String {
        let id = doc.get_pages()[&(page as u32)];
        String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned()
    }

    fn png_data_uri(w: u32, h: u32) -> String {
        let img = image::DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([200, 10, 10])));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(out.into_inner()))
    }

    #[test]
    fn test_simple_paragraph_is_one_a4_page() {
        let doc = layout("<html><body><p>Hello <b>world</b></p></body></html>");
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let id = pages[&1];
        assert!(media_box_size(&doc, id).unwrap().approx_eq(&PageSize::A4));
        let text = page_text(&doc, 1);
        assert!(text.contains("(Hello)"));
        assert!(text.contains("/F2"));
        assert!(text.contains("( world)"));
    }

    #[test]
    fn test_long_body_paginates() {
        let para = "<p>".to_string() + &"lorem ipsum dolor sit amet ".repeat(40) + "</p>";
        let doc = layout(&para.repeat(30));
        assert!(doc.get_pages().len() > 1);
    }

    #[test]
    fn test_empty_body_still_has_a_page() {
        assert_eq!(layout("").get_pages().len(), 1);
        assert_eq!(layout("<html><head><title>x</title></head><body></body></html>").get_pages().len(), 1);
    }

    #[test]
    fn test_malformed_markup_is_render_error() {
        let err = FlowEngine.layout("<p>ok</p><table <tr", 56.69).unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[test]
    fn test_embedded_image_is_drawn() {
        let html = format!("<p>Logo:</p><img src=\"{}\">", png_data_uri(8, 4));
        let doc = layout(&html);
        let id = doc.get_pages()[&1];
        let page = doc.get_dictionary(id).unwrap();
        let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        assert!(xobjects.has(b"Im0"));
        assert!(page_text(&doc, 1).contains("/Im0 Do"));
    }

    #[test]
    fn test_wide_image_scaled_to_content_width() {
        let blocks = build_blocks(&tokenize(&format!("<img src=\"{}\">", png_data_uri(2000, 1000))).unwrap());
        assert!(matches!(&blocks[0], Block::Image { width, .. } if (*width - 1500.0).abs() < 0.01));
        let doc = paginate(&blocks, PageSize::A4, 50.0).unwrap();
        let id = doc.get_pages()[&1];
        let content = Content::decode(&doc.get_page_content(id).unwrap()).unwrap();
        let cm = content.operations.iter().find(|op| op.operator == "cm").unwrap();
        let m: Vec<f32> = cm.operands.iter().filter_map(number).collect();
        // Content width of 495.28pt, half as tall.
        assert!((m[0] - 495.28).abs() < 0.01);
        assert!((m[3] - 247.64).abs() < 0.01);
    }

    #[test]
    fn test_remote_image_becomes_marker() {
        let text = page_text(&layout("<img src=\"https://example.com/a.png\">"), 1);
        assert!(text.contains("[image: https://example.com/a.png]"));
    }

    #[test]
    fn test_unresolved_cid_image_dropped() {
        let blocks = build_blocks(&tokenize("<img src=\"cid:missing\"><p>x</p>").unwrap());
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_whitespace_collapses_and_styles_hidden() {
        let blocks = build_blocks(
            &tokenize("<style>p{color:red}</style><p>  a \n\t b  </p>").unwrap(),
        );
        let Block::Paragraph { words, .. } = &blocks[0] else { panic!("expected paragraph") };
        let texts: Vec<_> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, ["a", "b"]);
        assert!(!words[0].space_before);
        assert!(words[1].space_before);
    }

    #[test]
    fn test_ordered_list_markers() {
        let blocks = build_blocks(&tokenize("<ol><li>one</li><li>two</li></ol>").unwrap());
        let markers: Vec<_> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph { words, .. } => Some(words[0].text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(markers, ["1.", "2."]);
    }

    #[test]
    fn test_preformatted_keeps_lines() {
        let blocks = build_blocks(&tokenize("<pre>a\n  b\tc\n</pre>").unwrap());
        let Block::Preformatted { lines, .. } = &blocks[0] else { panic!("expected pre") };
        assert_eq!(lines, &["a".to_string(), "  b    c".to_string()]);
    }

    #[test]
    fn test_wrap_words_fits_width() {
        let words: Vec<Word> = "the quick brown fox jumps over the lazy dog"
            .split(' ')
            .enumerate()
            .map(|(i, w)| Word {
                font: Font::Regular,
                text: w.to_string(),
                space_before: i > 0,
            })
            .collect();
        let lines = wrap_words(&words, 10.0, 80.0);
        assert!(lines.len() > 1);
        for line in &lines {
            let width: f32 = line.iter().map(|(f, t)| f.text_width(t, 10.0)).sum();
            assert!(width <= 80.0 + 0.01);
        }
    }
}
