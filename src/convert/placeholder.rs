//! The single page that stands in for an attachment that could not be converted.

use lopdf::dictionary;

use crate::error::Result;
use crate::model::page::{ContentKind, PageSet, PageSource};
use crate::pdf::builder::{horizontal_rule, PdfBuilder};
use crate::pdf::fonts::Font;
use crate::pdf::geometry::PageSize;

const TITLE_SIZE: f32 = 16.0;
const DETAIL_SIZE: f32 = 10.0;
const SIDE_MARGIN: f32 = 72.0;

/// Why the placeholder is there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderReason {
    Failed,
    Unsupported,
}

/// Build a one-page placeholder for `filename`, with `detail` in small print.
pub fn placeholder_page(
    index: usize,
    filename: &str,
    reason: PlaceholderReason,
    detail: &str,
) -> Result<PageSet> {
    let title = match reason {
        PlaceholderReason::Failed => format!("Attachment could not be converted: {filename}"),
        PlaceholderReason::Unsupported => {
            format!("Attachment not shown (unsupported type): {filename}")
        }
    };

    let page = PageSize::A4;
    let max_width = page.width - 2.0 * SIDE_MARGIN;
    let mut builder = PdfBuilder::a4();
    let fonts = builder.font_resources();

    let mut ops = Vec::new();
    let mut y = page.height * 0.6;
    for line in wrap(&title, Font::Bold, TITLE_SIZE, max_width) {
        let x = (page.width - Font::Bold.text_width(&line, TITLE_SIZE)) / 2.0;
        ops.extend(builder.text_line(&[(Font::Bold, line)], TITLE_SIZE, x, y));
        y -= TITLE_SIZE * 1.4;
    }
    ops.extend(horizontal_rule(SIDE_MARGIN, page.width - SIDE_MARGIN, y + 4.0, 0.5));
    y -= DETAIL_SIZE * 1.6;
    for line in wrap(detail, Font::Regular, DETAIL_SIZE, max_width) {
        let x = (page.width - Font::Regular.text_width(&line, DETAIL_SIZE)) / 2.0;
        ops.extend(builder.text_line(&[(Font::Regular, line)], DETAIL_SIZE, x, y));
        y -= DETAIL_SIZE * 1.4;
    }

    builder.add_page(ops, dictionary! { "Font" => fonts })?;
    Ok(PageSet::new(
        PageSource::Attachment {
            index,
            filename: filename.to_string(),
        },
        ContentKind::Placeholder,
        builder.finish()?,
    ))
}

/// Greedy word wrap. Words longer than a line are split by characters.
pub fn wrap(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if font.text_width(&candidate, size) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        for c in word.chars() {
            current.push(c);
            if font.text_width(&current, size) > max_width && current.chars().count() > 1 {
                current.pop();
                lines.push(std::mem::take(&mut current));
                current.push(c);
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
