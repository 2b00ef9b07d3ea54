//! Markup rewriting before layout: cid resolution, CSS sanitation, header block,
//! and the plain-text view used when layout fails.

use std::ops::Range;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::Result;
use crate::model::message::{Body, HeaderMap, Message};
use crate::render::html::{serialize, Markup, Token};
use crate::render::remote::{embed_remote_images, ImageFetcher};

const CID_SCHEME: &str = "cid:";

/// Headers shown in the summary block, in display order.
const SUMMARY_HEADERS: &[(&str, &str)] = &[
    ("from", "From"),
    ("to", "To"),
    ("cc", "Cc"),
    ("date", "Date"),
    ("subject", "Subject"),
];

/// Every distinct `cid:` reference in `html`, percent-decoded, in order of appearance.
///
/// References are attribute values (`src`, `background`, ...) and `url()`
/// values in inline styles and `<style>` sheets; prose is never matched.
pub fn referenced_cids(html: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut found = Vec::new();
    let mut in_style = false;
    for token in Markup::parse(html).tokens() {
        match &token {
            Token::Start { name, attrs } => {
                in_style = name == "style";
                for (key, value) in attrs {
                    if key == "style" {
                        found.extend(css_urls(value).into_iter().filter_map(|(_, url)| cid_of(url)));
                    } else {
                        found.extend(cid_of(value));
                    }
                }
            }
            Token::Text(text) if in_style => {
                found.extend(css_urls(text).into_iter().filter_map(|(_, url)| cid_of(url)));
            }
            _ => in_style = false,
        }
    }
    for reference in found {
        if !out.contains(&reference) {
            out.push(reference);
        }
    }
    out
}

/// The decoded reference of a `cid:` URL.
fn cid_of(value: &str) -> Option<String> {
    let value = value.trim();
    let scheme = value.get(..CID_SCHEME.len())?;
    let rest = &value[CID_SCHEME.len()..];
    (scheme.eq_ignore_ascii_case(CID_SCHEME) && !rest.is_empty()).then(|| percent_decode(rest))
}

/// Byte ranges and values of the URLs inside `url(...)` in a CSS text.
fn css_urls(css: &str) -> Vec<(Range<usize>, &str)> {
    let lower = css.to_ascii_lowercase();
    let mut urls = Vec::new();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("url(") {
        let open = from + pos + 4;
        let Some(len) = css[open..].find(')') else { break };
        let inner = &css[open..open + len];
        let lead = inner.len() - inner.trim_start().len();
        let value = inner.trim().trim_matches(['"', '\'']);
        let start = open + lead + inner.trim_start().find(value).unwrap_or(0);
        urls.push((start..start + value.len(), value));
        from = open + len + 1;
    }
    urls
}

/// `data:` URI embedding the inline part `reference` names, if there is one.
fn inline_data_uri(reference: &str, message: &Message) -> Option<String> {
    let part = message.inline_part(reference)?;
    Some(format!(
        "data:{};base64,{}",
        part.content_type,
        STANDARD.encode(&part.payload)
    ))
}

/// Replace `url(cid:...)` references in CSS with embedded payloads.
fn resolve_css_cids(css: &str, message: &Message) -> String {
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    for (range, url) in css_urls(css) {
        if let Some(uri) = cid_of(url).and_then(|r| inline_data_uri(&r, message)) {
            out.push_str(&css[last..range.start]);
            out.push_str(&uri);
            last = range.end;
        }
    }
    out.push_str(&css[last..]);
    out
}

/// Rewrite an HTML body for layout.
///
/// `cid:` references become embedded `data:` URIs (references with no
/// matching inline part are left as they are; the parser already reported
/// them), blend modes are neutralized, charset declarations are made to match
/// the UTF-8 output, and with a `fetcher` remote images are embedded too.
/// Markup that ends inside a tag is [`crate::error::Error::Render`].
pub fn rewrite_body(
    html: &str,
    message: &Message,
    fetcher: Option<&dyn ImageFetcher>,
) -> Result<String> {
    let mut tokens = Markup::parse_strict(html)?.tokens();
    if let Some(fetcher) = fetcher {
        embed_remote_images(&mut tokens, fetcher);
    }
    let body = serialize(&tokens, |key, value| match key {
        "charset" => Some("utf-8".to_string()),
        "content" if value.to_ascii_lowercase().contains("charset=") => {
            Some("text/html; charset=utf-8".to_string())
        }
        "style" => Some(sanitize(&resolve_css_cids(value, message))),
        _ => cid_of(value).and_then(|r| inline_data_uri(&r, message)),
    });
    Ok(format!("<!DOCTYPE html>{body}"))
}

/// Neutralize `mix-blend-mode` declarations in CSS, which render as black boxes in print.
pub fn sanitize(css: &str) -> String {
    const PROPERTY: &str = "mix-blend-mode";
    let lower = css.to_ascii_lowercase();
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    let mut from = 0;
    while let Some(pos) = lower[from..].find(PROPERTY) {
        let prop_end = from + pos + PROPERTY.len();
        let after = &css[prop_end..];
        let colon = after.len() - after.trim_start().len();
        if !after[colon..].starts_with(':') {
            from = prop_end;
            continue;
        }
        let value_start = prop_end + colon + 1;
        let value_len = css[value_start..]
            .find([';', '"', '\'', '}'])
            .unwrap_or(css.len() - value_start);
        out.push_str(&css[last..value_start]);
        out.push_str(" normal");
        last = value_start + value_len;
        from = last;
    }
    out.push_str(&css[last..]);
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// A complete document showing `text` preformatted.
pub fn plain_document(text: &str) -> String {
    format!("<html><body><pre>{}</pre></body></html>", escape_html(text))
}

/// Summary of the message headers as markup, or `None` when none are present.
pub fn header_block(headers: &HeaderMap) -> Option<String> {
    let mut rows = String::new();
    for (key, label) in SUMMARY_HEADERS {
        if let Some(value) = headers.get(key).filter(|v| !v.trim().is_empty()) {
            rows.push_str(&format!(
                "<p><b>{label}:</b> {}</p>\n",
                escape_html(value.trim())
            ));
        }
    }
    if rows.is_empty() {
        return None;
    }
    Some(format!(
        "<div class=\"eml2pdf-headers\">\n{rows}<hr>\n</div>\n"
    ))
}

/// Insert `block` right after the opening `<body>` tag, or at the start.
pub fn insert_after_body_open(html: &str, block: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let at = lower
        .find("<body")
        .and_then(|start| html[start..].find('>').map(|gt| start + gt + 1))
        .unwrap_or(0);
    let mut out = String::with_capacity(html.len() + block.len());
    out.push_str(&html[..at]);
    out.push_str(block);
    out.push_str(&html[at..]);
    out
}

/// The markup for a message body, ready for layout.
pub fn prepare(
    message: &Message,
    with_headers: bool,
    fetcher: Option<&dyn ImageFetcher>,
) -> Result<String> {
    let html = match &message.body {
        Body::Html(html) => rewrite_body(html, message, fetcher)?,
        Body::Plain(text) => plain_document(text),
    };
    Ok(match with_headers.then(|| header_block(&message.headers)).flatten() {
        Some(block) => insert_after_body_open(&html, &block),
        None => html,
    })
}

/// Elements whose text is never shown.
const NOT_TEXT: &[&str] = &["head", "title", "script", "style", "noscript", "template"];

/// Elements that start a new line of text.
const LINE_BREAKING: &[&str] = &[
    "br", "p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "table",
    "blockquote", "hr",
];

/// Strip markup down to readable text.
///
/// Block elements become line breaks, scripts and styles are removed, and
/// runs of blank lines collapsed.
pub fn html_to_text(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut hidden = 0usize;
    for token in Markup::parse(html).tokens() {
        match &token {
            Token::Start { name, .. } if NOT_TEXT.contains(&name.as_str()) => hidden += 1,
            Token::End(name) if NOT_TEXT.contains(&name.as_str()) => {
                hidden = hidden.saturating_sub(1)
            }
            Token::Start { name, .. } | Token::End(name) => {
                if hidden == 0 && LINE_BREAKING.contains(&name.as_str()) {
                    result.push('\n');
                }
            }
            Token::Text(text) if hidden == 0 => result.push_str(text),
            Token::Text(_) => {}
        }
    }
    let result = result.replace('\u{a0}', " ");

    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(result.len());
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }
    cleaned.trim().to_string()
}

fn percent_decode(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }
    let hex = |b: u8| (b as char).to_digit(16).map(|d| d as u8);
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
