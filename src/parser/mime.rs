//! MIME structure: body selection, inline parts, and attachments.

use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::convert::classify::extension_for;
use crate::error::{Error, Result};
use crate::model::message::{cid_matches, Body, Disposition, Message, Part};
use crate::parser::header::{header_map, message_date, strip_angle_brackets};
use crate::render::markup::referenced_cids;

/// Parse raw message bytes into a [`Message`].
///
/// The first HTML body part wins over plain-text alternatives. A part is
/// inline when the HTML body references its Content-ID; every other non-body
/// part is an attachment, in MIME tree order. Nested messages stay opaque.
pub fn parse_message(raw: &[u8]) -> Result<Message> {
    let data = skip_from_line(raw);
    let parsed = MessageParser::default()
        .parse(data)
        .ok_or_else(|| Error::Parse("not an RFC 5322 message".into()))?;
    let headers = header_map(&parsed, data);
    let date = message_date(&parsed, &headers);

    let part_body = |id: &mail_parser::MessagePartId| parsed.parts.get(*id as usize).map(|p| &p.body);
    let body = parsed
        .html_body
        .iter()
        .find_map(|id| match part_body(id) {
            Some(PartType::Html(html)) => Some(Body::Html(html.to_string())),
            _ => None,
        })
        .or_else(|| {
            parsed.text_body.iter().find_map(|id| match part_body(id) {
                Some(PartType::Text(text)) => Some(Body::Plain(text.to_string())),
                _ => None,
            })
        })
        .ok_or_else(|| Error::Parse("message has no decodable body".into()))?;

    // Alternatives of the chosen body are body content too, not attachments.
    let body_ids: Vec<usize> = parsed
        .html_body
        .iter()
        .chain(parsed.text_body.iter())
        .map(|id| *id as usize)
        .filter(|&id| {
            matches!(
                parsed.parts.get(id).map(|p| &p.body),
                Some(PartType::Html(_) | PartType::Text(_))
            )
        })
        .collect();

    let cids = match &body {
        Body::Html(html) => referenced_cids(html),
        Body::Plain(_) => Vec::new(),
    };

    let mut parts = Vec::new();
    let mut unnamed = 0;
    for (id, mime_part) in parsed.parts.iter().enumerate() {
        if body_ids.contains(&id) || matches!(mime_part.body, PartType::Multipart(_)) {
            continue;
        }
        let content_type = content_type_of(mime_part);
        let content_id = mime_part
            .content_id()
            .map(strip_angle_brackets)
            .filter(|id| !id.is_empty())
            .map(String::from);
        let referenced = content_id
            .as_deref()
            .is_some_and(|id| cids.iter().any(|r| cid_matches(id, r)));
        let disposition = if referenced {
            Disposition::Inline
        } else {
            Disposition::Attachment
        };
        let filename = match mime_part.attachment_name() {
            Some(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
            _ if disposition == Disposition::Attachment => {
                unnamed += 1;
                Some(format!(
                    "attachment_{unnamed}.{}",
                    extension_for(&content_type)
                ))
            }
            _ => None,
        };

        parts.push(Part {
            index: parts.len(),
            content_type,
            content_id,
            filename,
            disposition,
            payload: mime_part.contents().to_vec(),
        });
    }

    let unresolved_cids: Vec<String> = cids
        .into_iter()
        .filter(|r| {
            !parts.iter().any(|p| {
                p.disposition == Disposition::Inline
                    && p.content_id.as_deref().is_some_and(|id| cid_matches(id, r))
            })
        })
        .collect();
    for cid in &unresolved_cids {
        tracing::warn!(cid = %cid, "Body references a missing inline part");
    }

    tracing::debug!(
        body = match body {
            Body::Html(_) => "html",
            Body::Plain(_) => "plain",
        },
        parts = parts.len(),
        attachments = parts.iter().filter(|p| p.disposition == Disposition::Attachment).count(),
        "Parsed message"
    );

    Ok(Message {
        raw: raw.to_vec(),
        headers,
        date,
        body,
        parts,
        unresolved_cids,
    })
}

/// Lowercase `type/subtype` of a part, inferred from its shape when undeclared.
fn content_type_of(part: &mail_parser::MessagePart<'_>) -> String {
    if let Some(ct) = part.content_type() {
        let main = ct.ctype().to_ascii_lowercase();
        return match ct.subtype() {
            Some(sub) => format!("{main}/{}", sub.to_ascii_lowercase()),
            None => main,
        };
    }
    match part.body {
        PartType::Text(_) => "text/plain",
        PartType::Html(_) => "text/html",
        PartType::Message(_) => "message/rfc822",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Skip a UTF-8 BOM and the `From ` separator line of mbox-exported messages.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
