//! Header values for display and document metadata.
//!
//! Decoding (folding, encoded-words, charsets, address syntax) is done by
//! mail-parser; this module only turns its typed values into display text.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use mail_parser::{Addr, Address, HeaderValue};

use crate::model::message::HeaderMap;

/// Build a [`HeaderMap`] from the top-level headers of a parsed message.
///
/// `raw` is the input the message was parsed from; structured values with no
/// natural text form (dates, content types, trace headers) are shown as they
/// were written, with folding whitespace collapsed.
pub fn header_map(parsed: &mail_parser::Message<'_>, raw: &[u8]) -> HeaderMap {
    let entries = parsed
        .headers()
        .iter()
        .map(|header| {
            let written = raw
                .get(header.offset_start()..header.offset_end())
                .map(|bytes| collapse_whitespace(&String::from_utf8_lossy(bytes)))
                .unwrap_or_default();
            let value = display_value(header.value(), written);
            (header.name().to_ascii_lowercase(), value)
        })
        .collect();
    HeaderMap::new(entries)
}

fn display_value(value: &HeaderValue<'_>, written: String) -> String {
    match value {
        HeaderValue::Text(text) => text.trim().to_string(),
        HeaderValue::TextList(list) => list
            .iter()
            .map(|t| t.trim())
            .collect::<Vec<_>>()
            .join(", "),
        HeaderValue::Address(Address::List(addrs)) => join_addrs(addrs),
        HeaderValue::Address(Address::Group(groups)) => groups
            .iter()
            .map(|g| match g.name.as_deref() {
                Some(name) => format!("{name}: {};", join_addrs(&g.addresses)),
                None => join_addrs(&g.addresses),
            })
            .collect::<Vec<_>>()
            .join(" "),
        HeaderValue::Empty => String::new(),
        _ => written,
    }
}

fn join_addrs(addrs: &[Addr<'_>]) -> String {
    addrs
        .iter()
        .map(|a| match (a.name.as_deref(), a.address.as_deref()) {
            (Some(name), Some(addr)) => format!("{name} <{addr}>"),
            (Some(name), None) => name.to_string(),
            (None, Some(addr)) => addr.to_string(),
            (None, None) => String::new(),
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove surrounding `<…>` from a message or content id.
pub fn strip_angle_brackets(s: &str) -> &str {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
}

/// The message date: mail-parser's reading when it is valid, otherwise a
/// lenient parse of the header text.
pub fn message_date(parsed: &mail_parser::Message<'_>, headers: &HeaderMap) -> Option<DateTime<Utc>> {
    parsed
        .date()
        .filter(|d| d.is_valid())
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single())
        .or_else(|| headers.get("date").and_then(parse_date))
}

/// Numeric offsets of the zone names RFC 822 allowed and mailers still send.
const NAMED_ZONES: &[(&str, &str)] = &[
    ("UT", "+0000"),
    ("GMT", "+0000"),
    ("UTC", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
    ("CET", "+0100"),
    ("CEST", "+0200"),
];

/// Parse a date header value, tolerating trailing comments, named zones,
/// a missing weekday, and ISO 8601 timestamps.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let text = date_str.split('(').next().unwrap_or_default().trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    let without_weekday = match text.split_once(',') {
        Some((day, rest)) if day.len() == 3 && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim()
        }
        _ => text,
    };
    let numeric_zone = match without_weekday.rsplit_once(' ') {
        Some((head, zone)) => NAMED_ZONES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(zone))
            .map(|(_, offset)| format!("{head} {offset}"))
            .unwrap_or_else(|| without_weekday.to_string()),
        None => without_weekday.to_string(),
    };

    const ZONED: [&str; 3] = ["%d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M %z", "%Y-%m-%d %H:%M:%S %z"];
    const NAIVE: [&str; 2] = ["%d %b %Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"];
    let parsed = ZONED
        .iter()
        .find_map(|f| DateTime::parse_from_str(&numeric_zone, f).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NAIVE
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(&numeric_zone, f).ok())
                .map(|ndt| Utc.from_utc_datetime(&ndt))
        });
    if parsed.is_none() {
        tracing::warn!(date = date_str, "Could not parse date");
    }
    parsed
}

/// Format a timestamp as a PDF date string (`D:YYYYMMDDHHmmSS+00'00'`).
pub fn pdf_date(dt: &DateTime<Utc>) -> String {
    format!("D:{}+00'00'", dt.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use mail_parser::MessageParser;

    fn headers_of(raw: &[u8]) -> HeaderMap {
        let parsed = MessageParser::default().parse(raw).unwrap();
        header_map(&parsed, raw)
    }

    #[test]
    fn test_encoded_words_decoded() {
        let map = headers_of(
            b"From: =?UTF-8?B?Sm9zw6k=?= <jose@example.com>\r\n\
Subject: Re: =?ISO-8859-1?Q?Gr=FC=DFe?= aus Berlin\r\n\r\nx\r\n",
        );
        assert_eq!(map.get("From"), Some("Jos\u{e9} <jose@example.com>"));
        assert_eq!(map.get("subject"), Some("Re: Gr\u{fc}\u{df}e aus Berlin"));
    }

    #[test]
    fn test_folded_and_listed_values() {
        let map = headers_of(
            b"Subject: a very\r\n long subject\r\n\
To: Bob <bob@example.com>, carol@example.com\r\n\
Date: Tue, 1 Jul 2025\r\n 10:00:00 +0000\r\n\r\nx\r\n",
        );
        assert_eq!(map.get("subject"), Some("a very long subject"));
        assert_eq!(map.get("to"), Some("Bob <bob@example.com>, carol@example.com"));
        assert_eq!(map.get("date"), Some("Tue, 1 Jul 2025 10:00:00 +0000"));
    }

    #[test]
    fn test_message_date_prefers_parsed_value() {
        let raw = b"Date: Thu, 13 Feb 2025 10:30:00 +0100\r\n\r\nx\r\n";
        let parsed = MessageParser::default().parse(&raw[..]).unwrap();
        let headers = header_map(&parsed, raw);
        let dt = message_date(&parsed, &headers).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-02-13T09:30:00+00:00");
    }

    #[test]
    fn test_strip_angle_brackets() {
        assert_eq!(strip_angle_brackets(" <logo@x> "), "logo@x");
        assert_eq!(strip_angle_brackets("logo@x"), "logo@x");
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 13 Feb 2025 10:30:00 +0100").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-02-13T09:30:00+00:00");
    }

    #[test]
    fn test_parse_date_named_zone_and_comment() {
        let dt = parse_date("Mon, 3 Mar 2025 08:00:00 PST").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-03-03T16:00:00+00:00");
        let dt = parse_date("Tue, 4 Mar 2025 12:00:00 +0100 (CET)").unwrap();
        assert_eq!(dt.day(), 4);
        let dt = parse_date("4 Mar 2025 12:00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-03-04T12:00:00+00:00");
    }

    #[test]
    fn test_parse_date_garbage() {
        assert!(parse_date("").is_none());
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn test_pdf_date() {
        let dt = parse_date("2025-02-13T09:30:05Z").unwrap();
        assert_eq!(pdf_date(&dt), "D:20250213093005+00'00'");
    }
}
