//! Fonts for generated text.
//!
//! Text the base-14 fonts can show (WinAnsi) uses them. Everything else is
//! drawn with one embedded TrueType font found on the host or named in the
//! configuration; without one such characters become `?`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ab_glyph::{Font as _, FontVec, GlyphId};

/// The base-14 fonts used for generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Font {
    Regular,
    Bold,
    Mono,
}

impl Font {
    pub const ALL: [Font; 3] = [Font::Regular, Font::Bold, Font::Mono];

    /// Name under which the font appears in page resources.
    pub fn resource_name(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Mono => "F3",
        }
    }

    pub fn base_font(self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
            Font::Mono => "Courier",
        }
    }

    /// Advance width of `text` at `size` points.
    pub fn text_width(self, text: &str, size: f32) -> f32 {
        let unicode = unicode_font();
        let units: u32 = text
            .chars()
            .map(|c| match win_ansi_byte(c) {
                Some(_) => self.char_width(c),
                None => unicode
                    .and_then(|u| u.glyph(c).map(|gid| u.advance(gid)))
                    .unwrap_or_else(|| self.char_width('?')),
            })
            .sum();
        units as f32 * size / 1000.0
    }

    /// Glyph width in 1/1000 em.
    fn char_width(self, c: char) -> u32 {
        match self {
            Font::Mono => 600,
            Font::Regular => helvetica_width(c),
            // Helvetica-Bold is ~5% wider on average.
            Font::Bold => helvetica_width(c) * 105 / 100,
        }
    }
}

/// Helvetica AFM widths for printable ASCII, 556 for everything else.
fn helvetica_width(c: char) -> u32 {
    const WIDTHS: [u16; 95] = [
        278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
        556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
        278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
        667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
        722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
        278, 278, 278, 469, 556, 333, // '['..'`'
        556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
        556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
        334, 260, 334, 584, // '{'..'~'
    ];
    let code = c as u32;
    if (32..=126).contains(&code) {
        WIDTHS[(code - 32) as usize] as u32
    } else {
        556
    }
}

/// The WinAnsi code of `c`, if the base-14 fonts have it.
fn win_ansi_byte(c: char) -> Option<u8> {
    if c.is_ascii() {
        return Some(if c.is_ascii_control() { b' ' } else { c as u8 });
    }
    let mut buf = [0u8; 4];
    let (bytes, _, had_errors) = encoding_rs::WINDOWS_1252.encode(c.encode_utf8(&mut buf));
    match (had_errors, bytes.as_ref()) {
        (false, [byte]) => Some(*byte),
        _ => None,
    }
}

/// A stretch of text drawn with a single font program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// WinAnsi bytes for the run's base font.
    Base(Vec<u8>),
    /// Glyphs of the embedded Unicode font, with the character each one shows.
    Unicode(Vec<(u16, char)>),
}

/// Split `text` into base-font and Unicode-font segments.
///
/// Characters neither can show are drawn as `?` in the base font.
pub fn segments(text: &str, unicode: Option<&UnicodeFont>) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::new();
    for c in text.chars() {
        let glyph = match win_ansi_byte(c) {
            Some(_) => None,
            None => unicode.and_then(|u| u.glyph(c)),
        };
        match (glyph, out.last_mut()) {
            (Some(gid), Some(Segment::Unicode(glyphs))) => glyphs.push((gid, c)),
            (Some(gid), _) => out.push(Segment::Unicode(vec![(gid, c)])),
            (None, Some(Segment::Base(bytes))) => bytes.push(win_ansi_byte(c).unwrap_or(b'?')),
            (None, _) => out.push(Segment::Base(vec![win_ansi_byte(c).unwrap_or(b'?')])),
        }
    }
    out
}

// ── Embedded Unicode font ───────────────────────────────────────

/// Resource name of the embedded Unicode font.
pub const UNICODE_RESOURCE: &str = "F4";

/// TrueType fonts with wide coverage, in order of preference.
const UNICODE_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static UNICODE_FONT: OnceLock<Option<UnicodeFont>> = OnceLock::new();

/// A TrueType font program embedded for characters outside WinAnsi.
pub struct UnicodeFont {
    data: Vec<u8>,
    font: FontVec,
    name: String,
    units_per_em: f32,
}

impl std::fmt::Debug for UnicodeFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnicodeFont")
            .field("name", &self.name)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl UnicodeFont {
    /// Load a TrueType (`glyf` outlines) font file.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read(path).ok()?;
        // Collections and CFF outlines cannot be embedded as FontFile2.
        if data.starts_with(b"ttcf") || data.starts_with(b"OTTO") {
            tracing::debug!(path = %path.display(), "Skipping font that is not plain TrueType");
            return None;
        }
        let font = match FontVec::try_from_vec(data.clone()) {
            Ok(font) => font,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Unreadable font");
                return None;
            }
        };
        let units_per_em = font.units_per_em().filter(|u| *u > 0.0)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().chars().filter(char::is_ascii_alphanumeric).collect())
            .filter(|s: &String| !s.is_empty())
            .unwrap_or_else(|| "UnicodeSans".to_string());
        Some(Self {
            data,
            font,
            name,
            units_per_em,
        })
    }

    /// Glyph for `c`, if the font has one.
    pub fn glyph(&self, c: char) -> Option<u16> {
        let GlyphId(id) = self.font.glyph_id(c);
        (id != 0).then_some(id)
    }

    /// Advance width of glyph `gid` in 1/1000 em.
    pub fn advance(&self, gid: u16) -> u32 {
        let units = self.font.h_advance_unscaled(GlyphId(gid));
        (units * 1000.0 / self.units_per_em).round().max(0.0) as u32
    }

    /// Ascent and descent in 1/1000 em.
    pub fn vertical_metrics(&self) -> (i64, i64) {
        let scale = 1000.0 / self.units_per_em;
        (
            (self.font.ascent_unscaled() * scale).round() as i64,
            (self.font.descent_unscaled() * scale).round() as i64,
        )
    }

    /// PostScript-safe font name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The font file, as embedded.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Use the font at `path` for text outside WinAnsi, instead of searching the host.
///
/// Only the first call before any text is laid out takes effect.
pub fn configure_unicode_font(path: Option<&Path>) {
    let Some(path) = path else { return };
    let loaded = UnicodeFont::load(path);
    if loaded.is_none() {
        tracing::warn!(path = %path.display(), "Configured Unicode font is not usable TrueType");
        return;
    }
    if UNICODE_FONT.set(loaded).is_err() {
        tracing::debug!(path = %path.display(), "Unicode font already chosen");
    }
}

/// The embedded Unicode font, found on first use.
pub fn unicode_font() -> Option<&'static UnicodeFont> {
    UNICODE_FONT
        .get_or_init(|| {
            let found = UNICODE_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .filter(|p| p.is_file())
                .find_map(|p| UnicodeFont::load(&p));
            match &found {
                Some(font) => tracing::debug!(font = font.name(), "Using Unicode font"),
                None => tracing::info!("No Unicode TrueType font found, non-Latin text shows as ?"),
            }
            found
        })
        .as_ref()
}

/// Encode a PDF text string (`/Title`, `/Subject`), UTF-16BE with BOM when not ASCII.
pub fn text_string(text: &str) -> lopdf::Object {
    if text.is_ascii() {
        return lopdf::Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    lopdf::Object::String(bytes, lopdf::StringFormat::Hexadecimal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(Font::Mono.text_width("abcd", 10.0), 24.0);
        assert!((Font::Regular.text_width("Hello", 12.0) - 27.336).abs() < 0.01);
        assert!(Font::Bold.text_width("Hello", 12.0) > Font::Regular.text_width("Hello", 12.0));
    }

    #[test]
    fn test_win_ansi_encoding() {
        let base = |text: &str| segments(text, None);
        assert_eq!(base("Café"), vec![Segment::Base(vec![b'C', b'a', b'f', 0xE9])]);
        assert_eq!(base("€"), vec![Segment::Base(vec![0x80])]);
        assert_eq!(base("a\tb"), vec![Segment::Base(b"a b".to_vec())]);
    }

    #[test]
    fn test_segments_without_unicode_font() {
        assert_eq!(
            segments("Jos\u{e9} \u{5c71}", None),
            vec![Segment::Base(vec![b'J', b'o', b's', 0xE9, b' ', b'?'])]
        );
    }

    #[test]
    fn test_segments_split_around_unicode_runs() {
        let Some(font) = unicode_font() else {
            eprintln!("no Unicode TrueType font on this host, skipping");
            return;
        };
        let Some(cyr) = font.glyph('\u{416}') else { return };
        let parts = segments("a \u{416}\u{416} b", Some(font));
        assert_eq!(
            parts,
            vec![
                Segment::Base(b"a ".to_vec()),
                Segment::Unicode(vec![(cyr, '\u{416}'), (cyr, '\u{416}')]),
                Segment::Base(b" b".to_vec()),
            ]
        );
        assert!(font.advance(cyr) > 0);
        assert!(Font::Regular.text_width("\u{416}", 10.0) > 0.0);
    }

    #[test]
    fn test_text_string_unicode() {
        match text_string("Résumé") {
            lopdf::Object::String(bytes, _) => assert_eq!(&bytes[..2], &[0xFE, 0xFF]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
