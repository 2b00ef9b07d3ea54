//! Build new A4 documents page by page (images, generated text, placeholders).

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::Result;
use crate::pdf::fonts::{segments, unicode_font, Font, Segment, UnicodeFont, UNICODE_RESOURCE};
use crate::pdf::geometry::PageSize;

/// Incrementally assembles a standalone PDF whose pages all share one size.
pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    page_size: PageSize,
    kids: Vec<Object>,
    fonts: HashMap<Font, ObjectId>,
    unicode: Option<UnicodeUse>,
}

/// The embedded Unicode font: its reserved object id and the glyphs drawn so far.
struct UnicodeUse {
    id: ObjectId,
    font: &'static UnicodeFont,
    glyphs: BTreeMap<u16, char>,
}

impl PdfBuilder {
    pub fn new(page_size: PageSize) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            page_size,
            kids: Vec::new(),
            fonts: HashMap::new(),
            unicode: None,
        }
    }

    pub fn a4() -> Self {
        Self::new(PageSize::A4)
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Add an RGB image as a Flate-compressed image XObject.
    pub fn add_image(&mut self, image: &RgbImage) -> Result<ObjectId> {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width() as i64,
            "Height" => image.height() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };
        Ok(self.doc.add_object(deflated_stream(dict, image.as_raw())?))
    }

    /// Font dictionary entry for every base font, created on first use,
    /// plus the Unicode font when the host has one.
    pub fn font_resources(&mut self) -> Dictionary {
        let mut fonts = Dictionary::new();
        for font in Font::ALL {
            let id = match self.fonts.get(&font) {
                Some(id) => *id,
                None => {
                    let id = self.doc.add_object(dictionary! {
                        "Type" => "Font",
                        "Subtype" => "Type1",
                        "BaseFont" => font.base_font(),
                        "Encoding" => "WinAnsiEncoding",
                    });
                    self.fonts.insert(font, id);
                    id
                }
            };
            fonts.set(font.resource_name(), id);
        }
        if self.unicode.is_none() {
            if let Some(font) = unicode_font() {
                // Written in finish(), once the glyphs in use are known.
                self.unicode = Some(UnicodeUse {
                    id: self.doc.new_object_id(),
                    font,
                    glyphs: BTreeMap::new(),
                });
            }
        }
        if let Some(unicode) = &self.unicode {
            fonts.set(UNICODE_RESOURCE, unicode.id);
        }
        fonts
    }

    /// Operations drawing one line of text at `(x, y)`, switching fonts between runs.
    ///
    /// Characters outside WinAnsi go to the Unicode font reserved by
    /// [`Self::font_resources`].
    pub fn text_line(&mut self, runs: &[(Font, String)], size: f32, x: f32, y: f32) -> Vec<Operation> {
        let mut ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Td", vec![x.into(), y.into()]),
        ];
        let mut current: Option<&'static str> = None;
        let mut select = |ops: &mut Vec<Operation>, name: &'static str| {
            if current != Some(name) {
                ops.push(Operation::new("Tf", vec![name.into(), size.into()]));
                current = Some(name);
            }
        };
        for (font, text) in runs {
            for segment in segments(text, self.unicode.as_ref().map(|u| u.font)) {
                match segment {
                    Segment::Base(bytes) => {
                        select(&mut ops, font.resource_name());
                        ops.push(Operation::new("Tj", vec![Object::string_literal(bytes)]));
                    }
                    Segment::Unicode(glyphs) => {
                        let Some(unicode) = self.unicode.as_mut() else { continue };
                        select(&mut ops, UNICODE_RESOURCE);
                        let mut codes = Vec::with_capacity(glyphs.len() * 2);
                        for (gid, c) in glyphs {
                            unicode.glyphs.insert(gid, c);
                            codes.extend_from_slice(&gid.to_be_bytes());
                        }
                        ops.push(Operation::new(
                            "Tj",
                            vec![Object::String(codes, StringFormat::Hexadecimal)],
                        ));
                    }
                }
            }
        }
        ops.push(Operation::new("ET", vec![]));
        ops
    }

    /// Append a page with the given operations and resources.
    pub fn add_page(&mut self, operations: Vec<Operation>, resources: Dictionary) -> Result<ObjectId> {
        let content = Content { operations }.encode()?;
        let content_id = self
            .doc
            .add_object(deflated_stream(Dictionary::new(), &content)?);
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), self.page_size.width.into(), self.page_size.height.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.kids.push(page_id.into());
        Ok(page_id)
    }

    /// Close the page tree and return the document.
    pub fn finish(mut self) -> Result<Document> {
        if let Some(unicode) = self.unicode.take() {
            self.write_unicode_font(unicode)?;
        }
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
        };
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        Ok(self.doc)
    }

    /// Write the Type0 font for the glyphs in use under its reserved id.
    fn write_unicode_font(&mut self, unicode: UnicodeUse) -> Result<()> {
        let UnicodeUse { id, font, glyphs } = unicode;
        if glyphs.is_empty() {
            // Referenced from page resources but never drawn: keep the reference valid
            // without embedding the font program.
            self.doc.objects.insert(
                id,
                Object::Dictionary(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => Font::Regular.base_font(),
                    "Encoding" => "WinAnsiEncoding",
                }),
            );
            return Ok(());
        }

        let mut file_dict = Dictionary::new();
        file_dict.set("Length1", font.data().len() as i64);
        let file_id = self.doc.add_object(deflated_stream(file_dict, font.data())?);
        let (ascent, descent) = font.vertical_metrics();
        let descriptor_id = self.doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => font.name(),
            "Flags" => 32,
            "FontBBox" => vec![0.into(), descent.into(), 1000.into(), ascent.into()],
            "ItalicAngle" => 0,
            "Ascent" => ascent,
            "Descent" => descent,
            "CapHeight" => ascent,
            "StemV" => 80,
            "FontFile2" => file_id,
        });

        let mut widths = Vec::with_capacity(glyphs.len() * 2);
        for gid in glyphs.keys() {
            widths.push(Object::Integer(i64::from(*gid)));
            widths.push(Object::Array(vec![Object::Integer(i64::from(font.advance(*gid)))]));
        }
        let cid_font_id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => font.name(),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 1000,
            "W" => widths,
            "CIDToGIDMap" => "Identity",
        });
        let to_unicode_id = self
            .doc
            .add_object(deflated_stream(Dictionary::new(), to_unicode_cmap(&glyphs).as_bytes())?);

        self.doc.objects.insert(
            id,
            Object::Dictionary(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type0",
                "BaseFont" => font.name(),
                "Encoding" => "Identity-H",
                "DescendantFonts" => vec![cid_font_id.into()],
                "ToUnicode" => to_unicode_id,
            }),
        );
        tracing::trace!(glyphs = glyphs.len(), font = font.name(), "Embedded Unicode font");
        Ok(())
    }
}

/// CMap mapping two-byte glyph codes back to text, for search and copy.
fn to_unicode_cmap(glyphs: &BTreeMap<u16, char>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
/CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let entries: Vec<_> = glyphs.iter().collect();
    // At most 100 entries per bfchar section.
    for chunk in entries.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (gid, c) in chunk {
            let mut units = [0u16; 2];
            let hex: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{u:04X}"))
                .collect();
            let _ = writeln!(cmap, "<{gid:04X}> <{hex}>");
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

/// Zlib-compress `data` into a stream carrying `/Filter /FlateDecode`.
pub fn deflated_stream(mut dict: Dictionary, data: &[u8]) -> Result<Stream> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, compressed))
}

// ── Content stream helpers ──────────────────────────────────────

/// Operations painting the named XObject through matrix `m`.
pub fn draw_xobject(name: &str, m: [f32; 6]) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("cm", m.iter().map(|v| (*v).into()).collect()),
        Operation::new("Do", vec![name.into()]),
        Operation::new("Q", vec![]),
    ]
}

/// Operations stroking a horizontal rule.
pub fn horizontal_rule(x0: f32, x1: f32, y: f32, width: f32) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("w", vec![width.into()]),
        Operation::new("G", vec![0.6f32.into()]),
        Operation::new("m", vec![x0.into(), y.into()]),
        Operation::new("l", vec![x1.into(), y.into()]),
        Operation::new("S", vec![]),
        Operation::new("Q", vec![]),
    ]
}
