//! Rescale the pages of an existing PDF onto A4 without rasterizing them.
//!
//! Each source page becomes a Form XObject (its content plus inherited
//! resources) painted through a fit-and-center matrix on a fresh A4 page.

use lopdf::content::Content;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::convert::Converter;
use crate::error::{Error, Result};
use crate::model::job::ConversionJob;
use crate::model::message::Part;
use crate::model::page::{number, rect, ContentKind, PageSet, PageSource};
use crate::pdf::builder::{deflated_stream, draw_xobject};
use crate::pdf::geometry::{PageSize, SourceBox};

/// Bound on `/Parent` hops when resolving inherited attributes.
const MAX_TREE_DEPTH: usize = 32;

/// Page-level keys that no longer apply once the page is re-boxed.
const DROPPED_KEYS: [&[u8]; 7] = [
    b"CropBox",
    b"BleedBox",
    b"TrimBox",
    b"ArtBox",
    b"Rotate",
    b"Annots",
    b"UserUnit",
];

/// Converter for `application/pdf` attachments.
#[derive(Debug, Default, Clone, Copy)]
pub struct VectorConverter;

impl Converter for VectorConverter {
    fn convert(&self, part: &Part, job: &mut ConversionJob) -> Result<PageSet> {
        job.start_attempt();
        let name = part.display_name();
        let result = Document::load_mem(&part.payload)
            .map_err(|e| Error::conversion(&name, format!("unreadable PDF: {e}")))
            .and_then(|doc| {
                if doc.is_encrypted() {
                    return Err(Error::conversion(&name, "encrypted PDF"));
                }
                normalize(doc).map_err(|e| Error::conversion(&name, e))
            });
        match result {
            Ok(doc) => {
                job.succeed();
                Ok(PageSet::new(
                    PageSource::Attachment {
                        index: part.index,
                        filename: name,
                    },
                    ContentKind::Vector,
                    doc,
                ))
            }
            Err(e) => {
                job.fail_attempt(&e, 0);
                Err(e)
            }
        }
    }
}

/// Rewrite every page of `doc` to A4, preserving order and vector content.
pub fn normalize(mut doc: Document) -> Result<Document> {
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(Error::Pdf("document has no pages".into()));
    }
    for page_id in page_ids {
        normalize_page(&mut doc, page_id)?;
    }
    Ok(doc)
}

fn normalize_page(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let source = source_box(doc, page_id)?;
    let content = doc.get_page_content(page_id)?;
    let resources = inherited(doc, page_id, b"Resources").unwrap_or_else(|| Dictionary::new().into());

    let form = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Form",
        "BBox" => vec![source.llx.into(), source.lly.into(), source.urx.into(), source.ury.into()],
        "Resources" => resources,
    };
    let form_id = doc.add_object(deflated_stream(form, &content)?);

    let matrix = source.fit_matrix(PageSize::A4);
    let ops = draw_xobject("Src0", matrix.to_array());
    let page_content = Content { operations: ops }.encode()?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), page_content));

    let page = doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
    for key in DROPPED_KEYS {
        page.remove(key);
    }
    page.set(
        "MediaBox",
        vec![
            0.into(),
            0.into(),
            PageSize::A4.width.into(),
            PageSize::A4.height.into(),
        ],
    );
    page.set("Contents", content_id);
    page.set(
        "Resources",
        dictionary! { "XObject" => dictionary! { "Src0" => form_id } },
    );

    tracing::trace!(?page_id, ?source, ?matrix, "Normalized page");
    Ok(())
}

/// Visible box of a page: CropBox if present, else MediaBox, plus `/Rotate`.
fn source_box(doc: &Document, page_id: ObjectId) -> Result<SourceBox> {
    let media = inherited(doc, page_id, b"MediaBox")
        .and_then(|o| rect(doc, &o))
        // US Letter is the PDF default when a page omits its MediaBox.
        .unwrap_or([0.0, 0.0, 612.0, 792.0]);
    let visible = inherited(doc, page_id, b"CropBox")
        .and_then(|o| rect(doc, &o))
        .map(|crop| intersect(crop, media))
        .unwrap_or(media);
    let rotate = inherited(doc, page_id, b"Rotate")
        .and_then(|o| number(&o))
        .map(|r| r as i64)
        .unwrap_or(0);

    let sb = SourceBox::new(visible, rotate);
    if sb.width() <= 0.0 || sb.height() <= 0.0 {
        return Err(Error::Pdf(format!("page {page_id:?} has an empty box")));
    }
    Ok(sb)
}

fn intersect(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    let r = [a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])];
    if r[2] > r[0] && r[3] > r[1] {
        r
    } else {
        b
    }
}

/// Look up a page attribute, walking up `/Parent` links.
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}
