//! Merge page sets into one output document.

use std::ops::Range;

use lopdf::{dictionary, Document, Object, ObjectId};

use crate::error::{Error, Result};
use crate::model::page::{media_box_size, PageSet, PageSource};
use crate::pdf::fonts::text_string;
use crate::pdf::geometry::PageSize;

/// Document-level metadata written into `/Info`.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub title: Option<String>,
    pub author: Option<String>,
    /// PDF date string (`D:YYYYMMDDHHmmSS+HH'mm'`).
    pub creation_date: Option<String>,
}

/// The merged output.
#[derive(Debug)]
pub struct MergedDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    /// Page range (0-based, exclusive end) contributed by each source, in order.
    pub sources: Vec<(PageSource, Range<usize>)>,
}

/// Concatenate `sets` in order into one PDF.
///
/// Fails with [`Error::Merge`] when a page is not the standard size.
pub fn merge(sets: Vec<PageSet>, options: &MergeOptions) -> Result<MergedDocument> {
    let mut merged = Document::with_version("1.5");
    let mut next_id = 1;
    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut sources = Vec::with_capacity(sets.len());

    for set in sets {
        let source = set.source.clone();
        let mut doc = set.into_document();
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let start = page_ids.len();
        let ordered: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for id in &ordered {
            check_geometry(&doc, *id, page_ids.len() + 1)?;
        }
        page_ids.extend(ordered);
        sources.push((source, start..page_ids.len()));

        for (id, object) in doc.objects {
            match dict_type(&object) {
                Some(b"Catalog") | Some(b"Pages") | Some(b"Outlines") | Some(b"Outline") => {}
                _ => {
                    merged.objects.insert(id, object);
                }
            }
        }
        merged.max_id = merged.max_id.max(doc.max_id);
    }

    if page_ids.is_empty() {
        return Err(Error::Merge("no pages to merge".into()));
    }

    let pages_id = merged.new_object_id();
    for id in &page_ids {
        let page = merged
            .get_object_mut(*id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| Error::Merge(format!("page object {id:?} missing: {e}")))?;
        page.set("Parent", pages_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "PageLabels" => dictionary! {
            "Nums" => vec![0.into(), dictionary! { "S" => "D" }.into()],
        },
    });
    merged.trailer.set("Root", catalog_id);

    let mut info = dictionary! { "Producer" => text_string(concat!("eml2pdf ", env!("CARGO_PKG_VERSION"))) };
    if let Some(title) = &options.title {
        info.set("Title", text_string(title));
    }
    if let Some(author) = &options.author {
        info.set("Author", text_string(author));
    }
    if let Some(date) = &options.creation_date {
        info.set("CreationDate", Object::string_literal(date.as_str()));
    }
    let info_id = merged.add_object(info);
    merged.trailer.set("Info", info_id);

    merged.compress();
    let mut bytes = Vec::new();
    merged.save_to(&mut bytes)?;

    tracing::debug!(pages = page_ids.len(), bytes = bytes.len(), "Merged document");

    Ok(MergedDocument {
        bytes,
        page_count: page_ids.len(),
        sources,
    })
}

fn check_geometry(doc: &Document, page_id: ObjectId, page_number: usize) -> Result<()> {
    match media_box_size(doc, page_id) {
        Some(size) if size.approx_eq(&PageSize::A4) => Ok(()),
        Some(size) => Err(Error::Merge(format!(
            "page {page_number} is {:.2}x{:.2}pt, expected A4",
            size.width, size.height
        ))),
        None => Err(Error::Merge(format!(
            "page {page_number} has no readable MediaBox"
        ))),
    }
}

fn dict_type(object: &Object) -> Option<&[u8]> {
    match object {
        Object::Dictionary(dict) => match dict.get(b"Type").ok()? {
            Object::Name(name) => Some(name.as_slice()),
            _ => None,
        },
        _ => None,
    }
}
