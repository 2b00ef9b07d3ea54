//! Page sets: the pages one source contributes to the output document.

use lopdf::{Document, Object, ObjectId};

use crate::pdf::geometry::PageSize;

/// Where a page set comes from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase", tag = "source")]
pub enum PageSource {
    Body,
    Attachment { index: usize, filename: String },
}

/// What kind of content the pages carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Vector,
    Raster,
    Placeholder,
}

/// Ordered pages produced by one source.
///
/// Every page of the inner document carries an explicit `/MediaBox` and
/// `/Resources`, so the set can be merged without its page tree.
#[derive(Debug)]
pub struct PageSet {
    pub source: PageSource,
    pub kind: ContentKind,
    document: Document,
}

impl PageSet {
    pub fn new(source: PageSource, kind: ContentKind, document: Document) -> Self {
        Self {
            source,
            kind,
            document,
        }
    }

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Page ids in page order.
    pub fn page_ids(&self) -> Vec<ObjectId> {
        self.document.get_pages().into_values().collect()
    }

    /// MediaBox size of every page, in order. Pages without a readable box are skipped.
    pub fn page_sizes(&self) -> Vec<PageSize> {
        self.page_ids()
            .into_iter()
            .filter_map(|id| media_box_size(&self.document, id))
            .collect()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}

/// Read a number (integer or real) from a PDF object.
pub fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Read a four-number rectangle, following one level of indirection.
pub fn rect(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let obj = match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let arr = obj.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let mut out = [0.0f32; 4];
    for (slot, value) in out.iter_mut().zip(arr) {
        let value = match value {
            Object::Reference(id) => doc.get_object(*id).ok()?,
            other => other,
        };
        *slot = number(value)?;
    }
    Some(out)
}

/// Size of a page's own `/MediaBox`.
pub fn media_box_size(doc: &Document, page_id: ObjectId) -> Option<PageSize> {
    let dict = doc.get_dictionary(page_id).ok()?;
    let r = rect(doc, dict.get(b"MediaBox").ok()?)?;
    Some(PageSize {
        width: (r[2] - r[0]).abs(),
        height: (r[3] - r[1]).abs(),
    })
}
