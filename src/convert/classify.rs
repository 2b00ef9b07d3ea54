//! Map an attachment's declared type and filename to the converter that handles it.

use serde::Serialize;

/// Which converter an attachment goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    VectorDocument,
    OfficeDocument,
    Unsupported,
}

const IMAGE_SUBTYPES: &[&str] = &[
    "png", "jpeg", "jpg", "pjpeg", "gif", "bmp", "x-bmp", "x-ms-bmp", "tiff", "webp",
];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "jpe", "gif", "bmp", "tif", "tiff", "webp"];

const PDF_TYPES: &[&str] = &["application/pdf", "application/x-pdf", "application/acrobat"];

const OFFICE_TYPES: &[&str] = &[
    "application/msword",
    "application/rtf",
    "text/rtf",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
];
const OFFICE_TYPE_PREFIXES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.",
    "application/vnd.ms-word.",
    "application/vnd.ms-excel.",
    "application/vnd.ms-powerpoint.",
];
const OFFICE_EXTENSIONS: &[&str] = &[
    "doc", "docx", "docm", "dot", "dotx", "odt", "rtf", // word processing
    "xls", "xlsx", "xlsm", "ods", // spreadsheets
    "ppt", "pptx", "pptm", "pps", "ppsx", "odp", // presentations
];

/// Declared types that carry no information; the extension decides instead.
const GENERIC_TYPES: &[&str] = &[
    "",
    "application/octet-stream",
    "application/binary",
    "application/x-download",
    "application/force-download",
    "binary/octet-stream",
];

impl AttachmentKind {
    /// Classify an attachment. Total and deterministic.
    ///
    /// A specific declared content type wins; a generic or missing one falls
    /// back to the filename extension.
    pub fn classify(content_type: &str, filename: Option<&str>) -> Self {
        let ct = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        let ext = filename
            .and_then(|f| f.rsplit_once('.'))
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();

        if !GENERIC_TYPES.contains(&ct.as_str()) {
            if let Some(kind) = Self::from_content_type(&ct) {
                return kind;
            }
        }
        Self::from_extension(&ext).unwrap_or(Self::Unsupported)
    }

    fn from_content_type(ct: &str) -> Option<Self> {
        if let Some(sub) = ct.strip_prefix("image/") {
            return IMAGE_SUBTYPES.contains(&sub).then_some(Self::Image);
        }
        if PDF_TYPES.contains(&ct) {
            return Some(Self::VectorDocument);
        }
        if OFFICE_TYPES.contains(&ct) || OFFICE_TYPE_PREFIXES.iter().any(|p| ct.starts_with(p)) {
            return Some(Self::OfficeDocument);
        }
        None
    }

    fn from_extension(ext: &str) -> Option<Self> {
        if IMAGE_EXTENSIONS.contains(&ext) {
            Some(Self::Image)
        } else if ext == "pdf" {
            Some(Self::VectorDocument)
        } else if OFFICE_EXTENSIONS.contains(&ext) {
            Some(Self::OfficeDocument)
        } else {
            None
        }
    }
}

/// Extension to append to a generated filename for a content type.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/vnd.oasis.opendocument.text" => "odt",
        "application/rtf" | "text/rtf" => "rtf",
        "message/rfc822" => "eml",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/calendar" => "ics",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttachmentKind::*;

    #[test]
    fn test_images() {
        assert_eq!(AttachmentKind::classify("image/png", Some("a.png")), Image);
        assert_eq!(AttachmentKind::classify("IMAGE/JPEG; name=x", None), Image);
        assert_eq!(AttachmentKind::classify("image/svg+xml", Some("logo.svg")), Unsupported);
    }

    #[test]
    fn test_pdf() {
        assert_eq!(AttachmentKind::classify("application/pdf", None), VectorDocument);
        assert_eq!(
            AttachmentKind::classify("application/octet-stream", Some("contract.PDF")),
            VectorDocument
        );
    }

    #[test]
    fn test_office_families() {
        for (ct, name) in [
            ("application/msword", "a.doc"),
            (
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "report.docx",
            ),
            (
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "sheet.xlsx",
            ),
            ("application/vnd.ms-powerpoint", "deck.ppt"),
            ("application/vnd.oasis.opendocument.text", "letter.odt"),
            ("application/octet-stream", "deck.pptx"),
        ] {
            assert_eq!(AttachmentKind::classify(ct, Some(name)), OfficeDocument, "{ct}");
        }
    }

    #[test]
    fn test_declared_type_beats_extension() {
        assert_eq!(AttachmentKind::classify("application/pdf", Some("scan.png")), VectorDocument);
    }

    #[test]
    fn test_unknown_specific_type_falls_back_to_extension() {
        assert_eq!(AttachmentKind::classify("application/x-foo", Some("a.docx")), OfficeDocument);
    }

    #[test]
    fn test_everything_else_unsupported() {
        assert_eq!(AttachmentKind::classify("application/zip", Some("a.zip")), Unsupported);
        assert_eq!(AttachmentKind::classify("", None), Unsupported);
        assert_eq!(AttachmentKind::classify("text/calendar", Some("invite.ics")), Unsupported);
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }
}
