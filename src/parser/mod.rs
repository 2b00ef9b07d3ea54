//! Message parsing: MIME structure, header decoding, and `.eml` files.

pub mod eml;
pub mod header;
pub mod mime;
