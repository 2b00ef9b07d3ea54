//! `eml2pdf`: turn an email message into one A4 PDF.
//!
//! The message body is laid out as pages, each attachment is converted and
//! fitted onto A4, and everything is merged in message order. The merged
//! document can also be rasterized to a multi-page TIFF.

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod parser;
pub mod pdf;
pub mod pipeline;
pub mod process;
pub mod raster;
pub mod render;
