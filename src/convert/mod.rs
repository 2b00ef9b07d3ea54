//! Attachment converters: classification and one converter per attachment kind.

pub mod classify;
pub mod gate;
pub mod image;
pub mod office;
pub mod placeholder;
pub mod vector;

use crate::error::Result;
use crate::model::job::ConversionJob;
use crate::model::message::Part;
use crate::model::page::PageSet;

/// Produces a normalized page set from one attachment.
///
/// Implementations drive `job` through its state transitions and return
/// [`crate::error::Error::Conversion`] when the attachment cannot be converted.
pub trait Converter: Send + Sync {
    fn convert(&self, part: &Part, job: &mut ConversionJob) -> Result<PageSet>;
}
