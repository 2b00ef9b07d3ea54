//! Place a raster image, correctly oriented, centered on one A4 page.

use std::io::Cursor;

use image::{DynamicImage, ImageDecoder, ImageReader, ImageResult, RgbImage};
use lopdf::dictionary;

use crate::convert::Converter;
use crate::error::{Error, Result};
use crate::model::job::ConversionJob;
use crate::model::message::Part;
use crate::model::page::{ContentKind, PageSet, PageSource};
use crate::pdf::builder::{draw_xobject, PdfBuilder};
use crate::pdf::geometry::{fit, PageSize, Placement};

/// Converter for raster image attachments.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageConverter;

impl Converter for ImageConverter {
    fn convert(&self, part: &Part, job: &mut ConversionJob) -> Result<PageSet> {
        job.start_attempt();
        let name = part.display_name();
        let result = decode_oriented(&part.payload)
            .map_err(|e| Error::conversion(&name, e))
            .and_then(|img| image_page(&flatten(img)).map_err(|e| Error::conversion(&name, e)));
        match result {
            Ok(doc) => {
                job.succeed();
                Ok(PageSet::new(
                    PageSource::Attachment {
                        index: part.index,
                        filename: name,
                    },
                    ContentKind::Raster,
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

/// Decode an image and apply its EXIF orientation.
pub fn decode_oriented(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Convert to RGB, compositing any transparency onto white.
pub fn flatten(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }
    let rgba = img.into_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (src, dst) in rgba.pixels().zip(rgb.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let a = a as u32;
        let blend = |c: u8| -> u8 { ((c as u32 * a + 255 * (255 - a)) / 255) as u8 };
        dst.0 = [blend(r), blend(g), blend(b)];
    }
    rgb
}

/// Where an image of `width` × `height` pixels lands on an A4 page.
///
/// Pixels are taken as points, then scaled by `min(W/w, H/h)`.
pub fn placement_for(width: u32, height: u32) -> Placement {
    fit(width as f32, height as f32, PageSize::A4)
}

/// Build a one-page A4 document showing `img` fitted and centered.
pub fn image_page(img: &RgbImage) -> Result<lopdf::Document> {
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::Pdf("image has no pixels".into()));
    }
    let placement = placement_for(img.width(), img.height());
    let mut builder = PdfBuilder::a4();
    let image_id = builder.add_image(img)?;
    builder.add_page(
        draw_xobject(
            "Im0",
            [
                placement.width,
                0.0,
                0.0,
                placement.height,
                placement.x,
                placement.y,
            ],
        ),
        dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
    )?;
    builder.finish()
}
