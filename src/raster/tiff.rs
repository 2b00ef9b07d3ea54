//! TIFF inspection: count the frames of a multi-page file.

use std::io::Cursor;

use ::tiff::decoder::Decoder;

use crate::error::{Error, Result};

/// Upper bound on frames followed.
const MAX_FRAMES: usize = 100_000;

/// Count the images in a TIFF file by following its directory chain.
///
/// Fails on a bad header, a directory the decoder cannot read, or a chain
/// that loops.
pub fn count_frames(data: &[u8]) -> Result<usize> {
    let mut decoder = Decoder::new(Cursor::new(data)).map_err(malformed)?;
    let mut frames = 1;
    while decoder.more_images() {
        if frames >= MAX_FRAMES {
            return Err(malformed("too many frames"));
        }
        decoder.next_image().map_err(malformed)?;
        frames += 1;
    }
    Ok(frames)
}

fn malformed(reason: impl std::fmt::Display) -> Error {
    Error::resource("tiff", format!("malformed output: {reason}"))
}

/// A TIFF with `frames` tiny grayscale pages.
#[cfg(test)]
pub(crate) fn sample(frames: usize) -> Vec<u8> {
    use ::tiff::encoder::{colortype::Gray8, TiffEncoder};

    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut out).unwrap();
        for i in 0..frames {
            encoder
                .write_image::<Gray8>(2, 2, &[i as u8, 0, 0, 255])
                .unwrap();
        }
    }
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_frames() {
        assert_eq!(count_frames(&sample(1)).unwrap(), 1);
        assert_eq!(count_frames(&sample(4)).unwrap(), 4);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(count_frames(b"%PDF-1.4"), Err(Error::Resource { .. })));
        assert!(count_frames(b"II\x2a\x00").is_err());
    }

    #[test]
    fn test_detects_loop_and_truncation() {
        let data = sample(2);
        assert!(count_frames(&data[..data.len() / 2]).is_err());

        // Point the last directory back at the first one.
        let mut data = sample(2);
        let first = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let second = u32::from_le_bytes(
            next_pointer(&data, first).try_into().unwrap(),
        ) as usize;
        let at = next_pointer_offset(&data, second);
        data[at..at + 4].copy_from_slice(&(first as u32).to_le_bytes());
        assert!(count_frames(&data).is_err());
    }

    fn next_pointer_offset(data: &[u8], ifd: usize) -> usize {
        let entries = u16::from_le_bytes([data[ifd], data[ifd + 1]]) as usize;
        ifd + 2 + entries * 12
    }

    fn next_pointer(data: &[u8], ifd: usize) -> &[u8] {
        let at = next_pointer_offset(data, ifd);
        &data[at..at + 4]
    }
}
