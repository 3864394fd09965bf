//! EXIF helpers: orientation correction and embedded preview extraction

use crate::error::{Error, Result};
use image::DynamicImage;
use rexif::{ExifTag, TagValue};
use std::io::Write;
use std::process::Command;
use tracing::debug;

/// Read the EXIF `Orientation` tag (1-8) from an encoded image, if present.
pub fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let (exif, _warnings) = rexif::parse_buffer_quiet(bytes);
    let exif = exif.ok()?;
    exif.entries
        .iter()
        .find(|entry| entry.tag == ExifTag::Orientation)
        .and_then(|entry| match &entry.value {
            TagValue::U16(values) => values.first().copied(),
            TagValue::U32(values) => values.first().map(|v| (*v).min(u16::MAX as u32) as u16),
            TagValue::U8(values) => values.first().copied().map(u16::from),
            _ => None,
        })
}

/// Rotate and/or mirror `image` so that it displays upright.
pub fn apply_orientation(image: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Apply the orientation stored in `bytes` (if any) to the decoded `image`.
pub fn correct_orientation(image: DynamicImage, bytes: &[u8]) -> DynamicImage {
    match read_orientation(bytes) {
        Some(orientation) if orientation > 1 => {
            debug!(orientation, "applying exif orientation");
            apply_orientation(image, orientation)
        }
        _ => image,
    }
}

/// Extract the embedded JPEG preview from a RAW container using exiftool.
///
/// exiftool wants a path, so the bytes are spooled to a temporary file first.
/// Returns `Ok(None)` when the file carries no preview.
pub fn extract_preview(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut spool = tempfile::NamedTempFile::new()?;
    spool.write_all(bytes)?;
    spool.flush()?;

    let output = Command::new("exiftool")
        .arg("-b")
        .arg("-PreviewImage")
        .arg(spool.path())
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Exiftool(stderr.trim().to_string()));
    }
    if output.stdout.is_empty() {
        return Ok(None);
    }
    Ok(Some(output.stdout))
}
