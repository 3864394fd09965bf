//! Source generators
//!
//! A source generator turns the raw bytes of an original file into a decoded
//! image. Generators are tried in order and the first one that returns an image
//! wins.

use crate::error::{Error, Result};
use crate::exif::{correct_orientation, extract_preview};
use crate::options::ThumbnailOptions;
use crate::registry::Registry;
use image::DynamicImage;
use std::sync::Arc;
use tracing::debug;

/// Signature shared by every source generator. `None` source means the
/// original could not be opened.
pub type SourceGeneratorFn =
    dyn Fn(Option<&[u8]>, &ThumbnailOptions) -> Result<Option<DynamicImage>> + Send + Sync;

pub type SourceGeneratorRegistry = Registry<SourceGeneratorFn>;

pub const DEFAULT_SOURCE_GENERATORS: [&str; 1] = ["image"];

pub fn builtin_source_generators() -> SourceGeneratorRegistry {
    let mut registry = SourceGeneratorRegistry::new("source generator");
    registry.register("image", Arc::new(decode_image));
    registry.register("exiftool_preview", Arc::new(exiftool_preview));
    registry
}

/// Decode `source` with each generator until one produces an image.
///
/// With `fail_silently` every generator error is swallowed. Otherwise a lone
/// generator's error is returned as-is and the errors of several generators
/// are returned together as [`Error::NoSourceGenerator`] when none succeeded.
/// `Ok(None)` means no generator recognised the data.
pub fn generate_source_image(
    source: Option<&[u8]>,
    options: &ThumbnailOptions,
    generators: &[(String, Arc<SourceGeneratorFn>)],
    fail_silently: bool,
) -> Result<Option<DynamicImage>> {
    let mut errors = Vec::new();
    for (name, generator) in generators {
        match generator(source, options) {
            Ok(Some(image)) => {
                debug!(generator = %name, "source decoded");
                return Ok(Some(image));
            }
            Ok(None) => {}
            Err(err) => {
                debug!(generator = %name, error = %err, "source generator failed");
                if fail_silently {
                    continue;
                }
                if generators.len() == 1 {
                    return Err(err);
                }
                errors.push(err);
            }
        }
    }
    if !errors.is_empty() {
        return Err(Error::NoSourceGenerator(errors));
    }
    Ok(None)
}

fn wants_exif_orientation(options: &ThumbnailOptions) -> bool {
    options
        .get("exif_orientation")
        .map_or(true, |value| value.is_truthy())
}

/// Decode with the `image` crate. Pixel data is fully loaded on return.
pub fn decode_image(source: Option<&[u8]>, options: &ThumbnailOptions) -> Result<Option<DynamicImage>> {
    let Some(bytes) = source else {
        return Ok(None);
    };
    let image = image::load_from_memory(bytes)?;
    if wants_exif_orientation(options) {
        return Ok(Some(correct_orientation(image, bytes)));
    }
    Ok(Some(image))
}

/// Decode the JPEG preview embedded in a RAW file.
pub fn exiftool_preview(
    source: Option<&[u8]>,
    options: &ThumbnailOptions,
) -> Result<Option<DynamicImage>> {
    let Some(bytes) = source else {
        return Ok(None);
    };
    let Some(preview) = extract_preview(bytes)? else {
        return Ok(None);
    };
    decode_image(Some(preview.as_slice()), options)
}
