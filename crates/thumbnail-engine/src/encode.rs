//! Encoding processed images to bytes

use crate::error::{Error, Result};
use crate::options::ThumbnailOptions;
use crate::utils::is_transparent;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, GenericImageView, ImageFormat};
use jpeg_encoder::{ColorType, Encoder as JpegEncoder, SamplingFactor};
use std::io::Cursor;
use tracing::{trace, warn};

/// Output format for a thumbnail file extension. Unknown extensions encode as JPEG.
pub fn format_for_extension(extension: &str) -> ImageFormat {
    ImageFormat::from_extension(extension).unwrap_or(ImageFormat::Jpeg)
}

/// Encode `image` for a file with the given `extension`.
///
/// Lossy formats without alpha support get the alpha channel dropped first.
/// The optimized encode is tried first and the plain encode is used if it
/// fails. JPEG output at least `progressive` pixels on its longest side is
/// written progressive, and the `subsampling` option picks the chroma
/// sampling (0 = 4:4:4, 1 = 4:2:2, 2 = 4:2:0).
pub fn save_image(
    image: &DynamicImage,
    extension: &str,
    options: &ThumbnailOptions,
    progressive: Option<u32>,
) -> Result<Vec<u8>> {
    let format = format_for_extension(extension);
    let quality = options.quality().clamp(1, 100) as u8;

    let flattened;
    let image = if format == ImageFormat::Jpeg && is_transparent(image) {
        flattened = if image.color().has_color() {
            DynamicImage::ImageRgb8(image.to_rgb8())
        } else {
            DynamicImage::ImageLuma8(image.to_luma8())
        };
        &flattened
    } else {
        image
    };

    let (width, height) = image.dimensions();
    let settings = JpegSettings {
        quality,
        progressive: progressive.map_or(false, |threshold| width.max(height) >= threshold),
        sampling: sampling_factor(options.subsampling()),
    };
    if format == ImageFormat::Jpeg {
        trace!(width, height, progressive = settings.progressive, "encoding jpeg");
    }

    match encode(image, format, &settings, true) {
        Ok(bytes) => Ok(bytes),
        Err(err) => {
            warn!(error = %err, ?format, "optimized encode failed, retrying without optimization");
            encode(image, format, &settings, false)
        }
    }
}

struct JpegSettings {
    quality: u8,
    progressive: bool,
    sampling: SamplingFactor,
}

fn sampling_factor(subsampling: i64) -> SamplingFactor {
    match subsampling {
        0 => SamplingFactor::F_1_1,
        1 => SamplingFactor::F_2_1,
        _ => SamplingFactor::F_2_2,
    }
}

fn encode(image: &DynamicImage, format: ImageFormat, settings: &JpegSettings, optimize: bool) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    match format {
        ImageFormat::Jpeg => encode_jpeg(image, &mut buffer, settings, optimize)?,
        ImageFormat::Png => {
            let compression = if optimize {
                CompressionType::Best
            } else {
                CompressionType::Default
            };
            let encoder = PngEncoder::new_with_quality(&mut buffer, compression, PngFilterType::Adaptive);
            image.write_with_encoder(encoder)?;
        }
        other => image.write_to(&mut Cursor::new(&mut buffer), other)?,
    }
    Ok(buffer)
}

fn encode_jpeg(image: &DynamicImage, buffer: &mut Vec<u8>, settings: &JpegSettings, optimize: bool) -> Result<()> {
    let (width, height) = image.dimensions();
    let too_large = || Error::InvalidOption {
        key: "size".to_string(),
        value: format!("{}x{} exceeds the jpeg limit", width, height),
    };
    let width = u16::try_from(width).map_err(|_| too_large())?;
    let height = u16::try_from(height).map_err(|_| too_large())?;

    let mut encoder = JpegEncoder::new(buffer, settings.quality);
    encoder.set_progressive(settings.progressive);
    encoder.set_sampling_factor(settings.sampling);
    encoder.set_optimized_huffman_tables(optimize);
    if image.color().has_color() {
        encoder.encode(image.to_rgb8().as_raw(), width, height, ColorType::Rgb)?;
    } else {
        encoder.encode(image.to_luma8().as_raw(), width, height, ColorType::Luma)?;
    }
    Ok(())
}
