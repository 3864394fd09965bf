//! Image processors
//!
//! Each processor takes the working image and the full option set and returns
//! the transformed image. The default chain is:
//!
//! 1. [`colorspace`] - normalize the pixel mode, optionally flattening alpha
//! 2. [`autocrop`] - trim a white border when `autocrop` is set
//! 3. [`scale_and_crop`] - the main geometry step
//! 4. [`filters`] - optional `detail` / `sharpen`
//! 5. [`background`] - pad to the exact requested size

use crate::color::parse_color;
use crate::error::Result;
use crate::options::{CropMode, OptionValue, ThumbnailOptions};
use crate::registry::Registry;
use crate::utils::{image_entropy, is_transparent, non_white_bbox, round_dim};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, Pixel, Rgb, RgbImage, Rgba};
use std::sync::Arc;
use tracing::trace;

/// Signature shared by every processor.
pub type ProcessorFn = dyn Fn(DynamicImage, &ThumbnailOptions) -> Result<DynamicImage> + Send + Sync;

pub type ProcessorRegistry = Registry<ProcessorFn>;

pub const DEFAULT_PROCESSORS: [&str; 5] =
    ["colorspace", "autocrop", "scale_and_crop", "filters", "background"];

const DETAIL_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 10.0, -1.0, 0.0, -1.0, 0.0];
const SHARPEN_KERNEL: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Registry holding the built-in processors under their conventional names.
pub fn builtin_processors() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new("processor");
    registry.register("colorspace", Arc::new(colorspace));
    registry.register("autocrop", Arc::new(autocrop));
    registry.register("scale_and_crop", Arc::new(scale_and_crop));
    registry.register("filters", Arc::new(filters));
    registry.register("background", Arc::new(background));
    registry
}

/// Run `image` through each processor in turn.
pub fn process_image(
    image: DynamicImage,
    options: &ThumbnailOptions,
    processors: &[(String, Arc<ProcessorFn>)],
) -> Result<DynamicImage> {
    processors.iter().try_fold(image, |image, (name, processor)| {
        trace!(processor = %name, width = image.width(), height = image.height(), "running processor");
        processor(image, options)
    })
}

/// Normalize the pixel mode.
///
/// Higher bit depths are quantized to 8 bits first. Grayscale sources, or any
/// source when `bw` is set, end up single-channel. An alpha channel is kept
/// unless `replace_alpha` names a colour to flatten onto.
pub fn colorspace(image: DynamicImage, options: &ThumbnailOptions) -> Result<DynamicImage> {
    let image = quantize(image);
    let single_channel = !image.color().has_color() || options.flag("bw");

    if is_transparent(&image) {
        if let Some(color) = options.get("replace_alpha").and_then(OptionValue::as_str) {
            let flat = DynamicImage::ImageRgb8(flatten(&image, parse_color(color)?));
            return Ok(if single_channel {
                DynamicImage::ImageLuma8(flat.to_luma8())
            } else {
                flat
            });
        }
        return Ok(match image {
            DynamicImage::ImageLumaA8(_) if single_channel => image,
            DynamicImage::ImageRgba8(_) if !single_channel => image,
            other if single_channel => DynamicImage::ImageLumaA8(other.to_luma_alpha8()),
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        });
    }

    Ok(match image {
        DynamicImage::ImageLuma8(_) => image,
        DynamicImage::ImageRgb8(_) if !single_channel => image,
        other if single_channel => DynamicImage::ImageLuma8(other.to_luma8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    })
}

/// Drop 16-bit and float sources down to 8 bits per channel.
fn quantize(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(image.to_luma8()),
        DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
            DynamicImage::ImageRgb8(image.to_rgb8())
        }
        DynamicImage::ImageRgba16(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba8(image.to_rgba8())
        }
        other => other,
    }
}

/// Alpha-composite `image` over an opaque `background`.
pub(crate) fn flatten(image: &DynamicImage, background: Rgba<u8>) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let pixel = rgba.get_pixel(x, y).0;
        let alpha = pixel[3] as u32;
        let blend = |c: usize| {
            ((pixel[c] as u32 * alpha + background.0[c] as u32 * (255 - alpha) + 127) / 255) as u8
        };
        Rgb([blend(0), blend(1), blend(2)])
    })
}

/// Crop away a surrounding white border when `autocrop` is set.
pub fn autocrop(image: DynamicImage, options: &ThumbnailOptions) -> Result<DynamicImage> {
    if !options.flag("autocrop") {
        return Ok(image);
    }
    let bbox = if is_transparent(&image) {
        non_white_bbox(&DynamicImage::ImageRgb8(flatten(&image, WHITE)))
    } else {
        non_white_bbox(&image)
    };
    Ok(match bbox {
        Some((left, top, right, bottom)) => image.crop_imm(left, top, right - left, bottom - top),
        None => image,
    })
}

/// Resize and crop to the requested `size`.
///
/// Without `crop` the image is scaled to fit inside the target. With `crop` it is
/// scaled to cover the target and the excess is removed according to the crop
/// mode (`True` centres on `target`, `"smart"` removes low-entropy edges, an
/// edge string like `"-10,0"` anchors to an edge, `"scale"` only resizes).
/// Images are never enlarged unless `upscale` is set.
pub fn scale_and_crop(image: DynamicImage, options: &ThumbnailOptions) -> Result<DynamicImage> {
    let (source_x, source_y) = image.dimensions();
    let (source_x, source_y) = (source_x as f64, source_y as f64);
    let (target_x, target_y) = options.size()?;
    let (mut target_x, mut target_y) = (target_x.max(0) as f64, target_y.max(0) as f64);
    let mut crop = options.crop();
    let upscale = options.flag("upscale");
    let zoom = options.float("zoom").unwrap_or(0.0);

    let mut scale = if crop.is_some() || target_x == 0.0 || target_y == 0.0 {
        (target_x / source_x).max(target_y / source_y)
    } else {
        (target_x / source_x).min(target_y / source_y)
    };

    // One-dimensional targets take the other axis from the aspect ratio.
    if target_x == 0.0 {
        target_x = (source_x * scale).round();
    } else if target_y == 0.0 {
        target_y = (source_y * scale).round();
    }

    if zoom != 0.0 {
        if crop.is_none() {
            target_x = (source_x * scale).round();
            target_y = (source_y * scale).round();
            crop = Some(CropMode::Center);
        }
        scale *= (100.0 + zoom) / 100.0;
    }

    let image = if scale < 1.0 || (scale > 1.0 && upscale) {
        let (width, height) = (round_dim(source_x * scale), round_dim(source_y * scale));
        trace!(width, height, scale, "resizing");
        image.resize_exact(width, height, FilterType::Lanczos3)
    } else {
        image
    };

    let crop = match crop {
        None | Some(CropMode::Scale) => return Ok(image),
        Some(crop) => crop,
    };

    let (source_x, source_y) = image.dimensions();
    let (target_x, target_y) = (target_x as u32, target_y as u32);
    let diff_x = source_x - source_x.min(target_x);
    let diff_y = source_y - source_y.min(target_y);
    if diff_x == 0 && diff_y == 0 {
        return Ok(image);
    }

    let (left, top, right, bottom) = match crop {
        CropMode::Smart => smart_crop_box(&image, diff_x, diff_y),
        CropMode::Edge { x, y } => {
            let (mut left, mut top, mut right, mut bottom) =
                focal_box(&image, options, target_x, target_y);
            if let Some((far, percent)) = x {
                (left, right) = edge_offset(source_x, target_x, diff_x, far, percent);
            }
            if let Some((far, percent)) = y {
                (top, bottom) = edge_offset(source_y, target_y, diff_y, far, percent);
            }
            (left, top, right, bottom)
        }
        CropMode::Center | CropMode::Scale => focal_box(&image, options, target_x, target_y),
    };
    Ok(image.crop_imm(left, top, right - left, bottom - top))
}

/// Crop window of the target size centred on the `target` focal point
/// (default: the image centre), clamped to the image bounds.
fn focal_box(
    image: &DynamicImage,
    options: &ThumbnailOptions,
    target_x: u32,
    target_y: u32,
) -> (u32, u32, u32, u32) {
    let (source_x, source_y) = image.dimensions();
    let (focal_x, focal_y) = options.target().unwrap_or((50, 50));
    let start = |source: u32, target: u32, focal: u32| -> u32 {
        let point = (source as u64 * focal as u64 / 100) as i64;
        let start = (source as i64 - target as i64).min(point - (target / 2) as i64);
        start.max(0) as u32
    };
    let left = start(source_x, target_x, focal_x);
    let top = start(source_y, target_y, focal_y);
    (
        left,
        top,
        source_x.min(left.saturating_add(target_x)),
        source_y.min(top.saturating_add(target_y)),
    )
}

/// Start and end of the window along one axis for an edge crop.
fn edge_offset(source: u32, target: u32, diff: u32, far: bool, percent: u32) -> (u32, u32) {
    let offset = ((target as u64 * percent as u64 / 100) as u32).min(diff);
    if far {
        (diff - offset, source - offset)
    } else {
        (offset, source - (diff - offset))
    }
}

/// Shave slices from whichever edge carries less entropy until each axis fits.
fn smart_crop_box(image: &DynamicImage, mut diff_x: u32, mut diff_y: u32) -> (u32, u32, u32, u32) {
    let (source_x, source_y) = image.dimensions();
    let (mut left, mut top, mut right, mut bottom) = (0, 0, source_x, source_y);

    while diff_x > 0 {
        let slice = diff_x.min((diff_x / 5).max(10));
        let start = image.crop_imm(left, 0, slice, source_y);
        let end = image.crop_imm(right - slice, 0, slice, source_y);
        let (add, remove) = compare_entropy(&start, &end, slice, diff_x);
        left += add;
        right -= remove;
        diff_x -= add + remove;
    }
    while diff_y > 0 {
        let slice = diff_y.min((diff_y / 5).max(10));
        let start = image.crop_imm(0, top, source_x, slice);
        let end = image.crop_imm(0, bottom - slice, source_x, slice);
        let (add, remove) = compare_entropy(&start, &end, slice, diff_y);
        top += add;
        bottom -= remove;
        diff_y -= add + remove;
    }
    (left, top, right, bottom)
}

/// How many pixels to take off the `(start, end)` edges in one step.
///
/// Entropies within 1% of each other count as a tie and the slice is split
/// across both sides. Two zero entropies are a tie.
fn compare_entropy(start: &DynamicImage, end: &DynamicImage, slice: u32, difference: u32) -> (u32, u32) {
    let start_entropy = image_entropy(start);
    let end_entropy = image_entropy(end);
    let tie = if end_entropy == 0.0 {
        start_entropy == 0.0
    } else {
        (start_entropy - end_entropy).abs() < 0.01 * end_entropy
    };
    if tie {
        if difference >= slice * 2 {
            return (slice, slice);
        }
        let half = slice / 2;
        return (half, slice - half);
    }
    if start_entropy > end_entropy {
        (0, slice)
    } else {
        (slice, 0)
    }
}

/// Apply the `detail` and `sharpen` convolution filters when requested.
pub fn filters(image: DynamicImage, options: &ThumbnailOptions) -> Result<DynamicImage> {
    let mut image = image;
    if options.flag("detail") {
        image = image.filter3x3(&DETAIL_KERNEL);
    }
    if options.flag("sharpen") {
        image = image.filter3x3(&SHARPEN_KERNEL);
    }
    Ok(image)
}

/// Centre the image on a canvas of exactly `size` filled with `background`.
pub fn background(image: DynamicImage, options: &ThumbnailOptions) -> Result<DynamicImage> {
    let Some(color) = options.get("background").and_then(OptionValue::as_str) else {
        return Ok(image);
    };
    let (width, height) = options.size()?;
    if width <= 0 || height <= 0 {
        return Ok(image);
    }
    let (width, height) = (width as u32, height as u32);
    let (x, y) = image.dimensions();
    if x >= width && y >= height {
        return Ok(image);
    }

    let fill = parse_color(color)?;
    let mut flat_options = options.clone();
    flat_options.insert("replace_alpha", color);
    let image = colorspace(image, &flat_options)?;

    let fill = Rgb([fill[0], fill[1], fill[2]]);
    let offset_x = (width as i64 - x as i64).div_euclid(2);
    let offset_y = (height as i64 - y as i64).div_euclid(2);
    Ok(match image {
        DynamicImage::ImageLuma8(buffer) => {
            let mut canvas = GrayImage::from_pixel(width, height, fill.to_luma());
            imageops::replace(&mut canvas, &buffer, offset_x, offset_y);
            DynamicImage::ImageLuma8(canvas)
        }
        other => {
            let mut canvas = RgbImage::from_pixel(width, height, fill);
            imageops::replace(&mut canvas, &other.to_rgb8(), offset_x, offset_y);
            DynamicImage::ImageRgb8(canvas)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbaImage};

    fn rgb(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn scaled(image: DynamicImage, options: ThumbnailOptions) -> (u32, u32) {
        scale_and_crop(image, &options).unwrap().dimensions()
    }

    #[test]
    fn test_scale_contain() {
        assert_eq!(scaled(rgb(800, 600), ThumbnailOptions::with_size(100, 100)), (100, 75));
    }

    #[test]
    fn test_scale_crop() {
        let options = ThumbnailOptions::with_size(100, 100).set("crop", true);
        assert_eq!(scaled(rgb(800, 600), options), (100, 100));
    }

    #[test]
    fn test_no_upscale_by_default() {
        assert_eq!(scaled(rgb(800, 600), ThumbnailOptions::with_size(1000, 1000)), (800, 600));
        let options = ThumbnailOptions::with_size(1000, 1000).set("upscale", true);
        assert_eq!(scaled(rgb(800, 600), options), (1000, 750));
    }

    #[test]
    fn test_one_axis_target() {
        assert_eq!(scaled(rgb(800, 600), ThumbnailOptions::with_size(100, 0)), (100, 75));
        assert_eq!(scaled(rgb(800, 600), ThumbnailOptions::with_size(0, 150)), (200, 150));
    }

    #[test]
    fn test_crop_smaller_source_is_not_enlarged() {
        let options = ThumbnailOptions::with_size(100, 100).set("crop", true);
        assert_eq!(scaled(rgb(50, 200), options), (50, 100));
    }

    #[test]
    fn test_crop_scale_only_resizes() {
        let options = ThumbnailOptions::with_size(100, 100).set("crop", "scale");
        assert_eq!(scaled(rgb(800, 600), options), (133, 100));
    }

    #[test]
    fn test_zoom_forces_crop() {
        let options = ThumbnailOptions::with_size(100, 100).set("zoom", 40i64);
        assert_eq!(scaled(rgb(800, 600), options), (100, 75));
        let options = ThumbnailOptions::with_size(100, 100).set("zoom", 12.5);
        assert_eq!(scaled(rgb(800, 600), options), (100, 75));
    }

    #[test]
    fn test_edge_crop_corners() {
        // Columns carry their own x coordinate, so the first output column
        // reveals where the crop window started.
        let source = || DynamicImage::ImageRgb8(RgbImage::from_fn(200, 100, |x, _| Rgb([x as u8, 0, 0])));
        let first_column = |crop: &str| {
            let options = ThumbnailOptions::with_size(100, 100).set("crop", crop);
            scale_and_crop(source(), &options).unwrap().to_rgb8().get_pixel(0, 0).0[0]
        };
        assert_eq!(first_column("0,0"), 0);
        assert_eq!(first_column("-0,0"), 100);
        assert_eq!(first_column("10,0"), 10);
        assert_eq!(first_column("-10,0"), 90);
        assert_eq!(first_column("100,0"), 100);
    }

    #[test]
    fn test_center_and_focal_crop() {
        let source = || DynamicImage::ImageRgb8(RgbImage::from_fn(200, 100, |x, _| Rgb([x as u8, 0, 0])));
        let first_column = |options: ThumbnailOptions| {
            scale_and_crop(source(), &options).unwrap().to_rgb8().get_pixel(0, 0).0[0]
        };
        let centred = ThumbnailOptions::with_size(100, 100).set("crop", true);
        assert_eq!(first_column(centred), 50);
        let focal = ThumbnailOptions::with_size(100, 100).set("crop", true).set("target", "0,50");
        assert_eq!(first_column(focal), 0);
        let far = ThumbnailOptions::with_size(100, 100).set("crop", true).set("target", "100,50");
        assert_eq!(first_column(far), 100);
    }

    #[test]
    fn test_smart_crop_symmetric_image_is_centred() {
        let source = DynamicImage::ImageLuma8(GrayImage::from_fn(200, 100, |x, _| {
            Luma([x.min(199 - x) as u8])
        }));
        let options = ThumbnailOptions::with_size(100, 100).set("crop", "smart");
        let cropped = scale_and_crop(source, &options).unwrap();
        assert_eq!(cropped.dimensions(), (100, 100));
        let luma = cropped.to_luma8();
        assert_eq!(luma.get_pixel(0, 0).0[0], 50);
        assert_eq!(luma.get_pixel(99, 0).0[0], 50);
    }

    #[test]
    fn test_smart_crop_keeps_busy_side() {
        // Left half is noisy, right half flat.
        let source = DynamicImage::ImageLuma8(GrayImage::from_fn(200, 100, |x, y| {
            if x < 100 { Luma([((x * 7 + y * 13) % 251) as u8]) } else { Luma([200]) }
        }));
        let options = ThumbnailOptions::with_size(100, 100).set("crop", "smart");
        let cropped = scale_and_crop(source, &options).unwrap().to_luma8();
        assert_eq!(cropped.get_pixel(0, 0).0[0], 0);
        assert_eq!(cropped.get_pixel(99, 50).0[0], ((99 * 7 + 50 * 13) % 251) as u8);
    }

    #[test]
    fn test_compare_entropy_zero_guard() {
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([0])));
        assert_eq!(compare_entropy(&flat, &flat, 10, 30), (10, 10));
        assert_eq!(compare_entropy(&flat, &flat, 10, 15), (5, 5));
        let busy = DynamicImage::ImageLuma8(GrayImage::from_fn(10, 10, |x, _| Luma([x as u8 * 20])));
        assert_eq!(compare_entropy(&busy, &flat, 10, 30), (0, 10));
        assert_eq!(compare_entropy(&flat, &busy, 10, 30), (10, 0));
    }

    #[test]
    fn test_colorspace_modes() {
        let options = ThumbnailOptions::with_size(10, 10);
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        assert!(matches!(colorspace(rgba.clone(), &options).unwrap(), DynamicImage::ImageRgba8(_)));

        let bw = options.clone().set("bw", true);
        assert!(matches!(colorspace(rgb(4, 4), &bw).unwrap(), DynamicImage::ImageLuma8(_)));
        assert!(matches!(colorspace(rgba.clone(), &bw).unwrap(), DynamicImage::ImageLumaA8(_)));

        let replaced = options.clone().set("replace_alpha", "#fff");
        let flat = colorspace(rgba, &replaced).unwrap();
        assert!(matches!(flat, DynamicImage::ImageRgb8(_)));
        assert_eq!(flat.to_rgb8().get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_colorspace_quantizes_sixteen_bit() {
        let deep = DynamicImage::ImageLuma16(image::ImageBuffer::from_pixel(3, 3, Luma([u16::MAX])));
        let options = ThumbnailOptions::with_size(10, 10);
        let result = colorspace(deep, &options).unwrap();
        assert!(matches!(result, DynamicImage::ImageLuma8(_)));
        assert_eq!(result.to_luma8().get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn test_autocrop() {
        let mut canvas = RgbImage::from_pixel(50, 40, Rgb([255, 255, 255]));
        for x in 10..20 {
            for y in 5..15 {
                canvas.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        let image = DynamicImage::ImageRgb8(canvas);
        let untouched = autocrop(image.clone(), &ThumbnailOptions::with_size(10, 10)).unwrap();
        assert_eq!(untouched.dimensions(), (50, 40));
        let options = ThumbnailOptions::with_size(10, 10).set("autocrop", true);
        assert_eq!(autocrop(image, &options).unwrap().dimensions(), (10, 10));
    }

    #[test]
    fn test_background_pads_to_size() {
        let options = ThumbnailOptions::with_size(100, 100).set("background", "#ff0000");
        let padded = background(rgb(100, 50), &options).unwrap();
        assert_eq!(padded.dimensions(), (100, 100));
        let pixels = padded.to_rgb8();
        assert_eq!(pixels.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(pixels.get_pixel(0, 25).0, [0, 0, 128]);

        let big = background(rgb(120, 100), &options).unwrap();
        assert_eq!(big.dimensions(), (120, 100));
    }

    #[test]
    fn test_background_offset_rounds_down() {
        // 20 - 31 = -11 floors to an offset of -6, so column 6 lands at x = 0.
        let options = ThumbnailOptions::with_size(20, 20).set("background", "#000000");
        let padded = background(rgb(31, 10), &options).unwrap().to_rgb8();
        assert_eq!(padded.dimensions(), (20, 20));
        assert_eq!(padded.get_pixel(0, 5).0, [6, 0, 128]);
        assert_eq!(padded.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_filters_keep_dimensions() {
        let options = ThumbnailOptions::with_size(10, 10).set("detail", true).set("sharpen", true);
        assert_eq!(filters(rgb(20, 10), &options).unwrap().dimensions(), (20, 10));
    }

    #[test]
    fn test_default_pipeline() {
        let registry = builtin_processors();
        let steps = registry.select(&DEFAULT_PROCESSORS).unwrap();
        let options = ThumbnailOptions::with_size(100, 100).set("crop", true).set("bw", true);
        let result = process_image(rgb(800, 600), &options, &steps).unwrap();
        assert_eq!(result.dimensions(), (100, 100));
        assert!(matches!(result, DynamicImage::ImageLuma8(_)));
    }
}
