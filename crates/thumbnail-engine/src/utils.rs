//! Pixel helpers shared by the processors.

use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;

/// `target` option: `"x,y"` percentages, either side optional.
pub(crate) static TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)?,(\d+)?$").expect("static regex"));

/// Edge crop: `"[-]x,[-]y"` percentages, either side optional.
pub(crate) static EDGE_CROP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(-?)(\d+))?,(?:(-?)(\d+))?$").expect("static regex"));

/// True if the image carries an alpha channel.
pub fn is_transparent(image: &DynamicImage) -> bool {
    image.color().has_alpha()
}

/// Shannon entropy of the image's histogram, in bits.
///
/// The histogram has 256 bins per channel, concatenated across channels.
pub fn image_entropy(image: &DynamicImage) -> f64 {
    let (histogram, total) = match image {
        DynamicImage::ImageLuma8(buf) => histogram(buf.as_raw(), 1),
        DynamicImage::ImageLumaA8(buf) => histogram(buf.as_raw(), 2),
        DynamicImage::ImageRgb8(buf) => histogram(buf.as_raw(), 3),
        DynamicImage::ImageRgba8(buf) => histogram(buf.as_raw(), 4),
        other => {
            let rgba = other.to_rgba8();
            histogram(rgba.as_raw(), 4)
        }
    };
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn histogram(raw: &[u8], channels: usize) -> (Vec<u64>, u64) {
    let mut bins = vec![0u64; 256 * channels];
    for pixel in raw.chunks_exact(channels) {
        for (channel, &value) in pixel.iter().enumerate() {
            bins[channel * 256 + value as usize] += 1;
        }
    }
    let total = bins.iter().sum();
    (bins, total)
}

/// Bounding box `(left, top, right, bottom)` of pixels that are not pure white,
/// or `None` when the whole image is white.
pub fn non_white_bbox(image: &DynamicImage) -> Option<(u32, u32, u32, u32)> {
    let luma = image.to_luma8();
    let (width, height) = luma.dimensions();
    let mut bbox: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in luma.enumerate_pixels() {
        if pixel.0[0] == 255 {
            continue;
        }
        bbox = Some(match bbox {
            None => (x, y, x + 1, y + 1),
            Some((l, t, r, b)) => (l.min(x), t.min(y), r.max(x + 1), b.max(y + 1)),
        });
    }
    bbox.map(|(l, t, r, b)| (l, t, r.min(width), b.min(height)))
}

/// Round `value` half away from zero and clamp to at least one pixel.
pub(crate) fn round_dim(value: f64) -> u32 {
    (value.round() as i64).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbaImage};

    #[test]
    fn test_entropy_of_flat_image_is_zero() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([128])));
        assert_eq!(image_entropy(&image), 0.0);
    }

    #[test]
    fn test_entropy_of_two_tone_image() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(10, 10, |x, _| {
            if x < 5 { Luma([0]) } else { Luma([255]) }
        }));
        assert!((image_entropy(&image) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_transparency_detection() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(2, 2));
        assert!(is_transparent(&rgba));
        assert!(!is_transparent(&DynamicImage::new_rgb8(2, 2)));
    }

    #[test]
    fn test_non_white_bbox() {
        let mut image = GrayImage::from_pixel(20, 10, Luma([255]));
        image.put_pixel(3, 2, Luma([0]));
        image.put_pixel(12, 7, Luma([10]));
        let image = DynamicImage::ImageLuma8(image);
        assert_eq!(non_white_bbox(&image), Some((3, 2, 13, 8)));

        let white = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([255])));
        assert_eq!(non_white_bbox(&white), None);
    }
}
