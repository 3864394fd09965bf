use crate::error::{Error, Result};
use image::Rgba;

const NAMED: &[(&str, [u8; 4])] = &[
    ("white", [255, 255, 255, 255]),
    ("black", [0, 0, 0, 255]),
    ("red", [255, 0, 0, 255]),
    ("green", [0, 128, 0, 255]),
    ("lime", [0, 255, 0, 255]),
    ("blue", [0, 0, 255, 255]),
    ("yellow", [255, 255, 0, 255]),
    ("gray", [128, 128, 128, 255]),
    ("grey", [128, 128, 128, 255]),
    ("silver", [192, 192, 192, 255]),
    ("transparent", [0, 0, 0, 0]),
];

/// Parse `#rgb`, `#rrggbb`, `#rrggbbaa` or a handful of CSS colour names.
pub fn parse_color(text: &str) -> Result<Rgba<u8>> {
    let text = text.trim();
    let lower = text.to_ascii_lowercase();
    if let Some((_, rgba)) = NAMED.iter().find(|(name, _)| *name == lower) {
        return Ok(Rgba(*rgba));
    }

    let hex = lower
        .strip_prefix('#')
        .ok_or_else(|| Error::InvalidColor(text.to_string()))?;
    let digits: Vec<u8> = hex
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<_>>()
        .ok_or_else(|| Error::InvalidColor(text.to_string()))?;

    let pair = |i: usize| digits[i] * 16 + digits[i + 1];
    match digits.len() {
        3 => Ok(Rgba([digits[0] * 17, digits[1] * 17, digits[2] * 17, 255])),
        6 => Ok(Rgba([pair(0), pair(2), pair(4), 255])),
        8 => Ok(Rgba([pair(0), pair(2), pair(4), pair(6)])),
        _ => Err(Error::InvalidColor(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_color("#fff").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_color("#FF8000").unwrap(), Rgba([255, 128, 0, 255]));
        assert_eq!(parse_color("#00000080").unwrap(), Rgba([0, 0, 0, 128]));
    }

    #[test]
    fn test_parse_named() {
        assert_eq!(parse_color("White").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_color("transparent").unwrap().0[3], 0);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_color("fff").is_err());
        assert!(parse_color("#ggg").is_err());
        assert!(parse_color("#12345").is_err());
    }
}
