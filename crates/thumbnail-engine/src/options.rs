//! Canonical thumbnail options
//!
//! Options are an ordered key/value mapping. Equality is structural and does not
//! depend on insertion order. [`ThumbnailOptions::prepared_options`] renders the
//! deterministic token list that names a thumbnail.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Subsampling level that the encoder uses when none is given.
pub const DEFAULT_SUBSAMPLING: i64 = 2;

/// Quality used when neither the call site nor the configuration provides one.
pub const DEFAULT_QUALITY: i64 = 85;

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<OptionValue>),
}

impl OptionValue {
    /// Falsy values never show up in a prepared options list.
    pub fn is_truthy(&self) -> bool {
        match self {
            OptionValue::Bool(b) => *b,
            OptionValue::Int(i) => *i != 0,
            OptionValue::Float(f) => *f != 0.0,
            OptionValue::Str(s) => !s.is_empty(),
            OptionValue::List(items) => !items.is_empty(),
        }
    }

    /// Integer value. Floats only convert when they are whole numbers.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(i) => Some(*i),
            OptionValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            OptionValue::Float(_) => None,
            OptionValue::Str(s) => s.trim().parse().ok(),
            OptionValue::Bool(b) => Some(*b as i64),
            OptionValue::List(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            OptionValue::Float(f) => Some(*f),
            OptionValue::Str(s) => s.trim().parse().ok(),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(true) => write!(f, "True"),
            OptionValue::Bool(false) => write!(f, "False"),
            OptionValue::Int(i) => write!(f, "{}", i),
            // Whole floats keep their ".0" so 100.0 and 100 name differently.
            OptionValue::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            OptionValue::Float(x) => write!(f, "{}", x),
            OptionValue::Str(s) => write!(f, "{}", s),
            OptionValue::List(items) => {
                let joined: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                write!(f, "{}", joined.join(","))
            }
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<u32> for OptionValue {
    fn from(value: u32) -> Self {
        OptionValue::Int(value as i64)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl From<(i64, i64)> for OptionValue {
    fn from((w, h): (i64, i64)) -> Self {
        OptionValue::List(vec![OptionValue::Int(w), OptionValue::Int(h)])
    }
}

/// Raw option mapping, as found in configuration files and alias definitions.
pub type OptionMap = BTreeMap<String, OptionValue>;

/// Cropping policy requested through the `crop` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CropMode {
    /// Crop symmetrically around the centre (or the focal point).
    Center,
    /// Only scale to cover the target, never crop.
    Scale,
    /// Shave low-entropy edges.
    Smart,
    /// Offset the crop window towards an edge; `(from_far_edge, percent)` per axis.
    Edge {
        x: Option<(bool, u32)>,
        y: Option<(bool, u32)>,
    },
}

/// Canonical parameter set for one thumbnail transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailOptions {
    values: OptionMap,
}

impl ThumbnailOptions {
    /// Build options from a raw mapping, applying `defaults` (if any) without
    /// overriding supplied keys, then defaulting `quality` and `subsampling`.
    pub fn new(values: OptionMap, defaults: Option<&OptionMap>, quality: i64) -> Self {
        let mut values = values;
        if let Some(defaults) = defaults {
            for (key, value) in defaults {
                values.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        values
            .entry("quality".to_string())
            .or_insert(OptionValue::Int(quality));
        values
            .entry("subsampling".to_string())
            .or_insert(OptionValue::Int(DEFAULT_SUBSAMPLING));
        Self { values }
    }

    /// Options with only the built-in defaults applied.
    pub fn from_map(values: OptionMap) -> Self {
        Self::new(values, None, DEFAULT_QUALITY)
    }

    /// Convenience constructor used heavily by tests and the CLI.
    pub fn with_size(width: i64, height: i64) -> Self {
        let mut values = OptionMap::new();
        values.insert("size".to_string(), (width, height).into());
        Self::from_map(values)
    }

    pub fn set(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<OptionValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn values(&self) -> &OptionMap {
        &self.values
    }

    /// True when the option is present and truthy.
    pub fn flag(&self, key: &str) -> bool {
        self.values.get(key).map_or(false, OptionValue::is_truthy)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(OptionValue::as_int)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(OptionValue::as_float)
    }

    /// The requested `(width, height)`. Either axis may be zero.
    pub fn size(&self) -> Result<(i64, i64)> {
        let value = self.values.get("size").ok_or(Error::MissingSize)?;
        let invalid = || Error::InvalidOption {
            key: "size".to_string(),
            value: value.to_string(),
        };
        match value {
            OptionValue::List(items) if items.len() == 2 => {
                let w = items[0].as_int().ok_or_else(invalid)?;
                let h = items[1].as_int().ok_or_else(invalid)?;
                Ok((w, h))
            }
            OptionValue::Str(s) => {
                let (w, h) = s
                    .split_once(|c| c == 'x' || c == ',')
                    .ok_or_else(invalid)?;
                let w = w.trim().parse().map_err(|_| invalid())?;
                let h = h.trim().parse().map_err(|_| invalid())?;
                Ok((w, h))
            }
            _ => Err(invalid()),
        }
    }

    pub fn set_size(&mut self, width: i64, height: i64) {
        self.values.insert("size".to_string(), (width, height).into());
    }

    pub fn quality(&self) -> i64 {
        self.int("quality").unwrap_or(DEFAULT_QUALITY)
    }

    pub fn subsampling(&self) -> i64 {
        self.int("subsampling").unwrap_or(DEFAULT_SUBSAMPLING)
    }

    /// Parse the `crop` option. `None` means no cropping was requested.
    pub fn crop(&self) -> Option<CropMode> {
        let value = self.values.get("crop")?;
        if !value.is_truthy() {
            return None;
        }
        let Some(text) = value.as_str() else {
            return Some(CropMode::Center);
        };
        match text {
            "smart" => Some(CropMode::Smart),
            "scale" => Some(CropMode::Scale),
            _ => Some(parse_edge_crop(text).unwrap_or(CropMode::Center)),
        }
    }

    /// Focal point percentages from the `target` option, defaulting each axis to 50.
    pub fn target(&self) -> Option<(u32, u32)> {
        let value = self.values.get("target")?;
        match value {
            OptionValue::Str(s) => {
                let caps = crate::utils::TARGET_RE.captures(s)?;
                let axis = |i: usize| {
                    caps.get(i)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(50)
                };
                Some((axis(1), axis(2)))
            }
            OptionValue::List(items) if items.len() == 2 => {
                let axis = |v: &OptionValue| v.as_int().map_or(50, |i| i.clamp(0, 100) as u32);
                Some((axis(&items[0]), axis(&items[1])))
            }
            _ => None,
        }
    }

    /// The deterministic token list used for naming thumbnails.
    ///
    /// `"{w}x{h}"`, then `q{quality}` (with `ss{n}` appended for a non-default
    /// subsampling), then every other truthy lowercase option sorted by key.
    pub fn prepared_options(&self) -> Vec<String> {
        let size = match self.values.get("size") {
            Some(OptionValue::List(items)) if items.len() == 2 => {
                format!("{}x{}", items[0], items[1])
            }
            Some(other) => other.to_string().replace(',', "x"),
            None => String::new(),
        };
        let mut prepared = vec![size];

        let subsampling = self
            .values
            .get("subsampling")
            .map_or_else(|| DEFAULT_SUBSAMPLING.to_string(), |v| v.to_string());
        let subsampling_text = if subsampling == DEFAULT_SUBSAMPLING.to_string() {
            String::new()
        } else {
            format!("ss{}", subsampling)
        };
        let quality = self
            .values
            .get("quality")
            .map_or_else(|| DEFAULT_QUALITY.to_string(), |v| v.to_string());
        prepared.push(format!("q{}{}", quality, subsampling_text));

        // BTreeMap iteration is already sorted by key.
        for (key, value) in &self.values {
            if is_metadata_key(key) {
                continue;
            }
            if !value.is_truthy() || matches!(key.as_str(), "size" | "quality" | "subsampling") {
                continue;
            }
            if *value == OptionValue::Bool(true) {
                prepared.push(key.clone());
                continue;
            }
            prepared.push(format!("{}-{}", key, value));
        }
        prepared
    }
}

/// Uppercase keys are call-site metadata and never change the filename.
pub fn is_metadata_key(key: &str) -> bool {
    key == key.to_uppercase()
}

fn parse_edge_crop(text: &str) -> Option<CropMode> {
    let caps = crate::utils::EDGE_CROP_RE.captures(text)?;
    let axis = |sign: usize, amount: usize| {
        caps.get(amount).and_then(|m| m.as_str().parse::<u32>().ok()).map(|pct| {
            let far = caps.get(sign).map_or(false, |m| m.as_str() == "-");
            (far, pct)
        })
    };
    let x = axis(1, 2);
    let y = axis(3, 4);
    if x.is_none() && y.is_none() {
        return None;
    }
    Some(CropMode::Edge { x, y })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, OptionValue)]) -> ThumbnailOptions {
        let mut map = OptionMap::new();
        for (key, value) in pairs {
            map.insert(key.to_string(), value.clone());
        }
        ThumbnailOptions::from_map(map)
    }

    #[test]
    fn test_defaults_applied() {
        let options = ThumbnailOptions::with_size(100, 100);
        assert_eq!(options.quality(), 85);
        assert_eq!(options.subsampling(), 2);
        assert_eq!(options.prepared_options(), vec!["100x100", "q85"]);
    }

    #[test]
    fn test_configured_defaults_do_not_override() {
        let mut defaults = OptionMap::new();
        defaults.insert("quality".to_string(), OptionValue::Int(60));
        defaults.insert("sharpen".to_string(), OptionValue::Bool(true));
        let mut values = OptionMap::new();
        values.insert("size".to_string(), (10, 10).into());
        values.insert("quality".to_string(), OptionValue::Int(95));

        let options = ThumbnailOptions::new(values, Some(&defaults), 85);
        assert_eq!(options.quality(), 95);
        assert!(options.flag("sharpen"));
    }

    #[test]
    fn test_prepared_options_ordering() {
        let options = opts(&[
            ("size", (100, 50).into()),
            ("upscale", true.into()),
            ("crop", "smart".into()),
            ("subsampling", OptionValue::Int(1)),
            ("bw", false.into()),
            ("target", OptionValue::List(vec![10i64.into(), 20i64.into()])),
        ]);
        assert_eq!(
            options.prepared_options(),
            vec!["100x50", "q85ss1", "crop-smart", "target-10,20", "upscale"]
        );
    }

    #[test]
    fn test_prepared_options_is_idempotent() {
        let options = opts(&[("size", (80, 0).into()), ("crop", true.into())]);
        assert_eq!(options.prepared_options(), options.prepared_options());
        assert_eq!(options.prepared_options(), vec!["80x0", "q85", "crop"]);
    }

    #[test]
    fn test_metadata_keys_excluded_from_naming() {
        let plain = opts(&[("size", (100, 100).into()), ("crop", true.into())]);
        let tagged = opts(&[
            ("size", (100, 100).into()),
            ("crop", true.into()),
            ("ALIAS", "small".into()),
            ("HIGH_RESOLUTION", true.into()),
        ]);
        assert_eq!(plain.prepared_options(), tagged.prepared_options());
        assert_ne!(plain, tagged);
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let a = ThumbnailOptions::with_size(10, 10).set("crop", true).set("bw", true);
        let b = ThumbnailOptions::with_size(10, 10).set("bw", true).set("crop", true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_size_parsing() {
        assert_eq!(ThumbnailOptions::with_size(3, 4).size().unwrap(), (3, 4));
        let options = opts(&[("size", "120x80".into())]);
        assert_eq!(options.size().unwrap(), (120, 80));
        assert_eq!(options.prepared_options()[0], "120x80");
        assert!(opts(&[("size", "huge".into())]).size().is_err());
        assert!(matches!(opts(&[]).size(), Err(Error::MissingSize)));
    }

    #[test]
    fn test_crop_parsing() {
        let crop = |v: OptionValue| opts(&[("size", (1, 1).into()), ("crop", v)]).crop();
        assert_eq!(crop(true.into()), Some(CropMode::Center));
        assert_eq!(crop(false.into()), None);
        assert_eq!(crop("smart".into()), Some(CropMode::Smart));
        assert_eq!(crop("scale".into()), Some(CropMode::Scale));
        assert_eq!(
            crop("-10,0".into()),
            Some(CropMode::Edge { x: Some((true, 10)), y: Some((false, 0)) })
        );
        assert_eq!(crop(",5".into()), Some(CropMode::Edge { x: None, y: Some((false, 5)) }));
        assert_eq!(crop("whatever".into()), Some(CropMode::Center));
    }

    #[test]
    fn test_target_parsing() {
        let target = |v: OptionValue| opts(&[("size", (1, 1).into()), ("target", v)]).target();
        assert_eq!(target("10,90".into()), Some((10, 90)));
        assert_eq!(target(",20".into()), Some((50, 20)));
        assert_eq!(target(OptionValue::List(vec![0i64.into(), 100i64.into()])), Some((0, 100)));
    }

    #[test]
    fn test_deserialize_from_json() {
        let map: OptionMap =
            serde_json::from_str(r#"{"size": [100, 0], "crop": "smart", "upscale": true}"#).unwrap();
        let options = ThumbnailOptions::from_map(map);
        assert_eq!(options.size().unwrap(), (100, 0));
        assert_eq!(options.crop(), Some(CropMode::Smart));
    }

    #[test]
    fn test_float_values_from_json() {
        let map: OptionMap =
            serde_json::from_str(r#"{"size": [100.0, 0], "zoom": 12.5, "quality": 90}"#).unwrap();
        assert_eq!(map["zoom"], OptionValue::Float(12.5));
        assert_eq!(map["quality"], OptionValue::Int(90));

        let options = ThumbnailOptions::from_map(map);
        assert_eq!(options.size().unwrap(), (100, 0));
        assert_eq!(options.float("zoom"), Some(12.5));
        assert_eq!(options.int("zoom"), None);
        assert_eq!(options.prepared_options(), vec!["100.0x0", "q90", "zoom-12.5"]);
    }

    #[test]
    fn test_anchored_crop_and_target() {
        let options = opts(&[
            ("size", (1, 1).into()),
            ("crop", "abc10,20".into()),
            ("target", "abc10,20".into()),
        ]);
        assert_eq!(options.crop(), Some(CropMode::Center));
        assert_eq!(options.target(), None);
    }
}
