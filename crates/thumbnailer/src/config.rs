//! Immutable service configuration

use crate::error::{Error, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thumbnail_engine::{OptionMap, DEFAULT_PROCESSORS, DEFAULT_SOURCE_GENERATORS};

/// Either keep every source extension (`true`), none (`false`), or only the
/// listed lowercase extensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreserveExtensions {
    All(bool),
    Only(Vec<String>),
}

impl PreserveExtensions {
    pub fn preserves(&self, extension: &str) -> bool {
        match self {
            PreserveExtensions::All(all) => *all,
            PreserveExtensions::Only(list) => list.iter().any(|e| e == extension),
        }
    }
}

impl Default for PreserveExtensions {
    fn default() -> Self {
        PreserveExtensions::All(false)
    }
}

/// Alias definitions: target (`""`, `app`, `app.Model`, `app.Model.field`)
/// to alias name to options.
pub type AliasConfig = BTreeMap<String, BTreeMap<String, OptionMap>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Directory prepended to every thumbnail path. `%(opts)s` expands to the option tokens.
    pub basedir: String,
    /// Directory inserted between the source directory and the filename.
    pub subdir: String,
    /// Prefix for the thumbnail filename.
    pub prefix: String,
    pub extension: String,
    pub transparency_extension: String,
    pub preserve_extensions: PreserveExtensions,
    pub quality: i64,
    /// Longest-side pixel count from which JPEGs are flagged progressive. `None` disables.
    pub progressive: Option<u32>,
    pub namer: String,
    pub high_resolution: bool,
    pub highres_infix: String,
    pub cache_dimensions: bool,
    pub processors: Vec<String>,
    pub source_generators: Vec<String>,
    pub default_options: Option<OptionMap>,
    pub check_cache_miss: bool,
    /// Whether thumbnailers generate missing thumbnails unless told otherwise.
    pub generate: bool,
    /// Propagate source generator errors instead of treating them as "not an image".
    pub debug: bool,
    pub aliases: AliasConfig,
    /// External optimizer per image type, e.g. `{"png": "optipng {filename}"}`.
    pub optimize_commands: BTreeMap<String, String>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            basedir: String::new(),
            subdir: String::new(),
            prefix: String::new(),
            extension: "jpg".to_string(),
            transparency_extension: "png".to_string(),
            preserve_extensions: PreserveExtensions::default(),
            quality: 85,
            progressive: Some(100),
            namer: "default".to_string(),
            high_resolution: false,
            highres_infix: "@2x".to_string(),
            cache_dimensions: false,
            processors: DEFAULT_PROCESSORS.iter().map(|s| s.to_string()).collect(),
            source_generators: DEFAULT_SOURCE_GENERATORS.iter().map(|s| s.to_string()).collect(),
            default_options: None,
            check_cache_miss: false,
            generate: true,
            debug: false,
            aliases: AliasConfig::new(),
            optimize_commands: BTreeMap::new(),
        }
    }
}

impl ThumbnailConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))
            .map_err(|e| Error::Config(format!("{:#}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// True when either directory template embeds the option tokens.
    pub fn opts_in_directory(&self) -> bool {
        self.basedir.contains("%(opts)s") || self.subdir.contains("%(opts)s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use thumbnail_engine::OptionValue;

    #[test]
    fn test_default_config() {
        let config = ThumbnailConfig::default();
        assert_eq!(config.extension, "jpg");
        assert_eq!(config.transparency_extension, "png");
        assert_eq!(config.quality, 85);
        assert_eq!(config.highres_infix, "@2x");
        assert_eq!(config.processors.len(), 5);
        assert_eq!(config.source_generators, vec!["image"]);
        assert!(config.generate);
        assert!(!config.opts_in_directory());
    }

    #[test]
    fn test_from_json_file_partial() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("thumbnails.json");
        fs::write(
            &path,
            r#"{
                "subdir": "thumbs/%(opts)s",
                "preserve_extensions": ["png", "gif"],
                "progressive": null,
                "aliases": {"": {"small": {"size": [50, 50], "crop": true}}}
            }"#,
        )?;

        let config = ThumbnailConfig::from_json_file(&path)?;
        assert!(config.opts_in_directory());
        assert!(config.preserve_extensions.preserves("png"));
        assert!(!config.preserve_extensions.preserves("jpg"));
        assert_eq!(config.progressive, None);
        assert_eq!(config.quality, 85);
        assert_eq!(config.aliases[""]["small"]["crop"], OptionValue::Bool(true));
        Ok(())
    }

    #[test]
    fn test_invalid_json_is_config_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json")?;
        assert!(matches!(ThumbnailConfig::from_json_file(&path), Err(Error::Config(_))));
        assert!(matches!(
            ThumbnailConfig::from_json_file(&dir.path().join("missing.json")),
            Err(Error::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn test_preserve_all() {
        assert!(PreserveExtensions::All(true).preserves("tiff"));
        assert!(!PreserveExtensions::All(false).preserves("tiff"));
    }
}
