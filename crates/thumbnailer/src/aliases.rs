//! Named option presets, scoped to a dotted target path.
//!
//! Targets nest: `""` is global, then `app`, `app.Model` and
//! `app.Model.field`. Lookups prefer the most specific level.

use crate::config::AliasConfig;
use std::collections::BTreeMap;
use thumbnail_engine::{OptionMap, OptionValue};

#[derive(Debug, Clone, Default)]
pub struct Aliases {
    aliases: BTreeMap<String, BTreeMap<String, OptionMap>>,
}

impl Aliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AliasConfig) -> Self {
        let mut aliases = Self::new();
        for (target, entries) in config {
            let level = aliases.aliases.entry(target.clone()).or_default();
            for (name, options) in entries {
                level.insert(name.clone(), options.clone());
            }
        }
        aliases
    }

    /// Add or replace an alias at `target` (global when `None`).
    pub fn set(&mut self, alias: &str, options: OptionMap, target: Option<&str>) {
        self.aliases
            .entry(target.unwrap_or_default().to_string())
            .or_default()
            .insert(alias.to_string(), options);
    }

    /// Options for `alias`, searching from the most specific level of `target`
    /// up to the global level. The returned options carry an `ALIAS` key.
    pub fn get(&self, alias: &str, target: Option<&str>) -> Option<OptionMap> {
        let mut options = targets(target, true)
            .iter()
            .rev()
            .find_map(|level| self.aliases.get(level).and_then(|a| a.get(alias)))?
            .clone();
        options.insert("ALIAS".to_string(), OptionValue::Str(alias.to_string()));
        Some(options)
    }

    /// Every alias visible from `target`, more specific levels overriding.
    pub fn all(&self, target: Option<&str>, include_global: bool) -> BTreeMap<String, OptionMap> {
        let mut merged = BTreeMap::new();
        for level in targets(target, include_global) {
            if let Some(entries) = self.aliases.get(&level) {
                for (name, options) in entries {
                    merged.insert(name.clone(), options.clone());
                }
            }
        }
        merged
    }
}

/// `["", "app", "app.Model", "app.Model.field"]` for `app.Model.field`.
fn targets(target: Option<&str>, include_global: bool) -> Vec<String> {
    let mut levels = Vec::new();
    if include_global {
        levels.push(String::new());
    }
    let Some(target) = target.filter(|t| !t.is_empty()) else {
        return levels;
    };
    let bits: Vec<&str> = target.split('.').collect();
    for i in 1..=bits.len() {
        levels.push(bits[..i].join("."));
    }
    levels
}
