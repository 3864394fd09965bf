//! Thumbnail filename strategies
//!
//! A namer builds the filename component of a thumbnail from the source
//! filename, the chosen extension and the prepared option tokens. Directory
//! handling, the prefix and the high-resolution infix are applied afterwards by
//! the thumbnailer.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thumbnail_engine::{Registry, ThumbnailOptions};

/// Everything a namer may look at.
#[derive(Debug, Clone, Copy)]
pub struct NamerContext<'a> {
    pub source_filename: &'a str,
    pub source_extension: &'a str,
    pub thumbnail_extension: &'a str,
    pub options: &'a ThumbnailOptions,
    pub prepared_options: &'a [String],
    /// The directory templates already carry the option tokens.
    pub opts_in_directory: bool,
}

pub type NamerFn = dyn Fn(&NamerContext<'_>) -> String + Send + Sync;

pub type NamerRegistry = Registry<NamerFn>;

pub fn builtin_namers() -> NamerRegistry {
    let mut registry = NamerRegistry::new("namer");
    registry.register("default", Arc::new(default));
    registry.register("hashed", Arc::new(hashed));
    registry.register("alias", Arc::new(alias));
    registry.register("source_hashed", Arc::new(source_hashed));
    registry
}

/// `source.jpg.100x100_q85_crop.jpg`, or just the source filename (plus a new
/// extension if it changed) when the options are already in the directory.
pub fn default(ctx: &NamerContext<'_>) -> String {
    let mut parts = vec![ctx.source_filename.to_string()];
    if ctx.opts_in_directory {
        if ctx.thumbnail_extension != ctx.source_extension {
            parts.push(ctx.thumbnail_extension.to_string());
        }
    } else {
        parts.push(ctx.prepared_options.join("_"));
        parts.push(ctx.thumbnail_extension.to_string());
    }
    parts.join(".")
}

/// Short URL-safe digest of the source filename and options.
///
/// Digests are SHA-256, so these names differ from SHA-1 based names other
/// tools may have written for the same thumbnails. Switching algorithms
/// renames every hashed thumbnail.
pub fn hashed(ctx: &NamerContext<'_>) -> String {
    let mut input = vec![ctx.source_filename.to_string()];
    input.extend(ctx.prepared_options.iter().cloned());
    format!("{}.{}", short_digest(&input.join(":"), 9), ctx.thumbnail_extension)
}

/// `source.jpg.ALIAS.jpg`, using the `ALIAS` option.
pub fn alias(ctx: &NamerContext<'_>) -> String {
    let alias = ctx
        .options
        .get("ALIAS")
        .map(|value| value.to_string())
        .unwrap_or_default();
    format!("{}.{}.{}", ctx.source_filename, alias, ctx.thumbnail_extension)
}

/// `{source digest}_{size token}_{options digest}.{ext}`
pub fn source_hashed(ctx: &NamerContext<'_>) -> String {
    let source = short_digest(ctx.source_filename, 9);
    let size = ctx.prepared_options.first().map(String::as_str).unwrap_or_default();
    let rest = ctx.prepared_options.get(1..).unwrap_or_default().join(":");
    format!("{}_{}_{}.{}", source, size, short_digest(&rest, 6), ctx.thumbnail_extension)
}

/// First `bytes` bytes of the SHA-256 of `input`, URL-safe base64.
fn short_digest(input: &str, bytes: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    URL_SAFE.encode(&digest[..bytes])
}
