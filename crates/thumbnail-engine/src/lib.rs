//! Image side of the thumbnailer
//!
//! This crate knows nothing about storage or caching. It turns source bytes
//! into a decoded image, runs it through the processor chain and encodes the
//! result.
//!
//! # Features
//!
//! - Canonical [`ThumbnailOptions`] with deterministic naming tokens
//! - Pluggable processors and source generators selected by name
//! - Aspect-preserving scale, centred, focal, edge and entropy ("smart") crops
//! - EXIF orientation correction and embedded RAW preview extraction
//! - Alpha-aware encoding with an optimize-then-plain fallback

pub mod color;
pub mod encode;
pub mod error;
pub mod exif;
pub mod options;
pub mod processors;
pub mod registry;
pub mod source;
pub mod utils;

pub use encode::{format_for_extension, save_image};
pub use error::{Error, Result};
pub use options::{CropMode, OptionMap, OptionValue, ThumbnailOptions};
pub use processors::{
    builtin_processors, process_image, ProcessorFn, ProcessorRegistry, DEFAULT_PROCESSORS,
};
pub use registry::Registry;
pub use source::{
    builtin_source_generators, generate_source_image, SourceGeneratorFn, SourceGeneratorRegistry,
    DEFAULT_SOURCE_GENERATORS,
};
pub use utils::is_transparent;

/// Re-exported so downstream crates agree on the image types.
pub use image;
