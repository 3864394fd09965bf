//! Thumbnail naming, staleness detection and generation
//!
//! A [`ThumbnailService`] holds the configuration, the selected plugins and
//! the metadata cache. Each source file gets a [`Thumbnailer`], which names
//! thumbnails deterministically from their options, decides whether an
//! existing one is still fresh, and renders and saves it when it is not.
//!
//! # Features
//!
//! - Pluggable namers (`default`, `hashed`, `alias`, `source_hashed`)
//! - Freshness by modification time, from the filesystem or the metadata cache
//! - Per-thumbnail generation locks within a process
//! - Aliases scoped to `app.Model.field` targets
//! - Optional high-resolution (`@2x`) siblings
//! - Created/missed/saved notifications, external optimizers and cleanup

pub mod aliases;
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod files;
pub mod locks;
pub mod namers;
pub mod optimize;
pub mod pregenerate;
pub mod service;
pub mod signals;
pub mod storage;
pub mod thumbnailer;

pub use aliases::Aliases;
pub use cache::MetadataCache;
pub use cleanup::{CleanupOptions, CleanupStats, ThumbnailCollectionCleaner};
pub use config::{PreserveExtensions, ThumbnailConfig};
pub use error::{Error, Result};
pub use files::ThumbnailFile;
pub use namers::{builtin_namers, NamerContext, NamerFn, NamerRegistry};
pub use optimize::{connect_optimizer, optimize_thumbnail};
pub use pregenerate::{connect_alias_pregeneration, generate_all_aliases};
pub use service::{ServiceBuilder, ThumbnailService};
pub use signals::{Signals, ThumbnailMissed};
pub use storage::{storage_hash, FileSystemStorage, MemoryStorage, Storage};
pub use thumbnailer::Thumbnailer;

pub use thumbnail_engine::{OptionMap, OptionValue, ThumbnailOptions};
