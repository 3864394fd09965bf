//! Removal of thumbnails whose source no longer exists
//!
//! Walks the Source records, checks each source file, and deletes the
//! records and thumbnail files of the missing ones. Optionally deletes
//! orphans: files under the thumbnail base directory that no live source
//! claims.

use crate::error::Result;
use crate::service::ThumbnailService;
use crate::storage::{join_name, storage_hash, Storage};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Source ids deleted per metadata batch.
const SOURCE_BATCH: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    pub dry_run: bool,
    /// Only check sources modified within this many days. Zero checks all.
    pub last_n_days: u32,
    /// Only check sources whose name starts with this prefix.
    pub path: Option<String>,
    pub delete_orphans: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub sources: usize,
    pub source_refs_deleted: usize,
    pub thumbnails_deleted: usize,
    pub orphans_deleted: usize,
    pub execution_time: Duration,
}

impl fmt::Display for CleanupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-<48}", Utc::now().format("%Y-%m-%d %H:%M "))?;
        writeln!(f, "{:<40} {:>7}", "Sources checked:", self.sources)?;
        writeln!(f, "{:<40} {:>7}", "Source references deleted from DB:", self.source_refs_deleted)?;
        writeln!(f, "{:<40} {:>7}", "Thumbnails deleted from disk:", self.thumbnails_deleted)?;
        writeln!(f, "{:<40} {:>7}", "Orphans deleted from disk:", self.orphans_deleted)?;
        write!(f, "(Completed in {} seconds)", self.execution_time.as_secs())
    }
}

pub struct ThumbnailCollectionCleaner {
    service: Arc<ThumbnailService>,
    source_storage: Arc<dyn Storage>,
    thumbnail_storage: Arc<dyn Storage>,
}

impl ThumbnailCollectionCleaner {
    pub fn new(
        service: Arc<ThumbnailService>,
        source_storage: Arc<dyn Storage>,
        thumbnail_storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            service,
            source_storage,
            thumbnail_storage,
        }
    }

    pub fn clean_up(&self, options: &CleanupOptions) -> Result<CleanupStats> {
        let started = Instant::now();
        let mut stats = CleanupStats::default();
        let cache = self.service.metadata_cache();
        let source_hash = storage_hash(self.source_storage.as_ref());
        let thumbnail_hash = storage_hash(self.thumbnail_storage.as_ref());

        let mut delete_orphans = options.delete_orphans;
        if delete_orphans && (options.last_n_days > 0 || options.path.is_some()) {
            warn!("conflicting options: orphan deletion is not supported with last_n_days or path");
            delete_orphans = false;
        }
        let orphan_root = self.orphan_root();
        if delete_orphans && orphan_root.is_empty() {
            warn!("orphan deletion needs a thumbnail basedir, skipping");
            delete_orphans = false;
        }
        if options.dry_run {
            info!("dry run, nothing will be deleted");
        }

        let mut orphans = HashSet::new();
        if delete_orphans {
            self.collect_files(&orphan_root, &mut orphans)?;
            debug!(files = orphans.len(), root = %orphan_root, "thumbnail files found");
        }

        let since = (options.last_n_days > 0)
            .then(|| Utc::now() - ChronoDuration::days(i64::from(options.last_n_days)));
        let sources = cache.sources(since, options.path.as_deref())?;

        let mut to_delete = Vec::new();
        for source in sources.iter().filter(|s| s.storage_hash == source_hash) {
            stats.sources += 1;
            let thumbnails = cache.thumbnails_for_source(source, None)?;

            if !self.source_storage.exists(&source.name) {
                info!(source = %source.name, "source not present");
                stats.source_refs_deleted += 1;
                to_delete.push(source.id);

                for thumbnail in thumbnails {
                    stats.thumbnails_deleted += 1;
                    let name = &thumbnail.artifact.name;
                    if thumbnail.artifact.storage_hash != thumbnail_hash
                        || !self.thumbnail_storage.exists(name)
                    {
                        continue;
                    }
                    info!(name = %name, "deleting thumbnail");
                    if !options.dry_run {
                        if let Err(err) = self.thumbnail_storage.delete(name) {
                            warn!(name = %name, error = %err, "failed to delete thumbnail");
                        }
                    }
                }
            } else if delete_orphans {
                for thumbnail in thumbnails {
                    // Not generated yet is fine.
                    orphans.remove(&thumbnail.artifact.name);
                }
            }

            if to_delete.len() >= SOURCE_BATCH && !options.dry_run {
                cache.delete_sources(&to_delete)?;
                to_delete.clear();
            }
        }
        if !options.dry_run && !to_delete.is_empty() {
            cache.delete_sources(&to_delete)?;
        }

        let mut orphans: Vec<_> = orphans.into_iter().collect();
        orphans.sort();
        for orphan in orphans {
            stats.orphans_deleted += 1;
            info!(name = %orphan, "deleting orphan");
            if !options.dry_run {
                if let Err(err) = self.thumbnail_storage.delete(&orphan) {
                    warn!(name = %orphan, error = %err, "failed to delete orphan");
                }
            }
        }

        stats.execution_time = started.elapsed();
        Ok(stats)
    }

    /// The fixed part of the configured basedir, before any `%(opts)s`.
    fn orphan_root(&self) -> String {
        let basedir = &self.service.config().basedir;
        let fixed = basedir.split("%(").next().unwrap_or_default();
        fixed.trim_end_matches('/').to_string()
    }

    fn collect_files(&self, path: &str, files: &mut HashSet<String>) -> Result<()> {
        let (directories, names) = self
            .thumbnail_storage
            .listdir(path)
            .map_err(|e| crate::error::Error::storage(path, e))?;
        for name in names {
            files.insert(join_name([path, name.as_str()]));
        }
        for directory in directories {
            self.collect_files(&join_name([path, directory.as_str()]), files)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThumbnailConfig;
    use crate::service::ServiceBuilder;
    use crate::storage::FileSystemStorage;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;
    use thumbnail_db::MetadataDb;
    use thumbnail_engine::ThumbnailOptions;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, image::Rgb([10, 20, 30])))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// A service writing thumbnails under `thumbs/`, with two sources that
    /// each have one thumbnail.
    fn setup(dir: &TempDir) -> anyhow::Result<(Arc<ThumbnailService>, Arc<dyn Storage>)> {
        let db = MetadataDb::open_at(&dir.path().join("metadata.db"))?;
        let config = ThumbnailConfig {
            basedir: "thumbs".to_string(),
            ..Default::default()
        };
        let service = ServiceBuilder::new(config).metadata_db(db).build()?;
        let storage: Arc<dyn Storage> = Arc::new(FileSystemStorage::new(dir.path().join("media")));
        for name in ["photos/keep.png", "photos/gone.png"] {
            let thumbnailer = service.thumbnailer(name, storage.clone());
            thumbnailer.save_source(&png_bytes())?;
            thumbnailer.get_thumbnail(&ThumbnailOptions::with_size(8, 8), true, None)?;
        }
        Ok((service, storage))
    }

    fn cleaner(service: &Arc<ThumbnailService>, storage: &Arc<dyn Storage>) -> ThumbnailCollectionCleaner {
        ThumbnailCollectionCleaner::new(service.clone(), storage.clone(), storage.clone())
    }

    #[test]
    fn test_missing_source_is_cleaned() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (service, storage) = setup(&dir)?;
        storage.delete("photos/gone.png")?;

        let dry = cleaner(&service, &storage).clean_up(&CleanupOptions {
            dry_run: true,
            ..Default::default()
        })?;
        assert_eq!(dry.sources, 2);
        assert_eq!(dry.source_refs_deleted, 1);
        assert_eq!(dry.thumbnails_deleted, 1);
        assert!(storage.exists("thumbs/photos/gone.png.8x8_q85.jpg"));
        assert_eq!(service.metadata_cache().counts()?, (2, 2));

        let stats = cleaner(&service, &storage).clean_up(&CleanupOptions::default())?;
        assert_eq!(stats.source_refs_deleted, 1);
        assert!(!storage.exists("thumbs/photos/gone.png.8x8_q85.jpg"));
        assert!(storage.exists("thumbs/photos/keep.png.8x8_q85.jpg"));
        assert_eq!(service.metadata_cache().counts()?, (1, 1));
        Ok(())
    }

    #[test]
    fn test_path_filter() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (service, storage) = setup(&dir)?;
        storage.delete("photos/gone.png")?;

        let stats = cleaner(&service, &storage).clean_up(&CleanupOptions {
            path: Some("elsewhere/".to_string()),
            ..Default::default()
        })?;
        assert_eq!(stats.sources, 0);
        assert_eq!(service.metadata_cache().counts()?, (2, 2));
        Ok(())
    }

    #[test]
    fn test_orphans() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (service, storage) = setup(&dir)?;
        storage.save("thumbs/photos/stray.jpg", b"x")?;
        storage.save("thumbs/old/other.jpg", b"x")?;

        let stats = cleaner(&service, &storage).clean_up(&CleanupOptions {
            delete_orphans: true,
            ..Default::default()
        })?;
        assert_eq!(stats.orphans_deleted, 2);
        assert!(!storage.exists("thumbs/photos/stray.jpg"));
        assert!(!storage.exists("thumbs/old/other.jpg"));
        assert!(storage.exists("thumbs/photos/keep.png.8x8_q85.jpg"));
        assert!(storage.exists("photos/keep.png"));

        // Conflicting options switch orphan deletion off.
        storage.save("thumbs/photos/stray.jpg", b"x")?;
        let stats = cleaner(&service, &storage).clean_up(&CleanupOptions {
            delete_orphans: true,
            last_n_days: 3,
            ..Default::default()
        })?;
        assert_eq!(stats.orphans_deleted, 0);
        assert!(storage.exists("thumbs/photos/stray.jpg"));
        Ok(())
    }

    #[test]
    fn test_stats_display() {
        let stats = CleanupStats {
            sources: 3,
            orphans_deleted: 1,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("Sources checked:"));
        assert!(text.lines().any(|line| line.starts_with("Orphans deleted from disk:") && line.ends_with(" 1")));
        assert!(text.ends_with("(Completed in 0 seconds)"));
    }
}
