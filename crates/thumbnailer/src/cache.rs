//! Metadata cache lookups keyed by storage identity
//!
//! Wraps [`MetadataDb`] behind a mutex so thumbnailers on several threads can
//! share one connection.

use crate::error::Result;
use crate::storage::{storage_hash, Storage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::Path;
use thumbnail_db::{MetadataDb, SourceRecord, ThumbnailRecord};
use tracing::debug;

pub struct MetadataCache {
    db: Mutex<MetadataDb>,
    check_cache_miss: bool,
}

impl MetadataCache {
    pub fn new(db: MetadataDb, check_cache_miss: bool) -> Self {
        Self {
            db: Mutex::new(db),
            check_cache_miss,
        }
    }

    pub fn open(path: &Path, check_cache_miss: bool) -> Result<Self> {
        Ok(Self::new(MetadataDb::open_at(path)?, check_cache_miss))
    }

    /// Source record for `name` in `storage`.
    ///
    /// With `create` a missing record is inserted. When `update_modified` is
    /// given it is stored on an existing record if it differs. Without
    /// `create`, a missing record is still created if cache-miss checking is
    /// on and the file exists in storage.
    pub fn get_source(
        &self,
        storage: &dyn Storage,
        name: &str,
        create: bool,
        update_modified: Option<DateTime<Utc>>,
    ) -> Result<Option<SourceRecord>> {
        let hash = storage_hash(storage);
        let db = self.db.lock();
        let fallback = update_modified.unwrap_or_else(Utc::now);
        let (mut record, created) = if create {
            db.get_or_create_source(&hash, name, fallback)?
        } else {
            match db.get_source(&hash, name)? {
                Some(record) => (record, false),
                None if self.check_cache_miss && storage.exists(name) => {
                    debug!(name = %name, "source found in storage on cache miss");
                    db.get_or_create_source(&hash, name, fallback)?
                }
                None => return Ok(None),
            }
        };
        if let Some(modified) = update_modified.filter(|_| !created) {
            db.touch_source(&mut record, modified)?;
        }
        Ok(Some(record))
    }

    /// Thumbnail record for `name` in `storage`, owned by `source`. Same
    /// create and update rules as [`MetadataCache::get_source`].
    pub fn get_thumbnail(
        &self,
        storage: &dyn Storage,
        source: &SourceRecord,
        name: &str,
        create: bool,
        update_modified: Option<DateTime<Utc>>,
    ) -> Result<Option<ThumbnailRecord>> {
        let hash = storage_hash(storage);
        let db = self.db.lock();
        let fallback = update_modified.unwrap_or_else(Utc::now);
        let (mut record, created) = if create {
            db.get_or_create_thumbnail(&hash, name, source.id, fallback)?
        } else {
            match db.get_thumbnail(&hash, name, source.id)? {
                Some(record) => (record, false),
                None if self.check_cache_miss && storage.exists(name) => {
                    debug!(name = %name, "thumbnail found in storage on cache miss");
                    db.get_or_create_thumbnail(&hash, name, source.id, fallback)?
                }
                None => return Ok(None),
            }
        };
        if let Some(modified) = update_modified.filter(|_| !created) {
            db.touch_thumbnail(&mut record, modified)?;
        }
        Ok(Some(record))
    }

    pub fn set_dimensions(&self, thumbnail: &ThumbnailRecord, (width, height): (u32, u32)) -> Result<()> {
        self.db.lock().set_dimensions(thumbnail.artifact.id, width, height)?;
        Ok(())
    }

    pub fn thumbnails_for_source(
        &self,
        source: &SourceRecord,
        storage: Option<&dyn Storage>,
    ) -> Result<Vec<ThumbnailRecord>> {
        let hash = storage.map(storage_hash);
        Ok(self.db.lock().thumbnails_for_source(source.id, hash.as_deref())?)
    }

    pub fn delete_thumbnail(&self, thumbnail: &ThumbnailRecord) -> Result<()> {
        self.db.lock().delete_thumbnail(thumbnail.artifact.id)?;
        Ok(())
    }

    pub fn delete_source(&self, source: &SourceRecord) -> Result<()> {
        self.db.lock().delete_source(source.id)?;
        Ok(())
    }

    pub fn delete_sources(&self, ids: &[i64]) -> Result<usize> {
        Ok(self.db.lock().delete_sources(ids)?)
    }

    pub fn sources(
        &self,
        since: Option<DateTime<Utc>>,
        name_prefix: Option<&str>,
    ) -> Result<Vec<SourceRecord>> {
        Ok(self.db.lock().sources(since, name_prefix)?)
    }

    pub fn counts(&self) -> Result<(i64, i64)> {
        let db = self.db.lock();
        Ok((db.source_count()?, db.thumbnail_count()?))
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("db", &self.db.lock().path())
            .field("check_cache_miss", &self.check_cache_miss)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use tempfile::TempDir;

    fn test_cache(check_cache_miss: bool) -> (MetadataCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let cache = MetadataCache::open(&dir.path().join("metadata.db"), check_cache_miss).unwrap();
        (cache, dir)
    }

    #[test]
    fn test_get_source_without_create() -> anyhow::Result<()> {
        let (cache, _dir) = test_cache(false);
        let storage = MemoryStorage::new();
        storage.save("a.jpg", b"x")?;
        assert!(cache.get_source(&storage, "a.jpg", false, None)?.is_none());
        Ok(())
    }

    #[test]
    fn test_check_cache_miss_creates_existing() -> anyhow::Result<()> {
        let (cache, _dir) = test_cache(true);
        let storage = MemoryStorage::new();
        assert!(cache.get_source(&storage, "a.jpg", false, None)?.is_none());

        storage.save("a.jpg", b"x")?;
        let record = cache.get_source(&storage, "a.jpg", false, None)?.unwrap();
        assert_eq!(record.name, "a.jpg");
        assert_eq!(cache.counts()?, (1, 0));
        Ok(())
    }

    #[test]
    fn test_create_then_update() -> anyhow::Result<()> {
        let (cache, _dir) = test_cache(false);
        let storage = MemoryStorage::new();
        let first = Utc::now() - chrono::Duration::hours(1);
        let created = cache.get_source(&storage, "a.jpg", true, Some(first))?.unwrap();
        assert_eq!(created.modified, first);

        let later = Utc::now();
        let updated = cache.get_source(&storage, "a.jpg", true, Some(later))?.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.modified, later);

        // No update requested: the stored time stays.
        let again = cache.get_source(&storage, "a.jpg", true, None)?.unwrap();
        assert_eq!(again.modified, later);
        Ok(())
    }

    #[test]
    fn test_thumbnails_scoped_by_storage() -> anyhow::Result<()> {
        let (cache, _dir) = test_cache(false);
        let storage = MemoryStorage::new();
        let source = cache.get_source(&storage, "a.jpg", true, None)?.unwrap();
        let thumb = cache
            .get_thumbnail(&storage, &source, "a.jpg.10x10_q85.jpg", true, None)?
            .unwrap();
        cache.set_dimensions(&thumb, (10, 8))?;

        let thumbs = cache.thumbnails_for_source(&source, Some(&storage))?;
        assert_eq!(thumbs.len(), 1);
        assert_eq!(thumbs[0].dimensions, Some((10, 8)));

        let other = crate::storage::FileSystemStorage::new(_dir.path());
        assert!(cache.thumbnails_for_source(&source, Some(&other))?.is_empty());
        assert_eq!(cache.thumbnails_for_source(&source, None)?.len(), 1);

        cache.delete_source(&source)?;
        assert_eq!(cache.counts()?, (0, 0));
        Ok(())
    }
}
