//! SQLite metadata cache for thumbnail sources and the files derived from them.
//!
//! Three tables:
//!   sources               (storage_hash, name) unique, last modified time
//!   thumbnails            (storage_hash, name, source_id) unique, owned by a source
//!   thumbnail_dimensions  optional cached (width, height), one per thumbnail
//!
//! Deleting a source cascades to its thumbnails and their dimensions. Every
//! mutation is a single statement so concurrent callers only race on
//! last-writer-wins timestamps.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum number of ids passed to one `DELETE ... IN (...)` statement.
const DELETE_BATCH: usize = 1000;

/// Identity and timestamp shared by sources and thumbnails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: i64,
    pub storage_hash: String,
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// An original file.
pub type SourceRecord = ArtifactRecord;

/// A derived file, owned by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailRecord {
    #[serde(flatten)]
    pub artifact: ArtifactRecord,
    pub source_id: i64,
    pub dimensions: Option<(u32, u32)>,
}

/// Metadata database handle.
pub struct MetadataDb {
    conn: Connection,
    db_path: PathBuf,
}

impl MetadataDb {
    /// Open or create the database at `db_path`, creating parent directories.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database dir: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn,
            db_path: db_path.to_path_buf(),
        };
        db.create_tables()?;
        Ok(db)
    }

    /// Get the database file path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    // -- Schema --

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                storage_hash TEXT NOT NULL,
                name TEXT NOT NULL,
                modified TEXT NOT NULL,
                UNIQUE (storage_hash, name)
            );

            CREATE TABLE IF NOT EXISTS thumbnails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                storage_hash TEXT NOT NULL,
                name TEXT NOT NULL,
                modified TEXT NOT NULL,
                source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                UNIQUE (storage_hash, name, source_id)
            );

            CREATE TABLE IF NOT EXISTS thumbnail_dimensions (
                thumbnail_id INTEGER PRIMARY KEY REFERENCES thumbnails(id) ON DELETE CASCADE,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_thumbnails_source ON thumbnails(source_id);
            CREATE INDEX IF NOT EXISTS idx_sources_name ON sources(name);
            ",
        )?;
        Ok(())
    }

    // -- Sources --

    pub fn get_source(&self, storage_hash: &str, name: &str) -> Result<Option<SourceRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, storage_hash, name, modified FROM sources
                 WHERE storage_hash = ?1 AND name = ?2",
                params![storage_hash, name],
                artifact_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Look up a source, inserting it with `modified` if it does not exist yet.
    /// Returns the record and whether it was created.
    pub fn get_or_create_source(
        &self,
        storage_hash: &str,
        name: &str,
        modified: DateTime<Utc>,
    ) -> Result<(SourceRecord, bool)> {
        let inserted = self.conn.execute(
            "INSERT INTO sources (storage_hash, name, modified) VALUES (?1, ?2, ?3)
             ON CONFLICT (storage_hash, name) DO NOTHING",
            params![storage_hash, name, modified],
        )?;
        let record = self
            .get_source(storage_hash, name)?
            .with_context(|| format!("Source {} vanished after insert", name))?;
        if inserted > 0 {
            debug!(name = %name, "created source record");
        }
        Ok((record, inserted > 0))
    }

    /// Store `modified` on the source if it differs. Returns true if a write happened.
    pub fn touch_source(&self, record: &mut SourceRecord, modified: DateTime<Utc>) -> Result<bool> {
        if record.modified == modified {
            return Ok(false);
        }
        self.conn.execute(
            "UPDATE sources SET modified = ?1 WHERE id = ?2",
            params![modified, record.id],
        )?;
        record.modified = modified;
        Ok(true)
    }

    /// Sources, optionally restricted to ones modified at or after `since`
    /// and whose name starts with `name_prefix`.
    pub fn sources(
        &self,
        since: Option<DateTime<Utc>>,
        name_prefix: Option<&str>,
    ) -> Result<Vec<SourceRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, storage_hash, name, modified FROM sources ORDER BY id")?;
        let rows = stmt.query_map([], artifact_from_row)?;
        let mut sources = Vec::new();
        for row in rows {
            let source = row?;
            if since.map_or(false, |since| source.modified < since) {
                continue;
            }
            if name_prefix.map_or(false, |prefix| !source.name.starts_with(prefix)) {
                continue;
            }
            sources.push(source);
        }
        Ok(sources)
    }

    /// Delete a source; its thumbnails and their dimensions go with it.
    pub fn delete_source(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM sources WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Delete many sources in batches. Returns the number of rows removed.
    pub fn delete_sources(&self, ids: &[i64]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        for chunk in ids.chunks(DELETE_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("DELETE FROM sources WHERE id IN ({})", placeholders);
            deleted += tx.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    // -- Thumbnails --

    pub fn get_thumbnail(
        &self,
        storage_hash: &str,
        name: &str,
        source_id: i64,
    ) -> Result<Option<ThumbnailRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT t.id, t.storage_hash, t.name, t.modified, t.source_id, d.width, d.height
                 FROM thumbnails t LEFT JOIN thumbnail_dimensions d ON d.thumbnail_id = t.id
                 WHERE t.storage_hash = ?1 AND t.name = ?2 AND t.source_id = ?3",
                params![storage_hash, name, source_id],
                thumbnail_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Look up a thumbnail of `source_id`, inserting it with `modified` if missing.
    pub fn get_or_create_thumbnail(
        &self,
        storage_hash: &str,
        name: &str,
        source_id: i64,
        modified: DateTime<Utc>,
    ) -> Result<(ThumbnailRecord, bool)> {
        let inserted = self.conn.execute(
            "INSERT INTO thumbnails (storage_hash, name, modified, source_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (storage_hash, name, source_id) DO NOTHING",
            params![storage_hash, name, modified, source_id],
        )?;
        let record = self
            .get_thumbnail(storage_hash, name, source_id)?
            .with_context(|| format!("Thumbnail {} vanished after insert", name))?;
        Ok((record, inserted > 0))
    }

    /// Store `modified` on the thumbnail if it differs. Returns true if a write happened.
    pub fn touch_thumbnail(
        &self,
        record: &mut ThumbnailRecord,
        modified: DateTime<Utc>,
    ) -> Result<bool> {
        if record.artifact.modified == modified {
            return Ok(false);
        }
        self.conn.execute(
            "UPDATE thumbnails SET modified = ?1 WHERE id = ?2",
            params![modified, record.artifact.id],
        )?;
        record.artifact.modified = modified;
        Ok(true)
    }

    /// All thumbnails owned by a source, optionally only those in one storage.
    pub fn thumbnails_for_source(
        &self,
        source_id: i64,
        storage_hash: Option<&str>,
    ) -> Result<Vec<ThumbnailRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.storage_hash, t.name, t.modified, t.source_id, d.width, d.height
             FROM thumbnails t LEFT JOIN thumbnail_dimensions d ON d.thumbnail_id = t.id
             WHERE t.source_id = ?1 AND (?2 IS NULL OR t.storage_hash = ?2)
             ORDER BY t.id",
        )?;
        let rows = stmt.query_map(params![source_id, storage_hash], thumbnail_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    pub fn delete_thumbnail(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM thumbnails WHERE id = ?1", params![id])?;
        Ok(())
    }

    // -- Dimensions --

    pub fn set_dimensions(&self, thumbnail_id: i64, width: u32, height: u32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO thumbnail_dimensions (thumbnail_id, width, height)
             VALUES (?1, ?2, ?3)",
            params![thumbnail_id, width, height],
        )?;
        Ok(())
    }

    pub fn dimensions(&self, thumbnail_id: i64) -> Result<Option<(u32, u32)>> {
        let dims = self
            .conn
            .query_row(
                "SELECT width, height FROM thumbnail_dimensions WHERE thumbnail_id = ?1",
                params![thumbnail_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(dims)
    }

    // -- Stats --

    pub fn source_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn thumbnail_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM thumbnails", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        id: row.get(0)?,
        storage_hash: row.get(1)?,
        name: row.get(2)?,
        modified: row.get(3)?,
    })
}

fn thumbnail_from_row(row: &Row<'_>) -> rusqlite::Result<ThumbnailRecord> {
    let width: Option<u32> = row.get(5)?;
    let height: Option<u32> = row.get(6)?;
    Ok(ThumbnailRecord {
        artifact: artifact_from_row(row)?,
        source_id: row.get(4)?,
        dimensions: width.zip(height),
    })
}
