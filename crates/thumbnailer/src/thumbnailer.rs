//! Thumbnail lookup, staleness checks and generation for one source file.
//!
//! A [`Thumbnailer`] is cheap to build: it holds the source name, the two
//! storages and a handle to the shared [`ThumbnailService`]. Requests go
//! through [`Thumbnailer::get_thumbnail`], which returns an existing fresh
//! thumbnail when one is found and generates one otherwise.
//!
//! Freshness compares the source and thumbnail modification times. Each side
//! reads its time from the filesystem when its storage is local and from the
//! metadata cache otherwise, so two local storages never touch the database.

use crate::error::{Error, Result};
use crate::files::ThumbnailFile;
use crate::namers::NamerContext;
use crate::service::ThumbnailService;
use crate::signals::ThumbnailMissed;
use crate::storage::{join_name, storage_hash, Storage};
use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use std::sync::Arc;
use thumbnail_db::{SourceRecord, ThumbnailRecord};
use thumbnail_engine::{
    generate_source_image, is_transparent, process_image, save_image, OptionMap, ThumbnailOptions,
};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Thumbnailer {
    service: Arc<ThumbnailService>,
    name: String,
    source_storage: Arc<dyn Storage>,
    thumbnail_storage: Arc<dyn Storage>,
    alias_target: Option<String>,
    generate: bool,
}

impl Thumbnailer {
    pub(crate) fn new(
        service: Arc<ThumbnailService>,
        name: impl Into<String>,
        source_storage: Arc<dyn Storage>,
    ) -> Self {
        let thumbnail_storage = service
            .default_thumbnail_storage()
            .unwrap_or_else(|| source_storage.clone());
        let generate = service.config().generate;
        Self {
            service,
            name: name.into(),
            source_storage,
            thumbnail_storage,
            alias_target: None,
            generate,
        }
    }

    pub fn with_thumbnail_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.thumbnail_storage = storage;
        self
    }

    /// Dotted `app.Model.field` path used to resolve aliases.
    pub fn with_alias_target(mut self, target: impl Into<String>) -> Self {
        self.alias_target = Some(target.into());
        self
    }

    /// Whether missing thumbnails are generated when a call does not say.
    pub fn with_generate(mut self, generate: bool) -> Self {
        self.generate = generate;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &Arc<ThumbnailService> {
        &self.service
    }

    pub fn source_storage(&self) -> &Arc<dyn Storage> {
        &self.source_storage
    }

    pub fn thumbnail_storage(&self) -> &Arc<dyn Storage> {
        &self.thumbnail_storage
    }

    pub fn alias_target(&self) -> Option<&str> {
        self.alias_target.as_deref()
    }

    /// Options from a raw mapping, with the configured defaults applied.
    pub fn options(&self, values: OptionMap) -> ThumbnailOptions {
        let config = self.service.config();
        ThumbnailOptions::new(values, config.default_options.as_ref(), config.quality)
    }

    fn normalize(&self, options: &ThumbnailOptions) -> ThumbnailOptions {
        self.options(options.values().clone())
    }

    /// Storage name of the thumbnail for `options`.
    pub fn get_thumbnail_name(
        &self,
        options: &ThumbnailOptions,
        transparent: bool,
        high_resolution: bool,
    ) -> String {
        let config = self.service.config();
        let (path, source_filename) = match self.name.rsplit_once('/') {
            Some((path, filename)) => (path, filename),
            None => ("", self.name.as_str()),
        };
        let source_extension = Path::new(source_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        let extension = if !source_extension.is_empty()
            && config
                .preserve_extensions
                .preserves(&source_extension.to_lowercase())
        {
            source_extension
        } else if transparent {
            config.transparency_extension.as_str()
        } else {
            config.extension.as_str()
        };
        let extension = if extension.is_empty() { "jpg" } else { extension };

        let prepared = options.prepared_options();
        let opts_text = prepared.join("_");
        let basedir = config.basedir.replace("%(opts)s", &opts_text);
        let subdir = config.subdir.replace("%(opts)s", &opts_text);

        let namer = self.service.namer();
        let mut filename = namer(&NamerContext {
            source_filename,
            source_extension,
            thumbnail_extension: extension,
            options,
            prepared_options: &prepared,
            opts_in_directory: config.opts_in_directory(),
        });

        if high_resolution {
            filename = match filename.rfind('.') {
                Some(dot) if dot > 0 => {
                    format!("{}{}{}", &filename[..dot], config.highres_infix, &filename[dot..])
                }
                _ => format!("{}{}", filename, config.highres_infix),
            };
        }
        let filename = format!("{}{}", config.prefix, filename);

        join_name([basedir.as_str(), path, subdir.as_str(), filename.as_str()])
    }

    /// Return a thumbnail for `options`, generating it if no fresh one exists.
    ///
    /// `generate` overrides the thumbnailer default for this call. When
    /// generation is off and nothing fresh exists, a `thumbnail_missed`
    /// notification is sent and `Ok(None)` returned. Generated thumbnails are
    /// written to the thumbnail storage only when `save` is set.
    pub fn get_thumbnail(
        &self,
        options: &ThumbnailOptions,
        save: bool,
        generate: Option<bool>,
    ) -> Result<Option<ThumbnailFile>> {
        let options = self.normalize(options);
        let generate = generate.unwrap_or(self.generate);
        let high_resolution = options
            .get("HIGH_RESOLUTION")
            .map_or(self.service.config().high_resolution, |value| value.is_truthy());

        let Some(mut thumbnail) = self.get_or_generate(&options, save, generate, false)? else {
            if high_resolution && !generate {
                self.emit_missed(&options, true);
            }
            return Ok(None);
        };
        if high_resolution {
            thumbnail.high_resolution = self
                .get_or_generate(&options, save, generate, true)?
                .map(Box::new);
        }
        Ok(Some(thumbnail))
    }

    fn get_or_generate(
        &self,
        options: &ThumbnailOptions,
        save: bool,
        generate: bool,
        high_resolution: bool,
    ) -> Result<Option<ThumbnailFile>> {
        if let Some(existing) = self.get_existing_thumbnail(options, high_resolution)? {
            return Ok(Some(existing));
        }
        if !generate {
            self.emit_missed(options, high_resolution);
            return Ok(None);
        }

        let key = format!(
            "{}:{}",
            storage_hash(self.thumbnail_storage.as_ref()),
            self.get_thumbnail_name(options, false, high_resolution)
        );
        self.service
            .locks()
            .with_lock(&key, || -> Result<Option<ThumbnailFile>> {
                // Another thread may have finished it while we waited.
                if let Some(existing) = self.get_existing_thumbnail(options, high_resolution)? {
                    return Ok(Some(existing));
                }
                let mut thumbnail = self.generate_thumbnail(options, high_resolution)?;
                if save {
                    self.save_thumbnail(&mut thumbnail)?;
                }
                Ok(Some(thumbnail))
            })
    }

    fn emit_missed(&self, options: &ThumbnailOptions, high_resolution: bool) {
        debug!(source = %self.name, high_resolution, "thumbnail missing, generation disabled");
        self.service.signals().thumbnail_missed(&ThumbnailMissed {
            source_name: self.name.clone(),
            options: options.clone(),
            high_resolution,
        });
    }

    /// A fresh thumbnail under either the opaque or the transparent name.
    pub fn get_existing_thumbnail(
        &self,
        options: &ThumbnailOptions,
        high_resolution: bool,
    ) -> Result<Option<ThumbnailFile>> {
        let options = self.normalize(options);
        let mut names = vec![self.get_thumbnail_name(&options, false, high_resolution)];
        let transparent = self.get_thumbnail_name(&options, true, high_resolution);
        if !names.contains(&transparent) {
            names.push(transparent);
        }

        for name in names {
            if let Some(dimensions) = self.freshness(&name)? {
                debug!(name = %name, "fresh thumbnail found");
                let thumbnail = ThumbnailFile::new(name, self.thumbnail_storage.clone())
                    .with_dimensions(dimensions);
                return Ok(Some(thumbnail));
            }
        }
        Ok(None)
    }

    /// True if `thumbnail_name` exists and is at least as new as the source.
    pub fn thumbnail_exists(&self, thumbnail_name: &str) -> Result<bool> {
        Ok(self.freshness(thumbnail_name)?.is_some())
    }

    /// `Some(cached dimensions)` when the thumbnail is fresh, `None` otherwise.
    fn freshness(&self, thumbnail_name: &str) -> Result<Option<Option<(u32, u32)>>> {
        let cache_dimensions = self.service.config().cache_dimensions;

        let source_time = if self.source_storage.is_local() {
            match self.source_storage.modified_time(&self.name) {
                Ok(time) => time,
                Err(_) => return Ok(None),
            }
        } else {
            match self.source_cache(false, false)? {
                Some(source) => source.modified,
                None => return Ok(None),
            }
        };

        let (thumbnail_time, dimensions) = if self.thumbnail_storage.is_local() {
            let time = match self.thumbnail_storage.modified_time(thumbnail_name) {
                Ok(time) => time,
                Err(_) => return Ok(None),
            };
            let dimensions = if cache_dimensions {
                self.recorded_thumbnail(thumbnail_name)?
                    .and_then(|record| record.dimensions)
            } else {
                None
            };
            (time, dimensions)
        } else {
            match self.thumbnail_cache(thumbnail_name, false, false)? {
                Some(record) => (record.artifact.modified, record.dimensions),
                None => return Ok(None),
            }
        };

        if source_time <= thumbnail_time {
            Ok(Some(dimensions))
        } else {
            debug!(name = %thumbnail_name, %source_time, %thumbnail_time, "thumbnail is stale");
            Ok(None)
        }
    }

    /// Thumbnail record without creating or updating anything.
    fn recorded_thumbnail(&self, thumbnail_name: &str) -> Result<Option<ThumbnailRecord>> {
        let cache = self.service.metadata_cache();
        let Some(source) = cache.get_source(self.source_storage.as_ref(), &self.name, false, None)?
        else {
            return Ok(None);
        };
        cache.get_thumbnail(self.thumbnail_storage.as_ref(), &source, thumbnail_name, false, None)
    }

    /// Generate (but do not save) a thumbnail for `options`.
    ///
    /// A high-resolution thumbnail is rendered at twice the requested size and
    /// named with the high-resolution infix.
    pub fn generate_thumbnail(
        &self,
        options: &ThumbnailOptions,
        high_resolution: bool,
    ) -> Result<ThumbnailFile> {
        let options = self.normalize(options);
        let (width, height) = options.size()?;
        let min_dim = width.min(height).min(0);
        let max_dim = width.max(height).max(0);
        if max_dim == 0 || min_dim < 0 {
            return Err(Error::InvalidSize { width, height });
        }

        let mut render_options = options.clone();
        if high_resolution {
            render_options.set_size(width * 2, height * 2);
        }

        let source = match self.source_storage.open(&self.name) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                debug!(source = %self.name, error = %err, "source could not be opened");
                None
            }
        };
        let config = self.service.config();
        let image = generate_source_image(
            source.as_deref(),
            &render_options,
            self.service.source_generators(),
            !config.debug,
        )?
        .ok_or_else(|| Error::InvalidImageFormat(self.name.clone()))?;

        let processed = process_image(image, &render_options, self.service.processors())?;
        let name = self.get_thumbnail_name(&options, is_transparent(&processed), high_resolution);
        let extension = Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(config.extension.as_str());
        let data = save_image(&processed, extension, &options, config.progressive)?;

        debug!(source = %self.name, name = %name, bytes = data.len(), "thumbnail generated");
        let mut thumbnail = ThumbnailFile::new(name, self.thumbnail_storage.clone());
        thumbnail.set_image(Some(processed));
        thumbnail.content = Some(data);
        Ok(thumbnail)
    }

    /// Write a generated thumbnail to storage and record it.
    pub fn save_thumbnail(&self, thumbnail: &mut ThumbnailFile) -> Result<()> {
        let Some(content) = thumbnail.content.as_deref() else {
            return Err(Error::storage(
                &thumbnail.name,
                io::Error::new(io::ErrorKind::InvalidInput, "thumbnail has no content"),
            ));
        };
        // Stale files are replaced, not versioned.
        if let Err(err) = self.thumbnail_storage.delete(&thumbnail.name) {
            debug!(name = %thumbnail.name, error = %err, "could not delete previous thumbnail");
        }
        let saved = self
            .thumbnail_storage
            .save(&thumbnail.name, content)
            .map_err(|e| Error::storage(&thumbnail.name, e))?;
        thumbnail.name = saved;

        let record = self.thumbnail_cache(&thumbnail.name, true, true)?;
        if self.service.config().cache_dimensions {
            if let Some(record) = &record {
                let dimensions = thumbnail.dimensions()?;
                self.service.metadata_cache().set_dimensions(record, dimensions)?;
            }
        }

        info!(source = %self.name, name = %thumbnail.name, "thumbnail saved");
        self.service.signals().thumbnail_created(thumbnail);
        Ok(())
    }

    /// Thumbnail for a named alias, resolved against the alias target.
    pub fn get_alias(&self, alias: &str) -> Result<Option<ThumbnailFile>> {
        let values = self
            .service
            .alias(alias, self.alias_target.as_deref())
            .ok_or_else(|| Error::UnknownAlias(alias.to_string()))?;
        self.get_thumbnail(&self.options(values), true, None)
    }

    /// Store new source content and mark every existing thumbnail stale.
    pub fn save_source(&self, content: &[u8]) -> Result<()> {
        self.source_storage
            .save(&self.name, content)
            .map_err(|e| Error::storage(&self.name, e))?;
        self.source_cache(true, true)?;
        info!(source = %self.name, bytes = content.len(), "source saved");
        self.service.signals().saved_file(self);
        Ok(())
    }

    /// Delete the source, the thumbnails recorded for it in the current
    /// thumbnail storage and its metadata.
    pub fn delete_source(&self) -> Result<()> {
        let cache = self.service.metadata_cache();
        let source = self.source_cache(false, false)?;
        if let Some(source) = &source {
            let thumbnails =
                cache.thumbnails_for_source(source, Some(self.thumbnail_storage.as_ref()))?;
            for thumbnail in thumbnails {
                if let Err(err) = self.thumbnail_storage.delete(&thumbnail.artifact.name) {
                    warn!(name = %thumbnail.artifact.name, error = %err, "failed to delete thumbnail");
                }
            }
        }
        self.source_storage
            .delete(&self.name)
            .map_err(|e| Error::storage(&self.name, e))?;
        if let Some(source) = source {
            cache.delete_source(&source)?;
        }
        info!(source = %self.name, "source deleted");
        Ok(())
    }

    fn source_modified_time(&self) -> Option<DateTime<Utc>> {
        if !self.source_storage.is_local() {
            return None;
        }
        self.source_storage.modified_time(&self.name).ok()
    }

    fn thumbnail_modified_time(&self, thumbnail_name: &str) -> Option<DateTime<Utc>> {
        if !self.thumbnail_storage.is_local() {
            return None;
        }
        self.thumbnail_storage.modified_time(thumbnail_name).ok()
    }

    /// Source record. Local sources record their file time; with `update` a
    /// remote source is stamped with the current time.
    fn source_cache(&self, create: bool, update: bool) -> Result<Option<SourceRecord>> {
        let mut modified = self.source_modified_time();
        if update && modified.is_none() {
            modified = Some(Utc::now());
        }
        self.service
            .metadata_cache()
            .get_source(self.source_storage.as_ref(), &self.name, create, modified)
    }

    fn thumbnail_cache(
        &self,
        thumbnail_name: &str,
        create: bool,
        update: bool,
    ) -> Result<Option<ThumbnailRecord>> {
        let mut modified = self.thumbnail_modified_time(thumbnail_name);
        if update && modified.is_none() {
            modified = Some(Utc::now());
        }
        let Some(source) = self.source_cache(true, false)? else {
            return Ok(None);
        };
        self.service.metadata_cache().get_thumbnail(
            self.thumbnail_storage.as_ref(),
            &source,
            thumbnail_name,
            create,
            modified,
        )
    }
}

impl std::fmt::Debug for Thumbnailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thumbnailer")
            .field("name", &self.name)
            .field("alias_target", &self.alias_target)
            .field("generate", &self.generate)
            .finish()
    }
}
