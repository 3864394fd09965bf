//! Shared state behind every [`Thumbnailer`]
//!
//! The service owns the configuration, the plugin selections resolved from
//! the registries, the metadata cache, the alias table, the notification
//! handlers and the generation locks. It is built once and shared as an
//! `Arc`.

use crate::aliases::Aliases;
use crate::cache::MetadataCache;
use crate::config::ThumbnailConfig;
use crate::error::{Error, Result};
use crate::locks::GenerationLocks;
use crate::namers::{builtin_namers, NamerFn, NamerRegistry};
use crate::signals::Signals;
use crate::storage::Storage;
use crate::thumbnailer::Thumbnailer;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thumbnail_db::MetadataDb;
use thumbnail_engine::{
    builtin_processors, builtin_source_generators, OptionMap, ProcessorFn, ProcessorRegistry,
    SourceGeneratorFn, SourceGeneratorRegistry,
};
use tracing::info;

pub struct ThumbnailService {
    config: ThumbnailConfig,
    processors: Vec<(String, Arc<ProcessorFn>)>,
    source_generators: Vec<(String, Arc<SourceGeneratorFn>)>,
    namer: Arc<NamerFn>,
    metadata_cache: MetadataCache,
    aliases: RwLock<Aliases>,
    signals: Signals,
    locks: GenerationLocks,
    thumbnail_storage: Option<Arc<dyn Storage>>,
}

impl ThumbnailService {
    pub fn builder(config: ThumbnailConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    /// A thumbnailer for the source `name` in `source_storage`.
    pub fn thumbnailer(
        self: &Arc<Self>,
        name: impl Into<String>,
        source_storage: Arc<dyn Storage>,
    ) -> Thumbnailer {
        Thumbnailer::new(self.clone(), name, source_storage)
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    pub fn processors(&self) -> &[(String, Arc<ProcessorFn>)] {
        &self.processors
    }

    pub fn source_generators(&self) -> &[(String, Arc<SourceGeneratorFn>)] {
        &self.source_generators
    }

    pub fn namer(&self) -> &NamerFn {
        self.namer.as_ref()
    }

    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata_cache
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub(crate) fn locks(&self) -> &GenerationLocks {
        &self.locks
    }

    /// Storage for thumbnails when a thumbnailer does not name its own.
    pub fn default_thumbnail_storage(&self) -> Option<Arc<dyn Storage>> {
        self.thumbnail_storage.clone()
    }

    pub fn set_alias(&self, alias: &str, options: OptionMap, target: Option<&str>) {
        self.aliases.write().set(alias, options, target);
    }

    pub fn alias(&self, alias: &str, target: Option<&str>) -> Option<OptionMap> {
        self.aliases.read().get(alias, target)
    }

    pub fn aliases(&self, target: Option<&str>, include_global: bool) -> BTreeMap<String, OptionMap> {
        self.aliases.read().all(target, include_global)
    }
}

impl std::fmt::Debug for ThumbnailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailService")
            .field("processors", &self.processors.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field(
                "source_generators",
                &self.source_generators.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("namer", &self.config.namer)
            .field("metadata_cache", &self.metadata_cache)
            .field("signals", &self.signals)
            .finish()
    }
}

/// Collects plugins and resources, then resolves the configured names.
pub struct ServiceBuilder {
    config: ThumbnailConfig,
    processors: ProcessorRegistry,
    source_generators: SourceGeneratorRegistry,
    namers: NamerRegistry,
    metadata_db: Option<MetadataDb>,
    thumbnail_storage: Option<Arc<dyn Storage>>,
}

impl ServiceBuilder {
    /// Builder with every built-in processor, source generator and namer registered.
    pub fn new(config: ThumbnailConfig) -> Self {
        Self {
            config,
            processors: builtin_processors(),
            source_generators: builtin_source_generators(),
            namers: builtin_namers(),
            metadata_db: None,
            thumbnail_storage: None,
        }
    }

    pub fn register_processor(mut self, name: impl Into<String>, processor: Arc<ProcessorFn>) -> Self {
        self.processors.register(name, processor);
        self
    }

    pub fn register_source_generator(
        mut self,
        name: impl Into<String>,
        generator: Arc<SourceGeneratorFn>,
    ) -> Self {
        self.source_generators.register(name, generator);
        self
    }

    pub fn register_namer(mut self, name: impl Into<String>, namer: Arc<NamerFn>) -> Self {
        self.namers.register(name, namer);
        self
    }

    pub fn metadata_db(mut self, db: MetadataDb) -> Self {
        self.metadata_db = Some(db);
        self
    }

    pub fn thumbnail_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.thumbnail_storage = Some(storage);
        self
    }

    /// Resolve the configured plugin names. Unknown names are configuration errors.
    pub fn build(self) -> Result<Arc<ThumbnailService>> {
        let config = self.config;
        let processors = self.processors.select(&config.processors)?;
        let source_generators = self.source_generators.select(&config.source_generators)?;
        let namer = self.namers.get(&config.namer)?;
        let db = self
            .metadata_db
            .ok_or_else(|| Error::Config("no metadata database configured".to_string()))?;
        let metadata_cache = MetadataCache::new(db, config.check_cache_miss);
        let aliases = Aliases::from_config(&config.aliases);

        info!(
            processors = ?config.processors,
            source_generators = ?config.source_generators,
            namer = %config.namer,
            "thumbnail service ready"
        );
        Ok(Arc::new(ThumbnailService {
            processors,
            source_generators,
            namer,
            metadata_cache,
            aliases: RwLock::new(aliases),
            signals: Signals::new(),
            locks: GenerationLocks::new(),
            thumbnail_storage: self.thumbnail_storage,
            config,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use tempfile::TempDir;

    fn test_db() -> (MetadataDb, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = MetadataDb::open_at(&dir.path().join("metadata.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_build_defaults() {
        let (db, _dir) = test_db();
        let service = ServiceBuilder::new(ThumbnailConfig::default())
            .metadata_db(db)
            .build()
            .unwrap();
        let names: Vec<&str> = service.processors().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["colorspace", "autocrop", "scale_and_crop", "filters", "background"]);
        assert_eq!(service.source_generators().len(), 1);
        assert!(service.default_thumbnail_storage().is_none());
    }

    #[test]
    fn test_unknown_plugin_is_config_error() {
        let (db, _dir) = test_db();
        let config = ThumbnailConfig {
            processors: vec!["colorspace".to_string(), "sepia".to_string()],
            ..Default::default()
        };
        let result = ServiceBuilder::new(config).metadata_db(db).build();
        assert!(matches!(result, Err(Error::Config(_))));

        let (db, _dir) = test_db();
        let config = ThumbnailConfig {
            namer: "nope".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ServiceBuilder::new(config).metadata_db(db).build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_database_is_config_error() {
        let result = ServiceBuilder::new(ThumbnailConfig::default()).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    fn upper(ctx: &crate::namers::NamerContext<'_>) -> String {
        format!("{}.{}", ctx.source_filename.to_uppercase(), ctx.thumbnail_extension)
    }

    #[test]
    fn test_custom_namer_and_storage() {
        let (db, _dir) = test_db();
        let config = ThumbnailConfig {
            namer: "upper".to_string(),
            ..Default::default()
        };
        let thumbs: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let service = ServiceBuilder::new(config)
            .register_namer("upper", Arc::new(upper))
            .thumbnail_storage(thumbs)
            .metadata_db(db)
            .build()
            .unwrap();

        let source: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let thumbnailer = service.thumbnailer("dir/a.png", source);
        let options = thumbnail_engine::ThumbnailOptions::with_size(10, 10);
        assert_eq!(thumbnailer.get_thumbnail_name(&options, false, false), "dir/A.PNG.jpg");
        assert!(!thumbnailer.thumbnail_storage().is_local());
    }

    #[test]
    fn test_aliases_from_config() {
        let (db, _dir) = test_db();
        let mut config = ThumbnailConfig::default();
        let mut small = OptionMap::new();
        small.insert("size".to_string(), (32, 32).into());
        config
            .aliases
            .entry("app".to_string())
            .or_default()
            .insert("small".to_string(), small);
        let service = ServiceBuilder::new(config).metadata_db(db).build().unwrap();

        assert!(service.alias("small", None).is_none());
        assert!(service.alias("small", Some("app.Model")).is_some());
        assert_eq!(service.aliases(Some("app"), true).len(), 1);
    }
}
