//! Alias pregeneration
//!
//! Renders every alias that applies to a source up front, so later requests
//! only hit the freshness check.

use crate::error::Result;
use crate::service::ThumbnailService;
use crate::thumbnailer::Thumbnailer;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thumbnail_engine::OptionValue;
use tracing::{debug, warn};

/// Generate (or confirm fresh) every alias visible from the thumbnailer's
/// alias target, in parallel. `progress` receives `(completed, total)`.
///
/// Returns the thumbnail name per alias, or the error that alias hit.
pub fn generate_all_aliases<F>(
    thumbnailer: &Thumbnailer,
    include_global: bool,
    progress: F,
) -> BTreeMap<String, Result<String>>
where
    F: Fn(usize, usize) + Send + Sync,
{
    let aliases: Vec<_> = thumbnailer
        .service()
        .aliases(thumbnailer.alias_target(), include_global)
        .into_iter()
        .collect();
    let total = aliases.len();
    let completed = AtomicUsize::new(0);
    debug!(source = %thumbnailer.name(), total, "pregenerating aliases");

    aliases
        .par_iter()
        .map(|(alias, values)| {
            let mut values = values.clone();
            values.insert("ALIAS".to_string(), OptionValue::Str(alias.clone()));
            let options = thumbnailer.options(values);
            let result = thumbnailer
                .get_thumbnail(&options, true, Some(true))
                .map(|thumbnail| thumbnail.map(|t| t.name).unwrap_or_default());
            if let Err(err) = &result {
                warn!(source = %thumbnailer.name(), alias = %alias, error = %err, "alias pregeneration failed");
            }

            let current = completed.fetch_add(1, Ordering::Relaxed) + 1;
            progress(current, total);

            (alias.clone(), result)
        })
        .collect()
}

/// Pregenerate aliases whenever a source is saved through a thumbnailer.
///
/// Without `include_global` only thumbnailers with an alias target are
/// handled, and only target-specific aliases are rendered.
pub fn connect_alias_pregeneration(service: &Arc<ThumbnailService>, include_global: bool) {
    service.signals().on_saved_file(move |thumbnailer| {
        if thumbnailer.alias_target().is_none() && !include_global {
            return;
        }
        generate_all_aliases(thumbnailer, include_global, |_, _| {});
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThumbnailConfig;
    use crate::service::ServiceBuilder;
    use crate::storage::{MemoryStorage, Storage};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;
    use thumbnail_db::MetadataDb;
    use thumbnail_engine::OptionMap;

    fn size(width: i64, height: i64) -> OptionMap {
        let mut options = OptionMap::new();
        options.insert("size".to_string(), (width, height).into());
        options.insert("crop".to_string(), true.into());
        options
    }

    fn test_service(dir: &TempDir) -> Arc<ThumbnailService> {
        let db = MetadataDb::open_at(&dir.path().join("metadata.db")).unwrap();
        let service = ServiceBuilder::new(ThumbnailConfig::default())
            .metadata_db(db)
            .build()
            .unwrap();
        service.set_alias("tiny", size(8, 8), None);
        service.set_alias("small", size(16, 16), Some("app.Profile"));
        service.set_alias("banner", size(60, 20), Some("app.Profile.avatar"));
        service
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, image::Rgb([40, 80, 120])))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_generate_all_aliases() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = test_service(&dir);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.save("me.png", &png_bytes())?;
        let thumbnailer = service
            .thumbnailer("me.png", storage.clone())
            .with_alias_target("app.Profile.avatar");

        let calls = AtomicUsize::new(0);
        let results = generate_all_aliases(&thumbnailer, true, |_, total| {
            assert_eq!(total, 3);
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(results.len(), 3);
        for name in results.values() {
            let name = name.as_ref().unwrap();
            assert!(storage.exists(name), "{} missing", name);
        }
        assert_eq!(results["small"].as_ref().unwrap(), "me.png.16x16_q85_crop.jpg");

        let local = generate_all_aliases(&thumbnailer, false, |_, _| {});
        assert_eq!(local.keys().collect::<Vec<_>>(), vec!["banner", "small"]);
        Ok(())
    }

    #[test]
    fn test_pregeneration_on_save() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = test_service(&dir);
        connect_alias_pregeneration(&service, false);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        // No alias target: nothing is rendered.
        service.thumbnailer("plain.png", storage.clone()).save_source(&png_bytes())?;
        assert_eq!(service.metadata_cache().counts()?, (1, 0));

        service
            .thumbnailer("me.png", storage.clone())
            .with_alias_target("app.Profile")
            .save_source(&png_bytes())?;
        assert!(storage.exists("me.png.16x16_q85_crop.jpg"));
        assert!(!storage.exists("me.png.8x8_q85_crop.jpg"));
        Ok(())
    }
}
