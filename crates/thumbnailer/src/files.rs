use crate::error::{Error, Result};
use crate::storage::Storage;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use std::sync::Arc;

/// A generated or existing thumbnail.
///
/// Freshly generated thumbnails carry the encoded `content` and the processed
/// `image`. Thumbnails found in storage carry neither until asked.
#[derive(Clone)]
pub struct ThumbnailFile {
    pub name: String,
    pub storage: Arc<dyn Storage>,
    pub image: Option<DynamicImage>,
    pub content: Option<Vec<u8>>,
    /// The `@2x` sibling, when one was generated alongside.
    pub high_resolution: Option<Box<ThumbnailFile>>,
    dimensions: Option<(u32, u32)>,
}

impl ThumbnailFile {
    pub fn new(name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            name: name.into(),
            storage,
            image: None,
            content: None,
            high_resolution: None,
            dimensions: None,
        }
    }

    pub(crate) fn with_dimensions(mut self, dimensions: Option<(u32, u32)>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Replace the in-memory image; cached dimensions follow it.
    pub fn set_image(&mut self, image: Option<DynamicImage>) {
        self.dimensions = image.as_ref().map(|image| image.dimensions());
        self.image = image;
    }

    /// Pixel size, from the image in memory, a cached value, or the stored file
    /// header, in that order.
    pub fn dimensions(&mut self) -> Result<(u32, u32)> {
        if let Some(dimensions) = self.dimensions {
            return Ok(dimensions);
        }
        let dimensions = match &self.image {
            Some(image) => image.dimensions(),
            None => {
                let bytes = match &self.content {
                    Some(content) => content.clone(),
                    None => self
                        .storage
                        .open(&self.name)
                        .map_err(|e| Error::storage(&self.name, e))?,
                };
                read_dimensions(&bytes).map_err(thumbnail_engine::Error::from)?
            }
        };
        self.dimensions = Some(dimensions);
        Ok(dimensions)
    }

    pub fn width(&mut self) -> Result<u32> {
        Ok(self.dimensions()?.0)
    }

    pub fn height(&mut self) -> Result<u32> {
        Ok(self.dimensions()?.1)
    }

    /// Filesystem path of the stored thumbnail, for local storage.
    pub fn path(&self) -> Option<std::path::PathBuf> {
        self.storage.path(&self.name)
    }
}

fn read_dimensions(bytes: &[u8]) -> image::ImageResult<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
}

impl std::fmt::Debug for ThumbnailFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailFile")
            .field("name", &self.name)
            .field("dimensions", &self.dimensions)
            .field("has_image", &self.image.is_some())
            .field("high_resolution", &self.high_resolution.as_ref().map(|h| &h.name))
            .finish()
    }
}
