//! In-process notifications
//!
//! Handlers run synchronously on the emitting thread. The handler list is
//! cloned before dispatch, so a handler may connect further handlers.

use crate::files::ThumbnailFile;
use crate::thumbnailer::Thumbnailer;
use parking_lot::RwLock;
use std::sync::Arc;
use thumbnail_engine::ThumbnailOptions;

/// A thumbnail that was requested but not generated.
#[derive(Debug, Clone)]
pub struct ThumbnailMissed {
    pub source_name: String,
    pub options: ThumbnailOptions,
    pub high_resolution: bool,
}

pub type ThumbnailCreatedFn = dyn Fn(&ThumbnailFile) + Send + Sync;
pub type ThumbnailMissedFn = dyn Fn(&ThumbnailMissed) + Send + Sync;
pub type SavedFileFn = dyn Fn(&Thumbnailer) + Send + Sync;

struct Signal<T: ?Sized> {
    handlers: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for Signal<T> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Signal<T> {
    fn connect(&self, handler: Arc<T>) {
        self.handlers.write().push(handler);
    }

    fn snapshot(&self) -> Vec<Arc<T>> {
        self.handlers.read().clone()
    }
}

#[derive(Default)]
pub struct Signals {
    thumbnail_created: Signal<ThumbnailCreatedFn>,
    thumbnail_missed: Signal<ThumbnailMissedFn>,
    saved_file: Signal<SavedFileFn>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fired after a generated thumbnail has been saved and recorded.
    pub fn on_thumbnail_created(&self, handler: impl Fn(&ThumbnailFile) + Send + Sync + 'static) {
        self.thumbnail_created.connect(Arc::new(handler));
    }

    /// Fired when a thumbnail is missing and generation was not allowed.
    pub fn on_thumbnail_missed(&self, handler: impl Fn(&ThumbnailMissed) + Send + Sync + 'static) {
        self.thumbnail_missed.connect(Arc::new(handler));
    }

    /// Fired after a new source file has been saved through a thumbnailer.
    pub fn on_saved_file(&self, handler: impl Fn(&Thumbnailer) + Send + Sync + 'static) {
        self.saved_file.connect(Arc::new(handler));
    }

    pub(crate) fn thumbnail_created(&self, thumbnail: &ThumbnailFile) {
        for handler in self.thumbnail_created.snapshot() {
            handler(thumbnail);
        }
    }

    pub(crate) fn thumbnail_missed(&self, missed: &ThumbnailMissed) {
        for handler in self.thumbnail_missed.snapshot() {
            handler(missed);
        }
    }

    pub(crate) fn saved_file(&self, thumbnailer: &Thumbnailer) {
        for handler in self.saved_file.snapshot() {
            handler(thumbnailer);
        }
    }
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signals")
            .field("thumbnail_created", &self.thumbnail_created.handlers.read().len())
            .field("thumbnail_missed", &self.thumbnail_missed.handlers.read().len())
            .field("saved_file", &self.saved_file.handlers.read().len())
            .finish()
    }
}
