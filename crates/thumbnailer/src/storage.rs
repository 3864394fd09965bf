//! Storage backends
//!
//! A [`Storage`] is anything that can hold named byte blobs. Backends that map
//! names onto real filesystem paths report them through [`Storage::path`]; the
//! thumbnailer uses that to compare file modification times directly instead of
//! going through the metadata cache.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

pub trait Storage: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    fn open(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Store `content` under `name`, replacing any existing file. Returns the stored name.
    fn save(&self, name: &str, content: &[u8]) -> io::Result<String>;

    fn delete(&self, name: &str) -> io::Result<()>;

    /// Filesystem path for `name`, or `None` if this backend is not local.
    fn path(&self, name: &str) -> Option<PathBuf>;

    fn modified_time(&self, name: &str) -> io::Result<DateTime<Utc>>;

    /// `(directories, files)` directly below `path`.
    fn listdir(&self, path: &str) -> io::Result<(Vec<String>, Vec<String>)>;

    /// Fully qualified type name, the basis of [`storage_hash`].
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn is_local(&self) -> bool {
        self.path("").is_some()
    }
}

/// Stable identity of a storage backend: hex of the first 16 bytes of the
/// SHA-256 of its type name. Instance state does not participate.
pub fn storage_hash(storage: &dyn Storage) -> String {
    let digest = Sha256::digest(storage.type_name().as_bytes());
    hex::encode(&digest[..16])
}

/// Join storage names with `/`, skipping empty components.
pub fn join_name<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(|part| part.trim_end_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Files below a root directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    location: PathBuf,
}

impl FileSystemStorage {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("storage name escapes the storage root: {}", name),
            ));
        }
        Ok(self.location.join(relative))
    }
}

impl Storage for FileSystemStorage {
    fn exists(&self, name: &str) -> bool {
        self.resolve(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn open(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(name)?)
    }

    fn save(&self, name: &str, content: &[u8]) -> io::Result<String> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(name.to_string())
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.resolve(name)?) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn path(&self, name: &str) -> Option<PathBuf> {
        self.resolve(name).ok()
    }

    fn modified_time(&self, name: &str) -> io::Result<DateTime<Utc>> {
        let modified = fs::metadata(self.resolve(name)?)?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    fn listdir(&self, path: &str) -> io::Result<(Vec<String>, Vec<String>)> {
        let mut directories = Vec::new();
        let mut files = Vec::new();
        let entries = match fs::read_dir(self.resolve(path)?) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok((directories, files)),
            other => other?,
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                directories.push(name);
            } else {
                files.push(name);
            }
        }
        directories.sort();
        files.sort();
        Ok((directories, files))
    }
}

/// In-memory backend without filesystem paths, standing in for remote object
/// storage. Modification times are the wall-clock time of each save.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(name: &str) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", name))
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn open(&self, name: &str) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .get(name)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| Self::not_found(name))
    }

    fn save(&self, name: &str, content: &[u8]) -> io::Result<String> {
        self.files
            .write()
            .insert(name.to_string(), (content.to_vec(), Utc::now()));
        Ok(name.to_string())
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        self.files.write().remove(name);
        Ok(())
    }

    fn path(&self, _name: &str) -> Option<PathBuf> {
        None
    }

    fn modified_time(&self, name: &str) -> io::Result<DateTime<Utc>> {
        self.files
            .read()
            .get(name)
            .map(|(_, modified)| *modified)
            .ok_or_else(|| Self::not_found(name))
    }

    fn listdir(&self, path: &str) -> io::Result<(Vec<String>, Vec<String>)> {
        let prefix = match path.trim_end_matches('/') {
            "" => String::new(),
            trimmed => format!("{}/", trimmed),
        };
        let mut directories = BTreeSet::new();
        let mut files = BTreeSet::new();
        for name in self.files.read().keys() {
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => directories.insert(dir.to_string()),
                None => files.insert(rest.to_string()),
            };
        }
        Ok((directories.into_iter().collect(), files.into_iter().collect()))
    }
}
