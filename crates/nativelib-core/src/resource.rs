//! Read-only access to the bundled resources.
//!
//! A [`ResourceSource`] hands out the raw bytes stored under a slash-separated
//! path such as `natives/linux_64/libfoo.so`. Three sources ship with the
//! crate: an unpacked directory, a zip archive, and an in-memory table suited
//! to `include_bytes!` bundles.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    fs::File,
    io::{self, Read},
    path::{Component, Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use zip::{ZipArchive, result::ZipError};

/// Supplies raw bytes for named resources.
pub trait ResourceSource: fmt::Debug + Send + Sync {
    /// Reads the resource stored at `path`.
    ///
    /// Returns `Ok(None)` when no such resource exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource exists but cannot be read.
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Opens `path` as a directory source or, for a regular file, a zip archive.
///
/// # Errors
///
/// Returns an error if the path does not exist or is not a readable archive.
pub fn open_source(path: &Path) -> io::Result<Box<dyn ResourceSource>> {
    if path.is_dir() {
        Ok(Box::new(DirectorySource::new(path)))
    } else {
        Ok(Box::new(ZipSource::open(path)?))
    }
}

/// Resources laid out as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("resource path escapes the bundle: {path}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl ResourceSource for DirectorySource {
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        let file = self.resolve(path)?;
        if !file.is_file() {
            return Ok(None);
        }
        match std::fs::read(&file) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Resources stored in a zip archive (a `.jar`, `.zip` or similar bundle).
pub struct ZipSource {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

impl fmt::Debug for ZipSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipSource")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ZipSource {
    /// Opens the archive at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a zip archive.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let archive = ZipArchive::new(file).map_err(io::Error::other)?;
        Ok(Self {
            path,
            archive: Mutex::new(archive),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResourceSource for ZipSource {
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entry = match archive.by_name(path) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(io::Error::other(err)),
        };
        if entry.is_dir() {
            return Ok(None);
        }

        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
        entry.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }
}

/// Resources held in memory, typically compiled in with `include_bytes!`.
///
/// ```
/// use nativelib_core::MemorySource;
///
/// let source = MemorySource::new()
///     .with("natives/linux_64/libfoo.so", &b"\x7fELF"[..]);
/// # let _ = source;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: HashMap<String, Cow<'static, [u8]>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource, builder style.
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, bytes: impl Into<Cow<'static, [u8]>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Cow<'static, [u8]>>) {
        self.entries.insert(path.into(), bytes.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceSource for MemorySource {
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(path).map(|bytes| bytes.to_vec()))
    }
}
