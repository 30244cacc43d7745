//! The seam between the loader and the OS dynamic linker.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use tracing::debug;

/// Where a loaded library came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryOrigin {
    /// Found by the OS's own library search under this file name.
    System(String),
    /// Loaded from a file extracted out of the resource bundle.
    Extracted(PathBuf),
}

impl fmt::Display for LibraryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System(name) => write!(f, "system:{name}"),
            Self::Extracted(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A library the OS reported as loaded.
///
/// Holding the handle keeps the library mapped; this crate never unloads, so
/// handles are kept for the lifetime of the owning registry.
#[derive(Debug)]
pub struct LinkedLibrary {
    origin: LibraryOrigin,
    handle: Option<libloading::Library>,
}

impl LinkedLibrary {
    pub fn new(origin: LibraryOrigin, handle: libloading::Library) -> Self {
        Self {
            origin,
            handle: Some(handle),
        }
    }

    /// A record without an OS handle, for linkers that manage handles
    /// themselves.
    pub fn detached(origin: LibraryOrigin) -> Self {
        Self {
            origin,
            handle: None,
        }
    }

    pub fn origin(&self) -> &LibraryOrigin {
        &self.origin
    }

    pub fn handle(&self) -> Option<&libloading::Library> {
        self.handle.as_ref()
    }
}

/// The OS refused to load a library.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct LinkError {
    message: String,
}

impl LinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<libloading::Error> for LinkError {
    fn from(err: libloading::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Loads libraries into the current process.
pub trait DynamicLinker: fmt::Debug + Send + Sync {
    /// Loads a library by bare file name through the OS search path.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] if the OS cannot find or load the library.
    fn load_system(&self, file_name: &str) -> Result<LinkedLibrary, LinkError>;

    /// Loads the library at an absolute path.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] if the file is not a loadable library for this
    /// process or one of its dependencies is missing.
    fn load_path(&self, path: &Path) -> Result<LinkedLibrary, LinkError>;
}

/// [`DynamicLinker`] backed by `dlopen`/`LoadLibraryExW` through
/// `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibloadingLinker;

impl DynamicLinker for LibloadingLinker {
    fn load_system(&self, file_name: &str) -> Result<LinkedLibrary, LinkError> {
        debug!(file_name = %file_name, "Loading library from system search path");
        // SAFETY: loading runs the library's initialisers. Only libraries the
        // host application asked for by name are loaded here.
        let handle = unsafe { libloading::Library::new(file_name) }?;
        Ok(LinkedLibrary::new(
            LibraryOrigin::System(file_name.to_string()),
            handle,
        ))
    }

    fn load_path(&self, path: &Path) -> Result<LinkedLibrary, LinkError> {
        debug!(path = %path.display(), "Loading library from extracted file");
        // SAFETY: as above; the file was extracted from the application's own
        // resource bundle.
        let handle = unsafe { libloading::Library::new(path) }?;
        Ok(LinkedLibrary::new(
            LibraryOrigin::Extracted(path.to_path_buf()),
            handle,
        ))
    }
}
