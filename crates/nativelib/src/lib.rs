//! # nativelib
//!
//! Process-wide entry points for loading native libraries that ship inside an
//! application's resource bundle.
//!
//! Libraries are looked up by logical name (`foo`), mapped to the platform
//! file name (`libfoo.so`, `foo.dll`, `libfoo.dylib`) and searched for under
//! `natives/{platform}/`, `{platform}/` and `META-INF/lib/{platform}/`. The
//! first call builds a loader from `nativelib.toml` (see
//! [`LoaderConfig`](nativelib_core::LoaderConfig)); every later call reuses
//! it.
//!
//! ## Startup and Degradation
//!
//! Until [`mark_startup_completed`] is called, any failure is returned as
//! [`Error::Startup`] and the application is expected to abort. After that,
//! failures are logged and returned as [`Outcome::Unavailable`]:
//!
//! ```no_run
//! fn main() -> Result<(), nativelib::Error> {
//!     let _dependencies = nativelib::extract_registered()?;
//!     let _core = nativelib::load_library("core", &[])?;
//!     nativelib::mark_startup_completed();
//!
//!     let accelerated = nativelib::load_library("simd", &[])?.is_available();
//!     println!("accelerated: {accelerated}");
//!     Ok(())
//! }
//! ```
//!
//! For finer control (several bundles, per-domain extraction, custom
//! linkers) build a [`NativeLoader`] directly.

mod global;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

pub use global::{Error, Global};
pub use nativelib_core::{
    DomainExtractor, Extractor, ExtractorKind, LibraryOrigin, LoadError, LoaderConfig,
    NativeContext, NativeLoader, Outcome, PlatformTag, SharedExtractor, StartupFailure,
};

static GLOBAL: Global = Global::new();

/// The process-wide state used by the free functions.
pub fn global() -> &'static Global {
    &GLOBAL
}

/// Loads the library `name`, searching `extra_roots` after the built-in
/// locations.
///
/// # Errors
///
/// Returns [`Error::Startup`] if loading fails before
/// [`mark_startup_completed`], or [`Error::Config`] if `nativelib.toml` is
/// invalid.
pub fn load_library(name: &str, extra_roots: &[&str]) -> Result<Outcome<LibraryOrigin>, Error> {
    GLOBAL.load_library(name, extra_roots)
}

/// Loads `{name}-{version}`.
///
/// # Errors
///
/// Same as [`load_library`].
pub fn load_versioned_library(
    name: &str,
    version: &str,
    extra_roots: &[&str],
) -> Result<Outcome<LibraryOrigin>, Error> {
    GLOBAL.load_versioned_library(name, version, extra_roots)
}

/// Extracts the dependency libraries listed in the bundle's
/// `AUTOEXTRACT.LIST` manifests.
///
/// # Errors
///
/// Same as [`load_library`].
pub fn extract_registered() -> Result<Outcome<Vec<PathBuf>>, Error> {
    GLOBAL.extract_registered()
}

/// Ends the startup phase: later failures degrade instead of aborting.
pub fn mark_startup_completed() {
    GLOBAL.mark_startup_completed();
}

pub fn is_startup_phase() -> bool {
    GLOBAL.is_startup_phase()
}

/// When [`mark_startup_completed`] was first called.
pub fn startup_completed_at() -> Option<SystemTime> {
    GLOBAL.startup_completed_at()
}

pub fn is_library_loaded(name: &str) -> bool {
    GLOBAL.is_library_loaded(name)
}

/// Replaces the extractor used by later loads.
///
/// # Errors
///
/// Same as [`load_library`].
pub fn set_extractor(extractor: Arc<dyn Extractor>) -> Result<Outcome<()>, Error> {
    GLOBAL.set_extractor(extractor)
}

/// The extractor currently in use.
///
/// # Errors
///
/// Same as [`load_library`].
pub fn extractor() -> Result<Outcome<Arc<dyn Extractor>>, Error> {
    GLOBAL.extractor()
}

/// Loads `name` from the bundle at `source` and reports whether it is now
/// loaded.
///
/// # Errors
///
/// Same as [`load_library`].
#[deprecated(note = "use `load_library`, which reports why a library is unavailable")]
pub fn load_native_library(source: &Path, name: &str) -> Result<bool, Error> {
    GLOBAL.load_from_source(source, name)
}
