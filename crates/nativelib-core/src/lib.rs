//! Extraction and loading of native libraries bundled with an application.
//!
//! Applications ship platform-specific shared libraries inside a resource
//! bundle (an unpacked directory or a zip archive) under per-platform
//! directories such as `natives/linux_64/libfoo.so`. This crate detects which
//! platform the process runs on, finds the matching file, copies it to a
//! working directory and asks the OS to load it, exactly once per process.
//!
//! # Key Components
//!
//! - **Platform detection**: [`PlatformIdentity`] maps OS, CPU and libc to a
//!   [`PlatformTag`], probing for musl at most once
//! - **Resources**: [`ResourceSource`] implementations for directories, zip
//!   archives and in-memory tables
//! - **Extraction**: [`SharedExtractor`] and [`DomainExtractor`] copy files
//!   out of the bundle
//! - **Loading**: [`NativeLoader`] ties it together and applies the startup
//!   failure policy
//!
//! # Example
//!
//! ```no_run
//! use nativelib_core::{LoaderConfig, NativeLoader};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoaderConfig::resolve(None)?;
//! let loader = NativeLoader::builder().with_config(config).build()?;
//!
//! // Fatal while the application is still starting.
//! loader.load("foo", &[])?.into_result()?;
//! loader.mark_startup_completed();
//!
//! // From now on a missing library only disables the feature needing it.
//! if !loader.load("optional", &[])?.is_available() {
//!     println!("running without optional acceleration");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! [`NativeLoader`] is `Send + Sync`. Concurrent calls to
//! [`NativeLoader::load`] for the same name perform one extraction and one OS
//! load; the other callers wait for it and observe the result. Checking
//! whether a library is already loaded never blocks.

mod cleanup;
mod config;
mod context;
mod error;
mod extractor;
mod linker;
mod loader;
mod platform;
mod registry;
mod resolver;
mod resource;
mod startup;

/// Platform detection.
///
/// Types for classifying the host and naming library files per platform.
pub use platform::{
    DEFAULT_PROBE_TIMEOUT, LibcProbe, LibcVariant, OsFamily, ParsePlatformTagError,
    PlatformIdentity, PlatformTag, Processor, ShellLibcProbe, versioned_name,
};

/// Error types and the post-startup result type.
pub use error::{LoadError, Outcome, StartupFailure};

/// Resource bundles.
pub use resource::{DirectorySource, MemorySource, ResourceSource, ZipSource, open_source};

/// Extraction strategies.
pub use extractor::{
    DomainExtractor, Extractor, ExtractorKind, MANIFEST_NAME, SharedExtractor, build_extractor,
};

/// Candidate search locations.
pub use resolver::{ARCHIVE_ROOT, Candidate, DEFAULT_SEARCH_ROOT, META_INF_LIB_ROOT, Resolver};

/// The OS linker seam.
pub use linker::{DynamicLinker, LibloadingLinker, LibraryOrigin, LinkError, LinkedLibrary};

/// Process-wide state.
pub use context::NativeContext;
pub use registry::LoadRegistry;
pub use startup::{Phase, StartupState};

/// Loading.
pub use loader::{NativeLoader, NativeLoaderBuilder};

/// Configuration.
pub use config::{
    CONFIG_FILE_NAME, ConfigError, DEFAULT_WORKING_DIR_NAME, ENV_CONFIG_PATH, ENV_TMPDIR,
    LoaderConfig,
};

/// Exit-time removal of extracted files.
pub use cleanup::{CleanupEntry, CleanupList, delete_on_exit};
