//! Error types for native library resolution, extraction and loading.

use std::{io, path::PathBuf};

use crate::{linker::LinkError, platform::PlatformTag};

/// Errors that can occur while making a native library available.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The logical library name was empty.
    #[error("library name is null or empty")]
    InvalidName,

    /// The running process has no platform tag.
    #[error("no native library available for this platform (os: {os}, arch: {arch})")]
    PlatformUnsupported { os: String, arch: String },

    /// No candidate location yielded the resource.
    #[error(
        "native library `{name}` not found for {platform} (searched: {})",
        .searched.join(", ")
    )]
    ResourceNotFound {
        name: String,
        platform: PlatformTag,
        searched: Vec<String>,
    },

    /// Reading the resource or copying it to disk failed.
    #[error("failed to extract `{resource}` to {}", .path.display())]
    ExtractionIo {
        resource: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The OS dynamic loader refused the extracted file.
    #[error("OS loader rejected {}: {source}", .path.display())]
    OsLoadRejected {
        path: PathBuf,
        /// Candidate directories tried before giving up.
        tried: Vec<String>,
        #[source]
        source: LinkError,
    },

    /// The working directory could not be created.
    #[error("unable to create native library working directory {}", .path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The resource bundle could not be opened.
    #[error("unable to open native resource bundle {}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An auto-extraction manifest was malformed.
    #[error("invalid extraction manifest {path}: {message}")]
    Manifest { path: String, message: String },
}

impl LoadError {
    /// Short machine-friendly name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidName => "invalid_name",
            Self::PlatformUnsupported { .. } => "platform_unsupported",
            Self::ResourceNotFound { .. } => "resource_not_found",
            Self::ExtractionIo { .. } => "extraction_io",
            Self::OsLoadRejected { .. } => "os_load_rejected",
            Self::DirectoryCreationFailed { .. } => "directory_creation_failed",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::Manifest { .. } => "manifest",
        }
    }

    /// Whether this error concerns one candidate directory, so a later
    /// candidate may still succeed.
    pub fn is_candidate_local(&self) -> bool {
        matches!(
            self,
            Self::ResourceNotFound { .. }
                | Self::ExtractionIo { .. }
                | Self::OsLoadRejected { .. }
        )
    }
}

/// A failure raised while the application is still starting up.
///
/// Native libraries are assumed essential before the host reports that it is
/// ready, so every [`LoadError`] in that window becomes this fatal error. The
/// underlying cause is available through [`std::error::Error::source`].
#[derive(Debug, thiserror::Error)]
#[error("STARTUP FAILURE: {operation} failed on platform {platform}")]
pub struct StartupFailure {
    operation: String,
    platform: PlatformTag,
    #[source]
    source: LoadError,
}

impl StartupFailure {
    pub fn new(operation: impl Into<String>, platform: PlatformTag, source: LoadError) -> Self {
        Self {
            operation: operation.into(),
            platform,
            source,
        }
    }

    /// The public operation that failed, e.g. `load(foo)`.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Platform tag detected when the failure happened.
    pub fn platform(&self) -> PlatformTag {
        self.platform
    }

    pub fn error(&self) -> &LoadError {
        &self.source
    }

    pub fn into_error(self) -> LoadError {
        self.source
    }
}

/// Result of a public operation once startup has completed.
///
/// After startup a failure no longer aborts anything: it is logged and handed
/// back as [`Outcome::Unavailable`] so the caller can disable whatever needed
/// the library.
#[derive(Debug)]
#[must_use = "an unavailable library should be handled or explicitly ignored"]
pub enum Outcome<T> {
    Available(T),
    Unavailable(LoadError),
}

impl<T> Outcome<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// The value, discarding the error.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }

    /// The error, if the operation degraded.
    pub fn error(&self) -> Option<&LoadError> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable(err) => Some(err),
        }
    }

    /// Converts into a plain [`Result`].
    ///
    /// # Errors
    ///
    /// Returns the [`LoadError`] carried by [`Outcome::Unavailable`].
    pub fn into_result(self) -> Result<T, LoadError> {
        match self {
            Self::Available(value) => Ok(value),
            Self::Unavailable(err) => Err(err),
        }
    }
}
