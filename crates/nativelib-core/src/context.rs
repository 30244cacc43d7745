//! Process-wide state shared by every loader.

use std::time::{Duration, SystemTime};

use tracing::{error, warn};

use crate::{
    error::{LoadError, Outcome, StartupFailure},
    platform::{DEFAULT_PROBE_TIMEOUT, PlatformIdentity, PlatformTag},
    registry::LoadRegistry,
    startup::{Phase, StartupState},
};

/// Platform cache, load registry and startup flag for one process.
///
/// Loaders built on the same context share one registry, so a library loaded
/// through any of them counts as loaded for all. Share it with `Arc`.
#[derive(Debug)]
pub struct NativeContext {
    platform: PlatformIdentity,
    registry: LoadRegistry,
    startup: StartupState,
}

impl NativeContext {
    pub fn new(platform: PlatformIdentity) -> Self {
        Self {
            platform,
            registry: LoadRegistry::new(),
            startup: StartupState::new(),
        }
    }

    /// Context for the running process with the default libc probe timeout.
    pub fn host() -> Self {
        Self::with_probe_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(timeout: Duration) -> Self {
        Self::new(PlatformIdentity::host(timeout))
    }

    /// The detected platform tag.
    pub fn platform(&self) -> PlatformTag {
        self.platform.detect()
    }

    pub fn identity(&self) -> &PlatformIdentity {
        &self.platform
    }

    pub fn registry(&self) -> &LoadRegistry {
        &self.registry
    }

    pub fn startup(&self) -> &StartupState {
        &self.startup
    }

    pub fn mark_startup_completed(&self) {
        self.startup.mark_completed();
    }

    pub fn is_startup_phase(&self) -> bool {
        self.startup.is_startup_phase()
    }

    /// When [`NativeContext::mark_startup_completed`] was first called.
    pub fn startup_completed_at(&self) -> Option<SystemTime> {
        self.startup.completed_at()
    }

    pub fn is_library_loaded(&self, name: &str) -> bool {
        self.registry.is_loaded(name)
    }

    /// Error describing why nothing can be loaded on this host.
    pub(crate) fn unsupported(&self) -> LoadError {
        LoadError::PlatformUnsupported {
            os: self.platform.os_name().to_string(),
            arch: self.platform.arch().to_string(),
        }
    }

    /// Applies the failure policy of `phase` to the result of `operation`.
    ///
    /// During startup a failure is fatal and comes back as
    /// [`StartupFailure`]. Afterwards it is logged and returned as
    /// [`Outcome::Unavailable`].
    ///
    /// # Errors
    ///
    /// Returns [`StartupFailure`] if `result` failed during startup.
    pub fn settle<T>(
        &self,
        phase: Phase,
        operation: &str,
        result: Result<T, LoadError>,
    ) -> Result<Outcome<T>, StartupFailure> {
        match (result, phase) {
            (Ok(value), _) => Ok(Outcome::Available(value)),
            (Err(err), Phase::Startup) => {
                let platform = self.platform();
                error!(
                    operation = %operation,
                    platform = %platform,
                    kind = err.kind(),
                    error = %err,
                    "Native library failure during startup"
                );
                Err(StartupFailure::new(operation, platform, err))
            }
            (Err(err), Phase::Running) => {
                warn!(
                    operation = %operation,
                    kind = err.kind(),
                    error = %err,
                    "Native library unavailable"
                );
                Ok(Outcome::Unavailable(err))
            }
        }
    }
}
