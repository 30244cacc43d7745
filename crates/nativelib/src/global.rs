//! The process-wide loader behind the free functions of this crate.

use std::{
    convert::Infallible,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::SystemTime,
};

use nativelib_core::{
    ConfigError, Extractor, LibraryOrigin, LoadError, LoaderConfig, NativeContext, NativeLoader,
    Outcome, StartupFailure, versioned_name,
};
use tracing::debug;

/// Errors returned by the process-wide entry points.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// `nativelib.toml` could not be read or parsed.
    #[error("failed to load native library configuration")]
    Config(#[from] ConfigError),

    /// A native library operation failed during startup.
    #[error(transparent)]
    Startup(#[from] StartupFailure),
}

/// Lazily built loader sharing one [`NativeContext`].
///
/// The context exists from the first call; the loader is built on first use
/// from the resolved [`LoaderConfig`]. Tests create their own `Global`
/// instead of touching the process-wide one.
#[derive(Debug)]
pub struct Global {
    context: OnceLock<Arc<NativeContext>>,
    loader: OnceLock<NativeLoader>,
    config_path: Option<PathBuf>,
    init: Mutex<()>,
}

impl Default for Global {
    fn default() -> Self {
        Self::new()
    }
}

impl Global {
    pub const fn new() -> Self {
        Self {
            context: OnceLock::new(),
            loader: OnceLock::new(),
            config_path: None,
            init: Mutex::new(()),
        }
    }

    /// Reads configuration from `path` instead of searching for it.
    pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
            ..Self::new()
        }
    }

    pub fn context(&self) -> &Arc<NativeContext> {
        self.context.get_or_init(|| Arc::new(NativeContext::host()))
    }

    /// Installs `loader` as the one used from now on.
    ///
    /// # Errors
    ///
    /// Hands `loader` back if a loader is already in place, or if this
    /// `Global` already uses a different context.
    pub fn install(&self, loader: NativeLoader) -> Result<(), NativeLoader> {
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if self.loader.get().is_some() {
            return Err(loader);
        }
        let context = self.context.get_or_init(|| Arc::clone(loader.context()));
        if !Arc::ptr_eq(context, loader.context()) {
            return Err(loader);
        }
        self.loader.set(loader)
    }

    /// Loads `name`; see [`NativeLoader::load`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if loading fails during startup, or
    /// [`Error::Config`] if the configuration is invalid.
    pub fn load_library(
        &self,
        name: &str,
        extra_roots: &[&str],
    ) -> Result<Outcome<LibraryOrigin>, Error> {
        let operation = format!("load({})", name.trim());
        match self.loader_for(&operation)? {
            Ok(loader) => Ok(loader.load(name, extra_roots)?),
            Err(degraded) => Ok(degraded),
        }
    }

    /// Loads `{name}-{version}`, or `name` when `version` is empty.
    ///
    /// # Errors
    ///
    /// Same as [`Global::load_library`].
    pub fn load_versioned_library(
        &self,
        name: &str,
        version: &str,
        extra_roots: &[&str],
    ) -> Result<Outcome<LibraryOrigin>, Error> {
        self.load_library(&versioned_name(name.trim(), version), extra_roots)
    }

    /// Extracts the libraries listed in the bundle manifests; see
    /// [`NativeLoader::extract_registered`].
    ///
    /// # Errors
    ///
    /// Same as [`Global::load_library`].
    pub fn extract_registered(&self) -> Result<Outcome<Vec<PathBuf>>, Error> {
        match self.loader_for("extract_registered")? {
            Ok(loader) => Ok(loader.extract_registered()?),
            Err(degraded) => Ok(degraded),
        }
    }

    pub fn mark_startup_completed(&self) {
        self.context().mark_startup_completed();
    }

    pub fn is_startup_phase(&self) -> bool {
        self.context().is_startup_phase()
    }

    pub fn startup_completed_at(&self) -> Option<SystemTime> {
        self.context().startup_completed_at()
    }

    pub fn is_library_loaded(&self, name: &str) -> bool {
        self.context().is_library_loaded(name.trim())
    }

    /// Replaces the extractor of the process-wide loader.
    ///
    /// # Errors
    ///
    /// Same as [`Global::load_library`].
    pub fn set_extractor(&self, extractor: Arc<dyn Extractor>) -> Result<Outcome<()>, Error> {
        match self.loader_for("set_extractor")? {
            Ok(loader) => {
                loader.set_extractor(extractor);
                Ok(Outcome::Available(()))
            }
            Err(degraded) => Ok(degraded),
        }
    }

    /// The extractor of the process-wide loader.
    ///
    /// # Errors
    ///
    /// Same as [`Global::load_library`].
    pub fn extractor(&self) -> Result<Outcome<Arc<dyn Extractor>>, Error> {
        match self.loader_for("extractor")? {
            Ok(loader) => Ok(Outcome::Available(loader.extractor())),
            Err(degraded) => Ok(degraded),
        }
    }

    /// Loads `name` from the bundle at `source` with a one-off loader that
    /// shares this context. Returns whether the library is now loaded.
    ///
    /// # Errors
    ///
    /// Same as [`Global::load_library`].
    pub fn load_from_source(&self, source: &Path, name: &str) -> Result<bool, Error> {
        let context = Arc::clone(self.context());
        let phase = context.startup().phase();
        let operation = format!("load({})", name.trim());

        let built = LoaderConfig::resolve(self.config_path.as_deref()).map(|config| {
            NativeLoader::builder()
                .with_config(config)
                .with_source_path(source)
                .with_context(Arc::clone(&context))
                .build()
        })?;

        let outcome = match built {
            Ok(loader) => loader.load(name, &[])?,
            Err(err) => context.settle(phase, &operation, Err::<LibraryOrigin, _>(err))?,
        };
        Ok(outcome.is_available())
    }

    /// The loader, or the degraded outcome to return when it cannot be built
    /// after startup.
    fn loader_for<T>(&self, operation: &str) -> Result<Result<&NativeLoader, Outcome<T>>, Error> {
        let context = Arc::clone(self.context());
        let phase = context.startup().phase();
        match self.loader()? {
            Ok(loader) => Ok(Ok(loader)),
            Err(err) => match context.settle(phase, operation, Err::<Infallible, _>(err))? {
                Outcome::Unavailable(err) => Ok(Err(Outcome::Unavailable(err))),
                Outcome::Available(never) => match never {},
            },
        }
    }

    fn loader(&self) -> Result<Result<&NativeLoader, LoadError>, ConfigError> {
        if let Some(loader) = self.loader.get() {
            return Ok(Ok(loader));
        }

        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(loader) = self.loader.get() {
            return Ok(Ok(loader));
        }

        let config = LoaderConfig::resolve(self.config_path.as_deref())?;
        let built = NativeLoader::builder()
            .with_config(config)
            .with_context(Arc::clone(self.context()))
            .build();
        match built {
            Ok(loader) => {
                debug!("Initialized process-wide native loader");
                Ok(Ok(self.loader.get_or_init(|| loader)))
            }
            Err(err) => Ok(Err(err)),
        }
    }
}
