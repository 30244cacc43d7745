//! Loader configuration from `nativelib.toml`.
//!
//! # Resolution Algorithm
//!
//! 1. Explicit path given by the caller
//! 2. `NATIVELIB_CONFIG_PATH` environment variable
//! 3. `nativelib.toml` in the current directory, then each parent directory
//! 4. `nativelib/nativelib.toml` under the user config directory
//! 5. Built-in defaults
//!
//! `NATIVELIB_TMPDIR`, when set, replaces the working directory of whatever
//! configuration was found.
//!
//! # Example
//!
//! ```toml
//! working_dir = "/var/tmp/myapp-natives"
//! resources = "lib/app.jar"
//! libc_probe_timeout_ms = 500
//! try_system_first = false
//! search_roots = ["vendor/natives"]
//! extractor = { domain = "plugins" }
//! ```

use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extractor::ExtractorKind;

/// File name searched for in the current and parent directories.
pub const CONFIG_FILE_NAME: &str = "nativelib.toml";
/// Environment variable naming an explicit config file.
pub const ENV_CONFIG_PATH: &str = "NATIVELIB_CONFIG_PATH";
/// Environment variable overriding the working directory.
pub const ENV_TMPDIR: &str = "NATIVELIB_TMPDIR";
/// Name of the working directory created under the system temp directory.
pub const DEFAULT_WORKING_DIR_NAME: &str = "tmplib";

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error when reading a config file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The config file is not valid TOML or has unknown keys.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// An explicitly requested config file does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
}

/// Settings for building a loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Process-wide extraction directory. Defaults to `tmplib` under the
    /// system temp directory.
    pub working_dir: Option<PathBuf>,

    /// Directory or zip archive holding the bundled libraries. Defaults to
    /// the directory of the running executable.
    pub resources: Option<PathBuf>,

    /// How long the musl probe may run before glibc is assumed.
    pub libc_probe_timeout_ms: u64,

    /// Ask the OS to find the library on its own search path before looking
    /// in the bundle.
    pub try_system_first: bool,

    /// Extra search roots tried after the built-in ones.
    pub search_roots: Vec<String>,

    /// Extraction strategy.
    pub extractor: ExtractorKind,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            resources: None,
            libc_probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            try_system_first: true,
            search_roots: Vec::new(),
            extractor: ExtractorKind::Shared,
        }
    }
}

impl LoaderConfig {
    /// Loads a config file from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or
    /// another [`ConfigError`] if it cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io(err)
            }
        })?;
        let config: Self = toml::from_str(&contents)?;
        debug!(path = %path.display(), "Loaded loader config");
        Ok(config)
    }

    /// Resolves configuration for the running process.
    ///
    /// Tries an explicit path, `NATIVELIB_CONFIG_PATH`, `nativelib.toml` in
    /// the current directory and its parents, then the user config
    /// directory. `NATIVELIB_TMPDIR` is applied last.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing, or a config file that
    /// was found cannot be read or parsed. Finding no file at all is not an
    /// error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from);
        let current = std::env::current_dir()?;
        let config = Self::resolve_from(explicit, env_path.as_deref(), &current)?;
        Ok(config.with_working_dir_override(std::env::var_os(ENV_TMPDIR)))
    }

    /// [`LoaderConfig::resolve`] with the environment passed in explicitly.
    ///
    /// # Errors
    ///
    /// Same as [`LoaderConfig::resolve`].
    pub fn resolve_from(
        explicit: Option<&Path>,
        env_path: Option<&Path>,
        start_dir: &Path,
    ) -> Result<Self, ConfigError> {
        // Step 1: Explicit path
        if let Some(path) = explicit {
            return Self::load(path);
        }

        // Step 2: Environment variable override
        if let Some(path) = env_path
            && path.exists()
        {
            return Self::load(path);
        }

        // Step 3: Current directory, then each parent
        for dir in start_dir.ancestors() {
            let path = dir.join(CONFIG_FILE_NAME);
            if path.is_file() {
                return Self::load(&path);
            }
        }

        // Step 4: User config directory
        if let Some(path) = user_config_path()
            && path.is_file()
        {
            return Self::load(&path);
        }

        debug!("No loader config found, using defaults");
        Ok(Self::default())
    }

    /// Replaces the working directory when `value` is set and non-empty.
    #[must_use]
    pub fn with_working_dir_override(mut self, value: Option<OsString>) -> Self {
        if let Some(dir) = value.filter(|dir| !dir.is_empty()) {
            self.working_dir = Some(PathBuf::from(dir));
        }
        self
    }

    /// The working directory to extract into.
    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_WORKING_DIR_NAME))
    }

    pub fn libc_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.libc_probe_timeout_ms)
    }
}

fn user_config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("nativelib").join(CONFIG_FILE_NAME))
}
