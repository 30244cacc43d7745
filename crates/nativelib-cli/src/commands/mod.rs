//! CLI command implementations.

pub mod candidates;
pub mod extract;
pub mod extract_registered;
pub mod load;
pub mod platform;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use nativelib_core::{
    ExtractorKind, LoaderConfig, NativeContext, NativeLoader, PlatformIdentity, PlatformTag,
};
use serde::Serialize;

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

/// Options shared by the commands that read a bundle.
#[derive(Debug, Args)]
pub struct BundleArgs {
    /// Directory or zip archive holding the bundled libraries
    #[arg(short, long)]
    pub source: PathBuf,

    /// Directory to extract into (defaults to the configured working directory)
    #[arg(short, long)]
    pub working_dir: Option<PathBuf>,

    /// Extract into a private directory named after this domain
    #[arg(short, long)]
    pub domain: Option<String>,

    /// Config file to use instead of searching for nativelib.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Platform tag to assume instead of detecting the host
    #[arg(short, long)]
    pub platform: Option<PlatformTag>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl BundleArgs {
    /// Builds a loader for the bundle, starting from the resolved config.
    pub fn loader(&self, try_system_first: bool) -> Result<NativeLoader> {
        let config = load_config(self.config.as_deref())?;

        let mut builder = NativeLoader::builder()
            .with_config(config)
            .with_source_path(&self.source)
            .try_system_first(try_system_first);
        if let Some(dir) = &self.working_dir {
            builder = builder.with_working_dir(dir);
        }
        if let Some(domain) = &self.domain {
            builder = builder.with_extractor_kind(ExtractorKind::Domain(domain.clone()));
        }
        if let Some(tag) = self.platform {
            let context = NativeContext::new(PlatformIdentity::fixed(tag));
            builder = builder.with_context(Arc::new(context));
        }

        builder.build().with_context(|| {
            format!("failed to open bundle at {}", self.source.display())
        })
    }
}

/// The explicit config file, or the one found by the usual search.
pub fn load_config(explicit: Option<&Path>) -> Result<LoaderConfig> {
    LoaderConfig::resolve(explicit).context("failed to load loader config")
}

/// The host identity, or one pinned to `tag`.
pub fn identity(tag: Option<PlatformTag>, config: &LoaderConfig) -> PlatformIdentity {
    match tag {
        Some(tag) => PlatformIdentity::fixed(tag),
        None => PlatformIdentity::host(config.libc_probe_timeout()),
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_load_config_reads_libc_check_timeout() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nativelib.toml");
        fs::write(&path, "libc_probe_timeout_ms = 250\n").unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.libc_probe_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_config_missing_explicit_file_fails() {
        let temp = TempDir::new().unwrap();

        let err = load_config(Some(&temp.path().join("absent.toml"))).unwrap_err();

        assert!(err.to_string().contains("loader config"));
    }

    #[test]
    fn test_identity_pinned_tag_ignores_host() {
        let identity = identity(Some(PlatformTag::Aix64), &LoaderConfig::default());

        assert_eq!(identity.detect(), PlatformTag::Aix64);
    }
}
