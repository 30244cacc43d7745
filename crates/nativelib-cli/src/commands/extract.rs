//! Extract a library from a bundle without loading it.
//!
//! Extracted files are scheduled for removal when the process exits, so
//! `--output` is needed to keep a copy.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use nativelib_core::{LoadError, NativeLoader};
use serde::Serialize;
use tracing::debug;

use super::{BundleArgs, OutputFormat, print_json};

#[derive(Debug, Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub bundle: BundleArgs,

    /// Logical library name, e.g. `foo` for `libfoo.so`
    pub name: String,

    /// Extra search root tried after the built-in ones (repeatable)
    #[arg(short, long = "root")]
    pub roots: Vec<String>,

    /// Directory to copy the extracted library into
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Extracted {
    name: String,
    platform: &'static str,
    candidate: String,
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    copied_to: Option<PathBuf>,
}

/// Extracts `name` from the first candidate directory that has it.
fn extract_library(
    loader: &NativeLoader,
    name: &str,
    extra_roots: &[String],
) -> Result<Extracted, LoadError> {
    let roots: Vec<&str> = extra_roots.iter().map(String::as_str).collect();
    let (candidate, path) = loader.extract_library(name, &roots)?;
    debug!(name = %name.trim(), candidate = %candidate, "Extracted without loading");

    Ok(Extracted {
        name: name.trim().to_string(),
        platform: loader.context().platform().as_str(),
        candidate: candidate.directory().to_string(),
        path,
        copied_to: None,
    })
}

fn copy_into(path: &Path, output: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("extracted path {} has no file name", path.display()))?;
    let dest = output.join(file_name);
    fs::copy(path, &dest)
        .with_context(|| format!("failed to copy {} to {}", path.display(), dest.display()))?;
    Ok(dest)
}

/// Extracts the library and prints where it went.
///
/// # Errors
///
/// Returns an error if the bundle cannot be opened, the library is not in
/// it, or writing the extracted file fails.
pub fn run(args: &ExtractArgs) -> Result<()> {
    let loader = args.bundle.loader(false)?;
    let mut extracted = extract_library(&loader, &args.name, &args.roots)
        .with_context(|| format!("failed to extract {}", args.name))?;

    if let Some(output) = &args.output {
        extracted.copied_to = Some(copy_into(&extracted.path, output)?);
    }

    if args.bundle.format == OutputFormat::Json {
        return print_json(&extracted);
    }

    println!(
        "{} extracted {} from {}",
        style("✓").green(),
        style(&extracted.name).cyan(),
        extracted.candidate
    );
    println!("  {}", extracted.path.display());
    match &extracted.copied_to {
        Some(dest) => println!("  copied to {}", dest.display()),
        None => println!(
            "  {}",
            style("removed on exit; pass --output to keep a copy").dim()
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nativelib_core::{
        DirectorySource, ExtractorKind, NativeContext, PlatformIdentity, PlatformTag,
    };
    use tempfile::TempDir;

    use super::*;

    fn bundle(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, contents) in files {
            let path = dir.path().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents.as_bytes()).unwrap();
        }
        dir
    }

    fn loader(bundle: &Path, work: &Path, tag: PlatformTag) -> NativeLoader {
        NativeLoader::builder()
            .with_context(Arc::new(NativeContext::new(PlatformIdentity::fixed(tag))))
            .with_source(Arc::new(DirectorySource::new(bundle)))
            .with_working_dir(work)
            .with_extractor_kind(ExtractorKind::Shared)
            .build()
            .unwrap()
    }

    #[test]
    fn test_extract_library_uses_first_matching_candidate() {
        // Arrange
        let bundle = bundle(&[
            ("linux_64/libfoo.so", "root"),
            ("META-INF/lib/linux_64/libfoo.so", "meta-inf"),
        ]);
        let work = TempDir::new().unwrap();
        let loader = loader(bundle.path(), work.path(), PlatformTag::Linux64);

        // Act
        let extracted = extract_library(&loader, "foo", &[]).unwrap();

        // Assert
        assert_eq!(extracted.candidate, "linux_64/");
        assert_eq!(extracted.platform, "linux_64");
        assert!(extracted.path.starts_with(work.path()));
        assert_eq!(fs::read_to_string(&extracted.path).unwrap(), "root");
    }

    #[test]
    fn test_extract_library_searches_extra_roots_last() {
        let bundle = bundle(&[("vendor/linux_64/libfoo.so", "vendor")]);
        let work = TempDir::new().unwrap();
        let loader = loader(bundle.path(), work.path(), PlatformTag::Linux64);

        let extracted = extract_library(&loader, "foo", &["vendor".to_string()]).unwrap();

        assert_eq!(extracted.candidate, "vendor/linux_64/");
    }

    #[test]
    fn test_extract_library_reports_every_searched_directory() {
        let bundle = bundle(&[]);
        let work = TempDir::new().unwrap();
        let loader = loader(bundle.path(), work.path(), PlatformTag::Linux64);

        let err = extract_library(&loader, "foo", &[]).unwrap_err();

        let LoadError::ResourceNotFound { searched, .. } = err else {
            panic!("expected ResourceNotFound, got {err:?}");
        };
        assert_eq!(
            searched,
            ["natives/linux_64/", "linux_64/", "META-INF/lib/linux_64/"]
        );
    }

    #[test]
    fn test_extract_library_rejects_unknown_platform() {
        let bundle = bundle(&[]);
        let work = TempDir::new().unwrap();
        let loader = loader(bundle.path(), work.path(), PlatformTag::Unknown);

        let err = extract_library(&loader, "foo", &[]).unwrap_err();

        assert!(matches!(err, LoadError::PlatformUnsupported { .. }));
    }

    #[test]
    fn test_extract_library_trims_name() {
        let bundle = bundle(&[("natives/linux_64/libfoo.so", "natives")]);
        let work = TempDir::new().unwrap();
        let loader = loader(bundle.path(), work.path(), PlatformTag::Linux64);

        let extracted = extract_library(&loader, "  foo ", &[]).unwrap();

        assert_eq!(extracted.name, "foo");
        assert_eq!(extracted.candidate, "natives/linux_64/");
        assert!(!loader.is_library_loaded("foo"));
    }

    #[test]
    fn test_copy_into_creates_output_directory() {
        let source = TempDir::new().unwrap();
        let path = source.path().join("libfoo.so");
        fs::write(&path, b"elf").unwrap();
        let output = TempDir::new().unwrap();
        let target = output.path().join("keep");

        let dest = copy_into(&path, &target).unwrap();

        assert_eq!(dest, target.join("libfoo.so"));
        assert_eq!(fs::read(dest).unwrap(), b"elf");
    }
}
