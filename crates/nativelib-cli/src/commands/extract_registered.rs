//! Extract the dependency libraries listed in a bundle's manifests.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use nativelib_core::{MANIFEST_NAME, NativeLoader, Outcome, StartupFailure};
use serde::Serialize;

use super::{BundleArgs, OutputFormat, print_json};

#[derive(Debug, Args)]
pub struct ExtractRegisteredArgs {
    #[command(flatten)]
    pub bundle: BundleArgs,

    /// Report a failure instead of exiting with an error
    #[arg(long)]
    pub optional: bool,
}

#[derive(Debug, Serialize)]
struct RegisteredReport {
    platform: &'static str,
    working_dir: PathBuf,
    extracted: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn extract_registered(
    loader: &NativeLoader,
    optional: bool,
) -> Result<RegisteredReport, StartupFailure> {
    if optional {
        loader.mark_startup_completed();
    }

    let (extracted, error) = match loader.extract_registered()? {
        Outcome::Available(paths) => (paths, None),
        Outcome::Unavailable(err) => (Vec::new(), Some(err.to_string())),
    };

    Ok(RegisteredReport {
        platform: loader.context().platform().as_str(),
        working_dir: loader.extractor().working_dir().to_path_buf(),
        extracted,
        error,
    })
}

/// Extracts every file named by the bundle's `AUTOEXTRACT.LIST` manifests.
///
/// # Errors
///
/// Returns an error if the bundle cannot be opened, or if extraction fails
/// and `--optional` was not given.
pub fn run(args: &ExtractRegisteredArgs) -> Result<()> {
    let loader = args.bundle.loader(false)?;
    let report = extract_registered(&loader, args.optional)?;

    if args.bundle.format == OutputFormat::Json {
        return print_json(&report);
    }

    if let Some(error) = &report.error {
        println!("{} extraction failed: {error}", style("!").yellow());
        return Ok(());
    }

    if report.extracted.is_empty() {
        println!("No {MANIFEST_NAME} entries for {}", report.platform);
        return Ok(());
    }

    for path in &report.extracted {
        println!("{}", path.display());
    }
    println!(
        "\n{} {} file(s) extracted into {}",
        style("✓").green(),
        report.extracted.len(),
        report.working_dir.display()
    );

    Ok(())
}
