//! Extract and load a library, applying the startup failure policy.

use anyhow::Result;
use clap::Args;
use console::style;
use nativelib_core::{LibraryOrigin, NativeLoader, Outcome, StartupFailure};
use serde::Serialize;

use super::{BundleArgs, OutputFormat, print_json};

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub bundle: BundleArgs,

    /// Logical library name, e.g. `foo` for `libfoo.so`
    pub name: String,

    /// Extra search root tried after the built-in ones (repeatable)
    #[arg(short, long = "root")]
    pub roots: Vec<String>,

    /// Treat the library as optional: report it as unavailable instead of
    /// failing
    #[arg(long)]
    pub optional: bool,

    /// Skip the OS library search path and load from the bundle only
    #[arg(long)]
    pub no_system: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct LoadReport {
    name: String,
    platform: &'static str,
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn load(
    loader: &NativeLoader,
    name: &str,
    roots: &[String],
    optional: bool,
) -> Result<LoadReport, StartupFailure> {
    if optional {
        loader.mark_startup_completed();
    }

    let roots: Vec<&str> = roots.iter().map(String::as_str).collect();
    let outcome = loader.load(name, &roots)?;

    let mut report = LoadReport {
        name: name.trim().to_string(),
        platform: loader.context().platform().as_str(),
        available: outcome.is_available(),
        origin: None,
        error_kind: None,
        error: None,
    };
    match outcome {
        Outcome::Available(origin) => report.origin = Some(describe(&origin)),
        Outcome::Unavailable(err) => {
            report.error_kind = Some(err.kind());
            report.error = Some(err.to_string());
        }
    }
    Ok(report)
}

fn describe(origin: &LibraryOrigin) -> String {
    match origin {
        LibraryOrigin::System(file_name) => format!("system search path ({file_name})"),
        LibraryOrigin::Extracted(path) => path.display().to_string(),
    }
}

/// Loads the library and prints where it came from.
///
/// # Errors
///
/// Returns an error if the bundle cannot be opened, or if loading fails and
/// `--optional` was not given.
pub fn run(args: &LoadArgs) -> Result<()> {
    let loader = args.bundle.loader(!args.no_system)?;
    let report = load(&loader, &args.name, &args.roots, args.optional)?;

    if args.bundle.format == OutputFormat::Json {
        return print_json(&report);
    }

    match (&report.origin, &report.error) {
        (Some(origin), _) => println!(
            "{} loaded {} on {} from {origin}",
            style("✓").green(),
            style(&report.name).cyan(),
            report.platform
        ),
        (None, error) => println!(
            "{} {} is unavailable on {}: {}",
            style("!").yellow(),
            style(&report.name).cyan(),
            report.platform,
            error.as_deref().unwrap_or_default()
        ),
    }

    Ok(())
}
