//! Show the platform tag the loader would use.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use nativelib_core::{PlatformIdentity, PlatformTag};
use serde::Serialize;

use super::{OutputFormat, identity, load_config, print_json};

#[derive(Debug, Args)]
pub struct PlatformArgs {
    /// Logical library name used for the file name examples
    #[arg(default_value = "foo")]
    pub name: String,

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

#[derive(Debug, Serialize, PartialEq, Eq)]
struct PlatformReport {
    tag: &'static str,
    known: bool,
    os: String,
    arch: String,
    file_names: Vec<String>,
}

impl PlatformReport {
    fn new(identity: &PlatformIdentity, name: &str) -> Self {
        let tag = identity.detect();
        Self {
            tag: tag.as_str(),
            known: tag.is_known(),
            os: identity.os_name().to_string(),
            arch: identity.arch().to_string(),
            file_names: tag.file_names(name),
        }
    }
}

/// Detects the platform and prints its tag.
///
/// # Errors
///
/// Returns an error if JSON output cannot be written.
pub fn run(args: &PlatformArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let report = PlatformReport::new(&identity(args.platform, &config), &args.name);

    if args.format == OutputFormat::Json {
        return print_json(&report);
    }

    println!("{:<12} {}", style("PLATFORM").bold(), report.tag);
    println!("{:<12} {}", style("OS").bold(), report.os);
    println!("{:<12} {}", style("ARCH").bold(), report.arch);

    if report.known {
        println!(
            "{:<12} {}",
            style("FILE NAMES").bold(),
            report.file_names.join(", ")
        );
    } else {
        println!(
            "\n{} no native libraries are packaged for this platform",
            style("✗").red()
        );
    }

    Ok(())
}
