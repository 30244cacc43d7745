//! List the bundle locations searched for a library.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use nativelib_core::{PlatformTag, Resolver};
use serde::Serialize;

use super::{OutputFormat, identity, load_config, print_json};

#[derive(Debug, Args)]
pub struct CandidatesArgs {
    /// Logical library name, e.g. `foo` for `libfoo.so`
    pub name: String,

    /// Extra search root tried after the built-in ones (repeatable)
    #[arg(short, long = "root")]
    pub roots: Vec<String>,

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

#[derive(Debug, Serialize)]
struct CandidateRow {
    root: String,
    directory: String,
    paths: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CandidatesReport {
    name: String,
    platform: &'static str,
    candidates: Vec<CandidateRow>,
}

fn report(tag: PlatformTag, name: &str, roots: &[String]) -> CandidatesReport {
    let file_names = tag.file_names(name);
    let candidates = Resolver::new(tag)
        .candidate_paths(roots)
        .into_iter()
        .map(|candidate| CandidateRow {
            paths: file_names
                .iter()
                .map(|file_name| candidate.resource_path(file_name))
                .collect(),
            root: candidate.root().to_string(),
            directory: candidate.directory().to_string(),
        })
        .collect();

    CandidatesReport {
        name: name.to_string(),
        platform: tag.as_str(),
        candidates,
    }
}

/// Prints every resource path the loader would try for `name`, in order.
///
/// # Errors
///
/// Returns an error if the name is empty, the config cannot be read or the
/// platform is unknown.
pub fn run(args: &CandidatesArgs) -> Result<()> {
    let name = args.name.trim();
    if name.is_empty() {
        bail!("library name is empty");
    }

    let config = load_config(args.config.as_deref())?;
    let identity = identity(args.platform, &config);
    let tag = identity.detect();
    if !tag.is_known() {
        bail!(
            "no native libraries are packaged for os={} arch={}",
            identity.os_name(),
            identity.arch()
        );
    }

    let roots: Vec<String> = config
        .search_roots
        .iter()
        .chain(&args.roots)
        .cloned()
        .collect();
    let report = report(tag, name, &roots);

    if args.format == OutputFormat::Json {
        return print_json(&report);
    }

    println!(
        "{:<4} {:<30} {}",
        style("#").bold(),
        style("DIRECTORY").bold(),
        style("RESOURCE").bold()
    );
    println!("{}", "-".repeat(80));

    for (index, candidate) in report.candidates.iter().enumerate() {
        for path in &candidate.paths {
            println!("{:<4} {:<30} {path}", index + 1, candidate.directory);
        }
    }

    println!(
        "\n{} {} location(s) for {} on {}",
        style("✓").green(),
        report.candidates.len(),
        style(&report.name).cyan(),
        report.platform
    );

    Ok(())
}
