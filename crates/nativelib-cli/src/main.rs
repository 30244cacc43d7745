//! Command-line tool for inspecting native library bundles.
//!
//! Usage:
//! ```bash
//! natives platform                                   # Show the detected platform
//! natives candidates foo --root vendor               # Where `foo` would be looked up
//! natives extract --source app.jar foo               # Copy `foo` out of a bundle
//! natives load --source app.jar foo                  # Extract and load `foo`
//! natives extract-registered --source app.jar        # Extract AUTOEXTRACT.LIST entries
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "natives", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the detected platform tag and library file names
    Platform(commands::platform::PlatformArgs),

    /// List the bundle locations searched for a library
    Candidates(commands::candidates::CandidatesArgs),

    /// Extract a library from a bundle without loading it
    Extract(commands::extract::ExtractArgs),

    /// Extract and load a library from a bundle
    Load(commands::load::LoadArgs),

    /// Extract the dependencies listed in the bundle's manifests
    ExtractRegistered(commands::extract_registered::ExtractRegisteredArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().context("failed to parse log directive")?),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Platform(args) => commands::platform::run(args),
        Command::Candidates(args) => commands::candidates::run(args),
        Command::Extract(args) => commands::extract::run(args),
        Command::Load(args) => commands::load::run(args),
        Command::ExtractRegistered(args) => commands::extract_registered::run(args),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::error::ErrorKind;
    use nativelib_core::PlatformTag;

    use super::*;
    use crate::commands::OutputFormat;

    fn parse_command(argv: &[&str]) -> Result<Command, clap::Error> {
        Ok(Cli::try_parse_from(argv.iter().copied())?.command)
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let err = Cli::try_parse_from(["natives"]).expect_err("expected clap parse error");
        assert!(
            matches!(
                err.kind(),
                ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand | ErrorKind::MissingSubcommand
            ),
            "unexpected error kind: {:?}",
            err.kind()
        );
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        let err =
            Cli::try_parse_from(["natives", "unpack"]).expect_err("expected clap parse error");
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_cli_platform_defaults_to_table_and_example_name() -> Result<(), clap::Error> {
        let command = parse_command(&["natives", "platform"])?;

        let Command::Platform(args) = command else {
            panic!("expected Command::Platform");
        };

        assert_eq!(args.format, OutputFormat::Table);
        assert_eq!(args.name, "foo");
        assert!(args.platform.is_none());
        Ok(())
    }

    #[test]
    fn test_cli_platform_parses_tag_override() -> Result<(), clap::Error> {
        let command = parse_command(&["natives", "platform", "--platform", "osx_64"])?;

        let Command::Platform(args) = command else {
            panic!("expected Command::Platform");
        };

        assert_eq!(args.platform, Some(PlatformTag::Osx64));
        Ok(())
    }

    #[test]
    fn test_cli_platform_accepts_config_file() -> Result<(), clap::Error> {
        let command = parse_command(&["natives", "platform", "--config", "ci/nativelib.toml"])?;

        let Command::Platform(args) = command else {
            panic!("expected Command::Platform");
        };

        assert_eq!(args.config.as_deref(), Some(Path::new("ci/nativelib.toml")));
        Ok(())
    }

    #[test]
    fn test_cli_platform_rejects_unknown_tag() {
        let err = Cli::try_parse_from(["natives", "platform", "--platform", "beos_64"])
            .expect_err("expected clap parse error");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_candidates_collects_repeated_roots() -> Result<(), clap::Error> {
        let command = parse_command(&[
            "natives",
            "candidates",
            "foo",
            "--root",
            "vendor",
            "--root",
            "plugins/natives",
            "--format",
            "json",
        ])?;

        let Command::Candidates(args) = command else {
            panic!("expected Command::Candidates");
        };

        assert_eq!(args.name, "foo");
        assert_eq!(args.roots, ["vendor", "plugins/natives"]);
        assert_eq!(args.format, OutputFormat::Json);
        assert!(args.config.is_none());
        Ok(())
    }

    #[test]
    fn test_cli_extract_requires_source() {
        let err = Cli::try_parse_from(["natives", "extract", "foo"])
            .expect_err("expected clap parse error");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_load_parses_bundle_options() -> Result<(), clap::Error> {
        let command = parse_command(&[
            "natives",
            "load",
            "--source",
            "lib/app.jar",
            "--domain",
            "plugins",
            "--optional",
            "--no-system",
            "foo",
        ])?;

        let Command::Load(args) = command else {
            panic!("expected Command::Load");
        };

        assert_eq!(args.name, "foo");
        assert_eq!(args.bundle.source, Path::new("lib/app.jar"));
        assert_eq!(args.bundle.domain.as_deref(), Some("plugins"));
        assert!(args.optional);
        assert!(args.no_system);
        Ok(())
    }

    #[test]
    fn test_cli_extract_registered_takes_no_name() -> Result<(), clap::Error> {
        let command = parse_command(&["natives", "extract-registered", "--source", "bundle"])?;

        let Command::ExtractRegistered(args) = command else {
            panic!("expected Command::ExtractRegistered");
        };

        assert_eq!(args.bundle.source, Path::new("bundle"));
        assert!(!args.optional);
        Ok(())
    }
}
