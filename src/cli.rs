//! CLI argument parsing and command dispatch

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use overlay_patch::output::OutputConfig;

use crate::commands;

/// Overlay Patch - Build patched source trees without touching the checkout
#[derive(Parser, Debug)]
#[command(name = "overlay-patch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Materialize, publish and run the downstream step
    Run(commands::run::RunArgs),

    /// Materialize the overlay only and print its root
    Prepare(commands::prepare::PrepareArgs),

    /// Report tracked files of the checkout that differ from HEAD
    Check(commands::check::CheckArgs),

    /// List catalog patches and override mappings in application order
    Ls(commands::ls::LsArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level)?;
        let output = OutputConfig::from_env_and_flag(&self.color);

        match self.command {
            Commands::Run(args) => commands::run::execute(args, &output),
            Commands::Prepare(args) => commands::prepare::execute(args, &output),
            Commands::Check(args) => commands::check::execute(args, &output),
            Commands::Ls(args) => commands::ls::execute(args),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter: LevelFilter = level
        .parse()
        .map_err(|_| anyhow!("Invalid log level '{}': use error, warn, info, debug or trace", level))?;
    // A logger may already be installed when running under a test harness.
    let _ = env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        assert!(init_logging("loud").is_err());
        assert!(init_logging("debug").is_ok());
    }

    #[test]
    fn test_parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "overlay-patch",
            "run",
            "--overlay",
            "off",
            "--guard-cap",
            "5",
            "--exec",
            "make -j4",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.engine.overlay.as_deref(), Some("off"));
                assert_eq!(args.engine.guard_cap, Some(5));
                assert_eq!(args.exec.as_deref(), Some("make -j4"));
                assert!(args.json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
