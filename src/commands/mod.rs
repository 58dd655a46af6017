//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the
//! `overlay-patch` command-line tool. Each subcommand is defined in its own
//! file to keep the logic separated and maintainable.
//!
//! ## Structure
//!
//! Each command module typically contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` and performs the
//!   command's logic.
//!
//! Commands that need engine settings flatten [`EngineArgs`], which is the
//! only place flags and environment variables are folded into the
//! configuration file's values.

pub mod check;
pub mod completions;
pub mod ls;
pub mod prepare;
pub mod run;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::path::PathBuf;

use overlay_patch::config::{self, Config, OverlayMode};
use overlay_patch::defaults::CONFIG_FILE_NAME;

/// Settings shared by every command that loads the configuration
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Path to the configuration file.
    ///
    /// Defaults to `.overlay-patch.yaml` in the current directory; when that
    /// file does not exist, built-in defaults rooted at the current directory
    /// are used.
    #[arg(short, long, value_name = "FILE", env = "OVERLAY_PATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overlay mode: `off`, `default`, or a directory path.
    #[arg(long, value_name = "MODE", env = "OVERLAY_PATCH_OVERLAY")]
    pub overlay: Option<String>,

    /// Maximum number of paths listed by a dirty-tree warning.
    #[arg(long, value_name = "N", env = "OVERLAY_PATCH_GUARD_CAP")]
    pub guard_cap: Option<usize>,
}

impl EngineArgs {
    /// Load the configuration file and apply flag overrides.
    pub fn load(&self) -> Result<Config> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;

        let mut config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                config::from_file(cwd.join(path))
                    .with_context(|| format!("Failed to load config from {}", path.display()))?
            }
            None => {
                let default = cwd.join(CONFIG_FILE_NAME);
                if default.exists() {
                    config::from_file(&default).with_context(|| {
                        format!("Failed to load config from {}", default.display())
                    })?
                } else {
                    log::debug!("{} not found; using defaults", CONFIG_FILE_NAME);
                    config::parse("", &cwd)?
                }
            }
        };

        if let Some(mode) = &self.overlay {
            config.engine.overlay = match mode.parse::<OverlayMode>().map_err(|e| anyhow!(e))? {
                OverlayMode::Explicit(path) => OverlayMode::Explicit(cwd.join(path)),
                other => other,
            };
        }
        if let Some(cap) = self.guard_cap {
            config.engine.guard_listing_cap = cap;
        }
        Ok(config)
    }
}
