//! # Check Command Implementation
//!
//! Runs the dirty-tree guard against a checkout and reports every tracked
//! file that differs from `HEAD`. The command exits non-zero when the
//! checkout is not clean, which makes it usable as a CI gate after a build.
//!
//! This command is a safe, read-only operation that does not modify any files.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use overlay_patch::output::{emoji, OutputConfig};
use overlay_patch::phases::guard::{self, format_listing};

use super::EngineArgs;

/// Report tracked files of the checkout that differ from HEAD
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Checkout to check instead of the configured source root.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

/// Execute the `check` command.
pub fn execute(args: CheckArgs, output: &OutputConfig) -> Result<()> {
    let config = args.engine.load()?;
    let root = args.root.unwrap_or(config.engine.source_root);

    let report = guard::check(&root)?;
    if report.clean {
        println!("{} {} is clean", emoji(output, "✅", "[ OK ]"), root.display());
        return Ok(());
    }

    println!(
        "{} {} tracked file(s) modified in {}:",
        emoji(output, "❌", "[DIRTY]"),
        report.modified_paths.len(),
        root.display()
    );
    println!(
        "{}",
        format_listing(&report.modified_paths, config.engine.guard_listing_cap)
    );
    anyhow::bail!("Checkout has modified tracked files")
}
