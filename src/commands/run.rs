//! # Run Command Implementation
//!
//! The run command executes the full pipeline:
//! 1. Scan the patch catalog and read the override mapping list
//! 2. Materialize the overlay (or, with the overlay disabled, publish onto
//!    the checkout)
//! 3. Run the downstream command against the resulting tree
//! 4. Check that the checkout's tracked files were left alone
//!
//! The process exits non-zero unless every catalog entry resolved and, in
//! direct mode, the checkout is clean afterwards. A fatal error still prints
//! the summary of what was applied, failed or skipped before it.

use anyhow::Result;
use clap::Args;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use overlay_patch::output::{emoji, format_outcome, OutputConfig};
use overlay_patch::phases::guard::format_listing;
use overlay_patch::phases::orchestrator::{self, RunFailure, RunMode, RunSummary};
use overlay_patch::tail::LogTail;
use overlay_patch::Error;

use super::EngineArgs;

/// Poll interval for following the build log.
const TAIL_POLL: Duration = Duration::from_millis(200);

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Downstream command, run through the shell inside the resulting tree.
    ///
    /// The tree path is also exported as `OVERLAY_PATCH_TREE`.
    #[arg(long, value_name = "COMMAND")]
    pub exec: Option<String>,

    /// Send the downstream command's output to this file and echo it while
    /// the command runs.
    #[arg(long, value_name = "FILE", requires = "exec")]
    pub build_log: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the run command
pub fn execute(args: RunArgs, output: &OutputConfig) -> Result<()> {
    let start_time = Instant::now();
    let config = args.engine.load()?;

    let build_log = args
        .build_log
        .as_ref()
        .map(|p| std::env::current_dir().map(|cwd| cwd.join(p)))
        .transpose()?;

    let result = orchestrator::execute_with(&config, |tree| match &args.exec {
        Some(command) => run_downstream(command, tree, build_log.as_deref()),
        None => Ok(()),
    });
    let (summary, failure) = match result {
        Ok(summary) => (summary, None),
        Err(RunFailure { error, partial }) => (*partial, Some(error)),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, output, config.engine.guard_listing_cap);
        eprintln!(
            "{} Finished in {:.2}s",
            emoji(output, "⏱️", "[TIME]"),
            start_time.elapsed().as_secs_f64()
        );
        if failure.is_none() {
            println!("{}", summary.tree.display());
        }
    }

    if let Some(error) = failure {
        return Err(error.into());
    }
    if !summary.is_success() {
        let unresolved = summary.unresolved().count();
        anyhow::bail!(
            "{} of {} catalog patch(es) did not resolve",
            unresolved,
            summary.patches.len()
        );
    }
    Ok(())
}

/// Run `command` through the platform shell inside `tree`.
fn run_downstream(command: &str, tree: &Path, build_log: Option<&Path>) -> overlay_patch::Result<()> {
    let mut cmd = shell(command);
    cmd.current_dir(tree).env("OVERLAY_PATCH_TREE", tree);

    let tail = match build_log {
        Some(path) => {
            let log = File::create(path)?;
            cmd.stdout(log.try_clone()?).stderr(log);
            Some(LogTail::spawn(path, TAIL_POLL))
        }
        None => None,
    };

    log::info!("Running downstream command: {}", command);
    let status = cmd.status();
    if let Some(tail) = tail {
        tail.stop()?;
    }

    let status = status.map_err(|e| Error::Downstream {
        command: command.to_string(),
        message: e.to_string(),
    })?;
    if !status.success() {
        return Err(Error::Downstream {
            command: command.to_string(),
            message: format!("exited with {}", status),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn print_summary(summary: &RunSummary, output: &OutputConfig, cap: usize) {
    let mode = match summary.mode {
        RunMode::Overlay => "overlay",
        RunMode::Direct => "direct",
    };
    eprintln!(
        "{} Mode: {} ({})",
        emoji(output, "🔧", "[MODE]"),
        mode,
        summary.tree.display()
    );

    for outcome in &summary.patches {
        eprintln!("  {}", format_outcome(output, outcome));
    }
    for sweep in &summary.sweeps {
        eprintln!("  sweep {}: {:?}", sweep.name, sweep.outcome);
    }

    let counts = summary.counts();
    eprintln!(
        "Patches: {} applied, {} fallback, {} failed, {} anchor missing, {} skipped",
        counts.applied, counts.fallback, counts.failed, counts.anchor_missing, counts.skipped
    );
    eprintln!("Overrides published: {}", summary.published.len());
    for missing in &summary.anchor_missing {
        eprintln!("  {} {}", emoji(output, "⚠️", "[ANCH]"), missing);
    }
    if let Some(marker) = &summary.registration {
        eprintln!("Registered on search path: {}", marker.display());
    }
    if let Some(guard) = &summary.guard {
        if guard.clean {
            eprintln!("{} Checkout clean", emoji(output, "✅", "[ OK ]"));
        } else {
            eprintln!(
                "{} Checkout has modified tracked files:\n{}",
                emoji(output, "⚠️", "[WARN]"),
                format_listing(&guard.modified_paths, cap)
            );
        }
    }
}
