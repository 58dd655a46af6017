//! # Prepare Command Implementation
//!
//! Materializes the overlay without publishing overrides or running a
//! downstream step, then prints the overlay root on stdout. Useful for
//! inspecting what the catalog produces.

use anyhow::Result;
use clap::Args;

use overlay_patch::output::{format_outcome, OutputConfig};
use overlay_patch::phases::orchestrator;

use super::EngineArgs;

/// Materialize the overlay and print its root
#[derive(Args, Debug)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Execute the `prepare` command.
pub fn execute(args: PrepareArgs, output: &OutputConfig) -> Result<()> {
    let config = args.engine.load()?;
    if !config.engine.overlay.is_enabled() {
        anyhow::bail!(
            "Overlay mode is disabled; pass --overlay default or --overlay <DIR> to prepare an overlay"
        );
    }

    let prepared = orchestrator::execute_prepare(&config)?;
    for outcome in &prepared.outcomes {
        eprintln!("  {}", format_outcome(output, outcome));
    }
    println!("{}", prepared.root.display());

    if !prepared.all_resolved() {
        let unresolved = prepared
            .outcomes
            .iter()
            .filter(|o| !o.is_resolved())
            .count();
        anyhow::bail!("{} catalog patch(es) did not resolve", unresolved);
    }
    Ok(())
}
