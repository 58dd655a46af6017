//! # Ls Command Implementation
//!
//! Lists what a run would apply, in application order: catalog patches with
//! their target hint and fallback binding, override mappings with their
//! transforms, and the sweeps.
//!
//! This command is a safe, read-only operation that does not modify any files.

use anyhow::Result;
use clap::Args;

use overlay_patch::catalog::Catalog;
use overlay_patch::phases::orchestrator;

use super::EngineArgs;

/// List catalog patches and override mappings in application order
#[derive(Args, Debug)]
pub struct LsArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Show only the patch identities, one per line.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Execute the `ls` command.
pub fn execute(args: LsArgs) -> Result<()> {
    let config = args.engine.load()?;
    let engine = &config.engine;
    let catalog = Catalog::scan(&engine.catalog_dir, &engine.patch_suffix)?;

    if args.quiet {
        for patch in catalog.patches() {
            println!("{}", patch.id);
        }
        return Ok(());
    }

    println!(
        "Patches ({}) from {}:",
        catalog.len(),
        engine.catalog_dir.display()
    );
    for patch in catalog.patches() {
        let target = patch
            .target_hint
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "?".to_string());
        match config.registry.fallback_for(&patch.id) {
            Some(fallback) => println!(
                "  {:>3} {} -> {} [fallback: {}]",
                patch.ordinal, patch.id, target, fallback.name
            ),
            None => println!("  {:>3} {} -> {}", patch.ordinal, patch.id, target),
        }
    }

    let mappings = orchestrator::load_mappings(engine)?;
    if !mappings.is_empty() {
        println!("Overrides ({}):", mappings.len());
        for mapping in &mappings {
            let mut line = format!(
                "  {} -> {}",
                mapping.source.display(),
                mapping.destination.display()
            );
            if !mapping.transforms.is_empty() {
                line.push_str(&format!(" [{}]", mapping.transforms.join(", ")));
            }
            println!("{}", line);
        }
    }

    let sweeps: Vec<_> = config.registry.sweeps().collect();
    if !sweeps.is_empty() {
        println!("Sweeps:");
        for sweep in sweeps {
            println!(
                "  {} ({}) on {}",
                sweep.name,
                sweep.procedure.kind(),
                sweep.target.display()
            );
        }
    }
    Ok(())
}
