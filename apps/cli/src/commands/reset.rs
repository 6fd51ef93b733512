//! Reset command implementation.

use anyhow::Context;
use colored::Colorize;
use ignition_core::{Config, FileSnapshotStore, SnapshotPersistence};
use inquire::Confirm;
use tracing::info;

/// Deletes the saved snapshot and bundle.
///
/// Works on the files directly so a snapshot whose bundle is incomplete can
/// still be cleared.
pub fn execute(config: &Config, force: bool) -> anyhow::Result<()> {
    let persistence = FileSnapshotStore::new(&config.state_dir);
    if !persistence.snapshot_path().exists() {
        println!("{}", "Nothing to reset.".dimmed());
        return Ok(());
    }

    if !force {
        let proceed = Confirm::new(&format!("Delete saved state in {}?", config.state_dir.display()))
            .with_default(false)
            .prompt()
            .context("Failed to read confirmation")?;
        if !proceed {
            println!("{}", "Aborted.".yellow());
            return Ok(());
        }
    }

    persistence.clear().context("Failed to delete saved state")?;
    info!(state_dir = %config.state_dir.display(), outcome = "success", "State reset");
    println!("{} Saved state deleted", "✓".green());
    Ok(())
}
