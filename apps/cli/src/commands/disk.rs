//! Disk command implementation.

use colored::Colorize;
use ignition_core::Config;
use tracing::info;

use super::open_store;

/// Records the install disk for `identity`.
pub async fn execute(config: &Config, identity: &str, disk: &str) -> anyhow::Result<()> {
    let identity = identity.trim();
    let disk = disk.trim();
    if identity.is_empty() {
        anyhow::bail!("Machine identity must not be empty");
    }
    if !disk.starts_with("/dev/") {
        anyhow::bail!("Install disk must be a device path such as /dev/sda, got '{disk}'");
    }

    let (store, _) = open_store(config)?;
    let (previous, configured) = store
        .update(|state| {
            let previous = state.machine_disks.insert(identity.to_string(), disk.to_string());
            (previous, state.record(identity).is_some())
        })
        .await?;
    info!(%identity, %disk, previous = previous.as_deref().unwrap_or("-"), outcome = "success", "Install disk recorded");

    println!("{} {} will install to {}", "✓".green(), identity.bold(), disk.cyan());
    if configured {
        println!(
            "  {}",
            "This machine already has a configuration; the new disk applies after `ignite reset`.".yellow()
        );
    }
    Ok(())
}
