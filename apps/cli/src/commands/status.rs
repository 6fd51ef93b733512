//! Status command implementation.

use colored::Colorize;
use comfy_table::{Cell, Color as ComfyColor, Table};
use ignition_abstraction::NodeRole;
use ignition_core::{ClusterSaveState, Config, KUBECONFIG_FILE};
use serde_json::json;

use super::open_store;

/// Shows the saved cluster state.
pub async fn execute(config: &Config, json_output: bool) -> anyhow::Result<()> {
    let (store, found) = open_store(config)?;
    let state = store.snapshot().await;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&status_json(config, found, &state))?);
    } else {
        print_human(config, found, &state);
    }
    Ok(())
}

fn status_json(config: &Config, found: bool, state: &ClusterSaveState) -> serde_json::Value {
    let nodes: Vec<_> = state
        .records_by_arrival()
        .into_iter()
        .map(|record| {
            json!({
                "identity": record.identity_key,
                "hostname": record.hostname,
                "role": record.role.to_string(),
                "address": record.address.to_string(),
                "mac": record.mac,
                "first_seen_at": record.first_seen_at.to_rfc3339(),
            })
        })
        .collect();
    json!({
        "state_dir": config.state_dir.display().to_string(),
        "saved": found,
        "cluster_name": state.bootstrap_config.as_ref().map(|p| p.cluster_name.clone()),
        "cluster_endpoint": state.cluster_endpoint,
        "bootstrapped": state.bootstrapped,
        "control_planes": state.count(NodeRole::ControlPlane),
        "workers": state.count(NodeRole::Worker),
        "nodes": nodes,
        "machine_disks": state.machine_disks,
    })
}

fn print_human(config: &Config, found: bool, state: &ClusterSaveState) {
    println!("{}", "Ignition Status".bold().cyan());
    println!();
    println!("  State: {}", config.state_dir.display().to_string().green());
    if !found {
        println!("  {}", "No saved state".yellow());
        println!();
        println!("  Start a bootstrap with {}", "ignite run".cyan());
        return;
    }

    let cluster = state.bootstrap_config.as_ref().map_or("-", |p| p.cluster_name.as_str());
    println!("  Cluster: {}", cluster.bold());
    println!("  Endpoint: {}", state.cluster_endpoint.as_deref().unwrap_or("-"));
    let bootstrapped = if state.bootstrapped { "yes".green() } else { "no".yellow() };
    println!("  Bootstrapped: {}", bootstrapped);
    let kubeconfig = config.state_dir.join(KUBECONFIG_FILE);
    if kubeconfig.exists() {
        println!("  Kubeconfig: {}", kubeconfig.display());
    }
    println!();

    let records = state.records_by_arrival();
    if records.is_empty() {
        println!("  {}", "No machines have requested a configuration yet".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Hostname", "Role", "Address", "MAC", "Install disk", "First seen"]);
    for record in records {
        let role = match record.role {
            NodeRole::ControlPlane => Cell::new(record.role.to_string()).fg(ComfyColor::Cyan),
            NodeRole::Worker => Cell::new(record.role.to_string()),
        };
        let disk = state.machine_disks.get(&record.identity_key).map_or("-", String::as_str);
        table.add_row(vec![
            Cell::new(&record.hostname),
            role,
            Cell::new(record.address.to_string()),
            Cell::new(if record.mac.is_empty() { "-" } else { record.mac.as_str() }),
            Cell::new(disk),
            Cell::new(record.first_seen_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ]);
    }
    println!("{table}");
}
