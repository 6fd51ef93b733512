//! Run command implementation.

use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use ignition_core::{Config, FactoryClient, FileSecretSink, TalosConnector, TemplateConfigGenerator};
use ignition_orchestrator::{
    AcceptDefaults, BootstrapContext, Collaborators, FormInput, OrchestratorHandle, PhaseKind, RunOutcome,
    RunStatus, orchestrator_for,
};
use inquire::Confirm;
use tracing::{info, warn};

use super::open_store;
use crate::form::PromptForm;

/// Collaborators that talk to real machines and services.
fn collaborators(config: &Config) -> Collaborators {
    Collaborators {
        generator: Arc::new(TemplateConfigGenerator::new().with_kubernetes_port(config.bootstrap.kubernetes_port)),
        connector: Arc::new(TalosConnector::new().with_api_port(config.bootstrap.api_port)),
        secrets: Arc::new(FileSecretSink::in_state_dir(&config.state_dir)),
        images: Arc::new(FactoryClient::new(config.image.factory_url.clone())),
    }
}

/// Runs the bootstrap to completion, failure or interruption.
pub async fn execute(config: Config, auto_confirm: bool) -> anyhow::Result<RunOutcome> {
    ensure_state_dir(&config)?;
    let (store, resumed) = open_store(&config)?;
    if resumed {
        let counts = store.counts();
        info!(
            state_dir = %config.state_dir.display(),
            control_planes = counts.control_planes,
            workers = counts.workers,
            "Resuming from saved state"
        );
    }

    let form: Arc<dyn FormInput> = if auto_confirm { Arc::new(AcceptDefaults) } else { Arc::new(PromptForm) };
    let collaborators = collaborators(&config);
    let ctx = Arc::new(BootstrapContext::new(config, store, collaborators, form));

    let orchestrator = orchestrator_for(&ctx).await;
    let handle = orchestrator.handle();
    let progress = tokio::spawn(follow(handle.clone(), auto_confirm));
    let interrupt = tokio::spawn(cancel_on_ctrl_c(handle.clone()));

    let outcome = orchestrator.run().await;
    ctx.shutdown().await;
    interrupt.abort();
    progress.abort();

    report(&ctx, &outcome);
    Ok(outcome)
}

/// Prints phase changes and asks the operator to confirm phases that wait
/// for it.
async fn follow(handle: OrchestratorHandle, auto_confirm: bool) {
    let mut snapshots = handle.subscribe();
    let mut shown = None;
    let mut prompted = None;

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.status != RunStatus::Running && snapshot.status != RunStatus::Pending {
            return;
        }

        if shown != Some(snapshot.index) && snapshot.index < snapshot.total {
            shown = Some(snapshot.index);
            let marker = match snapshot.kind {
                PhaseKind::Form => "?",
                PhaseKind::Background => "…",
                PhaseKind::Informational => "i",
            };
            println!(
                "{} [{}/{}] {}",
                marker.cyan(),
                snapshot.index + 1,
                snapshot.total,
                snapshot.name.bold()
            );
        }

        if snapshot.awaiting_confirmation && prompted != Some(snapshot.index) {
            prompted = Some(snapshot.index);
            if auto_confirm {
                handle.confirm();
            } else {
                let handle = handle.clone();
                let name = snapshot.name;
                tokio::task::spawn_blocking(move || confirm_phase(&handle, name));
            }
        }

        if snapshots.changed().await.is_err() {
            return;
        }
    }
}

fn confirm_phase(handle: &OrchestratorHandle, name: &str) {
    let answer = Confirm::new(&format!("Phase '{name}' is complete. Continue?"))
        .with_default(true)
        .prompt();
    match answer {
        Ok(true) => handle.confirm(),
        Ok(false) => {
            println!("{}", "Stopping. Saved state lets a later run resume.".yellow());
            handle.cancel();
        }
        Err(e) => {
            warn!(phase = name, error = %e, "Could not read confirmation, cancelling run");
            handle.cancel();
        }
    }
}

async fn cancel_on_ctrl_c(handle: OrchestratorHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, cancelling run");
        handle.cancel();
    }
}

fn report(ctx: &BootstrapContext, outcome: &RunOutcome) {
    println!();
    match outcome {
        RunOutcome::Completed => {
            println!("{} {}", "✓".green(), "Cluster bootstrap complete".bold());
            if let Some(image) = ctx.boot_image() {
                println!("  Boot image: {}", image.path.display());
            }
            if let Some(kubeconfig) = ctx.kubeconfig() {
                println!("  Kubeconfig: {}", kubeconfig.display().to_string().green());
                println!("  Try: {}", format!("kubectl --kubeconfig {} get nodes", kubeconfig.display()).cyan());
            }
        }
        RunOutcome::Failed { phase, cause } => {
            eprintln!("{} Phase {} failed: {}", "✗".red(), phase.bold(), cause);
            eprintln!("  Fix the problem and run {} again to resume.", "ignite run".cyan());
        }
        RunOutcome::Cancelled => {
            println!("{} Run cancelled", "!".yellow());
        }
    }
}

/// Checks the state directory is usable before anything is started.
fn ensure_state_dir(config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("Failed to create state directory {}", config.state_dir.display()))
}
