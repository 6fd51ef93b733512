//! The fixed bootstrap plan.
//!
//! | idx | phase                | auto-advance |
//! |-----|----------------------|--------------|
//! | 0   | `cluster-info`       | when params come from the config file |
//! | 1   | `provider-auth`      | yes |
//! | 2   | `boot-image`         | yes |
//! | 3   | `boot`               | yes |
//! | 4   | `wait-control-plane` | yes |
//! | 5   | `wait-workers`       | no, the operator confirms |
//! | 6   | `cluster-bootstrap`  | yes |
//! | 7   | `propagate-secrets`  | yes |
//!
//! A run over state that already has a control plane resumes at
//! `wait-workers`.

use std::sync::Arc;

use async_trait::async_trait;
use ignition_abstraction::SecretData;
use ignition_core::bootstrap::{execute_bootstrap, fetch_kubeconfig, poll_health};
use ignition_core::config::CLUSTER_FIELDS;
use ignition_core::config::schema::{params_from_values, params_to_values, validate_params};
use ignition_core::image::build_boot_image;
use ignition_core::rendezvous::{CallbackHandler, OAuthFlow, OAuthProvider, RendezvousError, callback_server};
use ignition_core::state::{ClusterSaveState, NodeCounts, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::BootstrapContext;
use crate::error::{OrchestratorError, Result};
use crate::orchestrator::Orchestrator;
use crate::phase::{EntryAction, Phase, PhaseContext, PhaseKind};

pub const CLUSTER_INFO: &str = "cluster-info";
pub const PROVIDER_AUTH: &str = "provider-auth";
pub const BOOT_IMAGE: &str = "boot-image";
pub const BOOT: &str = "boot";
pub const WAIT_CONTROL_PLANE: &str = "wait-control-plane";
pub const WAIT_WORKERS: &str = "wait-workers";
pub const CLUSTER_BOOTSTRAP: &str = "cluster-bootstrap";
pub const PROPAGATE_SECRETS: &str = "propagate-secrets";

/// Index of `wait-workers`, where a run over existing state resumes.
pub const WAIT_WORKERS_INDEX: usize = 5;

/// Builds the eight phases over `ctx`.
pub fn bootstrap_plan(ctx: &Arc<BootstrapContext>) -> Vec<Phase> {
    let ctx = || Arc::clone(ctx);
    vec![
        Phase::new(CLUSTER_INFO, PhaseKind::Form, Arc::new(ClusterInfo(ctx())))
            .with_auto_advance(ctx().params_from_file()),
        Phase::new(PROVIDER_AUTH, PhaseKind::Background, Arc::new(ProviderAuth(ctx()))),
        Phase::new(BOOT_IMAGE, PhaseKind::Background, Arc::new(BootImagePhase(ctx()))),
        Phase::new(BOOT, PhaseKind::Informational, Arc::new(Boot(ctx()))),
        Phase::new(WAIT_CONTROL_PLANE, PhaseKind::Background, Arc::new(WaitControlPlane(ctx()))),
        Phase::new(WAIT_WORKERS, PhaseKind::Background, Arc::new(WaitWorkers(ctx()))).requires_confirmation(),
        Phase::new(CLUSTER_BOOTSTRAP, PhaseKind::Background, Arc::new(ClusterBootstrap(ctx()))),
        Phase::new(PROPAGATE_SECRETS, PhaseKind::Background, Arc::new(PropagateSecrets(ctx()))),
    ]
}

/// Where a run over `state` starts.
pub fn resume_index(state: &ClusterSaveState) -> usize {
    if state.has_control_plane() { WAIT_WORKERS_INDEX } else { 0 }
}

/// An orchestrator over the plan, positioned for the persisted state.
pub async fn orchestrator_for(ctx: &Arc<BootstrapContext>) -> Orchestrator {
    let state = ctx.store().snapshot().await;
    let start = resume_index(&state);
    Orchestrator::new(bootstrap_plan(ctx)).starting_at(start)
}

/// Waits until `ready` holds for the store's node counts.
async fn wait_for_counts(
    store: &StateStore,
    cancel: &CancellationToken,
    mut ready: impl FnMut(NodeCounts) -> bool,
) -> Result<NodeCounts> {
    let mut counts = store.subscribe();
    loop {
        let current = *counts.borrow_and_update();
        if ready(current) {
            return Ok(current);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            changed = counts.changed() => {
                if changed.is_err() {
                    return Err(OrchestratorError::Cancelled);
                }
            }
        }
    }
}

struct ClusterInfo(Arc<BootstrapContext>);

#[async_trait]
impl EntryAction for ClusterInfo {
    async fn enter(&self, _phase: &PhaseContext) -> Result<()> {
        let params = if let Some(params) = &self.0.config().cluster {
            info!(cluster = %params.cluster_name, "Using cluster parameters from configuration");
            params.clone()
        } else {
            let current = self
                .0
                .store()
                .snapshot()
                .await
                .bootstrap_config
                .as_ref()
                .map(params_to_values)
                .unwrap_or_default();
            let values = self.0.form().fill(CLUSTER_FIELDS, current).await?;
            params_from_values(&values)?
        };
        validate_params(&params)?;

        let name = params.cluster_name.clone();
        self.0.store().update(move |state| state.bootstrap_config = Some(params)).await?;
        info!(cluster = %name, outcome = "success", "Cluster parameters saved");
        Ok(())
    }
}

/// Runs the OAuth flow for each provider in turn and records the tokens.
///
/// The callback listener lives only as long as the flows.
async fn authorize(ctx: &BootstrapContext, providers: &[OAuthProvider], cancel: &CancellationToken) -> Result<()> {
    let rendezvous = Arc::clone(ctx.rendezvous());
    let handler = providers.iter().fold(CallbackHandler::new(Arc::clone(&rendezvous)), |handler, provider| {
        handler.route(provider.callback_path.clone(), provider.name.clone())
    });
    let callback = &ctx.config().callback;
    let mut server = callback_server(callback.addr(), handler);
    let addr = server.start().await.map_err(|e| RendezvousError::Listener(e.to_string()))?;

    let flow = OAuthFlow::new(rendezvous, callback.redirect_base_for(addr.port()));
    let mut result = Ok(());
    for provider in providers {
        match flow.authenticate(provider, cancel).await {
            Ok(token) => ctx.record_token(&provider.name, token),
            Err(e) => {
                warn!(provider = %provider.name, error = %e, "Authorization failed");
                result = Err(e.into());
                break;
            }
        }
    }
    server.stop().await;
    result
}

struct ProviderAuth(Arc<BootstrapContext>);

#[async_trait]
impl EntryAction for ProviderAuth {
    async fn enter(&self, phase: &PhaseContext) -> Result<()> {
        let providers = self.0.config().oauth_providers();
        if providers.is_empty() {
            info!("No OAuth providers configured, skipping authorization");
            return Ok(());
        }
        authorize(&self.0, &providers, phase.cancellation()).await
    }
}

struct BootImagePhase(Arc<BootstrapContext>);

#[async_trait]
impl EntryAction for BootImagePhase {
    async fn enter(&self, _phase: &PhaseContext) -> Result<()> {
        let image = &self.0.config().image;
        if !image.enabled {
            info!("Boot image download disabled, skipping");
            return Ok(());
        }
        let params = self.0.params().await?;
        let factory = Arc::clone(&self.0.collaborators().images);
        let boot_image = build_boot_image(factory.as_ref(), &params, &image.output_dir).await?;
        info!(path = %boot_image.path.display(), "Write this image to a boot medium for every machine");
        self.0.set_boot_image(boot_image);
        Ok(())
    }
}

struct Boot(Arc<BootstrapContext>);

#[async_trait]
impl EntryAction for Boot {
    async fn enter(&self, _phase: &PhaseContext) -> Result<()> {
        let addr = self.0.ensure_issuance().await?;
        info!(%addr, "Power on the machines. The first one to request its configuration becomes the control plane");
        Ok(())
    }
}

struct WaitControlPlane(Arc<BootstrapContext>);

#[async_trait]
impl EntryAction for WaitControlPlane {
    async fn enter(&self, phase: &PhaseContext) -> Result<()> {
        info!("Waiting for the first machine to request its configuration");
        wait_for_counts(self.0.store(), phase.cancellation(), |counts| counts.control_planes > 0).await?;
        let state = self.0.store().snapshot().await;
        if let Some(cp) = state.first_control_plane() {
            info!(
                hostname = %cp.hostname,
                address = %cp.address,
                endpoint = state.cluster_endpoint.as_deref().unwrap_or("-"),
                outcome = "success",
                "Control plane configured"
            );
        }
        Ok(())
    }
}

struct WaitWorkers(Arc<BootstrapContext>);

#[async_trait]
impl EntryAction for WaitWorkers {
    async fn enter(&self, phase: &PhaseContext) -> Result<()> {
        // A resumed run enters here directly, so the server may not be up yet.
        self.0.ensure_issuance().await?;

        let min_workers = self.0.config().bootstrap.min_workers;
        let mut last = None;
        let counts = wait_for_counts(self.0.store(), phase.cancellation(), |counts| {
            if last != Some(counts.workers) {
                info!(workers = counts.workers, min_workers, "Waiting for workers");
                last = Some(counts.workers);
            }
            counts.workers >= min_workers
        })
        .await?;
        info!(workers = counts.workers, outcome = "success", "Enough workers have joined");
        Ok(())
    }
}

struct ClusterBootstrap(Arc<BootstrapContext>);

#[async_trait]
impl EntryAction for ClusterBootstrap {
    async fn enter(&self, phase: &PhaseContext) -> Result<()> {
        let store = self.0.store();
        let config = self.0.config();
        let state = store.snapshot().await;
        let endpoint = state.first_control_plane().ok_or(OrchestratorError::NoControlPlane)?.address;
        let bundle = store.bundle().await.ok_or(OrchestratorError::MissingBundle)?;

        let client = self.0.collaborators().connector.connect(&bundle, endpoint).await?;
        if state.bootstrapped {
            info!(%endpoint, "Cluster already bootstrapped, skipping bootstrap call");
        } else {
            execute_bootstrap(client.as_ref()).await?;
            store.update(|state| state.bootstrapped = true).await?;
        }

        let nodes = store.snapshot().await.cluster_nodes();
        poll_health(client.as_ref(), &nodes, config.bootstrap.health_timeout(), phase.cancellation()).await?;
        let path = fetch_kubeconfig(client.as_ref(), &config.state_dir).await?;
        self.0.set_kubeconfig(path);
        Ok(())
    }
}

struct PropagateSecrets(Arc<BootstrapContext>);

#[async_trait]
impl EntryAction for PropagateSecrets {
    async fn enter(&self, phase: &PhaseContext) -> Result<()> {
        let state = self.0.store().snapshot().await;
        let params = state.bootstrap_config.clone().ok_or(OrchestratorError::MissingParams)?;

        // Tokens are held in memory only; a resumed run never saw provider-auth.
        let held = self.0.tokens();
        let missing: Vec<OAuthProvider> =
            self.0.config().oauth_providers().into_iter().filter(|p| !held.contains_key(&p.name)).collect();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|p| p.name.as_str()).collect();
            info!(providers = ?names, "Authorizing providers without a token");
            authorize(&self.0, &missing, phase.cancellation()).await?;
        }

        let mut data = SecretData::new();
        data.insert("cluster_name".to_string(), params.cluster_name);
        if let Some(endpoint) = state.cluster_endpoint {
            data.insert("cluster_endpoint".to_string(), endpoint);
        }
        if let Some(domain) = params.base_domain {
            data.insert("base_domain".to_string(), domain);
        }
        if let Some(ip) = params.load_balancer_ip {
            data.insert("load_balancer_ip".to_string(), ip);
        }
        for (provider, token) in self.0.tokens() {
            data.insert(format!("{provider}_token"), token.access_token);
        }

        let target = &self.0.config().secrets;
        self.0.collaborators().secrets.put(&target.namespace, &target.name, &data).await?;
        info!(
            namespace = %target.namespace,
            name = %target.name,
            keys = data.len(),
            outcome = "success",
            "Platform credentials propagated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_starts_at_first_phase() {
        assert_eq!(resume_index(&ClusterSaveState::default()), 0);
    }
}
