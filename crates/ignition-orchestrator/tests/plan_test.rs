//! End-to-end runs of the bootstrap plan against in-memory collaborators.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ignition_abstraction::mock::{
    MemorySecretSink, MockClusterClient, MockConfigGenerator, MockConnector, MockImageFactory,
};
use ignition_abstraction::{ClusterParams, HealthEvent};
use ignition_core::config::{Config, FieldDescriptor, ProviderConfig};
use ignition_core::issuance::MachineConfigService;
use ignition_core::rendezvous::{ProviderKind, RendezvousError};
use ignition_core::state::{FileSnapshotStore, StateStore};
use ignition_core::KUBECONFIG_FILE;
use ignition_orchestrator::plan::{
    CLUSTER_BOOTSTRAP, CLUSTER_INFO, PROPAGATE_SECRETS, PROVIDER_AUTH, WAIT_CONTROL_PLANE, WAIT_WORKERS,
};
use ignition_orchestrator::{
    AcceptDefaults, BootstrapContext, Collaborators, FormInput, OrchestratorHandle,
    PhaseSnapshot, RunOutcome, WAIT_WORKERS_INDEX, orchestrator_for,
};
use tempfile::TempDir;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn wait_until(handle: &OrchestratorHandle, pred: impl Fn(&PhaseSnapshot) -> bool) -> PhaseSnapshot {
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for phase")
        .expect("orchestrator dropped")
        .clone()
}

/// Counts calls and answers with fixed values.
#[derive(Default)]
struct ScriptedForm {
    answers: BTreeMap<String, String>,
    calls: AtomicUsize,
}

#[async_trait]
impl FormInput for ScriptedForm {
    async fn fill(
        &self,
        fields: &'static [FieldDescriptor],
        current: BTreeMap<String, String>,
    ) -> ignition_orchestrator::Result<BTreeMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut values = AcceptDefaults.fill(fields, current).await?;
        values.extend(self.answers.clone());
        Ok(values)
    }
}

fn params() -> ClusterParams {
    ClusterParams {
        cluster_name: "lab".to_string(),
        http_hostname: "127.0.0.1".to_string(),
        base_domain: Some("lab.example".to_string()),
        ..ClusterParams::default()
    }
}

struct Fixture {
    _dir: TempDir,
    config: Config,
    store: Arc<StateStore>,
    generator: Arc<MockConfigGenerator>,
    client: Arc<MockClusterClient>,
    connector: Arc<MockConnector>,
    secrets: Arc<MemorySecretSink>,
    images: Arc<MockImageFactory>,
    form: Arc<ScriptedForm>,
}

impl Fixture {
    fn new(client: MockClusterClient) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.state_dir = dir.path().join("state");
        config.cluster = Some(params());
        config.issuance.bind = Some("127.0.0.1:0".parse().unwrap());
        config.bootstrap.min_workers = 1;
        config.bootstrap.health_timeout_secs = 10;
        config.image.output_dir = dir.path().join("images");

        let store = Arc::new(StateStore::new(Arc::new(FileSnapshotStore::new(&config.state_dir))));
        let client = Arc::new(client);
        Self {
            _dir: dir,
            config,
            store,
            generator: Arc::new(MockConfigGenerator::new()),
            connector: Arc::new(MockConnector::new(Arc::clone(&client))),
            client,
            secrets: Arc::new(MemorySecretSink::new()),
            images: Arc::new(MockImageFactory::new()),
            form: Arc::new(ScriptedForm::default()),
        }
    }

    fn context(&self) -> Arc<BootstrapContext> {
        let collaborators = Collaborators {
            generator: self.generator.clone(),
            connector: self.connector.clone(),
            secrets: self.secrets.clone(),
            images: self.images.clone(),
        };
        Arc::new(BootstrapContext::new(
            self.config.clone(),
            Arc::clone(&self.store),
            collaborators,
            self.form.clone(),
        ))
    }

    /// Persists parameters and registers nodes as if an earlier run had
    /// issued their configs.
    async fn seed(&self, workers: usize) {
        self.store.update(|state| state.bootstrap_config = Some(params())).await.unwrap();
        let service = MachineConfigService::new(Arc::clone(&self.store), self.generator.clone());
        service.handle_request("cp", "aa", LOCALHOST).await.unwrap();
        for n in 0..workers {
            service.handle_request(&format!("worker-{n}"), "", LOCALHOST).await.unwrap();
        }
    }
}

fn github_provider() -> ProviderConfig {
    ProviderConfig {
        kind: ProviderKind::Github,
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        scopes: None,
        authorize_url: None,
        token_url: None,
    }
}

async fn wait_for_session(ctx: &BootstrapContext, provider: &str) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !ctx.rendezvous().is_waiting(provider) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn request_config(ctx: &BootstrapContext, identity: &str) -> String {
    let addr = ctx.issuance_addr().await.expect("issuance server not running");
    let response = reqwest::get(format!("http://{addr}/machineconfig?u={identity}&m=aa%3Abb")).await.unwrap();
    assert_eq!(response.status(), 200);
    response.text().await.unwrap()
}

#[tokio::test]
async fn test_full_run_bootstraps_cluster() {
    let fixture = Fixture::new(MockClusterClient::new());
    let ctx = fixture.context();
    let orchestrator = orchestrator_for(&ctx).await;
    assert_eq!(orchestrator.start_index(), 0);
    let handle = orchestrator.handle();
    let run = tokio::spawn(orchestrator.run());

    wait_until(&handle, |s| s.name == WAIT_CONTROL_PLANE).await;
    let cp = request_config(&ctx, "node-a").await;
    assert!(cp.contains("hostname: controlplane-0"));

    wait_until(&handle, |s| s.name == WAIT_WORKERS).await;
    let worker = request_config(&ctx, "node-b").await;
    assert!(worker.contains("hostname: worker-0"));

    let waiting = wait_until(&handle, |s| s.awaiting_confirmation).await;
    assert_eq!(waiting.name, WAIT_WORKERS);
    handle.confirm();

    assert_eq!(run.await.unwrap(), RunOutcome::Completed);
    ctx.shutdown().await;

    assert_eq!(fixture.client.bootstrap_calls(), 1);
    assert_eq!(fixture.client.health_calls(), 1);
    assert_eq!(fixture.connector.endpoints(), vec![LOCALHOST]);
    assert_eq!(fixture.images.schematics().len(), 1);
    assert_eq!(fixture.form.calls.load(Ordering::SeqCst), 0);

    let kubeconfig = ctx.kubeconfig().unwrap();
    assert_eq!(kubeconfig, fixture.config.state_dir.join(KUBECONFIG_FILE));
    assert!(std::fs::read_to_string(&kubeconfig).unwrap().contains("kind: Config"));
    assert!(ctx.boot_image().unwrap().path.starts_with(&fixture.config.image.output_dir));

    let state = fixture.store.snapshot().await;
    assert!(state.bootstrapped);
    assert_eq!(state.cluster_endpoint.as_deref(), Some("https://127.0.0.1:6443"));

    let secret = fixture.secrets.get("stolos-system", "stolos-system-config").unwrap();
    assert_eq!(secret["cluster_name"], "lab");
    assert_eq!(secret["base_domain"], "lab.example");
    assert_eq!(secret["cluster_endpoint"], "https://127.0.0.1:6443");
}

#[tokio::test]
async fn test_existing_control_plane_resumes_at_wait_workers() {
    let mut fixture = Fixture::new(MockClusterClient::new());
    fixture.config.cluster = None;
    fixture.seed(0).await;

    let ctx = fixture.context();
    let orchestrator = orchestrator_for(&ctx).await;
    assert_eq!(orchestrator.start_index(), WAIT_WORKERS_INDEX);
    let handle = orchestrator.handle();
    assert_eq!(handle.current().name, WAIT_WORKERS);
    let run = tokio::spawn(orchestrator.run());

    // The issuance server comes back up for nodes that join late.
    tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.issuance_addr().await.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    request_config(&ctx, "late-worker").await;

    wait_until(&handle, |s| s.awaiting_confirmation).await;
    handle.confirm();
    assert_eq!(run.await.unwrap(), RunOutcome::Completed);
    ctx.shutdown().await;

    assert_eq!(fixture.form.calls.load(Ordering::SeqCst), 0);
    assert!(fixture.images.schematics().is_empty());
    assert_eq!(fixture.client.bootstrap_calls(), 1);
    assert_eq!(fixture.store.counts().workers, 1);
}

#[tokio::test]
async fn test_bootstrapped_cluster_skips_bootstrap_call() {
    let fixture = Fixture::new(MockClusterClient::new());
    fixture.seed(1).await;
    fixture.store.update(|state| state.bootstrapped = true).await.unwrap();

    let ctx = fixture.context();
    let orchestrator = orchestrator_for(&ctx).await;
    let handle = orchestrator.handle();
    let run = tokio::spawn(orchestrator.run());

    wait_until(&handle, |s| s.awaiting_confirmation).await;
    handle.confirm();
    assert_eq!(run.await.unwrap(), RunOutcome::Completed);
    ctx.shutdown().await;

    assert_eq!(fixture.client.bootstrap_calls(), 0);
    assert_eq!(fixture.client.health_calls(), 1);
    assert!(ctx.kubeconfig().is_some());
}

#[tokio::test]
async fn test_health_failure_fails_bootstrap_phase() {
    let client = MockClusterClient::new().with_events(vec![Ok(HealthEvent::Failure {
        node: Some("controlplane-0".to_string()),
        message: "etcd is unhealthy".to_string(),
    })]);
    let fixture = Fixture::new(client);
    fixture.seed(1).await;

    let ctx = fixture.context();
    let orchestrator = orchestrator_for(&ctx).await;
    let handle = orchestrator.handle();
    let run = tokio::spawn(orchestrator.run());

    wait_until(&handle, |s| s.awaiting_confirmation).await;
    handle.confirm();
    match run.await.unwrap() {
        RunOutcome::Failed { phase, cause } => {
            assert_eq!(phase, CLUSTER_BOOTSTRAP);
            assert!(cause.contains("etcd is unhealthy"), "unexpected cause: {cause}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    ctx.shutdown().await;

    // The bootstrap call went through, so a rerun must not repeat it.
    assert!(fixture.store.snapshot().await.bootstrapped);
    assert!(fixture.secrets.get("stolos-system", "stolos-system-config").is_none());
}

#[tokio::test]
async fn test_form_collects_parameters_and_waits_for_confirmation() {
    let mut fixture = Fixture::new(MockClusterClient::new());
    fixture.config.cluster = None;
    fixture.form = Arc::new(ScriptedForm {
        answers: BTreeMap::from([
            ("cluster_name".to_string(), "formed".to_string()),
            ("http_hostname".to_string(), "127.0.0.1".to_string()),
        ]),
        calls: AtomicUsize::new(0),
    });

    let ctx = fixture.context();
    let orchestrator = orchestrator_for(&ctx).await;
    let handle = orchestrator.handle();
    let run = tokio::spawn(orchestrator.run());

    let waiting = wait_until(&handle, |s| s.awaiting_confirmation).await;
    assert_eq!(waiting.name, CLUSTER_INFO);
    let saved = fixture.store.snapshot().await.bootstrap_config.unwrap();
    assert_eq!(saved.cluster_name, "formed");
    assert_eq!(saved.http_port, 8082);

    handle.confirm();
    wait_until(&handle, |s| s.name == WAIT_CONTROL_PLANE).await;
    handle.cancel();
    assert_eq!(run.await.unwrap(), RunOutcome::Cancelled);
    ctx.shutdown().await;

    assert_eq!(fixture.form.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_form_answer_fails_cluster_info() {
    let mut fixture = Fixture::new(MockClusterClient::new());
    fixture.config.cluster = None;
    fixture.form = Arc::new(ScriptedForm {
        answers: BTreeMap::from([("http_port".to_string(), "not-a-port".to_string())]),
        calls: AtomicUsize::new(0),
    });

    let ctx = fixture.context();
    let outcome = orchestrator_for(&ctx).await.run().await;
    assert!(matches!(outcome, RunOutcome::Failed { ref phase, .. } if phase == CLUSTER_INFO));
    assert!(fixture.store.snapshot().await.bootstrap_config.is_none());
}

#[tokio::test]
async fn test_denied_provider_fails_auth_phase() {
    let mut fixture = Fixture::new(MockClusterClient::new());
    fixture.config.callback.port = 0;
    fixture.config.providers = vec![github_provider()];

    let ctx = fixture.context();
    let orchestrator = orchestrator_for(&ctx).await;
    let handle = orchestrator.handle();
    let run = tokio::spawn(orchestrator.run());

    wait_until(&handle, |s| s.name == PROVIDER_AUTH).await;
    wait_for_session(&ctx, "github").await;
    let denied = RendezvousError::ProviderDenied { provider: "github".to_string(), reason: "access_denied".to_string() };
    assert!(ctx.rendezvous().deliver("github", Err(denied)));

    match run.await.unwrap() {
        RunOutcome::Failed { phase, cause } => {
            assert_eq!(phase, PROVIDER_AUTH);
            assert!(cause.contains("access_denied"), "unexpected cause: {cause}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(ctx.tokens().is_empty());
    assert_eq!(ctx.rendezvous().active_sessions(), 0);
}

#[tokio::test]
async fn test_resumed_run_authorizes_providers_before_writing_secrets() {
    let mut fixture = Fixture::new(MockClusterClient::new());
    fixture.config.callback.port = 0;
    fixture.config.providers = vec![github_provider()];
    fixture.seed(1).await;

    let ctx = fixture.context();
    let orchestrator = orchestrator_for(&ctx).await;
    assert_eq!(orchestrator.start_index(), WAIT_WORKERS_INDEX);
    let handle = orchestrator.handle();
    let run = tokio::spawn(orchestrator.run());

    wait_until(&handle, |s| s.awaiting_confirmation).await;
    handle.confirm();

    // provider-auth was skipped, so the token is requested again here.
    wait_until(&handle, |s| s.name == PROPAGATE_SECRETS).await;
    wait_for_session(&ctx, "github").await;
    let denied = RendezvousError::ProviderDenied { provider: "github".to_string(), reason: "access_denied".to_string() };
    assert!(ctx.rendezvous().deliver("github", Err(denied)));

    match run.await.unwrap() {
        RunOutcome::Failed { phase, cause } => {
            assert_eq!(phase, PROPAGATE_SECRETS);
            assert!(cause.contains("access_denied"), "unexpected cause: {cause}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    ctx.shutdown().await;

    assert_eq!(fixture.client.bootstrap_calls(), 1);
    assert!(fixture.secrets.get("stolos-system", "stolos-system-config").is_none());
}
