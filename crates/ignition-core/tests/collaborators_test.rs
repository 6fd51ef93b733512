//! Integration tests for the reference collaborators working together.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use ignition_abstraction::{ClusterParams, ConfigBundle, ImageError, ImageFactory, NodeRole, SecretSink};
use ignition_core::generator::MachineConfig;
use ignition_core::state::{FileSnapshotStore, StateStore, StoreError};
use ignition_core::{FactoryClient, FileSecretSink, MachineConfigService, TemplateConfigGenerator, build_boot_image};
use tempfile::TempDir;

fn params() -> ClusterParams {
    ClusterParams {
        http_hostname: "10.0.0.5".to_string(),
        talos_extra_args: "console=ttyS0".to_string(),
        ..ClusterParams::default()
    }
}

#[tokio::test]
async fn test_factory_schematic_and_download() {
    let mut server = mockito::Server::new_async().await;
    let schematic = server
        .mock("POST", "/schematics")
        .match_body(mockito::Matcher::Regex(
            r"talos\.config=http://10\.0\.0\.5:8082/machineconfig\?m=\$\{mac\}&u=\$\{uuid\}".to_string(),
        ))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"abc123"}"#)
        .create_async()
        .await;
    let image = server
        .mock("GET", "/image/abc123/v1.11.1/metal-amd64.iso")
        .with_status(200)
        .with_body(vec![7u8; 4096])
        .create_async()
        .await;

    let temp_dir = TempDir::new().unwrap();
    let factory = FactoryClient::new(server.url());
    let boot_image = build_boot_image(&factory, &params(), temp_dir.path()).await.unwrap();

    assert_eq!(boot_image.schematic_id, "abc123");
    assert_eq!(boot_image.path, temp_dir.path().join("metal-amd64.iso"));
    assert_eq!(std::fs::read(&boot_image.path).unwrap().len(), 4096);
    assert!(!temp_dir.path().join(".metal-amd64.iso.part").exists());

    schematic.assert_async().await;
    image.assert_async().await;
}

#[tokio::test]
async fn test_factory_rejection_surfaces_body() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/schematics")
        .with_status(400)
        .with_body("invalid overlay")
        .create_async()
        .await;

    let factory = FactoryClient::new(server.url());
    let err = factory.create_schematic(&ignition_core::boot_schematic(&params())).await.unwrap_err();
    assert_eq!(err, ImageError::Schematic("HTTP 400: invalid overlay".to_string()));
}

#[tokio::test]
async fn test_download_failure_leaves_no_file() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/image/x/v1/metal-arm64.raw.xz").with_status(404).create_async().await;

    let temp_dir = TempDir::new().unwrap();
    let factory = FactoryClient::new(server.url());
    let url = factory.image_url("x", "v1", "arm64");
    let err = factory.download(&url, temp_dir.path()).await.unwrap_err();
    assert!(matches!(err, ImageError::Transport(_)));
    assert!(!temp_dir.path().join("metal-arm64.raw.xz").exists());
}

#[tokio::test]
async fn test_issuance_with_template_generator_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let persistence = Arc::new(FileSnapshotStore::new(temp_dir.path()));
    let store = Arc::new(StateStore::new(persistence.clone()));
    store.update(|state| state.bootstrap_config = Some(params())).await.unwrap();

    let service = MachineConfigService::new(store.clone(), Arc::new(TemplateConfigGenerator::new()));
    let cp_addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 20));
    let cp = service.handle_request("node-a", "aa:bb:cc:dd:ee:ff", cp_addr).await.unwrap();
    let worker = service.handle_request("node-b", "", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 21))).await.unwrap();

    let cp_config: MachineConfig = serde_yaml::from_slice(&cp.config).unwrap();
    assert_eq!(cp_config.machine.machine_type, "controlplane");
    assert_eq!(cp_config.machine.network.hostname.as_deref(), Some("controlplane-0"));
    assert_eq!(cp_config.cluster.control_plane.endpoint, "https://10.0.0.20:6443");
    let worker_config: MachineConfig = serde_yaml::from_slice(&worker.config).unwrap();
    assert_eq!(worker.role, NodeRole::Worker);
    assert!(worker_config.cluster.etcd.is_none());

    for name in ConfigBundle::REQUIRED {
        assert!(temp_dir.path().join(name).exists(), "{name} not persisted");
    }

    // A new process sees the same assignment and bytes.
    let (restarted, found) = StateStore::open(persistence.clone()).unwrap();
    assert!(found);
    let restarted = MachineConfigService::new(Arc::new(restarted), Arc::new(TemplateConfigGenerator::new()));
    let replay = restarted.handle_request("node-a", "aa:bb:cc:dd:ee:ff", cp_addr).await.unwrap();
    assert_eq!(replay.config, cp.config);
    assert!(!replay.created);

    std::fs::remove_file(temp_dir.path().join(ConfigBundle::TALOSCONFIG)).unwrap();
    assert!(matches!(
        StateStore::open(persistence),
        Err(StoreError::PartialState { ref missing }) if missing == &vec!["talosconfig".to_string()]
    ));
}

#[tokio::test]
async fn test_secret_sink_in_state_dir() {
    let temp_dir = TempDir::new().unwrap();
    let sink = FileSecretSink::in_state_dir(temp_dir.path());
    let data = [("github_token".to_string(), "gho_abc".to_string())].into_iter().collect();
    sink.put("stolos-system", "stolos-system-config", &data).await.unwrap();

    assert_eq!(sink.read("stolos-system", "stolos-system-config").unwrap(), Some(data));
    assert!(temp_dir.path().join("secrets/stolos-system-stolos-system-config.yaml").exists());
}
