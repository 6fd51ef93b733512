//! Cluster bootstrap and health polling.
//!
//! Bootstrap is a single call with no retry. The health poll drains a
//! server stream until the cluster is healthy, the server reports a failed
//! check, or the overall deadline passes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use ignition_abstraction::{ClusterClient, ClusterError, ClusterNodes, HealthEvent};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default bound on the whole health poll.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// File name of the admin kubeconfig in the state directory.
pub const KUBECONFIG_FILE: &str = "kubeconfig";

/// Errors from the bootstrap call or kubeconfig retrieval.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The bootstrap call itself failed.
    #[error("Bootstrap call failed: {0}")]
    Rpc(#[source] ClusterError),

    /// Retrieving the kubeconfig failed.
    #[error("Failed to retrieve kubeconfig: {0}")]
    Kubeconfig(#[source] ClusterError),

    /// Writing the kubeconfig failed.
    #[error("Failed to write kubeconfig to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the health poll.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckError {
    /// A message on the stream carried a failed check.
    #[error("Health check failed{}: {message}", node.as_ref().map(|n| format!(" on {n}")).unwrap_or_default())]
    ServerReportedFailure { node: Option<String>, message: String },

    /// The cluster did not become healthy in time.
    #[error("Cluster not healthy after {}s", .0.as_secs())]
    TimeoutExceeded(Duration),

    /// The local caller gave up.
    #[error("Health check cancelled")]
    Cancelled,

    /// The stream could not be opened or broke.
    #[error("Health check stream error: {0}")]
    Stream(ClusterError),
}

/// Issues the one-shot bootstrap call.
pub async fn execute_bootstrap(client: &dyn ClusterClient) -> Result<(), BootstrapError> {
    info!("Bootstrapping cluster");
    match client.bootstrap().await {
        Ok(()) => {
            info!(outcome = "success", "Bootstrap call accepted");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Bootstrap call failed");
            Err(BootstrapError::Rpc(e))
        }
    }
}

/// Drains the health stream until a terminal condition.
///
/// Stream end and a server-side cancellation both count as success. A
/// failure message is fatal even though the stream itself is fine. `timeout`
/// bounds the whole poll, including opening the stream.
pub async fn poll_health(
    client: &dyn ClusterClient,
    nodes: &ClusterNodes,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), HealthCheckError> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    info!(
        control_planes = nodes.control_planes.len(),
        workers = nodes.workers.len(),
        timeout_secs = timeout.as_secs(),
        "Waiting for cluster to become healthy"
    );

    let mut stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(HealthCheckError::Cancelled),
        () = &mut deadline => return Err(HealthCheckError::TimeoutExceeded(timeout)),
        opened = client.health_check(nodes, timeout) => opened.map_err(HealthCheckError::Stream)?,
    };

    let mut last_message: Option<String> = None;
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HealthCheckError::Cancelled),
            () = &mut deadline => {
                error!(timeout_secs = timeout.as_secs(), "Cluster did not become healthy in time");
                return Err(HealthCheckError::TimeoutExceeded(timeout));
            }
            item = stream.next() => item,
        };

        match item {
            None => {
                info!(outcome = "success", "Cluster is healthy");
                return Ok(());
            }
            Some(Ok(HealthEvent::Healthy)) => {
                info!(outcome = "success", "Cluster reported healthy");
                return Ok(());
            }
            Some(Ok(HealthEvent::Progress { node, message })) => {
                if last_message.as_deref() != Some(message.as_str()) {
                    info!(node = node.as_deref().unwrap_or("-"), %message, "Health check progress");
                    last_message = Some(message);
                }
            }
            Some(Ok(HealthEvent::Failure { node, message })) => {
                error!(node = node.as_deref().unwrap_or("-"), %message, "Health check reported failure");
                return Err(HealthCheckError::ServerReportedFailure { node, message });
            }
            Some(Err(ClusterError::Cancelled)) => {
                debug!("Server cancelled the health stream");
                info!(outcome = "success", "Cluster is healthy");
                return Ok(());
            }
            Some(Err(e)) => return Err(HealthCheckError::Stream(e)),
        }
    }
}

/// Retrieves the admin kubeconfig and writes it to `dir` with mode 0600.
pub async fn fetch_kubeconfig(client: &dyn ClusterClient, dir: &Path) -> Result<PathBuf, BootstrapError> {
    let kubeconfig = client.kubeconfig().await.map_err(BootstrapError::Kubeconfig)?;
    let path = dir.join(KUBECONFIG_FILE);
    write_private(&path, &kubeconfig).map_err(|source| BootstrapError::Write { path: path.clone(), source })?;
    info!(path = %path.display(), outcome = "success", "Wrote kubeconfig");
    Ok(path)
}

/// Writes `contents` readable by the owner only.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        // mode() only applies when the file is created.
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)
}
