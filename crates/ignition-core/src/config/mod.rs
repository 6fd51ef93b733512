//! Configuration for Ignition.
//!
//! Loaded from a TOML file, then overridden from the environment. Every
//! section has defaults, so an empty or absent file is a valid configuration.

mod error;
pub mod schema;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ignition_abstraction::ClusterParams;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::ConfigError;
pub use schema::{CLUSTER_FIELDS, FieldDefault, FieldDescriptor, FieldKind};

use crate::rendezvous::{OAuthProvider, ProviderKind};

/// File read when no path is given and `IGNITION_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "ignition.toml";

pub const ENV_CONFIG: &str = "IGNITION_CONFIG";
pub const ENV_STATE_DIR: &str = "IGNITION_STATE_DIR";
pub const ENV_MIN_WORKERS: &str = "IGNITION_MIN_WORKERS";
pub const ENV_CALLBACK_PORT: &str = "IGNITION_CALLBACK_PORT";

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the snapshot, bundle, kubeconfig and secrets.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Cluster parameters. When absent they are collected interactively.
    #[serde(default)]
    pub cluster: Option<ClusterParams>,
    #[serde(default)]
    pub issuance: IssuanceConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".ignition")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            cluster: None,
            issuance: IssuanceConfig::default(),
            callback: CallbackConfig::default(),
            providers: Vec::new(),
            bootstrap: BootstrapConfig::default(),
            image: ImageConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

/// Machine config server settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceConfig {
    /// Listen address. Defaults to all interfaces on the cluster `http_port`.
    #[serde(default)]
    pub bind: Option<SocketAddr>,
}

/// OAuth callback listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_callback_host")]
    pub host: IpAddr,
    #[serde(default = "default_callback_port")]
    pub port: u16,
}

fn default_callback_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_callback_port() -> u16 {
    9999
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { host: default_callback_host(), port: default_callback_port() }
    }
}

impl CallbackConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Base URL providers redirect the browser to.
    pub fn redirect_base(&self) -> String {
        self.redirect_base_for(self.port)
    }

    /// Like [`Self::redirect_base`], for the port the listener actually bound.
    pub fn redirect_base_for(&self, port: u16) -> String {
        let host = if self.host.is_loopback() || self.host.is_unspecified() {
            "localhost".to_string()
        } else {
            self.host.to_string()
        };
        format!("http://{}:{}", host, port)
    }
}

/// An OAuth application to authorize during the run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    /// Authorization and token endpoints, for self-hosted installations.
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    pub fn to_provider(&self) -> OAuthProvider {
        let mut provider = OAuthProvider::from_kind(self.kind, &self.client_id, &self.client_secret);
        if let Some(scopes) = &self.scopes {
            provider = provider.with_scopes(scopes.clone());
        }
        if let Some(url) = &self.authorize_url {
            provider.authorize_url.clone_from(url);
        }
        if let Some(url) = &self.token_url {
            provider.token_url.clone_from(url);
        }
        provider
    }
}

/// Bootstrap and health settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Workers required before the operator may confirm bootstrap.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    /// Talos API port on the control plane.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Kubernetes API port used for the cluster endpoint.
    #[serde(default = "default_kubernetes_port")]
    pub kubernetes_port: u16,
}

fn default_min_workers() -> usize {
    3
}

fn default_health_timeout_secs() -> u64 {
    1200
}

fn default_api_port() -> u16 {
    50000
}

fn default_kubernetes_port() -> u16 {
    6443
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            health_timeout_secs: default_health_timeout_secs(),
            api_port: default_api_port(),
            kubernetes_port: default_kubernetes_port(),
        }
    }
}

impl BootstrapConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

/// Boot image settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_factory_url")]
    pub factory_url: String,
    /// Where the downloaded image is written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_factory_url() -> String {
    "https://factory.talos.dev".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { enabled: true, factory_url: default_factory_url(), output_dir: default_output_dir() }
    }
}

/// Where propagated credentials are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default = "default_secret_namespace")]
    pub namespace: String,
    #[serde(default = "default_secret_name")]
    pub name: String,
}

fn default_secret_namespace() -> String {
    "stolos-system".to_string()
}

fn default_secret_name() -> String {
    "stolos-system-config".to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self { namespace: default_secret_namespace(), name: default_secret_name() }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from `path` (or `IGNITION_CONFIG`, or
    /// `ignition.toml`) and applies environment overrides.
    ///
    /// A file named explicitly must exist; the default file is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// override has an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path.map(Path::to_path_buf).or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));
        let mut config = match explicit {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path)),
            Some(path) => Self::load_from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parses a TOML file without environment overrides.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        if let Some(params) = &config.cluster {
            schema::validate_params(params)?;
        }
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
        where
            T::Err: std::fmt::Display,
        {
            value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                field: key.to_string(),
                reason: e.to_string(),
            })
        }

        if let Some(dir) = lookup(ENV_STATE_DIR).filter(|v| !v.trim().is_empty()) {
            self.state_dir = PathBuf::from(dir.trim());
        }
        if let Some(value) = lookup(ENV_MIN_WORKERS) {
            self.bootstrap.min_workers = parse(ENV_MIN_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_CALLBACK_PORT) {
            self.callback.port = parse(ENV_CALLBACK_PORT, &value)?;
        }
        Ok(())
    }

    /// Issuance listen address for `params`.
    pub fn issuance_bind(&self, params: &ClusterParams) -> SocketAddr {
        self.issuance
            .bind
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), params.http_port))
    }

    pub fn oauth_providers(&self) -> Vec<OAuthProvider> {
        self.providers.iter().map(ProviderConfig::to_provider).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.state_dir, PathBuf::from(".ignition"));
        assert_eq!(config.callback.addr(), "127.0.0.1:9999".parse().unwrap());
        assert_eq!(config.bootstrap.min_workers, 3);
        assert_eq!(config.bootstrap.health_timeout(), Duration::from_secs(1200));
        assert_eq!(config.bootstrap.api_port, 50000);
        assert_eq!(config.image.factory_url, "https://factory.talos.dev");
        assert_eq!(config.secrets.namespace, "stolos-system");
        assert!(config.cluster.is_none());
    }

    #[test]
    fn test_full_document() {
        let toml = r#"
            state_dir = "/var/lib/ignition"

            [cluster]
            cluster_name = "lab"
            http_hostname = "10.0.0.5"

            [issuance]
            bind = "10.0.0.5:8082"

            [[providers]]
            kind = "github"
            client_id = "Iv1.abc"
            client_secret = "shh"

            [bootstrap]
            min_workers = 1

            [image]
            enabled = false
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let params = config.cluster.as_ref().unwrap();
        assert_eq!(params.cluster_name, "lab");
        assert_eq!(params.install_disk, "/dev/sda");
        assert_eq!(config.issuance_bind(params), "10.0.0.5:8082".parse().unwrap());
        assert_eq!(config.bootstrap.min_workers, 1);
        assert!(!config.image.enabled);

        let providers = config.oauth_providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name, "github");
        assert_eq!(providers[0].client_id, "Iv1.abc");
    }

    #[test]
    fn test_issuance_bind_defaults_to_http_port() {
        let params = ClusterParams { http_port: 9000, ..ClusterParams::default() };
        assert_eq!(Config::default().issuance_bind(&params), "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            [(ENV_STATE_DIR, "/tmp/state"), (ENV_MIN_WORKERS, "5"), (ENV_CALLBACK_PORT, "8765")]
                .into_iter()
                .collect();
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/state"));
        assert_eq!(config.bootstrap.min_workers, 5);
        assert_eq!(config.callback.port, 8765);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == ENV_MIN_WORKERS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == ENV_MIN_WORKERS));
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file_rejects_bad_params() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ignition.toml");
        std::fs::write(&path, "[cluster]\ntalos_architecture = \"sparc\"\n").unwrap();
        assert!(matches!(Config::load_from_file(&path), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_load_from_file_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ignition.toml");
        std::fs::write(&path, "state_dir = [").unwrap();
        assert!(matches!(Config::load_from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_provider_scopes_override() {
        let provider = ProviderConfig {
            kind: ProviderKind::Google,
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            scopes: Some(vec!["openid".to_string()]),
            authorize_url: None,
            token_url: None,
        };
        assert_eq!(provider.to_provider().scopes, vec!["openid"]);
        assert_eq!(provider.to_provider().token_url, "https://oauth2.googleapis.com/token");
        assert!(!format!("{:?}", provider).contains("\"secret\""));
    }

    #[test]
    fn test_provider_endpoint_override() {
        let config: Config = toml::from_str(
            "[[providers]]\nkind = \"github\"\nclient_id = \"id\"\nclient_secret = \"s\"\n\
             token_url = \"https://ghe.example/login/oauth/access_token\"\n",
        )
        .unwrap();
        let provider = &config.oauth_providers()[0];
        assert_eq!(provider.token_url, "https://ghe.example/login/oauth/access_token");
        assert_eq!(provider.authorize_url, "https://github.com/login/oauth/authorize");
    }

    #[test]
    fn test_redirect_base_uses_localhost_for_loopback() {
        assert_eq!(CallbackConfig::default().redirect_base(), "http://localhost:9999");
    }
}
