//! OAuth authorization-code flow on top of the rendezvous.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::RendezvousError;
use super::session::{PendingCallback, Rendezvous};

/// How long a user has to finish authorizing in the browser.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(600);

/// Providers with built-in endpoint descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Google,
}

/// An OAuth application registered with a provider.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthProvider {
    pub name: String,
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    /// Path on the callback listener this provider redirects to.
    pub callback_path: String,
}

impl std::fmt::Debug for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProvider")
            .field("name", &self.name)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("callback_path", &self.callback_path)
            .finish()
    }
}

impl OAuthProvider {
    pub fn github(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            name: "github".to_string(),
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: vec!["repo".to_string(), "read:org".to_string()],
            callback_path: "/callback/github".to_string(),
        }
    }

    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            name: "google".to_string(),
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: vec!["https://www.googleapis.com/auth/cloud-platform".to_string()],
            callback_path: "/callback/google".to_string(),
        }
    }

    pub fn from_kind(
        kind: ProviderKind,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        match kind {
            ProviderKind::Github => Self::github(client_id, client_secret),
            ProviderKind::Google => Self::google(client_id, client_secret),
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Overrides the provider endpoints, e.g. for an enterprise installation.
    #[must_use]
    pub fn with_endpoints(mut self, authorize_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.authorize_url = authorize_url.into();
        self.token_url = token_url.into();
        self
    }

    /// The URL the user opens to grant access.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scopes.join(" ")),
            urlencoding::encode(state),
        )
    }
}

/// Token returned by the provider.
#[derive(Clone, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Error body some providers return with HTTP 200.
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// An authorization in progress: the session is registered and the URL is ready.
#[derive(Debug)]
pub struct AuthorizationRequest<'a> {
    pub url: String,
    pub state: String,
    pub redirect_uri: String,
    pending: PendingCallback<'a>,
}

/// Runs the authorization-code flow for configured providers.
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    rendezvous: Arc<Rendezvous>,
    http: reqwest::Client,
    redirect_base: String,
    timeout: Duration,
}

impl OAuthFlow {
    /// `redirect_base` is the externally visible URL of the callback listener,
    /// e.g. `http://localhost:9999`.
    pub fn new(rendezvous: Arc<Rendezvous>, redirect_base: impl Into<String>) -> Self {
        Self {
            rendezvous,
            http: reqwest::Client::new(),
            redirect_base: redirect_base.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn redirect_uri(&self, provider: &OAuthProvider) -> String {
        format!("{}{}", self.redirect_base, provider.callback_path)
    }

    /// Registers the callback session and builds the authorization URL.
    pub fn begin(&self, provider: &OAuthProvider) -> Result<AuthorizationRequest<'_>, RendezvousError> {
        let pending = self.rendezvous.register(&provider.name)?;
        let state = random_state();
        let redirect_uri = self.redirect_uri(provider);
        let url = provider.authorization_url(&redirect_uri, &state);
        Ok(AuthorizationRequest { url, state, redirect_uri, pending })
    }

    /// Waits for the callback of `request` and exchanges its code.
    pub async fn complete(
        &self,
        provider: &OAuthProvider,
        request: AuthorizationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<OAuthToken, RendezvousError> {
        let AuthorizationRequest { state, redirect_uri, pending, .. } = request;
        let callback = pending.wait(cancel, self.timeout).await?;
        if callback.state.as_deref() != Some(state.as_str()) {
            return Err(RendezvousError::MalformedCallback {
                provider: provider.name.clone(),
                reason: "state parameter does not match".to_string(),
            });
        }
        self.exchange(provider, &callback.code, &redirect_uri).await
    }

    /// Full flow: register, log the URL for the operator, wait, exchange.
    pub async fn authenticate(
        &self,
        provider: &OAuthProvider,
        cancel: &CancellationToken,
    ) -> Result<OAuthToken, RendezvousError> {
        let request = self.begin(provider)?;
        info!(provider = %provider.name, url = %request.url, "Open this URL in a browser to authorize");
        self.complete(provider, request, cancel).await
    }

    /// Exchanges an authorization code for a token.
    pub async fn exchange(
        &self,
        provider: &OAuthProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthToken, RendezvousError> {
        let exchange_error = |reason: String| RendezvousError::Exchange {
            provider: provider.name.clone(),
            reason,
        };

        debug!(provider = %provider.name, token_url = %provider.token_url, "Exchanging authorization code");
        let response = self
            .http
            .post(&provider.token_url)
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", provider.client_id.as_str()),
                ("client_secret", provider.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| exchange_error(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| exchange_error(e.to_string()))?;
        if !status.is_success() {
            return Err(exchange_error(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }
        if let Ok(error) = serde_json::from_str::<TokenErrorBody>(&body) {
            return Err(exchange_error(error.error_description.unwrap_or(error.error)));
        }

        let token: OAuthToken =
            serde_json::from_str(&body).map_err(|e| exchange_error(format!("invalid token response: {e}")))?;
        info!(provider = %provider.name, outcome = "success", "Obtained access token");
        Ok(token)
    }
}

fn random_state() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().fold(String::with_capacity(32), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_url_encodes_parameters() {
        let provider = OAuthProvider::github("client id", "secret");
        let url = provider.authorization_url("http://localhost:9999/callback/github", "xyz");
        assert!(url.starts_with("https://github.com/login/oauth/authorize?client_id=client%20id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A9999%2Fcallback%2Fgithub"));
        assert!(url.contains("scope=repo%20read%3Aorg"));
        assert!(url.contains("state=xyz"));
    }

    #[test]
    fn test_random_state_is_hex() {
        let state = random_state();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(state, random_state());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let provider = OAuthProvider::google("id", "super-secret");
        assert!(!format!("{:?}", provider).contains("super-secret"));
    }

    #[test]
    fn test_provider_kind_deserializes_lowercase() {
        let kind: ProviderKind = serde_json::from_str("\"github\"").unwrap();
        assert_eq!(kind, ProviderKind::Github);
        assert_eq!(OAuthProvider::from_kind(ProviderKind::Google, "a", "b").name, "google");
    }

    #[tokio::test]
    async fn test_begin_registers_session() {
        let rendezvous = Arc::new(Rendezvous::new());
        let flow = OAuthFlow::new(Arc::clone(&rendezvous), "http://localhost:9999/");
        let provider = OAuthProvider::github("id", "secret");

        let request = flow.begin(&provider).unwrap();
        assert_eq!(request.redirect_uri, "http://localhost:9999/callback/github");
        assert!(request.url.contains(&request.state));
        assert!(rendezvous.is_waiting("github"));
        drop(request);
        assert!(!rendezvous.is_waiting("github"));
    }
}
