//! Error types for callback rendezvous and OAuth flows.

use thiserror::Error;

/// Errors raised while waiting for, or acting on, an external callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendezvousError {
    /// The provider redirected back with `error=...`.
    #[error("Provider '{provider}' denied authorization: {reason}")]
    ProviderDenied { provider: String, reason: String },

    /// The callback arrived without the data we asked for.
    #[error("Malformed callback from '{provider}': {reason}")]
    MalformedCallback { provider: String, reason: String },

    /// The waiting caller was cancelled.
    #[error("Wait for '{0}' was cancelled")]
    Cancelled(String),

    /// No callback arrived before the deadline.
    #[error("Timed out waiting for callback from '{0}'")]
    DeadlineExceeded(String),

    /// Another flow is already waiting on this provider.
    #[error("A session for provider '{0}' is already active")]
    SessionActive(String),

    /// Exchanging the authorization code failed.
    #[error("Token exchange with '{provider}' failed: {reason}")]
    Exchange { provider: String, reason: String },

    /// The callback listener could not be started.
    #[error("Callback listener error: {0}")]
    Listener(String),
}
