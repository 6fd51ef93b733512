//! Synchronizing foreground flows with browser redirects.
//!
//! A flow registers a session keyed by provider name, sends the user to the
//! provider, and waits. The callback listener delivers the redirect's `code`
//! or `error` to that session without blocking. The wait ends on delivery,
//! cancellation or deadline, and the session is removed in every case.

pub mod callback;
pub mod error;
pub mod oauth;
pub mod session;

pub use callback::{CallbackHandler, CallbackServer, DEFAULT_CALLBACK_ADDR, callback_server};
pub use error::RendezvousError;
pub use oauth::{
    AuthorizationRequest, DEFAULT_AUTH_TIMEOUT, OAuthFlow, OAuthProvider, OAuthToken, ProviderKind,
};
pub use session::{Callback, Delivery, PendingCallback, Rendezvous};
