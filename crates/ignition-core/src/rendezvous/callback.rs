//! Listener for provider redirects.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use tracing::{info, warn};

use super::error::RendezvousError;
use super::session::{Callback, Rendezvous};
use crate::server::{self, Handler, HttpServer};

/// Default address of the callback listener.
pub const DEFAULT_CALLBACK_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 9999);

const SUCCESS_PAGE: &str = "<!DOCTYPE html>
<html>
<head><title>Authorization complete</title></head>
<body>
<h1>Authorization complete</h1>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>
";

/// Routes provider callback paths to the [`Rendezvous`].
#[derive(Debug)]
pub struct CallbackHandler {
    routes: HashMap<String, String>,
    rendezvous: Arc<Rendezvous>,
}

impl CallbackHandler {
    pub fn new(rendezvous: Arc<Rendezvous>) -> Self {
        Self { routes: HashMap::new(), rendezvous }
    }

    /// Delivers callbacks on `path` to sessions for `provider`.
    #[must_use]
    pub fn route(mut self, path: impl Into<String>, provider: impl Into<String>) -> Self {
        self.routes.insert(path.into(), provider.into());
        self
    }
}

#[async_trait]
impl Handler for CallbackHandler {
    async fn handle(&self, request: Request<Incoming>, peer: SocketAddr) -> Response<Full<Bytes>> {
        let Some(provider) = self.routes.get(request.uri().path()) else {
            return server::text(StatusCode::NOT_FOUND, "not found");
        };
        let params = server::query_params(request.uri());

        if let Some(reason) = params.get("error") {
            let detail = params.get("error_description").map_or(reason.as_str(), String::as_str);
            warn!(%provider, %peer, %reason, "Provider reported an authorization error");
            self.rendezvous.deliver(
                provider,
                Err(RendezvousError::ProviderDenied {
                    provider: provider.clone(),
                    reason: reason.clone(),
                }),
            );
            return server::text(StatusCode::BAD_REQUEST, format!("Authentication failed: {detail}"));
        }

        let Some(code) = params.get("code").filter(|code| !code.is_empty()) else {
            warn!(%provider, %peer, "Callback without authorization code");
            self.rendezvous.deliver(
                provider,
                Err(RendezvousError::MalformedCallback {
                    provider: provider.clone(),
                    reason: "no authorization code received".to_string(),
                }),
            );
            return server::text(StatusCode::BAD_REQUEST, "no authorization code received");
        };

        let callback = Callback { code: code.clone(), state: params.get("state").cloned() };
        if self.rendezvous.deliver(provider, Ok(callback)) {
            info!(%provider, outcome = "success", "Received authorization callback");
            server::html(StatusCode::OK, SUCCESS_PAGE)
        } else {
            server::text(StatusCode::GONE, "no sign-in is waiting for this provider")
        }
    }
}

/// The provider callback server.
pub type CallbackServer = HttpServer<CallbackHandler>;

/// Creates (but does not start) the callback server.
pub fn callback_server(bind: SocketAddr, handler: CallbackHandler) -> CallbackServer {
    HttpServer::new("callback", bind, Arc::new(handler))
}
