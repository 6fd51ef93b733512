//! HTTP endpoint machines fetch their configuration from.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use tracing::{error, warn};

use super::error::IssuanceError;
use super::service::MachineConfigService;
use crate::server::{self, Handler, HttpServer};

/// Path machines request, e.g. `/machineconfig?m=<mac>&u=<uuid>`.
pub const MACHINE_CONFIG_PATH: &str = "/machineconfig";

/// Routes `/machineconfig` to the issuance service.
#[derive(Debug)]
pub struct MachineConfigHandler {
    service: Arc<MachineConfigService>,
}

impl MachineConfigHandler {
    pub fn new(service: Arc<MachineConfigService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Handler for MachineConfigHandler {
    async fn handle(&self, request: Request<Incoming>, peer: SocketAddr) -> Response<Full<Bytes>> {
        if request.uri().path() != MACHINE_CONFIG_PATH {
            return server::text(StatusCode::NOT_FOUND, "not found");
        }
        if request.method() != Method::GET {
            return server::text(StatusCode::METHOD_NOT_ALLOWED, "use GET");
        }

        let params = server::query_params(request.uri());
        let identity = params.get("u").map(String::as_str).unwrap_or_default();
        let mac = params.get("m").map(String::as_str).unwrap_or_default();
        let source = peer.ip().to_canonical();

        match self.service.handle_request(identity, mac, source).await {
            Ok(issued) => server::response(StatusCode::OK, "application/yaml", issued.config),
            Err(IssuanceError::MissingIdentity) => {
                warn!(%peer, "Machine config request without identity");
                server::text(StatusCode::BAD_REQUEST, "missing machine uuid (u)")
            }
            Err(e) => {
                error!(identity = %identity, %peer, error = %e, "Failed to issue machine config");
                server::text(StatusCode::INTERNAL_SERVER_ERROR, "failed to generate machine config")
            }
        }
    }
}

/// The machine configuration server.
pub type IssuanceServer = HttpServer<MachineConfigHandler>;

/// Creates (but does not start) the issuance server.
pub fn issuance_server(bind: SocketAddr, service: Arc<MachineConfigService>) -> IssuanceServer {
    HttpServer::new("issuance", bind, Arc::new(MachineConfigHandler::new(service)))
}
