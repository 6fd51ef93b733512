//! Minimal HTTP/1.1 listener shared by the issuance and callback servers.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tracing::{debug, error, info, warn};

use super::logging::RequestLoggerLayer;

/// Answers one request. The peer address is the TCP source of the connection.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Request<Incoming>, peer: SocketAddr) -> Response<Full<Bytes>>;
}

/// An HTTP server that can be started once and stopped.
pub struct HttpServer<H: Handler> {
    name: &'static str,
    bind: SocketAddr,
    handler: Arc<H>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<H: Handler> std::fmt::Debug for HttpServer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("name", &self.name)
            .field("bind", &self.bind)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl<H: Handler> HttpServer<H> {
    pub fn new(name: &'static str, bind: SocketAddr, handler: Arc<H>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            name,
            bind,
            handler,
            local_addr: None,
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Address the server is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.local_addr.is_some()
    }

    /// Binds and starts the accept loop. Calling it again while running is a no-op.
    pub async fn start(&mut self) -> std::io::Result<SocketAddr> {
        if let Some(addr) = self.local_addr {
            debug!(server = self.name, %addr, "Server already running");
            return Ok(addr);
        }

        let listener = TcpListener::bind(self.bind).await?;
        let addr = listener.local_addr()?;
        info!(server = self.name, %addr, "HTTP server listening");

        let name = self.name;
        let handler = Arc::clone(&self.handler);
        let tasks = Arc::clone(&self.tasks);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let accept_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let handler = Arc::clone(&handler);
                                let task = tokio::spawn(Self::serve_connection(name, stream, peer, handler));
                                let mut tasks = tasks.lock().await;
                                tasks.retain(|task| !task.is_finished());
                                tasks.push(task);
                            }
                            Err(e) => {
                                error!(server = name, error = %e, "Error accepting connection");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!(server = name, "Shutdown signal received, stopping accept loop");
                        break;
                    }
                }
            }
        });

        self.tasks.lock().await.push(accept_handle);
        self.local_addr = Some(addr);
        Ok(addr)
    }

    async fn serve_connection(name: &'static str, stream: TcpStream, peer: SocketAddr, handler: Arc<H>) {
        debug!(server = name, %peer, "New connection");
        let service = ServiceBuilder::new().layer(RequestLoggerLayer::new(name)).service_fn(
            move |request: Request<Incoming>| {
                let handler = Arc::clone(&handler);
                async move { Ok::<_, Infallible>(handler.handle(request, peer).await) }
            },
        );

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
            .await
        {
            warn!(server = name, %peer, error = %e, "Error serving connection");
        }
    }

    /// Stops accepting and aborts in-flight connections.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        if let Some(addr) = self.local_addr.take() {
            info!(server = self.name, %addr, "HTTP server stopped");
        }
    }
}

impl<H: Handler> Drop for HttpServer<H> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
