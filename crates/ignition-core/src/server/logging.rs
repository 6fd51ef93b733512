//! Request logging middleware with request IDs and timing.

use std::task::{Context, Poll};
use std::time::Instant;

use http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A `Layer` that logs each request with a request ID, status and duration.
#[derive(Debug, Clone)]
pub struct RequestLoggerLayer {
    server: &'static str,
}

impl RequestLoggerLayer {
    /// `server` names the listener in every log line.
    pub const fn new(server: &'static str) -> Self {
        Self { server }
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RequestLoggerService { service, server: self.server }
    }
}

/// A `Service` that logs request information with request IDs and timing.
#[derive(Debug, Clone)]
pub struct RequestLoggerService<S> {
    service: S,
    server: &'static str,
}

impl<S, B, ResBody> Service<Request<B>> for RequestLoggerService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

        if !request.headers().contains_key(REQUEST_ID_HEADER) {
            if let Ok(header_value) = http::HeaderValue::from_str(&request_id) {
                request.headers_mut().insert(REQUEST_ID_HEADER, header_value);
            }
        }

        let server = self.server;
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let start_time = Instant::now();

        let span = tracing::info_span!(
            "request",
            server,
            request_id = %request_id,
            method = %method,
            path = %path
        );

        debug!(parent: &span, query = request.uri().query().unwrap_or(""), "Received request");

        let future = self.service.call(request);
        Box::pin(
            async move {
                let mut result = future.await;
                let duration_ms = start_time.elapsed().as_millis();

                if let Ok(response) = &mut result {
                    if let Ok(header_value) = http::HeaderValue::from_str(&request_id) {
                        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
                    }
                }

                match &result {
                    Ok(response) if response.status().is_server_error() => {
                        warn!(status = response.status().as_u16(), duration_ms, "Request failed");
                    }
                    Ok(response) => {
                        info!(status = response.status().as_u16(), duration_ms, "Request completed");
                    }
                    Err(_) => {
                        warn!(duration_ms, "Request errored");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_request_id_is_added_when_missing() {
        let service = tower::service_fn(|req: Request<()>| async move {
            let id = req.headers().get(REQUEST_ID_HEADER).cloned();
            Ok::<_, Infallible>(Response::new(id))
        });
        let service = RequestLoggerLayer::new("test").layer(service);

        let response = service.oneshot(Request::new(())).await.unwrap();
        let id = response.into_body().unwrap();
        assert!(Uuid::parse_str(id.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_existing_request_id_is_kept() {
        let service = tower::service_fn(|req: Request<()>| async move {
            let id = req.headers().get(REQUEST_ID_HEADER).cloned();
            Ok::<_, Infallible>(Response::new(id))
        });
        let service = RequestLoggerLayer::new("test").layer(service);

        let request = Request::builder().header(REQUEST_ID_HEADER, "abc-123").body(()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.into_body().unwrap(), "abc-123");
    }

    #[tokio::test]
    async fn test_request_id_echoed_on_response() {
        let service = tower::service_fn(|_req: Request<()>| async move {
            Ok::<_, Infallible>(Response::new(()))
        });
        let service = RequestLoggerLayer::new("test").layer(service);

        let request = Request::builder().header(REQUEST_ID_HEADER, "req-7").body(()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-7");
    }
}
