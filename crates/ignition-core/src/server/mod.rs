//! HTTP plumbing shared by the servers nodes and browsers talk to.

pub mod listener;
pub mod logging;

use std::collections::HashMap;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode, Uri};

pub use logging::{REQUEST_ID_HEADER, RequestLoggerLayer};
pub use listener::{Handler, HttpServer};

/// Decodes the query string of `uri`. Later duplicates win.
pub fn query_params(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    urlencoding::decode(&raw).map_or_else(|_| raw.clone(), |decoded| decoded.into_owned())
}

/// Builds a response with the given status, content type and body.
pub fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

pub fn text(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    let body: String = body.into();
    response(status, "text/plain; charset=utf-8", body)
}

pub fn html(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    let body: String = body.into();
    response(status, "text/html; charset=utf-8", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_decodes_values() {
        let uri: Uri = "/machineconfig?m=aa%3Abb%3Acc&u=1234-abcd&flag".parse().unwrap();
        let params = query_params(&uri);
        assert_eq!(params.get("m").map(String::as_str), Some("aa:bb:cc"));
        assert_eq!(params.get("u").map(String::as_str), Some("1234-abcd"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_query_params_without_query() {
        let uri: Uri = "/callback".parse().unwrap();
        assert!(query_params(&uri).is_empty());
    }

    #[test]
    fn test_plus_decodes_to_space() {
        let uri: Uri = "/cb?error_description=access+denied".parse().unwrap();
        assert_eq!(query_params(&uri)["error_description"], "access denied");
    }

    #[test]
    fn test_response_sets_content_type() {
        let response = response(StatusCode::OK, "application/yaml", "a: 1\n");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/yaml");
    }
}
