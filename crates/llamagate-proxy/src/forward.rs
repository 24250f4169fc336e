//! Forwards a buffered client request to a model's backend process,
//! streaming the response straight through (§4.5).

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::TryStreamExt;
use reqwest::Client;
use tracing::{debug, error};

/// Headers that must not cross the proxy boundary.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    "authorization",
];

fn should_forward_header(name: &str) -> bool {
    !HOP_BY_HOP_HEADERS.contains(&name.to_lowercase().as_str())
}

/// Outcome of attempting to reach the backend at all; distinguished from an
/// HTTP-level error response so the caller can track `failure_streak`.
pub enum ForwardOutcome {
    /// Backend answered with 2xx-4xx; forwarded through as-is.
    Response(Response),
    /// Backend answered but with a 5xx; forwarded through, but counts toward
    /// `failure_streak` the same as a transport failure (§4.5.6).
    BackendError(Response),
    TransportFailure(String),
}

/// Forward `body` to `http://127.0.0.1:<port><path>`, preserving headers and
/// method, and stream the response back without buffering.
pub async fn forward_request(
    client: &Client,
    method: reqwest::Method,
    port: u16,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
    is_streaming: bool,
) -> ForwardOutcome {
    let upstream_url = format!("http://127.0.0.1:{port}{path}");
    debug!(upstream = %upstream_url, %method, is_streaming, "forwarding request");

    let mut req_builder = client.request(method, &upstream_url).header("content-type", "application/json");
    for (name, value) in headers.iter() {
        if should_forward_header(name.as_str())
            && let Ok(value_str) = value.to_str()
        {
            req_builder = req_builder.header(name.as_str(), value_str);
        }
    }

    let response = match req_builder.body(body).send().await {
        Ok(resp) => resp,
        Err(e) => {
            error!(upstream = %upstream_url, error = %e, "backend unreachable");
            return ForwardOutcome::TransportFailure(e.to_string());
        }
    };

    let status = response.status();
    if !status.is_success() {
        let error_bytes = response.bytes().await.unwrap_or_default();
        let mapped = Response::builder()
            .status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY))
            .header("content-type", "application/json")
            .body(Body::from(error_bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        return if status.is_server_error() {
            ForwardOutcome::BackendError(mapped)
        } else {
            ForwardOutcome::Response(mapped)
        };
    }

    let built = if is_streaming {
        forward_streaming(response).await
    } else {
        forward_buffered(response).await
    };
    ForwardOutcome::Response(built)
}

async fn forward_streaming(response: reqwest::Response) -> Response {
    let byte_stream = response.bytes_stream().map_err(std::io::Error::other);
    let body = Body::from_stream(byte_stream);
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("x-accel-buffering", "no")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn forward_buffered(response: reqwest::Response) -> Response {
    let content_type = response
        .headers()
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    match response.bytes().await {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", content_type)
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            error!(error = %e, "failed to read upstream response body");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
