//! Single mapping layer from `GatewayError` to the HTTP error body shape
//! (§6). Internal layers never construct HTTP types directly; this is the
//! only place that does.

use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use llamagate_core::GatewayError;

use crate::models::ErrorBody;

pub fn gateway_error_response(err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody::from_gateway_error(err);
    let mut response = (status, Json(body)).into_response();

    if let Some(secs) = err.retry_after_secs()
        && let Ok(value) = HeaderValue::from_str(&secs.to_string())
    {
        response.headers_mut().insert("retry-after", value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_sets_retry_after_header() {
        let err = GatewayError::QueueFull {
            model: "m1".into(),
            retry_after_secs: 9,
        };
        let response = gateway_error_response(&err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("retry-after").unwrap(), "9");
    }

    #[test]
    fn model_not_found_maps_to_404() {
        let err = GatewayError::ModelNotFound("ghost".into());
        let response = gateway_error_response(&err);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
