//! Request and response types used throughout the pipeline.

use atlas_core::ErrorEnvelope;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;
use serde::Serialize;

/// The HTTP request type used in the middleware pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building JSON responses.
pub trait ResponseExt {
    /// Creates a JSON response from any serializable body.
    fn json<T: Serialize>(status: StatusCode, body: &T) -> Response;

    /// Creates the admin API error envelope, `{"success": false, "message": ...}`.
    fn json_error(status: StatusCode, envelope: &ErrorEnvelope) -> Response;
}

impl ResponseExt for Response {
    fn json<T: Serialize>(status: StatusCode, body: &T) -> Response {
        match serde_json::to_vec(body) {
            Ok(bytes) => build(status, Bytes::from(bytes)),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize response body");
                build(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Bytes::from_static(br#"{"success":false,"message":"Internal server error"}"#),
                )
            }
        }
    }

    fn json_error(status: StatusCode, envelope: &ErrorEnvelope) -> Response {
        Self::json(status, envelope)
    }
}

fn build(status: StatusCode, body: Bytes) -> Response {
    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_json_error_envelope() {
        let response = Response::json_error(
            StatusCode::UNAUTHORIZED,
            &ErrorEnvelope::new("Authentication required"),
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"success": false, "message": "Authentication required"})
        );
    }

    #[test]
    fn test_json_response() {
        let response = Response::json(StatusCode::OK, &serde_json::json!({"success": true}));
        assert_eq!(response.status(), StatusCode::OK);
    }
}
