//! Optional API key check for the export endpoints
//!
//! With `api.api_key` set, every request must carry the same value in the
//! [`API_KEY_HEADER`] header. [`ExportClient`](crate::client::ExportClient)
//! sends it when `client.api_key` is set.

use crate::client::API_KEY_HEADER;
use crate::error::ApiError;
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Reject requests whose `X-Api-Key` does not match the configured key
///
/// A `None` key disables the check. Rejections are 401 with the usual
/// [`ApiError`] body.
///
/// ```no_run
/// use axum::{Router, middleware};
/// use proposal_export::api::auth::require_api_key;
///
/// let router: Router = Router::new().layer(middleware::from_fn_with_state(
///     Some("export-key".to_string()),
///     require_api_key,
/// ));
/// ```
pub async fn require_api_key(
    State(expected_api_key): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected_api_key else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if keys_match(key.as_bytes(), expected.as_bytes()) => next.run(request).await,
        Some(_) => {
            tracing::debug!(path = %request.uri().path(), "Rejected export request with wrong API key");
            unauthorized("Invalid API key")
        }
        None => unauthorized("Missing X-Api-Key header"),
    }
}

/// Compare without an early exit on the first differing byte
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::unauthorized(message))).into_response()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt;

    fn guarded(api_key: Option<&str>) -> Router {
        Router::new()
            .route("/api/proposals/p/export/status", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                api_key.map(str::to_string),
                require_api_key,
            ))
    }

    async fn call(app: Router, header: Option<(&str, &str)>) -> (StatusCode, Option<ApiError>) {
        let mut request = Request::builder().uri("/api/proposals/p/export/status");
        if let Some((name, value)) = header {
            request = request.header(name, value);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).ok())
    }

    #[tokio::test]
    async fn open_when_no_key_is_configured() {
        let (status, _) = call(guarded(None), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn matching_key_passes_in_any_header_case() {
        for name in [API_KEY_HEADER, "x-api-key", "X-API-KEY"] {
            let (status, _) = call(guarded(Some("s3cret")), Some((name, "s3cret"))).await;
            assert_eq!(status, StatusCode::OK, "{name}");
        }
    }

    #[tokio::test]
    async fn wrong_or_missing_key_is_unauthorized() {
        let cases = [
            (Some((API_KEY_HEADER, "guess")), "Invalid API key"),
            (Some((API_KEY_HEADER, "s3cret-but-longer")), "Invalid API key"),
            (None, "Missing X-Api-Key header"),
        ];
        for (header, message) in cases {
            let (status, error) = call(guarded(Some("s3cret")), header).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            let error = error.expect("401 carries an ApiError body");
            assert_eq!(error.code, "unauthorized");
            assert_eq!(error.error, message);
        }
    }

    #[test]
    fn key_comparison() {
        assert!(keys_match(b"abc", b"abc"));
        assert!(!keys_match(b"abc", b"abd"));
        assert!(!keys_match(b"abc", b"abcd"));
        assert!(keys_match(b"", b""));
    }
}
