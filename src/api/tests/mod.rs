use super::*;
use crate::test_helpers::{StubRenderer, create_test_service};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt;

mod export;

/// Router over a fresh service, plus the tempdir backing it
async fn test_router(renderer: StubRenderer) -> (Router, Arc<ExportService>, tempfile::TempDir) {
    let (service, temp_dir) = create_test_service(renderer).await;
    let config = service.config().clone();
    (create_router(service.clone(), config), service, temp_dir)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _service, _dir) = test_router(StubRenderer::default()).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_cors_enabled() {
    let (service, _dir) = create_test_service(StubRenderer::default()).await;
    let mut config = (**service.config()).clone();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let app = create_router(service, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_api_key_guards_every_route() {
    let (service, _dir) = create_test_service(StubRenderer::default()).await;
    let mut config = (**service.config()).clone();
    config.api.api_key = Some("s3cret".to_string());
    let app = create_router(service, Arc::new(config));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/capabilities").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "unauthorized");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/capabilities")
                .header("X-Api-Key", "s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_serve_stops_on_shutdown() {
    let (service, _dir) = create_test_service(StubRenderer::default()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let server = tokio::spawn({
        let service = service.clone();
        let config = service.config().clone();
        async move { serve(listener, service, config).await }
    });

    let health = reqwest::get(format!("http://{address}/health"))
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    service.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_spawn_api_server_method() {
    let (service, _dir) = create_test_service(StubRenderer::default()).await;

    let api_handle = service.spawn_api_server();
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.shutdown().await.unwrap();

    // Either it stopped cleanly or the default port was taken on this host
    let _ = tokio::time::timeout(Duration::from_secs(5), api_handle).await;
}
