//! REST API server module
//!
//! Serves the export job endpoints the [`ExportClient`](crate::client::ExportClient)
//! talks to, plus health, capabilities and OpenAPI documentation.

use crate::{Config, ExportService, Result};
use axum::{Router, http::HeaderValue, middleware, routing::get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Export Jobs
/// - `POST /api/proposals/:proposal_id/export` - Submit an export job
/// - `GET /api/proposals/:proposal_id/export/status?jobId=` - Poll job status
/// - `GET /api/proposals/:proposal_id/export/download?jobId=` - Fetch the PDF
/// - `GET /api/proposals/:proposal_id/export/events?jobId=` - Server-sent events for one job
///
/// ## System
/// - `GET /capabilities` - Render methods available on this host
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
pub fn create_router(service: Arc<ExportService>, config: Arc<Config>) -> Router {
    let state = AppState::new(service, config.clone());

    let router = Router::new()
        // Export Jobs
        .route(
            "/api/proposals/:proposal_id/export",
            axum::routing::post(routes::submit_export),
        )
        .route(
            "/api/proposals/:proposal_id/export/status",
            get(routes::export_status),
        )
        .route(
            "/api/proposals/:proposal_id/export/download",
            get(routes::download_export),
        )
        .route(
            "/api/proposals/:proposal_id/export/events",
            get(routes::export_events),
        )
        // System
        .route("/capabilities", get(routes::get_capabilities))
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state);

    // Last layer applied runs first: Trace -> CORS -> Auth -> Handler
    let router = if config.api.api_key.is_some() {
        router.layer(middleware::from_fn_with_state(
            config.api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        router
    };

    let router = if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    };

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(DefaultOnResponse::new().level(tracing::Level::DEBUG)),
    )
}

/// Build a CORS layer based on configured origins ("*" allows any origin)
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the service shuts down or the listener fails.
///
/// # Example
///
/// ```no_run
/// use proposal_export::{Config, ExportService};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let service = Arc::new(ExportService::new((*config).clone()).await?);
///
/// proposal_export::api::start_api_server(service, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(service: Arc<ExportService>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    serve(listener, service, config).await
}

/// Serve the API on an already-bound listener
///
/// Returns once [`ExportService::shutdown`] has been called and open
/// connections have drained.
pub async fn serve(
    listener: TcpListener,
    service: Arc<ExportService>,
    config: Arc<Config>,
) -> Result<()> {
    let address = listener.local_addr().map_err(crate::error::Error::Io)?;
    let shutdown = service.shutdown_token();
    let app = create_router(service, config);

    tracing::info!(address = %address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
