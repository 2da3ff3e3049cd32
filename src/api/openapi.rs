//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the proposal-export REST
//! API using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the proposal-export REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "proposal-export REST API",
        version = "0.1.0",
        description = "Asynchronous PDF export jobs for proposal documents",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Export jobs
        crate::api::routes::submit_export,
        crate::api::routes::export_status,
        crate::api::routes::download_export,
        crate::api::routes::export_events,

        // System
        crate::api::routes::get_capabilities,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Request types from options.rs
        crate::options::ExportOptions,
        crate::options::ExportMethod,
        crate::options::RenderMethod,
        crate::options::Quality,
        crate::options::Margins,

        // Core types from types.rs
        crate::types::ProposalId,
        crate::types::Status,
        crate::types::StatusResponse,
        crate::types::SubmitResponse,
        crate::types::Capabilities,
        crate::types::Event,

        // Error types from error.rs
        crate::error::ApiError,
    )),
    tags(
        (name = "export", description = "Export jobs - Submit, poll, download and follow PDF exports"),
        (name = "system", description = "System endpoints - Health checks, capabilities, OpenAPI spec"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security addon to add API key authentication scheme to OpenAPI spec
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}
