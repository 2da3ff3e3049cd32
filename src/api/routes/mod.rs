//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`export`]: submit, status, download and per-job events
//! - [`system`]: health, capabilities, OpenAPI

use serde::{Deserialize, Serialize};

mod export;
mod system;

// Re-export all handlers so `routes::function_name` continues to work
pub use export::*;
pub use system::*;

/// Query parameters identifying a job on the export routes
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct JobQuery {
    /// Job returned by the submit call (required)
    pub job_id: Option<String>,
}
