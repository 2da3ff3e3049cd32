//! Application state for the API server

use crate::{Config, ExportService};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The export job service
    pub service: Arc<ExportService>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: Arc<ExportService>, config: Arc<Config>) -> Self {
        Self { service, config }
    }
}
