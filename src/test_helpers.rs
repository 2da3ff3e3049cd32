//! Shared test helpers for creating ExportService instances in tests.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::processor::{ProgressReporter, RenderCapabilities, RenderRequest, Renderer};
use crate::service::ExportService;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Bytes written by [`StubRenderer`]
pub(crate) const STUB_PDF: &[u8] = b"%PDF-1.7\n% stub export\n%%EOF\n";

/// Renderer that writes [`STUB_PDF`] after an optional delay, or fails
pub(crate) struct StubRenderer {
    pub(crate) caps: RenderCapabilities,
    pub(crate) delay: Duration,
    pub(crate) fail_with: Option<String>,
}

impl Default for StubRenderer {
    fn default() -> Self {
        Self {
            caps: RenderCapabilities {
                browser: true,
                office: true,
            },
            delay: Duration::from_millis(20),
            fail_with: None,
        }
    }
}

#[async_trait]
impl Renderer for StubRenderer {
    async fn render(&self, request: &RenderRequest, progress: &ProgressReporter) -> Result<()> {
        progress.report(25).await;
        tokio::time::sleep(self.delay).await;
        if let Some(message) = &self.fail_with {
            return Err(Error::ExternalTool(message.clone()));
        }
        progress.report(75).await;
        tokio::fs::write(&request.output_path, STUB_PDF).await?;
        Ok(())
    }

    fn capabilities(&self) -> RenderCapabilities {
        self.caps
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Config rooted in a fresh temp directory
pub(crate) fn test_config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("jobs.db");
    config.processor.output_dir = root.join("exports");
    config.processor.source_dir = root.join("proposals");
    config.processor.search_path = false;
    config
}

/// Helper to create a test ExportService backed by `renderer`.
/// Returns the service and the tempdir (which must be kept alive).
pub(crate) async fn create_test_service(
    renderer: StubRenderer,
) -> (Arc<ExportService>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let service = ExportService::with_renderer(config, Arc::new(renderer))
        .await
        .unwrap();
    (Arc::new(service), temp_dir)
}
