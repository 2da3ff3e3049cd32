//! Renderers that turn a proposal source document into a PDF

use super::ProgressReporter;
use crate::config::ProcessorConfig;
use crate::error::{Error, Result};
use crate::options::{ExportMethod, ExportOptions, RenderMethod};
use crate::types::{JobId, ProposalId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Chromium-family executables tried in order
const BROWSER_CANDIDATES: &[&str] = &["chromium", "chromium-browser", "google-chrome"];

/// Office-suite executables tried in order
const OFFICE_CANDIDATES: &[&str] = &["soffice", "libreoffice"];

/// Maximum stderr characters kept in an error message
const STDERR_TAIL_CHARS: usize = 400;

/// Render methods a renderer can execute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderCapabilities {
    /// Headless browser rendering is available
    pub browser: bool,
    /// Office-suite conversion is available
    pub office: bool,
}

impl RenderCapabilities {
    /// Whether `method` can be executed
    pub fn supports(&self, method: RenderMethod) -> bool {
        match method {
            RenderMethod::Browser => self.browser,
            RenderMethod::Office => self.office,
        }
    }

    /// Available methods in preference order
    pub fn methods(&self) -> Vec<RenderMethod> {
        [RenderMethod::Browser, RenderMethod::Office]
            .into_iter()
            .filter(|m| self.supports(*m))
            .collect()
    }
}

/// Pick the concrete method for a job
///
/// `Auto` prefers the browser and falls back to the office suite.
///
/// # Errors
/// Returns [`Error::NotSupported`] if the requested method (or, for `Auto`,
/// any method) is unavailable.
pub fn resolve_method(requested: ExportMethod, caps: RenderCapabilities) -> Result<RenderMethod> {
    match requested.concrete() {
        Some(method) if caps.supports(method) => Ok(method),
        Some(method) => Err(Error::NotSupported(format!(
            "render method '{}' is not available on this host",
            method
        ))),
        None => caps.methods().into_iter().next().ok_or_else(|| {
            Error::NotSupported(
                "no render method is available: install chromium or LibreOffice".to_string(),
            )
        }),
    }
}

/// One render to perform
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Job being rendered
    pub job_id: JobId,
    /// Proposal whose source document is rendered
    pub proposal_id: ProposalId,
    /// Resolved method
    pub method: RenderMethod,
    /// Options the job was submitted with
    pub options: ExportOptions,
    /// Where the PDF must be written
    pub output_path: PathBuf,
}

/// Trait for PDF renderers
///
/// Implementations write the PDF to [`RenderRequest::output_path`] and may
/// report intermediate progress; the processor marks the job complete.
///
/// [`ExportOptions`] are best effort: an option the underlying tool cannot
/// express is ignored and logged at `debug`, never an error.
///
/// # Examples
///
/// ```no_run
/// use proposal_export::processor::{CliRenderer, Renderer};
/// use proposal_export::config::ProcessorConfig;
///
/// let renderer = CliRenderer::from_config(&ProcessorConfig::default());
/// println!("{} can render: {:?}", renderer.name(), renderer.capabilities().methods());
/// ```
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render the proposal to `request.output_path`
    ///
    /// # Errors
    ///
    /// Returns an error if the source document is missing, the tool fails or
    /// times out, or no output is produced.
    async fn render(&self, request: &RenderRequest, progress: &ProgressReporter) -> Result<()>;

    /// Methods this renderer can execute
    fn capabilities(&self) -> RenderCapabilities;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Renderer driving external command-line tools
///
/// Browser jobs convert `{source_dir}/{proposalId}.html` with headless
/// Chromium; office jobs convert `{source_dir}/{proposalId}.docx` with
/// LibreOffice.
///
/// | Option | Browser | Office |
/// |---|---|---|
/// | `landscape`, `margins` | `@page` rule | ignored (taken from the document) |
/// | `headerFooter` | `--no-pdf-header-footer` | ignored |
/// | `quality`, `includeTOC`, `includePageNumbers` | ignored | ignored |
pub struct CliRenderer {
    browser_path: Option<PathBuf>,
    office_path: Option<PathBuf>,
    source_dir: PathBuf,
    timeout: Duration,
}

impl CliRenderer {
    /// Create a renderer with explicit tool paths
    pub fn new(
        browser_path: Option<PathBuf>,
        office_path: Option<PathBuf>,
        source_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            browser_path,
            office_path,
            source_dir,
            timeout,
        }
    }

    /// Create a renderer from configuration, searching PATH for missing tools
    pub fn from_config(config: &ProcessorConfig) -> Self {
        let browser_path = config.browser_path.clone().or_else(|| {
            config
                .search_path
                .then(|| find_first(BROWSER_CANDIDATES))
                .flatten()
        });
        let office_path = config.office_path.clone().or_else(|| {
            config
                .search_path
                .then(|| find_first(OFFICE_CANDIDATES))
                .flatten()
        });

        Self::new(
            browser_path,
            office_path,
            config.source_dir.clone(),
            config.render_timeout,
        )
    }

    fn source_path(&self, proposal_id: &ProposalId, extension: &str) -> PathBuf {
        self.source_dir
            .join(format!("{}.{}", proposal_id.as_str(), extension))
    }

    async fn render_browser(&self, binary: &Path, request: &RenderRequest) -> Result<()> {
        let source = self.source_path(&request.proposal_id, "html");
        let source = require_source(&source).await?;

        log_unsupported_options(request, &["quality", "includeTOC", "includePageNumbers"]);

        // Page size and margins go in through a wrapper carrying an @page rule
        let html = tokio::fs::read_to_string(&source).await?;
        let base = source
            .parent()
            .map(|dir| format!("file://{}/", dir.display()))
            .unwrap_or_default();
        let page = inject_print_style(&html, &base, &print_stylesheet(&request.options));
        let wrapper = scratch_path(request, "html")?;
        tokio::fs::write(&wrapper, page).await?;

        let mut command = Command::new(binary);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg(format!("--print-to-pdf={}", request.output_path.display()));
        if !request.options.header_footer {
            command.arg("--no-pdf-header-footer");
        }
        command.arg(format!("file://{}", wrapper.display()));

        let result = run_tool(command, "chromium", self.timeout).await;
        if let Err(e) = tokio::fs::remove_file(&wrapper).await {
            tracing::debug!(path = %wrapper.display(), error = %e, "Failed to remove print wrapper");
        }
        result
    }

    async fn render_office(&self, binary: &Path, request: &RenderRequest) -> Result<()> {
        let source = self.source_path(&request.proposal_id, "docx");
        let source = require_source(&source).await?;

        log_unsupported_options(
            request,
            &[
                "quality",
                "landscape",
                "margins",
                "includeTOC",
                "includePageNumbers",
                "headerFooter",
            ],
        );

        // soffice names its output after the source; convert into a private directory
        let scratch = scratch_path(request, "convert")?;
        tokio::fs::create_dir_all(&scratch).await?;

        let mut command = Command::new(binary);
        command
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(&scratch)
            .arg(&source);

        let result = async {
            run_tool(command, "soffice", self.timeout).await?;
            let converted = scratch.join(format!("{}.pdf", request.proposal_id.as_str()));
            tokio::fs::rename(&converted, &request.output_path)
                .await
                .map_err(|e| {
                    Error::ExternalTool(format!(
                        "soffice did not produce {}: {}",
                        converted.display(),
                        e
                    ))
                })
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            tracing::debug!(path = %scratch.display(), error = %e, "Failed to remove scratch directory");
        }
        result
    }
}

#[async_trait]
impl Renderer for CliRenderer {
    async fn render(&self, request: &RenderRequest, progress: &ProgressReporter) -> Result<()> {
        let binary = match request.method {
            RenderMethod::Browser => self.browser_path.as_deref(),
            RenderMethod::Office => self.office_path.as_deref(),
        }
        .ok_or_else(|| {
            Error::NotSupported(format!(
                "render method '{}' is not available on this host",
                request.method
            ))
        })?;

        progress.report(10).await;

        match request.method {
            RenderMethod::Browser => self.render_browser(binary, request).await?,
            RenderMethod::Office => self.render_office(binary, request).await?,
        }

        progress.report(90).await;

        if tokio::fs::metadata(&request.output_path).await.is_err() {
            return Err(Error::ExternalTool(format!(
                "{} renderer produced no output",
                request.method
            )));
        }
        Ok(())
    }

    fn capabilities(&self) -> RenderCapabilities {
        RenderCapabilities {
            browser: self.browser_path.is_some(),
            office: self.office_path.is_some(),
        }
    }

    fn name(&self) -> &'static str {
        "cli"
    }
}

fn find_first(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().find_map(|name| which::which(name).ok())
}

async fn require_source(path: &Path) -> Result<PathBuf> {
    match tokio::fs::canonicalize(path).await {
        Ok(path) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("source document {} not found", path.display()),
        ))),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Hidden sibling of the output file, private to one job
fn scratch_path(request: &RenderRequest, suffix: &str) -> Result<PathBuf> {
    let parent = request
        .output_path
        .parent()
        .ok_or_else(|| Error::Other("output path has no parent directory".to_string()))?;
    Ok(parent.join(format!(".{}.{}", request.job_id, suffix)))
}

/// CSS `@page` rule for the orientation and margins in `options`
fn print_stylesheet(options: &ExportOptions) -> String {
    let orientation = if options.landscape {
        "landscape"
    } else {
        "portrait"
    };
    let m = &options.margins;
    format!(
        "@page {{ size: A4 {orientation}; margin: {}mm {}mm {}mm {}mm; }}",
        m.top, m.right, m.bottom, m.left
    )
}

/// Insert a `<base>` and a `<style>` element at the start of the document head
///
/// Without a `<head>` element both are prepended to the document.
fn inject_print_style(html: &str, base_href: &str, css: &str) -> String {
    let mut injected = String::new();
    if !base_href.is_empty() {
        injected.push_str(&format!("<base href=\"{base_href}\">"));
    }
    injected.push_str(&format!("<style>{css}</style>"));

    let lower = html.to_ascii_lowercase();
    let head_end = lower.match_indices("<head").find_map(|(start, _)| {
        let rest = &lower[start + "<head".len()..];
        match rest.chars().next() {
            Some('>' | ' ' | '\t' | '\n' | '\r') => {
                rest.find('>').map(|close| start + "<head".len() + close + 1)
            }
            _ => None,
        }
    });

    match head_end {
        Some(at) => format!("{}{}{}", &html[..at], injected, &html[at..]),
        None => format!("{injected}{html}"),
    }
}

/// The subset of `candidates` set to something other than the default
fn non_default_options<'a>(options: &ExportOptions, candidates: &[&'a str]) -> Vec<&'a str> {
    let defaults = ExportOptions::default();
    let changed = |name: &str| match name {
        "landscape" => options.landscape != defaults.landscape,
        "margins" => options.margins != defaults.margins,
        "includeTOC" => options.include_toc != defaults.include_toc,
        "includePageNumbers" => options.include_page_numbers != defaults.include_page_numbers,
        "headerFooter" => options.header_footer != defaults.header_footer,
        "quality" => options.quality != defaults.quality,
        _ => false,
    };
    candidates
        .iter()
        .copied()
        .filter(|name| changed(name))
        .collect()
}

fn log_unsupported_options(request: &RenderRequest, unsupported: &[&str]) {
    let ignored = non_default_options(&request.options, unsupported);
    if !ignored.is_empty() {
        tracing::debug!(
            job_id = %request.job_id,
            method = %request.method,
            options = ?ignored,
            "Renderer cannot express these options, ignoring"
        );
    }
}

async fn run_tool(mut command: Command, tool: &str, timeout: Duration) -> Result<()> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(Error::ExternalTool(format!(
                "failed to execute {}: {}",
                tool, e
            )));
        }
        Err(_) => {
            return Err(Error::ExternalTool(format!(
                "{} timeout after {} seconds",
                tool,
                timeout.as_secs()
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .chars()
            .rev()
            .take(STDERR_TAIL_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return Err(Error::ExternalTool(format!(
            "{} exited with {}: {}",
            tool,
            output.status,
            tail.trim()
        )));
    }
    Ok(())
}
