//! Export options and their builder
//!
//! [`ExportOptions`] is what the client sends with an export request. Build it with
//! [`ExportOptions::builder`], which rejects out-of-range values before anything
//! reaches the network.
//!
//! ```
//! use proposal_export::options::{ExportMethod, ExportOptions, Quality};
//!
//! let options = ExportOptions::builder()
//!     .method(ExportMethod::Office)
//!     .quality(Quality::High)
//!     .landscape(true)
//!     .margins(10.0, 15.0, 10.0, 15.0)
//!     .build()
//!     .unwrap();
//! assert!(options.landscape);
//! ```

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Smallest accepted margin, in millimetres
pub const MIN_MARGIN_MM: f64 = 0.0;
/// Largest accepted margin, in millimetres
pub const MAX_MARGIN_MM: f64 = 50.0;

/// Rendering method requested by the client
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportMethod {
    /// Let the server pick whichever method is available
    #[default]
    Auto,
    /// Headless-browser rendering of the HTML proposal
    #[serde(alias = "puppeteer")]
    Browser,
    /// Office-suite conversion of the DOCX proposal
    #[serde(alias = "libreoffice")]
    Office,
}

impl ExportMethod {
    /// The concrete method, if this is not `Auto`
    pub fn concrete(self) -> Option<RenderMethod> {
        match self {
            ExportMethod::Auto => None,
            ExportMethod::Browser => Some(RenderMethod::Browser),
            ExportMethod::Office => Some(RenderMethod::Office),
        }
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ExportMethod::Auto => "auto",
            ExportMethod::Browser => "browser",
            ExportMethod::Office => "office",
        }
    }
}

impl std::str::FromStr for ExportMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ExportMethod::Auto),
            "browser" | "puppeteer" => Ok(ExportMethod::Browser),
            "office" | "libreoffice" => Ok(ExportMethod::Office),
            other => Err(ValidationError::new(
                "method",
                format!("unknown export method '{other}'"),
            )),
        }
    }
}

/// Concrete rendering method actually used for a job (auto already resolved)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RenderMethod {
    /// Headless-browser rendering
    #[serde(alias = "puppeteer")]
    Browser,
    /// Office-suite conversion
    #[serde(alias = "libreoffice")]
    Office,
}

impl RenderMethod {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            RenderMethod::Browser => "browser",
            RenderMethod::Office => "office",
        }
    }

    /// Parse a stored method name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "browser" | "puppeteer" => Some(RenderMethod::Browser),
            "office" | "libreoffice" => Some(RenderMethod::Office),
            _ => None,
        }
    }
}

impl From<RenderMethod> for ExportMethod {
    fn from(method: RenderMethod) -> Self {
        match method {
            RenderMethod::Browser => ExportMethod::Browser,
            RenderMethod::Office => ExportMethod::Office,
        }
    }
}

impl std::fmt::Display for RenderMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output quality
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Fast, low-resolution output
    Draft,
    /// Default quality
    #[default]
    Standard,
    /// Print quality
    High,
}

impl Quality {
    /// Multiplier applied to the base render estimate
    pub(crate) fn time_factor(self) -> f64 {
        match self {
            Quality::Draft => 0.5,
            Quality::Standard => 1.0,
            Quality::High => 2.0,
        }
    }
}

/// Page margins in millimetres
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Margins {
    /// Top margin
    pub top: f64,
    /// Right margin
    pub right: f64,
    /// Bottom margin
    pub bottom: f64,
    /// Left margin
    pub left: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self::uniform(20.0)
    }
}

impl Margins {
    /// Same margin on every side
    pub fn uniform(mm: f64) -> Self {
        Self {
            top: mm,
            right: mm,
            bottom: mm,
            left: mm,
        }
    }

    /// Check every side against `[MIN_MARGIN_MM, MAX_MARGIN_MM]`
    ///
    /// Sides are checked in top, right, bottom, left order and the first
    /// offending side is reported.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (side, value) in [
            ("top", self.top),
            ("right", self.right),
            ("bottom", self.bottom),
            ("left", self.left),
        ] {
            let field = format!("margins.{side}");
            if !value.is_finite() {
                return Err(ValidationError::new(field, "must be a finite number"));
            }
            if value < MIN_MARGIN_MM {
                return Err(ValidationError::new(
                    field,
                    format!("{value} mm is below the minimum of {MIN_MARGIN_MM} mm"),
                ));
            }
            if value > MAX_MARGIN_MM {
                return Err(ValidationError::new(
                    field,
                    format!("{value} mm exceeds the maximum of {MAX_MARGIN_MM} mm"),
                ));
            }
        }
        Ok(())
    }
}

/// Options for a single export request
///
/// Serialized with the camelCase names the export endpoint expects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Requested rendering method
    #[serde(default)]
    pub method: ExportMethod,

    /// Output quality
    #[serde(default)]
    pub quality: Quality,

    /// Generate a table of contents
    #[serde(rename = "includeTOC", default = "default_true")]
    pub include_toc: bool,

    /// Number the pages
    #[serde(default = "default_true")]
    pub include_page_numbers: bool,

    /// Render running header and footer
    #[serde(default = "default_true")]
    pub header_footer: bool,

    /// Landscape orientation
    #[serde(default)]
    pub landscape: bool,

    /// Page margins (mm)
    #[serde(default)]
    pub margins: Margins,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            method: ExportMethod::Auto,
            quality: Quality::Standard,
            include_toc: true,
            include_page_numbers: true,
            header_footer: true,
            landscape: false,
            margins: Margins::default(),
        }
    }
}

impl ExportOptions {
    /// Start building options from the defaults
    pub fn builder() -> ExportOptionsBuilder {
        ExportOptionsBuilder::default()
    }

    /// Re-check invariants on options that were not produced by the builder
    /// (e.g. deserialized from a request body)
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.margins.validate()
    }

    /// Advisory render-time estimate in seconds
    pub fn estimated_time_secs(&self) -> u64 {
        let base = match self.method {
            ExportMethod::Browser => 5.0,
            ExportMethod::Office => 10.0,
            ExportMethod::Auto => 8.0,
        };
        (base * self.quality.time_factor()).ceil() as u64
    }
}

/// Fluent builder for [`ExportOptions`]
#[derive(Clone, Debug, Default)]
pub struct ExportOptionsBuilder {
    options: ExportOptions,
}

impl ExportOptionsBuilder {
    /// Rendering method
    pub fn method(mut self, method: ExportMethod) -> Self {
        self.options.method = method;
        self
    }

    /// Output quality
    pub fn quality(mut self, quality: Quality) -> Self {
        self.options.quality = quality;
        self
    }

    /// Include a table of contents
    pub fn include_toc(mut self, yes: bool) -> Self {
        self.options.include_toc = yes;
        self
    }

    /// Number the pages
    pub fn include_page_numbers(mut self, yes: bool) -> Self {
        self.options.include_page_numbers = yes;
        self
    }

    /// Render header and footer
    pub fn header_footer(mut self, yes: bool) -> Self {
        self.options.header_footer = yes;
        self
    }

    /// Landscape orientation
    pub fn landscape(mut self, yes: bool) -> Self {
        self.options.landscape = yes;
        self
    }

    /// Margins in top, right, bottom, left order (mm)
    pub fn margins(mut self, top: f64, right: f64, bottom: f64, left: f64) -> Self {
        self.options.margins = Margins {
            top,
            right,
            bottom,
            left,
        };
        self
    }

    /// Validate and produce the options
    pub fn build(self) -> Result<ExportOptions, ValidationError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

fn default_true() -> bool {
    true
}
