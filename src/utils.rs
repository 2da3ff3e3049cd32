//! Utility functions for file naming and path manipulation

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Fallback stem when a title sanitizes to nothing
const DEFAULT_FILE_STEM: &str = "proposal";

/// Reduce a proposal title to a safe file stem
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`. An empty title yields
/// `"proposal"`.
///
/// # Examples
///
/// ```
/// use proposal_export::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Q3 Proposal: ACME/Corp"), "Q3_Proposal__ACME_Corp");
/// assert_eq!(sanitize_filename("offre-été"), "offre-_t_");
/// assert_eq!(sanitize_filename(""), "proposal");
/// ```
pub fn sanitize_filename(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        DEFAULT_FILE_STEM.to_string()
    } else {
        sanitized
    }
}

/// Build a `Content-Disposition` header value for an attachment
///
/// Carries both an ASCII-safe `filename` and an RFC 5987 `filename*`.
pub fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(filename)
    )
}

/// First free path for `path`: the path itself, or `name (n).ext`
///
/// # Examples
///
/// ```
/// use proposal_export::utils::get_unique_path;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/proposal-export-doc/Q3_Proposal.pdf");
/// let unique = get_unique_path(path).unwrap();
/// // If Q3_Proposal.pdf exists, returns Q3_Proposal (1).pdf, and so on
/// ```
pub fn get_unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract file stem from {}", path.display())))?;

    let extension = path.extension().and_then(|e| e.to_str());

    let parent = path.parent().ok_or_else(|| {
        Error::Other(format!("cannot extract parent directory of {}", path.display()))
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "could not find a unique filename for {} after {} attempts",
            path.display(),
            MAX_RENAME_ATTEMPTS
        ),
    )))
}
