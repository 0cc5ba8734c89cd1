//! Error types for the certbatch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CertError`]: **Fatal** for one command or run. A required reference
//!   is missing, no worker identity could be loaded, the spreadsheet cannot
//!   be read. Returned as `Err(CertError)` from configuration, scanning and
//!   introspection calls.
//!
//! * [`RowError`]: **Non-fatal**. A single row failed somewhere in its
//!   remote pipeline but every other row carries on. Stored inside
//!   [`crate::pipeline::worker::RowOutcome`] and counted as `failed`.
//!
//! A row error never crosses a row boundary and a run error never crosses
//! into the watch loop; both end up as a status change plus a log entry.

use std::path::PathBuf;
use thiserror::Error;

/// Maximum length of an error detail quoted in a log line.
pub const REASON_LIMIT: usize = 100;

/// All fatal errors returned by the certbatch library.
#[derive(Debug, Error)]
pub enum CertError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A reference required to start a run is empty.
    #[error("Missing configuration: {field} is required")]
    MissingConfig { field: &'static str },

    /// Builder or command validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A column reference is not made of letters A–Z.
    #[error("Invalid column '{input}': expected letters such as A, O or AB")]
    InvalidColumn { input: String },

    // ── Identity errors ───────────────────────────────────────────────────
    /// No credential file matched the naming conventions.
    #[error("No worker identities found in '{dir}'")]
    NoIdentities { dir: PathBuf },

    /// A credential file exists but could not be loaded.
    #[error("Failed to load identity '{path}': {reason}")]
    IdentityLoad { path: PathBuf, reason: String },

    // ── Run errors ────────────────────────────────────────────────────────
    /// A start command arrived while a batch is in progress.
    #[error("A batch is already running")]
    AlreadyRunning,

    /// A collaborator service call failed outside a row pipeline.
    #[error("{op} failed: {detail}")]
    Service { op: &'static str, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CertError {
    pub fn service(op: &'static str, detail: impl std::fmt::Display) -> Self {
        CertError::Service {
            op,
            detail: detail.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CertError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single row.
///
/// The `position` is the 1-based spreadsheet row the error belongs to.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RowError {
    /// Copying the template failed.
    #[error("Row {position}: duplicating template failed: {detail}")]
    Duplicate { position: usize, detail: String },

    /// Replacing placeholders in the copy failed.
    #[error("Row {position}: substitution failed: {detail}")]
    Substitute { position: usize, detail: String },

    /// Export to the portable format failed.
    #[error("Row {position}: export failed: {detail}")]
    Export { position: usize, detail: String },

    /// Uploading the exported bytes failed.
    #[error("Row {position}: upload failed: {detail}")]
    Upload { position: usize, detail: String },

    /// The link was produced but could not be written back to the sheet.
    ///
    /// The uploaded file is left in place without a recorded link; the next
    /// scan picks the row up again.
    #[error("Row {position}: writing link to sheet failed: {detail}")]
    WriteBack { position: usize, detail: String },

    /// The run was stopped before this row started.
    #[error("Row {position}: cancelled")]
    Cancelled { position: usize },
}

impl RowError {
    pub fn position(&self) -> usize {
        match self {
            RowError::Duplicate { position, .. }
            | RowError::Substitute { position, .. }
            | RowError::Export { position, .. }
            | RowError::Upload { position, .. }
            | RowError::WriteBack { position, .. }
            | RowError::Cancelled { position } => *position,
        }
    }

    /// The underlying reason, truncated to [`REASON_LIMIT`] characters.
    pub fn short_reason(&self) -> String {
        let detail = match self {
            RowError::Duplicate { detail, .. }
            | RowError::Substitute { detail, .. }
            | RowError::Export { detail, .. }
            | RowError::Upload { detail, .. }
            | RowError::WriteBack { detail, .. } => detail.as_str(),
            RowError::Cancelled { .. } => "cancelled",
        };
        truncate_reason(detail)
    }
}

/// Truncate an error message on a char boundary for log output.
pub fn truncate_reason(detail: &str) -> String {
    if detail.chars().count() > REASON_LIMIT {
        let mut s: String = detail.chars().take(REASON_LIMIT - 1).collect();
        s.push('\u{2026}');
        s
    } else {
        detail.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_display() {
        let e = CertError::MissingConfig { field: "template" };
        assert!(e.to_string().contains("template"), "got: {e}");
    }

    #[test]
    fn row_error_position() {
        let e = RowError::Upload {
            position: 7,
            detail: "quota".into(),
        };
        assert_eq!(e.position(), 7);
        assert!(e.to_string().contains("Row 7"));
    }

    #[test]
    fn short_reason_truncates_on_char_boundary() {
        let long = "خطأ".repeat(80);
        let e = RowError::Export {
            position: 2,
            detail: long,
        };
        let reason = e.short_reason();
        assert_eq!(reason.chars().count(), REASON_LIMIT);
        assert!(reason.ends_with('\u{2026}'));
    }

    #[test]
    fn short_reason_keeps_short_messages() {
        let e = RowError::Duplicate {
            position: 3,
            detail: "404".into(),
        };
        assert_eq!(e.short_reason(), "404");
    }
}
