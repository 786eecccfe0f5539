//! Error kinds surfaced across subsystem boundaries.
//!
//! Per-page failures never abort a whole session: the pipelines catch these,
//! record a short message on the page record, and continue. Only
//! [`Error::Persistence`] is fatal for a session.

use thiserror::Error;

/// Convenience result type used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds for the extraction pipelines.
#[derive(Debug, Error)]
pub enum Error {
    /// JSON from the vision model could not be recovered by any strategy.
    #[error("unparseable model output: {0}")]
    ParseFailure(String),

    /// The model provider rejected or failed the request.
    #[error("model unavailable ({kind}): {detail}")]
    ModelUnavailable {
        /// One of `auth`, `quota`, `network`, `http`, `empty`.
        kind: &'static str,
        detail: String,
    },

    /// The BOM table crop could not be rendered; the drawing pass proceeds
    /// without it.
    #[error("table crop failed: {0}")]
    TableCropFailure(String),

    /// Rasterizing a page failed. Fatal for that page only.
    #[error("page render failed: {0}")]
    PageRenderFailure(String),

    /// The legend VLM phase failed; callers fall back to text-layout
    /// extraction.
    #[error("legend extraction failed: {0}")]
    LegendExtractionFailure(String),

    /// Reconciliation could not run for a page; the page keeps its record
    /// without a comparison block.
    #[error("reconciliation skipped: {0}")]
    ReconciliationSkipped(String),

    /// Writing to the session store failed. Fatal for the session.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Spreadsheet generation failed.
    #[error("report generation failed: {0}")]
    Report(String),

    /// The session was cancelled at a suspension point.
    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the failure should stop the whole session rather than a
    /// single page.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_failures_are_not_session_fatal() {
        assert!(!Error::PageRenderFailure("p3".into()).is_session_fatal());
        assert!(!Error::TableCropFailure("p3".into()).is_session_fatal());
        assert!(!Error::ParseFailure("trailing garbage".into()).is_session_fatal());
        assert!(Error::Persistence("disk full".into()).is_session_fatal());
        assert!(Error::Cancelled.is_session_fatal());
    }
}
