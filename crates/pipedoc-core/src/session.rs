//! Upload sessions and their processing lifecycle.

use serde::{Deserialize, Serialize};

/// Detected kind of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// DXF 2D drawing with multiple orthographic views.
    Dxf,
    /// P&ID PDF whose first page is a symbol legend.
    Pid,
    /// Multi-page piping isometric BOM PDF.
    PipeBom,
    /// PDF that matched neither naming hint; both extractors are attempted.
    Pdf,
}

impl FileKind {
    /// Infer the file kind from its filename, matching the upload contract:
    /// `.dxf` is DXF; PDFs containing `pid`/`p&id`/`valve` are P&IDs and
    /// `bom`/`pipe` are isometric BOM packages; other PDFs stay unclassified.
    #[must_use]
    pub fn detect(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".dxf") {
            return Some(Self::Dxf);
        }
        if lower.ends_with(".pdf") {
            if lower.contains("pid") || lower.contains("p&id") || lower.contains("valve") {
                return Some(Self::Pid);
            }
            if lower.contains("bom") || lower.contains("pipe") {
                return Some(Self::PipeBom);
            }
            return Some(Self::Pdf);
        }
        None
    }

    /// Stable string used in the store and the HTTP API.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dxf => "dxf",
            Self::Pid => "pid",
            Self::PipeBom => "pipe_bom",
            Self::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dxf" => Ok(Self::Dxf),
            "pid" => Ok(Self::Pid),
            "pipe_bom" => Ok(Self::PipeBom),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown file kind '{other}'")),
        }
    }
}

/// Processing state of a session.
///
/// The status column stores the bare enum string; a failed session carries
/// its (truncated) message in a separate `error_detail` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Processing,
    VlmAnalyzing,
    Completed,
    Error,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::VlmAnalyzing => "vlm_analyzing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "vlm_analyzing" => Ok(Self::VlmAnalyzing),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            // Older rows stored "error: <msg>" as a single string.
            s if s == "error" || s.starts_with("error") => Ok(Self::Error),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// One uploaded document and its processing state.
///
/// Created on upload, mutated only by the background worker, never deleted
/// automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier (UUID v4 on upload).
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub kind: FileKind,
    /// Original filename as uploaded.
    pub file_name: String,
    pub status: SessionStatus,
    /// Short failure message when `status` is `Error`, capped at 200 chars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl Session {
    /// Status string as shown by the results endpoint: plain status, or
    /// `error: <detail>` for failed sessions.
    #[must_use]
    pub fn status_label(&self) -> String {
        match (&self.status, &self.error_detail) {
            (SessionStatus::Error, Some(detail)) => format!("error: {detail}"),
            (status, _) => status.to_string(),
        }
    }
}

/// Truncate a failure message for the `error_detail` column.
#[must_use]
pub fn truncate_error_detail(msg: &str) -> String {
    const MAX: usize = 200;
    if msg.len() <= MAX {
        msg.to_string()
    } else {
        let mut end = MAX;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_kind_from_filename() {
        assert_eq!(FileKind::detect("hull_section.DXF"), Some(FileKind::Dxf));
        assert_eq!(FileKind::detect("PID-pump-room.pdf"), Some(FileKind::Pid));
        assert_eq!(FileKind::detect("valve_list_rev2.pdf"), Some(FileKind::Pid));
        assert_eq!(
            FileKind::detect("PIPE_BOM_125629.pdf"),
            Some(FileKind::PipeBom)
        );
        assert_eq!(FileKind::detect("report.pdf"), Some(FileKind::Pdf));
        assert_eq!(FileKind::detect("notes.txt"), None);
    }

    #[test]
    fn status_round_trip() {
        for status in [
            SessionStatus::Processing,
            SessionStatus::VlmAnalyzing,
            SessionStatus::Completed,
            SessionStatus::Error,
            SessionStatus::Cancelled,
        ] {
            let parsed: SessionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        // Legacy combined form still parses as Error.
        assert_eq!(
            "error: something broke".parse::<SessionStatus>().unwrap(),
            SessionStatus::Error
        );
    }

    #[test]
    fn error_detail_is_truncated_to_200() {
        let long = "x".repeat(500);
        assert_eq!(truncate_error_detail(&long).len(), 200);
        assert_eq!(truncate_error_detail("short"), "short");
    }

    #[test]
    fn status_label_embeds_error_detail() {
        let session = Session {
            id: "s1".into(),
            created_at: chrono::Utc::now(),
            kind: FileKind::PipeBom,
            file_name: "bom.pdf".into(),
            status: SessionStatus::Error,
            error_detail: Some("page 3 render failed".into()),
        };
        assert_eq!(session.status_label(), "error: page 3 render failed");
    }
}
