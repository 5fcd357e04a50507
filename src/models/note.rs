use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A note that has been pushed to the document server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestedNote {
    /// Absolute path of the `.note` file.
    pub note_path: String,
    /// Modification time observed at the last successful ingest.
    pub mtime_ns: i64,
    /// Document ID of the latest upload. Older uploads are tagged superseded.
    pub doc_id: Option<i64>,
    /// SHA-256 (hex) of the PDF that was uploaded.
    pub content_hash: Option<String>,
    pub status: IngestStatus,
    pub ingested_at: DateTime<Utc>,
}

/// Outcome of processing one note.
///
/// - `Skipped`: nothing changed since the last ingest
/// - `Ingested`: first upload of this note
/// - `Updated`: note was edited, a new version was uploaded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Skipped,
    Ingested,
    Updated,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Ingested => "ingested",
            Self::Updated => "updated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "skipped" => Some(Self::Skipped),
            "ingested" => Some(Self::Ingested),
            "updated" => Some(Self::Updated),
            _ => None,
        }
    }
}
