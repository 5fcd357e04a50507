use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A server document written into the device's `Document/` folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportedDoc {
    pub doc_id: i64,
    /// Where the file was written. Always inside the managed subfolder.
    pub supernote_path: String,
    /// First 16 hex chars of the SHA-256 of the written bytes.
    pub checksum: Option<String>,
    pub exported_at: DateTime<Utc>,
}

/// Counts from one outbound pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub exported: usize,
    pub removed: usize,
}

impl SyncOutcome {
    pub fn is_empty(&self) -> bool {
        self.exported == 0 && self.removed == 0
    }
}
