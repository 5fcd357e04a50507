//! Wire types for the subset of the Paperless-ngx API the bridge uses.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One page of a paginated list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    /// Absolute URL of the next page, if any.
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}

/// A tag, correspondent, or document type. All three share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedObject {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<i64>,
    #[serde(default)]
    pub original_file_name: Option<String>,
}

/// Entry from `/api/tasks/`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInfo {
    pub status: TaskState,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub related_document: Option<DocumentRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
    #[serde(other)]
    Unknown,
}

/// Document IDs come back as numbers or strings depending on server version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DocumentRef {
    Id(i64),
    Text(String),
}

impl DocumentRef {
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Metadata sent alongside an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub title: Option<String>,
    pub tag_ids: Vec<i64>,
    pub correspondent_id: Option<i64>,
    pub document_type_id: Option<i64>,
    pub created: Option<NaiveDate>,
}

/// Endpoints holding [`NamedObject`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKind {
    Tag,
    Correspondent,
    DocumentType,
}

impl NamedKind {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Tag => "/api/tags/",
            Self::Correspondent => "/api/correspondents/",
            Self::DocumentType => "/api/document_types/",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Correspondent => "correspondent",
            Self::DocumentType => "document type",
        }
    }
}
