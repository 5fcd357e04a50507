//! HTTP client for the Paperless-ngx API.
//!
//! Wraps the handful of endpoints the bridge needs: tag/correspondent/document
//! type lookup, document upload with task polling, tag-filtered listing,
//! download, and metadata patches. List endpoints are followed through their
//! `next` links until exhausted.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_DISPOSITION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::types::*;
use crate::config::Settings;

const API_VERSION_ACCEPT: &str = "application/json; version=9";
const LIST_PAGE_SIZE: &str = "100";

/// Default delay between task status checks after an upload.
pub const DEFAULT_TASK_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default upper bound on waiting for the server to consume an upload.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(180);

/// Paperless client errors.
#[derive(Debug, Error)]
pub enum PaperlessError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid API token: {0}")]
    InvalidToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: API token missing or invalid")]
    Unauthorized,

    #[error("Unexpected response {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("Task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },

    #[error("Task {task_id} succeeded but has no document ID")]
    MissingDocument { task_id: String },

    #[error("Task {task_id} timed out after {}s", .timeout.as_secs())]
    TaskTimeout { task_id: String, timeout: Duration },
}

/// Client for the Paperless-ngx REST API.
#[derive(Debug, Clone)]
pub struct PaperlessClient {
    base_url: String,
    client: Client,
    task_poll_interval: Duration,
    task_timeout: Duration,
}

impl PaperlessClient {
    /// Create a client with token authentication.
    pub fn new(base_url: impl Into<String>, token: &str) -> Result<Self, PaperlessError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", token))
            .map_err(|e| PaperlessError::InvalidToken(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static(API_VERSION_ACCEPT));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            task_poll_interval: DEFAULT_TASK_POLL_INTERVAL,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, PaperlessError> {
        Self::new(settings.paperless_url.clone(), &settings.paperless_token)
    }

    /// Override how upload tasks are polled.
    pub fn with_task_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.task_poll_interval = interval;
        self.task_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request for an API path or an absolute pagination URL.
    fn request(&self, method: Method, path_or_url: &str) -> RequestBuilder {
        let url = if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        };
        self.client.request(method, url)
    }

    /// Send a request and map non-success statuses to errors.
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, PaperlessError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(PaperlessError::NotFound(body)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PaperlessError::Unauthorized),
            _ => Err(PaperlessError::Api {
                status,
                body: truncate(&body, 200),
            }),
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PaperlessError> {
        Ok(self.send(request).await?.json().await?)
    }

    /// Collect every result of a paginated list endpoint.
    async fn collect_pages<T: DeserializeOwned>(
        &self,
        first: RequestBuilder,
    ) -> Result<Vec<T>, PaperlessError> {
        let mut page: Page<T> = self.send_json(first).await?;
        let mut results = Vec::with_capacity(page.count.unwrap_or(0) as usize);

        loop {
            results.extend(page.results);
            match page.next {
                Some(next) => page = self.send_json(self.request(Method::GET, &next)).await?,
                None => break,
            }
        }

        Ok(results)
    }

    // ============================================================
    // Tags, correspondents, document types
    // ============================================================

    /// Find an object by name (case-insensitive).
    pub async fn find_named(
        &self,
        kind: NamedKind,
        name: &str,
    ) -> Result<Option<NamedObject>, PaperlessError> {
        let request = self
            .request(Method::GET, kind.path())
            .query(&[("name__iexact", name), ("page_size", LIST_PAGE_SIZE)]);
        let objects: Vec<NamedObject> = self.collect_pages(request).await?;

        let wanted = name.to_lowercase();
        Ok(objects
            .into_iter()
            .find(|obj| obj.name.to_lowercase() == wanted))
    }

    /// Find an object by name, creating it if it does not exist.
    pub async fn get_or_create_named(
        &self,
        kind: NamedKind,
        name: &str,
    ) -> Result<i64, PaperlessError> {
        if let Some(existing) = self.find_named(kind, name).await? {
            return Ok(existing.id);
        }

        let created: NamedObject = self
            .send_json(
                self.request(Method::POST, kind.path())
                    .json(&serde_json::json!({ "name": name })),
            )
            .await?;
        tracing::info!("Created {} '{}' with id {}", kind.as_str(), name, created.id);
        Ok(created.id)
    }

    /// ID of a tag by name, or `None` if the server has no such tag.
    pub async fn get_tag_id(&self, name: &str) -> Result<Option<i64>, PaperlessError> {
        Ok(self
            .find_named(NamedKind::Tag, name)
            .await?
            .map(|tag| tag.id))
    }

    pub async fn get_or_create_tag(&self, name: &str) -> Result<i64, PaperlessError> {
        self.get_or_create_named(NamedKind::Tag, name).await
    }

    pub async fn get_or_create_correspondent(&self, name: &str) -> Result<i64, PaperlessError> {
        self.get_or_create_named(NamedKind::Correspondent, name)
            .await
    }

    pub async fn get_or_create_document_type(&self, name: &str) -> Result<i64, PaperlessError> {
        self.get_or_create_named(NamedKind::DocumentType, name)
            .await
    }

    // ============================================================
    // Upload
    // ============================================================

    /// Upload a PDF and wait until the server has turned it into a document.
    ///
    /// Returns the new document's ID.
    pub async fn upload_document(
        &self,
        pdf: Vec<u8>,
        filename: &str,
        metadata: &UploadMetadata,
    ) -> Result<i64, PaperlessError> {
        let document = Part::bytes(pdf)
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;

        let mut form = Form::new().part("document", document);
        for tag_id in &metadata.tag_ids {
            form = form.text("tags", tag_id.to_string());
        }
        if let Some(title) = &metadata.title {
            form = form.text("title", title.clone());
        }
        if let Some(id) = metadata.correspondent_id {
            form = form.text("correspondent", id.to_string());
        }
        if let Some(id) = metadata.document_type_id {
            form = form.text("document_type", id.to_string());
        }
        if let Some(created) = metadata.created {
            form = form.text("created", created.format("%Y-%m-%d").to_string());
        }

        let response = self
            .send(
                self.request(Method::POST, "/api/documents/post_document/")
                    .multipart(form),
            )
            .await?;
        let task_id = response.text().await?.trim().trim_matches('"').to_string();
        tracing::debug!("Upload of {} queued as task {}", filename, task_id);

        self.wait_for_task(&task_id).await
    }

    /// Poll the tasks endpoint until the upload is consumed.
    pub async fn wait_for_task(&self, task_id: &str) -> Result<i64, PaperlessError> {
        let deadline = tokio::time::Instant::now() + self.task_timeout;

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.task_poll_interval).await;

            let tasks: Vec<TaskInfo> = self
                .send_json(
                    self.request(Method::GET, "/api/tasks/")
                        .query(&[("task_id", task_id)]),
                )
                .await?;
            let Some(task) = tasks.into_iter().next() else {
                continue;
            };

            match task.status {
                TaskState::Success => {
                    return task
                        .related_document
                        .and_then(|doc| doc.id())
                        .ok_or_else(|| PaperlessError::MissingDocument {
                            task_id: task_id.to_string(),
                        });
                }
                TaskState::Failure | TaskState::Revoked => {
                    return Err(PaperlessError::TaskFailed {
                        task_id: task_id.to_string(),
                        reason: task.result.unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                _ => {}
            }
        }

        Err(PaperlessError::TaskTimeout {
            task_id: task_id.to_string(),
            timeout: self.task_timeout,
        })
    }

    // ============================================================
    // Documents
    // ============================================================

    /// All documents carrying the given tag.
    pub async fn list_documents_by_tag(&self, tag_id: i64) -> Result<Vec<Document>, PaperlessError> {
        let request = self.request(Method::GET, "/api/documents/").query(&[
            ("tags__id__in", tag_id.to_string()),
            ("page_size", LIST_PAGE_SIZE.to_string()),
        ]);
        self.collect_pages(request).await
    }

    pub async fn get_document(&self, doc_id: i64) -> Result<Document, PaperlessError> {
        self.send_json(self.request(Method::GET, &format!("/api/documents/{}/", doc_id)))
            .await
    }

    /// Partially update a document (title, content, tags, ...).
    pub async fn patch_document(
        &self,
        doc_id: i64,
        fields: &serde_json::Value,
    ) -> Result<(), PaperlessError> {
        self.send(
            self.request(Method::PATCH, &format!("/api/documents/{}/", doc_id))
                .json(fields),
        )
        .await?;
        Ok(())
    }

    /// Download a document's file.
    ///
    /// Returns the bytes and the filename the server suggests, falling back to
    /// `document_<id>.pdf`.
    pub async fn download_document(&self, doc_id: i64) -> Result<(Vec<u8>, String), PaperlessError> {
        self.download_document_or(doc_id, None).await
    }

    /// Like [`download_document`](Self::download_document), with `fallback_name`
    /// used when the response carries no usable `Content-Disposition`.
    pub async fn download_document_or(
        &self,
        doc_id: i64,
        fallback_name: Option<&str>,
    ) -> Result<(Vec<u8>, String), PaperlessError> {
        let response = self
            .send(self.request(
                Method::GET,
                &format!("/api/documents/{}/download/", doc_id),
            ))
            .await?;

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_content_disposition)
            .or_else(|| {
                fallback_name
                    .filter(|name| !name.trim().is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("document_{}.pdf", doc_id));

        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), filename))
    }
}

/// Extract the filename from a `Content-Disposition` header value.
///
/// Prefers the RFC 5987 `filename*=` form over plain `filename=`.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for (name, value) in disposition_params(header) {
        match name.as_str() {
            "filename*" => {
                // charset'language'percent-encoded
                let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value.as_str());
                let decoded = urlencoding::decode_binary(encoded.as_bytes());
                extended = Some(String::from_utf8_lossy(&decoded).into_owned());
            }
            "filename" => plain = Some(value),
            _ => {}
        }
    }

    extended.or(plain).filter(|name| !name.is_empty())
}

/// Split the parameters after the disposition type. Quoted values may contain
/// `;` and backslash escapes.
fn disposition_params(header: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let Some(start) = header.find(';') else {
        return params;
    };
    let mut rest = &header[start..];

    loop {
        rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
        let Some(sep) = rest.find(['=', ';']) else {
            break;
        };
        if rest[sep..].starts_with(';') {
            // Parameter without a value
            rest = &rest[sep..];
            continue;
        }

        let name = rest[..sep].trim().to_ascii_lowercase();
        rest = rest[sep + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let mut value = String::new();
            let mut end = quoted.len();
            let mut chars = quoted.char_indices();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        end = i + 1;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            rest = &quoted[end..];
            value
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            let value = rest[..end].trim().to_string();
            rest = &rest[end..];
            value
        };

        params.push((name, value));
    }

    params
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
