//! Inbound sync: `.note` files from the device are uploaded to Paperless.
//!
//! Change detection is two-staged. A matching mtime short-circuits without
//! touching the file; a changed mtime triggers conversion, and the PDF's
//! SHA-256 then decides whether anything really changed. Uploads carry the
//! inbound tag so the server's own OCR pipeline picks them up. When an edited
//! note is uploaded again the previous document is tagged superseded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::config::Settings;
use crate::convert::Converter;
use crate::db::Database;
use crate::models::IngestStatus;
use crate::paperless::{PaperlessClient, UploadMetadata};

/// Fallback correspondent when none can be derived from the folder layout.
pub const DEFAULT_CORRESPONDENT: &str = "Supernote";

/// Time given to the sync client to finish writing a file before we read it.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

static NOTE_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})$").expect("valid note stamp regex")
});

/// Server-side IDs resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundIds {
    pub inbound_tag: i64,
    pub superseded_tag: i64,
    pub document_type: Option<i64>,
}

pub struct Inbound {
    settings: Settings,
    client: PaperlessClient,
    db: Database,
    converter: Converter,
    ids: InboundIds,
}

impl Inbound {
    /// Resolve tags and document type on the server.
    ///
    /// The inbound tag must already exist since it usually drives a
    /// server-side workflow; the others are created on demand.
    pub async fn prepare(settings: Settings, client: PaperlessClient, db: Database) -> Result<Self> {
        let inbound_tag = client
            .get_tag_id(&settings.inbound_tag)
            .await?
            .with_context(|| {
                format!(
                    "Inbound tag '{}' not found in Paperless, create it first",
                    settings.inbound_tag
                )
            })?;
        tracing::info!("Inbound tag '{}' resolved to {}", settings.inbound_tag, inbound_tag);

        let superseded_tag = client.get_or_create_tag(&settings.superseded_tag).await?;
        tracing::info!(
            "Superseded tag '{}' resolved to {}",
            settings.superseded_tag,
            superseded_tag
        );

        let document_type = match &settings.document_type {
            Some(name) => {
                let id = client.get_or_create_document_type(name).await?;
                tracing::info!("Document type '{}' resolved to {}", name, id);
                Some(id)
            }
            None => None,
        };

        let converter = Converter::from_settings(&settings)?;
        let ids = InboundIds {
            inbound_tag,
            superseded_tag,
            document_type,
        };
        Ok(Self::new(settings, client, db, converter, ids))
    }

    pub fn new(
        settings: Settings,
        client: PaperlessClient,
        db: Database,
        converter: Converter,
        ids: InboundIds,
    ) -> Self {
        Self {
            settings,
            client,
            db,
            converter,
            ids,
        }
    }

    /// Upload `note` if it changed since the last successful ingest.
    pub async fn process_note(&self, note: &Path) -> Result<IngestStatus> {
        let key = note.to_string_lossy().into_owned();
        let mtime_ns = read_mtime_ns(note)?;
        let previous = self.db.get_ingested_note(&key)?;

        if previous.as_ref().is_some_and(|p| p.mtime_ns == mtime_ns) {
            return Ok(IngestStatus::Skipped);
        }

        let pdf = self
            .converter
            .pdf_for_note(note)
            .await
            .with_context(|| format!("Failed to convert {}", note.display()))?;
        let content_hash = hex::encode(Sha256::digest(&pdf));

        if let Some(prev) = &previous {
            if prev.content_hash.as_deref() == Some(content_hash.as_str()) {
                // Touched but identical: remember the new mtime only
                self.db.record_ingestion(
                    &key,
                    mtime_ns,
                    prev.doc_id,
                    Some(&content_hash),
                    prev.status,
                )?;
                tracing::debug!("{} touched without content change", note.display());
                return Ok(IngestStatus::Skipped);
            }
        }

        let old_doc_id = previous.as_ref().and_then(|p| p.doc_id);
        let status = if old_doc_id.is_some() {
            IngestStatus::Updated
        } else {
            IngestStatus::Ingested
        };

        let stem = note
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "note".to_string());

        let correspondent = derive_correspondent(
            &self.settings.note_dir,
            self.settings.correspondent_override.as_deref(),
        );
        let correspondent_id = self
            .client
            .get_or_create_correspondent(&correspondent)
            .await?;

        let created = parse_note_date(&stem).or_else(|| mtime_date(note));

        let metadata = UploadMetadata {
            title: Some(stem.clone()),
            tag_ids: vec![self.ids.inbound_tag],
            correspondent_id: Some(correspondent_id),
            document_type_id: self.ids.document_type,
            created,
        };
        tracing::info!(
            "Uploading {} ({})",
            note.display(),
            if old_doc_id.is_some() { "update" } else { "new" }
        );
        let doc_id = self
            .client
            .upload_document(pdf, &format!("{}.pdf", stem), &metadata)
            .await
            .with_context(|| format!("Failed to upload {}", note.display()))?;

        if let Some(old_doc_id) = old_doc_id {
            if let Err(e) = self.mark_superseded(old_doc_id).await {
                tracing::warn!("Failed to mark document {} superseded: {:#}", old_doc_id, e);
            }
        }

        // mtime from before conversion, so an edit made mid-upload is seen next time
        self.db
            .record_ingestion(&key, mtime_ns, Some(doc_id), Some(&content_hash), status)?;

        tracing::info!(
            "Ingested {} as document {} (status={}, created={})",
            note.display(),
            doc_id,
            status.as_str(),
            created.map(|d| d.to_string()).unwrap_or_default()
        );
        Ok(status)
    }

    async fn mark_superseded(&self, doc_id: i64) -> Result<()> {
        let doc = self.client.get_document(doc_id).await?;
        let mut tags = doc.tags;
        if !tags.contains(&self.ids.superseded_tag) {
            tags.push(self.ids.superseded_tag);
        }
        self.client
            .patch_document(doc_id, &serde_json::json!({ "tags": tags }))
            .await?;
        tracing::info!("Marked document {} superseded", doc_id);
        Ok(())
    }

    /// Process one note, logging instead of returning failures. A failed note
    /// is retried on its next change or the next startup scan.
    pub async fn handle_note(&self, note: &Path) -> Option<IngestStatus> {
        if !note.is_file() {
            tracing::debug!("Ignoring {}: not a file", note.display());
            return None;
        }
        match self.process_note(note).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::error!("Ingest of {} failed: {:#}", note.display(), e);
                None
            }
        }
    }

    /// Catch up on notes created or edited while the bridge was offline.
    ///
    /// Returns how many notes were uploaded.
    pub async fn scan_existing(&self) -> usize {
        let notes = find_notes(&self.settings.note_dir);
        tracing::info!(
            "Startup scan found {} notes in {}",
            notes.len(),
            self.settings.note_dir.display()
        );

        let mut uploaded = 0;
        for note in &notes {
            if let Some(IngestStatus::Ingested | IngestStatus::Updated) = self.handle_note(note).await {
                uploaded += 1;
            }
        }
        uploaded
    }

    /// Watch the note directory and process notes as they change. Runs until
    /// the watcher shuts down.
    pub async fn watch(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(256);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    for path in event.paths.into_iter().filter(|p| is_note(p)) {
                        // Receiver gone means we are shutting down
                        let _ = tx.blocking_send(path);
                    }
                }
                Err(e) => tracing::warn!("Watch error: {}", e),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(&self.settings.note_dir, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.settings.note_dir.display()))?;
        tracing::info!("Watching {} for notes", self.settings.note_dir.display());

        while let Some(first) = rx.recv().await {
            // Saving a note fires several events; coalesce them
            tokio::time::sleep(SETTLE_DELAY).await;
            let mut batch = BTreeSet::from([first]);
            while let Ok(path) = rx.try_recv() {
                batch.insert(path);
            }

            for note in &batch {
                if let Some(status) = self.handle_note(note).await {
                    if status != IngestStatus::Skipped {
                        tracing::debug!("{} -> {}", note.display(), status.as_str());
                    }
                }
            }
        }

        Ok(())
    }

    /// Startup scan followed by watching forever.
    pub async fn run(&self) -> Result<()> {
        let uploaded = self.scan_existing().await;
        tracing::info!("Startup scan uploaded {} notes", uploaded);
        self.watch().await
    }
}

fn is_note(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "note")
}

/// Every `.note` file below `dir`, sorted.
pub fn find_notes(dir: &Path) -> Vec<PathBuf> {
    let mut notes: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_note(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    notes.sort();
    notes
}

fn read_mtime_ns(path: &Path) -> Result<i64> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(i64::try_from(since_epoch.as_nanos()).unwrap_or(i64::MAX))
}

fn mtime_date(path: &Path) -> Option<NaiveDate> {
    let modified: SystemTime = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified).date_naive())
}

/// Creation date encoded in a device file stem like `20240315_143022`.
pub fn parse_note_date(stem: &str) -> Option<NaiveDate> {
    let caps = NOTE_STAMP.captures(stem)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Correspondent for notes under `note_dir`.
///
/// The device syncs into `<account>/Supernote/Note/`, so the account folder
/// sits two levels above the note root.
pub fn derive_correspondent(note_dir: &Path, override_name: Option<&str>) -> String {
    if let Some(name) = override_name.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    note_dir
        .ancestors()
        .nth(2)
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_CORRESPONDENT.to_string())
}
