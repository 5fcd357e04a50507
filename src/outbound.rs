//! Outbound sync: Paperless documents carrying the outbound tag are mirrored
//! into a managed subfolder of the device's `Document/` directory.
//!
//! Each pass compares the tagged documents on the server with the export
//! records in the state store. New documents are downloaded; records whose
//! document lost the tag are removed together with their file. Only files
//! inside the managed subfolder are ever deleted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::db::Database;
use crate::models::SyncOutcome;
use crate::paperless::{Document, PaperlessClient};

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_TITLE_CHARS: usize = 180;

pub struct Outbound {
    settings: Settings,
    client: PaperlessClient,
    db: Database,
    tag_id: i64,
}

impl Outbound {
    /// Resolve the outbound tag. It must already exist on the server.
    pub async fn prepare(settings: Settings, client: PaperlessClient, db: Database) -> Result<Self> {
        let tag_id = client
            .get_tag_id(&settings.outbound_tag)
            .await?
            .with_context(|| {
                format!(
                    "Outbound tag '{}' not found in Paperless, create it first",
                    settings.outbound_tag
                )
            })?;
        tracing::info!("Outbound tag '{}' resolved to {}", settings.outbound_tag, tag_id);
        Ok(Self::new(settings, client, db, tag_id))
    }

    pub fn new(settings: Settings, client: PaperlessClient, db: Database, tag_id: i64) -> Self {
        Self {
            settings,
            client,
            db,
            tag_id,
        }
    }

    /// One reconciliation pass.
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let tagged = self
            .client
            .list_documents_by_tag(self.tag_id)
            .await
            .context("Failed to list tagged documents")?;
        let exported = self.db.get_exported_doc_ids()?;

        let mut outcome = SyncOutcome::default();

        for doc in tagged.iter().filter(|d| !exported.contains(&d.id)) {
            match self.export_document(doc).await {
                Ok(_) => outcome.exported += 1,
                Err(e) => tracing::error!("Export of document {} failed: {:#}", doc.id, e),
            }
        }

        let mut stale: Vec<i64> = exported
            .into_iter()
            .filter(|id| !tagged.iter().any(|d| d.id == *id))
            .collect();
        stale.sort_unstable();
        for doc_id in stale {
            match self.remove_document(doc_id) {
                Ok(()) => outcome.removed += 1,
                Err(e) => tracing::error!("Removal of document {} failed: {:#}", doc_id, e),
            }
        }

        Ok(outcome)
    }

    /// Download one document into the managed folder and record it.
    pub async fn export_document(&self, doc: &Document) -> Result<PathBuf> {
        let (content, server_name) = self
            .client
            .download_document_or(doc.id, doc.original_file_name.as_deref())
            .await?;

        let ext = Path::new(&server_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".pdf".to_string());
        let title = if doc.title.trim().is_empty() {
            format!("document_{}", doc.id)
        } else {
            doc.title.clone()
        };

        let dest_dir = self.settings.managed_dir();
        tokio::fs::create_dir_all(&dest_dir)
            .await
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

        let mut dest = dest_dir.join(safe_filename(&title, &ext));
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            let stem = dest
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            dest = dest_dir.join(format!("{}_{}{}", stem, doc.id, ext));
            let mut n = 2;
            while tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                dest = dest_dir.join(format!("{}_{}_{}{}", stem, doc.id, n, ext));
                n += 1;
            }
        }

        tokio::fs::write(&dest, &content)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        let checksum = short_checksum(&content);

        self.db
            .record_export(doc.id, &dest.to_string_lossy(), &checksum)?;
        tracing::info!("Exported document {} to {}", doc.id, dest.display());
        Ok(dest)
    }

    /// Delete a previously exported file and forget it.
    pub fn remove_document(&self, doc_id: i64) -> Result<()> {
        let Some(record) = self.db.get_exported_doc(doc_id)? else {
            return Ok(());
        };
        let path = PathBuf::from(&record.supernote_path);
        let managed = self.settings.managed_dir();

        if !path.starts_with(&managed) {
            tracing::warn!(
                "Not deleting {} for document {}: outside {}",
                path.display(),
                doc_id,
                managed.display()
            );
        } else if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
            tracing::info!("Removed document {} from {}", doc_id, path.display());
        } else {
            tracing::warn!("Exported file for document {} already gone: {}", doc_id, path.display());
        }

        self.db.remove_export_record(doc_id)?;
        Ok(())
    }

    /// Poll forever. Failed passes are logged and retried after the interval.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            "Outbound sync polling every {}s",
            self.settings.poll_interval.as_secs()
        );
        loop {
            match self.sync_once().await {
                Ok(outcome) if !outcome.is_empty() => tracing::info!(
                    "Outbound pass exported {} and removed {} documents",
                    outcome.exported,
                    outcome.removed
                ),
                Ok(_) => tracing::debug!("Outbound pass: nothing to do"),
                Err(e) => tracing::error!("Outbound pass failed: {:#}", e),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

/// Turn a document title into a filename safe on the device.
pub fn safe_filename(title: &str, ext: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let truncated: String = cleaned.trim().chars().take(MAX_TITLE_CHARS).collect();
    format!("{}{}", truncated, ext)
}

fn short_checksum(content: &[u8]) -> String {
    let mut digest = hex::encode(Sha256::digest(content));
    digest.truncate(16);
    digest
}
