mod schema;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::models::*;

/// Local SQLite state shared by the inbound and outbound sync paths.
///
/// Cloning is cheap; all clones share one connection. Every write is a single
/// statement, so a crash never leaves a half-written record behind.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open state file {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Inbound (notes -> server)
    // ============================================================

    pub fn get_ingested_note(&self, note_path: &str) -> Result<Option<IngestedNote>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let note = conn
            .query_row(
                "SELECT note_path, mtime_ns, doc_id, content_hash, status, ingested_at
                 FROM ingested_notes WHERE note_path = ?",
                [note_path],
                map_ingested_note,
            )
            .optional()?;
        Ok(note)
    }

    /// Upsert the record for a note after a successful ingest (or a skip
    /// that only moved the mtime).
    pub fn record_ingestion(
        &self,
        note_path: &str,
        mtime_ns: i64,
        doc_id: Option<i64>,
        content_hash: Option<&str>,
        status: IngestStatus,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO ingested_notes (note_path, mtime_ns, doc_id, content_hash, status, ingested_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(note_path) DO UPDATE SET
                mtime_ns     = excluded.mtime_ns,
                doc_id       = excluded.doc_id,
                content_hash = excluded.content_hash,
                status       = excluded.status,
                ingested_at  = excluded.ingested_at",
            (
                note_path,
                mtime_ns,
                doc_id,
                content_hash,
                status.as_str(),
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn list_ingested_notes(&self) -> Result<Vec<IngestedNote>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT note_path, mtime_ns, doc_id, content_hash, status, ingested_at
             FROM ingested_notes ORDER BY note_path",
        )?;

        let notes = stmt
            .query_map([], map_ingested_note)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(notes)
    }

    // ============================================================
    // Outbound (server -> device)
    // ============================================================

    pub fn get_exported_doc_ids(&self) -> Result<HashSet<i64>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare("SELECT doc_id FROM exported_docs")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<i64>, _>>()?;
        Ok(ids)
    }

    pub fn get_exported_doc(&self, doc_id: i64) -> Result<Option<ExportedDoc>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let doc = conn
            .query_row(
                "SELECT doc_id, supernote_path, checksum, exported_at
                 FROM exported_docs WHERE doc_id = ?",
                [doc_id],
                map_exported_doc,
            )
            .optional()?;
        Ok(doc)
    }

    pub fn record_export(&self, doc_id: i64, supernote_path: &str, checksum: &str) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO exported_docs (doc_id, supernote_path, checksum, exported_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(doc_id) DO UPDATE SET
                supernote_path = excluded.supernote_path,
                checksum       = excluded.checksum,
                exported_at    = excluded.exported_at",
            (doc_id, supernote_path, checksum, Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    pub fn remove_export_record(&self, doc_id: i64) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM exported_docs WHERE doc_id = ?", [doc_id])?;
        Ok(rows > 0)
    }

    pub fn list_exported_docs(&self) -> Result<Vec<ExportedDoc>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT doc_id, supernote_path, checksum, exported_at
             FROM exported_docs ORDER BY doc_id",
        )?;

        let docs = stmt
            .query_map([], map_exported_doc)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(docs)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn map_ingested_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestedNote> {
    Ok(IngestedNote {
        note_path: row.get(0)?,
        mtime_ns: row.get(1)?,
        doc_id: row.get(2)?,
        content_hash: row.get(3)?,
        status: IngestStatus::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(IngestStatus::Ingested),
        ingested_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn map_exported_doc(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExportedDoc> {
    Ok(ExportedDoc {
        doc_id: row.get(0)?,
        supernote_path: row.get(1)?,
        checksum: row.get(2)?,
        exported_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

// Older state files stored SQLite's `datetime('now')` format
fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}
