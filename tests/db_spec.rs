use speculate2::speculate;
use supernote_paperless_bridge::db::Database;
use supernote_paperless_bridge::models::*;

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "ingested notes" {
        describe "get_ingested_note" {
            it "returns None for an unknown note" {
                let note = db.get_ingested_note("/sn/Note/unknown.note").expect("Query failed");
                assert!(note.is_none());
            }

            it "returns the recorded note" {
                db.record_ingestion("/sn/Note/a.note", 100, Some(7), Some("abc"), IngestStatus::Ingested)
                    .expect("Failed to record");

                let note = db.get_ingested_note("/sn/Note/a.note")
                    .expect("Query failed")
                    .expect("Note missing");
                assert_eq!(note.mtime_ns, 100);
                assert_eq!(note.doc_id, Some(7));
                assert_eq!(note.content_hash.as_deref(), Some("abc"));
                assert_eq!(note.status, IngestStatus::Ingested);
            }
        }

        describe "record_ingestion" {
            it "overwrites the previous record for the same path" {
                db.record_ingestion("/sn/Note/a.note", 100, Some(7), Some("abc"), IngestStatus::Ingested)
                    .expect("Failed to record");
                db.record_ingestion("/sn/Note/a.note", 200, Some(9), Some("def"), IngestStatus::Updated)
                    .expect("Failed to record");

                let notes = db.list_ingested_notes().expect("Query failed");
                assert_eq!(notes.len(), 1);
                assert_eq!(notes[0].mtime_ns, 200);
                assert_eq!(notes[0].doc_id, Some(9));
                assert_eq!(notes[0].status, IngestStatus::Updated);
            }

            it "accepts a note without a document" {
                db.record_ingestion("/sn/Note/b.note", 1, None, None, IngestStatus::Ingested)
                    .expect("Failed to record");

                let note = db.get_ingested_note("/sn/Note/b.note").unwrap().unwrap();
                assert!(note.doc_id.is_none());
                assert!(note.content_hash.is_none());
            }
        }

        describe "list_ingested_notes" {
            it "orders notes by path" {
                db.record_ingestion("/sn/Note/z.note", 1, None, None, IngestStatus::Ingested).unwrap();
                db.record_ingestion("/sn/Note/a.note", 1, None, None, IngestStatus::Ingested).unwrap();

                let notes = db.list_ingested_notes().expect("Query failed");
                let paths: Vec<_> = notes.iter().map(|n| n.note_path.as_str()).collect();
                assert_eq!(paths, vec!["/sn/Note/a.note", "/sn/Note/z.note"]);
            }
        }
    }

    describe "exported documents" {
        describe "get_exported_doc_ids" {
            it "is empty initially" {
                assert!(db.get_exported_doc_ids().expect("Query failed").is_empty());
            }

            it "returns every recorded id" {
                db.record_export(1, "/sn/Document/Paperless/a.pdf", "aaaa").unwrap();
                db.record_export(2, "/sn/Document/Paperless/b.pdf", "bbbb").unwrap();

                let ids = db.get_exported_doc_ids().expect("Query failed");
                assert_eq!(ids.len(), 2);
                assert!(ids.contains(&1));
                assert!(ids.contains(&2));
            }
        }

        describe "record_export" {
            it "upserts by document id" {
                db.record_export(1, "/sn/Document/Paperless/a.pdf", "aaaa").unwrap();
                db.record_export(1, "/sn/Document/Paperless/a_1.pdf", "cccc").unwrap();

                let doc = db.get_exported_doc(1).unwrap().expect("Export missing");
                assert_eq!(doc.supernote_path, "/sn/Document/Paperless/a_1.pdf");
                assert_eq!(doc.checksum.as_deref(), Some("cccc"));
                assert_eq!(db.list_exported_docs().unwrap().len(), 1);
            }
        }

        describe "remove_export_record" {
            it "deletes the record and reports it" {
                db.record_export(3, "/sn/Document/Paperless/c.pdf", "cccc").unwrap();

                assert!(db.remove_export_record(3).unwrap());
                assert!(db.get_exported_doc(3).unwrap().is_none());
            }

            it "returns false for an unknown document" {
                assert!(!db.remove_export_record(42).unwrap());
            }
        }
    }

    describe "persistence" {
        it "keeps records across reopen" {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let path = dir.path().join("state").join("bridge.db");

            {
                let db = Database::open(&path).expect("Failed to open");
                db.migrate().expect("Failed to migrate");
                db.record_export(5, "/sn/Document/Paperless/e.pdf", "eeee").unwrap();
            }

            let reopened = Database::open(&path).expect("Failed to reopen");
            reopened.migrate().expect("Failed to migrate");
            assert!(reopened.get_exported_doc_ids().unwrap().contains(&5));
        }
    }
}
