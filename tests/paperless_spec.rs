use std::time::Duration;

use supernote_paperless_bridge::paperless::*;
use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> PaperlessClient {
    PaperlessClient::new(server.uri(), "test-token")
        .expect("Failed to create client")
        .with_task_polling(Duration::from_millis(10), Duration::from_millis(500))
}

fn page(results: serde_json::Value, next: Option<String>) -> serde_json::Value {
    serde_json::json!({
        "count": results.as_array().map(|a| a.len()).unwrap_or(0),
        "next": next,
        "previous": null,
        "results": results,
    })
}

mod tags {
    use super::*;

    #[tokio::test]
    async fn sends_token_and_version_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags/"))
            .and(header("Authorization", "Token test-token"))
            .and(header("Accept", "application/json; version=9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([{"id": 4, "name": "send-to-supernote"}]),
                None,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server)
            .get_tag_id("send-to-supernote")
            .await
            .expect("Lookup failed");
        assert_eq!(id, Some(4));
    }

    #[tokio::test]
    async fn follows_pagination_and_matches_case_insensitively() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags/"))
            .and(query_param_is_missing("page"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([{"id": 1, "name": "inbox"}]),
                Some(format!("{}/api/tags/?page=2", server.uri())),
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tags/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([{"id": 2, "name": "Superseded"}]),
                None,
            )))
            .mount(&server)
            .await;

        let id = client_for(&server).get_tag_id("superseded").await.unwrap();
        assert_eq!(id, Some(2));
    }

    #[tokio::test]
    async fn returns_none_for_unknown_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(serde_json::json!([]), None)))
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).get_tag_id("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn creates_missing_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(serde_json::json!([]), None)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/tags/"))
            .and(body_json(serde_json::json!({"name": "superseded"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 11, "name": "superseded"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server).get_or_create_tag("superseded").await.unwrap();
        assert_eq!(id, 11);
    }

    #[tokio::test]
    async fn maps_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid token."))
            .mount(&server)
            .await;

        let err = client_for(&server).get_tag_id("x").await.unwrap_err();
        assert!(matches!(err, PaperlessError::Unauthorized));
    }
}

mod upload {
    use super::*;

    #[tokio::test]
    async fn waits_for_task_and_returns_document_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/documents/post_document/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"task-123\""))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/"))
            .and(query_param("task_id", "task-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"task_id": "task-123", "status": "SUCCESS", "result": "Success", "related_document": "57"}
            ])))
            .mount(&server)
            .await;

        let metadata = UploadMetadata {
            title: Some("20240315_143022".to_string()),
            tag_ids: vec![3],
            correspondent_id: Some(5),
            document_type_id: None,
            created: chrono::NaiveDate::from_ymd_opt(2024, 3, 15),
        };
        let doc_id = client_for(&server)
            .upload_document(b"%PDF-1.4".to_vec(), "20240315_143022.pdf", &metadata)
            .await
            .expect("Upload failed");
        assert_eq!(doc_id, 57);
    }

    #[tokio::test]
    async fn reports_failed_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/documents/post_document/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"task-9\""))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"task_id": "task-9", "status": "FAILURE", "result": "Not consuming: duplicate"}
            ])))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .upload_document(b"%PDF".to_vec(), "a.pdf", &UploadMetadata::default())
            .await
            .unwrap_err();
        match err {
            PaperlessError::TaskFailed { task_id, reason } => {
                assert_eq!(task_id, "task-9");
                assert!(reason.contains("duplicate"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn times_out_when_task_never_finishes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/documents/post_document/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"slow\""))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"task_id": "slow", "status": "STARTED"}
            ])))
            .mount(&server)
            .await;

        let client = PaperlessClient::new(server.uri(), "t")
            .unwrap()
            .with_task_polling(Duration::from_millis(10), Duration::from_millis(60));
        let err = client
            .upload_document(b"%PDF".to_vec(), "a.pdf", &UploadMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PaperlessError::TaskTimeout { .. }));
    }

    #[tokio::test]
    async fn rejects_non_success_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/documents/post_document/"))
            .respond_with(ResponseTemplate::new(400).set_body_string("document: invalid file"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .upload_document(b"nope".to_vec(), "a.pdf", &UploadMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PaperlessError::Api { .. }));
    }
}

mod documents {
    use super::*;

    #[tokio::test]
    async fn lists_documents_by_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/documents/"))
            .and(query_param("tags__id__in", "4"))
            .and(query_param("page_size", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                serde_json::json!([
                    {"id": 10, "title": "Invoice", "tags": [4]},
                    {"id": 11, "title": "Manual", "tags": [4, 2]}
                ]),
                None,
            )))
            .mount(&server)
            .await;

        let docs = client_for(&server).list_documents_by_tag(4).await.unwrap();
        let ids: Vec<i64> = docs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert_eq!(docs[1].tags, vec![4, 2]);
    }

    #[tokio::test]
    async fn download_uses_content_disposition_filename() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/documents/10/download/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", "attachment; filename=\"manual.epub\"")
                    .set_body_bytes(b"EPUB".to_vec()),
            )
            .mount(&server)
            .await;

        let (bytes, name) = client_for(&server).download_document(10).await.unwrap();
        assert_eq!(bytes, b"EPUB");
        assert_eq!(name, "manual.epub");
    }

    #[tokio::test]
    async fn download_falls_back_to_generated_filename() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/documents/12/download/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .mount(&server)
            .await;

        let (_, name) = client_for(&server).download_document(12).await.unwrap();
        assert_eq!(name, "document_12.pdf");
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/documents/99/"))
            .respond_with(ResponseTemplate::new(404).set_body_string("{\"detail\": \"Not found.\"}"))
            .mount(&server)
            .await;

        let err = client_for(&server).get_document(99).await.unwrap_err();
        assert!(matches!(err, PaperlessError::NotFound(_)));
    }

    #[tokio::test]
    async fn patches_document_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/documents/10/"))
            .and(body_json(serde_json::json!({"tags": [4, 8]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 10})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .patch_document(10, &serde_json::json!({"tags": [4, 8]}))
            .await
            .expect("Patch failed");
    }
}
