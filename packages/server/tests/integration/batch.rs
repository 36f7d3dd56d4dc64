use std::io::Read;

use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use server::entity::project;

use crate::common::{TestApp, build_zip, routes, sample_pdf, scenario_archive, valid_archive};

fn zip_names(bytes: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("valid zip");
    archive.file_names().map(str::to_string).collect()
}

#[tokio::test]
async fn upload_reports_valid_and_invalid_rows() {
    let app = TestApp::spawn().await;

    let res = app.upload(scenario_archive(), None).await;
    assert_eq!(res.status, 201, "{}", res.text);

    let summary = &res.body["summary"];
    assert_eq!(summary["total"], 3);
    assert_eq!(summary["valid"], 2);
    assert_eq!(summary["invalid"], 1);
    assert_eq!(summary["chunks"], json!([["alice.pdf", "bob.pdf"]]));
    assert_eq!(summary["estimated_seconds"], 1);

    let invalid = res.body["invalid_rows"].as_array().unwrap();
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0]["reason"], "file missing");
    assert_eq!(invalid[0]["row"]["filename"], "carol.pdf");

    let batch_id = res.body["batch_id"].as_str().unwrap();
    let batch = app.get(&routes::batch(batch_id)).await;
    assert_eq!(batch.status, 200);
    assert_eq!(batch.body["status"], "validated");
    assert_eq!(batch.body["valid_count"], 2);
    assert_eq!(batch.body["invalid_count"], 1);
    assert_eq!(batch.body["results"], json!([]));
    assert!(app.extracted(batch_id, "alice.pdf").exists());
}

#[tokio::test]
async fn upload_flags_duplicate_filenames() {
    let app = TestApp::spawn().await;
    let pdf = sample_pdf();
    let mapping = "filename,certificateId\nalice.pdf,C-1\nalice.pdf,C-2\n";
    let archive = build_zip(&[
        ("alice.pdf", pdf.as_slice()),
        ("certificate_map.csv", mapping.as_bytes()),
    ]);

    let res = app.upload(archive, None).await;
    assert_eq!(res.status, 201, "{}", res.text);
    assert_eq!(res.body["summary"]["valid"], 1);
    assert_eq!(res.body["invalid_rows"][0]["reason"], "duplicate filename");
}

#[tokio::test]
async fn upload_without_mapping_is_rejected() {
    let app = TestApp::spawn().await;
    let pdf = sample_pdf();
    let archive = build_zip(&[
        ("alice.pdf", pdf.as_slice()),
        ("notes.txt", b"hello".as_slice()),
    ]);

    let res = app.upload(archive, None).await;
    assert_eq!(res.status, 400);
    assert_eq!(res.code(), "NO_MAPPING_FILE");
}

#[tokio::test]
async fn upload_over_row_limit_is_rejected() {
    let app = TestApp::spawn_with(|cfg| cfg.max_rows = 2).await;

    let res = app.upload(scenario_archive(), None).await;
    assert_eq!(res.status, 400);
    assert_eq!(res.code(), "LIMIT_EXCEEDED");
    assert_eq!(res.body["total"], 3);
    assert_eq!(res.body["max"], 2);
}

#[tokio::test]
async fn upload_rejects_non_zip_payload() {
    let app = TestApp::spawn().await;

    let res = app.upload(b"definitely not a zip".to_vec(), None).await;
    assert_eq!(res.status, 400);
    assert_eq!(res.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn upload_requires_file_field() {
    let app = TestApp::spawn().await;
    let form = reqwest::multipart::Form::new().text("project_id", "1");

    let res = app
        .client
        .post(format!("http://{}{}", app.addr, routes::UPLOAD))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn start_issues_only_validated_rows() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(scenario_archive()).await;

    let res = app.start(&batch_id).await;
    assert_eq!(res.status, 202, "{}", res.text);
    assert_eq!(res.body["batch_id"], batch_id.as_str());
    assert_eq!(res.body["status"], "processing");

    let batch = app.wait_completed(&batch_id).await;
    let results = batch["results"].as_array().unwrap();
    // `carol.pdf` was rejected at upload and is never attempted.
    assert_eq!(results.len(), 2);
    assert_eq!(batch["valid_count"], 2);
    assert_eq!(batch["invalid_count"], 1);

    assert_eq!(results[0]["cert_id"], "C-1");
    assert_eq!(results[0]["status"], "issued");
    assert_eq!(
        results[0]["download_url"],
        format!("/api/v1/batches/{batch_id}/files/alice.pdf")
    );
    assert_eq!(results[1]["filename"], "bob.pdf");
    assert_eq!(results[1]["status"], "issued");
    assert!(results.iter().all(|r| r["filename"] != "carol.pdf"));
}

#[tokio::test]
async fn issuance_uses_mapping_chosen_at_upload() {
    let app = TestApp::spawn().await;
    let pdf = sample_pdf();
    let archive = build_zip(&[
        ("z.csv", b"filename,certificateId\na.pdf,FROM-Z\n".as_slice()),
        ("a.csv", b"filename,certificateId\nb.pdf,FROM-A\n".as_slice()),
        ("a.pdf", pdf.as_slice()),
        ("b.pdf", pdf.as_slice()),
    ]);

    let res = app.upload(archive, None).await;
    assert_eq!(res.status, 201, "{}", res.text);
    assert_eq!(res.body["summary"]["chunks"], json!([["a.pdf"]]));
    let batch_id = res.body["batch_id"].as_str().unwrap();

    app.start(batch_id).await;
    let batch = app.wait_completed(batch_id).await;
    assert_eq!(batch["mapping_ref"], "z.csv");
    let results = batch["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["cert_id"], "FROM-Z");
    assert_eq!(results[0]["filename"], "a.pdf");
}

#[tokio::test]
async fn same_base_name_in_two_folders_is_issued_once() {
    let app = TestApp::spawn().await;
    let pdf = sample_pdf();
    let mapping = "filename,certificateId\nx/a.pdf,ALICE\ny/a.pdf,BOB\n";
    let archive = build_zip(&[
        ("x/a.pdf", pdf.as_slice()),
        ("y/a.pdf", pdf.as_slice()),
        ("certificate_map.csv", mapping.as_bytes()),
    ]);

    let res = app.upload(archive, None).await;
    assert_eq!(res.status, 201, "{}", res.text);
    assert_eq!(res.body["summary"]["valid"], 1);
    assert_eq!(res.body["invalid_rows"][0]["reason"], "duplicate filename");
    assert_eq!(res.body["invalid_rows"][0]["row"]["certificateId"], "BOB");
    let batch_id = res.body["batch_id"].as_str().unwrap();

    app.start(batch_id).await;
    let batch = app.wait_completed(batch_id).await;
    let results = batch["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["cert_id"], "ALICE");

    let res = app.download(&routes::download(batch_id)).await;
    assert_eq!(zip_names(&res.bytes), vec!["a.pdf"]);
}

#[tokio::test]
async fn source_removed_after_upload_fails_that_row() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(valid_archive()).await;
    std::fs::remove_file(app.extracted(&batch_id, "bob.pdf")).unwrap();

    assert_eq!(app.start(&batch_id).await.status, 202);
    let batch = app.wait_completed(&batch_id).await;

    assert_eq!(batch["results"][0]["status"], "issued");
    assert_eq!(batch["results"][1]["status"], "failed");
    assert_eq!(batch["results"][1]["reason"], "missing source");
}

#[tokio::test]
async fn download_bundles_issued_pdfs() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(scenario_archive()).await;
    app.start(&batch_id).await;
    app.wait_completed(&batch_id).await;

    let res = app.download(&routes::download(&batch_id)).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.content_type.as_deref(), Some("application/zip"));
    assert!(
        res.content_disposition
            .as_deref()
            .unwrap()
            .contains(&format!("{batch_id}_issued.zip"))
    );
    assert_eq!(zip_names(&res.bytes), vec!["alice.pdf", "bob.pdf"]);

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(res.bytes)).unwrap();
    let mut pdf = Vec::new();
    archive
        .by_name("alice.pdf")
        .unwrap()
        .read_to_end(&mut pdf)
        .unwrap();
    let doc = lopdf::Document::load_mem(&pdf).expect("stamped output is a PDF");
    assert_eq!(doc.get_pages().len(), 1);
}

#[tokio::test]
async fn download_before_issuance_is_not_found() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(valid_archive()).await;

    let res = app.download(&routes::download(&batch_id)).await;
    assert_eq!(res.status, 404);
}

#[tokio::test]
async fn download_with_nothing_issued_is_not_found() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(valid_archive()).await;
    std::fs::remove_file(app.extracted(&batch_id, "alice.pdf")).unwrap();
    std::fs::remove_file(app.extracted(&batch_id, "bob.pdf")).unwrap();

    app.start(&batch_id).await;
    let batch = app.wait_completed(&batch_id).await;
    let results = batch["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["status"] == "failed"));

    let res = app.get(&routes::download(&batch_id)).await;
    assert_eq!(res.status, 404);
    assert_eq!(res.code(), "NOT_FOUND");
}

#[tokio::test]
async fn single_issued_file_download() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(valid_archive()).await;
    app.start(&batch_id).await;
    app.wait_completed(&batch_id).await;

    let res = app.download(&routes::file(&batch_id, "alice.pdf")).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.content_type.as_deref(), Some("application/pdf"));
    assert!(res.bytes.starts_with(b"%PDF"));

    let missing = app.get(&routes::file(&batch_id, "carol.pdf")).await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.code(), "NOT_FOUND");

    let hidden = app.get(&routes::file(&batch_id, ".secret")).await;
    assert_eq!(hidden.status, 400);
    assert_eq!(hidden.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn retry_reattempts_only_failed_rows() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(valid_archive()).await;
    let bob = app.extracted(&batch_id, "bob.pdf");
    let original = std::fs::read(&bob).unwrap();
    std::fs::remove_file(&bob).unwrap();

    app.start(&batch_id).await;
    let batch = app.wait_completed(&batch_id).await;
    assert_eq!(batch["results"][1]["status"], "failed");

    std::fs::write(&bob, original).unwrap();
    let res = app.post_empty(&routes::retry(&batch_id)).await;
    assert_eq!(res.status, 202, "{}", res.text);

    let batch = app.wait_completed(&batch_id).await;
    let results = batch["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["status"] == "issued"));
    assert_eq!(results[1]["filename"], "bob.pdf");
}

#[tokio::test]
async fn retry_requires_completed_batch() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(valid_archive()).await;

    let res = app.post_empty(&routes::retry(&batch_id)).await;
    assert_eq!(res.status, 409);
    assert_eq!(res.code(), "CONFLICT");
}

#[tokio::test]
async fn overlapping_start_conflicts() {
    let app = TestApp::spawn_with(|cfg| cfg.pace_ms = 200).await;
    let batch_id = app.create_batch(valid_archive()).await;

    assert_eq!(app.start(&batch_id).await.status, 202);
    let second = app.start(&batch_id).await;
    assert_eq!(second.status, 409);
    assert_eq!(second.code(), "CONFLICT");

    app.wait_completed(&batch_id).await;
}

#[tokio::test]
async fn start_replays_completed_batch() {
    let app = TestApp::spawn().await;
    let batch_id = app.create_batch(valid_archive()).await;
    app.start(&batch_id).await;
    app.wait_completed(&batch_id).await;

    assert_eq!(app.start(&batch_id).await.status, 202);
    let batch = app.wait_completed(&batch_id).await;
    assert_eq!(batch["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn upload_with_project_records_project() {
    let app = TestApp::spawn().await;
    let project = project::ActiveModel {
        name: Set("Autumn cohort".into()),
        qr_x: Set(Some(30.0)),
        qr_y: Set(Some(30.0)),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(&app.db)
    .await
    .unwrap();

    let res = app.upload(valid_archive(), Some(project.id)).await;
    assert_eq!(res.status, 201, "{}", res.text);
    let batch_id = res.body["batch_id"].as_str().unwrap();

    app.start(batch_id).await;
    let batch = app.wait_completed(batch_id).await;
    assert_eq!(batch["project_id"], project.id);
    assert!(
        batch["results"]
            .as_array()
            .unwrap()
            .iter()
            .all(|r| r["status"] == "issued")
    );
}

#[tokio::test]
async fn unknown_batch_is_not_found() {
    let app = TestApp::spawn().await;

    for res in [
        app.get(&routes::batch("nope")).await,
        app.start("nope").await,
        app.post_empty(&routes::retry("nope")).await,
        app.get(&routes::download("nope")).await,
        app.get(&routes::file("nope", "alice.pdf")).await,
    ] {
        assert_eq!(res.status, 404, "{}", res.text);
        assert_eq!(res.code(), "NOT_FOUND");
    }
}

#[tokio::test]
async fn start_rejects_malformed_body() {
    let app = TestApp::spawn().await;

    let res = app.post(routes::START, &json!({ "id": "x" })).await;
    assert_eq!(res.status, 400);
    assert_eq!(res.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn event_stream_is_server_sent_events() {
    let app = TestApp::spawn().await;

    let res = app
        .client
        .get(format!("http://{}{}?batch_id=b1", app.addr, routes::EVENTS))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    let content_type = res.headers()[reqwest::header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn openapi_document_lists_batch_routes() {
    let app = TestApp::spawn().await;

    let res = app.get(routes::OPENAPI).await;
    assert_eq!(res.status, 200);
    let paths = res.body["paths"].as_object().unwrap();
    for path in [
        "/api/v1/batches/upload",
        "/api/v1/batches/start",
        "/api/v1/batches/events",
        "/api/v1/batches/{id}",
        "/api/v1/batches/{id}/retry",
        "/api/v1/batches/{id}/download",
        "/api/v1/batches/{id}/files/{filename}",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}
