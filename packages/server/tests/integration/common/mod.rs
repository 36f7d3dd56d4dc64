use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use common::IssuanceConfig;
use issuer::WorkspaceLayout;
use lopdf::{Document, Object, Stream, dictionary};
use reqwest::Client;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tempfile::TempDir;

use server::config::{AppConfig, CorsConfig, DatabaseConfig, ServerConfig, StorageConfig};
use server::state::AppState;

pub mod routes {
    pub const UPLOAD: &str = "/api/v1/batches/upload";
    pub const START: &str = "/api/v1/batches/start";
    pub const EVENTS: &str = "/api/v1/batches/events";
    pub const OPENAPI: &str = "/api-docs/openapi.json";

    pub fn batch(id: &str) -> String {
        format!("/api/v1/batches/{id}")
    }

    pub fn retry(id: &str) -> String {
        format!("/api/v1/batches/{id}/retry")
    }

    pub fn download(id: &str) -> String {
        format!("/api/v1/batches/{id}/download")
    }

    pub fn file(id: &str, filename: &str) -> String {
        format!("/api/v1/batches/{id}/files/{filename}")
    }
}

/// A running test server backed by in-memory SQLite and a scratch storage root.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub layout: WorkspaceLayout,
    _storage: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

/// Raw HTTP response for binary downloads.
pub struct BinaryResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub bytes: Vec<u8>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with issuance settings adjusted by `configure`. Pacing is off unless set.
    pub async fn spawn_with(configure: impl FnOnce(&mut IssuanceConfig)) -> Self {
        let storage = TempDir::new().expect("Failed to create storage dir");

        let mut issuance = IssuanceConfig {
            pace_ms: 0,
            ..Default::default()
        };
        configure(&mut issuance);

        let app_config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig {
                    allow_origins: vec![],
                    max_age: 3600,
                },
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            storage: StorageConfig {
                root: storage.path().to_string_lossy().into_owned(),
                max_upload_size: 16 * 1024 * 1024,
            },
            issuance,
        };

        let db = server::database::init_db(&app_config.database.url)
            .await
            .expect("Failed to initialize test database");

        let state = AppState::new(app_config, db.clone());
        let layout = state.layout.clone();
        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            layout,
            _storage: storage,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn post_empty(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn download(&self, path: &str) -> BinaryResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        let header = |name: reqwest::header::HeaderName| {
            res.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let status = res.status().as_u16();
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let content_disposition = header(reqwest::header::CONTENT_DISPOSITION);
        let bytes = res.bytes().await.expect("Failed to read body").to_vec();

        BinaryResponse {
            status,
            content_type,
            content_disposition,
            bytes,
        }
    }

    pub async fn upload(&self, archive: Vec<u8>, project_id: Option<i32>) -> TestResponse {
        let part = reqwest::multipart::Part::bytes(archive)
            .file_name("certificates.zip")
            .mime_str("application/zip")
            .expect("Failed to set MIME type");
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(id) = project_id {
            form = form.text("project_id", id.to_string());
        }

        let res = self
            .client
            .post(self.url(routes::UPLOAD))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart upload request");

        TestResponse::from_response(res).await
    }

    /// Upload an archive that must validate, returning the batch id.
    pub async fn create_batch(&self, archive: Vec<u8>) -> String {
        let res = self.upload(archive, None).await;
        assert_eq!(res.status, 201, "upload failed: {}", res.text);
        res.body["batch_id"]
            .as_str()
            .expect("upload response should contain 'batch_id'")
            .to_string()
    }

    pub async fn start(&self, batch_id: &str) -> TestResponse {
        self.post(routes::START, &serde_json::json!({ "batch_id": batch_id }))
            .await
    }

    /// Poll the batch until it reports `completed`, returning the final record.
    pub async fn wait_completed(&self, batch_id: &str) -> Value {
        for _ in 0..100 {
            let res = self.get(&routes::batch(batch_id)).await;
            assert_eq!(res.status, 200, "get batch failed: {}", res.text);
            if res.body["status"] == "completed" {
                return res.body;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("batch {batch_id} did not complete");
    }

    pub fn extracted(&self, batch_id: &str, name: &str) -> PathBuf {
        self.layout.extract_dir(batch_id).join(name)
    }
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }

    pub fn code(&self) -> &str {
        self.body["code"].as_str().unwrap_or_default()
    }
}

/// Build a ZIP archive in memory with given file entries.
pub fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(cursor);
    let options =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).expect("zip start_file");
        writer.write_all(content).expect("zip write_all");
    }
    let cursor = writer.finish().expect("zip finish");
    cursor.into_inner()
}

/// A one-page A4 PDF with a short text line.
pub fn sample_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = Stream::new(
        dictionary! {},
        b"BT /F1 24 Tf 72 720 Td (Certificate) Tj ET".to_vec(),
    );
    let content_id = doc.add_object(content);
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save pdf");
    out
}

/// Archive with `alice.pdf` and `bob.pdf` plus a mapping that also names a missing file.
pub fn scenario_archive() -> Vec<u8> {
    let pdf = sample_pdf();
    let mapping = "filename,certificateId\nalice.pdf,C-1\nbob.pdf,C-2\ncarol.pdf,C-3\n";
    build_zip(&[
        ("alice.pdf", pdf.as_slice()),
        ("bob.pdf", pdf.as_slice()),
        ("certificate_map.csv", mapping.as_bytes()),
    ])
}

/// Archive whose mapping rows all resolve.
pub fn valid_archive() -> Vec<u8> {
    let pdf = sample_pdf();
    let mapping = "filename,certificateId\nalice.pdf,C-1\nbob.pdf,C-2\n";
    build_zip(&[
        ("alice.pdf", pdf.as_slice()),
        ("bob.pdf", pdf.as_slice()),
        ("certificate_map.csv", mapping.as_bytes()),
    ])
}
