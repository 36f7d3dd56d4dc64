use std::convert::Infallible;
use std::path::Path as FsPath;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{
        Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use common::event::Event as _;
use common::{Batch, BatchStatus, IssueTarget};
use futures::Stream;
use issuer::bundle::bundle;
use issuer::{Archive, NewBatch, ValidationPolicy, WorkspaceLayout, validate};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::json::ValidJson;
use crate::models::batch::{
    EventsQuery, RunAcceptedResponse, StartBatchRequest, UploadBatchResponse,
};
use crate::state::AppState;
use crate::utils::filename::{content_disposition, validate_flat_filename};

#[utoipa::path(
    post,
    path = "/upload",
    tag = "Batches",
    operation_id = "uploadBatch",
    summary = "Upload and validate a certificate archive",
    description = "Accepts a ZIP with source PDFs and one mapping file (CSV/XLSX). The mapping \
        is located by name (`certificate_map.*` first, then any spreadsheet, then any CSV), each \
        row is matched against the archive entries, and a batch is created in `validated` state. \
        An optional `project_id` field selects the project whose QR placement applies. \
        Decompression limits: 128 MB per entry, 2 GB total.",
    request_body(content_type = "multipart/form-data", description = "`file`: ZIP archive; `project_id`: optional integer"),
    responses(
        (status = 201, description = "Batch validated", body = UploadBatchResponse),
        (status = 400, description = "Bad archive or mapping (VALIDATION_ERROR, NO_MAPPING_FILE, LIMIT_EXCEEDED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart))]
pub async fn upload_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadBatchResponse>), AppError> {
    let mut upload: Option<Vec<u8>> = None;
    let mut project_id: Option<i32> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file: {e}")))?;
                upload = Some(data.to_vec());
            }
            Some("project_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read project_id: {e}")))?;
                project_id = parse_project_id(&text)?;
            }
            _ => {}
        }
    }

    let data = upload.ok_or_else(|| AppError::Validation("Missing 'file' field".into()))?;

    let archive = Archive::from_bytes(&data)?;
    let mapping_ref = archive.mapping_entry()?.name.clone();
    let rows = archive.read_mapping()?;
    let policy = ValidationPolicy::from(&state.config.issuance);
    let report = validate(rows, &archive.entry_names(), &policy)?;

    let batch_id = Uuid::now_v7().to_string();
    let archive_ref = save_upload(&state.layout, &batch_id, &data).await?;
    archive
        .extract_to(&state.layout.extract_dir(&batch_id))
        .await?;

    state
        .store
        .create(NewBatch {
            id: batch_id.clone(),
            project_id,
            archive_ref,
            total: count(report.total)?,
            valid_count: count(report.valid_count())?,
            invalid_count: count(report.invalid_count())?,
            mapping_ref: Some(mapping_ref.clone()),
            targets: report.valid.iter().cloned().map(IssueTarget::from).collect(),
        })
        .await?;

    tracing::info!(
        batch_id = %batch_id,
        total = report.total,
        valid = report.valid_count(),
        invalid = report.invalid_count(),
        mapping = %mapping_ref,
        "Batch validated"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadBatchResponse::new(batch_id, report)),
    ))
}

#[utoipa::path(
    post,
    path = "/start",
    tag = "Batches",
    operation_id = "startBatch",
    summary = "Start issuance for a batch",
    description = "Replays the whole mapping: every row is stamped again and the previous results \
        are replaced. Setup happens before this returns; the rows themselves are processed in the \
        background and reported on the event stream.",
    request_body = StartBatchRequest,
    responses(
        (status = 202, description = "Run accepted", body = RunAcceptedResponse),
        (status = 400, description = "Malformed body or mapping (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "Batch not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "A run is already in progress (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, payload), fields(batch_id = %payload.batch_id))]
pub async fn start_batch(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<StartBatchRequest>,
) -> Result<(StatusCode, Json<RunAcceptedResponse>), AppError> {
    let run = state.engine.start(&payload.batch_id).await?;
    run.spawn();

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse {
            batch_id: payload.batch_id,
            status: BatchStatus::Processing,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/{id}/retry",
    tag = "Batches",
    operation_id = "retryBatch",
    summary = "Retry failed certificates",
    description = "Re-attempts only the `failed` results of a completed batch. Issued results keep \
        their place and are not stamped again.",
    params(("id" = String, Path, description = "Batch ID")),
    responses(
        (status = 202, description = "Retry accepted", body = RunAcceptedResponse),
        (status = 404, description = "Batch not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Batch not completed or already running (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn retry_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RunAcceptedResponse>), AppError> {
    let run = state.engine.retry_failed(&id).await?;
    run.spawn();

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse {
            batch_id: id,
            status: BatchStatus::Processing,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Batches",
    operation_id = "getBatch",
    summary = "Get a batch",
    description = "Current status, counts and results. While a run is in flight `results` holds the \
        rows attempted so far.",
    params(("id" = String, Path, description = "Batch ID")),
    responses(
        (status = 200, description = "Batch record", body = Batch),
        (status = 404, description = "Batch not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Batch>, AppError> {
    Ok(Json(state.store.get(&id).await?))
}

#[utoipa::path(
    get,
    path = "/{id}/download",
    tag = "Batches",
    operation_id = "downloadBatch",
    summary = "Download issued certificates",
    description = "Zips every issued PDF of the batch. The archive is rebuilt on each request.",
    params(("id" = String, Path, description = "Batch ID")),
    responses(
        (status = 200, description = "ZIP archive", content_type = "application/zip"),
        (status = 404, description = "Batch not found or nothing issued yet (NOT_FOUND)", body = ErrorBody),
        (status = 500, description = "Bundling failed (INTERNAL_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn download_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    state.store.get(&id).await?;
    let path = bundle(&state.layout, &id).await?;

    stream_file(&path, "application/zip", &format!("{id}_issued.zip")).await
}

#[utoipa::path(
    get,
    path = "/{id}/files/{filename}",
    tag = "Batches",
    operation_id = "downloadIssuedFile",
    summary = "Download one issued certificate",
    params(
        ("id" = String, Path, description = "Batch ID"),
        ("filename" = String, Path, description = "Issued filename"),
    ),
    responses(
        (status = 200, description = "Stamped PDF", content_type = "application/pdf"),
        (status = 400, description = "Invalid filename (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "Batch or file not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn download_file(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let filename =
        validate_flat_filename(&filename).map_err(|e| AppError::Validation(e.message().into()))?;
    state.store.get(&id).await?;

    let path = state.layout.issued_dir(&id).join(filename);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AppError::NotFound(format!(
            "Issued file '{filename}' not found"
        )));
    }

    stream_file(&path, "application/pdf", filename).await
}

#[utoipa::path(
    get,
    path = "/events",
    tag = "Batches",
    operation_id = "batchEvents",
    summary = "Subscribe to issuance progress",
    description = "Server-sent events. `batch:update` follows every row attempt and \
        `batch:completed` carries the full results once a run ends. Delivery is best-effort: \
        a subscriber that falls behind skips the events it missed.",
    params(EventsQuery),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
    ),
)]
pub async fn batch_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.events().subscribe();

    let stream = futures::stream::unfold((rx, query.batch_id), |(mut rx, filter)| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if filter.as_deref().is_some_and(|id| id != event.batch_id()) {
                        continue;
                    }
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    let sse = Event::default().event(event.topic()).data(data);
                    return Some((Ok(sse), (rx, filter)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn parse_project_id(text: &str) -> Result<Option<i32>, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|_| AppError::Validation(format!("Invalid project_id '{text}'")))
}

fn count(value: usize) -> Result<u32, AppError> {
    u32::try_from(value).map_err(|_| AppError::Internal(format!("count {value} out of range")))
}

/// Keep the original upload next to the extracted trees.
async fn save_upload(
    layout: &WorkspaceLayout,
    batch_id: &str,
    data: &[u8],
) -> Result<String, AppError> {
    let dir = layout.archives_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create '{}': {e}", dir.display())))?;

    let name = format!("{batch_id}.zip");
    tokio::fs::write(dir.join(&name), data)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to store upload '{name}': {e}")))?;

    Ok(name)
}

async fn stream_file(
    path: &FsPath,
    content_type: &str,
    download_name: &str,
) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to open '{}': {e}", path.display())))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stat '{}': {e}", path.display())))?
        .len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(header::CONTENT_DISPOSITION, content_disposition(download_name))
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}
