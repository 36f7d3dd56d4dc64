use axum::extract::DefaultBodyLimit;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::config::AppConfig;
use crate::handlers::batch::*;
use crate::state::AppState;

pub fn routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest("/batches", batch_routes(config))
}

fn batch_routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    let upload = OpenApiRouter::new()
        .routes(routes!(upload_batch))
        .layer(DefaultBodyLimit::max(config.storage.max_upload_size));

    OpenApiRouter::new()
        .routes(routes!(start_batch))
        .routes(routes!(batch_events))
        .routes(routes!(get_batch))
        .routes(routes!(retry_batch))
        .routes(routes!(download_batch))
        .routes(routes!(download_file))
        .merge(upload)
}
