//! Defines routes for the file API.
//!
//! ## Structure
//! - **Probes** (mounted at root)
//!   - `GET  /healthz` — liveness
//!   - `GET  /readyz`  — readiness
//!
//! - **File endpoints** (under `/api/v1`)
//!   - `POST /api/v1/files/upload`        — multipart upload, field `files`
//!   - `GET  /api/v1/files`               — list every registered file
//!   - `GET  /api/v1/files/download/{id}` — download one file

use crate::{
    handlers::{
        file_handlers::{api_root, download_file, list_files, upload_files},
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for the file API.
///
/// The router carries shared state (`FileService`) to all handlers. Upload
/// bodies are capped at `max_upload_bytes`; other routes keep axum's default.
pub fn routes(max_upload_bytes: usize) -> Router<FileService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v1", get(api_root))
        .route(
            "/api/v1/files/upload",
            post(upload_files).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/v1/files", get(list_files))
        .route("/api/v1/files/download/{id}", get(download_file))
}
