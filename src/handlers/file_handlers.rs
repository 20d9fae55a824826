//! HTTP handlers for uploading, listing and downloading files.
//! Upload parts and download bodies are streamed, never buffered whole, and
//! storage concerns are delegated to `FileService`.

use crate::{
    errors::AppError,
    models::{envelope::ApiResponse, file::{FileRecord, FileSummary}},
    services::file_service::FileService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::warn;

/// Multipart field carrying the uploaded files.
pub const UPLOAD_FIELD: &str = "files";

/// `GET /api/v1`
pub async fn api_root() -> &'static str {
    "Welcome to the filedrop API!"
}

/// `POST /api/v1/files/upload` — store every `files` part of the body.
///
/// Parts that fail to store are left out of `data`. Parts of other fields, and
/// `files` parts without a filename, are ignored.
pub async fn upload_files(
    State(service): State<FileService>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<Vec<FileSummary>>>, AppError> {
    if declared_length(&headers).is_some_and(|len| len > service.max_upload_bytes() as u64) {
        return Err(too_large());
    }
    let mut multipart = multipart.map_err(|rejection| {
        warn!("rejected upload request: {}", rejection.body_text());
        AppError::bad_request("Invalid file upload")
    })?;

    let mut batch = service.begin_upload();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!("malformed multipart body: {}", err.body_text());
                let status = err.status();
                batch.abort().await;
                return Err(if status == StatusCode::PAYLOAD_TOO_LARGE {
                    too_large()
                } else {
                    AppError::bad_request("Invalid file upload")
                });
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(filename) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let stream = field
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();
        batch.add(&filename, content_type, stream).await;
    }

    let files = batch.commit().await?;
    Ok(Json(ApiResponse::ok("Files uploaded successfully", files)))
}

/// `GET /api/v1/files`
pub async fn list_files(
    State(service): State<FileService>,
) -> Json<ApiResponse<Vec<FileSummary>>> {
    Json(ApiResponse::ok(
        "Files listed successfully",
        service.list_files().await,
    ))
}

/// `GET /api/v1/files/download/{id}` — stream the payload as an attachment.
pub async fn download_file(
    State(service): State<FileService>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (record, reader) = service.open_download(&id).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &record);
    Ok(response)
}

fn too_large() -> AppError {
    AppError::new(
        StatusCode::PAYLOAD_TOO_LARGE,
        "Upload exceeds the maximum allowed size",
    )
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn set_download_headers(headers: &mut HeaderMap, record: &FileRecord) {
    let content_type = record
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    // The type is whatever the uploader declared; never let a browser upgrade it.
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size_bytes));
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&record.filename),
    );

    let quoted = format!("\"{}\"", record.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    let last_modified = record
        .updated_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// `attachment; filename="<name>"`, plus an RFC 5987 `filename*` parameter
/// when the name is not plain ASCII.
fn content_disposition(filename: &str) -> HeaderValue {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut value = format!("attachment; filename=\"{ascii}\"");
    if !filename.is_ascii() {
        value.push_str(&format!(
            "; filename*=UTF-8''{}",
            urlencoding::encode(filename)
        ));
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_for_ascii_name() {
        assert_eq!(
            content_disposition("a.txt"),
            "attachment; filename=\"a.txt\""
        );
    }

    #[test]
    fn disposition_for_unicode_name() {
        assert_eq!(
            content_disposition("résumé.pdf"),
            "attachment; filename=\"r_sum_.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
        );
    }
}
