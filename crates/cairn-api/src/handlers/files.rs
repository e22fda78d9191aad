//! File endpoints of the master. Each handler is a thin shell around one
//! `FileBroker` operation.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::multipart::{Field, MultipartError},
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cairn_core::constants::OCTET_STREAM;
use cairn_core::models::{
    FileTransferProgress, FileTransferRequest, FileType, FileView, PageRequest, PageView,
};
use cairn_core::AppError;
use bytes::Bytes;
use cairn_proxy::UploadPayload;
use futures::channel::mpsc;
use futures::SinkExt;
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn parse_file_type(value: &str) -> Result<FileType, AppError> {
    FileType::from_str(value).map_err(AppError::InvalidInput)
}

#[tracing::instrument(skip(state, caller), fields(user_id = ?caller.0.user_id))]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<PageView<FileView>>, HttpAppError> {
    let file_type = query
        .file_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(parse_file_type)
        .transpose()?;
    let defaults = PageRequest::default();
    let page = PageRequest::new(
        query.page.unwrap_or(defaults.page),
        query.page_size.unwrap_or(defaults.page_size),
    )?;

    let views = state
        .broker
        .get_user_file_views(&caller.0, file_type, page)
        .await?;
    Ok(Json(views))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<Json<FileView>, HttpAppError> {
    Ok(Json(state.broker.get_file_view_by_id(&caller.0, id).await?))
}

pub async fn get_file_by_name(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(unique_name): Path<String>,
) -> Result<Json<FileView>, HttpAppError> {
    Ok(Json(
        state
            .broker
            .get_file_view_by_unique_name(&caller.0, &unique_name)
            .await?,
    ))
}

#[tracing::instrument(skip(state, caller), fields(user_id = ?caller.0.user_id, file_id = id))]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<StatusCode, HttpAppError> {
    state.broker.delete_by_id(&caller.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Multipart upload with a `file` part and a `type` part. Answers with the
/// new file's id as a bare JSON number.
///
/// When `type` precedes `file` the file part is streamed to the worker as it
/// arrives. Otherwise the file has to be held until its type is known.
#[tracing::instrument(skip(state, caller, multipart), fields(user_id = ?caller.0.user_id))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    mut multipart: Multipart,
) -> Result<Json<i64>, HttpAppError> {
    let mut buffered: Option<(String, Bytes)> = None;
    let mut file_type: Option<FileType> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Failed to read multipart: {}", e)))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                if buffered.is_some() {
                    return Err(AppError::InvalidInput(
                        "Send exactly one field named 'file'".to_string(),
                    )
                    .into());
                }
                let name = field.file_name().unwrap_or("unknown").to_string();

                if let Some(file_type) = file_type {
                    let first = field
                        .chunk()
                        .await
                        .map_err(read_error)?
                        .filter(|chunk| !chunk.is_empty())
                        .ok_or_else(|| AppError::InvalidInput("File is empty".to_string()))?;

                    tracing::debug!(file_name = %name, file_type = %file_type, "Streaming upload to worker");
                    let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_CAPACITY);
                    let payload = UploadPayload::from_stream(name, rx, None);
                    let (pumped, uploaded) = tokio::join!(
                        pump_field(field, first, tx),
                        state.broker.handle_upload_request(&caller.0, file_type, payload),
                    );
                    pumped?;
                    return Ok(Json(uploaded?));
                }

                let data = field.bytes().await.map_err(read_error)?;
                buffered = Some((name, data));
            }
            Some("type") => {
                let text = field.text().await.map_err(|e| {
                    AppError::InvalidInput(format!("Failed to read file type: {}", e))
                })?;
                file_type = Some(parse_file_type(&text)?);
            }
            other => tracing::debug!(field = ?other, "Ignoring unknown multipart field"),
        }
    }

    let (name, data) =
        buffered.ok_or_else(|| AppError::InvalidInput("No file provided".to_string()))?;
    let file_type =
        file_type.ok_or_else(|| AppError::InvalidInput("No file type provided".to_string()))?;
    if data.is_empty() {
        return Err(AppError::InvalidInput("File is empty".to_string()).into());
    }

    tracing::debug!(file_name = %name, size = data.len(), file_type = %file_type, "Upload received");
    let id = state
        .broker
        .handle_upload_request(&caller.0, file_type, UploadPayload::from_bytes(name, data))
        .await?;
    Ok(Json(id))
}

/// Chunks in flight between the client's multipart body and the worker request.
const UPLOAD_CHANNEL_CAPACITY: usize = 8;

type ChunkSender = mpsc::Sender<Result<Bytes, std::io::Error>>;

fn read_error(e: MultipartError) -> AppError {
    AppError::InvalidInput(format!("Failed to read file data: {}", e))
}

/// Copy a multipart field into the worker request body.
///
/// A read error is passed on so the worker request aborts. A closed channel
/// means the broker stopped before or during the upload and reports why.
async fn pump_field(mut field: Field<'_>, first: Bytes, mut tx: ChunkSender) -> Result<(), AppError> {
    if tx.send(Ok(first)).await.is_err() {
        return Ok(());
    }
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if tx.send(Ok(chunk)).await.is_err() {
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                let _ = tx.send(Err(std::io::Error::other(e.to_string()))).await;
                return Err(read_error(e));
            }
        }
    }
}

pub async fn transfer_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ValidatedJson(request): ValidatedJson<FileTransferRequest>,
) -> Result<Json<i64>, HttpAppError> {
    let id = state
        .broker
        .handle_transfer_request(&caller.0, request)
        .await?;
    Ok(Json(id))
}

pub async fn transfer_progress(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<Json<FileTransferProgress>, HttpAppError> {
    Ok(Json(
        state.broker.get_transfer_progress(&caller.0, id).await?,
    ))
}

/// Streams the file from its owning worker without buffering it.
#[tracing::instrument(skip(state, caller), fields(user_id = ?caller.0.user_id, file_id = id))]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<Response, HttpAppError> {
    let download = state.broker.handle_download_request(&caller.0, id).await?;
    let stream = download.resource.open().await?;

    let content_type = stream
        .content_type()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(OCTET_STREAM));
    let disposition = HeaderValue::from_str(&content_disposition(&download.name))
        .map_err(|e| AppError::Internal(format!("Invalid Content-Disposition: {}", e)))?;
    let content_length = stream.content_length();

    tracing::debug!(
        worker_id = download.resource.worker_id(),
        content_length = ?content_length,
        "Proxying download from worker"
    );

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    if let Some(len) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}

fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_escapes_quotes() {
        assert_eq!(
            content_disposition("heap \"prod\".hprof"),
            "attachment; filename=\"heap _prod_.hprof\""
        );
        assert_eq!(content_disposition("gc.log"), "attachment; filename=\"gc.log\"");
    }

    #[test]
    fn test_parse_file_type_rejects_unknown() {
        assert_eq!(parse_file_type("heap-dump").unwrap(), FileType::HeapDump);
        assert!(matches!(
            parse_file_type("core-dump"),
            Err(AppError::InvalidInput(_))
        ));
    }
}
