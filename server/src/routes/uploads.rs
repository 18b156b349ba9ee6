//! Resumable upload endpoints, one set per target kind.
//!
//! `Upload-Length`, `Upload-Offset` and `Upload-Metadata` follow the tus
//! conventions; bodies of PATCH requests are streamed straight into storage.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde_json::json;
use tokio_util::io::StreamReader;

use crate::error::{UploadError, UploadResult};
use crate::models::{InitiatedUpload, SlotAvailability, UploadInfo};
use crate::routes::auth;
use crate::usecase::{UploadService, UploadTarget};

pub const UPLOAD_OFFSET: &str = "upload-offset";
pub const UPLOAD_LENGTH: &str = "upload-length";
pub const UPLOAD_METADATA: &str = "upload-metadata";

pub struct UploadRoutes<T: UploadTarget> {
    pub service: Arc<UploadService<T>>,
    pub jwt_secret: Arc<str>,
}

impl<T: UploadTarget> Clone for UploadRoutes<T> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }
    }
}

impl<T: UploadTarget> UploadRoutes<T> {
    fn owner(&self, headers: &HeaderMap) -> UploadResult<String> {
        Ok(auth::extract_claims(&self.jwt_secret, headers)?.sub)
    }
}

/// Endpoints for one kind, mounted under its scope name
/// (e.g. `/api/uploads/projects/...` and `/api/projects/{entity_id}/upload`).
pub fn router<T: UploadTarget>(state: UploadRoutes<T>) -> Router {
    let scope = T::SCOPE;
    Router::new()
        .route(&format!("/api/uploads/{scope}"), post(initiate::<T>))
        .route(&format!("/api/uploads/{scope}/slot"), get(check_slot::<T>))
        .route(&format!("/api/uploads/{scope}/queue"), delete(reset_queue::<T>))
        .route(
            &format!("/api/uploads/{scope}/{{id}}"),
            patch(append_chunk::<T>)
                .head(upload_status::<T>)
                .get(upload_info::<T>)
                .delete(cancel_upload::<T>),
        )
        .route(
            &format!("/api/{scope}/{{entity_id}}/upload"),
            post(initiate_update::<T>),
        )
        .route(
            &format!("/api/{scope}/{{entity_id}}/upload/{{id}}"),
            patch(append_entity_chunk::<T>)
                .head(entity_upload_status::<T>)
                .get(entity_upload_info::<T>)
                .delete(cancel_entity_upload::<T>),
        )
        .with_state(state)
}

// ─── Headers ───

fn header_u64(headers: &HeaderMap, name: &str) -> UploadResult<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| UploadError::Validation(format!("missing or invalid {name} header")))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> UploadResult<&'a str> {
    match headers.get(name) {
        None => Ok(""),
        Some(v) => v
            .to_str()
            .map_err(|_| UploadError::Validation(format!("invalid {name} header"))),
    }
}

fn created(upload: InitiatedUpload) -> impl IntoResponse {
    (
        StatusCode::CREATED,
        [
            (header::LOCATION, upload.url.clone()),
            (header::HeaderName::from_static(UPLOAD_OFFSET), upload.offset.to_string()),
        ],
        Json(upload),
    )
}

fn offset_headers(offset: u64, length: Option<u64>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(UPLOAD_OFFSET, offset.into());
    if let Some(length) = length {
        headers.insert(UPLOAD_LENGTH, length.into());
    }
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
    headers
}

// ─── Session lifecycle ───

async fn check_slot<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    headers: HeaderMap,
) -> UploadResult<Json<SlotAvailability>> {
    let owner = state.owner(&headers)?;
    Ok(Json(state.service.check_slot(&owner).await?))
}

async fn initiate<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    headers: HeaderMap,
) -> UploadResult<impl IntoResponse> {
    let owner = state.owner(&headers)?;
    let length = header_u64(&headers, UPLOAD_LENGTH)?;
    let metadata = header_str(&headers, UPLOAD_METADATA)?;
    let upload = state.service.initiate(&owner, length, metadata, None).await?;
    Ok(created(upload))
}

async fn initiate_update<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path(entity_id): Path<String>,
    headers: HeaderMap,
) -> UploadResult<impl IntoResponse> {
    let owner = state.owner(&headers)?;
    let length = header_u64(&headers, UPLOAD_LENGTH)?;
    let metadata = header_str(&headers, UPLOAD_METADATA)?;
    let upload = state
        .service
        .initiate(&owner, length, metadata, Some(&entity_id))
        .await?;
    Ok(created(upload))
}

async fn reset_queue<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    headers: HeaderMap,
) -> UploadResult<Json<serde_json::Value>> {
    let owner = state.owner(&headers)?;
    let cancelled = state.service.reset_queue(&owner).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

// ─── Per-session operations ───

async fn write_chunk<T: UploadTarget>(
    state: &UploadRoutes<T>,
    headers: &HeaderMap,
    id: &str,
    expected_entity: Option<&str>,
    body: Body,
) -> UploadResult<HeaderMap> {
    let owner = state.owner(headers)?;
    let offset = header_u64(headers, UPLOAD_OFFSET)?;

    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);
    let new_offset = state
        .service
        .handle_chunk(id, &owner, offset, &mut reader, expected_entity)
        .await?;
    Ok(offset_headers(new_offset, None))
}

async fn append_chunk<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> UploadResult<(StatusCode, HeaderMap)> {
    let headers = write_chunk(&state, &headers, &id, None, body).await?;
    Ok((StatusCode::NO_CONTENT, headers))
}

async fn append_entity_chunk<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path((entity_id, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> UploadResult<(StatusCode, HeaderMap)> {
    let headers = write_chunk(&state, &headers, &id, Some(&entity_id), body).await?;
    Ok((StatusCode::NO_CONTENT, headers))
}

async fn status_headers<T: UploadTarget>(
    state: &UploadRoutes<T>,
    headers: &HeaderMap,
    id: &str,
    expected_entity: Option<&str>,
) -> UploadResult<HeaderMap> {
    let owner = state.owner(headers)?;
    let progress = state.service.status(id, &owner, expected_entity).await?;
    Ok(offset_headers(progress.offset, Some(progress.declared_size)))
}

async fn upload_status<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> UploadResult<HeaderMap> {
    status_headers(&state, &headers, &id, None).await
}

async fn entity_upload_status<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path((entity_id, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> UploadResult<HeaderMap> {
    status_headers(&state, &headers, &id, Some(&entity_id)).await
}

async fn upload_info<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> UploadResult<Json<UploadInfo>> {
    let owner = state.owner(&headers)?;
    Ok(Json(state.service.info(&id, &owner, None).await?))
}

async fn entity_upload_info<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path((entity_id, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> UploadResult<Json<UploadInfo>> {
    let owner = state.owner(&headers)?;
    Ok(Json(state.service.info(&id, &owner, Some(&entity_id)).await?))
}

async fn cancel_upload<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> UploadResult<StatusCode> {
    let owner = state.owner(&headers)?;
    state.service.cancel(&id, &owner, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_entity_upload<T: UploadTarget>(
    State(state): State<UploadRoutes<T>>,
    Path((entity_id, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> UploadResult<StatusCode> {
    let owner = state.owner(&headers)?;
    state.service.cancel(&id, &owner, Some(&entity_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
