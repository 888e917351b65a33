use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    response::{IntoResponse, Redirect},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::Identity,
    error::{AppError, AppResult},
    lifecycle::documents::{self, content_disposition, DocumentEntry, ShareRequest, Upload},
    models::{Document, DocumentShare},
    state::AppState,
    utils::json::JsonBody,
};

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

#[derive(Serialize)]
pub struct DocumentDownloadResponse {
    pub url: String,
    pub expires_in: i64,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Deserialize)]
pub struct ShareDocumentRequest {
    pub client_id: Uuid,
    #[serde(default)]
    pub can_download: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<Json<Vec<DocumentEntry>>> {
    let entries = documents::list_documents(state.store.as_ref(), &identity.subject()).await?;
    Ok(Json(entries))
}

pub async fn upload_document(
    State(state): State<AppState>,
    identity: Identity,
    mut multipart: Multipart,
) -> AppResult<Json<Document>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut display_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(|name| name.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("display_name") => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid display_name: {err}"))
                })?;
                display_name = Some(value);
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let filename = filename.ok_or_else(|| AppError::bad_request("filename is required"))?;

    let document = documents::upload_document(
        state.store.as_ref(),
        state.storage.as_ref(),
        &identity.subject(),
        Upload {
            filename,
            display_name,
            content_type,
            bytes,
        },
    )
    .await?;
    Ok(Json(document))
}

pub async fn get_document(
    State(state): State<AppState>,
    identity: Identity,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentEntry>> {
    let entry =
        documents::get_document(state.store.as_ref(), &identity.subject(), document_id).await?;
    Ok(Json(entry))
}

/// Hands out a signed, short-lived link rather than the storage URL itself.
pub async fn download_document(
    State(state): State<AppState>,
    identity: Identity,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentDownloadResponse>> {
    let document =
        documents::authorize_download(state.store.as_ref(), &identity.subject(), document_id)
            .await?;
    let token = state.downloads.generate(document.id, identity.user.id)?;

    Ok(Json(DocumentDownloadResponse {
        url: format!("/download/{token}"),
        expires_in: state.downloads.expiry().num_seconds(),
        filename: document.filename,
        content_type: document.file_type,
        size_bytes: document.size_bytes,
    }))
}

pub async fn download_with_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<impl IntoResponse> {
    let claims = state.downloads.verify(&token).map_err(|err| {
        warn!(error = %err, "rejected download token");
        AppError::unauthorized()
    })?;

    let document =
        documents::redeem_download(state.store.as_ref(), claims.user_id, claims.doc_id).await?;

    let presigned_url = state
        .storage
        .presign_get_object(
            &document.storage_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
            content_disposition("attachment", &document.filename),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    info!(document_id = %document.id, user_id = %claims.user_id, "document download redeemed");
    Ok(Redirect::temporary(&presigned_url))
}

pub async fn delete_document(
    State(state): State<AppState>,
    identity: Identity,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    documents::delete_document(
        state.store.as_ref(),
        state.storage.as_ref(),
        &identity.subject(),
        document_id,
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_shares(
    State(state): State<AppState>,
    identity: Identity,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentShare>>> {
    let shares =
        documents::list_shares(state.store.as_ref(), &identity.subject(), document_id).await?;
    Ok(Json(shares))
}

pub async fn share_document(
    State(state): State<AppState>,
    identity: Identity,
    Path(document_id): Path<Uuid>,
    JsonBody(payload): JsonBody<ShareDocumentRequest>,
) -> AppResult<Json<DocumentShare>> {
    let share = documents::share_document(
        state.store.as_ref(),
        &state.notifier,
        &identity.subject(),
        document_id,
        ShareRequest {
            client_id: payload.client_id,
            can_download: payload.can_download,
            expires_at: payload.expires_at,
        },
    )
    .await?;
    Ok(Json(share))
}

pub async fn revoke_share(
    State(state): State<AppState>,
    identity: Identity,
    Path((document_id, client_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Value>> {
    documents::revoke_share(
        state.store.as_ref(),
        &identity.subject(),
        document_id,
        client_id,
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}
