use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::Identity,
    error::{AppError, AppResult},
    lifecycle::work_orders::{
        self, NewSignature, NewWorkOrder, WorkOrderDetail, WorkOrderPatch,
    },
    models::{SignerType, WorkOrder, WorkOrderMaterial, WorkOrderSignature},
    state::AppState,
    utils::json::{nullable_field, optional_field, JsonBody},
};

#[derive(Deserialize)]
pub struct CreateWorkOrderRequest {
    pub title: String,
    pub description: Option<String>,
    pub site_address: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct AddMaterialRequest {
    pub name: String,
    pub quantity: f64,
    pub unit: Option<String>,
}

#[derive(Deserialize)]
pub struct AddSignatureRequest {
    pub signer_type: SignerType,
    pub signer_name: String,
    pub signature: String,
}

/// Best-effort source address: the first forwarded hop, then `X-Real-IP`,
/// then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

pub async fn list_work_orders(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<Json<Vec<WorkOrder>>> {
    let orders = work_orders::list_work_orders(state.store.as_ref(), &identity.subject()).await?;
    Ok(Json(orders))
}

pub async fn create_work_order(
    State(state): State<AppState>,
    identity: Identity,
    JsonBody(payload): JsonBody<CreateWorkOrderRequest>,
) -> AppResult<Json<WorkOrder>> {
    let order = work_orders::create_work_order(
        state.store.as_ref(),
        &identity.subject(),
        NewWorkOrder {
            title: payload.title,
            description: payload.description,
            site_address: payload.site_address,
            assigned_to: payload.assigned_to,
            scheduled_at: payload.scheduled_at,
        },
    )
    .await?;
    Ok(Json(order))
}

pub async fn get_work_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(work_order_id): Path<Uuid>,
) -> AppResult<Json<WorkOrderDetail>> {
    let detail =
        work_orders::get_work_order(state.store.as_ref(), &identity.subject(), work_order_id)
            .await?;
    Ok(Json(detail))
}

pub async fn update_work_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(work_order_id): Path<Uuid>,
    JsonBody(body): JsonBody<Value>,
) -> AppResult<Json<WorkOrder>> {
    let patch = WorkOrderPatch {
        title: optional_field(&body, "title").map_err(AppError::bad_request)?,
        description: nullable_field(&body, "description").map_err(AppError::bad_request)?,
        site_address: nullable_field(&body, "site_address").map_err(AppError::bad_request)?,
        assigned_to: nullable_field(&body, "assigned_to").map_err(AppError::bad_request)?,
        work_completed: optional_field(&body, "work_completed").map_err(AppError::bad_request)?,
        scheduled_at: nullable_field(&body, "scheduled_at").map_err(AppError::bad_request)?,
    };

    let order = work_orders::update_work_order(
        state.store.as_ref(),
        &state.notifier,
        &identity.subject(),
        work_order_id,
        patch,
    )
    .await?;
    Ok(Json(order))
}

pub async fn delete_work_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(work_order_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    work_orders::delete_work_order(state.store.as_ref(), &identity.subject(), work_order_id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_materials(
    State(state): State<AppState>,
    identity: Identity,
    Path(work_order_id): Path<Uuid>,
) -> AppResult<Json<Vec<WorkOrderMaterial>>> {
    let materials =
        work_orders::list_materials(state.store.as_ref(), &identity.subject(), work_order_id)
            .await?;
    Ok(Json(materials))
}

pub async fn add_material(
    State(state): State<AppState>,
    identity: Identity,
    Path(work_order_id): Path<Uuid>,
    JsonBody(payload): JsonBody<AddMaterialRequest>,
) -> AppResult<Json<WorkOrderMaterial>> {
    let material = work_orders::add_material(
        state.store.as_ref(),
        &identity.subject(),
        work_order_id,
        &payload.name,
        payload.quantity,
        payload.unit,
    )
    .await?;
    Ok(Json(material))
}

pub async fn remove_material(
    State(state): State<AppState>,
    identity: Identity,
    Path((work_order_id, material_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Value>> {
    work_orders::remove_material(
        state.store.as_ref(),
        &identity.subject(),
        work_order_id,
        material_id,
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_signatures(
    State(state): State<AppState>,
    identity: Identity,
    Path(work_order_id): Path<Uuid>,
) -> AppResult<Json<Vec<WorkOrderSignature>>> {
    let signatures =
        work_orders::list_signatures(state.store.as_ref(), &identity.subject(), work_order_id)
            .await?;
    Ok(Json(signatures))
}

pub async fn add_signature(
    State(state): State<AppState>,
    identity: Identity,
    Path(work_order_id): Path<Uuid>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<AddSignatureRequest>,
) -> AppResult<Json<WorkOrderSignature>> {
    let ip_address = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    let signature = work_orders::add_signature(
        state.store.as_ref(),
        &state.notifier,
        &identity.subject(),
        work_order_id,
        NewSignature {
            signer_type: payload.signer_type,
            signer_name: payload.signer_name,
            signature: payload.signature,
            ip_address,
        },
    )
    .await?;
    Ok(Json(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(peer)).as_deref(),
            Some("203.0.113.9")
        );

        headers.remove("x-forwarded-for");
        assert_eq!(
            client_ip(&headers, Some(peer)).as_deref(),
            Some("198.51.100.2")
        );
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)).as_deref(),
            Some("127.0.0.1")
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }
}
