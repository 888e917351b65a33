use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{
    authorize, guarded, optional_text, replay, required_text, DomainError, DomainResult,
};
use crate::access::{Action, Role, Scope, Subject};
use crate::models::{
    format_work_order_number, SignerType, WorkOrder, WorkOrderMaterial, WorkOrderSignature,
    WorkStatus,
};
use crate::notify::{NotificationEvent, Notifier};
use crate::store::Store;
use crate::utils::json::NullableValue;

#[derive(Debug, Clone)]
pub struct NewWorkOrder {
    pub title: String,
    pub description: Option<String>,
    pub site_address: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkOrderPatch {
    pub title: Option<String>,
    pub description: NullableValue<String>,
    pub site_address: NullableValue<String>,
    pub assigned_to: NullableValue<Uuid>,
    pub work_completed: Option<WorkStatus>,
    pub scheduled_at: NullableValue<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkOrderDetail {
    #[serde(flatten)]
    pub order: WorkOrder,
    pub materials: Vec<WorkOrderMaterial>,
    pub signatures: Vec<WorkOrderSignature>,
}

#[derive(Debug, Clone)]
pub struct NewSignature {
    pub signer_type: SignerType,
    pub signer_name: String,
    pub signature: String,
    pub ip_address: Option<String>,
}

/// Applies `patch`, stamping `completed_at` on the way into completed and
/// clearing it on the way out.
pub fn apply_patch(order: &mut WorkOrder, patch: &WorkOrderPatch, now: DateTime<Utc>) -> DomainResult<()> {
    if let Some(title) = &patch.title {
        order.title = required_text(title, "title")?;
    }
    patch.description.clone().apply_to(&mut order.description);
    patch.site_address.clone().apply_to(&mut order.site_address);
    patch.assigned_to.clone().apply_to(&mut order.assigned_to);
    patch.scheduled_at.clone().apply_to(&mut order.scheduled_at);

    if let Some(status) = patch.work_completed {
        match (order.work_completed, status) {
            (WorkStatus::Completed, WorkStatus::Completed) => {}
            (_, WorkStatus::Completed) => order.completed_at = Some(now),
            (_, _) => order.completed_at = None,
        }
        order.work_completed = status;
    }
    order.updated_at = now;
    Ok(())
}

/// Events implied by a status change. Entering completed yields only the
/// completion event; an unchanged status yields nothing.
pub fn transition_events(
    before: &WorkOrder,
    after: &WorkOrder,
    actor: Uuid,
) -> Option<NotificationEvent> {
    if before.work_completed == after.work_completed {
        return None;
    }
    if after.work_completed == WorkStatus::Completed {
        return Some(NotificationEvent::WorkOrderCompleted {
            work_order_id: after.id,
            work_order_number: after.work_order_number.clone(),
            completed_by: actor,
            completed_at: after.completed_at.unwrap_or(after.updated_at),
        });
    }
    Some(NotificationEvent::WorkOrderStatusChanged {
        work_order_id: after.id,
        work_order_number: after.work_order_number.clone(),
        from: before.work_completed,
        to: after.work_completed,
        changed_by: actor,
    })
}

/// Accepts raw base64 or a `data:image/...;base64,` URL.
pub fn validate_signature_payload(payload: &str) -> DomainResult<String> {
    let trimmed = payload.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (media, data) = rest
                .split_once(',')
                .ok_or_else(|| DomainError::invalid("signature data URL is malformed"))?;
            if !media.starts_with("image/") || !media.ends_with(";base64") {
                return Err(DomainError::invalid(
                    "signature must be a base64 encoded image",
                ));
            }
            data
        }
        None => trimmed,
    };
    match STANDARD.decode(encoded) {
        Ok(bytes) if !bytes.is_empty() => Ok(trimmed.to_string()),
        _ => Err(DomainError::invalid("signature must be valid base64")),
    }
}

/// The order plus the scope it implies. A missing order leaves the assignee
/// unset, so non-admins are refused before they can learn it is absent.
async fn load_order(
    store: &dyn Store,
    work_order_id: Uuid,
) -> DomainResult<(Scope, Option<WorkOrder>)> {
    let order = store.find_work_order(work_order_id).await?;
    let scope = Scope::new().assignee(order.as_ref().and_then(|order| order.assigned_to));
    Ok((scope, order))
}

async fn authorized_order(
    store: &dyn Store,
    subject: &Subject,
    action: Action,
    work_order_id: Uuid,
) -> DomainResult<WorkOrder> {
    let (scope, order) = load_order(store, work_order_id).await?;
    authorize(subject, action, &scope)?;
    order.ok_or(DomainError::NotFound("work order"))
}

async fn check_assignee(store: &dyn Store, user_id: Uuid) -> DomainResult<()> {
    let user = store
        .find_user(user_id)
        .await?
        .ok_or_else(|| DomainError::invalid("assigned user does not exist"))?;
    if !user.role.is_staff() {
        return Err(DomainError::invalid(
            "work orders can only be assigned to staff",
        ));
    }
    Ok(())
}

pub async fn list_work_orders(store: &dyn Store, subject: &Subject) -> DomainResult<Vec<WorkOrder>> {
    authorize(subject, Action::ListWorkOrders, &Scope::new())?;
    let assignee = match subject.role {
        Role::Admin => None,
        _ => Some(subject.user_id),
    };
    Ok(store.list_work_orders(assignee).await?)
}

pub async fn create_work_order(
    store: &dyn Store,
    subject: &Subject,
    input: NewWorkOrder,
) -> DomainResult<WorkOrder> {
    authorize(
        subject,
        Action::CreateWorkOrder,
        &Scope::new().assignee(input.assigned_to),
    )?;
    let title = required_text(&input.title, "title")?;
    if let Some(assignee) = input.assigned_to {
        check_assignee(store, assignee).await?;
    }

    let sequence = store.next_work_order_sequence().await?;
    let now = Utc::now();
    let order = WorkOrder {
        id: Uuid::new_v4(),
        work_order_number: format_work_order_number(sequence),
        title,
        description: optional_text(input.description),
        site_address: optional_text(input.site_address),
        assigned_to: input.assigned_to,
        work_completed: WorkStatus::NotStarted,
        scheduled_at: input.scheduled_at,
        completed_at: None,
        created_by: subject.user_id,
        created_at: now,
        updated_at: now,
    };
    store.insert_work_order(order.clone()).await?;
    info!(
        work_order_id = %order.id,
        number = %order.work_order_number,
        "work order created"
    );
    Ok(order)
}

pub async fn get_work_order(
    store: &dyn Store,
    subject: &Subject,
    work_order_id: Uuid,
) -> DomainResult<WorkOrderDetail> {
    let order = authorized_order(store, subject, Action::ViewWorkOrder, work_order_id).await?;
    let materials = store.list_materials(order.id).await?;
    let signatures = store.list_signatures(order.id).await?;
    Ok(WorkOrderDetail {
        order,
        materials,
        signatures,
    })
}

/// The edit run under the row lock. The assignee is checked again there, so a
/// reassignment that lands after the first check still shuts the old assignee out.
fn assignee_edit(
    actor: Subject,
    patch: WorkOrderPatch,
    now: DateTime<Utc>,
) -> impl Fn(&mut WorkOrder) -> DomainResult<()> + Clone + Send + 'static {
    move |order: &mut WorkOrder| {
        authorize(
            &actor,
            Action::UpdateWorkOrder,
            &Scope::new().assignee(order.assigned_to),
        )?;
        apply_patch(order, &patch, now)
    }
}

pub async fn update_work_order(
    store: &dyn Store,
    notifier: &Notifier,
    subject: &Subject,
    work_order_id: Uuid,
    patch: WorkOrderPatch,
) -> DomainResult<WorkOrder> {
    authorized_order(store, subject, Action::UpdateWorkOrder, work_order_id).await?;
    if !patch.assigned_to.is_omitted() && subject.role != Role::Admin {
        return Err(DomainError::Forbidden);
    }
    if let NullableValue::Value(assignee) = patch.assigned_to {
        check_assignee(store, assignee).await?;
    }

    let edit = assignee_edit(*subject, patch, Utc::now());
    let modified = store
        .modify_work_order(work_order_id, guarded(edit.clone()))
        .await?
        .ok_or(DomainError::NotFound("work order"))?;
    replay(&modified.before, edit)?;

    if let Some(event) = transition_events(&modified.before, &modified.after, subject.user_id) {
        info!(
            work_order_id = %work_order_id,
            from = %modified.before.work_completed,
            to = %modified.after.work_completed,
            "work order status changed"
        );
        notifier.dispatch(event);
    }
    Ok(modified.after)
}

pub async fn delete_work_order(
    store: &dyn Store,
    subject: &Subject,
    work_order_id: Uuid,
) -> DomainResult<()> {
    authorize(subject, Action::DeleteWorkOrder, &Scope::new())?;
    if !store.delete_work_order(work_order_id).await? {
        return Err(DomainError::NotFound("work order"));
    }
    info!(%work_order_id, "work order deleted");
    Ok(())
}

pub async fn list_materials(
    store: &dyn Store,
    subject: &Subject,
    work_order_id: Uuid,
) -> DomainResult<Vec<WorkOrderMaterial>> {
    authorized_order(store, subject, Action::ViewWorkOrder, work_order_id).await?;
    Ok(store.list_materials(work_order_id).await?)
}

pub async fn add_material(
    store: &dyn Store,
    subject: &Subject,
    work_order_id: Uuid,
    name: &str,
    quantity: f64,
    unit: Option<String>,
) -> DomainResult<WorkOrderMaterial> {
    authorized_order(store, subject, Action::UpdateWorkOrder, work_order_id).await?;
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(DomainError::invalid("quantity must be a positive number"));
    }
    let material = WorkOrderMaterial {
        id: Uuid::new_v4(),
        work_order_id,
        name: required_text(name, "name")?,
        quantity,
        unit: optional_text(unit),
        added_by: subject.user_id,
        created_at: Utc::now(),
    };
    store.insert_material(material.clone()).await?;
    Ok(material)
}

pub async fn remove_material(
    store: &dyn Store,
    subject: &Subject,
    work_order_id: Uuid,
    material_id: Uuid,
) -> DomainResult<()> {
    authorized_order(store, subject, Action::UpdateWorkOrder, work_order_id).await?;
    if !store.delete_material(work_order_id, material_id).await? {
        return Err(DomainError::NotFound("material"));
    }
    Ok(())
}

pub async fn list_signatures(
    store: &dyn Store,
    subject: &Subject,
    work_order_id: Uuid,
) -> DomainResult<Vec<WorkOrderSignature>> {
    authorized_order(store, subject, Action::ViewSignatures, work_order_id).await?;
    Ok(store.list_signatures(work_order_id).await?)
}

pub async fn add_signature(
    store: &dyn Store,
    notifier: &Notifier,
    subject: &Subject,
    work_order_id: Uuid,
    input: NewSignature,
) -> DomainResult<WorkOrderSignature> {
    authorized_order(store, subject, Action::AddSignature, work_order_id).await?;
    let signature = WorkOrderSignature {
        id: Uuid::new_v4(),
        work_order_id,
        signer_type: input.signer_type,
        signer_name: required_text(&input.signer_name, "signer_name")?,
        signature: validate_signature_payload(&input.signature)?,
        ip_address: input.ip_address,
        signed_at: Utc::now(),
    };
    store.insert_signature(signature.clone()).await?;

    info!(%work_order_id, signer_type = %signature.signer_type, "work order signed");
    notifier.dispatch(NotificationEvent::WorkOrderSigned {
        work_order_id,
        signer_type: signature.signer_type,
        signer_name: signature.signer_name.clone(),
    });
    Ok(signature)
}
