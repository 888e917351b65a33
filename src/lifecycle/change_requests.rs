use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use super::{authorize, guarded, optional_text, project_scope, replay, DomainError, DomainResult};
use crate::access::{Action, Role, Subject};
use crate::models::{string_enum, ChangeRequest, ChangeRequestStatus};
use crate::notify::{NotificationEvent, Notifier};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

string_enum!(ReviewAction, "review action", {
    Approve => "approve",
    Reject => "reject",
});

#[derive(Debug, Clone)]
pub struct Review {
    pub action: ReviewAction,
    pub approved_sections: Vec<String>,
    pub notes: Option<String>,
}

/// Trims, drops duplicates, keeps first-seen order. Blank entries are rejected.
pub fn normalize_sections(sections: Vec<String>) -> DomainResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(sections.len());
    for section in sections {
        let trimmed = section.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid("sections must not be blank"));
        }
        if !normalized.iter().any(|existing| existing == trimmed) {
            normalized.push(trimmed.to_string());
        }
    }
    if normalized.is_empty() {
        return Err(DomainError::invalid("at least one section is required"));
    }
    Ok(normalized)
}

/// Moves a pending request to its terminal state.
pub fn apply_review(
    request: &mut ChangeRequest,
    review: &Review,
    reviewer: Uuid,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    if request.status.is_terminal() {
        return Err(DomainError::Conflict(format!(
            "change request is already {}",
            request.status
        )));
    }

    match review.action {
        ReviewAction::Approve => {
            if review.approved_sections.is_empty() {
                return Err(DomainError::invalid(
                    "approved_sections must list at least one section",
                ));
            }
            if let Some(unknown) = review
                .approved_sections
                .iter()
                .find(|section| !request.requested_sections.contains(section))
            {
                return Err(DomainError::invalid(format!(
                    "section `{unknown}` was not requested"
                )));
            }
            request.status = ChangeRequestStatus::Approved;
            request.approved_sections = review.approved_sections.clone();
        }
        ReviewAction::Reject => {
            request.status = ChangeRequestStatus::Rejected;
            request.approved_sections = Vec::new();
        }
    }

    request.review_notes = review.notes.clone();
    request.reviewed_by = Some(reviewer);
    request.reviewed_at = Some(now);
    Ok(())
}

pub async fn list_change_requests(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<Vec<ChangeRequest>> {
    let scope = project_scope(store, subject, project_id).await?;
    authorize(subject, Action::ViewChangeRequests, &scope)?;

    let requests = store.list_change_requests(project_id).await?;
    if subject.role == Role::Client {
        return Ok(requests
            .into_iter()
            .filter(|request| request.requested_by == subject.user_id)
            .collect());
    }
    Ok(requests)
}

pub async fn create_change_request(
    store: &dyn Store,
    notifier: &Notifier,
    subject: &Subject,
    project_id: Uuid,
    sections: Vec<String>,
    details: Option<String>,
) -> DomainResult<ChangeRequest> {
    let scope = project_scope(store, subject, project_id).await?;
    authorize(subject, Action::CreateChangeRequest, &scope)?;

    let request = ChangeRequest {
        id: Uuid::new_v4(),
        project_id,
        requested_by: subject.user_id,
        status: ChangeRequestStatus::Pending,
        requested_sections: normalize_sections(sections)?,
        approved_sections: Vec::new(),
        details: optional_text(details),
        review_notes: None,
        reviewed_by: None,
        reviewed_at: None,
        created_at: Utc::now(),
    };
    store.insert_change_request(request.clone()).await?;

    info!(%project_id, request_id = %request.id, "change request submitted");
    notifier.dispatch(NotificationEvent::ChangeRequestSubmitted {
        project_id,
        request_id: request.id,
        requested_by: subject.user_id,
        sections: request.requested_sections.clone(),
    });
    Ok(request)
}

pub async fn review_change_request(
    store: &dyn Store,
    notifier: &Notifier,
    subject: &Subject,
    project_id: Uuid,
    request_id: Uuid,
    review: Review,
) -> DomainResult<ChangeRequest> {
    let scope = project_scope(store, subject, project_id).await?;
    authorize(subject, Action::ReviewChangeRequest, &scope)?;

    let reviewer = subject.user_id;
    let now = Utc::now();
    let edit = move |request: &mut ChangeRequest| apply_review(request, &review, reviewer, now);
    let modified = store
        .modify_change_request(project_id, request_id, guarded(edit.clone()))
        .await?
        .ok_or(DomainError::NotFound("change request"))?;
    replay(&modified.before, edit)?;

    let request = modified.after;
    info!(
        %project_id,
        %request_id,
        status = %request.status,
        "change request reviewed"
    );
    notifier.dispatch(NotificationEvent::ChangeRequestReviewed {
        project_id,
        request_id,
        requested_by: request.requested_by,
        status: request.status,
        reviewed_by: reviewer,
    });
    Ok(request)
}
