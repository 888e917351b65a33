use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use super::{authorize, project_scope, DomainError, DomainResult};
use crate::access::{Action, Scope, Subject};
use crate::auth::session::{generate_token, hash_token};
use crate::models::{ProjectAssignment, ProjectInvitation, User};
use crate::notify::{NotificationEvent, Notifier};
use crate::store::Store;

fn normalize_email(email: &str) -> DomainResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(DomainError::invalid("a valid email address is required")),
    }
}

pub async fn list_invitations(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<Vec<ProjectInvitation>> {
    let scope = project_scope(store, subject, project_id).await?;
    authorize(subject, Action::InviteToProject, &scope)?;
    Ok(store.list_invitations(project_id).await?)
}

/// Records an invitation and queues the token for delivery. Only the token's
/// hash is stored.
pub async fn invite(
    store: &dyn Store,
    notifier: &Notifier,
    subject: &Subject,
    project_id: Uuid,
    email: &str,
    ttl: Duration,
) -> DomainResult<ProjectInvitation> {
    let scope = project_scope(store, subject, project_id).await?;
    authorize(subject, Action::InviteToProject, &scope)?;
    let email = normalize_email(email)?;
    if store.find_project(project_id).await?.is_none() {
        return Err(DomainError::NotFound("project"));
    }

    let token = generate_token();
    let now = Utc::now();
    let invitation = ProjectInvitation {
        id: Uuid::new_v4(),
        project_id,
        email,
        invited_by: subject.user_id,
        token_hash: hash_token(&token),
        expires_at: now + ttl,
        accepted_at: None,
        accepted_by: None,
        created_at: now,
    };
    store.insert_invitation(invitation.clone()).await?;

    info!(%project_id, invitation_id = %invitation.id, "project invitation created");
    notifier.dispatch(NotificationEvent::ProjectInvitation {
        project_id,
        invitation_id: invitation.id,
        email: invitation.email.clone(),
        token,
        expires_at: invitation.expires_at,
    });
    Ok(invitation)
}

pub async fn accept(
    store: &dyn Store,
    user: &User,
    token: &str,
    now: DateTime<Utc>,
) -> DomainResult<ProjectAssignment> {
    let subject = Subject {
        user_id: user.id,
        role: user.role,
    };
    authorize(&subject, Action::AcceptInvitation, &Scope::new())?;

    let invitation = store
        .find_invitation_by_token(&hash_token(token.trim()))
        .await?
        .ok_or(DomainError::NotFound("invitation"))?;
    if invitation.accepted_at.is_some() {
        return Err(DomainError::Conflict(
            "invitation has already been accepted".to_string(),
        ));
    }
    if now >= invitation.expires_at {
        return Err(DomainError::invalid("invitation has expired"));
    }
    if invitation.email != user.email.to_lowercase() {
        return Err(DomainError::Forbidden);
    }

    if !store.accept_invitation(invitation.id, user.id, now).await? {
        return Err(DomainError::Conflict(
            "invitation has already been accepted".to_string(),
        ));
    }

    let assignment = ProjectAssignment {
        project_id: invitation.project_id,
        user_id: user.id,
        assigned_by: invitation.invited_by,
        created_at: now,
    };
    // An existing assignment is fine; the invitation is still consumed.
    store.insert_assignment(assignment.clone()).await?;

    info!(
        project_id = %invitation.project_id,
        user_id = %user.id,
        "invitation accepted"
    );
    Ok(assignment)
}
