//! Resource lifecycles.
//!
//! Each engine function takes the acting [`Subject`], asks the access layer
//! for a decision, then performs its store work and queues notifications once
//! the write has succeeded. Expected outcomes are [`DomainError`] variants.

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::access::{decide, Action, Decision, Role, Scope, Subject};
use crate::store::{Mutation, Store, StoreError};

pub mod accounts;
pub mod change_requests;
pub mod documents;
pub mod invitations;
pub mod projects;
pub mod work_orders;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("object storage failed: {0}")]
    Storage(anyhow::Error),
    #[error(transparent)]
    Internal(anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn invalid(message: impl Into<String>) -> Self {
        DomainError::InvalidInput(message.into())
    }
}

pub(crate) fn authorize(subject: &Subject, action: Action, scope: &Scope) -> DomainResult<()> {
    match decide(subject, action, scope) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            debug!(
                user_id = %subject.user_id,
                role = %subject.role,
                ?action,
                ?reason,
                "access denied"
            );
            Err(DomainError::Forbidden)
        }
    }
}

/// Scope for project-bound actions. Admins bypass assignments, so their
/// lookup is skipped.
pub(crate) async fn project_scope(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<Scope> {
    let assigned = match subject.role {
        Role::Admin => false,
        _ => store.is_assigned(project_id, subject.user_id).await?,
    };
    Ok(Scope::new().assigned(assigned))
}

/// Turns a fallible edit into a store mutation. An edit that fails leaves the
/// row as it was; [`replay`] on the returned `before` value reproduces the
/// error.
pub(crate) fn guarded<T, F>(edit: F) -> Mutation<T>
where
    T: Clone + Send + 'static,
    F: Fn(&mut T) -> DomainResult<()> + Send + 'static,
{
    Box::new(move |row: &mut T| {
        let mut candidate = row.clone();
        if edit(&mut candidate).is_ok() {
            *row = candidate;
        }
    })
}

pub(crate) fn replay<T, F>(before: &T, edit: F) -> DomainResult<()>
where
    T: Clone,
    F: Fn(&mut T) -> DomainResult<()>,
{
    let mut candidate = before.clone();
    edit(&mut candidate)
}

pub(crate) fn required_text(value: &str, field: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
