//! Role and assignment based access decisions.
//!
//! Every resource operation asks [`decide`] before touching the store. The
//! decision combines one grant rule (what the role may do, and under which
//! condition) with a set of deny rules. Any deny wins; when nothing allows the
//! action it is denied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Employee,
    Worker,
    Client,
}

string_enum!(Role, "role", {
    Admin => "admin",
    Employee => "employee",
    Worker => "worker",
    Client => "client",
});

impl Role {
    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Client)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ViewProject,
    UpdateProject,
    CreateProject,
    DeleteProject,
    ManageAssignments,
    InviteToProject,
    AcceptInvitation,
    ViewChangeRequests,
    CreateChangeRequest,
    ReviewChangeRequest,
    ListWorkOrders,
    ViewWorkOrder,
    CreateWorkOrder,
    UpdateWorkOrder,
    DeleteWorkOrder,
    ViewSignatures,
    AddSignature,
    UploadDocument,
    ViewDocument,
    DeleteDocument,
    ShareDocument,
    RevokeShare,
    ViewSharedDocument,
    DownloadSharedDocument,
    ListUsers,
    ProvisionUser,
}

impl Action {
    fn touches_work_orders(&self) -> bool {
        matches!(
            self,
            Action::ListWorkOrders
                | Action::ViewWorkOrder
                | Action::CreateWorkOrder
                | Action::UpdateWorkOrder
                | Action::DeleteWorkOrder
                | Action::ViewSignatures
                | Action::AddSignature
        )
    }

    fn reads_shared_document(&self) -> bool {
        matches!(
            self,
            Action::ViewSharedDocument | Action::DownloadSharedDocument
        )
    }
}

/// Who is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub user_id: Uuid,
    pub role: Role,
}

/// The client's grant on one document, as seen at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareGrant {
    pub can_download: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Facts about the target resource that conditional grants depend on.
///
/// Absent rows simply leave the relevant field unset, so a predicate over a
/// resource that does not exist evaluates the same way as one the subject has
/// no relationship with.
#[derive(Debug, Clone, Copy)]
pub struct Scope {
    pub project_assigned: bool,
    pub assignee: Option<Uuid>,
    pub owner: Option<Uuid>,
    pub share: Option<ShareGrant>,
    pub now: DateTime<Utc>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            project_assigned: false,
            assignee: None,
            owner: None,
            share: None,
            now: Utc::now(),
        }
    }

    pub fn assigned(mut self, assigned: bool) -> Self {
        self.project_assigned = assigned;
        self
    }

    pub fn assignee(mut self, assignee: Option<Uuid>) -> Self {
        self.assignee = assignee;
        self
    }

    pub fn owner(mut self, owner: Uuid) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn share(mut self, share: Option<ShareGrant>) -> Self {
        self.share = share;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    RoleNotPermitted,
    NotAssigned,
    NotAssignee,
    NotOwner,
    NoActiveShare,
    ShareExpired,
    DownloadNotPermitted,
    TrustBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Always,
    IfAssigned,
    IfAssignee,
    IfOwner,
    IfActiveShare,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Allow,
    Deny(DenyReason),
    Abstain,
}

fn grant(role: Role, action: Action) -> Grant {
    use Action::*;
    use Grant::*;

    match (role, action) {
        (Role::Admin, CreateChangeRequest | AcceptInvitation) => Never,
        (Role::Admin, ViewSharedDocument | DownloadSharedDocument) => Never,
        (Role::Admin, _) => Always,

        (Role::Employee | Role::Worker, ViewProject | UpdateProject | ViewChangeRequests) => {
            IfAssigned
        }
        (Role::Employee, InviteToProject) => IfAssigned,
        (Role::Employee | Role::Worker, ListWorkOrders) => Always,
        (
            Role::Employee | Role::Worker,
            ViewWorkOrder | CreateWorkOrder | UpdateWorkOrder | ViewSignatures | AddSignature,
        ) => IfAssignee,
        (Role::Employee, UploadDocument) => Always,
        (Role::Employee, DeleteDocument) => IfOwner,
        (Role::Employee | Role::Worker, ViewDocument | ShareDocument | RevokeShare) => Always,
        (Role::Employee | Role::Worker, _) => Never,

        (Role::Client, ViewProject | ViewChangeRequests | CreateChangeRequest) => IfAssigned,
        (Role::Client, AcceptInvitation) => Always,
        (Role::Client, ViewSharedDocument | DownloadSharedDocument) => IfActiveShare,
        (Role::Client, _) => Never,
    }
}

fn evaluate_grant(subject: &Subject, action: Action, scope: &Scope) -> Verdict {
    match grant(subject.role, action) {
        Grant::Always => Verdict::Allow,
        Grant::Never => Verdict::Deny(DenyReason::RoleNotPermitted),
        Grant::IfAssigned if scope.project_assigned => Verdict::Allow,
        Grant::IfAssigned => Verdict::Deny(DenyReason::NotAssigned),
        Grant::IfAssignee if scope.assignee == Some(subject.user_id) => Verdict::Allow,
        Grant::IfAssignee => Verdict::Deny(DenyReason::NotAssignee),
        Grant::IfOwner if scope.owner == Some(subject.user_id) => Verdict::Allow,
        Grant::IfOwner => Verdict::Deny(DenyReason::NotOwner),
        Grant::IfActiveShare if scope.share.is_some() => Verdict::Allow,
        Grant::IfActiveShare => Verdict::Deny(DenyReason::NoActiveShare),
    }
}

/// Clients never reach work orders or signatures, whatever else applies.
fn trust_boundary(subject: &Subject, action: Action, _scope: &Scope) -> Verdict {
    if subject.role == Role::Client && action.touches_work_orders() {
        Verdict::Deny(DenyReason::TrustBoundary)
    } else {
        Verdict::Abstain
    }
}

fn share_expiry(_subject: &Subject, action: Action, scope: &Scope) -> Verdict {
    match scope.share {
        Some(ShareGrant {
            expires_at: Some(expires_at),
            ..
        }) if action.reads_shared_document() && scope.now >= expires_at => {
            Verdict::Deny(DenyReason::ShareExpired)
        }
        _ => Verdict::Abstain,
    }
}

fn download_flag(_subject: &Subject, action: Action, scope: &Scope) -> Verdict {
    match (action, scope.share) {
        (Action::DownloadSharedDocument, Some(share)) if !share.can_download => {
            Verdict::Deny(DenyReason::DownloadNotPermitted)
        }
        _ => Verdict::Abstain,
    }
}

type Rule = fn(&Subject, Action, &Scope) -> Verdict;

const DENY_RULES: &[Rule] = &[trust_boundary, share_expiry, download_flag];

/// Decides whether `subject` may perform `action` on the resource described by `scope`.
pub fn decide(subject: &Subject, action: Action, scope: &Scope) -> Decision {
    let verdicts = std::iter::once(evaluate_grant(subject, action, scope))
        .chain(DENY_RULES.iter().map(|rule| rule(subject, action, scope)));

    let mut allowed = false;
    for verdict in verdicts {
        match verdict {
            Verdict::Deny(reason) => return Decision::Deny(reason),
            Verdict::Allow => allowed = true,
            Verdict::Abstain => {}
        }
    }

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::RoleNotPermitted)
    }
}
