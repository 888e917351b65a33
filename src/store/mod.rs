//! Persistence boundary.
//!
//! Every lifecycle engine reads and writes through [`Store`]. Each method is a
//! single statement or a single transaction; absence is reported as `None` or
//! `false`, never as an error.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db;
use crate::models::{
    ChangeRequest, Document, DocumentShare, NewUser, Project, ProjectAssignment,
    ProjectInvitation, ProjectTask, ProjectUpdate, Session, UnknownVariant, User, WorkOrder,
    WorkOrderMaterial, WorkOrderSignature,
};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("duplicate {0}")]
    Conflict(&'static str),
    #[error("invalid stored value: {0}")]
    InvalidRow(String),
    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<UnknownVariant> for StoreError {
    fn from(value: UnknownVariant) -> Self {
        StoreError::InvalidRow(value.to_string())
    }
}

/// In-place edit applied inside the store's row lock.
pub type Mutation<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Row state before and after a [`Mutation`] was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Modified<T> {
    pub before: T,
    pub after: T,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // users
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;

    // sessions
    async fn insert_session(&self, session: Session) -> StoreResult<()>;
    async fn find_session(&self, id: &str) -> StoreResult<Option<Session>>;
    async fn delete_session(&self, id: &str) -> StoreResult<bool>;
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    // projects
    async fn insert_project(&self, project: Project) -> StoreResult<()>;
    async fn find_project(&self, id: Uuid) -> StoreResult<Option<Project>>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
    async fn list_projects_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Project>>;
    async fn modify_project(
        &self,
        id: Uuid,
        mutation: Mutation<Project>,
    ) -> StoreResult<Option<Modified<Project>>>;
    /// Removes the project together with everything hanging off it.
    async fn delete_project(&self, id: Uuid) -> StoreResult<bool>;

    // assignments
    /// Returns `false` when the pair already existed.
    async fn insert_assignment(&self, assignment: ProjectAssignment) -> StoreResult<bool>;
    async fn delete_assignment(&self, project_id: Uuid, user_id: Uuid) -> StoreResult<bool>;
    async fn list_assignments(&self, project_id: Uuid) -> StoreResult<Vec<ProjectAssignment>>;
    async fn is_assigned(&self, project_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    // tasks
    async fn insert_task(&self, task: ProjectTask) -> StoreResult<()>;
    async fn list_tasks(&self, project_id: Uuid) -> StoreResult<Vec<ProjectTask>>;
    async fn modify_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        mutation: Mutation<ProjectTask>,
    ) -> StoreResult<Option<Modified<ProjectTask>>>;
    async fn delete_task(&self, project_id: Uuid, task_id: Uuid) -> StoreResult<bool>;

    // progress updates
    async fn insert_project_update(&self, update: ProjectUpdate) -> StoreResult<()>;
    async fn list_project_updates(&self, project_id: Uuid) -> StoreResult<Vec<ProjectUpdate>>;

    // invitations
    async fn insert_invitation(&self, invitation: ProjectInvitation) -> StoreResult<()>;
    async fn list_invitations(&self, project_id: Uuid) -> StoreResult<Vec<ProjectInvitation>>;
    async fn find_invitation_by_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<ProjectInvitation>>;
    /// Stamps acceptance only if the invitation has not been accepted yet.
    async fn accept_invitation(
        &self,
        id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    // change requests
    async fn insert_change_request(&self, request: ChangeRequest) -> StoreResult<()>;
    async fn find_change_request(
        &self,
        project_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<ChangeRequest>>;
    async fn list_change_requests(&self, project_id: Uuid) -> StoreResult<Vec<ChangeRequest>>;
    async fn modify_change_request(
        &self,
        project_id: Uuid,
        id: Uuid,
        mutation: Mutation<ChangeRequest>,
    ) -> StoreResult<Option<Modified<ChangeRequest>>>;

    // work orders
    async fn next_work_order_sequence(&self) -> StoreResult<i64>;
    async fn insert_work_order(&self, order: WorkOrder) -> StoreResult<()>;
    async fn find_work_order(&self, id: Uuid) -> StoreResult<Option<WorkOrder>>;
    /// All orders, or only those assigned to `assignee`.
    async fn list_work_orders(&self, assignee: Option<Uuid>) -> StoreResult<Vec<WorkOrder>>;
    async fn modify_work_order(
        &self,
        id: Uuid,
        mutation: Mutation<WorkOrder>,
    ) -> StoreResult<Option<Modified<WorkOrder>>>;
    async fn delete_work_order(&self, id: Uuid) -> StoreResult<bool>;

    async fn insert_material(&self, material: WorkOrderMaterial) -> StoreResult<()>;
    async fn list_materials(&self, work_order_id: Uuid) -> StoreResult<Vec<WorkOrderMaterial>>;
    async fn delete_material(&self, work_order_id: Uuid, id: Uuid) -> StoreResult<bool>;

    async fn insert_signature(&self, signature: WorkOrderSignature) -> StoreResult<()>;
    async fn list_signatures(&self, work_order_id: Uuid) -> StoreResult<Vec<WorkOrderSignature>>;

    // documents
    async fn insert_document(&self, document: Document) -> StoreResult<()>;
    async fn find_document(&self, id: Uuid) -> StoreResult<Option<Document>>;
    async fn list_documents(&self) -> StoreResult<Vec<Document>>;
    /// Documents with a share for `client_id`, expired shares included.
    async fn list_shared_documents(
        &self,
        client_id: Uuid,
    ) -> StoreResult<Vec<(Document, DocumentShare)>>;
    async fn delete_document(&self, id: Uuid) -> StoreResult<bool>;

    /// Creates the share or updates permissions of the existing one. First-touch
    /// timestamps of an existing share are kept.
    async fn upsert_share(&self, share: DocumentShare) -> StoreResult<DocumentShare>;
    async fn find_share(
        &self,
        document_id: Uuid,
        client_id: Uuid,
    ) -> StoreResult<Option<DocumentShare>>;
    async fn list_shares(&self, document_id: Uuid) -> StoreResult<Vec<DocumentShare>>;
    async fn delete_share(&self, document_id: Uuid, client_id: Uuid) -> StoreResult<bool>;
    /// Sets `viewed_at` if it is still unset and returns the share.
    async fn stamp_share_viewed(
        &self,
        document_id: Uuid,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DocumentShare>>;
    /// Sets `downloaded_at` if it is still unset and returns the share.
    async fn stamp_share_downloaded(
        &self,
        document_id: Uuid,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DocumentShare>>;
}

/// Opens the store selected by `DATABASE_URL`, applying pending migrations
/// when it is Postgres.
pub async fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    if config.uses_memory_store() {
        warn!("using the in-memory store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let migration_pool = pool.clone();
    let applied = tokio::task::spawn_blocking(move || db::run_migrations(&migration_pool))
        .await
        .context("migration task panicked")??;
    info!(applied, "database migrations up to date");
    Ok(Arc::new(PgStore::new(pool)))
}
