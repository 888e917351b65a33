use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::{
    pg::PgConnection,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    sql_types::BigInt,
};
use uuid::Uuid;

use super::{Modified, Mutation, Store, StoreError, StoreResult};
use crate::db::PgPool;
use crate::models::{
    ChangeRequest, Document, DocumentShare, NewUser, Project, ProjectAssignment,
    ProjectInvitation, ProjectTask, ProjectUpdate, Session, User, WorkOrder, WorkOrderMaterial,
    WorkOrderSignature,
};
use crate::schema::{
    change_requests, document_shares, documents, project_assignments, project_invitations,
    project_tasks, project_updates, projects, sessions, users, work_order_materials,
    work_order_signatures, work_orders,
};

/// PostgreSQL store. Diesel is blocking, so every operation runs on the
/// blocking thread pool with its own pooled connection.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Pool(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

fn conflict_on_unique(err: DieselError, what: &'static str) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StoreError::Conflict(what)
        }
        other => StoreError::Database(other),
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[derive(QueryableByName)]
struct SequenceValue {
    #[diesel(sql_type = BigInt)]
    value: i64,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> StoreResult<Self> {
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            role: row.role.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SessionRow {
    id: String,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = projects)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct ProjectRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    address: Option<String>,
    status: String,
    on_hold_reason: Option<String>,
    expected_resume_date: Option<NaiveDate>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = StoreError;

    fn try_from(row: ProjectRow) -> StoreResult<Self> {
        Ok(Project {
            id: row.id,
            name: row.name,
            description: row.description,
            address: row.address,
            status: row.status.parse()?,
            on_hold_reason: row.on_hold_reason,
            expected_resume_date: row.expected_resume_date,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Project> for ProjectRow {
    fn from(project: &Project) -> Self {
        ProjectRow {
            id: project.id,
            name: project.name.clone(),
            description: project.description.clone(),
            address: project.address.clone(),
            status: project.status.as_str().to_string(),
            on_hold_reason: project.on_hold_reason.clone(),
            expected_resume_date: project.expected_resume_date,
            created_by: project.created_by,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = project_assignments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct AssignmentRow {
    project_id: Uuid,
    user_id: Uuid,
    assigned_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<AssignmentRow> for ProjectAssignment {
    fn from(row: AssignmentRow) -> Self {
        ProjectAssignment {
            project_id: row.project_id,
            user_id: row.user_id,
            assigned_by: row.assigned_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = project_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct TaskRow {
    id: Uuid,
    project_id: Uuid,
    title: String,
    description: Option<String>,
    status: String,
    assigned_to: Option<Uuid>,
    due_date: Option<NaiveDate>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for ProjectTask {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> StoreResult<Self> {
        Ok(ProjectTask {
            id: row.id,
            project_id: row.project_id,
            title: row.title,
            description: row.description,
            status: row.status.parse()?,
            assigned_to: row.assigned_to,
            due_date: row.due_date,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&ProjectTask> for TaskRow {
    fn from(task: &ProjectTask) -> Self {
        TaskRow {
            id: task.id,
            project_id: task.project_id,
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status.as_str().to_string(),
            assigned_to: task.assigned_to,
            due_date: task.due_date,
            created_by: task.created_by,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = project_updates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct UpdateRow {
    id: Uuid,
    project_id: Uuid,
    author_id: Uuid,
    message: String,
    created_at: DateTime<Utc>,
}

impl From<UpdateRow> for ProjectUpdate {
    fn from(row: UpdateRow) -> Self {
        ProjectUpdate {
            id: row.id,
            project_id: row.project_id,
            author_id: row.author_id,
            message: row.message,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = project_invitations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct InvitationRow {
    id: Uuid,
    project_id: Uuid,
    email: String,
    invited_by: Uuid,
    token_hash: String,
    expires_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    accepted_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<InvitationRow> for ProjectInvitation {
    fn from(row: InvitationRow) -> Self {
        ProjectInvitation {
            id: row.id,
            project_id: row.project_id,
            email: row.email,
            invited_by: row.invited_by,
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            accepted_at: row.accepted_at,
            accepted_by: row.accepted_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = change_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct ChangeRequestRow {
    id: Uuid,
    project_id: Uuid,
    requested_by: Uuid,
    status: String,
    requested_sections: Vec<String>,
    approved_sections: Vec<String>,
    details: Option<String>,
    review_notes: Option<String>,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChangeRequestRow> for ChangeRequest {
    type Error = StoreError;

    fn try_from(row: ChangeRequestRow) -> StoreResult<Self> {
        Ok(ChangeRequest {
            id: row.id,
            project_id: row.project_id,
            requested_by: row.requested_by,
            status: row.status.parse()?,
            requested_sections: row.requested_sections,
            approved_sections: row.approved_sections,
            details: row.details,
            review_notes: row.review_notes,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            created_at: row.created_at,
        })
    }
}

impl From<&ChangeRequest> for ChangeRequestRow {
    fn from(request: &ChangeRequest) -> Self {
        ChangeRequestRow {
            id: request.id,
            project_id: request.project_id,
            requested_by: request.requested_by,
            status: request.status.as_str().to_string(),
            requested_sections: request.requested_sections.clone(),
            approved_sections: request.approved_sections.clone(),
            details: request.details.clone(),
            review_notes: request.review_notes.clone(),
            reviewed_by: request.reviewed_by,
            reviewed_at: request.reviewed_at,
            created_at: request.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = work_orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct WorkOrderRow {
    id: Uuid,
    work_order_number: String,
    title: String,
    description: Option<String>,
    site_address: Option<String>,
    assigned_to: Option<Uuid>,
    work_completed: String,
    scheduled_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkOrderRow> for WorkOrder {
    type Error = StoreError;

    fn try_from(row: WorkOrderRow) -> StoreResult<Self> {
        Ok(WorkOrder {
            id: row.id,
            work_order_number: row.work_order_number,
            title: row.title,
            description: row.description,
            site_address: row.site_address,
            assigned_to: row.assigned_to,
            work_completed: row.work_completed.parse()?,
            scheduled_at: row.scheduled_at,
            completed_at: row.completed_at,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&WorkOrder> for WorkOrderRow {
    fn from(order: &WorkOrder) -> Self {
        WorkOrderRow {
            id: order.id,
            work_order_number: order.work_order_number.clone(),
            title: order.title.clone(),
            description: order.description.clone(),
            site_address: order.site_address.clone(),
            assigned_to: order.assigned_to,
            work_completed: order.work_completed.as_str().to_string(),
            scheduled_at: order.scheduled_at,
            completed_at: order.completed_at,
            created_by: order.created_by,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = work_order_materials)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct MaterialRow {
    id: Uuid,
    work_order_id: Uuid,
    name: String,
    quantity: f64,
    unit: Option<String>,
    added_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<MaterialRow> for WorkOrderMaterial {
    fn from(row: MaterialRow) -> Self {
        WorkOrderMaterial {
            id: row.id,
            work_order_id: row.work_order_id,
            name: row.name,
            quantity: row.quantity,
            unit: row.unit,
            added_by: row.added_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = work_order_signatures)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SignatureRow {
    id: Uuid,
    work_order_id: Uuid,
    signer_type: String,
    signer_name: String,
    signature: String,
    ip_address: Option<String>,
    signed_at: DateTime<Utc>,
}

impl TryFrom<SignatureRow> for WorkOrderSignature {
    type Error = StoreError;

    fn try_from(row: SignatureRow) -> StoreResult<Self> {
        Ok(WorkOrderSignature {
            id: row.id,
            work_order_id: row.work_order_id,
            signer_type: row.signer_type.parse()?,
            signer_name: row.signer_name,
            signature: row.signature,
            ip_address: row.ip_address,
            signed_at: row.signed_at,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = documents)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct DocumentRow {
    id: Uuid,
    filename: String,
    display_name: String,
    file_type: String,
    storage_key: String,
    size_bytes: i64,
    uploaded_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            filename: row.filename,
            display_name: row.display_name,
            file_type: row.file_type,
            storage_key: row.storage_key,
            size_bytes: row.size_bytes,
            uploaded_by: row.uploaded_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = document_shares)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ShareRow {
    document_id: Uuid,
    client_id: Uuid,
    can_download: bool,
    expires_at: Option<DateTime<Utc>>,
    shared_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    viewed_at: Option<DateTime<Utc>>,
    downloaded_at: Option<DateTime<Utc>>,
}

impl From<ShareRow> for DocumentShare {
    fn from(row: ShareRow) -> Self {
        DocumentShare {
            document_id: row.document_id,
            client_id: row.client_id,
            can_download: row.can_download,
            expires_at: row.expires_at,
            shared_by: row.shared_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            viewed_at: row.viewed_at,
            downloaded_at: row.downloaded_at,
        }
    }
}

fn load_share(
    conn: &mut PgConnection,
    document_id: Uuid,
    client_id: Uuid,
) -> StoreResult<Option<DocumentShare>> {
    let row = document_shares::table
        .find((document_id, client_id))
        .select(ShareRow::as_select())
        .first(conn)
        .optional()?;
    Ok(row.map(DocumentShare::from))
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        self.run(move |conn| {
            let row = UserRow {
                id: Uuid::new_v4(),
                email: user.email,
                password_hash: user.password_hash,
                first_name: user.first_name,
                last_name: user.last_name,
                role: user.role.as_str().to_string(),
                created_at: Utc::now(),
            };
            diesel::insert_into(users::table)
                .values(&row)
                .execute(conn)
                .map_err(|err| conflict_on_unique(err, "email"))?;
            User::try_from(row)
        })
        .await
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.run(move |conn| {
            users::table
                .find(id)
                .select(UserRow::as_select())
                .first(conn)
                .optional()?
                .map(User::try_from)
                .transpose()
        })
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_string();
        self.run(move |conn| {
            users::table
                .filter(users::email.eq(&email))
                .select(UserRow::as_select())
                .first(conn)
                .optional()?
                .map(User::try_from)
                .transpose()
        })
        .await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.run(|conn| {
            let rows = users::table
                .order(users::email.asc())
                .select(UserRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        self.run(move |conn| {
            let row = SessionRow {
                id: session.id,
                user_id: session.user_id,
                expires_at: session.expires_at,
                created_at: session.created_at,
            };
            diesel::insert_into(sessions::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn find_session(&self, id: &str) -> StoreResult<Option<Session>> {
        let id = id.to_string();
        self.run(move |conn| {
            let row = sessions::table
                .find(&id)
                .select(SessionRow::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(Session::from))
        })
        .await
    }

    async fn delete_session(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        self.run(move |conn| {
            let deleted = diesel::delete(sessions::table.find(&id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        self.run(move |conn| {
            let deleted =
                diesel::delete(sessions::table.filter(sessions::expires_at.le(now))).execute(conn)?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn insert_project(&self, project: Project) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(projects::table)
                .values(&ProjectRow::from(&project))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn find_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        self.run(move |conn| {
            projects::table
                .find(id)
                .select(ProjectRow::as_select())
                .first(conn)
                .optional()?
                .map(Project::try_from)
                .transpose()
        })
        .await
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.run(|conn| {
            let rows = projects::table
                .order(projects::created_at.asc())
                .select(ProjectRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn list_projects_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Project>> {
        self.run(move |conn| {
            let rows = projects::table
                .inner_join(project_assignments::table)
                .filter(project_assignments::user_id.eq(user_id))
                .order(projects::created_at.asc())
                .select(ProjectRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn modify_project(
        &self,
        id: Uuid,
        mutation: Mutation<Project>,
    ) -> StoreResult<Option<Modified<Project>>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let row = projects::table
                    .find(id)
                    .select(ProjectRow::as_select())
                    .for_update()
                    .first(conn)
                    .optional()?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let before = Project::try_from(row)?;
                let mut after = before.clone();
                mutation(&mut after);
                diesel::update(projects::table.find(id))
                    .set(&ProjectRow::from(&after))
                    .execute(conn)?;
                Ok(Some(Modified { before, after }))
            })
        })
        .await
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(projects::table.find(id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn insert_assignment(&self, assignment: ProjectAssignment) -> StoreResult<bool> {
        self.run(move |conn| {
            let row = AssignmentRow {
                project_id: assignment.project_id,
                user_id: assignment.user_id,
                assigned_by: assignment.assigned_by,
                created_at: assignment.created_at,
            };
            let inserted = diesel::insert_into(project_assignments::table)
                .values(&row)
                .on_conflict((project_assignments::project_id, project_assignments::user_id))
                .do_nothing()
                .execute(conn)?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn delete_assignment(&self, project_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted =
                diesel::delete(project_assignments::table.find((project_id, user_id)))
                    .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_assignments(&self, project_id: Uuid) -> StoreResult<Vec<ProjectAssignment>> {
        self.run(move |conn| {
            let rows = project_assignments::table
                .filter(project_assignments::project_id.eq(project_id))
                .order(project_assignments::created_at.asc())
                .select(AssignmentRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(ProjectAssignment::from).collect())
        })
        .await
    }

    async fn is_assigned(&self, project_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let assigned = diesel::select(diesel::dsl::exists(
                project_assignments::table.find((project_id, user_id)),
            ))
            .get_result(conn)?;
            Ok(assigned)
        })
        .await
    }

    async fn insert_task(&self, task: ProjectTask) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(project_tasks::table)
                .values(&TaskRow::from(&task))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn list_tasks(&self, project_id: Uuid) -> StoreResult<Vec<ProjectTask>> {
        self.run(move |conn| {
            let rows = project_tasks::table
                .filter(project_tasks::project_id.eq(project_id))
                .order(project_tasks::created_at.asc())
                .select(TaskRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn modify_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        mutation: Mutation<ProjectTask>,
    ) -> StoreResult<Option<Modified<ProjectTask>>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let row = project_tasks::table
                    .find(task_id)
                    .filter(project_tasks::project_id.eq(project_id))
                    .select(TaskRow::as_select())
                    .for_update()
                    .first(conn)
                    .optional()?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let before = ProjectTask::try_from(row)?;
                let mut after = before.clone();
                mutation(&mut after);
                diesel::update(project_tasks::table.find(task_id))
                    .set(&TaskRow::from(&after))
                    .execute(conn)?;
                Ok(Some(Modified { before, after }))
            })
        })
        .await
    }

    async fn delete_task(&self, project_id: Uuid, task_id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(
                project_tasks::table
                    .find(task_id)
                    .filter(project_tasks::project_id.eq(project_id)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn insert_project_update(&self, update: ProjectUpdate) -> StoreResult<()> {
        self.run(move |conn| {
            let row = UpdateRow {
                id: update.id,
                project_id: update.project_id,
                author_id: update.author_id,
                message: update.message,
                created_at: update.created_at,
            };
            diesel::insert_into(project_updates::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn list_project_updates(&self, project_id: Uuid) -> StoreResult<Vec<ProjectUpdate>> {
        self.run(move |conn| {
            let rows = project_updates::table
                .filter(project_updates::project_id.eq(project_id))
                .order(project_updates::created_at.desc())
                .select(UpdateRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(ProjectUpdate::from).collect())
        })
        .await
    }

    async fn insert_invitation(&self, invitation: ProjectInvitation) -> StoreResult<()> {
        self.run(move |conn| {
            let row = InvitationRow {
                id: invitation.id,
                project_id: invitation.project_id,
                email: invitation.email,
                invited_by: invitation.invited_by,
                token_hash: invitation.token_hash,
                expires_at: invitation.expires_at,
                accepted_at: invitation.accepted_at,
                accepted_by: invitation.accepted_by,
                created_at: invitation.created_at,
            };
            diesel::insert_into(project_invitations::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn list_invitations(&self, project_id: Uuid) -> StoreResult<Vec<ProjectInvitation>> {
        self.run(move |conn| {
            let rows = project_invitations::table
                .filter(project_invitations::project_id.eq(project_id))
                .order(project_invitations::created_at.asc())
                .select(InvitationRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(ProjectInvitation::from).collect())
        })
        .await
    }

    async fn find_invitation_by_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<ProjectInvitation>> {
        let token_hash = token_hash.to_string();
        self.run(move |conn| {
            let row = project_invitations::table
                .filter(project_invitations::token_hash.eq(&token_hash))
                .select(InvitationRow::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(ProjectInvitation::from))
        })
        .await
    }

    async fn accept_invitation(
        &self,
        id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.run(move |conn| {
            let updated = diesel::update(
                project_invitations::table
                    .find(id)
                    .filter(project_invitations::accepted_at.is_null()),
            )
            .set((
                project_invitations::accepted_at.eq(Some(now)),
                project_invitations::accepted_by.eq(Some(user_id)),
            ))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    async fn insert_change_request(&self, request: ChangeRequest) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(change_requests::table)
                .values(&ChangeRequestRow::from(&request))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn find_change_request(
        &self,
        project_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<ChangeRequest>> {
        self.run(move |conn| {
            change_requests::table
                .find(id)
                .filter(change_requests::project_id.eq(project_id))
                .select(ChangeRequestRow::as_select())
                .first(conn)
                .optional()?
                .map(ChangeRequest::try_from)
                .transpose()
        })
        .await
    }

    async fn list_change_requests(&self, project_id: Uuid) -> StoreResult<Vec<ChangeRequest>> {
        self.run(move |conn| {
            let rows = change_requests::table
                .filter(change_requests::project_id.eq(project_id))
                .order(change_requests::created_at.asc())
                .select(ChangeRequestRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn modify_change_request(
        &self,
        project_id: Uuid,
        id: Uuid,
        mutation: Mutation<ChangeRequest>,
    ) -> StoreResult<Option<Modified<ChangeRequest>>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let row = change_requests::table
                    .find(id)
                    .filter(change_requests::project_id.eq(project_id))
                    .select(ChangeRequestRow::as_select())
                    .for_update()
                    .first(conn)
                    .optional()?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let before = ChangeRequest::try_from(row)?;
                let mut after = before.clone();
                mutation(&mut after);
                diesel::update(change_requests::table.find(id))
                    .set(&ChangeRequestRow::from(&after))
                    .execute(conn)?;
                Ok(Some(Modified { before, after }))
            })
        })
        .await
    }

    async fn next_work_order_sequence(&self) -> StoreResult<i64> {
        self.run(|conn| {
            let next = diesel::sql_query("SELECT nextval('work_order_number_seq') AS value")
                .get_result::<SequenceValue>(conn)?;
            Ok(next.value)
        })
        .await
    }

    async fn insert_work_order(&self, order: WorkOrder) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(work_orders::table)
                .values(&WorkOrderRow::from(&order))
                .execute(conn)
                .map_err(|err| conflict_on_unique(err, "work order number"))?;
            Ok(())
        })
        .await
    }

    async fn find_work_order(&self, id: Uuid) -> StoreResult<Option<WorkOrder>> {
        self.run(move |conn| {
            work_orders::table
                .find(id)
                .select(WorkOrderRow::as_select())
                .first(conn)
                .optional()?
                .map(WorkOrder::try_from)
                .transpose()
        })
        .await
    }

    async fn list_work_orders(&self, assignee: Option<Uuid>) -> StoreResult<Vec<WorkOrder>> {
        self.run(move |conn| {
            let mut query = work_orders::table
                .select(WorkOrderRow::as_select())
                .order(work_orders::work_order_number.asc())
                .into_boxed();
            if let Some(assignee) = assignee {
                query = query.filter(work_orders::assigned_to.eq(assignee));
            }
            let rows = query.load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn modify_work_order(
        &self,
        id: Uuid,
        mutation: Mutation<WorkOrder>,
    ) -> StoreResult<Option<Modified<WorkOrder>>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let row = work_orders::table
                    .find(id)
                    .select(WorkOrderRow::as_select())
                    .for_update()
                    .first(conn)
                    .optional()?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let before = WorkOrder::try_from(row)?;
                let mut after = before.clone();
                mutation(&mut after);
                diesel::update(work_orders::table.find(id))
                    .set(&WorkOrderRow::from(&after))
                    .execute(conn)?;
                Ok(Some(Modified { before, after }))
            })
        })
        .await
    }

    async fn delete_work_order(&self, id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(work_orders::table.find(id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn insert_material(&self, material: WorkOrderMaterial) -> StoreResult<()> {
        self.run(move |conn| {
            let row = MaterialRow {
                id: material.id,
                work_order_id: material.work_order_id,
                name: material.name,
                quantity: material.quantity,
                unit: material.unit,
                added_by: material.added_by,
                created_at: material.created_at,
            };
            diesel::insert_into(work_order_materials::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn list_materials(&self, work_order_id: Uuid) -> StoreResult<Vec<WorkOrderMaterial>> {
        self.run(move |conn| {
            let rows = work_order_materials::table
                .filter(work_order_materials::work_order_id.eq(work_order_id))
                .order(work_order_materials::created_at.asc())
                .select(MaterialRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(WorkOrderMaterial::from).collect())
        })
        .await
    }

    async fn delete_material(&self, work_order_id: Uuid, id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(
                work_order_materials::table
                    .find(id)
                    .filter(work_order_materials::work_order_id.eq(work_order_id)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn insert_signature(&self, signature: WorkOrderSignature) -> StoreResult<()> {
        self.run(move |conn| {
            let row = SignatureRow {
                id: signature.id,
                work_order_id: signature.work_order_id,
                signer_type: signature.signer_type.as_str().to_string(),
                signer_name: signature.signer_name,
                signature: signature.signature,
                ip_address: signature.ip_address,
                signed_at: signature.signed_at,
            };
            diesel::insert_into(work_order_signatures::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn list_signatures(&self, work_order_id: Uuid) -> StoreResult<Vec<WorkOrderSignature>> {
        self.run(move |conn| {
            let rows = work_order_signatures::table
                .filter(work_order_signatures::work_order_id.eq(work_order_id))
                .order(work_order_signatures::signed_at.asc())
                .select(SignatureRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn insert_document(&self, document: Document) -> StoreResult<()> {
        self.run(move |conn| {
            let row = DocumentRow {
                id: document.id,
                filename: document.filename,
                display_name: document.display_name,
                file_type: document.file_type,
                storage_key: document.storage_key,
                size_bytes: document.size_bytes,
                uploaded_by: document.uploaded_by,
                created_at: document.created_at,
            };
            diesel::insert_into(documents::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn find_document(&self, id: Uuid) -> StoreResult<Option<Document>> {
        self.run(move |conn| {
            let row = documents::table
                .find(id)
                .select(DocumentRow::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(Document::from))
        })
        .await
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        self.run(|conn| {
            let rows = documents::table
                .order(documents::created_at.desc())
                .select(DocumentRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(Document::from).collect())
        })
        .await
    }

    async fn list_shared_documents(
        &self,
        client_id: Uuid,
    ) -> StoreResult<Vec<(Document, DocumentShare)>> {
        self.run(move |conn| {
            let rows = documents::table
                .inner_join(document_shares::table)
                .filter(document_shares::client_id.eq(client_id))
                .order(documents::created_at.desc())
                .select((DocumentRow::as_select(), ShareRow::as_select()))
                .load::<(DocumentRow, ShareRow)>(conn)?;
            Ok(rows
                .into_iter()
                .map(|(doc, share)| (Document::from(doc), DocumentShare::from(share)))
                .collect())
        })
        .await
    }

    async fn delete_document(&self, id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(documents::table.find(id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn upsert_share(&self, share: DocumentShare) -> StoreResult<DocumentShare> {
        self.run(move |conn| {
            let row = ShareRow {
                document_id: share.document_id,
                client_id: share.client_id,
                can_download: share.can_download,
                expires_at: share.expires_at,
                shared_by: share.shared_by,
                created_at: share.created_at,
                updated_at: share.updated_at,
                viewed_at: None,
                downloaded_at: None,
            };
            conn.transaction(|conn| {
                diesel::insert_into(document_shares::table)
                    .values(&row)
                    .on_conflict((document_shares::document_id, document_shares::client_id))
                    .do_update()
                    .set((
                        document_shares::can_download.eq(row.can_download),
                        document_shares::expires_at.eq(row.expires_at),
                        document_shares::shared_by.eq(row.shared_by),
                        document_shares::updated_at.eq(row.updated_at),
                    ))
                    .execute(conn)?;
                load_share(conn, row.document_id, row.client_id)?
                    .ok_or(StoreError::Database(DieselError::NotFound))
            })
        })
        .await
    }

    async fn find_share(
        &self,
        document_id: Uuid,
        client_id: Uuid,
    ) -> StoreResult<Option<DocumentShare>> {
        self.run(move |conn| load_share(conn, document_id, client_id))
            .await
    }

    async fn list_shares(&self, document_id: Uuid) -> StoreResult<Vec<DocumentShare>> {
        self.run(move |conn| {
            let rows = document_shares::table
                .filter(document_shares::document_id.eq(document_id))
                .order(document_shares::created_at.asc())
                .select(ShareRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(DocumentShare::from).collect())
        })
        .await
    }

    async fn delete_share(&self, document_id: Uuid, client_id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(document_shares::table.find((document_id, client_id)))
                .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn stamp_share_viewed(
        &self,
        document_id: Uuid,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DocumentShare>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                diesel::update(
                    document_shares::table
                        .find((document_id, client_id))
                        .filter(document_shares::viewed_at.is_null()),
                )
                .set(document_shares::viewed_at.eq(Some(now)))
                .execute(conn)?;
                load_share(conn, document_id, client_id)
            })
        })
        .await
    }

    async fn stamp_share_downloaded(
        &self,
        document_id: Uuid,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DocumentShare>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                diesel::update(
                    document_shares::table
                        .find((document_id, client_id))
                        .filter(document_shares::downloaded_at.is_null()),
                )
                .set(document_shares::downloaded_at.eq(Some(now)))
                .execute(conn)?;
                load_share(conn, document_id, client_id)
            })
        })
        .await
    }
}
