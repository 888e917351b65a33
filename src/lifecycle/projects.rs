use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use super::{
    authorize, guarded, optional_text, project_scope, replay, required_text, DomainError,
    DomainResult,
};
use crate::access::{Action, Role, Scope, Subject};
use crate::models::{
    Project, ProjectAssignment, ProjectStatus, ProjectTask, ProjectUpdate, TaskStatus,
};
use crate::notify::{NotificationEvent, Notifier};
use crate::store::Store;
use crate::utils::json::NullableValue;

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub status: Option<ProjectStatus>,
    pub on_hold_reason: Option<String>,
    pub expected_resume_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: NullableValue<String>,
    pub address: NullableValue<String>,
    pub status: Option<ProjectStatus>,
    pub on_hold_reason: NullableValue<String>,
    pub expected_resume_date: NullableValue<NaiveDate>,
}

/// Applies `patch` to `project`, keeping the hold fields consistent with the
/// resulting status.
pub fn apply_patch(
    project: &mut Project,
    patch: &ProjectPatch,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    if let Some(name) = &patch.name {
        project.name = required_text(name, "name")?;
    }
    patch.description.clone().apply_to(&mut project.description);
    patch.address.clone().apply_to(&mut project.address);

    let status = patch.status.unwrap_or(project.status);
    let mut reason = project.on_hold_reason.clone();
    patch.on_hold_reason.clone().apply_to(&mut reason);
    let mut resume = project.expected_resume_date;
    patch.expected_resume_date.clone().apply_to(&mut resume);

    if status == ProjectStatus::OnHold {
        reason = optional_text(reason);
        if reason.is_none() {
            return Err(DomainError::invalid(
                "on_hold_reason is required when status is on_hold",
            ));
        }
    } else {
        // Any status other than on_hold drops the hold fields, whatever the patch carried.
        reason = None;
        resume = None;
    }

    project.status = status;
    project.on_hold_reason = reason;
    project.expected_resume_date = resume;
    project.updated_at = now;
    Ok(())
}

pub async fn list_projects(store: &dyn Store, subject: &Subject) -> DomainResult<Vec<Project>> {
    let projects = match subject.role {
        Role::Admin => store.list_projects().await?,
        _ => store.list_projects_for_user(subject.user_id).await?,
    };
    Ok(projects)
}

pub async fn create_project(
    store: &dyn Store,
    subject: &Subject,
    input: NewProject,
) -> DomainResult<Project> {
    authorize(subject, Action::CreateProject, &Scope::new())?;

    let now = Utc::now();
    let mut project = Project {
        id: Uuid::new_v4(),
        name: required_text(&input.name, "name")?,
        description: None,
        address: None,
        status: ProjectStatus::Planning,
        on_hold_reason: None,
        expected_resume_date: None,
        created_by: subject.user_id,
        created_at: now,
        updated_at: now,
    };
    let initial = ProjectPatch {
        name: None,
        description: input.description.map_or(NullableValue::Omitted, NullableValue::Value),
        address: input.address.map_or(NullableValue::Omitted, NullableValue::Value),
        status: input.status,
        on_hold_reason: input
            .on_hold_reason
            .map_or(NullableValue::Omitted, NullableValue::Value),
        expected_resume_date: input
            .expected_resume_date
            .map_or(NullableValue::Omitted, NullableValue::Value),
    };
    apply_patch(&mut project, &initial, now)?;

    store.insert_project(project.clone()).await?;
    info!(project_id = %project.id, user_id = %subject.user_id, "project created");
    Ok(project)
}

pub async fn get_project(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<Project> {
    let scope = project_scope(store, subject, project_id).await?;
    authorize(subject, Action::ViewProject, &scope)?;
    store
        .find_project(project_id)
        .await?
        .ok_or(DomainError::NotFound("project"))
}

pub async fn update_project(
    store: &dyn Store,
    notifier: &Notifier,
    subject: &Subject,
    project_id: Uuid,
    patch: ProjectPatch,
) -> DomainResult<Project> {
    let scope = project_scope(store, subject, project_id).await?;
    authorize(subject, Action::UpdateProject, &scope)?;

    let now = Utc::now();
    let edit = move |project: &mut Project| apply_patch(project, &patch, now);
    let modified = store
        .modify_project(project_id, guarded(edit.clone()))
        .await?
        .ok_or(DomainError::NotFound("project"))?;
    replay(&modified.before, edit)?;

    let (before, after) = (modified.before, modified.after);
    if before.status != after.status {
        info!(
            project_id = %after.id,
            from = %before.status,
            to = %after.status,
            "project status changed"
        );
        notifier.dispatch(NotificationEvent::ProjectStatusChanged {
            project_id: after.id,
            from: before.status,
            to: after.status,
            changed_by: subject.user_id,
        });
    }
    Ok(after)
}

pub async fn delete_project(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<()> {
    authorize(subject, Action::DeleteProject, &Scope::new())?;
    if !store.delete_project(project_id).await? {
        return Err(DomainError::NotFound("project"));
    }
    info!(%project_id, user_id = %subject.user_id, "project deleted");
    Ok(())
}

pub async fn list_assignments(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<Vec<ProjectAssignment>> {
    get_project(store, subject, project_id).await?;
    Ok(store.list_assignments(project_id).await?)
}

pub async fn assign_user(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
    user_id: Uuid,
) -> DomainResult<ProjectAssignment> {
    authorize(subject, Action::ManageAssignments, &Scope::new())?;
    if store.find_project(project_id).await?.is_none() {
        return Err(DomainError::NotFound("project"));
    }
    let user = store
        .find_user(user_id)
        .await?
        .ok_or(DomainError::NotFound("user"))?;
    if user.role == Role::Admin {
        return Err(DomainError::invalid(
            "administrators have access to every project",
        ));
    }

    let assignment = ProjectAssignment {
        project_id,
        user_id,
        assigned_by: subject.user_id,
        created_at: Utc::now(),
    };
    if !store.insert_assignment(assignment.clone()).await? {
        return Err(DomainError::Conflict(
            "user is already assigned to this project".to_string(),
        ));
    }
    info!(%project_id, %user_id, "user assigned to project");
    Ok(assignment)
}

pub async fn unassign_user(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
    user_id: Uuid,
) -> DomainResult<()> {
    authorize(subject, Action::ManageAssignments, &Scope::new())?;
    if !store.delete_assignment(project_id, user_id).await? {
        return Err(DomainError::NotFound("assignment"));
    }
    info!(%project_id, %user_id, "user removed from project");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: NullableValue<String>,
    pub status: Option<TaskStatus>,
    pub assigned_to: NullableValue<Uuid>,
    pub due_date: NullableValue<NaiveDate>,
}

fn apply_task_patch(task: &mut ProjectTask, patch: &TaskPatch, now: DateTime<Utc>) -> DomainResult<()> {
    if let Some(title) = &patch.title {
        task.title = required_text(title, "title")?;
    }
    patch.description.clone().apply_to(&mut task.description);
    if let Some(status) = patch.status {
        task.status = status;
    }
    patch.assigned_to.clone().apply_to(&mut task.assigned_to);
    patch.due_date.clone().apply_to(&mut task.due_date);
    task.updated_at = now;
    Ok(())
}

/// Admins pass the assignment check without the project existing, so the
/// project row is confirmed before writing anything under it.
async fn writable_project(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<()> {
    let scope = project_scope(store, subject, project_id).await?;
    authorize(subject, Action::UpdateProject, &scope)?;
    if store.find_project(project_id).await?.is_none() {
        return Err(DomainError::NotFound("project"));
    }
    Ok(())
}

async fn check_task_assignee(store: &dyn Store, assignee: Option<Uuid>) -> DomainResult<()> {
    if let Some(user_id) = assignee {
        if store.find_user(user_id).await?.is_none() {
            return Err(DomainError::invalid("assigned user does not exist"));
        }
    }
    Ok(())
}

pub async fn list_tasks(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<Vec<ProjectTask>> {
    get_project(store, subject, project_id).await?;
    Ok(store.list_tasks(project_id).await?)
}

pub async fn create_task(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
    input: NewTask,
) -> DomainResult<ProjectTask> {
    writable_project(store, subject, project_id).await?;
    check_task_assignee(store, input.assigned_to).await?;

    let now = Utc::now();
    let task = ProjectTask {
        id: Uuid::new_v4(),
        project_id,
        title: required_text(&input.title, "title")?,
        description: optional_text(input.description),
        status: input.status.unwrap_or(TaskStatus::Todo),
        assigned_to: input.assigned_to,
        due_date: input.due_date,
        created_by: subject.user_id,
        created_at: now,
        updated_at: now,
    };
    store.insert_task(task.clone()).await?;
    Ok(task)
}

pub async fn update_task(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
    task_id: Uuid,
    patch: TaskPatch,
) -> DomainResult<ProjectTask> {
    writable_project(store, subject, project_id).await?;
    if let NullableValue::Value(user_id) = patch.assigned_to {
        check_task_assignee(store, Some(user_id)).await?;
    }

    let now = Utc::now();
    let edit = move |task: &mut ProjectTask| apply_task_patch(task, &patch, now);
    let modified = store
        .modify_task(project_id, task_id, guarded(edit.clone()))
        .await?
        .ok_or(DomainError::NotFound("task"))?;
    replay(&modified.before, edit)?;
    Ok(modified.after)
}

pub async fn delete_task(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
    task_id: Uuid,
) -> DomainResult<()> {
    writable_project(store, subject, project_id).await?;
    if !store.delete_task(project_id, task_id).await? {
        return Err(DomainError::NotFound("task"));
    }
    Ok(())
}

pub async fn list_updates(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
) -> DomainResult<Vec<ProjectUpdate>> {
    get_project(store, subject, project_id).await?;
    Ok(store.list_project_updates(project_id).await?)
}

pub async fn post_update(
    store: &dyn Store,
    subject: &Subject,
    project_id: Uuid,
    message: &str,
) -> DomainResult<ProjectUpdate> {
    writable_project(store, subject, project_id).await?;
    let update = ProjectUpdate {
        id: Uuid::new_v4(),
        project_id,
        author_id: subject.user_id,
        message: required_text(message, "message")?,
        created_at: Utc::now(),
    };
    store.insert_project_update(update.clone()).await?;
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn project(status: ProjectStatus) -> Project {
        let now = Utc::now();
        Project {
            id: Uuid::new_v4(),
            name: "Lobby refit".to_string(),
            description: None,
            address: None,
            status,
            on_hold_reason: None,
            expected_resume_date: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    fn on_hold(reason: &str) -> ProjectPatch {
        ProjectPatch {
            status: Some(ProjectStatus::OnHold),
            on_hold_reason: NullableValue::Value(reason.to_string()),
            expected_resume_date: NullableValue::Value(
                NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            ),
            ..ProjectPatch::default()
        }
    }

    #[test]
    fn entering_hold_needs_a_reason() {
        let mut subject = project(ProjectStatus::Active);
        let patch = ProjectPatch {
            status: Some(ProjectStatus::OnHold),
            ..ProjectPatch::default()
        };
        assert!(matches!(
            apply_patch(&mut subject, &patch, Utc::now()),
            Err(DomainError::InvalidInput(_))
        ));
        assert!(matches!(
            apply_patch(&mut subject, &on_hold("   "), Utc::now()),
            Err(DomainError::InvalidInput(_))
        ));

        apply_patch(&mut subject, &on_hold(" waiting on permits "), Utc::now()).unwrap();
        assert_eq!(subject.status, ProjectStatus::OnHold);
        assert_eq!(subject.on_hold_reason.as_deref(), Some("waiting on permits"));
    }

    #[test]
    fn leaving_hold_clears_both_hold_fields() {
        let mut subject = project(ProjectStatus::Active);
        apply_patch(&mut subject, &on_hold("weather"), Utc::now()).unwrap();

        let resume = ProjectPatch {
            status: Some(ProjectStatus::Active),
            ..ProjectPatch::default()
        };
        apply_patch(&mut subject, &resume, Utc::now()).unwrap();
        assert_eq!(subject.status, ProjectStatus::Active);
        assert_eq!(subject.on_hold_reason, None);
        assert_eq!(subject.expected_resume_date, None);
    }

    #[test]
    fn hold_fields_are_dropped_outside_hold() {
        let mut subject = project(ProjectStatus::Planning);
        let patch = ProjectPatch {
            on_hold_reason: NullableValue::Value("nope".to_string()),
            ..ProjectPatch::default()
        };
        apply_patch(&mut subject, &patch, Utc::now()).unwrap();
        assert_eq!(subject.on_hold_reason, None);

        let mut held = project(ProjectStatus::Active);
        apply_patch(&mut held, &on_hold("permits"), Utc::now()).unwrap();
        let resubmitted = ProjectPatch {
            status: Some(ProjectStatus::Active),
            ..on_hold("permits")
        };
        apply_patch(&mut held, &resubmitted, Utc::now()).unwrap();
        assert_eq!(held.status, ProjectStatus::Active);
        assert_eq!(held.on_hold_reason, None);
        assert_eq!(held.expected_resume_date, None);
    }

    #[test]
    fn clearing_the_reason_while_held_is_rejected() {
        let mut held = project(ProjectStatus::Active);
        apply_patch(&mut held, &on_hold("budget"), Utc::now()).unwrap();
        let clear_reason = ProjectPatch {
            on_hold_reason: NullableValue::Null,
            ..ProjectPatch::default()
        };
        assert!(matches!(
            apply_patch(&mut held, &clear_reason, Utc::now()),
            Err(DomainError::InvalidInput(_))
        ));
        assert_eq!(held.on_hold_reason.as_deref(), Some("budget"));
    }

    #[tokio::test]
    async fn leaving_hold_is_persisted_and_announced() {
        let store = MemoryStore::new();
        let (notifier, mut events) = Notifier::channel();
        let admin = Subject {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let created = create_project(
            &store,
            &admin,
            NewProject {
                name: "Tower B".to_string(),
                description: None,
                address: None,
                status: Some(ProjectStatus::OnHold),
                on_hold_reason: Some("financing".to_string()),
                expected_resume_date: None,
            },
        )
        .await
        .unwrap();

        let patch = ProjectPatch {
            status: Some(ProjectStatus::Active),
            ..ProjectPatch::default()
        };
        update_project(&store, &notifier, &admin, created.id, patch)
            .await
            .unwrap();

        let stored = store.find_project(created.id).await.unwrap().unwrap();
        assert_eq!(stored.on_hold_reason, None);
        assert_eq!(stored.expected_resume_date, None);
        assert!(matches!(
            events.try_recv().unwrap(),
            NotificationEvent::ProjectStatusChanged {
                from: ProjectStatus::OnHold,
                to: ProjectStatus::Active,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejected_patch_leaves_the_row_untouched() {
        let store = MemoryStore::new();
        let (notifier, mut events) = Notifier::channel();
        let admin = Subject {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let original = project(ProjectStatus::Active);
        store.insert_project(original.clone()).await.unwrap();

        let patch = ProjectPatch {
            name: Some("Renamed".to_string()),
            status: Some(ProjectStatus::OnHold),
            ..ProjectPatch::default()
        };
        let result = update_project(&store, &notifier, &admin, original.id, patch).await;
        assert!(matches!(result, Err(DomainError::InvalidInput(_))));
        assert_eq!(store.find_project(original.id).await.unwrap(), Some(original));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unassigned_staff_are_forbidden_even_for_missing_projects() {
        let store = MemoryStore::new();
        let employee = Subject {
            user_id: Uuid::new_v4(),
            role: Role::Employee,
        };
        let admin = Subject {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let missing = Uuid::new_v4();
        assert!(matches!(
            get_project(&store, &employee, missing).await,
            Err(DomainError::Forbidden)
        ));
        assert!(matches!(
            get_project(&store, &admin, missing).await,
            Err(DomainError::NotFound("project"))
        ));
    }
}
