use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::Identity,
    error::{AppError, AppResult},
    lifecycle::{
        change_requests::{self, Review, ReviewAction},
        invitations, projects,
        projects::{NewProject, NewTask, ProjectPatch, TaskPatch},
    },
    models::{
        ChangeRequest, Project, ProjectAssignment, ProjectInvitation, ProjectStatus, ProjectTask,
        ProjectUpdate, TaskStatus,
    },
    state::AppState,
    utils::json::{nullable_field, optional_field, JsonBody},
};

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub status: Option<ProjectStatus>,
    pub on_hold_reason: Option<String>,
    pub expected_resume_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct AssignUserRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct PostUpdateRequest {
    pub message: String,
}

#[derive(Deserialize)]
pub struct CreateChangeRequest {
    pub sections: Vec<String>,
    pub details: Option<String>,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub action: String,
    #[serde(default)]
    pub approved_sections: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct InviteRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
}

fn success() -> Json<Value> {
    Json(json!({ "success": true }))
}

pub async fn list_projects(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<Json<Vec<Project>>> {
    let projects = projects::list_projects(state.store.as_ref(), &identity.subject()).await?;
    Ok(Json(projects))
}

pub async fn create_project(
    State(state): State<AppState>,
    identity: Identity,
    JsonBody(payload): JsonBody<CreateProjectRequest>,
) -> AppResult<Json<Project>> {
    let project = projects::create_project(
        state.store.as_ref(),
        &identity.subject(),
        NewProject {
            name: payload.name,
            description: payload.description,
            address: payload.address,
            status: payload.status,
            on_hold_reason: payload.on_hold_reason,
            expected_resume_date: payload.expected_resume_date,
        },
    )
    .await?;
    Ok(Json(project))
}

pub async fn get_project(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    let project =
        projects::get_project(state.store.as_ref(), &identity.subject(), project_id).await?;
    Ok(Json(project))
}

pub async fn update_project(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
    JsonBody(body): JsonBody<Value>,
) -> AppResult<Json<Project>> {
    let patch = ProjectPatch {
        name: optional_field(&body, "name").map_err(AppError::bad_request)?,
        description: nullable_field(&body, "description").map_err(AppError::bad_request)?,
        address: nullable_field(&body, "address").map_err(AppError::bad_request)?,
        status: optional_field(&body, "status").map_err(AppError::bad_request)?,
        on_hold_reason: nullable_field(&body, "on_hold_reason").map_err(AppError::bad_request)?,
        expected_resume_date: nullable_field(&body, "expected_resume_date")
            .map_err(AppError::bad_request)?,
    };

    let project = projects::update_project(
        state.store.as_ref(),
        &state.notifier,
        &identity.subject(),
        project_id,
        patch,
    )
    .await?;
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    projects::delete_project(state.store.as_ref(), &identity.subject(), project_id).await?;
    Ok(success())
}

pub async fn list_assignments(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<ProjectAssignment>>> {
    let assignments =
        projects::list_assignments(state.store.as_ref(), &identity.subject(), project_id).await?;
    Ok(Json(assignments))
}

pub async fn assign_user(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
    JsonBody(payload): JsonBody<AssignUserRequest>,
) -> AppResult<Json<ProjectAssignment>> {
    let assignment = projects::assign_user(
        state.store.as_ref(),
        &identity.subject(),
        project_id,
        payload.user_id,
    )
    .await?;
    Ok(Json(assignment))
}

pub async fn unassign_user(
    State(state): State<AppState>,
    identity: Identity,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Value>> {
    projects::unassign_user(state.store.as_ref(), &identity.subject(), project_id, user_id)
        .await?;
    Ok(success())
}

pub async fn list_tasks(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<ProjectTask>>> {
    let tasks = projects::list_tasks(state.store.as_ref(), &identity.subject(), project_id).await?;
    Ok(Json(tasks))
}

pub async fn create_task(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
    JsonBody(payload): JsonBody<CreateTaskRequest>,
) -> AppResult<Json<ProjectTask>> {
    let task = projects::create_task(
        state.store.as_ref(),
        &identity.subject(),
        project_id,
        NewTask {
            title: payload.title,
            description: payload.description,
            status: payload.status,
            assigned_to: payload.assigned_to,
            due_date: payload.due_date,
        },
    )
    .await?;
    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<AppState>,
    identity: Identity,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    JsonBody(body): JsonBody<Value>,
) -> AppResult<Json<ProjectTask>> {
    let patch = TaskPatch {
        title: optional_field(&body, "title").map_err(AppError::bad_request)?,
        description: nullable_field(&body, "description").map_err(AppError::bad_request)?,
        status: optional_field(&body, "status").map_err(AppError::bad_request)?,
        assigned_to: nullable_field(&body, "assigned_to").map_err(AppError::bad_request)?,
        due_date: nullable_field(&body, "due_date").map_err(AppError::bad_request)?,
    };

    let task = projects::update_task(
        state.store.as_ref(),
        &identity.subject(),
        project_id,
        task_id,
        patch,
    )
    .await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    identity: Identity,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Value>> {
    projects::delete_task(state.store.as_ref(), &identity.subject(), project_id, task_id).await?;
    Ok(success())
}

pub async fn list_updates(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<ProjectUpdate>>> {
    let updates =
        projects::list_updates(state.store.as_ref(), &identity.subject(), project_id).await?;
    Ok(Json(updates))
}

pub async fn post_update(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
    JsonBody(payload): JsonBody<PostUpdateRequest>,
) -> AppResult<Json<ProjectUpdate>> {
    let update = projects::post_update(
        state.store.as_ref(),
        &identity.subject(),
        project_id,
        &payload.message,
    )
    .await?;
    Ok(Json(update))
}

pub async fn list_change_requests(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<ChangeRequest>>> {
    let requests = change_requests::list_change_requests(
        state.store.as_ref(),
        &identity.subject(),
        project_id,
    )
    .await?;
    Ok(Json(requests))
}

pub async fn create_change_request(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
    JsonBody(payload): JsonBody<CreateChangeRequest>,
) -> AppResult<Json<ChangeRequest>> {
    let request = change_requests::create_change_request(
        state.store.as_ref(),
        &state.notifier,
        &identity.subject(),
        project_id,
        payload.sections,
        payload.details,
    )
    .await?;
    Ok(Json(request))
}

pub async fn review_change_request(
    State(state): State<AppState>,
    identity: Identity,
    Path((project_id, request_id)): Path<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<ReviewRequest>,
) -> AppResult<Json<ChangeRequest>> {
    let action: ReviewAction = payload
        .action
        .parse()
        .map_err(|err: crate::models::UnknownVariant| AppError::bad_request(err.to_string()))?;

    let request = change_requests::review_change_request(
        state.store.as_ref(),
        &state.notifier,
        &identity.subject(),
        project_id,
        request_id,
        Review {
            action,
            approved_sections: payload.approved_sections,
            notes: payload.notes,
        },
    )
    .await?;
    Ok(Json(request))
}

pub async fn list_invitations(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<ProjectInvitation>>> {
    let invitations =
        invitations::list_invitations(state.store.as_ref(), &identity.subject(), project_id)
            .await?;
    Ok(Json(invitations))
}

pub async fn invite(
    State(state): State<AppState>,
    identity: Identity,
    Path(project_id): Path<Uuid>,
    JsonBody(payload): JsonBody<InviteRequest>,
) -> AppResult<Json<ProjectInvitation>> {
    let invitation = invitations::invite(
        state.store.as_ref(),
        &state.notifier,
        &identity.subject(),
        project_id,
        &payload.email,
        state.invitation_ttl(),
    )
    .await?;
    Ok(Json(invitation))
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    identity: Identity,
    JsonBody(payload): JsonBody<AcceptInvitationRequest>,
) -> AppResult<Json<ProjectAssignment>> {
    let assignment = invitations::accept(
        state.store.as_ref(),
        &identity.user,
        &payload.token,
        chrono::Utc::now(),
    )
    .await?;
    Ok(Json(assignment))
}
