use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

pub mod auth;
pub mod documents;
pub mod health;
pub mod projects;
pub mod users;
pub mod work_orders;

const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        warn!(origin = value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Every `/api` route except auth and health resolves the caller itself
/// through the `Identity` extractor.
pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/register", post(auth::register))
        .route("/session", get(auth::session));

    let project_routes = Router::new()
        .route(
            "/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/:id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/:id/assignments",
            get(projects::list_assignments).post(projects::assign_user),
        )
        .route(
            "/:id/assignments/:user_id",
            delete(projects::unassign_user),
        )
        .route(
            "/:id/tasks",
            get(projects::list_tasks).post(projects::create_task),
        )
        .route(
            "/:id/tasks/:task_id",
            patch(projects::update_task).delete(projects::delete_task),
        )
        .route(
            "/:id/updates",
            get(projects::list_updates).post(projects::post_update),
        )
        .route(
            "/:id/change-requests",
            get(projects::list_change_requests).post(projects::create_change_request),
        )
        .route(
            "/:id/change-requests/:request_id/review",
            post(projects::review_change_request),
        )
        .route(
            "/:id/invitations",
            get(projects::list_invitations).post(projects::invite),
        );

    let work_order_routes = Router::new()
        .route(
            "/",
            get(work_orders::list_work_orders).post(work_orders::create_work_order),
        )
        .route(
            "/:id",
            get(work_orders::get_work_order)
                .patch(work_orders::update_work_order)
                .delete(work_orders::delete_work_order),
        )
        .route(
            "/:id/signatures",
            get(work_orders::list_signatures).post(work_orders::add_signature),
        )
        .route(
            "/:id/materials",
            get(work_orders::list_materials).post(work_orders::add_material),
        )
        .route(
            "/:id/materials/:material_id",
            delete(work_orders::remove_material),
        );

    let document_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/:id/download", get(documents::download_document))
        .route(
            "/:id/shares",
            get(documents::list_shares).post(documents::share_document),
        )
        .route("/:id/shares/:client_id", delete(documents::revoke_share));

    Router::new()
        .route("/download/:token", get(documents::download_with_token))
        .route("/api/health", get(health::health_check))
        .nest("/api/auth", auth_routes)
        .route("/api/users", get(users::list_users))
        .nest("/api/projects", project_routes)
        .route("/api/invitations/accept", post(projects::accept_invitation))
        .nest("/api/work-orders", work_order_routes)
        .nest("/api/documents", document_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
