use axum::{extract::State, Json};

use crate::{
    auth::Identity, error::AppResult, lifecycle::accounts, models::User, state::AppState,
};

pub async fn list_users(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<Json<Vec<User>>> {
    let users = accounts::list_users(state.store.as_ref(), &identity.subject()).await?;
    Ok(Json(users))
}
