use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    access::Role,
    auth::{Identity, MaybeIdentity},
    error::{AppError, AppResult},
    lifecycle::accounts::{self, Registration},
    models::User,
    state::AppState,
    utils::json::JsonBody,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: Option<String>,
}

#[derive(Serialize)]
pub struct SessionInfo {
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub session: SessionInfo,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub user: Option<User>,
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let user = accounts::authenticate(state.store.as_ref(), &payload.email, &payload.password)
        .await?;
    let (token, session) = state.sessions.create(user.id).await?;
    info!(user_id = %user.id, "user logged in");

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_session_cookie(&state, &token, session.expires_at)?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            user,
            session: SessionInfo {
                expires_at: session.expires_at,
            },
        }),
    ))
}

/// Succeeds whether or not a session was presented.
pub async fn logout(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
) -> AppResult<(HeaderMap, Json<serde_json::Value>)> {
    if let Some(identity) = identity {
        if let Err(err) = state.sessions.revoke(&identity.session_id).await {
            warn!(user_id = %identity.user.id, error = %err, "failed to delete session");
        } else {
            info!(user_id = %identity.user.id, "user logged out");
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_session_cookie(&state)?);
    Ok((headers, Json(serde_json::json!({ "success": true }))))
}

pub async fn register(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<(HeaderMap, Json<RegisterResponse>)> {
    let role = payload
        .role
        .as_deref()
        .map(str::parse::<Role>)
        .transpose()
        .map_err(|err| AppError::bad_request(err.to_string()))?;
    let caller = identity.as_ref().map(Identity::subject);

    let user = accounts::register(
        state.store.as_ref(),
        &state.notifier,
        caller.as_ref(),
        Registration {
            email: payload.email,
            password: payload.password,
            first_name: payload.first_name,
            last_name: payload.last_name,
            role,
        },
    )
    .await?;

    let mut headers = HeaderMap::new();
    // Someone signing up for themselves is logged straight in; provisioning
    // leaves the admin's own session alone.
    let session = if identity.is_none() {
        let (token, session) = state.sessions.create(user.id).await?;
        headers.insert(
            SET_COOKIE,
            build_session_cookie(&state, &token, session.expires_at)?,
        );
        Some(SessionInfo {
            expires_at: session.expires_at,
        })
    } else {
        None
    };

    Ok((headers, Json(RegisterResponse { user, session })))
}

pub async fn session(MaybeIdentity(identity): MaybeIdentity) -> Json<SessionResponse> {
    Json(SessionResponse {
        user: identity.map(|identity| identity.user),
    })
}

fn cookie_attributes(state: &AppState, parts: &mut Vec<String>) {
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    if state.config.session_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.session_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }
}

fn build_session_cookie(
    state: &AppState,
    token: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);

    let mut parts = vec![format!("{}={}", state.config.session_cookie_name, token)];
    cookie_attributes(state, &mut parts);
    parts.push(format!("Max-Age={}", max_age));
    parts.push(format!(
        "Expires={}",
        expires_at.format("%a, %d %b %Y %H:%M:%S GMT")
    ));

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

fn build_clear_session_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", state.config.session_cookie_name)];
    cookie_attributes(state, &mut parts);
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}
