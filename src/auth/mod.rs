pub mod download;
pub mod password;
pub mod session;

use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization, Cookie};
use axum_extra::TypedHeader;
use tracing::{error, warn};

use crate::{
    access::Subject,
    error::AppError,
    models::User,
    state::AppState,
    store::{StoreError, StoreResult},
};

/// The caller behind a valid session.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
    pub session_id: String,
}

impl Identity {
    pub fn subject(&self) -> Subject {
        Subject {
            user_id: self.user.id,
            role: self.user.role,
        }
    }
}

/// Reads the opaque token from the session cookie, falling back to a bearer header.
pub async fn session_token(parts: &mut Parts, state: &AppState) -> Option<String> {
    if let Ok(TypedHeader(cookies)) =
        TypedHeader::<Cookie>::from_request_parts(parts, state).await
    {
        if let Some(value) = cookies.get(&state.config.session_cookie_name) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
        .await
        .ok()
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}

/// Maps a token to its session and user. Expired sessions, deleted users and
/// rows whose role no longer parses all resolve to `None`.
pub async fn resolve_identity(state: &AppState, token: &str) -> StoreResult<Option<Identity>> {
    let Some(session) = state.sessions.validate(token).await? else {
        return Ok(None);
    };

    match state.store.find_user(session.user_id).await {
        Ok(Some(user)) => Ok(Some(Identity {
            user,
            session_id: session.id,
        })),
        Ok(None) => Ok(None),
        Err(StoreError::InvalidRow(reason)) => {
            warn!(user_id = %session.user_id, %reason, "rejecting session for unreadable user");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts, state)
            .await
            .ok_or_else(AppError::unauthorized)?;

        resolve_identity(state, &token)
            .await?
            .ok_or_else(AppError::unauthorized)
    }
}

/// Identity for routes that also serve anonymous callers. Lookup failures are
/// logged and treated as anonymous.
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<Identity>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts, state).await else {
            return Ok(MaybeIdentity(None));
        };

        match resolve_identity(state, &token).await {
            Ok(identity) => Ok(MaybeIdentity(identity)),
            Err(err) => {
                error!(error = %err, "session lookup failed");
                Ok(MaybeIdentity(None))
            }
        }
    }
}
