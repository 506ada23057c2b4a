//! Bearer-token extraction for REST routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use crate::auth::tokens::{self, AuthFailure};
use crate::error::ApiError;
use crate::gateway::rooms::RoomKey;
use crate::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub name: String,
}

/// Rejection returned when the bearer token is missing or invalid.
pub struct AuthRejection(AuthFailure);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        ApiError::unauthorized(self.0.to_string()).into_response()
    }
}

/// Pull the token out of an `Authorization: Bearer` header value.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let identity = tokens::authenticate(
            state.store.as_ref(),
            &state.config.jwt_secret,
            bearer_token(&parts.headers),
        )
        .await
        .map_err(AuthRejection)?;

        let user = AuthUser {
            user_id: identity.user_id,
            name: identity.name,
        };
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// Optional `X-Connection-Id` header naming the caller's own socket, used to
/// keep a REST mutation from echoing back to the client that made it.
///
/// The id is honoured only while it names a live connection of the
/// authenticated caller; anything else is treated as absent.
#[derive(Debug, Clone, Default)]
pub struct OriginConnection(pub Option<String>);

pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

impl FromRequestParts<AppState> for OriginConnection {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(claimed) = parts
            .headers
            .get(CONNECTION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
        else {
            return Ok(OriginConnection(None));
        };

        let Ok(user) = AuthUser::from_request_parts(parts, state).await else {
            return Ok(OriginConnection(None));
        };
        if !state.rooms.is_member(&claimed, &RoomKey::User(user.user_id.clone())) {
            tracing::debug!(
                connection_id = %claimed,
                user_id = %user.user_id,
                "ignoring connection id not owned by caller"
            );
            return Ok(OriginConnection(None));
        }
        Ok(OriginConnection(Some(claimed)))
    }
}
