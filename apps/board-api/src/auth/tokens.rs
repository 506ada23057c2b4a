//! Bearer access-token verification.
//!
//! Tokens are HS256 JWTs minted by the identity service; this crate only
//! verifies them and resolves the subject against the data layer.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::store::DataStore;

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Why a credential was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("missing access token")]
    MissingToken,
    #[error("access token expired")]
    Expired,
    #[error("invalid access token")]
    InvalidToken,
    #[error("unknown user")]
    UnknownUser,
    #[error("identity lookup failed")]
    LookupFailed,
}

/// An authenticated principal attached to a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    /// Role hint from the token. Never used for authorization.
    pub role_hint: Option<String>,
}

/// Check signature and expiry and return the claims.
pub fn verify_access_token(secret: &str, token: &str) -> Result<AccessClaims, AuthFailure> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);
    validation.leeway = 5;

    jsonwebtoken::decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(?e, "access token rejected");
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthFailure::Expired,
            _ => AuthFailure::InvalidToken,
        }
    })
}

/// Resolve a bearer token into an [`Identity`]. The subject must exist in
/// the data layer; a valid signature alone is not enough.
pub async fn authenticate(
    store: &dyn DataStore,
    secret: &str,
    token: Option<&str>,
) -> Result<Identity, AuthFailure> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthFailure::MissingToken)?;

    let claims = verify_access_token(secret, token)?;

    let user = store
        .get_user(&claims.sub)
        .await
        .map_err(|err| {
            tracing::warn!(%err, user_id = %claims.sub, "identity lookup failed");
            AuthFailure::LookupFailed
        })?
        .ok_or(AuthFailure::UnknownUser)?;

    Ok(Identity {
        user_id: user.id,
        name: claims.name.unwrap_or(user.name),
        role_hint: claims.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use jsonwebtoken::{EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn mint(sub: &str, exp_offset: i64, secret: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            sub: sub.to_string(),
            name: None,
            role: Some("member".into()),
            iat: now,
            exp: now + exp_offset,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_user("usr_a", "Ada");
        store
    }

    #[tokio::test]
    async fn accepts_valid_token_for_known_user() {
        let token = mint("usr_a", 300, SECRET);
        let identity = authenticate(&store(), SECRET, Some(&token)).await.unwrap();
        assert_eq!(identity.user_id, "usr_a");
        assert_eq!(identity.name, "Ada");
        assert_eq!(identity.role_hint.as_deref(), Some("member"));
    }

    #[tokio::test]
    async fn rejects_missing_token() {
        assert_eq!(
            authenticate(&store(), SECRET, None).await,
            Err(AuthFailure::MissingToken)
        );
        assert_eq!(
            authenticate(&store(), SECRET, Some("  ")).await,
            Err(AuthFailure::MissingToken)
        );
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let token = mint("usr_a", 300, "some-other-secret");
        assert_eq!(
            authenticate(&store(), SECRET, Some(&token)).await,
            Err(AuthFailure::InvalidToken)
        );
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let token = mint("usr_a", -600, SECRET);
        assert_eq!(
            authenticate(&store(), SECRET, Some(&token)).await,
            Err(AuthFailure::Expired)
        );
    }

    #[tokio::test]
    async fn rejects_unknown_user() {
        let token = mint("usr_ghost", 300, SECRET);
        assert_eq!(
            authenticate(&store(), SECRET, Some(&token)).await,
            Err(AuthFailure::UnknownUser)
        );
    }
}
