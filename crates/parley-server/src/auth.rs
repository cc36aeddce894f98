//! Session credential verification at the HTTP and push-channel boundary.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use parley_shared::auth::{verify_session_token, SessionToken};
use parley_shared::{AuthError, UserId};

use crate::api::AppState;
use crate::error::ServerError;

/// Verifies credentials signed by the identity provider.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    issuer_pubkey: [u8; 32],
}

impl TokenVerifier {
    pub fn new(issuer_pubkey: [u8; 32]) -> Self {
        Self { issuer_pubkey }
    }

    /// Decode and check an encoded credential.
    pub fn verify(&self, raw: &str) -> Result<SessionToken, AuthError> {
        if self.issuer_pubkey == [0u8; 32] {
            return Err(AuthError::InvalidIssuerKey);
        }
        let token = SessionToken::decode(raw)?;
        verify_session_token(&token, &self.issuer_pubkey)?;
        Ok(token)
    }
}

/// The caller of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
    pub display_name: String,
}

impl AppState {
    /// Verify `raw` and make sure the user it names is known.
    pub fn authenticate(&self, raw: &str) -> Result<AuthUser, ServerError> {
        let token = self.verifier.verify(raw).map_err(|e| {
            debug!(error = %e, "Rejected credential");
            ServerError::from(e)
        })?;
        self.chat.ensure_user(token.user_id, &token.display_name)?;
        Ok(AuthUser {
            id: token.user_id,
            display_name: token.display_name,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed("non-ascii authorization header".into()))?;

        let raw = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AuthError::Malformed("expected a Bearer credential".into()))?;

        state.authenticate(raw)
    }
}
