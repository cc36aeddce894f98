use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::UserId;

// Credential signed by the identity provider, presented on every request
// and when opening the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub user_id: UserId,
    pub display_name: String,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl SessionToken {
    /// Encode for transport (`Authorization: Bearer ...` or `?token=`).
    pub fn encode(&self) -> String {
        // Serializing plain data into a Vec cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(s: &str) -> Result<Self, AuthError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AuthError::Missing);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed(e.to_string()))
    }

    fn signing_payload(user_id: &UserId, display_name: &str, expires_at: &DateTime<Utc>) -> Vec<u8> {
        // payload = user_id || display_name || expires_at (rfc3339)
        let mut payload = Vec::new();
        payload.extend_from_slice(user_id.0.as_bytes());
        payload.extend_from_slice(display_name.as_bytes());
        payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
        payload
    }
}

pub fn verify_session_token(token: &SessionToken, issuer_pubkey: &[u8; 32]) -> Result<(), AuthError> {
    if Utc::now() > token.expires_at {
        return Err(AuthError::Expired);
    }

    let verifying_key =
        VerifyingKey::from_bytes(issuer_pubkey).map_err(|_| AuthError::InvalidIssuerKey)?;

    let signature = Signature::from_slice(&token.signature).map_err(|_| AuthError::BadSignature)?;

    let payload =
        SessionToken::signing_payload(&token.user_id, &token.display_name, &token.expires_at);

    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| AuthError::BadSignature)
}

/// Issue a credential. Used by tests and development tooling; production
/// credentials come from the identity provider.
pub fn issue_session_token(
    user_id: UserId,
    display_name: &str,
    expires_at: DateTime<Utc>,
    issuer_signing_key: &ed25519_dalek::SigningKey,
) -> SessionToken {
    use ed25519_dalek::Signer;

    let payload = SessionToken::signing_payload(&user_id, display_name, &expires_at);
    let signature = issuer_signing_key.sign(&payload);

    SessionToken {
        user_id,
        display_name: display_name.to_string(),
        expires_at,
        signature: signature.to_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn valid_token_verifies() {
        let issuer = SigningKey::generate(&mut OsRng);
        let token = issue_session_token(
            UserId::new(),
            "Alice",
            Utc::now() + Duration::hours(1),
            &issuer,
        );

        assert!(verify_session_token(&token, &issuer.verifying_key().to_bytes()).is_ok());
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = SigningKey::generate(&mut OsRng);
        let token = issue_session_token(
            UserId::new(),
            "Alice",
            Utc::now() - Duration::minutes(1),
            &issuer,
        );

        assert!(matches!(
            verify_session_token(&token, &issuer.verifying_key().to_bytes()),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn tampered_name_is_rejected() {
        let issuer = SigningKey::generate(&mut OsRng);
        let mut token = issue_session_token(
            UserId::new(),
            "Alice",
            Utc::now() + Duration::hours(1),
            &issuer,
        );
        token.display_name = "Mallory".into();

        assert!(matches!(
            verify_session_token(&token, &issuer.verifying_key().to_bytes()),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn encoded_form_decodes() {
        let issuer = SigningKey::generate(&mut OsRng);
        let token = issue_session_token(
            UserId::new(),
            "Alice",
            Utc::now() + Duration::hours(1),
            &issuer,
        );

        let decoded = SessionToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded.user_id, token.user_id);
        assert!(verify_session_token(&decoded, &issuer.verifying_key().to_bytes()).is_ok());
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            SessionToken::decode("%%%"),
            Err(AuthError::Malformed(_))
        ));
        assert!(matches!(SessionToken::decode(""), Err(AuthError::Missing)));
    }
}
