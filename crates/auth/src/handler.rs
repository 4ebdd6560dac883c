//! The pluggable connect-time authenticator: a single async method from
//! bearer token to resolved identity, with the credential-format question
//! kept out of `RoomCore` entirely. This fabric has no OIDC federation
//! requirement, so [`JwtAuthHandler`] only ever validates against one local
//! ES256 key rather than falling back to a fetched-and-cached JWKS.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Map;

use roomsync_lib::UserId;

use crate::identity::{ClaimsError, RoomSyncClaims};

/// What a successful [`AuthHandler::authenticate`] call resolves to. `extra`
/// carries any additional claims an embedder's mutators might care about
/// (mapped into `UserData.extra` by the caller).
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user_id: UserId,
    pub extra: Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthRejected {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("malformed claims: {0}")]
    MalformedClaims(#[from] ClaimsError),
    #[error("issuer {got:?} does not match the configured issuer {expected:?}")]
    IssuerMismatch { got: String, expected: String },
}

/// `RoomCore` depends only on this trait; `core` never sees a JWT or a key.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    async fn authenticate(&self, token: &str, room_id: &str) -> Result<ResolvedIdentity, AuthRejected>;
}

/// The default `AuthHandler` the standalone binary boots with so it works
/// without an embedder-supplied implementation.
pub struct JwtAuthHandler {
    decoding_key: DecodingKey,
    required_issuer: Option<String>,
}

impl JwtAuthHandler {
    pub fn new(decoding_key: DecodingKey) -> Self {
        JwtAuthHandler {
            decoding_key,
            required_issuer: None,
        }
    }

    /// Builds a handler from an ES256 public key in PEM form, so embedders
    /// (and the standalone binary) never need to depend on `jsonwebtoken`
    /// themselves just to construct a [`DecodingKey`].
    pub fn from_ec_pem(pem: &[u8]) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self::new(DecodingKey::from_ec_pem(pem)?))
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.required_issuer = Some(issuer.into());
        self
    }
}

#[async_trait]
impl AuthHandler for JwtAuthHandler {
    async fn authenticate(&self, token: &str, room_id: &str) -> Result<ResolvedIdentity, AuthRejected> {
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_required_spec_claims(&["sub", "iss"]);
        validation.validate_aud = false;

        let data = decode::<RoomSyncClaims>(token, &self.decoding_key, &validation)?;
        let claims = data.claims;
        claims.validate_shape()?;

        if let Some(expected) = &self.required_issuer {
            if &claims.issuer != expected {
                tracing::debug!(room_id, issuer = %claims.issuer, expected, "rejecting connect: issuer mismatch");
                return Err(AuthRejected::IssuerMismatch {
                    got: claims.issuer,
                    expected: expected.clone(),
                });
            }
        }

        Ok(ResolvedIdentity {
            user_id: claims.user_id(),
            extra: Map::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn garbage_token_is_rejected_before_touching_the_key() {
        // DecodingKey::from_secret never inspects its bytes at construction time,
        // so this doesn't assert anything about ES256 keys specifically, only
        // that malformed input fails fast.
        let handler = JwtAuthHandler::new(DecodingKey::from_secret(b"unused"));
        let err = handler.authenticate("not-a-jwt", "room1").await.unwrap_err();
        assert!(matches!(err, AuthRejected::InvalidToken(_)));
    }
}
