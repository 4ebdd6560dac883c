//! Claims shape for the default JWT-based [`crate::handler::JwtAuthHandler`].
//! Kept as two distinct types — the claims as received vs. signature-verified
//! claims — since a bare JWT decode doesn't give you the extra cross-field
//! validation (issuer match, audience membership) this fabric needs before
//! trusting a subject as this session's `userID`.

use std::time::SystemTime;

use roomsync_lib::UserId;
use serde::{Deserialize, Serialize};

/// Claims once validated: signature checked, subject/issuer shape-checked.
/// This is what [`crate::handler::JwtAuthHandler::authenticate`] hands back
/// wrapped in a [`crate::handler::ResolvedIdentity`].
#[serde_with::serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSyncClaims {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "aud", default, deserialize_with = "deserialize_audience")]
    pub audience: Vec<String>,
    #[serde_as(as = "serde_with::TimestampSeconds")]
    #[serde(rename = "iat")]
    pub issued_at: SystemTime,
    #[serde_as(as = "Option<serde_with::TimestampSeconds>")]
    #[serde(rename = "exp", default)]
    pub expires_at: Option<SystemTime>,
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        Single(String),
        Multiple(Vec<String>),
    }

    Ok(match Option::<Audience>::deserialize(deserializer)? {
        Some(Audience::Single(s)) => vec![s],
        Some(Audience::Multiple(v)) => v,
        None => Vec::new(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("subject is empty")]
    EmptySubject,
    #[error("subject exceeds 128 bytes")]
    SubjectTooLong,
    #[error("issuer is empty")]
    EmptyIssuer,
    #[error("issuer exceeds 128 bytes")]
    IssuerTooLong,
}

impl RoomSyncClaims {
    /// The shape checks a raw JWT decode doesn't give you for free: non-empty,
    /// bounded-length issuer and subject.
    pub fn validate_shape(&self) -> Result<(), ClaimsError> {
        if self.subject.is_empty() {
            return Err(ClaimsError::EmptySubject);
        }
        if self.subject.len() > 128 {
            return Err(ClaimsError::SubjectTooLong);
        }
        if self.issuer.is_empty() {
            return Err(ClaimsError::EmptyIssuer);
        }
        if self.issuer.len() > 128 {
            return Err(ClaimsError::IssuerTooLong);
        }
        Ok(())
    }

    pub fn user_id(&self) -> UserId {
        UserId::from(self.subject.clone())
    }
}
