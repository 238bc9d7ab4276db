//! Delegate invitation models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Invitation allowing a delegate to help with a teacher's classroom.
/// Only the SHA-256 of the token is stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invitation {
    pub id: String,
    pub teacher_id: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: String,
    pub used_at: Option<String>,
    pub used_by: Option<String>,
    pub created_at: String,
}

impl Invitation {
    /// Check if the invitation has expired
    pub fn is_expired(&self) -> bool {
        if let Ok(expires) = chrono::DateTime::parse_from_rfc3339(&self.expires_at) {
            expires < chrono::Utc::now()
        } else {
            true // Treat parse errors as expired
        }
    }

    /// Check if the invitation has been used
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}

/// Returned once, at creation, with the plaintext token
#[derive(Debug, Clone, Serialize)]
pub struct CreatedInvitation {
    #[serde(flatten)]
    pub invitation: Invitation,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    /// Optional addressee; when set only this email may accept
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
}
