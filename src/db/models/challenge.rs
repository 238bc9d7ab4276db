//! Book challenge models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    UnderReview,
    Approved,
    Denied,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChallengeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "under_review" => Ok(Self::UnderReview),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            _ => Err(format!(
                "Invalid status '{}'. Must be one of: pending, under_review, approved, denied",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookChallenge {
    pub id: String,
    pub book_id: String,
    pub parent_id: String,
    pub school_id: String,
    pub reason: String,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub review_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Challenge joined with the book and the people involved, for review queues
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChallengeDetail {
    pub id: String,
    pub book_id: String,
    pub book_title: String,
    pub book_isbn: Option<String>,
    pub teacher_id: String,
    pub teacher_name: String,
    pub parent_id: String,
    pub parent_name: String,
    pub school_id: String,
    pub reason: String,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub review_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChallengeRequest {
    pub book_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewChallengeRequest {
    pub id: String,
    pub status: String,
    pub review_notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChallengeQuery {
    pub status: Option<String>,
    /// Super admins may narrow the queue to one school
    pub school_id: Option<String>,
}

pub const CHALLENGE_DETAIL_SELECT: &str = r#"
    SELECT c.id, c.book_id, b.title AS book_title, b.isbn AS book_isbn,
           b.teacher_id, t.name AS teacher_name,
           c.parent_id, p.name AS parent_name,
           c.school_id, c.reason, c.status, c.reviewed_by, c.reviewed_at, c.review_notes,
           c.created_at, c.updated_at
    FROM book_challenges c
    INNER JOIN classroom_books b ON c.book_id = b.id
    INNER JOIN users t ON b.teacher_id = t.id
    INNER JOIN users p ON c.parent_id = p.id
"#;
