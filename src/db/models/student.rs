//! Parent/student association models.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StudentLinkStatus {
    Pending,
    Verified,
    Rejected,
}

impl StudentLinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for StudentLinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StudentLinkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!(
                "Invalid status '{}'. Must be one of: pending, verified, rejected",
                s
            )),
        }
    }
}

/// A parent's claim to be the guardian of a student at a school
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParentStudent {
    pub id: String,
    pub parent_id: String,
    pub student_name: String,
    pub grade: String,
    pub school_id: String,
    pub teacher_id: Option<String>,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
}

impl ParentStudent {
    pub fn status_enum(&self) -> StudentLinkStatus {
        self.status.parse().unwrap_or(StudentLinkStatus::Pending)
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaimStudentRequest {
    pub student_name: String,
    pub grade: String,
    pub school_id: String,
    pub teacher_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewStudentRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct StudentQuery {
    pub status: Option<String>,
    pub school_id: Option<String>,
}

/// Whether the parent has a verified student at the school
pub async fn has_verified_student<'e, E>(db: E, parent_id: &str, school_id: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM parent_students WHERE parent_id = ? AND school_id = ? AND status = 'verified'",
    )
    .bind(parent_id)
    .bind(school_id)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}
