//! User and role models.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};

/// Account roles. School admins are scoped to one school, super admins to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Delegate,
    Parent,
    SchoolAdmin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::SchoolAdmin | Role::SuperAdmin)
    }

    /// Roles an account can pick for itself at signup
    pub fn is_self_service(&self) -> bool {
        matches!(self, Role::Teacher | Role::Parent)
    }

    /// Check if this role may assign `target` to another account
    pub fn can_assign(&self, target: Role) -> bool {
        match self {
            Role::SuperAdmin => true,
            Role::SchoolAdmin => !matches!(target, Role::SchoolAdmin | Role::SuperAdmin),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Delegate => "delegate",
            Role::Parent => "parent",
            Role::SchoolAdmin => "school_admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "teacher" => Ok(Role::Teacher),
            "delegate" => Ok(Role::Delegate),
            "parent" => Ok(Role::Parent),
            "school_admin" => Ok(Role::SchoolAdmin),
            "super_admin" => Ok(Role::SuperAdmin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: String,
    pub role: String,
    pub school_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub verified: bool,
    pub placeholder: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Stored roles are written through `Role::as_str`, unknown values degrade to parent
    pub fn role_enum(&self) -> Role {
        self.role.parse().unwrap_or(Role::Parent)
    }

    pub fn is_super_admin(&self) -> bool {
        self.role_enum() == Role::SuperAdmin
    }

    /// Whether this user administers the given school
    pub fn administers(&self, school_id: &str) -> bool {
        match self.role_enum() {
            Role::SuperAdmin => true,
            Role::SchoolAdmin => self.school_id.as_deref() == Some(school_id),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: String,
    pub role: String,
    pub school_id: Option<String>,
    pub verified: bool,
    pub placeholder: bool,
    /// Teachers this account may act for (delegates only)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub delegate_for: Vec<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            name: user.name,
            role: user.role,
            school_id: user.school_id,
            verified: user.verified,
            placeholder: user.placeholder,
            delegate_for: Vec::new(),
            created_at: user.created_at,
        }
    }
}

impl UserResponse {
    pub fn with_delegate_for(mut self, teacher_ids: Vec<String>) -> Self {
        self.delegate_for = teacher_ids;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    /// teacher or parent; ignored when an invitation token is supplied
    pub role: Option<String>,
    pub school_id: Option<String>,
    /// Claims the placeholder teacher with this username in `school_id`
    pub username: Option<String>,
    /// Delegate invitation token; creates a delegate account
    pub invitation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub name: String,
    pub role: String,
    pub school_id: Option<String>,
    pub password: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub role: Option<String>,
    pub school_id: Option<String>,
    pub verified: Option<bool>,
    /// Setting an email on a placeholder account turns it into a claimable account
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UserQuery {
    pub role: Option<String>,
    pub school_id: Option<String>,
    pub placeholder: Option<bool>,
}

/// Fields for inserting a user row
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: String,
    pub role: Role,
    pub school_id: Option<String>,
    pub password_hash: Option<String>,
    pub verified: bool,
    pub placeholder: bool,
}

pub async fn insert_user<'e, E>(db: E, new: &NewUser) -> Result<User, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::db::now();

    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, username, name, role, school_id, password_hash,
                           verified, placeholder, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(new.email.as_deref().map(|e| e.trim().to_lowercase()))
    .bind(&new.username)
    .bind(&new.name)
    .bind(new.role.as_str())
    .bind(&new.school_id)
    .bind(&new.password_hash)
    .bind(new.verified)
    .bind(new.placeholder)
    .bind(&now)
    .bind(&now)
    .fetch_one(db)
    .await
}

pub async fn find_user_by_id<'e, E>(db: E, id: &str) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_user_by_email<'e, E>(db: E, email: &str) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(email.trim().to_lowercase())
        .fetch_optional(db)
        .await
}

pub async fn find_user_by_username<'e, E>(
    db: E,
    school_id: &str,
    username: &str,
) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM users WHERE school_id = ? AND username = ?")
        .bind(school_id)
        .bind(username)
        .fetch_optional(db)
        .await
}

/// Pick `base`, or `base-2`, `base-3`, ... if taken within the school
pub async fn unique_username(
    conn: &mut SqliteConnection,
    school_id: &str,
    base: &str,
) -> Result<String, sqlx::Error> {
    let mut candidate = base.to_string();
    let mut n = 2;
    while find_user_by_username(&mut *conn, school_id, &candidate)
        .await?
        .is_some()
    {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    Ok(candidate)
}

/// Teacher ids a delegate is assigned to
pub async fn delegate_teacher_ids<'e, E>(db: E, delegate_id: &str) -> Result<Vec<String>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT teacher_id FROM delegate_teachers WHERE delegate_id = ? ORDER BY created_at",
    )
    .bind(delegate_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn is_delegate_for<'e, E>(db: E, delegate_id: &str, teacher_id: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let found: Option<(String,)> = sqlx::query_as(
        "SELECT delegate_id FROM delegate_teachers WHERE delegate_id = ? AND teacher_id = ?",
    )
    .bind(delegate_id)
    .bind(teacher_id)
    .fetch_optional(db)
    .await?;
    Ok(found.is_some())
}

/// Build the API view of a user, including the delegate list for delegates
pub async fn user_response<'e, E>(db: E, user: User) -> Result<UserResponse, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    if user.role_enum() == Role::Delegate {
        let teachers = delegate_teacher_ids(db, &user.id).await?;
        Ok(UserResponse::from(user).with_delegate_for(teachers))
    } else {
        Ok(UserResponse::from(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_names() {
        for role in [
            Role::Teacher,
            Role::Delegate,
            Role::Parent,
            Role::SchoolAdmin,
            Role::SuperAdmin,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("librarian".parse::<Role>().is_err());
    }

    #[test]
    fn test_school_admin_cannot_grant_admin_roles() {
        assert!(Role::SchoolAdmin.can_assign(Role::Teacher));
        assert!(Role::SchoolAdmin.can_assign(Role::Parent));
        assert!(!Role::SchoolAdmin.can_assign(Role::SchoolAdmin));
        assert!(!Role::SchoolAdmin.can_assign(Role::SuperAdmin));
        assert!(Role::SuperAdmin.can_assign(Role::SchoolAdmin));
        assert!(!Role::Teacher.can_assign(Role::Delegate));
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let pool = crate::db::init_in_memory().await.unwrap();
        insert_user(
            &pool,
            &NewUser {
                email: Some("Ms.Frizzle@Example.org".to_string()),
                username: None,
                name: "Valerie Frizzle".to_string(),
                role: Role::Teacher,
                school_id: None,
                password_hash: None,
                verified: false,
                placeholder: false,
            },
        )
        .await
        .unwrap();

        let found = find_user_by_email(&pool, "ms.frizzle@example.ORG").await.unwrap();
        assert_eq!(found.unwrap().name, "Valerie Frizzle");
    }

    #[tokio::test]
    async fn test_stored_email_is_trimmed_and_unique() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let new = NewUser {
            email: Some(" New@Lincoln.edu ".to_string()),
            username: None,
            name: "New Teacher".to_string(),
            role: Role::Teacher,
            school_id: None,
            password_hash: None,
            verified: true,
            placeholder: false,
        };
        let user = insert_user(&pool, &new).await.unwrap();
        assert_eq!(user.email.as_deref(), Some("new@lincoln.edu"));
        assert!(find_user_by_email(&pool, "new@lincoln.edu").await.unwrap().is_some());

        let duplicate = NewUser {
            email: Some("new@lincoln.edu".to_string()),
            ..new
        };
        assert!(insert_user(&pool, &duplicate).await.is_err());
    }
}
