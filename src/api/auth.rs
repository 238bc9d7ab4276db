use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Sqlite, SqliteConnection};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::db::{
    actions, find_school_by_id, find_school_for_email, find_user_by_email, find_user_by_username,
    insert_user, resource_types, user_response, LoginRequest, LoginResponse, NewUser, Role,
    SignupRequest, User, UserResponse,
};
use crate::AppState;

use super::audit::audit_log;
use super::error::{ApiError, ValidationErrorBuilder};
use super::invitations::{load_open_invitation, redeem_invitation};
use super::validation::{validate_email, validate_name, validate_password, validate_username};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random 256-bit token, hex encoded
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_or_500(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))
}

/// Create a session row and return the plaintext token
pub async fn create_session<'e, E>(db: E, user_id: &str, days: i64) -> Result<String, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let token = generate_token();
    let expires_at = crate::db::timestamp(chrono::Utc::now() + chrono::Duration::days(days));

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(crate::db::now())
    .execute(db)
    .await?;

    Ok(token)
}

fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .build()
}

/// Extract the session token from the Authorization header or the session cookie
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
}

/// Get the current user from a session token
pub async fn get_current_user(pool: &sqlx::SqlitePool, token: &str) -> Result<User, ApiError> {
    let user: Option<User> = sqlx::query_as(
        r#"
        SELECT u.* FROM sessions s
        INNER JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = ? AND s.expires_at > ?
        "#,
    )
    .bind(hash_token(token))
    .bind(crate::db::now())
    .fetch_optional(pool)
    .await?;

    user.ok_or_else(|| ApiError::unauthorized("Session expired or invalid"))
}

/// Extractor for getting the current authenticated user from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers, &state.config.auth.cookie_name)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        get_current_user(&state.db, &token).await
    }
}

// -------------------------------------------------------------------------
// Role checks shared by the handlers
// -------------------------------------------------------------------------

pub fn require_role(user: &User, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&user.role_enum()) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "This action is not available to the {} role",
            user.role
        )))
    }
}

/// Schools an admin may act on: `None` means every school (super admin)
pub fn admin_scope(user: &User) -> Result<Option<String>, ApiError> {
    match user.role_enum() {
        Role::SuperAdmin => Ok(None),
        Role::SchoolAdmin => user
            .school_id
            .clone()
            .map(Some)
            .ok_or_else(|| ApiError::forbidden("School admin is not assigned to a school")),
        _ => Err(ApiError::forbidden("Administrator access required")),
    }
}

pub fn require_super_admin(user: &User) -> Result<(), ApiError> {
    if user.is_super_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Super admin access required"))
    }
}

/// Unverified teachers can sign in but not change their classroom
pub fn require_verified_teacher(user: &User) -> Result<(), ApiError> {
    require_role(user, &[Role::Teacher])?;
    if user.verified {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "Your teacher account is awaiting verification by a school admin",
        ))
    }
}

/// Require the caller to administer `school_id`
pub fn require_school_admin(user: &User, school_id: &str) -> Result<(), ApiError> {
    admin_scope(user)?;
    if user.administers(school_id) {
        Ok(())
    } else {
        Err(ApiError::forbidden("You do not administer this school"))
    }
}

// -------------------------------------------------------------------------
// Handlers
// -------------------------------------------------------------------------

/// Signup endpoint
///
/// Creates a teacher or parent account, a delegate account when an
/// invitation token is supplied, or claims a placeholder teacher (by
/// `school_id` + `username`, or by the email an admin attached to it).
pub async fn signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<LoginResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&req.email));
    errors.check("password", validate_password(&req.password));
    errors.check("name", validate_name(&req.name, "Name"));
    if let Some(ref username) = req.username {
        errors.check("username", validate_username(username));
        if req.school_id.is_none() {
            errors.add("school_id", "school_id is required when claiming by username");
        }
    }
    errors.finish()?;

    let email = req.email.trim().to_lowercase();
    let name = req.name.trim().to_string();
    let password_hash = hash_or_500(&req.password)?;

    let mut tx = state.db.begin().await?;

    let (user, action) = if let Some(ref token) = req.invitation_token {
        let invitation = load_open_invitation(&mut tx, token, Some(&email)).await?;
        if find_user_by_email(&mut *tx, &email).await?.is_some() {
            return Err(ApiError::conflict(
                "An account with this email already exists; log in to accept the invitation",
            ));
        }
        let teacher_school: Option<(Option<String>,)> =
            sqlx::query_as("SELECT school_id FROM users WHERE id = ?")
                .bind(&invitation.teacher_id)
                .fetch_optional(&mut *tx)
                .await?;

        let user = insert_user(
            &mut *tx,
            &NewUser {
                email: Some(email.clone()),
                username: None,
                name,
                role: Role::Delegate,
                school_id: teacher_school.and_then(|(s,)| s),
                password_hash: Some(password_hash),
                verified: true,
                placeholder: false,
            },
        )
        .await?;
        redeem_invitation(&mut tx, &invitation, &user.id).await?;
        (user, actions::INVITATION_ACCEPT)
    } else if let (Some(username), Some(school_id)) = (&req.username, &req.school_id) {
        let placeholder = find_user_by_username(&mut *tx, school_id, username)
            .await?
            .ok_or_else(|| ApiError::not_found("No account with this username at the school"))?;
        if find_user_by_email(&mut *tx, &email)
            .await?
            .is_some_and(|u| u.id != placeholder.id)
        {
            return Err(ApiError::conflict("An account with this email already exists"));
        }
        let user = claim_placeholder(&mut tx, placeholder, &email, &name, &password_hash).await?;
        (user, actions::USER_CLAIM)
    } else {
        match find_user_by_email(&mut *tx, &email).await? {
            Some(existing) if is_claimable(&existing) => {
                let user = claim_placeholder(&mut tx, existing, &email, &name, &password_hash).await?;
                (user, actions::USER_CLAIM)
            }
            Some(_) => {
                return Err(ApiError::conflict("An account with this email already exists"));
            }
            None => {
                let user = create_self_service(&mut tx, &req, &email, name, password_hash).await?;
                (user, actions::USER_CREATE)
            }
        }
    };

    let token = create_session(&mut *tx, &user.id, state.config.auth.session_days).await?;
    let response = user_response(&mut *tx, user.clone()).await?;
    tx.commit().await?;

    audit_log(
        &state,
        action,
        resource_types::USER,
        Some(&user.id),
        Some(&user.id),
        user.school_id.as_deref(),
        Some(serde_json::json!({ "role": user.role })),
    )
    .await;
    tracing::info!(user_id = %user.id, role = %user.role, action, "Account signup");

    let jar = jar.add(session_cookie(&state.config.auth, token.clone()));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(LoginResponse {
            token,
            user: response,
        }),
    ))
}

/// Teacher rows created by an admin or an import carry no password until claimed
fn is_claimable(user: &User) -> bool {
    user.role_enum() == Role::Teacher && user.password_hash.is_none()
}

async fn claim_placeholder(
    conn: &mut SqliteConnection,
    placeholder: User,
    email: &str,
    name: &str,
    password_hash: &str,
) -> Result<User, ApiError> {
    if !is_claimable(&placeholder) {
        return Err(ApiError::conflict("This account has already been claimed"));
    }

    // The claimant has not proven they are the teacher; an admin re-verifies.
    let user: User = sqlx::query_as(
        r#"
        UPDATE users
        SET email = ?, name = ?, password_hash = ?, placeholder = 0, verified = 0, updated_at = ?
        WHERE id = ? AND role = 'teacher' AND password_hash IS NULL
        RETURNING *
        "#,
    )
    .bind(email)
    .bind(name)
    .bind(password_hash)
    .bind(crate::db::now())
    .bind(&placeholder.id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::conflict("This account has already been claimed"))?;

    Ok(user)
}

async fn create_self_service(
    conn: &mut SqliteConnection,
    req: &SignupRequest,
    email: &str,
    name: String,
    password_hash: String,
) -> Result<User, ApiError> {
    let role = match req.role.as_deref() {
        None => Role::Parent,
        Some(r) => r
            .parse::<Role>()
            .map_err(|e| ApiError::validation_field("role", e))?,
    };
    if !role.is_self_service() {
        return Err(ApiError::validation_field(
            "role",
            "Only teacher and parent accounts can sign up directly",
        ));
    }

    let requested_school = match req.school_id.as_deref() {
        Some(id) => Some(
            find_school_by_id(&mut *conn, id)
                .await?
                .ok_or_else(|| ApiError::validation_field("school_id", "Unknown school"))?,
        ),
        None => None,
    };

    let (school_id, verified) = match role {
        Role::Teacher => match find_school_for_email(&mut *conn, email).await? {
            // The email domain vouches for the teacher
            Some(school) => (Some(school.id), true),
            None => (requested_school.map(|s| s.id), false),
        },
        _ => (requested_school.map(|s| s.id), true),
    };

    let user = insert_user(
        &mut *conn,
        &NewUser {
            email: Some(email.to_string()),
            username: None,
            name,
            role,
            school_id,
            password_hash: Some(password_hash),
            verified,
            placeholder: false,
        },
    )
    .await?;

    Ok(user)
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let user = find_user_by_email(&state.db, &request.email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let valid = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&request.password, hash));
    if !valid {
        tracing::info!(user_id = %user.id, "Failed login attempt");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    sqlx::query("DELETE FROM sessions WHERE user_id = ? AND expires_at <= ?")
        .bind(&user.id)
        .bind(crate::db::now())
        .execute(&state.db)
        .await?;

    let token = create_session(&state.db, &user.id, state.config.auth.session_days).await?;
    let response = user_response(&state.db, user).await?;

    let jar = jar.add(session_cookie(&state.config.auth, token.clone()));
    Ok((
        jar,
        Json(LoginResponse {
            token,
            user: response,
        }),
    ))
}

/// Logout endpoint: drops the session and clears the cookie
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(StatusCode, CookieJar), ApiError> {
    let cookie_name = state.config.auth.cookie_name.clone();
    let token = extract_token(&headers, &cookie_name)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(hash_token(&token))
        .execute(&state.db)
        .await?;

    let jar = jar.remove(Cookie::build((cookie_name, "")).path("/"));
    Ok((StatusCode::NO_CONTENT, jar))
}

/// Current user endpoint
pub async fn me(State(state): State<Arc<AppState>>, user: User) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(user_response(&state.db, user).await?))
}

/// Ensure the configured super admin account exists
pub async fn ensure_super_admin(db: &sqlx::SqlitePool, config: &AuthConfig) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.super_admin_email, &config.super_admin_password)
    else {
        return Ok(());
    };

    if let Some(existing) = find_user_by_email(db, email).await? {
        if !existing.is_super_admin() {
            tracing::warn!(
                email = %email,
                role = %existing.role,
                "Configured super admin email belongs to a non-admin account; leaving it unchanged"
            );
        }
        return Ok(());
    }

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    insert_user(
        db,
        &NewUser {
            email: Some(email.clone()),
            username: None,
            name: "Super Admin".to_string(),
            role: Role::SuperAdmin,
            school_id: None,
            password_hash: Some(password_hash),
            verified: true,
            placeholder: false,
        },
    )
    .await?;

    tracing::info!(email = %email, "Created super admin account");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("bookworm1").unwrap();
        assert!(verify_password("bookworm1", &hash));
        assert!(!verify_password("bookworm2", &hash));
        assert!(!verify_password("bookworm1", "not-a-hash"));
    }

    #[test]
    fn test_tokens_are_random_and_hashed() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn test_extract_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "bookworm_session=from-cookie".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "bookworm_session").as_deref(),
            Some("from-cookie")
        );

        headers.insert(AUTHORIZATION, "Bearer from-header".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "bookworm_session").as_deref(),
            Some("from-header")
        );
        assert!(extract_token(&HeaderMap::new(), "bookworm_session").is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let user = insert_user(
            &pool,
            &NewUser {
                email: Some("parent@example.com".to_string()),
                username: None,
                name: "Pat Parent".to_string(),
                role: Role::Parent,
                school_id: None,
                password_hash: None,
                verified: true,
                placeholder: false,
            },
        )
        .await
        .unwrap();

        let live = create_session(&pool, &user.id, 1).await.unwrap();
        assert_eq!(get_current_user(&pool, &live).await.unwrap().id, user.id);

        let stale = create_session(&pool, &user.id, -1).await.unwrap();
        let err = get_current_user(&pool, &stale).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ensure_super_admin_is_idempotent() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let config = AuthConfig {
            super_admin_email: Some("root@district.org".to_string()),
            super_admin_password: Some("changeme1".to_string()),
            ..Default::default()
        };

        ensure_super_admin(&pool, &config).await.unwrap();
        ensure_super_admin(&pool, &config).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'super_admin'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_admin_scope() {
        let mut user = User {
            id: "u".to_string(),
            email: None,
            username: None,
            name: "Admin".to_string(),
            role: "school_admin".to_string(),
            school_id: Some("s1".to_string()),
            password_hash: None,
            verified: true,
            placeholder: false,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(admin_scope(&user).unwrap().as_deref(), Some("s1"));
        assert!(require_school_admin(&user, "s1").is_ok());
        assert!(require_school_admin(&user, "s2").is_err());

        user.role = "super_admin".to_string();
        assert_eq!(admin_scope(&user).unwrap(), None);

        user.role = "parent".to_string();
        assert!(admin_scope(&user).is_err());
    }
}
