pub mod audit;
pub mod auth;
mod books;
mod bulk;
mod challenges;
pub mod error;
mod invitations;
pub mod metrics;
mod quota;
pub mod rate_limit;
mod schools;
mod students;
mod users;
pub mod validation;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public, stricter rate limit)
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Handlers authenticate through the `User` extractor
    let api_routes = Router::new()
        // Schools
        .route("/schools", get(schools::list_public_schools))
        .route("/admin/schools", get(schools::list_schools))
        .route("/admin/schools", post(schools::create_school))
        .route("/admin/schools/:id", patch(schools::update_school))
        .route("/admin/schools/:id", delete(schools::delete_school))
        .route("/admin/schools/:id/staff", post(bulk::import_staff))
        // Users
        .route("/admin/users", get(users::list_users))
        .route("/admin/users", post(users::create_user))
        .route("/admin/users/:id", patch(users::update_user))
        .route("/admin/users/:id", delete(users::delete_user))
        // Classroom books
        .route("/books", get(books::list_books))
        .route("/books", post(books::create_book))
        .route("/books/:id", patch(books::update_book))
        .route("/books/:id", delete(books::delete_book))
        .route("/books/lookup/:isbn", get(books::lookup_book))
        // Challenges
        .route("/challenges", post(challenges::create_challenge))
        .route("/challenges", get(challenges::list_my_challenges))
        .route("/admin/challenges", get(challenges::list_challenges))
        .route("/admin/challenges", patch(challenges::review_challenge))
        // Parent/student associations
        .route("/parent/students", post(students::claim_student))
        .route("/parent/students", get(students::list_my_students))
        .route("/admin/students", get(students::list_students))
        .route("/admin/students/:id", patch(students::review_student))
        // Delegates
        .route("/invitations", post(invitations::create_invitation))
        .route("/invitations", get(invitations::list_invitations))
        .route("/invitations/accept", post(invitations::accept_invitation))
        .route("/invitations/:id", delete(invitations::revoke_invitation))
        .route("/delegates", get(invitations::list_delegates))
        .route("/delegates/:id", delete(invitations::remove_delegate))
        // Bulk import/export
        .route("/admin/import", post(bulk::import_books))
        .route("/admin/export", get(bulk::export_books))
        // Book API quota
        .route("/admin/quota", get(quota::get_quota))
        .route("/admin/cache/validate", post(quota::run_cache_validation))
        // Audit log
        .route("/admin/audit", get(audit::list_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books_api::{BookApiError, BookLookup};
    use crate::config::Config;
    use crate::db::{insert_book, insert_school, insert_user, BookMetadata, NewBook, NewUser, Role, School, User};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct NoLookup;

    #[async_trait::async_trait]
    impl BookLookup for NoLookup {
        async fn lookup(&self, _isbn: &str) -> Result<Option<BookMetadata>, BookApiError> {
            Ok(None)
        }
    }

    struct TestApp {
        router: Router,
        state: Arc<AppState>,
    }

    impl TestApp {
        async fn new() -> Self {
            let db = crate::db::init_in_memory().await.unwrap();
            let state = Arc::new(AppState::new(Config::default(), db, Arc::new(NoLookup)));
            Self {
                router: create_router(state.clone()),
                state,
            }
        }

        async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {}", token));
            }
            let body = match body {
                Some(value) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };

            let response = self
                .router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        async fn send_csv(&self, uri: &str, token: &str, csv: &str) -> (StatusCode, Value) {
            let request = Request::builder()
                .method("POST")
                .uri(uri)
                .header("authorization", format!("Bearer {}", token))
                .header("content-type", "text/csv")
                .body(Body::from(csv.to_string()))
                .unwrap();
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        async fn school(&self, name: &str, slug: &str) -> School {
            insert_school(&self.state.db, name, slug, None).await.unwrap()
        }

        /// Insert a verified account and open a session for it
        async fn account(&self, email: &str, role: Role, school_id: Option<&str>) -> (User, String) {
            let user = insert_user(
                &self.state.db,
                &NewUser {
                    email: Some(email.to_string()),
                    username: None,
                    name: email.split('@').next().unwrap_or(email).to_string(),
                    role,
                    school_id: school_id.map(str::to_string),
                    password_hash: None,
                    verified: true,
                    placeholder: false,
                },
            )
            .await
            .unwrap();
            let token = tokio_test::assert_ok!(auth::create_session(&self.state.db, &user.id, 1).await);
            (user, token)
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new().await;
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_signup_rejects_duplicate_email() {
        let app = TestApp::new().await;
        let body = json!({ "email": "Pat@Example.com", "password": "reading123", "name": "Pat Parent" });

        let (status, created) = app.send("POST", "/api/auth/signup", None, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["user"]["role"], "parent");
        assert_eq!(created["user"]["email"], "pat@example.com");

        let token = created["token"].as_str().unwrap().to_string();
        let (status, me) = app.send("GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["name"], "Pat Parent");

        let again = json!({ "email": "pat@example.com", "password": "reading456", "name": "Other Pat" });
        let (status, err) = app.send("POST", "/api/auth/signup", None, Some(again)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["code"], "conflict");
    }

    #[tokio::test]
    async fn test_signup_validation_and_login() {
        let app = TestApp::new().await;

        let weak = json!({ "email": "not-an-email", "password": "short", "name": "X" });
        let (status, err) = app.send("POST", "/api/auth/signup", None, Some(weak)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["details"]["password"].is_array());

        let body = json!({ "email": "reader@example.com", "password": "reading123", "name": "Reader" });
        app.send("POST", "/api/auth/signup", None, Some(body)).await;

        let bad = json!({ "email": "reader@example.com", "password": "wrong1234" });
        let (status, _) = app.send("POST", "/api/auth/login", None, Some(bad)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let good = json!({ "email": "READER@example.com", "password": "reading123" });
        let (status, session) = app.send("POST", "/api/auth/login", None, Some(good)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(session["token"].is_string());
    }

    #[tokio::test]
    async fn test_teacher_signup_by_email_domain_is_verified() {
        let app = TestApp::new().await;
        insert_school(&app.state.db, "Lincoln Elementary", "lincoln", Some("lincoln.edu"))
            .await
            .unwrap();

        let body = json!({
            "email": "ms.reed@lincoln.edu",
            "password": "reading123",
            "name": "Ms Reed",
            "role": "teacher",
        });
        let (status, created) = app.send("POST", "/api/auth/signup", None, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["user"]["verified"], true);
        assert!(created["user"]["school_id"].is_string());

        let admin = json!({
            "email": "boss@example.com",
            "password": "reading123",
            "name": "Boss",
            "role": "school_admin",
        });
        let (status, _) = app.send("POST", "/api/auth/signup", None, Some(admin)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_school_management_is_scoped() {
        let app = TestApp::new().await;
        let (_, root) = app.account("root@district.org", Role::SuperAdmin, None).await;

        let body = json!({ "name": "Lincoln Elementary", "email_domain": "Lincoln.edu" });
        let (status, lincoln) = app.send("POST", "/api/admin/schools", Some(&root), Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(lincoln["slug"], "lincoln-elementary");
        assert_eq!(lincoln["email_domain"], "lincoln.edu");

        let (status, _) = app.send("POST", "/api/admin/schools", Some(&root), Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let other = json!({ "name": "Roosevelt Middle", "slug": "roosevelt" });
        let (status, _) = app.send("POST", "/api/admin/schools", Some(&root), Some(other)).await;
        assert_eq!(status, StatusCode::CREATED);

        let lincoln_id = lincoln["id"].as_str().unwrap();
        let (_, admin) = app.account("admin@lincoln.edu", Role::SchoolAdmin, Some(lincoln_id)).await;
        let (status, _) = app
            .send("POST", "/api/admin/schools", Some(&admin), Some(json!({ "name": "Rogue School" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, visible) = app.send("GET", "/api/admin/schools", Some(&admin), None).await;
        assert_eq!(visible.as_array().unwrap().len(), 1);
        assert_eq!(visible[0]["id"], lincoln_id);

        let (status, public) = app.send("GET", "/api/schools", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(public.as_array().unwrap().len(), 2);

        // Creation is audited; the school admin only sees their school's entries
        let (_, audit) = app.send("GET", "/api/admin/audit?action=school.create", Some(&root), None).await;
        assert_eq!(audit["total"], 2);
        let (_, audit) = app.send("GET", "/api/admin/audit?action=school.create", Some(&admin), None).await;
        assert_eq!(audit["total"], 1);
    }

    #[tokio::test]
    async fn test_challenge_review_requires_admin_of_school() {
        let app = TestApp::new().await;
        let lincoln = app.school("Lincoln Elementary", "lincoln").await;
        let roosevelt = app.school("Roosevelt Middle", "roosevelt").await;

        let (teacher, _) = app.account("teacher@lincoln.edu", Role::Teacher, Some(&lincoln.id)).await;
        let book = insert_book(
            &app.state.db,
            &NewBook {
                teacher_id: teacher.id.clone(),
                isbn: None,
                title: "Bridge to Terabithia".to_string(),
                authors: "Katherine Paterson".to_string(),
                quantity: 1,
                imported: false,
                added_by_delegate: false,
                added_by: None,
            },
        )
        .await
        .unwrap();

        let (parent, parent_token) = app.account("parent@example.com", Role::Parent, None).await;
        let (_, lincoln_admin) = app.account("admin@lincoln.edu", Role::SchoolAdmin, Some(&lincoln.id)).await;
        let (_, roosevelt_admin) =
            app.account("admin@roosevelt.edu", Role::SchoolAdmin, Some(&roosevelt.id)).await;

        let challenge = json!({ "book_id": book.id, "reason": "Too mature for second graders." });

        // No verified student yet
        let (status, _) = app.send("POST", "/api/challenges", Some(&parent_token), Some(challenge.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let claim = json!({ "student_name": "Sam", "grade": "2", "school_id": lincoln.id });
        let (status, link) = app.send("POST", "/api/parent/students", Some(&parent_token), Some(claim)).await;
        assert_eq!(status, StatusCode::CREATED);
        let link_uri = format!("/api/admin/students/{}", link["id"].as_str().unwrap());
        let (status, _) = app
            .send("PATCH", &link_uri, Some(&lincoln_admin), Some(json!({ "status": "verified" })))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, created) = app.send("POST", "/api/challenges", Some(&parent_token), Some(challenge.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        assert_eq!(created["parent_id"], parent.id.as_str());
        let id = created["id"].as_str().unwrap().to_string();

        let (status, _) = app.send("POST", "/api/challenges", Some(&parent_token), Some(challenge)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let review = json!({ "id": id, "status": "under_review" });
        let (status, _) = app.send("PATCH", "/api/admin/challenges", Some(&parent_token), Some(review.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app
            .send("PATCH", "/api/admin/challenges", Some(&roosevelt_admin), Some(review.clone()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, reviewed) = app.send("PATCH", "/api/admin/challenges", Some(&lincoln_admin), Some(review)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reviewed["status"], "under_review");
        assert!(reviewed["reviewed_at"].is_string());

        let bogus = json!({ "id": id, "status": "banned" });
        let (status, _) = app.send("PATCH", "/api/admin/challenges", Some(&lincoln_admin), Some(bogus)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Any status can follow any other
        for next in ["approved", "pending", "denied"] {
            let body = json!({ "id": id, "status": next, "review_notes": "Discussed with the teacher" });
            let (status, updated) = app.send("PATCH", "/api/admin/challenges", Some(&lincoln_admin), Some(body)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(updated["status"], next);
        }

        let (_, queue) = app.send("GET", "/api/admin/challenges?status=denied", Some(&roosevelt_admin), None).await;
        assert_eq!(queue.as_array().unwrap().len(), 0);
        let (_, queue) = app.send("GET", "/api/admin/challenges?status=denied", Some(&lincoln_admin), None).await;
        assert_eq!(queue.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_student_review_only_from_pending() {
        let app = TestApp::new().await;
        let school = app.school("Lincoln Elementary", "lincoln").await;
        let (_, parent) = app.account("parent@example.com", Role::Parent, None).await;
        let (_, admin) = app.account("admin@lincoln.edu", Role::SchoolAdmin, Some(&school.id)).await;

        let claim = json!({ "student_name": "Ada", "grade": "4", "school_id": school.id });
        let (_, link) = app.send("POST", "/api/parent/students", Some(&parent), Some(claim)).await;
        let uri = format!("/api/admin/students/{}", link["id"].as_str().unwrap());

        let (status, _) = app.send("PATCH", &uri, Some(&admin), Some(json!({ "status": "rejected" }))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.send("PATCH", &uri, Some(&admin), Some(json!({ "status": "verified" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = app.send("PATCH", &uri, Some(&parent), Some(json!({ "status": "verified" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invitation_cannot_be_accepted_twice() {
        let app = TestApp::new().await;
        let school = app.school("Lincoln Elementary", "lincoln").await;
        let (teacher, teacher_token) = app.account("teacher@lincoln.edu", Role::Teacher, Some(&school.id)).await;

        let (status, invitation) = app.send("POST", "/api/invitations", Some(&teacher_token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let token = invitation["token"].as_str().unwrap().to_string();
        assert!(invitation.get("token_hash").is_none());

        let first = json!({
            "email": "helper@example.com",
            "password": "reading123",
            "name": "Hal Helper",
            "invitation_token": token,
        });
        let (status, delegate) = app.send("POST", "/api/auth/signup", None, Some(first)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(delegate["user"]["role"], "delegate");
        assert_eq!(delegate["user"]["delegate_for"][0], teacher.id.as_str());

        let second = json!({
            "email": "another@example.com",
            "password": "reading123",
            "name": "Ann Other",
            "invitation_token": token,
        });
        let (status, _) = app.send("POST", "/api/auth/signup", None, Some(second)).await;
        assert_eq!(status, StatusCode::GONE);

        let delegate_token = delegate["token"].as_str().unwrap().to_string();
        let (status, _) = app
            .send("POST", "/api/invitations/accept", Some(&delegate_token), Some(json!({ "token": token })))
            .await;
        assert_eq!(status, StatusCode::GONE);

        // The delegate can now add books for the teacher
        let book = json!({ "teacher_id": teacher.id, "title": "Holes", "isbn": "978-0-306-40615-7" });
        let (status, created) = app.send("POST", "/api/books", Some(&delegate_token), Some(book)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["added_by_delegate"], true);
        assert_eq!(created["isbn"], "9780306406157");
    }

    #[tokio::test]
    async fn test_bulk_import_reports_partial_success() {
        let app = TestApp::new().await;
        let (_, root) = app.account("root@district.org", Role::SuperAdmin, None).await;

        let csv = "school,teacher_name,teacher_email,isbn,title,authors,quantity\n\
                   Lincoln Elementary,Ms Reed,,9780306406157,Holes,Louis Sachar,2\n\
                   Lincoln Elementary,Ms Reed,,,Wonder,R. J. Palacio,\n";
        let (status, report) = app.send_csv("/api/admin/import", &root, csv).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(report["created_books"], 2);
        assert_eq!(report["created_schools"], 1);
        assert_eq!(report["created_teachers"], 1);

        let partial = "school,teacher_name,title,quantity\n\
                       Lincoln Elementary,Ms Reed,Matilda,1\n\
                       Lincoln Elementary,Ms Reed,Frindle,zero\n";
        let (status, report) = app.send_csv("/api/admin/import", &root, partial).await;
        assert_eq!(status, StatusCode::MULTI_STATUS);
        assert_eq!(report["errors"][0]["line"], 3);

        let (status, err) = app.send_csv("/api/admin/import", &root, "title\nHoles\n").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["details"]["missing_columns"], json!(["school", "teacher_name"]));

        let (_, parent) = app.account("parent@example.com", Role::Parent, None).await;
        let (status, _) = app.send_csv("/api/admin/import", &parent, csv).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_school_admin_cannot_grant_admin_roles() {
        let app = TestApp::new().await;
        let school = app.school("Lincoln Elementary", "lincoln").await;
        let (_, admin) = app.account("admin@lincoln.edu", Role::SchoolAdmin, Some(&school.id)).await;

        let promote = json!({ "email": "new@lincoln.edu", "name": "New Admin", "role": "school_admin" });
        let (status, _) = app.send("POST", "/api/admin/users", Some(&admin), Some(promote)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let placeholder = json!({ "name": "Mr Green", "role": "teacher" });
        let (status, created) = app.send("POST", "/api/admin/users", Some(&admin), Some(placeholder)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["placeholder"], true);
        assert_eq!(created["username"], "mr-green");
        assert_eq!(created["school_id"], school.id.as_str());

        // The real teacher claims the placeholder and waits for verification
        let claim = json!({
            "email": "green@lincoln.edu",
            "password": "reading123",
            "name": "Gary Green",
            "school_id": school.id,
            "username": "mr-green",
        });
        let (status, claimed) = app.send("POST", "/api/auth/signup", None, Some(claim.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(claimed["user"]["id"], created["id"]);
        assert_eq!(claimed["user"]["verified"], false);
        assert_eq!(claimed["user"]["placeholder"], false);

        let (status, _) = app.send("POST", "/api/auth/signup", None, Some(claim)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_admin_user_creation_rules() {
        let app = TestApp::new().await;
        let school = app.school("Lincoln Elementary", "lincoln").await;
        let (_, root) = app.account("root@district.org", Role::SuperAdmin, None).await;

        let padded = json!({ "email": " New@Lincoln.edu", "name": "New Teacher", "role": "teacher", "school_id": school.id });
        let (status, created) = app.send("POST", "/api/admin/users", Some(&root), Some(padded)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["email"], "new@lincoln.edu");

        let again = json!({ "email": "new@lincoln.edu", "name": "Other", "role": "parent" });
        let (status, _) = app.send("POST", "/api/admin/users", Some(&root), Some(again)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let with_password = json!({ "name": "Mr Green", "role": "teacher", "school_id": school.id, "password": "reading123" });
        let (status, err) = app.send("POST", "/api/admin/users", Some(&root), Some(with_password)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["details"]["password"].is_array());

        let (parent, _) = app.account("parent@example.com", Role::Parent, None).await;
        let promote = json!({ "role": "school_admin" });
        let uri = format!("/api/admin/users/{}", parent.id);
        let (status, err) = app.send("PATCH", &uri, Some(&root), Some(promote)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["details"]["school_id"].is_array());

        let promote = json!({ "role": "school_admin", "school_id": school.id });
        let (status, updated) = app.send("PATCH", &uri, Some(&root), Some(promote)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["role"], "school_admin");
    }
}
