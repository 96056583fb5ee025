use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Form, Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, SignupRequest},
        jwt::{AuthUser, JwtKeys},
        password,
        repo::{Role, User},
    },
    config::AppConfig,
    error::ApiError,
    state::AppState,
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// The admin code grants the admin tier; any other accepted code is normal.
fn role_for_code(code: &str, config: &AppConfig) -> Role {
    if code == config.admin_register_code {
        Role::Admin
    } else {
        Role::Normal
    }
}

#[instrument(skip(state, form))]
pub async fn signup(
    State(state): State<AppState>,
    Form(mut form): Form<SignupRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    form.email = form.email.trim().to_lowercase();

    if form.email.is_empty() || form.password.is_empty() {
        warn!("signup with missing email or password");
        return Err(ApiError::Validation(
            "email and password are required".into(),
        ));
    }
    if !is_valid_email(&form.email) {
        warn!(email = %form.email, "signup with malformed email");
        return Err(ApiError::Validation("invalid email".into()));
    }
    if form.password.len() < 8 {
        warn!("signup password too short");
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }

    if form.code != state.config.register_code && form.code != state.config.admin_register_code {
        warn!(email = %form.email, "signup with unrecognized registration code");
        return Err(ApiError::RegistrationCode);
    }

    // A failed lookup is an infrastructure error, not "already registered".
    if User::find_by_email(&state.db, &form.email).await?.is_some() {
        warn!(email = %form.email, "email already registered");
        return Err(ApiError::EmailTaken);
    }

    let role = role_for_code(&form.code, &state.config);
    let hash = password::hash(&form.password)?;

    let user = match User::create(&state.db, &form.email, &hash, role).await {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, email = %form.email, role = ?role, "create user failed");
            return Err(e.into());
        }
    };

    // Signing failure aborts the request; the row stays and login still works.
    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, user.role)?;

    info!(user_id = %user.id, email = %user.email, role = ?user.role, "user registered");
    Ok(Json(AuthResponse {
        user: user.into(),
        token,
    }))
}

#[instrument(skip(state, form))]
pub async fn login(
    State(state): State<AppState>,
    Form(mut form): Form<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    form.email = form.email.trim().to_lowercase();

    if form.email.is_empty() || form.password.is_empty() {
        warn!("login with missing email or password");
        return Err(ApiError::Validation(
            "email and password are required".into(),
        ));
    }
    if !is_valid_email(&form.email) {
        warn!(email = %form.email, "login with malformed email");
        return Err(ApiError::Validation("invalid email".into()));
    }

    let user = match User::find_by_email(&state.db, &form.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %form.email, "login with unknown email");
            return Err(ApiError::InvalidCredentials);
        }
    };

    if !password::verify(&form.password, &user.password_hash)? {
        warn!(email = %form.email, user_id = %user.id, "login with wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, user.role)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        user: user.into(),
        token,
    }))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    match User::find_by_id(&state.db, user.id).await? {
        Some(u) => Ok(Json(u.into())),
        None => {
            warn!(user_id = %user.id, "token subject no longer exists");
            Err(ApiError::Unauthorized("user not found".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_app;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    // These go through the real router with a lazily connecting pool, so
    // they only cover paths that fail before any query is issued.
    async fn post_form(uri: &str, body: &'static str) -> (StatusCode, serde_json::Value) {
        let app = build_app(AppState::for_tests());
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                mime::APPLICATION_WWW_FORM_URLENCODED.as_ref(),
            )
            .body(Body::from(body))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn signup_rejects_empty_email() {
        let (status, body) =
            post_form("/user/signup", "email=&password=long-enough-pw&code=join-the-club").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
        assert_eq!(body["msg"], "email and password are required");
    }

    #[tokio::test]
    async fn signup_rejects_empty_password() {
        let (status, body) =
            post_form("/user/signup", "email=new%40example.com&password=&code=join-the-club").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn signup_rejects_an_empty_form() {
        let (status, body) = post_form("/user/signup", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn signup_rejects_malformed_email() {
        let (status, body) =
            post_form("/user/signup", "email=not-an-email&password=long-enough-pw&code=join-the-club")
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], "invalid email");
    }

    #[tokio::test]
    async fn signup_rejects_unknown_registration_code() {
        let (status, body) =
            post_form("/user/signup", "email=new%40example.com&password=long-enough-pw&code=guessed")
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "registration_code");
    }

    #[tokio::test]
    async fn login_rejects_missing_fields() {
        let (status, body) = post_form("/user/login", "email=new%40example.com").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn me_requires_a_bearer_token() {
        let app = build_app(AppState::for_tests());
        let req = Request::builder()
            .uri("/user/me")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_rejects_a_bogus_token() {
        let app = build_app(AppState::for_tests());
        let req = Request::builder()
            .uri("/user/me")
            .header(header::AUTHORIZATION, "Bearer bogus.token.here")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_code_yields_the_admin_tier() {
        let state = AppState::for_tests();
        assert_eq!(role_for_code("run-the-club", &state.config), Role::Admin);
        assert_eq!(role_for_code("join-the-club", &state.config), Role::Normal);
    }
}
