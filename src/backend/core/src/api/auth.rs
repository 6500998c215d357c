//! Signup, login, logout and the current-user lookup.

use super::{AppState, Endpoint};
use crate::error::{ApiError, Result};
use crate::middleware::auth::AuthContext;
use crate::password::{
    hash_password_blocking, verify_absent_user_blocking, verify_password_blocking,
};
use crate::store::NewUser;
use crate::validation::{non_empty, Email, FieldValidator, Payload, Schema, ValidateLayer};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

pub const ENDPOINTS: &[Endpoint] = &[
    Endpoint::new("POST", "/signup"),
    Endpoint::new("POST", "/login"),
    Endpoint::new("POST", "/logout"),
    Endpoint::new("GET", "/me"),
];

const INVALID_CREDENTIALS: &str = "Invalid username or password";

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/signup",
            post(signup).route_layer(ValidateLayer::new(signup_schema())),
        )
        .route(
            "/login",
            post(login).route_layer(ValidateLayer::new(credentials_schema())),
        )
        .route("/logout", post(logout))
        .route("/me", get(me).route_layer(state.auth_layer()))
}

fn credentials_schema() -> Schema {
    Schema::new()
        .field(FieldValidator::new("username").rule(non_empty("Username should be not empty")))
        .field(FieldValidator::new("password").rule(non_empty("Password should be not empty")))
}

fn signup_schema() -> Schema {
    credentials_schema()
        .field(FieldValidator::new("name").rule(non_empty("Name should be not empty")))
        .field(FieldValidator::new("email").rule(Email::new("Invalid email")))
}

#[derive(Debug, Deserialize)]
struct SignupRequest {
    username: String,
    password: String,
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Body returned whenever a session token is handed out.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub token: String,
    pub username: String,
}

async fn signup(State(state): State<AppState>, payload: Payload) -> Result<impl IntoResponse> {
    let req: SignupRequest = payload.into_json()?;

    if state.users.find_by_username(&req.username).await?.is_some() {
        return Err(ApiError::conflict(format!("{} already exists", req.username))
            .with_resource(req.username));
    }

    let password_hash = hash_password_blocking(req.password).await?;
    let user = state
        .users
        .create(NewUser {
            username: req.username,
            password_hash,
            name: req.name,
            email: req.email,
        })
        .await?;

    let token = state.authenticator.issue(&user.id)?;
    info!(username = %user.username, "User signed up");

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, state.authenticator.session_cookie(&token))],
        Json(TokenResponse {
            token,
            username: user.username,
        }),
    ))
}

async fn login(State(state): State<AppState>, payload: Payload) -> Result<impl IntoResponse> {
    let req: LoginRequest = payload.into_json()?;

    let Some(user) = state.users.find_by_username(&req.username).await? else {
        verify_absent_user_blocking(req.password).await?;
        return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
    };

    if !verify_password_blocking(req.password, user.password_hash.clone()).await? {
        return Err(ApiError::unauthorized(INVALID_CREDENTIALS).with_resource(user.username));
    }

    let token = state.authenticator.issue(&user.id)?;
    Ok((
        [(header::SET_COOKIE, state.authenticator.session_cookie(&token))],
        Json(TokenResponse {
            token,
            username: user.username,
        }),
    ))
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, state.authenticator.clear_cookie())],
        Json(json!({ "message": "User has been logged out" })),
    )
}

async fn me(State(state): State<AppState>, auth: AuthContext) -> Result<Json<TokenResponse>> {
    let user = state
        .users
        .find_by_id(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(TokenResponse {
        token: auth.token,
        username: user.username,
    }))
}
