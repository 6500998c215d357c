//! Portfolio works, keyed by title.
//!
//! Reads are public. Create, update and delete sit behind the auth guard,
//! and create/update bodies go through the work schema first.

use super::{AppState, Endpoint};
use crate::error::{ApiError, Result};
use crate::middleware::auth::AuthContext;
use crate::store::{StoreError, Work, WorkInput};
use crate::validation::{
    non_empty, EmptyOr, FieldValidator, IsObject, IsString, Pattern, Payload, Schema, Url,
    ValidateLayer,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::LazyLock;
use tracing::{info, warn};

pub const ENDPOINTS: &[Endpoint] = &[
    Endpoint::new("GET", "/"),
    Endpoint::new("GET", "/:id"),
    Endpoint::new("POST", "/"),
    Endpoint::new("PUT", "/:id"),
    Endpoint::new("DELETE", "/:id"),
];

static REPO_URL: LazyLock<Pattern> = LazyLock::new(|| {
    Pattern::new(r"^(https?://)?github.com/\w+/\w+", "Invalid repository url")
        .expect("Invalid repository url regex")
});

pub fn router(state: &AppState) -> Router<AppState> {
    let validate = || ValidateLayer::new(work_schema());

    Router::new()
        .route(
            "/",
            get(list_works).merge(
                post(create_work)
                    .route_layer(validate())
                    .route_layer(state.auth_layer()),
            ),
        )
        .route(
            "/:id",
            get(get_work)
                .merge(
                    put(update_work)
                        .route_layer(validate())
                        .route_layer(state.auth_layer()),
                )
                .merge(delete(remove_work).route_layer(state.auth_layer())),
        )
}

fn work_schema() -> Schema {
    Schema::new()
        .field(FieldValidator::new("title").rule(non_empty("Title should be not empty")))
        .field(FieldValidator::new("description").rule(IsString))
        .field(FieldValidator::new("repo").rule(IsObject))
        .field(FieldValidator::new("repo.url").rule(REPO_URL.clone()))
        .field(FieldValidator::new("repo.branch").rule(IsString))
        .field(FieldValidator::new("projectUrl").rule(EmptyOr(Url::new("Invalid project url"))))
}

fn not_found(title: &str) -> ApiError {
    ApiError::not_found(format!("Work title({title}) not found")).with_resource(title)
}

async fn list_works(State(state): State<AppState>) -> Result<Json<Vec<Work>>> {
    Ok(Json(state.works.list().await?))
}

async fn get_work(State(state): State<AppState>, Path(title): Path<String>) -> Result<Json<Work>> {
    state
        .works
        .get_by_title(&title)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&title))
}

async fn create_work(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Payload,
) -> Result<impl IntoResponse> {
    let input: WorkInput = payload.into_json()?;
    let title = input.title.clone();

    if state.works.get_by_title(&title).await?.is_some() {
        return Err(
            ApiError::conflict(format!("Work title({title}) already exists")).with_resource(title)
        );
    }

    let work = match state.works.create(input).await {
        Ok(work) => work,
        Err(StoreError::Conflict(_)) => {
            return Err(ApiError::conflict(format!("Work title({title}) already exists"))
                .with_resource(title))
        }
        Err(e) => {
            warn!(title = %title, error = %e, "Work create failed");
            return Err(ApiError::internal(format!("Work title({title}) could not create"))
                .with_resource(title));
        }
    };

    info!(title = %work.title, user = %auth.user_id, "Work created");
    Ok((StatusCode::CREATED, Json(work)))
}

async fn update_work(
    State(state): State<AppState>,
    Path(title): Path<String>,
    payload: Payload,
) -> Result<Json<Work>> {
    let input: WorkInput = payload.into_json()?;

    if state.works.get_by_title(&title).await?.is_none() {
        return Err(not_found(&title));
    }
    if input.title != title {
        return Err(ApiError::forbidden("Update access forbidden").with_resource(title));
    }

    state
        .works
        .update(&title, input)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&title))
}

async fn remove_work(State(state): State<AppState>, Path(title): Path<String>) -> Result<StatusCode> {
    if !state.works.remove(&title).await? {
        return Err(not_found(&title));
    }
    Ok(StatusCode::NO_CONTENT)
}
