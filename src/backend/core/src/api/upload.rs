//! Image upload into the object store.
//!
//! All routes require an authenticated user. Bodies are multipart forms with
//! a `file` part; new uploads also carry the target directory in `path`.

use super::{AppState, Endpoint};
use crate::error::{ApiError, Result};
use crate::store::{StoreError, StoredObject};
use crate::validation::{
    FieldValidator, FormData, ImageFile, IsFile, MaxFileSize, NonEmptyFile, Pattern, Payload,
    Schema, UploadedFile, ValidateLayer,
};
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post, put},
    Json, Router,
};
use std::sync::LazyLock;
use tracing::{info, warn};

pub const ENDPOINTS: &[Endpoint] = &[
    Endpoint::new("POST", "/"),
    Endpoint::new("PUT", "/*path"),
    Endpoint::new("DELETE", "/*path"),
];

/// Headroom for multipart framing and the text parts around the file.
const FORM_OVERHEAD: usize = 64 * 1024;

static UPLOAD_PATH: LazyLock<Pattern> = LazyLock::new(|| {
    Pattern::new(
        r"^((?:/[a-zA-Z0-9]+(?:_[a-zA-Z0-9]+)*(?:[a-zA-Z0-9.]+)*)+)$",
        "Invalid path",
    )
    .expect("Invalid upload path regex")
});

pub fn router(state: &AppState) -> Router<AppState> {
    let limit = usize::try_from(state.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD);
    let oversized = MaxFileSize::new(state.max_file_size).exceeded("file");
    let validate = |schema: Schema| {
        ValidateLayer::new(schema)
            .body_limit(limit)
            .oversized_as(oversized.clone())
    };

    Router::new()
        .route(
            "/",
            post(upload)
                .route_layer(validate(upload_schema(state.max_file_size)))
                .route_layer(state.auth_layer()),
        )
        .route(
            "/*path",
            put(replace)
                .route_layer(validate(file_schema(state.max_file_size)))
                .route_layer(state.auth_layer())
                .merge(delete(remove).route_layer(state.auth_layer())),
        )
        .layer(DefaultBodyLimit::max(limit))
}

fn file_schema(max_file_size: u64) -> Schema {
    Schema::new().field(
        FieldValidator::new("file")
            .rule(IsFile::new("File should be File"))
            .rule(ImageFile::new("Only image files are accepted"))
            .rule(NonEmptyFile::new("Input file"))
            .rule(MaxFileSize::new(max_file_size)),
    )
}

fn upload_schema(max_file_size: u64) -> Schema {
    Schema::new()
        .field(FieldValidator::new("path").rule(UPLOAD_PATH.clone()))
        .extend(file_schema(max_file_size))
}

/// The validated `file` part of a multipart payload.
fn file_part(payload: Payload) -> Result<(FormData, UploadedFile)> {
    let form = payload.into_form()?;
    let file = form
        .file("file")
        .cloned()
        .ok_or_else(|| ApiError::fault("validated form has no file part"))?;
    Ok((form, file))
}

fn store_failure(path: &str, error: StoreError) -> ApiError {
    match error {
        StoreError::NotFound(_) => {
            ApiError::not_found(format!("File({path}) not found")).with_resource(path)
        }
        StoreError::InvalidPath(_) => ApiError::bad_request("Invalid path").with_resource(path),
        other => {
            warn!(path = %path, error = %other, "Upload store failed");
            ApiError::internal(format!("File({path}): {other}")).with_resource(path)
        }
    }
}

async fn upload(State(state): State<AppState>, payload: Payload) -> Result<impl IntoResponse> {
    let (form, file) = file_part(payload)?;
    let dir = form.text("path").unwrap_or_default();

    let stored = state
        .uploads
        .upload(dir, &file)
        .await
        .map_err(|e| store_failure(dir, e))?;

    info!(path = %stored.path, size = file.size(), "File uploaded");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn replace(
    State(state): State<AppState>,
    Path(path): Path<String>,
    payload: Payload,
) -> Result<Json<StoredObject>> {
    let (_, file) = file_part(payload)?;

    let stored = state
        .uploads
        .update(&path, &file)
        .await
        .map_err(|e| store_failure(&path, e))?;
    Ok(Json(stored))
}

async fn remove(State(state): State<AppState>, Path(path): Path<String>) -> Result<StatusCode> {
    state
        .uploads
        .remove(&path)
        .await
        .map_err(|e| store_failure(&path, e))?;
    Ok(StatusCode::NO_CONTENT)
}
