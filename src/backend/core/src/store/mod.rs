//! Storage collaborators behind the handlers.
//!
//! Handlers only see the repository traits; concrete stores are injected as
//! `Arc<dyn ...>` through the application state.
//!
//! - [`UserRepository`]: identities for signup, login and the auth guard
//! - [`WorkRepository`]: portfolio works keyed by title
//! - [`UploadStore`]: binary objects keyed by a slash-separated path

pub mod fs;
pub mod memory;

pub use fs::FsUploadStore;
pub use memory::{MemoryUploadStore, MemoryUserRepository, MemoryWorkRepository};

use crate::error::ApiError;
use crate::validation::UploadedFile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(key) => ApiError::not_found(format!("{key} not found")),
            StoreError::Conflict(key) => ApiError::conflict(format!("{key} already exists")),
            StoreError::InvalidPath(_) => ApiError::bad_request("Invalid path"),
            other => ApiError::from_source(other),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Users
// ═══════════════════════════════════════════════════════════════════════════════

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    /// PHC-formatted password hash
    pub password_hash: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub email: String,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<User>>;

    /// Fails with [`StoreError::Conflict`] when the username is taken.
    async fn create(&self, user: NewUser) -> StoreResult<User>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Works
// ═══════════════════════════════════════════════════════════════════════════════

/// Source repository of a work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub url: String,
    #[serde(default)]
    pub branch: String,
}

/// A portfolio work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub techs: Vec<String>,
    pub repo: Repo,
    pub project_url: String,
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Client-supplied work fields, used for create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub techs: Vec<String>,
    #[serde(default)]
    pub repo: Repo,
    #[serde(default)]
    pub project_url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl WorkInput {
    pub(crate) fn into_work(self, id: Uuid, created_at: DateTime<Utc>) -> Work {
        Work {
            id,
            title: self.title,
            description: self.description,
            techs: self.techs,
            repo: self.repo,
            project_url: self.project_url,
            thumbnail: self.thumbnail,
            created_at,
        }
    }
}

#[async_trait]
pub trait WorkRepository: Send + Sync {
    /// All works, oldest first.
    async fn list(&self) -> StoreResult<Vec<Work>>;

    async fn get_by_title(&self, title: &str) -> StoreResult<Option<Work>>;

    /// Fails with [`StoreError::Conflict`] when the title is taken.
    async fn create(&self, input: WorkInput) -> StoreResult<Work>;

    /// Replace the fields of the work stored under `title`. `None` if absent.
    async fn update(&self, title: &str, input: WorkInput) -> StoreResult<Option<Work>>;

    /// `false` if nothing was stored under `title`.
    async fn remove(&self, title: &str) -> StoreResult<bool>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Uploads
// ═══════════════════════════════════════════════════════════════════════════════

/// Location of a stored object, as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub path: String,
    pub name: String,
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Store `file` at `<dir>/<file name>`, replacing any previous object.
    async fn upload(&self, dir: &str, file: &UploadedFile) -> StoreResult<StoredObject>;

    /// Overwrite the object at `path`. Fails with [`StoreError::NotFound`] if absent.
    async fn update(&self, path: &str, file: &UploadedFile) -> StoreResult<StoredObject>;

    /// Delete the object at `path`. Fails with [`StoreError::NotFound`] if absent.
    async fn remove(&self, path: &str) -> StoreResult<()>;

    async fn exists(&self, path: &str) -> StoreResult<bool>;
}

/// Normalize an object path to its slash-separated key without leading or
/// trailing slashes. Empty, `.` and `..` segments are rejected.
pub fn object_key(path: &str) -> StoreResult<String> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let valid = segments
        .iter()
        .all(|s| !s.is_empty() && *s != "." && *s != ".." && !s.contains('\\'));
    if !valid {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

/// Key of a file uploaded into `dir`.
pub fn upload_key(dir: &str, file_name: &str) -> StoreResult<String> {
    object_key(&format!("{}/{}", dir.trim_end_matches('/'), file_name))
}

fn file_name_of(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_string()
}

impl StoredObject {
    pub(crate) fn at(key: String) -> Self {
        Self {
            name: file_name_of(&key),
            path: key,
        }
    }
}
