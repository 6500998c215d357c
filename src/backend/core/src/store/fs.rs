//! Local filesystem object store.

use super::{object_key, upload_key, StoreError, StoreResult, StoredObject, UploadStore};
use crate::validation::UploadedFile;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores each object as a file under `root`, one directory per path segment.
#[derive(Debug, Clone)]
pub struct FsUploadStore {
    root: PathBuf,
}

impl FsUploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |p, s| p.join(s))
    }

    async fn write(&self, key: String, file: &UploadedFile) -> StoreResult<StoredObject> {
        let target = self.locate(&key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &file.data).await?;
        debug!(path = %target.display(), bytes = file.data.len(), "Stored object");
        Ok(StoredObject::at(key))
    }
}

#[async_trait]
impl UploadStore for FsUploadStore {
    async fn upload(&self, dir: &str, file: &UploadedFile) -> StoreResult<StoredObject> {
        let key = upload_key(dir, &file.name)?;
        self.write(key, file).await
    }

    async fn update(&self, path: &str, file: &UploadedFile) -> StoreResult<StoredObject> {
        let key = object_key(path)?;
        if !self.exists(&key).await? {
            return Err(StoreError::NotFound(key));
        }
        self.write(key, file).await
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let key = object_key(path)?;
        match tokio::fs::remove_file(self.locate(&key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let key = object_key(path)?;
        match tokio::fs::metadata(self.locate(&key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    fn jpeg(name: &str, data: &'static [u8]) -> UploadedFile {
        UploadedFile {
            name: name.into(),
            content_type: "image/jpeg".into(),
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn test_files_land_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsUploadStore::new(dir.path());

        let stored = store
            .upload("/works/thumbs", &jpeg("cover.jpg", b"one"))
            .await
            .unwrap();
        assert_eq!(stored.path, "works/thumbs/cover.jpg");

        let on_disk = dir.path().join("works").join("thumbs").join("cover.jpg");
        assert_eq!(std::fs::read(&on_disk).unwrap(), b"one");

        store
            .update("works/thumbs/cover.jpg", &jpeg("other.jpg", b"two"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&on_disk).unwrap(), b"two");

        store.remove("works/thumbs/cover.jpg").await.unwrap();
        assert!(!on_disk.exists());
        assert!(!store.exists("works/thumbs/cover.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsUploadStore::new(dir.path());

        assert!(matches!(
            store.remove("nope.png").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update("nope.png", &jpeg("nope.png", b"x")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsUploadStore::new(dir.path().join("root"));

        let result = store.upload("/../escape", &jpeg("x.jpg", b"x")).await;
        assert!(matches!(result, Err(StoreError::InvalidPath(_))));
        assert!(!dir.path().join("escape").exists());
    }
}
