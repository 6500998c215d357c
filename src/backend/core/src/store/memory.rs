//! In-process stores backed by locked maps.

use super::{
    object_key, upload_key, NewUser, StoreError, StoreResult, StoredObject, UploadStore, User,
    UserRepository, Work, WorkInput, WorkRepository,
};
use crate::validation::UploadedFile;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Users
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct UserTable {
    by_id: HashMap<String, User>,
    id_by_username: HashMap<String, String>,
}

/// Users held in memory.
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    table: RwLock<UserTable>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let table = self.table.read();
        Ok(table
            .id_by_username
            .get(username)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.table.read().by_id.get(id).cloned())
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let mut table = self.table.write();
        if table.id_by_username.contains_key(&user.username) {
            return Err(StoreError::Conflict(user.username));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: user.username,
            password_hash: user.password_hash,
            name: user.name,
            email: user.email,
            created_at: Utc::now(),
        };
        table
            .id_by_username
            .insert(user.username.clone(), user.id.clone());
        table.by_id.insert(user.id.clone(), user.clone());
        Ok(user)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Works
// ═══════════════════════════════════════════════════════════════════════════════

/// Works held in memory in insertion order.
#[derive(Debug, Default)]
pub struct MemoryWorkRepository {
    works: RwLock<Vec<Work>>,
}

impl MemoryWorkRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkRepository for MemoryWorkRepository {
    async fn list(&self) -> StoreResult<Vec<Work>> {
        Ok(self.works.read().clone())
    }

    async fn get_by_title(&self, title: &str) -> StoreResult<Option<Work>> {
        Ok(self.works.read().iter().find(|w| w.title == title).cloned())
    }

    async fn create(&self, input: WorkInput) -> StoreResult<Work> {
        let mut works = self.works.write();
        if works.iter().any(|w| w.title == input.title) {
            return Err(StoreError::Conflict(input.title));
        }

        let work = input.into_work(Uuid::new_v4(), Utc::now());
        works.push(work.clone());
        Ok(work)
    }

    async fn update(&self, title: &str, input: WorkInput) -> StoreResult<Option<Work>> {
        let mut works = self.works.write();
        let Some(slot) = works.iter_mut().find(|w| w.title == title) else {
            return Ok(None);
        };

        *slot = input.into_work(slot.id, slot.created_at);
        Ok(Some(slot.clone()))
    }

    async fn remove(&self, title: &str) -> StoreResult<bool> {
        let mut works = self.works.write();
        let before = works.len();
        works.retain(|w| w.title != title);
        Ok(works.len() != before)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Uploads
// ═══════════════════════════════════════════════════════════════════════════════

/// Objects held in memory.
#[derive(Debug, Default)]
pub struct MemoryUploadStore {
    objects: RwLock<HashMap<String, UploadedFile>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored object contents, if any.
    pub fn get(&self, path: &str) -> Option<UploadedFile> {
        let key = object_key(path).ok()?;
        self.objects.read().get(&key).cloned()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn upload(&self, dir: &str, file: &UploadedFile) -> StoreResult<StoredObject> {
        let key = upload_key(dir, &file.name)?;
        self.objects.write().insert(key.clone(), file.clone());
        Ok(StoredObject::at(key))
    }

    async fn update(&self, path: &str, file: &UploadedFile) -> StoreResult<StoredObject> {
        let key = object_key(path)?;
        let mut objects = self.objects.write();
        match objects.get_mut(&key) {
            Some(slot) => {
                *slot = file.clone();
                Ok(StoredObject::at(key))
            }
            None => Err(StoreError::NotFound(key)),
        }
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let key = object_key(path)?;
        match self.objects.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key)),
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let key = object_key(path)?;
        Ok(self.objects.read().contains_key(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use fake::faker::internet::en::{SafeEmail, Username};
    use fake::Fake;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".into(),
            name: "Someone".into(),
            email: SafeEmail().fake(),
        }
    }

    fn work(title: &str) -> WorkInput {
        WorkInput {
            title: title.into(),
            description: "desc".into(),
            ..Default::default()
        }
    }

    fn png(name: &str) -> UploadedFile {
        UploadedFile {
            name: name.into(),
            content_type: "image/png".into(),
            data: Bytes::from_static(b"\x89PNG"),
        }
    }

    #[tokio::test]
    async fn test_user_create_and_lookup() {
        let repo = MemoryUserRepository::new();
        let username: String = Username().fake();

        let user = repo.create(new_user(&username)).await.unwrap();
        assert_eq!(
            repo.find_by_username(&username).await.unwrap().unwrap().id,
            user.id
        );
        assert_eq!(
            repo.find_by_id(&user.id).await.unwrap().unwrap().username,
            username
        );
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let repo = MemoryUserRepository::new();
        repo.create(new_user("bob")).await.unwrap();
        let err = repo.create(new_user("bob")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(name) if name == "bob"));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_work_lifecycle() {
        let repo = MemoryWorkRepository::new();
        let created = repo.create(work("first")).await.unwrap();
        repo.create(work("second")).await.unwrap();
        assert!(matches!(
            repo.create(work("first")).await,
            Err(StoreError::Conflict(_))
        ));

        let titles: Vec<_> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.title)
            .collect();
        assert_eq!(titles, ["first", "second"]);

        let mut changed = work("first");
        changed.description = "updated".into();
        let updated = repo.update("first", changed).await.unwrap().unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.description, "updated");
        assert!(repo.update("missing", work("missing")).await.unwrap().is_none());

        assert!(repo.remove("first").await.unwrap());
        assert!(!repo.remove("first").await.unwrap());
        assert!(repo.get_by_title("first").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_lifecycle() {
        let store = MemoryUploadStore::new();
        let stored = store.upload("/images", &png("a.png")).await.unwrap();
        assert_eq!(stored.path, "images/a.png");
        assert_eq!(stored.name, "a.png");
        assert!(store.exists("/images/a.png").await.unwrap());

        let replaced = store.update("images/a.png", &png("b.png")).await.unwrap();
        assert_eq!(replaced.path, "images/a.png");
        assert_eq!(store.get("images/a.png").unwrap().name, "b.png");

        store.remove("images/a.png").await.unwrap();
        assert!(matches!(
            store.remove("images/a.png").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update("images/a.png", &png("a.png")).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
