use crate::adapters::storage::{ObjectStorage, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    modified_at: OffsetDateTime,
}

/// Process-local object store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|o| o.content_type.clone())
    }

    /// Stores an object with an explicit modification time.
    pub async fn put_at(&self, key: &str, data: Bytes, content_type: &str, modified_at: OffsetDateTime) {
        self.objects
            .write()
            .await
            .insert(key.to_string(), StoredObject { data, content_type: content_type.to_string(), modified_at });
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.put_at(key, data, content_type, OffsetDateTime::now_utc()).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list_older_than(&self, cutoff: OffsetDateTime) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|(_, o)| o.modified_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
