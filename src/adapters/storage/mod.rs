use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

pub mod memory;
pub mod s3;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store error: {0}")]
    Backend(String),
}

/// Durable blob store for staged attachments. Implementations must tolerate
/// concurrent writers.
#[async_trait]
pub trait ObjectStorage: Send + Sync + std::fmt::Debug + 'static {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Keys of every object last modified before `cutoff`.
    async fn list_older_than(&self, cutoff: OffsetDateTime) -> Result<Vec<String>, StorageError>;
    /// Cheap reachability probe.
    async fn check(&self) -> Result<(), StorageError>;
}
