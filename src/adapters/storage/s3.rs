use crate::adapters::storage::{ObjectStorage, StorageError};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use time::OffsetDateTime;

/// S3-compatible store (AWS S3, `MinIO`, ...).
#[derive(Clone, Debug)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    #[must_use]
    pub const fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Creates the bucket unless it already exists.
    ///
    /// # Errors
    /// Returns `StorageError::Backend` if the bucket can neither be found nor created.
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        if self.client.head_bucket().bucket(&self.bucket).send().await.is_ok() {
            return Ok(());
        }

        tracing::info!(bucket = %self.bucket, "Bucket missing, creating it");
        self.client.create_bucket().bucket(&self.bucket).send().await.map_err(|e| {
            tracing::error!(error = ?e, bucket = %self.bucket, "S3 CreateBucket failed");
            StorageError::Backend(format!("failed to create bucket: {e}"))
        })?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        let len = i64::try_from(data.len()).unwrap_or(i64::MAX);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(len)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, key = %key, "S3 Upload failed");
                StorageError::Backend(format!("failed to upload file: {e}"))
            })?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let output = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(|e| {
            if e.as_service_error().is_some_and(aws_sdk_s3::operation::get_object::GetObjectError::is_no_such_key) {
                return StorageError::NotFound(key.to_string());
            }
            tracing::error!(error = ?e, key = %key, "S3 Download failed");
            StorageError::Backend(format!("failed to get file: {e}"))
        })?;

        let data = output.body.collect().await.map_err(|e| {
            tracing::error!(error = ?e, key = %key, "S3 Stream error");
            StorageError::Backend(format!("failed to read file content: {e}"))
        })?;

        Ok(data.into_bytes())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client.delete_object().bucket(&self.bucket).key(key).send().await.map_err(|e| {
            tracing::error!(error = ?e, key = %key, "S3 Delete failed");
            StorageError::Backend(format!("failed to delete file: {e}"))
        })?;
        Ok(())
    }

    async fn list_older_than(&self, cutoff: OffsetDateTime) -> Result<Vec<String>, StorageError> {
        let cutoff_secs = cutoff.unix_timestamp();
        let mut keys = Vec::new();

        let mut pages = self.client.list_objects_v2().bucket(&self.bucket).into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                tracing::error!(error = ?e, bucket = %self.bucket, "S3 List failed");
                StorageError::Backend(format!("failed to list objects: {e}"))
            })?;

            for object in page.contents() {
                if let (Some(key), Some(modified)) = (object.key(), object.last_modified())
                    && modified.secs() < cutoff_secs
                {
                    keys.push(key.to_string());
                }
            }
        }

        Ok(keys)
    }

    async fn check(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("storage connection failed for bucket {}: {e}", self.bucket)))?;
        Ok(())
    }
}
