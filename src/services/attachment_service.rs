use crate::adapters::storage::{ObjectStorage, StorageError};
use crate::domain::attachment::{AttachmentHandle, AttachmentLimits, AttachmentUpload, ResolvedAttachment};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use thiserror::Error;

const MIB: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("You can only upload up to {max} attachments")]
    TooManyFiles { max: usize },
    #[error("Attachments must be smaller than {}", format_size(.max_bytes))]
    FileTooLarge { max_bytes: usize },
    #[error("Failed to upload attachment: {0}")]
    Storage(#[from] StorageError),
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn format_size(bytes: &usize) -> String {
    let bytes = *bytes;
    if bytes >= MIB && bytes % MIB == 0 { format!("{}MB", bytes / MIB) } else { format!("{bytes} bytes") }
}

#[derive(Clone, Debug)]
struct Metrics {
    staged_bytes: Counter<u64>,
    staged_size_bytes: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mail-gateway");
        Self {
            staged_bytes: meter
                .u64_counter("attachments_staged_bytes")
                .with_description("Total bytes of attachments written to the object store")
                .build(),
            staged_size_bytes: meter
                .u64_histogram("attachments_staged_size_bytes")
                .with_description("Distribution of staged attachment sizes")
                .build(),
        }
    }
}

/// Moves uploaded files into the object store ahead of dispatch and reads
/// them back when the message is composed.
#[derive(Clone, Debug)]
pub struct AttachmentService {
    storage: Arc<dyn ObjectStorage>,
    limits: AttachmentLimits,
    metrics: Metrics,
}

impl AttachmentService {
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>, limits: AttachmentLimits) -> Self {
        Self { storage, limits, metrics: Metrics::new() }
    }

    #[must_use]
    pub const fn limits(&self) -> AttachmentLimits {
        self.limits
    }

    /// Count and size checks for a whole batch. Nothing is written.
    ///
    /// # Errors
    /// Returns `StagingError::TooManyFiles` or `StagingError::FileTooLarge`.
    pub fn check_batch(&self, uploads: &[AttachmentUpload]) -> Result<(), StagingError> {
        if uploads.len() > self.limits.max_count {
            return Err(StagingError::TooManyFiles { max: self.limits.max_count });
        }
        if uploads.iter().any(|u| u.data.len() > self.limits.max_size_bytes) {
            return Err(StagingError::FileTooLarge { max_bytes: self.limits.max_size_bytes });
        }
        Ok(())
    }

    /// Stores one file under a fresh unique key.
    ///
    /// # Errors
    /// Returns `StagingError::FileTooLarge` if the file exceeds the ceiling, or
    /// `StagingError::Storage` if the object store rejects the write.
    #[tracing::instrument(err(level = "warn"), skip(self, upload), fields(attachment_key = tracing::field::Empty, attachment_size = upload.data.len()))]
    pub async fn stage(&self, upload: AttachmentUpload) -> Result<AttachmentHandle, StagingError> {
        if upload.data.len() > self.limits.max_size_bytes {
            return Err(StagingError::FileTooLarge { max_bytes: self.limits.max_size_bytes });
        }

        let handle = AttachmentHandle::generate(&upload.filename);
        tracing::Span::current().record("attachment_key", tracing::field::display(&handle.key));

        let size = upload.data.len() as u64;
        self.storage.put(&handle.key, upload.data, handle.content_type).await?;

        self.metrics.staged_bytes.add(size, &[]);
        self.metrics.staged_size_bytes.record(size, &[]);
        tracing::debug!(content_type = handle.content_type, "Attachment staged");

        Ok(handle)
    }

    /// Stages a request's whole batch or nothing. The batch is checked before
    /// any write, and if a write fails midway the objects already stored for
    /// this batch are deleted again.
    ///
    /// # Errors
    /// Returns the first `StagingError` encountered.
    #[tracing::instrument(err(level = "warn"), skip(self, uploads), fields(attachment_count = uploads.len()))]
    pub async fn stage_all(&self, uploads: Vec<AttachmentUpload>) -> Result<Vec<AttachmentHandle>, StagingError> {
        self.check_batch(&uploads)?;

        let mut handles = Vec::with_capacity(uploads.len());
        for upload in uploads {
            match self.stage(upload).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.discard(&handles).await;
                    return Err(e);
                }
            }
        }

        Ok(handles)
    }

    /// Best-effort removal of staged objects.
    pub async fn discard(&self, handles: &[AttachmentHandle]) {
        for handle in handles {
            if let Err(e) = self.storage.delete(&handle.key).await {
                tracing::warn!(error = %e, key = %handle.key, "Failed to remove staged attachment");
            }
        }
    }

    /// Reads staged attachments back for embedding. Filename and content type
    /// are recovered from each object key.
    ///
    /// # Errors
    /// Returns the `StorageError` of the first object that cannot be read.
    pub async fn resolve(&self, keys: &[String]) -> Result<Vec<ResolvedAttachment>, StorageError> {
        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            let data = self.storage.get(key).await?;
            let AttachmentHandle { filename, content_type, .. } = AttachmentHandle::from_key(key);
            resolved.push(ResolvedAttachment { filename, content_type, data });
        }
        Ok(resolved)
    }
}
