pub mod attachment_cleanup;

pub use attachment_cleanup::AttachmentCleanupWorker;
