use crate::config::{ConfigError, jsonc};
use crate::domain::attachment::AttachmentLimits;
use crate::domain::email::ValidationLimits;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_API_NAME: &str = "High-Performance SMTP API";
pub const DEFAULT_API_DESCRIPTION: &str = "SMTP API mail dispatch with support for attachments.";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_LEN_RECIPIENT_EMAIL: usize = 64;
pub const DEFAULT_MAX_LEN_SUBJECT: usize = 255;
pub const DEFAULT_MAX_LEN_BODY: usize = 50_000;
pub const DEFAULT_MAX_ATTACHMENTS: usize = 2;
pub const DEFAULT_MAX_ATTACHMENT_SIZE_BYTES: usize = 2 * 1024 * 1024;

/// The settings document. Loaded once at startup and shared read-only.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    // API
    pub api_key: String,
    pub api_name: String,
    pub api_description: String,
    pub port: u16,

    // SMTP relay
    pub smtp_server: String,
    pub smtp_port: u16,
    pub use_ssl: bool,
    pub use_password: bool,
    pub use_tls: bool,

    // Limits
    pub max_len_recipient_email: usize,
    pub max_len_subject: usize,
    pub max_len_body: usize,
    pub max_attachments: usize,
    pub max_attachment_size_bytes: usize,

    // Sender identity
    pub sender_email: String,
    pub sender_email_display: String,
    pub sender_domain: String,
    pub sender_password: String,

    // Object store (attachment variant)
    pub minio_endpoint: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub minio_bucket: String,
    pub minio_use_ssl: bool,
}

/// Connection details for the attachment object store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStoreSettings {
    pub endpoint_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

impl Settings {
    /// Reads and parses a settings document. Comments are stripped first when
    /// the file name ends in `.jsonc`.
    ///
    /// # Errors
    /// Returns `ConfigError::Read` or `ConfigError::Parse` with the offending path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        let is_jsonc = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("jsonc"));

        Self::from_document(&raw, is_jsonc)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Parses a settings document held in memory.
    ///
    /// # Errors
    /// Returns the `serde_json` error if the document is not valid JSON.
    pub fn from_document(raw: &str, jsonc: bool) -> Result<Self, serde_json::Error> {
        let mut settings: Self = if jsonc {
            serde_json::from_str(&jsonc::strip_line_comments(raw))?
        } else {
            serde_json::from_str(raw)?
        };
        settings.apply_defaults();
        Ok(settings)
    }

    /// Fills every blank or zero field that has a default.
    pub fn apply_defaults(&mut self) {
        if self.api_name.is_empty() {
            DEFAULT_API_NAME.clone_into(&mut self.api_name);
        }
        if self.api_description.is_empty() {
            DEFAULT_API_DESCRIPTION.clone_into(&mut self.api_description);
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.max_len_recipient_email == 0 {
            self.max_len_recipient_email = DEFAULT_MAX_LEN_RECIPIENT_EMAIL;
        }
        if self.max_len_subject == 0 {
            self.max_len_subject = DEFAULT_MAX_LEN_SUBJECT;
        }
        if self.max_len_body == 0 {
            self.max_len_body = DEFAULT_MAX_LEN_BODY;
        }
        if self.max_attachments == 0 {
            self.max_attachments = DEFAULT_MAX_ATTACHMENTS;
        }
        if self.max_attachment_size_bytes == 0 {
            self.max_attachment_size_bytes = DEFAULT_MAX_ATTACHMENT_SIZE_BYTES;
        }
    }

    #[must_use]
    pub fn is_api_key_auth_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// The configured display identity, or the sender address when none is set.
    #[must_use]
    pub fn display_email(&self) -> &str {
        let display = self.sender_email_display.trim();
        if display.is_empty() { &self.sender_email } else { display }
    }

    #[must_use]
    pub const fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_recipient_len: self.max_len_recipient_email,
            max_subject_len: self.max_len_subject,
            max_body_len: self.max_len_body,
        }
    }

    #[must_use]
    pub const fn attachment_limits(&self) -> AttachmentLimits {
        AttachmentLimits { max_count: self.max_attachments, max_size_bytes: self.max_attachment_size_bytes }
    }

    /// Object store settings, or `None` when the attachment variant is disabled.
    #[must_use]
    pub fn object_store(&self) -> Option<ObjectStoreSettings> {
        let endpoint = self.minio_endpoint.trim();
        let bucket = self.minio_bucket.trim();
        if endpoint.is_empty() || bucket.is_empty() {
            return None;
        }

        let endpoint_url = if endpoint.contains("://") {
            endpoint.to_string()
        } else if self.minio_use_ssl {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        };

        Some(ObjectStoreSettings {
            endpoint_url,
            access_key: self.minio_access_key.clone(),
            secret_key: self.minio_secret_key.clone(),
            bucket: bucket.to_string(),
        })
    }
}
