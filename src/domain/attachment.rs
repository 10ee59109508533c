use bytes::Bytes;
use uuid::Uuid;

/// Length of a hyphenated UUID, the unique prefix of every object key.
pub const KEY_PREFIX_LEN: usize = 36;
/// Separator between the unique prefix and the original filename.
pub const KEY_SEPARATOR: char = '_';

const FALLBACK_FILENAME: &str = "attachment";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Limits applied to one request's attachment batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLimits {
    pub max_count: usize,
    pub max_size_bytes: usize,
}

/// An uploaded file that has not been staged yet.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub filename: String,
    pub data: Bytes,
}

impl AttachmentUpload {
    #[must_use]
    pub fn new(filename: &str, data: Bytes) -> Self {
        Self { filename: sanitize_filename(filename), data }
    }
}

/// Pointer to a staged attachment in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentHandle {
    pub key: String,
    pub filename: String,
    pub content_type: &'static str,
}

impl AttachmentHandle {
    /// Builds a handle with a fresh unique key for `filename`.
    #[must_use]
    pub fn generate(filename: &str) -> Self {
        Self {
            key: object_key(Uuid::new_v4(), filename),
            filename: filename.to_string(),
            content_type: content_type_for(filename),
        }
    }

    /// Rebuilds a handle from a stored key.
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        let filename = filename_from_key(key);
        Self { key: key.to_string(), content_type: content_type_for(filename), filename: filename.to_string() }
    }
}

/// An attachment ready to be embedded into a message.
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub filename: String,
    pub content_type: &'static str,
    pub data: Bytes,
}

/// `{uuid}_{filename}`.
#[must_use]
pub fn object_key(id: Uuid, filename: &str) -> String {
    format!("{}{KEY_SEPARATOR}{filename}", id.hyphenated())
}

/// Reverses [`object_key`]. Keys that do not carry the fixed-width prefix are
/// returned unchanged.
#[must_use]
pub fn filename_from_key(key: &str) -> &str {
    let has_prefix = key.len() > KEY_PREFIX_LEN
        && key.is_char_boundary(KEY_PREFIX_LEN)
        && key[KEY_PREFIX_LEN..].starts_with(KEY_SEPARATOR);

    if has_prefix { &key[KEY_PREFIX_LEN + KEY_SEPARATOR.len_utf8()..] } else { key }
}

/// Keeps only the final path component of a client-supplied filename.
#[must_use]
pub fn sanitize_filename(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." { FALLBACK_FILENAME.to_string() } else { name.to_string() }
}

/// Content type by file extension, case-insensitive.
#[must_use]
pub fn content_type_for(filename: &str) -> &'static str {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return FALLBACK_CONTENT_TYPE;
    };

    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => FALLBACK_CONTENT_TYPE,
    }
}
