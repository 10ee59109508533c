use crate::domain::outcome::DispatchOutcome;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{Date, macros::format_description};
use uuid::Uuid;

const DEBUG_DIR: &str = "debug";
const DEBUG_SUFFIX: &str = "_email.txt";

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("failed to encode outcome record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Flat audit log of dispatch attempts:
/// `{root}/{YYYY-MM-DD}/{success|failure}/{email_id}.json` plus optional
/// `{root}/{YYYY-MM-DD}/debug/{email_id}_email.txt`. Dates are UTC.
///
/// Files are written to a temporary sibling and renamed into place, so a
/// record is either absent or complete, and recording the same id twice on
/// the same day leaves only the second write.
#[derive(Debug, Clone)]
pub struct ResultRecorder {
    root: PathBuf,
}

impl ResultRecorder {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn outcome_path(&self, outcome: &DispatchOutcome) -> PathBuf {
        self.date_dir(outcome.timestamp.date())
            .join(outcome.status.as_str())
            .join(format!("{}.json", outcome.email_id))
    }

    #[must_use]
    pub fn debug_path(&self, date: Date, email_id: Uuid) -> PathBuf {
        self.date_dir(date).join(DEBUG_DIR).join(format!("{email_id}{DEBUG_SUFFIX}"))
    }

    /// Persists an outcome record.
    ///
    /// # Errors
    /// Returns a `PersistenceError` if the directory or file cannot be written.
    #[tracing::instrument(err, skip(self, outcome), fields(email_id = %outcome.email_id, status = outcome.status.as_str()))]
    pub async fn record(&self, outcome: &DispatchOutcome) -> Result<PathBuf, PersistenceError> {
        let path = self.outcome_path(outcome);
        let data = to_json_4_spaces(outcome)?;
        write_atomic(&path, &data).await?;
        tracing::debug!(path = %path.display(), "Outcome recorded");
        Ok(path)
    }

    /// Persists the fully rendered message for a debug-flagged request under
    /// `date`, which should be the date of the matching outcome record.
    ///
    /// # Errors
    /// Returns a `PersistenceError` if the directory or file cannot be written.
    #[tracing::instrument(err, skip(self, message), fields(email_id = %email_id))]
    pub async fn record_debug(&self, date: Date, email_id: Uuid, message: &[u8]) -> Result<PathBuf, PersistenceError> {
        let path = self.debug_path(date, email_id);
        write_atomic(&path, message).await?;
        Ok(path)
    }

    fn date_dir(&self, date: Date) -> PathBuf {
        let name = date
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_else(|_| format!("{}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day()));
        self.root.join(name)
    }
}

fn to_json_4_spaces(outcome: &DispatchOutcome) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(outcome, &mut ser)?;
    Ok(buf)
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PersistenceError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| PersistenceError::CreateDir { path: dir.to_path_buf(), source })?;

    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    if let Err(source) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PersistenceError::Write { path: tmp, source });
    }

    tokio::fs::rename(&tmp, path).await.map_err(|source| PersistenceError::Write { path: path.to_path_buf(), source })
}
