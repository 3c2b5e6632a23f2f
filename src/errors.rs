use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("Dump failed (exit code {code:?}): {stderr}")]
    DumpFailed { code: Option<i32>, stderr: String },

    #[error("Restore failed (exit code {code:?}): {stderr}")]
    RestoreFailed { code: Option<i32>, stderr: String },

    #[error("Backup artifact is missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("No removable storage device is connected")]
    RemovableStorageUnavailable,

    #[error("Removable storage path rejected as a system location: {}", .0.display())]
    RemovableStorageUnsafe(PathBuf),

    #[error("Removable storage is full: {available_mb:.2} MB free, {required_mb:.2} MB required")]
    RemovableStorageFull { required_mb: f64, available_mb: f64 },

    #[error("Invalid schedule: {0}")]
    ScheduleComputation(String),

    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Remote storage operation failed: {0}")]
    Storage(String),

    #[error("Alert delivery failed: {0}")]
    Alert(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn dump_failed(code: Option<i32>, stderr: &str) -> Self {
        Self::DumpFailed {
            code,
            stderr: crate::utils::truncate_diagnostic(stderr),
        }
    }

    pub fn restore_failed(code: Option<i32>, stderr: &str) -> Self {
        Self::RestoreFailed {
            code,
            stderr: crate::utils::truncate_diagnostic(stderr),
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
