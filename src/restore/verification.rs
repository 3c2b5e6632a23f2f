// plantvault/src/restore/verification.rs
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::models::BackupRecord;
use crate::catalog::Catalog;
use crate::errors::{AppError, Result};
use crate::utils::checksum::{digests_match, sha256_file_async};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    pub record_id: i64,
    pub matches: bool,
    /// Digest stored at creation time; `None` for records that never had one.
    pub expected: Option<String>,
    pub actual: String,
}

impl VerifyReport {
    /// The mismatch as an error value, for callers that surface it as a warning.
    pub fn mismatch(&self) -> Option<AppError> {
        if self.matches {
            return None;
        }
        self.expected.as_ref().map(|expected| AppError::ChecksumMismatch {
            expected: expected.clone(),
            actual: self.actual.clone(),
        })
    }
}

/// Re-hashes a record's artifact and compares it with the stored digest.
///
/// A missing file is [`AppError::ArtifactMissing`], never a mismatch.
pub async fn verify_record(record: &BackupRecord) -> Result<VerifyReport> {
    if !record.file_path.exists() {
        warn!(record_id = record.id, path = %record.file_path.display(), "artifact missing during verification");
        return Err(AppError::ArtifactMissing(record.file_path.clone()));
    }

    let actual = sha256_file_async(&record.file_path).await?;
    let matches = record
        .checksum
        .as_deref()
        .is_some_and(|expected| digests_match(expected, &actual));

    if matches {
        info!(record_id = record.id, "checksum verified");
    } else {
        warn!(
            record_id = record.id,
            expected = ?record.checksum,
            actual = %actual,
            "checksum does not match stored digest"
        );
    }

    Ok(VerifyReport {
        record_id: record.id,
        matches,
        expected: record.checksum.clone(),
        actual,
    })
}

pub async fn verify_backup(catalog: &Catalog, record_id: i64) -> Result<VerifyReport> {
    let record = catalog
        .get_record(record_id)
        .await?
        .ok_or_else(|| AppError::not_found("backup", record_id))?;
    verify_record(&record).await
}
