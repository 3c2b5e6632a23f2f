// plantvault/src/backup/transfer.rs
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::logic::BackupPipeline;
use crate::catalog::models::{BackupRecord, RecordKind, RecordOrigin, StorageMedium};
use crate::catalog::records::new_record;
use crate::errors::{AppError, Result};
use crate::removable::ensure_capacity;
use crate::utils::checksum::{digests_match, sha256_file_async};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyTarget {
    Record(i64),
    /// Every record whose artifact is on local storage.
    All,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyFailure {
    pub record_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    pub destination: PathBuf,
    pub copied: Vec<BackupRecord>,
    pub failed: Vec<CopyFailure>,
}

/// Copies artifacts onto the removable device, verifying each copy's digest
/// and recording it as a new `copied-<kind>` record. The source records are
/// left untouched.
pub async fn copy_to_removable(pipeline: &BackupPipeline, target: CopyTarget, operator: &str) -> Result<CopyReport> {
    let catalog = pipeline.catalog();
    let sources = match target {
        CopyTarget::Record(id) => {
            let record = catalog.get_record(id).await?.ok_or_else(|| AppError::not_found("backup", id))?;
            if !record.file_path.exists() {
                return Err(AppError::ArtifactMissing(record.file_path));
            }
            vec![record]
        }
        CopyTarget::All => catalog
            .list_records(None, 0)
            .await?
            .into_iter()
            .filter(|r| r.storage_medium.includes_local() && r.kind.origin != RecordOrigin::Copied)
            .collect(),
    };

    let volume = pipeline.locator().locate_async().await?.required()?;
    let required_mb: f64 = sources.iter().filter(|r| r.file_path.exists()).map(|r| r.size_mb).sum();
    ensure_capacity(&volume, required_mb, pipeline.config().removable.min_free_mb)?;

    let destination = volume.archive_dir();
    tokio::fs::create_dir_all(&destination).await?;
    info!(destination = %destination.display(), records = sources.len(), required_mb, "copying artifacts to removable storage");

    let mut report = CopyReport {
        destination: destination.clone(),
        copied: Vec::new(),
        failed: Vec::new(),
    };

    for source in sources {
        match copy_one(pipeline, &source, &destination, operator).await {
            Ok(record) => report.copied.push(record),
            Err(e) => {
                warn!(record_id = source.id, error = %e, "copy to removable storage failed");
                report.failed.push(CopyFailure {
                    record_id: source.id,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(copied = report.copied.len(), failed = report.failed.len(), "copy to removable storage finished");
    Ok(report)
}

async fn copy_one(pipeline: &BackupPipeline, source: &BackupRecord, destination: &Path, operator: &str) -> Result<BackupRecord> {
    if !source.file_path.exists() {
        return Err(AppError::ArtifactMissing(source.file_path.clone()));
    }
    let file_name = source
        .file_path
        .file_name()
        .ok_or_else(|| AppError::InvalidInput(format!("artifact has no file name: {}", source.file_path.display())))?;
    let target = destination.join(file_name);
    if target.exists() {
        return Err(AppError::InvalidInput(format!("{} is already on removable storage", target.display())));
    }

    let expected = match &source.checksum {
        Some(digest) => digest.clone(),
        None => sha256_file_async(&source.file_path).await?,
    };

    let (from, to) = (source.file_path.clone(), target.clone());
    tokio::task::spawn_blocking(move || std::fs::copy(from, to)).await??;

    let actual = sha256_file_async(&target).await?;
    if !digests_match(&expected, &actual) {
        if let Err(e) = tokio::fs::remove_file(&target).await {
            warn!(path = %target.display(), error = %e, "could not remove corrupt copy");
        }
        return Err(AppError::ChecksumMismatch { expected, actual });
    }

    pipeline
        .catalog()
        .insert_record(&new_record(
            RecordKind::copied(source.kind.base),
            target,
            source.size_mb,
            operator,
            StorageMedium::Removable,
            Some(actual),
        ))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::logic::{BackupOutcome, BackupRequest, Trigger};
    use crate::catalog::models::BackupKind;
    use crate::catalog::Catalog;
    use crate::removable::testing::{locator, volume};
    use crate::removable::RemovableLocator;
    use crate::testing::{config_in, FakeTool};
    use std::sync::Arc;

    async fn pipeline_with(dir: &Path, locator: RemovableLocator) -> BackupPipeline {
        BackupPipeline::new(
            Catalog::open_in_memory().await.unwrap(),
            Arc::new(FakeTool::with_full_dump()),
            locator,
            Arc::new(config_in(dir)),
        )
    }

    async fn local_full(pipeline: &BackupPipeline) -> BackupRecord {
        let outcome = pipeline
            .create_backup(&BackupRequest {
                kind: BackupKind::Full,
                medium: StorageMedium::Local,
                operator: "admin".to_string(),
                trigger: Trigger::Manual,
            })
            .await
            .unwrap();
        match outcome {
            BackupOutcome::Created(record) => record,
            BackupOutcome::NoChanges => panic!("full backups always persist"),
        }
    }

    #[tokio::test]
    async fn copy_creates_verified_copied_record() {
        let dir = tempfile::tempdir().unwrap();
        let usb = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(dir.path(), locator(vec![volume(usb.path(), 32, 16, true)])).await;
        let source = local_full(&pipeline).await;

        let report = copy_to_removable(&pipeline, CopyTarget::Record(source.id), "admin").await.unwrap();

        assert!(report.failed.is_empty());
        let copy = &report.copied[0];
        assert_eq!(copy.kind, RecordKind::copied(BackupKind::Full));
        assert_eq!(copy.storage_medium, StorageMedium::Removable);
        assert_eq!(copy.checksum, source.checksum);
        assert!(copy.file_path.starts_with(usb.path().join("backup-archive")));

        let original = pipeline.catalog().get_record(source.id).await.unwrap().unwrap();
        assert_eq!(original, source);
    }

    #[tokio::test]
    async fn copy_all_reports_missing_artifacts_separately() {
        let dir = tempfile::tempdir().unwrap();
        let usb = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(dir.path(), locator(vec![volume(usb.path(), 32, 16, true)])).await;
        let kept = local_full(&pipeline).await;
        let gone = local_full(&pipeline).await;
        std::fs::remove_file(&gone.file_path).unwrap();

        let report = copy_to_removable(&pipeline, CopyTarget::All, "admin").await.unwrap();

        assert_eq!(report.copied.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].record_id, gone.id);
        assert!(report.failed[0].reason.contains("missing"));
        assert!(report.copied[0].file_path.ends_with(kept.file_path.file_name().unwrap()));
    }

    #[tokio::test]
    async fn single_missing_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let usb = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(dir.path(), locator(vec![volume(usb.path(), 32, 16, true)])).await;
        let record = local_full(&pipeline).await;
        std::fs::remove_file(&record.file_path).unwrap();

        let err = copy_to_removable(&pipeline, CopyTarget::Record(record.id), "admin").await.unwrap_err();
        assert!(matches!(err, AppError::ArtifactMissing(_)));
    }

    #[tokio::test]
    async fn copy_without_device_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(dir.path(), locator(vec![])).await;
        let record = local_full(&pipeline).await;

        let err = copy_to_removable(&pipeline, CopyTarget::Record(record.id), "admin").await.unwrap_err();
        assert!(matches!(err, AppError::RemovableStorageUnavailable));
    }
}
