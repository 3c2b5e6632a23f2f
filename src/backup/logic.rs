// plantvault/src/backup/logic.rs
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::archive;
use super::db_dump::{dump_changed_rows, DatabaseTool, DumpRequest};
use super::s3_upload;
use crate::catalog::models::{BackupKind, BackupRecord, RecordKind, StorageMedium};
use crate::catalog::records::new_record;
use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::removable::{ensure_capacity, RemovableLocator};
use crate::utils::bytes_to_mb;
use crate::utils::checksum::sha256_file_async;

const MAX_DISAMBIGUATOR: u32 = 1000;

/// Who asked for the backup. Scheduled runs tolerate a missing removable device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub kind: BackupKind,
    pub medium: StorageMedium,
    pub operator: String,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackupOutcome {
    Created(BackupRecord),
    /// The differential dump was below the size threshold; nothing was persisted.
    NoChanges,
}

/// Deletes a reserved artifact unless the pipeline reached the catalog insert.
struct PartialArtifact {
    path: PathBuf,
    armed: bool,
}

impl PartialArtifact {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialArtifact {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "could not remove partial artifact");
                }
            }
        }
    }
}

/// Dump -> compress -> checksum -> persist.
#[derive(Clone)]
pub struct BackupPipeline {
    catalog: Catalog,
    tool: Arc<dyn DatabaseTool>,
    locator: RemovableLocator,
    config: Arc<AppConfig>,
}

impl BackupPipeline {
    pub fn new(
        catalog: Catalog,
        tool: Arc<dyn DatabaseTool>,
        locator: RemovableLocator,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            catalog,
            tool,
            locator,
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn tool(&self) -> &Arc<dyn DatabaseTool> {
        &self.tool
    }

    pub fn locator(&self) -> &RemovableLocator {
        &self.locator
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs one backup to completion and records it.
    ///
    /// On any failure nothing is recorded and the partially written artifact
    /// is removed.
    pub async fn create_backup(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        let since = self.cutoff_for(request.kind).await?;
        let (dest_dir, medium) = self.resolve_destination(request).await?;
        tokio::fs::create_dir_all(&dest_dir).await?;

        info!(
            kind = %request.kind,
            medium = %medium,
            dir = %dest_dir.display(),
            operator = %request.operator,
            "starting backup"
        );

        let scratch = dest_dir.clone();
        let raw = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(".dump_").suffix(".sql").tempfile_in(&scratch)
        })
        .await??;

        let raw_bytes = match since {
            None => self.tool.dump(&DumpRequest::full(), raw.path()).await?.bytes_written,
            Some(since) => {
                let differential = &self.config.differential;
                let outcome = dump_changed_rows(
                    self.tool.as_ref(),
                    &differential.tables,
                    &differential.timestamp_columns,
                    since,
                    raw.path(),
                    &dest_dir,
                )
                .await?;
                if outcome.bytes_written < differential.min_bytes {
                    info!(
                        kind = %request.kind,
                        bytes = outcome.bytes_written,
                        since = %since,
                        "no changes since cutoff, nothing persisted"
                    );
                    return Ok(BackupOutcome::NoChanges);
                }
                outcome.bytes_written
            }
        };

        let (dir, kind, at) = (dest_dir.clone(), request.kind, Local::now().naive_local());
        let (artifact_path, artifact_file) = tokio::task::spawn_blocking(move || reserve_artifact(&dir, kind, at)).await??;
        let artifact = PartialArtifact::new(artifact_path.clone());

        let level = self.config.compression_level;
        tokio::task::spawn_blocking(move || {
            let result = archive::compress_into(raw.path(), artifact_file, level);
            drop(raw);
            result
        })
        .await??;

        let checksum = sha256_file_async(&artifact_path).await?;
        let size_mb = bytes_to_mb(tokio::fs::metadata(&artifact_path).await?.len());
        let medium = self.mirror_if_configured(&artifact_path, &checksum, medium).await;

        let record = self
            .catalog
            .insert_record(&new_record(
                RecordKind::produced(request.kind),
                artifact_path.clone(),
                size_mb,
                &request.operator,
                medium,
                Some(checksum),
            ))
            .await?;
        artifact.keep();

        info!(
            record_id = record.id,
            path = %record.file_path.display(),
            raw_bytes,
            size_mb = record.size_mb,
            medium = %record.storage_medium,
            "backup completed"
        );
        Ok(BackupOutcome::Created(record))
    }

    /// Lower bound for changed rows; `None` means a full dump.
    async fn cutoff_for(&self, kind: BackupKind) -> Result<Option<NaiveDateTime>> {
        let reference = match kind {
            BackupKind::Full => return Ok(None),
            BackupKind::Differential => self
                .catalog
                .latest_source_record(Some(BackupKind::Full))
                .await?
                .ok_or_else(|| AppError::InvalidInput("a differential backup needs a prior full backup".to_string()))?,
            BackupKind::MinimalChange => self
                .catalog
                .latest_source_record(None)
                .await?
                .ok_or_else(|| AppError::InvalidInput("a minimal-change backup needs a prior backup".to_string()))?,
        };
        Ok(Some(local_naive(reference.created_at)))
    }

    async fn resolve_destination(&self, request: &BackupRequest) -> Result<(PathBuf, StorageMedium)> {
        let local = (self.config.backup_dir.clone(), StorageMedium::Local);
        if request.medium != StorageMedium::Removable {
            return Ok(local);
        }

        let volume = match self.locator.locate_async().await?.required() {
            Ok(volume) => volume,
            Err(e) if request.trigger == Trigger::Scheduled => {
                warn!(error = %e, "removable storage unavailable, storing scheduled backup locally");
                return Ok(local);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = ensure_capacity(&volume, 0.0, self.config.removable.min_free_mb) {
            if request.trigger == Trigger::Scheduled {
                warn!(error = %e, "removable storage full, storing scheduled backup locally");
                return Ok(local);
            }
            return Err(e);
        }
        Ok((volume.archive_dir(), StorageMedium::Removable))
    }

    async fn mirror_if_configured(&self, path: &Path, checksum: &str, medium: StorageMedium) -> StorageMedium {
        let Some(spaces) = self.config.spaces_config.as_ref() else {
            return medium;
        };
        if medium != StorageMedium::Local {
            return medium;
        }
        match s3_upload::upload_artifact(spaces, path, checksum).await {
            Ok(_) => StorageMedium::LocalRemote,
            Err(e) => {
                error!(path = %path.display(), error = %e, "remote mirror failed, keeping local copy only");
                medium
            }
        }
    }
}

/// Record timestamps are UTC; database timestamp columns hold local wall-clock time.
pub fn local_naive(at: DateTime<Utc>) -> NaiveDateTime {
    at.with_timezone(&Local).naive_local()
}

/// Artifact name for a kind and wall-clock time, `<kind>_<YYYYMMDD_HHMMSS>[_N].sql.gz`.
pub fn artifact_name(kind: BackupKind, at: NaiveDateTime, disambiguator: u32) -> String {
    let stem = format!("{}_{}", kind.as_str(), at.format("%Y%m%d_%H%M%S"));
    if disambiguator <= 1 {
        format!("{}.sql.gz", stem)
    } else {
        format!("{}_{}.sql.gz", stem, disambiguator)
    }
}

/// Creates the artifact file with create-new semantics, appending `_2`, `_3`, ...
/// when another backup of the same kind claimed the same second.
pub fn reserve_artifact(dir: &Path, kind: BackupKind, at: NaiveDateTime) -> Result<(PathBuf, File)> {
    for n in 1..=MAX_DISAMBIGUATOR {
        let path = dir.join(artifact_name(kind, at, n));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free artifact name for {} at {}", kind, at),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::removable::testing::{locator, volume};
    use crate::testing::{config_in, FakeTool};
    use crate::utils::checksum::sha256_file;
    use chrono::Duration;
    use std::io::Read;

    async fn pipeline(dir: &Path, tool: FakeTool, locator: RemovableLocator) -> (BackupPipeline, Arc<FakeTool>) {
        let tool = Arc::new(tool);
        let catalog = Catalog::open_in_memory().await.unwrap();
        let pipeline = BackupPipeline::new(catalog, tool.clone(), locator, Arc::new(config_in(dir)));
        (pipeline, tool)
    }

    fn request(kind: BackupKind, medium: StorageMedium, trigger: Trigger) -> BackupRequest {
        BackupRequest {
            kind,
            medium,
            operator: "admin".to_string(),
            trigger,
        }
    }

    fn created(outcome: BackupOutcome) -> BackupRecord {
        match outcome {
            BackupOutcome::Created(record) => record,
            BackupOutcome::NoChanges => panic!("expected a record"),
        }
    }

    fn artifacts_in(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn full_backup_is_compressed_hashed_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), FakeTool::with_full_dump(), locator(vec![])).await;

        let record = created(
            pipeline
                .create_backup(&request(BackupKind::Full, StorageMedium::Local, Trigger::Manual))
                .await
                .unwrap(),
        );

        assert_eq!(record.kind, RecordKind::produced(BackupKind::Full));
        assert_eq!(record.storage_medium, StorageMedium::Local);
        assert!(record.file_path.starts_with(dir.path().join("backups")));
        let name = record.file_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("full_") && name.ends_with(".sql.gz"), "{name}");
        assert_eq!(record.checksum.as_deref(), Some(sha256_file(&record.file_path).unwrap().as_str()));

        let mut sql = String::new();
        flate2::read::GzDecoder::new(File::open(&record.file_path).unwrap())
            .read_to_string(&mut sql)
            .unwrap();
        assert!(sql.contains("CREATE TABLE plantas"));

        assert_eq!(artifacts_in(&dir.path().join("backups")), vec![record.file_path.clone()]);
        assert_eq!(pipeline.catalog().list_records(None, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_dump_creates_no_record_and_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool::new("").failing_dump("mysqldump: Got error: 1045: Access denied for user 'root'");
        let (pipeline, _) = pipeline(dir.path(), tool, locator(vec![])).await;

        let err = pipeline
            .create_backup(&request(BackupKind::Full, StorageMedium::Local, Trigger::Manual))
            .await
            .unwrap_err();

        assert!(matches!(&err, AppError::DumpFailed { .. }));
        assert!(err.to_string().contains("Access denied"));
        assert!(pipeline.catalog().list_records(None, 0).await.unwrap().is_empty());
        assert!(artifacts_in(&dir.path().join("backups")).is_empty());
    }

    #[tokio::test]
    async fn same_second_backups_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), FakeTool::with_full_dump(), locator(vec![])).await;
        let req = request(BackupKind::Full, StorageMedium::Local, Trigger::Manual);

        let (a, b) = tokio::join!(pipeline.create_backup(&req), pipeline.create_backup(&req));
        let (a, b) = (created(a.unwrap()), created(b.unwrap()));

        assert_ne!(a.id, b.id);
        assert_ne!(a.file_path, b.file_path);
        assert!(a.file_path.exists() && b.file_path.exists());
    }

    #[test]
    fn reservation_appends_disambiguator() {
        let dir = tempfile::tempdir().unwrap();
        let at = NaiveDateTime::parse_from_str("2026-03-10 02:00:00", "%Y-%m-%d %H:%M:%S").unwrap();

        let (first, _) = reserve_artifact(dir.path(), BackupKind::Full, at).unwrap();
        let (second, _) = reserve_artifact(dir.path(), BackupKind::Full, at).unwrap();
        let (third, _) = reserve_artifact(dir.path(), BackupKind::Full, at).unwrap();
        let (other_kind, _) = reserve_artifact(dir.path(), BackupKind::Differential, at).unwrap();

        assert_eq!(first.file_name().unwrap(), "full_20260310_020000.sql.gz");
        assert_eq!(second.file_name().unwrap(), "full_20260310_020000_2.sql.gz");
        assert_eq!(third.file_name().unwrap(), "full_20260310_020000_3.sql.gz");
        assert_eq!(other_kind.file_name().unwrap(), "differential_20260310_020000.sql.gz");
    }

    #[tokio::test]
    async fn differential_requires_a_full_backup() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), FakeTool::with_full_dump(), locator(vec![])).await;

        let err = pipeline
            .create_backup(&request(BackupKind::Differential, StorageMedium::Local, Trigger::Manual))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn differential_filters_on_last_full_backup_time() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, tool) = pipeline(dir.path(), FakeTool::with_full_dump(), locator(vec![])).await;
        let full_at = Utc::now() - Duration::hours(6);
        pipeline
            .catalog()
            .insert_record(&crate::catalog::models::NewBackupRecord {
                kind: RecordKind::produced(BackupKind::Full),
                file_path: dir.path().join("old_full.sql.gz"),
                size_mb: 1.0,
                created_at: full_at,
                operator: "admin".to_string(),
                storage_medium: StorageMedium::Local,
                checksum: None,
            })
            .await
            .unwrap();

        let record = created(
            pipeline
                .create_backup(&request(BackupKind::Differential, StorageMedium::Local, Trigger::Manual))
                .await
                .unwrap(),
        );
        assert_eq!(record.kind, RecordKind::produced(BackupKind::Differential));

        let expected = format!("> '{}'", local_naive(full_at).format("%Y-%m-%d %H:%M:%S"));
        let requests = tool.requests();
        assert!(!requests.is_empty());
        assert!(requests.iter().all(|r| r.data_only && r.where_clause.as_deref().unwrap().ends_with(&expected)));
    }

    #[tokio::test]
    async fn tiny_differential_reports_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), FakeTool::new("-- nothing\n"), locator(vec![])).await;
        pipeline
            .catalog()
            .insert_record(&new_record(
                RecordKind::produced(BackupKind::Full),
                dir.path().join("full.sql.gz"),
                1.0,
                "admin",
                StorageMedium::Local,
                None,
            ))
            .await
            .unwrap();

        let outcome = pipeline
            .create_backup(&request(BackupKind::MinimalChange, StorageMedium::Local, Trigger::Manual))
            .await
            .unwrap();
        assert_eq!(outcome, BackupOutcome::NoChanges);
        assert_eq!(pipeline.catalog().list_records(None, 0).await.unwrap().len(), 1);
        assert!(artifacts_in(&dir.path().join("backups")).is_empty());
    }

    #[tokio::test]
    async fn differential_with_rejected_credentials_fails_instead_of_reporting_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool::new("").failing_dump("mysqldump: Got error: 1045: Access denied for user 'root'");
        let (pipeline, _) = pipeline(dir.path(), tool, locator(vec![])).await;
        pipeline
            .catalog()
            .insert_record(&new_record(
                RecordKind::produced(BackupKind::Full),
                dir.path().join("full.sql.gz"),
                1.0,
                "admin",
                StorageMedium::Local,
                None,
            ))
            .await
            .unwrap();

        let err = pipeline
            .create_backup(&request(BackupKind::Differential, StorageMedium::Local, Trigger::Manual))
            .await
            .unwrap_err();

        assert!(matches!(&err, AppError::DumpFailed { .. }), "{err:?}");
        assert!(err.to_string().contains("Access denied"));
        assert_eq!(pipeline.catalog().list_records(None, 0).await.unwrap().len(), 1);
        assert!(artifacts_in(&dir.path().join("backups")).is_empty());
    }

    #[tokio::test]
    async fn manual_removable_backup_without_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), FakeTool::with_full_dump(), locator(vec![])).await;

        let err = pipeline
            .create_backup(&request(BackupKind::Full, StorageMedium::Removable, Trigger::Manual))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemovableStorageUnavailable));
    }

    #[tokio::test]
    async fn scheduled_removable_backup_falls_back_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), FakeTool::with_full_dump(), locator(vec![])).await;

        let record = created(
            pipeline
                .create_backup(&request(BackupKind::Full, StorageMedium::Removable, Trigger::Scheduled))
                .await
                .unwrap(),
        );
        assert_eq!(record.storage_medium, StorageMedium::Local);
    }

    #[tokio::test]
    async fn removable_backup_lands_in_archive_dir() {
        let dir = tempfile::tempdir().unwrap();
        let usb = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(
            dir.path(),
            FakeTool::with_full_dump(),
            locator(vec![volume(usb.path(), 32, 16, true)]),
        )
        .await;

        let record = created(
            pipeline
                .create_backup(&request(BackupKind::Full, StorageMedium::Removable, Trigger::Manual))
                .await
                .unwrap(),
        );
        assert_eq!(record.storage_medium, StorageMedium::Removable);
        assert!(record.file_path.starts_with(usb.path().join("backup-archive")));
    }

    #[tokio::test]
    async fn full_removable_device_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let usb = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(
            dir.path(),
            FakeTool::with_full_dump(),
            locator(vec![volume(usb.path(), 1, 0, true)]),
        )
        .await;

        let err = pipeline
            .create_backup(&request(BackupKind::Full, StorageMedium::Removable, Trigger::Manual))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemovableStorageFull { .. }));
    }
}
