// plantvault/src/restore/logic.rs
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::verification::verify_record;
use crate::backup::archive;
use crate::backup::db_dump::DatabaseTool;
use crate::catalog::models::{AuditPhase, BackupRecord};
use crate::catalog::Catalog;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub operation_id: Uuid,
    pub record_id: i64,
    pub file_path: PathBuf,
    /// Set when the artifact no longer matches its stored digest. The restore still ran.
    pub checksum_warning: Option<String>,
}

/// Replays a backup into the application database.
///
/// Destructive. A `started` audit row is written before anything else and a
/// `succeeded` or `failed` row once the outcome is known.
pub async fn restore_backup(
    catalog: &Catalog,
    tool: &dyn DatabaseTool,
    record_id: i64,
    actor: &str,
    scratch_dir: &Path,
) -> Result<RestoreReport> {
    let record = catalog
        .get_record(record_id)
        .await?
        .ok_or_else(|| AppError::not_found("backup", record_id))?;

    let operation_id = Uuid::new_v4();
    catalog
        .record_restore_audit(operation_id, actor, record_id, AuditPhase::Started, None)
        .await?;
    info!(
        operation_id = %operation_id,
        record_id,
        actor,
        path = %record.file_path.display(),
        "restore started"
    );

    let result = run_restore(tool, &record, scratch_dir).await;

    let (phase, detail) = match &result {
        Ok(warning) => (AuditPhase::Succeeded, warning.clone()),
        Err(e) => (AuditPhase::Failed, Some(e.to_string())),
    };
    if let Err(e) = catalog
        .record_restore_audit(operation_id, actor, record_id, phase, detail.as_deref())
        .await
    {
        error!(operation_id = %operation_id, error = %e, "could not write restore audit outcome");
    }

    match result {
        Ok(checksum_warning) => {
            info!(operation_id = %operation_id, record_id, "restore succeeded");
            Ok(RestoreReport {
                operation_id,
                record_id,
                file_path: record.file_path,
                checksum_warning,
            })
        }
        Err(e) => {
            error!(operation_id = %operation_id, record_id, error = %e, "restore failed");
            Err(e)
        }
    }
}

async fn run_restore(tool: &dyn DatabaseTool, record: &BackupRecord, scratch_dir: &Path) -> Result<Option<String>> {
    let (artifact, record_id) = (record.file_path.as_path(), record.id);
    let verify = verify_record(record).await?;
    let checksum_warning = verify.mismatch().map(|e| e.to_string());
    if let Some(warning) = &checksum_warning {
        warn!(record_id, warning = %warning, "restoring an artifact whose checksum changed");
    }

    if archive::is_gzip(artifact) {
        let (source, scratch) = (artifact.to_path_buf(), scratch_dir.to_path_buf());
        let sql = tokio::task::spawn_blocking(move || archive::decompress_to_temp(&source, &scratch)).await??;
        tool.import(sql.path()).await?;
    } else {
        tool.import(artifact).await?;
    }

    Ok(checksum_warning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::{BackupKind, RecordKind, StorageMedium};
    use crate::catalog::records::new_record;
    use crate::testing::{write_file, FakeTool};
    use crate::utils::checksum::sha256_file;
    use std::fs::File;

    async fn gz_record(catalog: &Catalog, dir: &Path, sql: &str) -> BackupRecord {
        let raw = write_file(&dir.join("raw.sql"), sql.as_bytes());
        let gz = dir.join("full_20260310_020000.sql.gz");
        archive::compress_into(&raw, File::create(&gz).unwrap(), 6).unwrap();
        catalog
            .insert_record(&new_record(
                RecordKind::produced(BackupKind::Full),
                gz.clone(),
                0.01,
                "admin",
                StorageMedium::Local,
                Some(sha256_file(&gz).unwrap()),
            ))
            .await
            .unwrap()
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|e| e.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn restore_decompresses_imports_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let catalog = Catalog::open_in_memory().await.unwrap();
        let record = gz_record(&catalog, dir.path(), "INSERT INTO plantas VALUES (1, 'Ficus');\n").await;
        let tool = FakeTool::new("");

        let report = restore_backup(&catalog, &tool, record.id, "admin", &scratch).await.unwrap();

        assert_eq!(tool.imported(), vec!["INSERT INTO plantas VALUES (1, 'Ficus');\n".to_string()]);
        assert!(report.checksum_warning.is_none());
        assert_eq!(scratch_entries(&scratch), 0);

        let audit = catalog.restore_audit_for(record.id).await.unwrap();
        let phases: Vec<AuditPhase> = audit.iter().map(|a| a.phase).collect();
        assert_eq!(phases, vec![AuditPhase::Started, AuditPhase::Succeeded]);
        assert!(audit.iter().all(|a| a.operation_id == report.operation_id && a.actor == "admin"));
    }

    #[tokio::test]
    async fn failed_import_is_audited_and_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let catalog = Catalog::open_in_memory().await.unwrap();
        let record = gz_record(&catalog, dir.path(), "DROP TABLE plantas;\n").await;
        let tool = FakeTool::new("").failing_import("ERROR 1045 (28000): Access denied");

        let err = restore_backup(&catalog, &tool, record.id, "admin", &scratch).await.unwrap_err();

        assert!(matches!(err, AppError::RestoreFailed { .. }));
        assert_eq!(scratch_entries(&scratch), 0);
        let audit = catalog.restore_audit_for(record.id).await.unwrap();
        assert_eq!(audit.last().unwrap().phase, AuditPhase::Failed);
        assert!(audit.last().unwrap().detail.as_deref().unwrap().contains("Access denied"));
    }

    #[tokio::test]
    async fn missing_artifact_fails_before_import() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().await.unwrap();
        let record = gz_record(&catalog, dir.path(), "SELECT 1;\n").await;
        std::fs::remove_file(&record.file_path).unwrap();
        let tool = FakeTool::new("");

        let err = restore_backup(&catalog, &tool, record.id, "admin", dir.path()).await.unwrap_err();

        assert!(matches!(err, AppError::ArtifactMissing(_)));
        assert!(tool.imported().is_empty());
        let phases: Vec<AuditPhase> = catalog
            .restore_audit_for(record.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.phase)
            .collect();
        assert_eq!(phases, vec![AuditPhase::Started, AuditPhase::Failed]);
    }

    #[tokio::test]
    async fn checksum_drift_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().await.unwrap();
        let raw = write_file(&dir.path().join("plain.sql"), b"INSERT INTO usuarios VALUES (1);\n");
        let record = catalog
            .insert_record(&new_record(
                RecordKind::imported(BackupKind::Full),
                raw,
                0.01,
                "admin",
                StorageMedium::Local,
                Some("0".repeat(64)),
            ))
            .await
            .unwrap();
        let tool = FakeTool::new("");

        let report = restore_backup(&catalog, &tool, record.id, "admin", dir.path()).await.unwrap();

        assert!(report.checksum_warning.unwrap().contains("Checksum mismatch"));
        assert_eq!(tool.imported().len(), 1);
    }
}
