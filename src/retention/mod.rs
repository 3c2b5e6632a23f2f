// plantvault/src/retention/mod.rs
use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub removed_records: Vec<i64>,
    pub freed_mb: f64,
    /// Files that could not be deleted; their records were removed anyway.
    pub file_errors: Vec<String>,
}

/// Deletes local records (and, best-effort, their files) older than `retention_days`.
pub async fn sweep_expired(catalog: &Catalog, retention_days: u32, now: DateTime<Utc>) -> Result<SweepReport> {
    let window = chrono::Duration::try_days(i64::from(retention_days))
        .ok_or_else(|| AppError::InvalidInput(format!("retention window of {} days is too large", retention_days)))?;
    let cutoff = now - window;
    let expired = catalog.local_records_older_than(cutoff).await?;

    let mut report = SweepReport::default();
    for record in expired {
        match tokio::fs::remove_file(&record.file_path).await {
            Ok(()) => report.freed_mb += record.size_mb,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(record_id = record.id, path = %record.file_path.display(), "expired artifact already gone");
            }
            Err(e) => {
                warn!(record_id = record.id, path = %record.file_path.display(), error = %e, "could not delete expired artifact");
                report.file_errors.push(format!("{}: {}", record.file_path.display(), e));
            }
        }
        if catalog.delete_record(record.id).await? {
            report.removed_records.push(record.id);
        }
    }

    info!(
        cutoff = %cutoff,
        removed = report.removed_records.len(),
        freed_mb = report.freed_mb,
        "retention sweep finished"
    );
    Ok(report)
}

/// Runs [`sweep_expired`] on its own cadence until `cancel` fires.
pub fn spawn_sweeper(
    catalog: Catalog,
    retention_days: u32,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(retention_days, every_secs = every.as_secs(), "retention sweeper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = sweep_expired(&catalog, retention_days, Utc::now()).await {
                        error!(error = %e, "retention sweep failed");
                    }
                }
            }
        }
        info!("retention sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::{BackupKind, NewBackupRecord, RecordKind, StorageMedium};
    use crate::testing::write_file;
    use std::path::Path;

    async fn record(catalog: &Catalog, dir: &Path, name: &str, medium: StorageMedium, age_days: i64) -> i64 {
        let path = write_file(&dir.join(name), b"artifact");
        catalog
            .insert_record(&NewBackupRecord {
                kind: RecordKind::produced(BackupKind::Full),
                file_path: path,
                size_mb: 1.5,
                created_at: Utc::now() - chrono::Duration::days(age_days),
                operator: "admin".to_string(),
                storage_medium: medium,
                checksum: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn no_local_record_outlives_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().await.unwrap();
        let old_local = record(&catalog, dir.path(), "a.sql.gz", StorageMedium::Local, 45).await;
        let old_mirrored = record(&catalog, dir.path(), "b.sql.gz", StorageMedium::LocalRemote, 31).await;
        let old_removable = record(&catalog, dir.path(), "c.sql.gz", StorageMedium::Removable, 90).await;
        let fresh = record(&catalog, dir.path(), "d.sql.gz", StorageMedium::Local, 3).await;

        let now = Utc::now();
        let report = sweep_expired(&catalog, 30, now).await.unwrap();

        assert_eq!(report.removed_records, vec![old_local, old_mirrored]);
        assert_eq!(report.freed_mb, 3.0);
        assert!(!dir.path().join("a.sql.gz").exists());
        assert!(dir.path().join("c.sql.gz").exists());

        let cutoff = now - chrono::Duration::days(30);
        let remaining = catalog.list_records(None, 0).await.unwrap();
        let ids: Vec<i64> = remaining.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&fresh) && ids.contains(&old_removable));
        assert!(remaining
            .iter()
            .filter(|r| r.storage_medium.includes_local())
            .all(|r| r.created_at >= cutoff));
    }

    #[tokio::test]
    async fn missing_file_still_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().await.unwrap();
        let id = record(&catalog, dir.path(), "gone.sql.gz", StorageMedium::Local, 60).await;
        std::fs::remove_file(dir.path().join("gone.sql.gz")).unwrap();

        let report = sweep_expired(&catalog, 30, Utc::now()).await.unwrap();
        assert_eq!(report.removed_records, vec![id]);
        assert_eq!(report.freed_mb, 0.0);
        assert!(catalog.get_record(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweeper_task_stops_on_cancel() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(catalog, 30, Duration::from_secs(3600), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
