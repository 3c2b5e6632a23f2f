// plantvault/src/catalog/records.rs
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::models::{BackupKind, BackupRecord, NewBackupRecord, RecordKind, SizeStats, StorageMedium};
use super::Catalog;
use crate::errors::Result;

const RECORD_COLUMNS: &str =
    "id, kind, file_path, size_mb, created_at, operator, storage_medium, checksum";

fn record_from_row(row: &SqliteRow) -> Result<BackupRecord> {
    let kind: String = row.try_get("kind")?;
    let medium: String = row.try_get("storage_medium")?;
    let file_path: String = row.try_get("file_path")?;

    Ok(BackupRecord {
        id: row.try_get("id")?,
        kind: kind.parse()?,
        file_path: PathBuf::from(file_path),
        size_mb: row.try_get("size_mb")?,
        created_at: row.try_get("created_at")?,
        operator: row.try_get("operator")?,
        storage_medium: medium.parse()?,
        checksum: row.try_get("checksum")?,
    })
}

impl Catalog {
    pub async fn insert_record(&self, record: &NewBackupRecord) -> Result<BackupRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO backup_records (kind, file_path, size_mb, created_at, operator, storage_medium, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(record.kind.to_string())
        .bind(record.file_path.to_string_lossy().to_string())
        .bind(record.size_mb.max(0.0))
        .bind(record.created_at)
        .bind(&record.operator)
        .bind(record.storage_medium.as_str())
        .bind(&record.checksum)
        .fetch_one(self.pool())
        .await?;

        record_from_row(&row)
    }

    pub async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM backup_records WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// All records, newest first. `limit` of `None` returns everything.
    pub async fn list_records(&self, limit: Option<i64>, offset: i64) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM backup_records
             ORDER BY created_at DESC, id DESC
             LIMIT ?1 OFFSET ?2"
        ))
        .bind(limit.unwrap_or(-1))
        .bind(offset.max(0))
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    pub async fn records_by_medium(&self, medium: StorageMedium) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM backup_records
             WHERE storage_medium = ?1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(medium.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Records created before `cutoff` whose artifact lives on local storage.
    pub async fn local_records_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM backup_records
             WHERE created_at < ?1 AND storage_medium IN ('local', 'local+remote')
             ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Most recent record of the given base kind produced here or imported.
    /// With `None`, the most recent produced or imported record of any kind.
    pub async fn latest_source_record(&self, base: Option<BackupKind>) -> Result<Option<BackupRecord>> {
        let records = self.list_records(None, 0).await?;
        Ok(records.into_iter().find(|record| {
            record.kind.origin != super::models::RecordOrigin::Copied
                && base.is_none_or(|kind| record.kind.base == kind)
        }))
    }

    pub async fn record_exists_for_path(&self, path: &Path) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backup_records WHERE file_path = ?1")
            .bind(path.to_string_lossy().to_string())
            .fetch_one(self.pool())
            .await?;
        Ok(count > 0)
    }

    /// Deletes one record. Never cascades; returns whether a row existed.
    pub async fn delete_record(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backup_records WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn size_stats(&self) -> Result<SizeStats> {
        let (record_count, total_mb): (i64, f64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size_mb), 0.0) FROM backup_records")
                .fetch_one(self.pool())
                .await?;

        let by_kind: Vec<(String, f64)> = sqlx::query_as(
            "SELECT kind, COALESCE(SUM(size_mb), 0.0) FROM backup_records GROUP BY kind ORDER BY kind",
        )
        .fetch_all(self.pool())
        .await?;

        let by_medium: Vec<(String, f64)> = sqlx::query_as(
            "SELECT storage_medium, COALESCE(SUM(size_mb), 0.0) FROM backup_records
             GROUP BY storage_medium ORDER BY storage_medium",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(SizeStats {
            record_count,
            total_mb,
            by_kind,
            by_medium,
        })
    }
}

/// Builds the insert payload for a freshly produced artifact.
pub fn new_record(
    kind: RecordKind,
    file_path: PathBuf,
    size_mb: f64,
    operator: &str,
    storage_medium: StorageMedium,
    checksum: Option<String>,
) -> NewBackupRecord {
    NewBackupRecord {
        kind,
        file_path,
        size_mb,
        created_at: Utc::now(),
        operator: operator.to_string(),
        storage_medium,
        checksum,
    }
}
