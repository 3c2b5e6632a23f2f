// plantvault/src/catalog/audit.rs
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::models::{AuditPhase, RestoreAuditEntry};
use super::Catalog;
use crate::errors::{AppError, Result};

impl Catalog {
    pub async fn record_restore_audit(
        &self,
        operation_id: Uuid,
        actor: &str,
        backup_id: i64,
        phase: AuditPhase,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO restore_audit (operation_id, actor, backup_id, phase, detail, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(operation_id.to_string())
        .bind(actor)
        .bind(backup_id)
        .bind(phase.as_str())
        .bind(detail)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn restore_audit_for(&self, backup_id: i64) -> Result<Vec<RestoreAuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, operation_id, actor, backup_id, phase, detail, at
             FROM restore_audit WHERE backup_id = ?1 ORDER BY id",
        )
        .bind(backup_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<RestoreAuditEntry> {
                let operation_id: String = row.try_get("operation_id")?;
                let phase: String = row.try_get("phase")?;
                Ok(RestoreAuditEntry {
                    id: row.try_get("id")?,
                    operation_id: Uuid::parse_str(&operation_id)
                        .map_err(|e| AppError::InvalidInput(format!("bad operation id {}: {}", operation_id, e)))?,
                    actor: row.try_get("actor")?,
                    backup_id: row.try_get("backup_id")?,
                    phase: phase.parse()?,
                    detail: row.try_get("detail")?,
                    at: row.try_get("at")?,
                })
            })
            .collect()
    }
}
