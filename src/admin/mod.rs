// plantvault/src/admin/mod.rs
//! Administrative operations offered to the outer layers (CLI, web).
//!
//! Every mutating operation takes an [`Actor`]. The boundary builds it once
//! through [`authorize`]; the operations below never re-check permissions.

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::backup::import::{import_artifacts, ImportReport};
use crate::backup::{copy_to_removable, BackupOutcome, BackupPipeline, BackupRequest, CopyReport, CopyTarget, Trigger};
use crate::catalog::models::{BackupKind, BackupRecord, RestoreAuditEntry, SizeStats, StorageMedium};
use crate::catalog::Catalog;
use crate::errors::{AppError, Result};
use crate::removable::{RemovableLookup, Volume};
use crate::restore::{restore_backup, verify_backup, RestoreReport, VerifyReport};
use crate::retention::{sweep_expired, SweepReport};
use crate::schedule::{next_occurrence, BackupSchedule, NewSchedule};
use crate::scheduler::ScheduleRunner;

/// Proof that the boundary layer accepted an operator. Only [`authorize`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    name: String,
}

impl Actor {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub fn authorize(operator: &str) -> Result<Actor> {
    let name = operator.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("an operator name is required".to_string()));
    }
    if name.chars().any(char::is_control) || name.len() > 100 {
        return Err(AppError::InvalidInput(format!("invalid operator name '{}'", name.escape_debug())));
    }
    Ok(Actor { name: name.to_string() })
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeReport {
    pub volumes: Vec<Volume>,
    pub selected: Option<Volume>,
    pub rejected: Option<PathBuf>,
}

#[derive(Clone)]
pub struct BackupService {
    pipeline: BackupPipeline,
    runner: ScheduleRunner,
    scratch_dir: PathBuf,
}

impl BackupService {
    pub fn new(pipeline: BackupPipeline, runner: ScheduleRunner) -> Self {
        let scratch_dir = pipeline.config().backup_dir.join(".restore");
        Self {
            pipeline,
            runner,
            scratch_dir,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        self.pipeline.catalog()
    }

    pub async fn create_backup(&self, actor: &Actor, kind: BackupKind, medium: StorageMedium) -> Result<BackupOutcome> {
        if medium == StorageMedium::LocalRemote {
            return Err(AppError::InvalidInput(
                "request a local backup; the remote mirror is applied automatically".to_string(),
            ));
        }
        info!(actor = actor.name(), kind = %kind, medium = %medium, "manual backup requested");
        self.pipeline
            .create_backup(&BackupRequest {
                kind,
                medium,
                operator: actor.name().to_string(),
                trigger: Trigger::Manual,
            })
            .await
    }

    pub async fn restore_backup(&self, actor: &Actor, record_id: i64) -> Result<RestoreReport> {
        warn!(actor = actor.name(), record_id, "restore requested, database contents will be replaced");
        restore_backup(
            self.pipeline.catalog(),
            self.pipeline.tool().as_ref(),
            record_id,
            actor.name(),
            &self.scratch_dir,
        )
        .await
    }

    pub async fn verify_backup(&self, record_id: i64) -> Result<VerifyReport> {
        verify_backup(self.pipeline.catalog(), record_id).await
    }

    pub async fn copy_to_removable(&self, actor: &Actor, target: CopyTarget) -> Result<CopyReport> {
        info!(actor = actor.name(), target = ?target, "copy to removable storage requested");
        copy_to_removable(&self.pipeline, target, actor.name()).await
    }

    pub async fn create_schedule(&self, actor: &Actor, schedule: &NewSchedule) -> Result<BackupSchedule> {
        schedule.validate()?;
        let next = next_occurrence(&schedule.recurrence, schedule.fire_time, Local::now().naive_local(), None);
        let stored = self
            .pipeline
            .catalog()
            .insert_schedule(schedule, actor.name(), Some(next))
            .await?;
        info!(actor = actor.name(), schedule_id = stored.id, next_fire_at = %next, "schedule created");
        Ok(stored)
    }

    /// Replaces a schedule's definition; the next fire time is recomputed.
    pub async fn update_schedule(&self, actor: &Actor, id: i64, schedule: &NewSchedule) -> Result<BackupSchedule> {
        schedule.validate()?;
        let existing = self.schedule(id).await?;
        let next = next_occurrence(
            &schedule.recurrence,
            schedule.fire_time,
            Local::now().naive_local(),
            existing.last_fired_at,
        );
        self.pipeline.catalog().update_schedule(id, schedule, Some(next)).await?;
        info!(actor = actor.name(), schedule_id = id, "schedule updated");
        self.schedule(id).await
    }

    /// Flips `active`. Activation computes a fresh next fire time; deactivation clears it.
    pub async fn toggle_schedule(&self, actor: &Actor, id: i64) -> Result<BackupSchedule> {
        let current = self.schedule(id).await?;
        let activate = !current.active;
        let next = activate.then(|| {
            next_occurrence(
                &current.recurrence,
                current.fire_time,
                Local::now().naive_local(),
                current.last_fired_at,
            )
        });
        self.pipeline.catalog().set_schedule_active(id, activate, next).await?;
        info!(actor = actor.name(), schedule_id = id, active = activate, "schedule toggled");
        self.schedule(id).await
    }

    pub async fn delete_schedule(&self, actor: &Actor, id: i64) -> Result<()> {
        if !self.pipeline.catalog().delete_schedule(id).await? {
            return Err(AppError::not_found("schedule", id));
        }
        info!(actor = actor.name(), schedule_id = id, "schedule deleted");
        Ok(())
    }

    pub async fn fire_schedule_now(&self, actor: &Actor, id: i64) -> Result<BackupOutcome> {
        info!(actor = actor.name(), schedule_id = id, "schedule fired manually");
        self.runner.fire_now(id).await
    }

    pub async fn schedule(&self, id: i64) -> Result<BackupSchedule> {
        self.pipeline
            .catalog()
            .get_schedule(id)
            .await?
            .ok_or_else(|| AppError::not_found("schedule", id))
    }

    pub async fn list_schedules(&self) -> Result<Vec<BackupSchedule>> {
        self.pipeline.catalog().list_schedules().await
    }

    pub async fn list_records(&self, limit: Option<i64>, offset: i64) -> Result<Vec<BackupRecord>> {
        self.pipeline.catalog().list_records(limit, offset).await
    }

    pub async fn get_record(&self, id: i64) -> Result<BackupRecord> {
        self.pipeline
            .catalog()
            .get_record(id)
            .await?
            .ok_or_else(|| AppError::not_found("backup", id))
    }

    pub async fn records_by_medium(&self, medium: StorageMedium) -> Result<Vec<BackupRecord>> {
        self.pipeline.catalog().records_by_medium(medium).await
    }

    pub async fn restore_history(&self, record_id: i64) -> Result<Vec<RestoreAuditEntry>> {
        self.pipeline.catalog().restore_audit_for(record_id).await
    }

    pub async fn stats(&self) -> Result<SizeStats> {
        self.pipeline.catalog().size_stats().await
    }

    /// Records whose artifact no longer exists.
    pub async fn find_orphans(&self) -> Result<Vec<BackupRecord>> {
        let records = self.pipeline.catalog().list_records(None, 0).await?;
        let orphans: Vec<BackupRecord> = records.into_iter().filter(BackupRecord::is_orphaned).collect();
        for orphan in &orphans {
            warn!(record_id = orphan.id, path = %orphan.file_path.display(), "orphaned backup record");
        }
        Ok(orphans)
    }

    /// Deletes a record and, best-effort, its artifact.
    pub async fn delete_record(&self, actor: &Actor, id: i64) -> Result<BackupRecord> {
        let record = self.get_record(id).await?;
        if let Err(e) = tokio::fs::remove_file(&record.file_path).await {
            warn!(record_id = id, path = %record.file_path.display(), error = %e, "could not delete artifact");
        }
        self.pipeline.catalog().delete_record(id).await?;
        info!(actor = actor.name(), record_id = id, "backup record deleted");
        Ok(record)
    }

    pub async fn import_artifacts(&self, actor: &Actor, dir: Option<&Path>) -> Result<ImportReport> {
        let dir = dir.unwrap_or(&self.pipeline.config().backup_dir);
        let medium = if dir.starts_with(&self.pipeline.config().backup_dir) {
            StorageMedium::Local
        } else {
            StorageMedium::Removable
        };
        info!(actor = actor.name(), dir = %dir.display(), medium = %medium, "importing untracked artifacts");
        import_artifacts(self.pipeline.catalog(), dir, actor.name(), medium).await
    }

    pub async fn sweep(&self, actor: &Actor) -> Result<SweepReport> {
        info!(actor = actor.name(), "manual retention sweep");
        sweep_expired(
            self.pipeline.catalog(),
            self.pipeline.config().retention_days,
            chrono::Utc::now(),
        )
        .await
    }

    pub async fn volumes(&self) -> Result<VolumeReport> {
        let locator = self.pipeline.locator().clone();
        let (volumes, lookup) = tokio::task::spawn_blocking(move || (locator.volumes(), locator.locate())).await?;
        let (selected, rejected) = match lookup {
            RemovableLookup::Found(volume) => (Some(volume), None),
            RemovableLookup::NotConnected => (None, None),
            RemovableLookup::Unsafe(path) => (None, Some(path)),
        };
        Ok(VolumeReport {
            volumes,
            selected,
            rejected,
        })
    }
}
