// plantvault/src/catalog/schedules.rs
use chrono::{NaiveDateTime, NaiveTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use super::Catalog;
use crate::errors::Result;
use crate::schedule::{BackupSchedule, NewSchedule, Recurrence};

const SCHEDULE_COLUMNS: &str = "id, kind, recurrence, fire_time, weekdays, day_of_month, storage_medium, \
     active, last_fired_at, next_fire_at, creator, created_at";

fn schedule_from_row(row: &SqliteRow) -> Result<BackupSchedule> {
    let kind: String = row.try_get("kind")?;
    let recurrence: String = row.try_get("recurrence")?;
    let weekdays: Option<String> = row.try_get("weekdays")?;
    let day_of_month: Option<i64> = row.try_get("day_of_month")?;
    let medium: String = row.try_get("storage_medium")?;
    let fire_time: NaiveTime = row.try_get("fire_time")?;

    Ok(BackupSchedule {
        id: row.try_get("id")?,
        kind: kind.parse()?,
        recurrence: Recurrence::from_parts(&recurrence, weekdays.as_deref(), day_of_month)?,
        fire_time,
        storage_medium: medium.parse()?,
        active: row.try_get("active")?,
        last_fired_at: row.try_get("last_fired_at")?,
        next_fire_at: row.try_get("next_fire_at")?,
        creator: row.try_get("creator")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Maps each row on its own so one corrupt schedule cannot hide the others.
fn readable_schedules(rows: &[SqliteRow]) -> Vec<BackupSchedule> {
    rows.iter()
        .filter_map(|row| match schedule_from_row(row) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                let schedule_id = row.try_get::<i64, _>("id").ok();
                warn!(schedule_id = ?schedule_id, error = %e, "skipping unreadable schedule row");
                None
            }
        })
        .collect()
}

impl Catalog {
    pub async fn insert_schedule(
        &self,
        schedule: &NewSchedule,
        creator: &str,
        next_fire_at: Option<NaiveDateTime>,
    ) -> Result<BackupSchedule> {
        let row = sqlx::query(&format!(
            "INSERT INTO backup_schedules
                (kind, recurrence, fire_time, weekdays, day_of_month, storage_medium, active, next_fire_at, creator, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9)
             RETURNING {SCHEDULE_COLUMNS}"
        ))
        .bind(schedule.kind.as_str())
        .bind(schedule.recurrence.as_str())
        .bind(schedule.fire_time)
        .bind(schedule.recurrence.weekdays_column())
        .bind(schedule.recurrence.day_of_month_column())
        .bind(schedule.storage_medium.as_str())
        .bind(next_fire_at)
        .bind(creator)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;

        schedule_from_row(&row)
    }

    pub async fn get_schedule(&self, id: i64) -> Result<Option<BackupSchedule>> {
        let row = sqlx::query(&format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    pub async fn list_schedules(&self) -> Result<Vec<BackupSchedule>> {
        let rows = sqlx::query(&format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules ORDER BY id"))
            .fetch_all(self.pool())
            .await?;

        Ok(readable_schedules(&rows))
    }

    /// Active schedules whose next fire time is at or before `now`, oldest first.
    pub async fn due_schedules(&self, now: NaiveDateTime) -> Result<Vec<BackupSchedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM backup_schedules
             WHERE active = 1 AND next_fire_at IS NOT NULL AND next_fire_at <= ?1
             ORDER BY next_fire_at, id"
        ))
        .bind(now)
        .fetch_all(self.pool())
        .await?;

        Ok(readable_schedules(&rows))
    }

    /// Active schedules that have never had a next fire time computed.
    pub async fn unscheduled_active_schedules(&self) -> Result<Vec<BackupSchedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM backup_schedules
             WHERE active = 1 AND next_fire_at IS NULL
             ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(readable_schedules(&rows))
    }

    /// Sets `next_fire_at` on an active schedule. No-op if it was deactivated meanwhile.
    pub async fn set_next_fire(&self, id: i64, next_fire_at: NaiveDateTime) -> Result<bool> {
        let result = sqlx::query("UPDATE backup_schedules SET next_fire_at = ?1 WHERE id = ?2 AND active = 1")
            .bind(next_fire_at)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Records a successful firing together with the recomputed next fire time.
    pub async fn mark_fired(&self, id: i64, fired_at: NaiveDateTime, next_fire_at: NaiveDateTime) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE backup_schedules SET last_fired_at = ?1, next_fire_at = ?2 WHERE id = ?3 AND active = 1",
        )
        .bind(fired_at)
        .bind(next_fire_at)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Activates (with a computed next fire time) or deactivates (clearing it).
    pub async fn set_schedule_active(
        &self,
        id: i64,
        active: bool,
        next_fire_at: Option<NaiveDateTime>,
    ) -> Result<bool> {
        let next_fire_at = if active { next_fire_at } else { None };
        let result = sqlx::query("UPDATE backup_schedules SET active = ?1, next_fire_at = ?2 WHERE id = ?3")
            .bind(active)
            .bind(next_fire_at)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replaces the recurrence definition together with its recomputed next fire time.
    pub async fn update_schedule(
        &self,
        id: i64,
        schedule: &NewSchedule,
        next_fire_at: Option<NaiveDateTime>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE backup_schedules
             SET kind = ?1, recurrence = ?2, fire_time = ?3, weekdays = ?4, day_of_month = ?5,
                 storage_medium = ?6, next_fire_at = CASE WHEN active = 1 THEN ?7 ELSE NULL END
             WHERE id = ?8",
        )
        .bind(schedule.kind.as_str())
        .bind(schedule.recurrence.as_str())
        .bind(schedule.fire_time)
        .bind(schedule.recurrence.weekdays_column())
        .bind(schedule.recurrence.day_of_month_column())
        .bind(schedule.storage_medium.as_str())
        .bind(next_fire_at)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backup_schedules WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
