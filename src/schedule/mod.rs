//! Recurring backup policies and next-fire-time computation.
//!
//! All schedule timestamps are local wall-clock [`NaiveDateTime`] values: an
//! administrator configures "02:00 every day", not an instant in UTC.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::warn;

use crate::catalog::models::{BackupKind, StorageMedium};
use crate::errors::{AppError, Result};

/// How often a schedule fires. Only the field matching the variant exists,
/// so weekdays and day-of-month can never both be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Daily,
    /// Weekday indices, 0 = Monday … 6 = Sunday.
    Weekly { weekdays: BTreeSet<u8> },
    /// 1–31; clamped to the last day of shorter months.
    Monthly { day_of_month: u32 },
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly { .. } => "weekly",
            Recurrence::Monthly { .. } => "monthly",
        }
    }

    /// Rejects configurations the engine could only answer with its fallback.
    pub fn validate(&self) -> Result<()> {
        match self {
            Recurrence::Daily => Ok(()),
            Recurrence::Weekly { weekdays } => {
                if weekdays.is_empty() {
                    return Err(AppError::ScheduleComputation(
                        "weekly schedule needs at least one weekday".to_string(),
                    ));
                }
                if let Some(bad) = weekdays.iter().find(|d| **d > 6) {
                    return Err(AppError::ScheduleComputation(format!(
                        "weekday index {} is out of range 0-6",
                        bad
                    )));
                }
                Ok(())
            }
            Recurrence::Monthly { day_of_month } => {
                if (1..=31).contains(day_of_month) {
                    Ok(())
                } else {
                    Err(AppError::ScheduleComputation(format!(
                        "day of month {} is out of range 1-31",
                        day_of_month
                    )))
                }
            }
        }
    }

    /// Rebuilds a recurrence from its catalog columns.
    pub fn from_parts(recurrence: &str, weekdays: Option<&str>, day_of_month: Option<i64>) -> Result<Self> {
        match recurrence {
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly {
                weekdays: parse_weekdays(weekdays.unwrap_or(""))?,
            }),
            "monthly" => {
                let day = day_of_month.ok_or_else(|| {
                    AppError::ScheduleComputation("monthly schedule without day of month".to_string())
                })?;
                let day_of_month = u32::try_from(day)
                    .map_err(|_| AppError::ScheduleComputation(format!("invalid day of month {}", day)))?;
                Ok(Recurrence::Monthly { day_of_month })
            }
            other => Err(AppError::InvalidInput(format!("unknown recurrence '{}'", other))),
        }
    }

    /// Weekdays column value (`"1,3"`), present only for weekly recurrences.
    pub fn weekdays_column(&self) -> Option<String> {
        match self {
            Recurrence::Weekly { weekdays } => Some(
                weekdays
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            _ => None,
        }
    }

    pub fn day_of_month_column(&self) -> Option<i64> {
        match self {
            Recurrence::Monthly { day_of_month } => Some(i64::from(*day_of_month)),
            _ => None,
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Daily => write!(f, "daily"),
            Recurrence::Weekly { .. } => write!(f, "weekly on {}", self.weekdays_column().unwrap_or_default()),
            Recurrence::Monthly { day_of_month } => write!(f, "monthly on day {}", day_of_month),
        }
    }
}

/// Parses a comma separated weekday list such as `"1,3"`.
pub fn parse_weekdays(text: &str) -> Result<BTreeSet<u8>> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            u8::from_str(part)
                .map_err(|_| AppError::ScheduleComputation(format!("invalid weekday '{}'", part)))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupSchedule {
    pub id: i64,
    pub kind: BackupKind,
    pub recurrence: Recurrence,
    pub fire_time: NaiveTime,
    pub storage_medium: StorageMedium,
    pub active: bool,
    pub last_fired_at: Option<NaiveDateTime>,
    /// `None` means inactive or not yet computed.
    pub next_fire_at: Option<NaiveDateTime>,
    pub creator: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters an administrator supplies when creating a schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub kind: BackupKind,
    pub recurrence: Recurrence,
    pub fire_time: NaiveTime,
    pub storage_medium: StorageMedium,
}

impl NewSchedule {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.kind, BackupKind::Full | BackupKind::Differential) {
            return Err(AppError::InvalidInput(format!(
                "schedules support full or differential backups, not {}",
                self.kind
            )));
        }
        if !matches!(self.storage_medium, StorageMedium::Local | StorageMedium::Removable) {
            return Err(AppError::InvalidInput(format!(
                "schedules store on local or removable media, not {}",
                self.storage_medium
            )));
        }
        self.recurrence.validate()
    }
}

/// Computes when `schedule` fires next.
///
/// An existing `next_fire_at` that is still in the future is returned
/// unchanged, so repeated calls are idempotent. Malformed recurrences never
/// error: they fall back to `now + 1 day` so one bad schedule cannot stall
/// the poll loop.
pub fn compute_next_fire_time(
    schedule: &BackupSchedule,
    now: NaiveDateTime,
    last_fired: Option<NaiveDateTime>,
) -> NaiveDateTime {
    if let Some(next) = schedule.next_fire_at {
        if next > now {
            return next;
        }
    }
    next_occurrence(&schedule.recurrence, schedule.fire_time, now, last_fired)
}

/// Next occurrence of a recurrence strictly after `now`, ignoring any stored value.
pub fn next_occurrence(
    recurrence: &Recurrence,
    fire_time: NaiveTime,
    now: NaiveDateTime,
    last_fired: Option<NaiveDateTime>,
) -> NaiveDateTime {
    let fallback = now + Duration::days(1);
    let next = match recurrence {
        Recurrence::Daily => Some(next_daily(fire_time, now)),
        Recurrence::Weekly { weekdays } => next_weekly(weekdays, fire_time, now, last_fired),
        Recurrence::Monthly { day_of_month } => next_monthly(*day_of_month, fire_time, now),
    };

    match next {
        Some(next) => next,
        None => {
            warn!(recurrence = %recurrence, "malformed recurrence, retrying in one day");
            fallback
        }
    }
}

fn next_daily(fire_time: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(fire_time);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

fn next_weekly(
    weekdays: &BTreeSet<u8>,
    fire_time: NaiveTime,
    now: NaiveDateTime,
    last_fired: Option<NaiveDateTime>,
) -> Option<NaiveDateTime> {
    let reference = match last_fired {
        Some(fired) if fired > now => fired,
        _ => now,
    };
    let fired_date = last_fired.map(|fired| fired.date());

    (0..=7)
        .map(|offset| reference.date() + Duration::days(offset))
        .filter(|date| {
            let index = date.weekday().num_days_from_monday();
            weekdays.iter().any(|d| u32::from(*d) == index)
        })
        .map(|date| date.and_time(fire_time))
        .find(|candidate| *candidate > now && fired_date.is_none_or(|fired| candidate.date() > fired))
}

fn next_monthly(day_of_month: u32, fire_time: NaiveTime, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !(1..=31).contains(&day_of_month) {
        return None;
    }
    let this_month = clamped_date(now.year(), now.month(), day_of_month)?.and_time(fire_time);
    if this_month > now {
        return Some(this_month);
    }
    let (year, month) = following_month(now.year(), now.month());
    Some(clamped_date(year, month, day_of_month)?.and_time(fire_time))
}

fn following_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

/// Builds `year-month-day`, clamping `day` to the month's last day.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = following_month(year, month);
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?.day();
    NaiveDate::from_ymd_opt(year, month, day.min(last_day))
}
