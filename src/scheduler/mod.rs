//! Background worker that fires due backup schedules.
//!
//! All schedule state lives in the catalog; the worker only owns its poll
//! timer, so a restart picks up exactly where the previous process stopped.
//! Due schedules are processed one at a time. Cancellation is checked at each
//! interval boundary and between schedules, never during a dump.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backup::{BackupOutcome, BackupPipeline, BackupRequest, Trigger};
use crate::catalog::Catalog;
use crate::errors::{AppError, Result};
use crate::notify::{dispatch_detached, Alert, AlertSink};
use crate::schedule::{compute_next_fire_time, BackupSchedule};

const ALERT_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened when a schedule was fired.
#[derive(Debug)]
pub enum FireOutcome {
    Completed(BackupOutcome),
    Failed(AppError),
    /// Deactivated or deleted between selection and execution.
    Skipped,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub computed: Vec<i64>,
    pub succeeded: Vec<i64>,
    pub failed: Vec<i64>,
    /// A stop request arrived before every due schedule was processed.
    pub interrupted: bool,
}

/// Runs individual schedules. Shared by the worker and by manual "run now".
#[derive(Clone)]
pub struct ScheduleRunner {
    pipeline: BackupPipeline,
    alerts: Arc<dyn AlertSink>,
}

impl ScheduleRunner {
    pub fn new(pipeline: BackupPipeline, alerts: Arc<dyn AlertSink>) -> Self {
        Self { pipeline, alerts }
    }

    fn catalog(&self) -> &Catalog {
        self.pipeline.catalog()
    }

    /// One poll: assign next fire times where missing, then fire every due schedule in order.
    pub async fn run_poll_cycle(&self, cancel: &CancellationToken, now: NaiveDateTime) -> CycleReport {
        let mut report = CycleReport::default();

        match self.catalog().unscheduled_active_schedules().await {
            Ok(pending) => {
                for schedule in pending {
                    let next = compute_next_fire_time(&schedule, now, schedule.last_fired_at);
                    match self.catalog().set_next_fire(schedule.id, next).await {
                        Ok(true) => {
                            info!(schedule_id = schedule.id, next_fire_at = %next, "next fire time assigned");
                            report.computed.push(schedule.id);
                        }
                        Ok(false) => {}
                        Err(e) => error!(schedule_id = schedule.id, error = %e, "could not store next fire time"),
                    }
                }
            }
            Err(e) => error!(error = %e, "could not load unscheduled schedules"),
        }

        let due = match self.catalog().due_schedules(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "could not load due schedules");
                return report;
            }
        };

        for schedule in due {
            if cancel.is_cancelled() {
                info!(remaining_from = schedule.id, "stop requested, leaving remaining schedules for the next run");
                report.interrupted = true;
                break;
            }
            match self.fire(schedule.id, now).await {
                Ok(FireOutcome::Completed(_)) => report.succeeded.push(schedule.id),
                Ok(FireOutcome::Failed(e)) => {
                    report.failed.push(schedule.id);
                    dispatch_detached(
                        self.alerts.clone(),
                        Alert::scheduled_failure(schedule.id, &e.to_string()),
                        ALERT_TIMEOUT,
                    );
                }
                Ok(FireOutcome::Skipped) => {}
                Err(e) => {
                    error!(schedule_id = schedule.id, error = %e, "schedule bookkeeping failed");
                    report.failed.push(schedule.id);
                }
            }
        }

        report
    }

    /// Executes one schedule and records the result.
    ///
    /// Success sets `last_fired_at = now`. Either way the next fire time is
    /// recomputed from a fresh read, so a failure waits for the next natural
    /// occurrence instead of retrying immediately.
    pub async fn fire(&self, schedule_id: i64, now: NaiveDateTime) -> Result<FireOutcome> {
        let Some(schedule) = self.active_schedule(schedule_id).await? else {
            return Ok(FireOutcome::Skipped);
        };

        info!(
            schedule_id,
            kind = %schedule.kind,
            medium = %schedule.storage_medium,
            recurrence = %schedule.recurrence,
            "firing scheduled backup"
        );
        let request = BackupRequest {
            kind: schedule.kind,
            medium: schedule.storage_medium,
            operator: format!("system (scheduled #{})", schedule.id),
            trigger: Trigger::Scheduled,
        };
        let result = self.pipeline.create_backup(&request).await;

        let Some(fresh) = self.active_schedule(schedule_id).await? else {
            warn!(schedule_id, "schedule deactivated while its backup ran, not rescheduling");
            return Ok(match result {
                Ok(outcome) => FireOutcome::Completed(outcome),
                Err(e) => FireOutcome::Failed(e),
            });
        };

        match result {
            Ok(outcome) => {
                let next = compute_next_fire_time(&fresh, now, Some(now));
                self.catalog().mark_fired(schedule_id, now, next).await?;
                match &outcome {
                    BackupOutcome::Created(record) => {
                        info!(schedule_id, record_id = record.id, next_fire_at = %next, "scheduled backup completed")
                    }
                    BackupOutcome::NoChanges => {
                        info!(schedule_id, next_fire_at = %next, "scheduled backup found no changes")
                    }
                }
                Ok(FireOutcome::Completed(outcome))
            }
            Err(e) => {
                let next = compute_next_fire_time(&fresh, now, fresh.last_fired_at);
                self.catalog().set_next_fire(schedule_id, next).await?;
                error!(schedule_id, error = %e, next_fire_at = %next, "scheduled backup failed");
                Ok(FireOutcome::Failed(e))
            }
        }
    }

    /// Manual "run now": only active schedules may be fired.
    pub async fn fire_now(&self, schedule_id: i64) -> Result<BackupOutcome> {
        let schedule = self
            .catalog()
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| AppError::not_found("schedule", schedule_id))?;
        if !schedule.active {
            return Err(AppError::InvalidInput(format!("schedule #{} is inactive", schedule_id)));
        }

        match self.fire(schedule_id, Local::now().naive_local()).await? {
            FireOutcome::Completed(outcome) => Ok(outcome),
            FireOutcome::Failed(e) => Err(e),
            FireOutcome::Skipped => Err(AppError::InvalidInput(format!(
                "schedule #{} was deactivated",
                schedule_id
            ))),
        }
    }

    async fn active_schedule(&self, schedule_id: i64) -> Result<Option<BackupSchedule>> {
        Ok(self.catalog().get_schedule(schedule_id).await?.filter(|s| s.active))
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Start/stop control over the single polling worker. Owned by the composition root.
pub struct SchedulerHandle {
    runner: ScheduleRunner,
    poll_interval: Duration,
    stop_timeout: Duration,
    worker: Mutex<Option<Worker>>,
}

impl SchedulerHandle {
    pub fn new(runner: ScheduleRunner, poll_interval: Duration, stop_timeout: Duration) -> Self {
        Self {
            runner,
            poll_interval,
            stop_timeout,
            worker: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawns the worker. Returns `false` (and does nothing) if it is already running.
    pub async fn start(&self) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            info!("backup scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(self.runner.clone(), self.poll_interval, cancel.clone()));
        *worker = Some(Worker { cancel, handle });
        info!(poll_interval_secs = self.poll_interval.as_secs(), "backup scheduler started");
        true
    }

    /// Signals the worker and waits up to the stop timeout for it to exit.
    /// Returns `false` if it was not running.
    ///
    /// A worker still inside a backup when the wait runs out stays registered,
    /// so `start` keeps refusing until it has actually exited.
    pub async fn stop(&self) -> bool {
        let mut slot = self.worker.lock().await;
        let Some(Worker { cancel, mut handle }) = slot.take() else {
            info!("backup scheduler not running");
            return false;
        };

        cancel.cancel();
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => info!("backup scheduler stopped"),
            Ok(Err(e)) => error!(error = %e, "backup scheduler worker ended abnormally"),
            Err(_) => {
                warn!(
                    timeout_secs = self.stop_timeout.as_secs(),
                    "backup scheduler still finishing a backup, no longer waiting"
                );
                *slot = Some(Worker { cancel, handle });
            }
        }
        true
    }
}

async fn poll_loop(runner: ScheduleRunner, poll_interval: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let report = runner.run_poll_cycle(&cancel, Local::now().naive_local()).await;
                if report != CycleReport::default() {
                    info!(
                        computed = report.computed.len(),
                        succeeded = report.succeeded.len(),
                        failed = report.failed.len(),
                        interrupted = report.interrupted,
                        "poll cycle finished"
                    );
                }
            }
        }
    }
}
