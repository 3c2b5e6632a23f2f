//! plantvault: backup orchestration for the nursery management database.
//!
//! One binary. `serve` runs the scheduler and the retention sweeper; every
//! other subcommand performs a single administrative operation and exits.

// plantvault/src/main.rs
mod admin;
mod backup;
mod catalog;
mod config;
mod errors;
mod logging;
mod notify;
mod removable;
mod restore;
mod retention;
mod schedule;
mod scheduler;
mod utils;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use admin::{authorize, Actor, BackupService};
use backup::{BackupOutcome, BackupPipeline, CopyTarget, MysqlCli};
use catalog::models::{BackupKind, StorageMedium};
use catalog::Catalog;
use config::AppConfig;
use removable::{DenyList, RemovableLocator, SystemVolumes};
use restore::VerifyReport;
use schedule::{BackupSchedule, NewSchedule, Recurrence};
use scheduler::{ScheduleRunner, SchedulerHandle};

#[derive(Parser)]
#[command(name = "plantvault", version, about = "Backups for the plant nursery database")]
struct Cli {
    /// Path to config.json.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Emit JSON log lines instead of human-readable ones.
    #[arg(long, global = true)]
    json: bool,

    /// Name recorded as the operator of every mutation.
    #[arg(long, global = true, env = "PLANTVAULT_OPERATOR", default_value = "")]
    operator: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the backup scheduler and retention sweeper until interrupted.
    Serve,
    /// Take a backup now.
    Backup {
        /// full, differential or minimal-change.
        #[arg(long, default_value = "full")]
        kind: String,
        /// local or removable.
        #[arg(long, default_value = "local")]
        medium: String,
    },
    /// Replay a backup into the database. Destructive.
    Restore { id: i64 },
    /// Re-hash an artifact and compare with its stored checksum.
    Verify { id: i64 },
    /// Copy one backup (or all local ones) to the removable device.
    Copy {
        id: Option<i64>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// List backup records, newest first.
    List {
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        medium: Option<String>,
    },
    /// Show one backup record.
    Show { id: i64 },
    /// Restore attempts recorded against a backup.
    Audit { id: i64 },
    /// Size totals by kind and medium.
    Stats,
    /// Records whose artifact is gone.
    Orphans {
        /// Delete the orphaned records as well.
        #[arg(long)]
        purge: bool,
    },
    /// Register untracked dump files found under a directory.
    Import { dir: Option<PathBuf> },
    /// Delete local backups older than the retention window.
    Sweep,
    /// Show mounted volumes and the removable device that would be used.
    Volumes,
    /// Manage recurring backups.
    #[command(subcommand)]
    Schedule(ScheduleCommand),
}

#[derive(clap::Args)]
struct ScheduleArgs {
    /// full or differential.
    #[arg(long, default_value = "full")]
    kind: String,
    /// daily, weekly or monthly.
    #[arg(long)]
    recurrence: String,
    /// HH:MM, local time.
    #[arg(long)]
    at: String,
    /// Weekday indices for weekly schedules, 0 = Monday ("0,3").
    #[arg(long)]
    weekdays: Option<String>,
    /// Day of month for monthly schedules.
    #[arg(long)]
    day: Option<i64>,
    /// local or removable.
    #[arg(long, default_value = "local")]
    medium: String,
}

impl ScheduleArgs {
    fn to_new_schedule(&self) -> Result<NewSchedule> {
        let fire_time = NaiveTime::parse_from_str(&self.at, "%H:%M")
            .with_context(|| format!("invalid time '{}', expected HH:MM", self.at))?;
        Ok(NewSchedule {
            kind: self.kind.parse()?,
            recurrence: Recurrence::from_parts(&self.recurrence, self.weekdays.as_deref(), self.day)?,
            fire_time,
            storage_medium: self.medium.parse()?,
        })
    }
}

#[derive(Subcommand)]
enum ScheduleCommand {
    Create(ScheduleArgs),
    List,
    Toggle { id: i64 },
    Update {
        id: i64,
        #[command(flatten)]
        args: ScheduleArgs,
    },
    Delete { id: i64 },
    /// Fire a schedule immediately without moving its next fire time.
    Run { id: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.json) {
        eprintln!("❌ Error: failed to initialise logging: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app(cli).await {
        Ok(()) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

struct App {
    service: BackupService,
    scheduler: SchedulerHandle,
    config: Arc<AppConfig>,
}

async fn build_app(config_path: &std::path::Path) -> Result<App> {
    let config = Arc::new(
        AppConfig::load(config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?,
    );
    std::fs::create_dir_all(&config.backup_dir)
        .with_context(|| format!("Failed to create backup directory {}", config.backup_dir.display()))?;

    let catalog = Catalog::open(&config.catalog_path)
        .await
        .with_context(|| format!("Failed to open catalog at {}", config.catalog_path.display()))?;
    let tool = MysqlCli::from_config(&config).context("Failed to resolve database client tools")?;
    let locator = RemovableLocator::new(
        Arc::new(SystemVolumes),
        DenyList::default().with_protected(&config.backup_dir),
        config.removable.path.clone(),
    );

    let pipeline = BackupPipeline::new(catalog, Arc::new(tool), locator, config.clone());
    let runner = ScheduleRunner::new(pipeline.clone(), notify::sink_for(config.alert_webhook_url.as_deref()));
    let scheduler = SchedulerHandle::new(runner.clone(), config.poll_interval, config.stop_timeout);

    Ok(App {
        service: BackupService::new(pipeline, runner),
        scheduler,
        config,
    })
}

fn actor(cli_operator: &str) -> Result<Actor> {
    authorize(cli_operator).context("Pass --operator or set PLANTVAULT_OPERATOR")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Drift is reported, not fatal: the command still exits successfully.
fn verify_warning(report: &VerifyReport) -> Option<String> {
    report.mismatch().map(|mismatch| format!("⚠️  {}", mismatch))
}

fn print_outcome(outcome: &BackupOutcome) -> Result<()> {
    match outcome {
        BackupOutcome::Created(record) => print_json(record),
        BackupOutcome::NoChanges => {
            println!("No rows changed since the previous backup; nothing was stored.");
            Ok(())
        }
    }
}

fn print_schedule(schedule: &BackupSchedule) {
    let next = schedule
        .next_fire_at
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
    println!(
        "#{:<4} {:<14} {:<24} at {}  medium={:<10} active={:<5} next={}  by {}",
        schedule.id,
        schedule.kind,
        schedule.recurrence,
        schedule.fire_time.format("%H:%M"),
        schedule.storage_medium,
        schedule.active,
        next,
        schedule.creator
    );
}

async fn run_app(cli: Cli) -> Result<()> {
    let app = build_app(&cli.config).await?;
    let service = &app.service;

    match cli.command {
        Command::Serve => serve(&app).await?,
        Command::Backup { kind, medium } => {
            let actor = actor(&cli.operator)?;
            let kind: BackupKind = kind.parse()?;
            let medium: StorageMedium = medium.parse()?;
            println!("🚀 Starting {} backup...", kind);
            let outcome = service.create_backup(&actor, kind, medium).await.context("Backup process failed")?;
            print_outcome(&outcome)?;
        }
        Command::Restore { id } => {
            let actor = actor(&cli.operator)?;
            println!("🚀 Restoring backup #{}...", id);
            let report = service.restore_backup(&actor, id).await.context("Restore process failed")?;
            if let Some(warning) = &report.checksum_warning {
                println!("⚠️  {}", warning);
            }
            print_json(&report)?;
        }
        Command::Verify { id } => {
            let report = service.verify_backup(id).await?;
            print_json(&report)?;
            if let Some(warning) = verify_warning(&report) {
                println!("{}", warning);
            }
        }
        Command::Copy { id, all } => {
            let actor = actor(&cli.operator)?;
            let target = match (id, all) {
                (Some(id), _) => CopyTarget::Record(id),
                (None, true) => CopyTarget::All,
                (None, false) => anyhow::bail!("Pass a backup id or --all"),
            };
            let report = service.copy_to_removable(&actor, target).await.context("Copy to removable storage failed")?;
            print_json(&report)?;
            if !report.failed.is_empty() {
                anyhow::bail!("{} artifact(s) could not be copied", report.failed.len());
            }
        }
        Command::List { limit, offset, medium } => {
            let records = match medium {
                Some(medium) => service.records_by_medium(medium.parse()?).await?,
                None => service.list_records(limit, offset).await?,
            };
            print_json(&records)?;
        }
        Command::Show { id } => print_json(&service.get_record(id).await?)?,
        Command::Audit { id } => print_json(&service.restore_history(id).await?)?,
        Command::Stats => print_json(&service.stats().await?)?,
        Command::Orphans { purge } => {
            let orphans = service.find_orphans().await?;
            print_json(&orphans)?;
            if purge {
                let actor = actor(&cli.operator)?;
                for orphan in &orphans {
                    service.delete_record(&actor, orphan.id).await?;
                }
                println!("Removed {} orphaned record(s).", orphans.len());
            }
        }
        Command::Import { dir } => {
            let actor = actor(&cli.operator)?;
            let report = service.import_artifacts(&actor, dir.as_deref()).await.context("Import failed")?;
            print_json(&report)?;
        }
        Command::Sweep => {
            let actor = actor(&cli.operator)?;
            print_json(&service.sweep(&actor).await?)?;
        }
        Command::Volumes => print_json(&service.volumes().await?)?,
        Command::Schedule(command) => run_schedule_command(service, command, &cli.operator).await?,
    }
    Ok(())
}

async fn run_schedule_command(service: &BackupService, command: ScheduleCommand, operator: &str) -> Result<()> {
    match command {
        ScheduleCommand::List => {
            for schedule in service.list_schedules().await? {
                print_schedule(&schedule);
            }
        }
        ScheduleCommand::Create(args) => {
            let schedule = service.create_schedule(&actor(operator)?, &args.to_new_schedule()?).await?;
            print_schedule(&schedule);
        }
        ScheduleCommand::Update { id, args } => {
            let schedule = service
                .update_schedule(&actor(operator)?, id, &args.to_new_schedule()?)
                .await?;
            print_schedule(&schedule);
        }
        ScheduleCommand::Toggle { id } => print_schedule(&service.toggle_schedule(&actor(operator)?, id).await?),
        ScheduleCommand::Delete { id } => service.delete_schedule(&actor(operator)?, id).await?,
        ScheduleCommand::Run { id } => {
            let outcome = service.fire_schedule_now(&actor(operator)?, id).await?;
            print_outcome(&outcome)?;
        }
    }
    Ok(())
}

async fn serve(app: &App) -> Result<()> {
    let sweeper_cancel = CancellationToken::new();
    let sweeper = retention::spawn_sweeper(
        app.service.catalog().clone(),
        app.config.retention_days,
        app.config.retention_sweep_interval,
        sweeper_cancel.clone(),
    );
    app.scheduler.start().await;
    info!(backup_dir = %app.config.backup_dir.display(), "plantvault serving, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    sweeper_cancel.cancel();
    if !app.scheduler.is_running().await {
        tracing::warn!("backup scheduler worker had already exited");
    }
    app.scheduler.stop().await;
    if tokio::time::timeout(app.config.stop_timeout, sweeper).await.is_err() {
        tracing::warn!("retention sweeper did not stop in time");
    }
    Ok(())
}
