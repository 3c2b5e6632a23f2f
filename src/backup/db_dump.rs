// plantvault/src/backup/db_dump.rs
use async_trait::async_trait;
use chrono::NaiveDateTime;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, DatabaseConfig};
use crate::errors::{AppError, Result};
use crate::utils::find_executable;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("identifier pattern is valid"));

/// What to export in one dump tool invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DumpRequest {
    /// Restrict to these tables; empty means the whole database.
    pub tables: Vec<String>,
    /// Row filter handed to the tool as a single `--where=` argument.
    pub where_clause: Option<String>,
    /// Rows only, without CREATE statements or dump headers.
    pub data_only: bool,
}

impl DumpRequest {
    pub fn full() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct DumpOutput {
    pub bytes_written: u64,
    pub stderr: String,
}

/// The external export/import tool pair for the application database.
#[async_trait]
pub trait DatabaseTool: Send + Sync {
    /// Runs an export, writing the tool's standard output to `out`.
    async fn dump(&self, request: &DumpRequest, out: &Path) -> Result<DumpOutput>;

    /// Feeds a raw SQL file to the import tool on standard input.
    async fn import(&self, sql_file: &Path) -> Result<()>;
}

/// `mysqldump` / `mysql` invoked with argument vectors, never through a shell.
#[derive(Debug, Clone)]
pub struct MysqlCli {
    dump_tool: PathBuf,
    import_tool: PathBuf,
    database: DatabaseConfig,
    timeout: Duration,
}

impl MysqlCli {
    pub fn new(dump_tool: PathBuf, import_tool: PathBuf, database: DatabaseConfig, timeout: Duration) -> Self {
        Self {
            dump_tool,
            import_tool,
            database,
            timeout,
        }
    }

    /// Resolves both executables in PATH.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let dump_tool = find_executable(&config.dump_tool)?;
        let import_tool = find_executable(&config.import_tool)?;
        info!(
            dump_tool = %dump_tool.display(),
            import_tool = %import_tool.display(),
            "database client tools resolved"
        );
        Ok(Self::new(dump_tool, import_tool, config.database.clone(), config.subprocess_timeout))
    }

    /// `-h <host> -P <port> -u <user> [-p<password>]`
    pub fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            self.database.host.clone(),
            "-P".to_string(),
            self.database.port.to_string(),
            "-u".to_string(),
            self.database.user.clone(),
        ];
        if let Some(password) = self.database.password.as_deref().filter(|p| !p.is_empty()) {
            args.push(format!("-p{}", password));
        }
        args
    }

    pub fn dump_args(&self, request: &DumpRequest) -> Vec<String> {
        let mut args = self.connection_args();
        args.push("--single-transaction".to_string());
        args.push("--complete-insert".to_string());
        if request.data_only {
            args.push("--no-create-info".to_string());
            args.push("--compact".to_string());
        }
        if let Some(clause) = &request.where_clause {
            args.push(format!("--where={}", clause));
        }
        args.push(self.database.name.clone());
        args.extend(request.tables.iter().cloned());
        args
    }

    pub fn import_args(&self) -> Vec<String> {
        let mut args = self.connection_args();
        args.push(self.database.name.clone());
        args
    }
}

#[async_trait]
impl DatabaseTool for MysqlCli {
    async fn dump(&self, request: &DumpRequest, out: &Path) -> Result<DumpOutput> {
        for table in &request.tables {
            validate_identifier(table)?;
        }
        run_dump_command(&self.dump_tool, &self.dump_args(request), out, self.timeout).await
    }

    async fn import(&self, sql_file: &Path) -> Result<()> {
        crate::restore::db_restore::run_import_command(&self.import_tool, &self.import_args(), sql_file, self.timeout)
            .await
    }
}

/// Runs the dump executable with `args`, streaming its stdout into `out`.
///
/// Non-zero exit or a failure to start becomes [`AppError::DumpFailed`] with
/// truncated stderr; the full stderr is logged.
pub async fn run_dump_command(program: &Path, args: &[String], out: &Path, limit: Duration) -> Result<DumpOutput> {
    let out_file = tokio::fs::File::create(out).await?.into_std().await;

    debug!(program = %program.display(), output = %out.display(), "starting dump tool");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out_file))
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            error!(program = %program.display(), error = %e, "failed to start dump tool");
            AppError::dump_failed(None, &format!("failed to start {}: {}", program.display(), e))
        })?;

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| AppError::Timeout(format!("{} exceeded {}s", program.display(), limit.as_secs())))??;

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        error!(
            program = %program.display(),
            status = %output.status,
            stderr = %stderr,
            "dump tool exited with failure"
        );
        return Err(AppError::dump_failed(output.status.code(), &stderr));
    }
    if !stderr.trim().is_empty() {
        warn!(stderr = %stderr.trim(), "dump tool reported warnings");
    }

    let bytes_written = std::fs::metadata(out)?.len();
    Ok(DumpOutput { bytes_written, stderr })
}

/// Which timestamp column (if any) selected a table's changed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMatch {
    pub table: String,
    pub column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DifferentialOutcome {
    pub bytes_written: u64,
    pub tables: Vec<TableMatch>,
}

/// Dumps rows changed after `since` for each allow-listed table.
///
/// Candidate timestamp columns are tried in the given priority order; the
/// first one the tool accepts wins. Tables where no candidate matches are
/// left out of the differential. That gap is a known limitation of
/// column-guessing: rows in such tables are silently not captured.
pub async fn dump_changed_rows(
    tool: &dyn DatabaseTool,
    tables: &[String],
    timestamp_columns: &[String],
    since: NaiveDateTime,
    out: &Path,
    scratch_dir: &Path,
) -> Result<DifferentialOutcome> {
    for name in tables.iter().chain(timestamp_columns.iter()) {
        validate_identifier(name)?;
    }

    let mut combined = tokio::fs::File::create(out).await?;
    let since_literal = since.format("%Y-%m-%d %H:%M:%S").to_string();
    let mut matches = Vec::with_capacity(tables.len());

    for table in tables {
        let mut matched = None;
        for column in timestamp_columns {
            let scratch = scratch_dir.to_path_buf();
            let part = tokio::task::spawn_blocking(move || {
                tempfile::Builder::new().prefix("diff_").suffix(".sql").tempfile_in(&scratch)
            })
            .await??;
            let request = DumpRequest {
                tables: vec![table.clone()],
                where_clause: Some(format!("`{}` > '{}'", column, since_literal)),
                data_only: true,
            };

            match tool.dump(&request, part.path()).await {
                Ok(_) => {
                    let mut reader = tokio::fs::File::open(part.path()).await?;
                    tokio::io::copy(&mut reader, &mut combined).await?;
                    matched = Some(column.clone());
                    break;
                }
                Err(AppError::DumpFailed { stderr, .. }) if is_unknown_column(&stderr) => {
                    debug!(table = %table, column = %column, stderr = %stderr, "timestamp column rejected");
                }
                Err(other) => return Err(other),
            }
        }

        match &matched {
            Some(column) => info!(table = %table, column = %column, "differential filter column matched"),
            None => warn!(
                table = %table,
                candidates = ?timestamp_columns,
                "no timestamp column matched, table omitted from differential"
            ),
        }
        matches.push(TableMatch {
            table: table.clone(),
            column: matched,
        });
    }

    combined.sync_all().await?;
    let bytes_written = tokio::fs::metadata(out).await?.len();
    Ok(DifferentialOutcome {
        bytes_written,
        tables: matches,
    })
}

/// MySQL error 1054: the `--where` filter named a column the table lacks.
/// Any other dump failure (credentials, connectivity, missing database) is real.
fn is_unknown_column(stderr: &str) -> bool {
    stderr.contains("Unknown column") || stderr.contains("(1054)") || stderr.contains("ERROR 1054")
}

/// Table and column names reach the tool as arguments; only plain identifiers are allowed.
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("'{}' is not a valid table or column name", name)))
    }
}
