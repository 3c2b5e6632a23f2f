// plantvault/src/restore/db_restore.rs
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info};

use crate::errors::{AppError, Result};

/// Feeds `sql_file` to the import tool on standard input.
///
/// # Arguments
/// * `program` - Resolved path of the import executable.
/// * `args` - Connection arguments and database name.
/// * `sql_file` - Uncompressed SQL to execute.
/// * `limit` - Upper bound on the tool's run time.
pub async fn run_import_command(program: &Path, args: &[String], sql_file: &Path, limit: Duration) -> Result<()> {
    if !sql_file.exists() {
        return Err(AppError::ArtifactMissing(sql_file.to_path_buf()));
    }
    let input = File::open(sql_file)?;

    info!(program = %program.display(), sql = %sql_file.display(), "starting import tool");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::from(input))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            error!(program = %program.display(), error = %e, "failed to start import tool");
            AppError::restore_failed(None, &format!("failed to start {}: {}", program.display(), e))
        })?;

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| AppError::Timeout(format!("{} exceeded {}s", program.display(), limit.as_secs())))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            program = %program.display(),
            status = %output.status,
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %stderr,
            "import tool exited with failure"
        );
        return Err(AppError::restore_failed(output.status.code(), &stderr));
    }

    info!(sql = %sql_file.display(), "import finished");
    Ok(())
}
