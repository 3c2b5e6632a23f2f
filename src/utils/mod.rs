pub mod checksum;

use std::path::PathBuf;

use crate::errors::{AppError, Result};
use which::which;

/// Maximum number of characters of subprocess diagnostics carried inside errors.
pub const DIAGNOSTIC_LIMIT: usize = 500;

/// Finds an executable by name (or accepts an explicit path) in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|e| {
        AppError::Config(format!(
            "{} executable not found in PATH ({}). Please ensure the database client tools are installed.",
            name, e
        ))
    })
}

/// Cuts subprocess output down to [`DIAGNOSTIC_LIMIT`] characters on a char boundary.
pub fn truncate_diagnostic(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(DIAGNOSTIC_LIMIT) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Converts a byte count into megabytes rounded to two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    (mb * 100.0).round() / 100.0
}
