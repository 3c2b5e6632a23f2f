// plantvault/src/backup/import.rs
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::models::{BackupKind, BackupRecord, RecordKind, StorageMedium};
use crate::catalog::records::new_record;
use crate::catalog::Catalog;
use crate::errors::Result;
use crate::utils::bytes_to_mb;
use crate::utils::checksum::sha256_file_async;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: Vec<BackupRecord>,
    /// Files that look like dumps but whose kind could not be inferred.
    pub skipped: Vec<PathBuf>,
}

/// Kind encoded in an artifact file name: `full_...`, `differential_...`,
/// and the older `respaldo_[programado_]<kind>_...` names.
pub fn infer_kind(file_name: &str) -> Option<BackupKind> {
    let mut rest = file_name;
    for prefix in ["respaldo_", "programado_"] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
        }
    }
    let kind = rest.split('_').next()?;
    kind.parse().ok()
}

fn is_artifact(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    !name.starts_with('.') && (name.ends_with(".sql.gz") || name.ends_with(".sql"))
}

/// Registers dump files under `dir` that have no catalog record yet as `imported-<kind>`.
pub async fn import_artifacts(catalog: &Catalog, dir: &Path, operator: &str, medium: StorageMedium) -> Result<ImportReport> {
    let root = dir.to_path_buf();
    let candidates: Vec<PathBuf> = tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during import scan");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_artifact(entry.path()))
            .map(|entry| entry.into_path())
            .collect()
    })
    .await?;

    let mut report = ImportReport::default();
    for path in candidates {
        if catalog.record_exists_for_path(&path).await? {
            debug!(path = %path.display(), "already catalogued");
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(kind) = infer_kind(name) else {
            warn!(path = %path.display(), "cannot infer backup kind from file name");
            report.skipped.push(path);
            continue;
        };

        let checksum = sha256_file_async(&path).await?;
        let size_mb = bytes_to_mb(tokio::fs::metadata(&path).await?.len());
        let record = catalog
            .insert_record(&new_record(
                RecordKind::imported(kind),
                path,
                size_mb,
                operator,
                medium,
                Some(checksum),
            ))
            .await?;
        info!(record_id = record.id, path = %record.file_path.display(), "artifact imported");
        report.imported.push(record);
    }
    Ok(report)
}
