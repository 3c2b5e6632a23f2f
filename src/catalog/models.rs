// plantvault/src/catalog/models.rs
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Full,
    Differential,
    MinimalChange,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Differential => "differential",
            BackupKind::MinimalChange => "minimal-change",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "completo" => Ok(BackupKind::Full),
            "differential" | "diferencial" => Ok(BackupKind::Differential),
            "minimal-change" | "minimal_change" | "minima_modificacion" => Ok(BackupKind::MinimalChange),
            other => Err(AppError::InvalidInput(format!("unknown backup kind '{}'", other))),
        }
    }
}

/// How a record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordOrigin {
    Produced,
    Imported,
    Copied,
}

/// Stored kind of a record: `full`, `imported-differential`, `copied-full`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RecordKind {
    pub base: BackupKind,
    pub origin: RecordOrigin,
}

impl RecordKind {
    pub fn produced(base: BackupKind) -> Self {
        Self { base, origin: RecordOrigin::Produced }
    }

    pub fn imported(base: BackupKind) -> Self {
        Self { base, origin: RecordOrigin::Imported }
    }

    pub fn copied(base: BackupKind) -> Self {
        Self { base, origin: RecordOrigin::Copied }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            RecordOrigin::Produced => write!(f, "{}", self.base),
            RecordOrigin::Imported => write!(f, "imported-{}", self.base),
            RecordOrigin::Copied => write!(f, "copied-{}", self.base),
        }
    }
}

impl FromStr for RecordKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("imported-") {
            Ok(RecordKind::imported(rest.parse()?))
        } else if let Some(rest) = s.strip_prefix("copied-") {
            Ok(RecordKind::copied(rest.parse()?))
        } else {
            Ok(RecordKind::produced(s.parse()?))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StorageMedium {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "removable")]
    Removable,
    #[serde(rename = "local+remote")]
    LocalRemote,
}

impl StorageMedium {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMedium::Local => "local",
            StorageMedium::Removable => "removable",
            StorageMedium::LocalRemote => "local+remote",
        }
    }

    /// Whether the artifact lives on the local backup directory.
    pub fn includes_local(&self) -> bool {
        matches!(self, StorageMedium::Local | StorageMedium::LocalRemote)
    }
}

impl fmt::Display for StorageMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMedium {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageMedium::Local),
            "removable" | "usb" => Ok(StorageMedium::Removable),
            "local+remote" => Ok(StorageMedium::LocalRemote),
            other => Err(AppError::InvalidInput(format!("unknown storage medium '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupRecord {
    pub id: i64,
    pub kind: RecordKind,
    pub file_path: PathBuf,
    pub size_mb: f64,
    pub created_at: DateTime<Utc>,
    pub operator: String,
    pub storage_medium: StorageMedium,
    pub checksum: Option<String>,
}

impl BackupRecord {
    /// A record whose artifact no longer exists on disk.
    pub fn is_orphaned(&self) -> bool {
        !self.file_path.exists()
    }
}

#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    pub kind: RecordKind,
    pub file_path: PathBuf,
    pub size_mb: f64,
    pub created_at: DateTime<Utc>,
    pub operator: String,
    pub storage_medium: StorageMedium,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditPhase {
    Started,
    Succeeded,
    Failed,
}

impl AuditPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditPhase::Started => "started",
            AuditPhase::Succeeded => "succeeded",
            AuditPhase::Failed => "failed",
        }
    }
}

impl FromStr for AuditPhase {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(AuditPhase::Started),
            "succeeded" => Ok(AuditPhase::Succeeded),
            "failed" => Ok(AuditPhase::Failed),
            other => Err(AppError::InvalidInput(format!("unknown audit phase '{}'", other))),
        }
    }
}

/// One row of the restore audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreAuditEntry {
    pub id: i64,
    pub operation_id: Uuid,
    pub actor: String,
    pub backup_id: i64,
    pub phase: AuditPhase,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SizeStats {
    pub record_count: i64,
    pub total_mb: f64,
    pub by_kind: Vec<(String, f64)>,
    pub by_medium: Vec<(String, f64)>,
}
