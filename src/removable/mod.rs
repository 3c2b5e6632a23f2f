//! Finding a writable removable volume to hold backup copies.
//!
//! Enumeration goes through [`VolumeEnumerator`] so each platform can classify
//! mounts its own way. Whatever a classifier says, a candidate is always
//! checked against the [`DenyList`] before it is handed out.

mod deny;
mod platform;

pub use deny::DenyList;
pub use platform::SystemVolumes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::utils::bytes_to_mb;

/// Largest volume the size heuristic will treat as external media.
pub const HEURISTIC_CEILING_BYTES: u64 = 2 * 1024 * 1024 * 1024 * 1024;

/// Directory created on the removable root to hold artifacts.
pub const ARCHIVE_DIR_NAME: &str = "backup-archive";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Volume {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub removable: bool,
}

impl Volume {
    pub fn available_mb(&self) -> f64 {
        bytes_to_mb(self.available_bytes)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.mount_point.join(ARCHIVE_DIR_NAME)
    }
}

/// Source of the currently mounted volumes. Blocking.
pub trait VolumeEnumerator: Send + Sync {
    fn volumes(&self) -> Vec<Volume>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemovableLookup {
    Found(Volume),
    NotConnected,
    /// A candidate existed but every one was rejected as a system location.
    Unsafe(PathBuf),
}

impl RemovableLookup {
    /// Converts the lookup into the error taxonomy for operations that need a device.
    pub fn required(self) -> Result<Volume> {
        match self {
            RemovableLookup::Found(volume) => Ok(volume),
            RemovableLookup::NotConnected => Err(AppError::RemovableStorageUnavailable),
            RemovableLookup::Unsafe(path) => Err(AppError::RemovableStorageUnsafe(path)),
        }
    }
}

#[derive(Clone)]
pub struct RemovableLocator {
    enumerator: Arc<dyn VolumeEnumerator>,
    deny: DenyList,
    explicit_path: Option<PathBuf>,
}

impl RemovableLocator {
    pub fn new(enumerator: Arc<dyn VolumeEnumerator>, deny: DenyList, explicit_path: Option<PathBuf>) -> Self {
        Self {
            enumerator,
            deny,
            explicit_path,
        }
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.enumerator.volumes()
    }

    /// First removable volume, or an explicit "not connected".
    ///
    /// With a configured path, that path alone is considered. Otherwise
    /// OS-classified removable volumes are tried first, then any non-system
    /// mount no larger than [`HEURISTIC_CEILING_BYTES`].
    pub fn locate(&self) -> RemovableLookup {
        let volumes = self.enumerator.volumes();

        if let Some(path) = &self.explicit_path {
            return self.locate_explicit(path, &volumes);
        }

        let mut rejected = None;
        let classified = volumes.iter().filter(|v| v.removable);
        let heuristic = volumes
            .iter()
            .filter(|v| !v.removable && v.total_bytes > 0 && v.total_bytes <= HEURISTIC_CEILING_BYTES);

        for (volume, via_heuristic) in classified.map(|v| (v, false)).chain(heuristic.map(|v| (v, true))) {
            if self.deny.rejects(&volume.mount_point) {
                if volume.removable {
                    warn!(mount_point = %volume.mount_point.display(), "removable volume rejected by system path deny-list");
                    rejected.get_or_insert_with(|| volume.mount_point.clone());
                }
                continue;
            }
            info!(
                mount_point = %volume.mount_point.display(),
                available_mb = volume.available_mb(),
                heuristic = via_heuristic,
                "removable volume located"
            );
            return RemovableLookup::Found(volume.clone());
        }

        match rejected {
            Some(path) => RemovableLookup::Unsafe(path),
            None => RemovableLookup::NotConnected,
        }
    }

    fn locate_explicit(&self, path: &Path, volumes: &[Volume]) -> RemovableLookup {
        if self.deny.rejects(path) {
            warn!(path = %path.display(), "configured removable path is a system location");
            return RemovableLookup::Unsafe(path.to_path_buf());
        }
        if !path.is_dir() {
            return RemovableLookup::NotConnected;
        }

        let containing = volumes
            .iter()
            .filter(|v| path.starts_with(&v.mount_point))
            .max_by_key(|v| v.mount_point.components().count());

        RemovableLookup::Found(Volume {
            mount_point: path.to_path_buf(),
            total_bytes: containing.map_or(0, |v| v.total_bytes),
            available_bytes: containing.map_or(0, |v| v.available_bytes),
            removable: true,
        })
    }

    pub async fn locate_async(&self) -> Result<RemovableLookup> {
        let locator = self.clone();
        Ok(tokio::task::spawn_blocking(move || locator.locate()).await?)
    }
}

/// Fails with [`AppError::RemovableStorageFull`] unless the volume has room for
/// `required_mb` and keeps at least `min_free_mb` free.
pub fn ensure_capacity(volume: &Volume, required_mb: f64, min_free_mb: f64) -> Result<()> {
    let needed = required_mb + min_free_mb;
    if volume.available_mb() < needed {
        return Err(AppError::RemovableStorageFull {
            required_mb: needed,
            available_mb: volume.available_mb(),
        });
    }
    Ok(())
}
