//! Durable catalog of backup records, schedules and the restore audit trail.
//!
//! Lives in its own SQLite file next to the artifacts, so restoring the
//! application database never rewrites the metadata describing its backups.
//! Every mutation is a single statement; callers that need read-modify-write
//! re-fetch immediately before the final write.

pub mod audit;
pub mod models;
pub mod records;
pub mod schedules;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{AppError, Result};

const SCHEMA: &str = include_str!("../../migrations/001_catalog.sql");

#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Opens (creating if needed) the catalog file and applies the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let url = format!("sqlite://{}", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| AppError::Config(format!("invalid catalog path {}: {}", path.display(), e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.apply_schema().await?;
        info!(path = %path.display(), "backup catalog opened");
        Ok(catalog)
    }

    /// Single-connection in-memory catalog.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.apply_schema().await?;
        Ok(catalog)
    }

    async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
