// plantvault/src/testing.rs
//! Shared test doubles.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backup::db_dump::{DatabaseTool, DumpOutput, DumpRequest};
use crate::config::{AppConfig, RawJsonConfig};
use crate::errors::{AppError, Result};

/// In-process stand-in for the dump/import tool pair.
pub struct FakeTool {
    content: String,
    accepted_columns: Option<Vec<String>>,
    dump_failure: Option<String>,
    import_failure: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<DumpRequest>>,
    imported: Mutex<Vec<String>>,
}

impl FakeTool {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            accepted_columns: None,
            dump_failure: None,
            import_failure: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            imported: Mutex::new(Vec::new()),
        }
    }

    /// A dump of realistic size for full backups.
    pub fn with_full_dump() -> Self {
        let mut dump = String::from("CREATE TABLE plantas (id INT PRIMARY KEY, nombre VARCHAR(100));\n");
        for i in 0..200 {
            dump.push_str(&format!("INSERT INTO plantas VALUES ({}, 'Monstera {}');\n", i, i));
        }
        Self::new(&dump)
    }

    /// Only `--where` filters naming one of these columns succeed.
    pub fn accepting_columns(mut self, columns: &[&str]) -> Self {
        self.accepted_columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn failing_dump(mut self, stderr: &str) -> Self {
        self.dump_failure = Some(stderr.to_string());
        self
    }

    pub fn failing_import(mut self, stderr: &str) -> Self {
        self.import_failure = Some(stderr.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<DumpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn imported(&self) -> Vec<String> {
        self.imported.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseTool for FakeTool {
    async fn dump(&self, request: &DumpRequest, out: &Path) -> Result<DumpOutput> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(stderr) = &self.dump_failure {
            return Err(AppError::dump_failed(Some(2), stderr));
        }
        if let (Some(accepted), Some(clause)) = (&self.accepted_columns, &request.where_clause) {
            if !accepted.iter().any(|c| clause.contains(&format!("`{}`", c))) {
                return Err(AppError::dump_failed(
                    Some(2),
                    "mysqldump: Couldn't execute 'SELECT': Unknown column in 'where clause' (1054)",
                ));
            }
        }
        std::fs::write(out, &self.content)?;
        Ok(DumpOutput {
            bytes_written: self.content.len() as u64,
            stderr: String::new(),
        })
    }

    async fn import(&self, sql_file: &Path) -> Result<()> {
        if let Some(stderr) = &self.import_failure {
            return Err(AppError::restore_failed(Some(1), stderr));
        }
        let sql = std::fs::read_to_string(sql_file)?;
        self.imported.lock().unwrap().push(sql);
        Ok(())
    }
}

/// Defaults rooted in `dir`, with a catalog file beside the artifacts.
pub fn config_in(dir: &Path) -> AppConfig {
    let raw = RawJsonConfig {
        backup_dir: Some(dir.join("backups")),
        catalog_path: Some(dir.join("catalog.db")),
        ..RawJsonConfig::default()
    };
    AppConfig::from_raw(raw).unwrap()
}

pub fn write_file(path: &Path, content: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    path.to_path_buf()
}
