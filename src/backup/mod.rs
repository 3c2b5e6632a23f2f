pub mod archive;
pub mod db_dump;
pub mod import;
pub mod logic;
pub(crate) mod s3_upload;
pub mod transfer;

pub use db_dump::MysqlCli;
pub use logic::{BackupOutcome, BackupPipeline, BackupRequest, Trigger};
pub use transfer::{copy_to_removable, CopyReport, CopyTarget};
