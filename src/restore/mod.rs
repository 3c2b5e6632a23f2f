pub mod db_restore;
pub mod logic;
pub mod verification;

pub use logic::{restore_backup, RestoreReport};
pub use verification::{verify_backup, VerifyReport};
