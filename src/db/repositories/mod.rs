//! Database repositories
//!
//! Each repository wraps the SQL for one entity behind a trait, with a
//! SQLx implementation that dispatches on the configured driver.

pub mod account;
pub mod session;
pub mod upload;

pub use account::{AccountRepository, SqlxAccountRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use upload::{SqlxUploadRepository, UploadRepository};
