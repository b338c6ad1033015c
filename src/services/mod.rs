//! Services layer - Business logic
//!
//! Services sit between the HTTP handlers and the repositories: they
//! validate input, hash credentials, manage sessions and store uploads.

pub mod account;
pub mod password;
pub mod upload;

pub use account::{AccountService, AccountServiceError, LoginInput, RegisterInput};
pub use password::{hash_password, verify_password};
pub use upload::{StoredFile, UploadService, UploadServiceError};
