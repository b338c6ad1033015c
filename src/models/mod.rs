//! Data models
//!
//! Database entities (Account, Upload, Session) and the input and view
//! types built around them.

mod account;
mod session;
mod upload;

pub use account::Account;
pub use session::Session;
pub use upload::{
    upload_url, CreateUploadInput, Upload, UploadHistory, PREDICTION_UNAVAILABLE,
    UPLOADS_URL_PREFIX,
};
