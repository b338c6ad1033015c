//! Database layer
//!
//! Accounts, uploads and sessions are stored in SQLite (default) or MySQL.
//! The driver is selected from configuration and hidden behind the
//! `DatabasePool` trait, so repositories work with either backend.
//!
//! ```ignore
//! use tumorscan::config::DatabaseConfig;
//! use tumorscan::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
