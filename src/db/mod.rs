//! Database module: schema, row models and the SQLite-backed record engine.
//!
//! Layout:
//! - `models.rs`: records as callers see them and as rows are stored
//! - `schema.rs`: SQL DDL for initializing a database file
//! - `sqlite.rs`: `RecordStorage`, the transactional engine operations

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{Record, RecordId};
pub use schema::SQLITE_INIT;
pub use sqlite::{RecordStorage, SqlitePool, UpgradeOutcome};
