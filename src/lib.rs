pub mod config;
pub mod db;
pub mod error;
pub mod service;
pub mod types;

pub use db::{Record, RecordId};
pub use error::{EngineError, ErrorKind, HandleState, StoreError};
pub use service::{Collection, LocalStoreHelper, StoreHandle};
