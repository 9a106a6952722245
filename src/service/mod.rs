pub mod local_store;

pub use local_store::{Collection, DatabaseSummary, LocalStoreHelper, StoreHandle, describe};
