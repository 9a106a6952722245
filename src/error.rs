use sqlx::Error as SqlxError;
use std::fmt;
use thiserror::Error as ThisError;

/// Lifecycle of a [`crate::service::LocalStoreHelper`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Closed,
    Opening,
    Open,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandleState::Closed => "closed",
            HandleState::Opening => "opening",
            HandleState::Open => "open",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the store. Every failure falls into one of four categories.
#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("failed to open database `{database}`: {source}")]
    Open {
        database: String,
        #[source]
        source: EngineError,
    },

    #[error("store is not open (state: {state})")]
    NotOpen { state: HandleState },

    #[error("write to collection `{collection}` failed: {source}")]
    Write {
        collection: String,
        #[source]
        source: EngineError,
    },

    #[error("read from collection `{collection}` failed: {source}")]
    Read {
        collection: String,
        #[source]
        source: EngineError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Open,
    NotOpen,
    Write,
    Read,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Open { .. } => ErrorKind::Open,
            StoreError::NotOpen { .. } => ErrorKind::NotOpen,
            StoreError::Write { .. } => ErrorKind::Write,
            StoreError::Read { .. } => ErrorKind::Read,
        }
    }

    /// The underlying engine failure, if any.
    pub fn engine(&self) -> Option<&EngineError> {
        match self {
            StoreError::Open { source, .. }
            | StoreError::Write { source, .. }
            | StoreError::Read { source, .. } => Some(source),
            StoreError::NotOpen { .. } => None,
        }
    }

    pub(crate) fn open(database: impl Into<String>, source: impl Into<EngineError>) -> Self {
        StoreError::Open {
            database: database.into(),
            source: source.into(),
        }
    }

    pub(crate) fn write(collection: impl Into<String>, source: impl Into<EngineError>) -> Self {
        StoreError::Write {
            collection: collection.into(),
            source: source.into(),
        }
    }

    pub(crate) fn read(collection: impl Into<String>, source: impl Into<EngineError>) -> Self {
        StoreError::Read {
            collection: collection.into(),
            source: source.into(),
        }
    }
}

/// Failures reported by the storage engine itself.
#[derive(Debug, ThisError)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] SqlxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid {what} name `{name}`")]
    InvalidName { what: &'static str, name: String },

    #[error("requested version {requested} is lower than stored version {stored}")]
    VersionDowngrade { requested: u32, stored: u32 },

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("collection `{0}` does not exist")]
    UnknownCollection(String),
}
