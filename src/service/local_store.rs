use crate::config::{CONFIG, Config};
use crate::db::models::{Record, RecordId, to_body};
use crate::db::sqlite::RecordStorage;
use crate::error::{EngineError, HandleState, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const DEFAULT_VERSION: u32 = 1;
const MAX_COLLECTION_NAME_LEN: usize = 128;

/// An open database. Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct StoreHandle {
    storage: RecordStorage,
    database: Arc<str>,
    version: u32,
}

impl StoreHandle {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Address one collection of this database.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection {
            storage: self.storage.clone(),
            name: Arc::from(name.into()),
        }
    }

    pub async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.storage
            .collection_names()
            .await
            .map_err(|e| StoreError::read(&*self.database, e))
    }

    /// Whether both handles come from the same open.
    pub fn same_store(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.database, &other.database)
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("database", &self.database)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// CRUD primitives against one collection of an open database.
#[derive(Clone)]
pub struct Collection {
    storage: RecordStorage,
    name: Arc<str>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a record without an id and return the id assigned to it.
    pub async fn add<T: Serialize + ?Sized>(&self, record: &T) -> Result<RecordId, StoreError> {
        let body = to_body(record).map_err(|e| self.write_err(e))?;
        let id = self
            .storage
            .insert(&self.name, &body)
            .await
            .map_err(|e| self.write_err(e))?;
        debug!(collection = %self.name, id, "record added");
        Ok(id)
    }

    /// Insert several records in one transaction. Ids come back in input order.
    pub async fn add_many<T: Serialize>(&self, records: &[T]) -> Result<Vec<RecordId>, StoreError> {
        let bodies = records
            .iter()
            .map(to_body)
            .collect::<Result<Vec<_>, EngineError>>()
            .map_err(|e| self.write_err(e))?;
        let ids = self
            .storage
            .insert_many(&self.name, &bodies)
            .await
            .map_err(|e| self.write_err(e))?;
        debug!(collection = %self.name, count = ids.len(), "records added");
        Ok(ids)
    }

    /// Every record in the collection, in engine order.
    pub async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        let records = self
            .storage
            .list_all(&self.name)
            .await
            .map_err(|e| self.read_err(e))?;
        debug!(collection = %self.name, count = records.len(), "records listed");
        Ok(records)
    }

    pub async fn list_all_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        self.list_all()
            .await?
            .iter()
            .map(|r| r.decode::<T>().map_err(|e| self.read_err(e.into())))
            .collect()
    }

    /// Remove the record with `id`. Absent ids are a no-op.
    pub async fn delete_by_id(&self, id: RecordId) -> Result<(), StoreError> {
        let removed = self
            .storage
            .delete(&self.name, id)
            .await
            .map_err(|e| self.write_err(e))?;
        debug!(collection = %self.name, id, removed, "record deleted");
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.storage
            .count(&self.name)
            .await
            .map_err(|e| self.read_err(e))
    }

    fn write_err(&self, e: EngineError) -> StoreError {
        warn!(collection = %self.name, error = %e, "write failed");
        StoreError::write(&*self.name, e)
    }

    fn read_err(&self, e: EngineError) -> StoreError {
        warn!(collection = %self.name, error = %e, "read failed");
        StoreError::read(&*self.name, e)
    }
}

enum Slot {
    Closed,
    Opening,
    Open(StoreHandle),
}

impl Slot {
    fn state(&self) -> HandleState {
        match self {
            Slot::Closed => HandleState::Closed,
            Slot::Opening => HandleState::Opening,
            Slot::Open(_) => HandleState::Open,
        }
    }
}

/// Owns the database handle for one database and its primary collection.
///
/// `closed -> opening -> open`. Operations other than [`open`](Self::open)
/// fail with [`StoreError::NotOpen`] until the helper is open. There is no
/// close: the handle lives as long as the helper.
pub struct LocalStoreHelper {
    database: String,
    collections: Vec<String>,
    version: u32,
    config: Config,
    slot: RwLock<Slot>,
    open_lock: Mutex<()>,
}

impl LocalStoreHelper {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self::with_collections(database, [collection])
    }

    /// A database holding several collections. The first one is the primary
    /// collection used by `add`, `list_all` and `delete_by_id`.
    pub fn with_collections<I, S>(database: impl Into<String>, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            database: database.into(),
            collections: collections.into_iter().map(Into::into).collect(),
            version: DEFAULT_VERSION,
            config: CONFIG.clone(),
            slot: RwLock::new(Slot::Closed),
            open_lock: Mutex::new(()),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection_name(&self) -> &str {
        self.collections.first().map(String::as_str).unwrap_or_default()
    }

    pub async fn state(&self) -> HandleState {
        self.slot.read().await.state()
    }

    /// Open (or create) the database and make sure every collection exists.
    ///
    /// Idempotent: once open, later calls return the same handle.
    pub async fn open(&self) -> Result<StoreHandle, StoreError> {
        let _guard = self.open_lock.lock().await;

        if let Slot::Open(handle) = &*self.slot.read().await {
            return Ok(handle.clone());
        }
        *self.slot.write().await = Slot::Opening;

        match self.open_inner().await {
            Ok(handle) => {
                *self.slot.write().await = Slot::Open(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                *self.slot.write().await = Slot::Closed;
                warn!(database = %self.database, error = %e, "open failed");
                Err(StoreError::open(self.database.as_str(), e))
            }
        }
    }

    async fn open_inner(&self) -> Result<StoreHandle, EngineError> {
        validate_database_name(&self.database)?;
        if self.collections.is_empty() {
            return Err(EngineError::InvalidName {
                what: "collection",
                name: String::new(),
            });
        }
        for name in &self.collections {
            validate_collection_name(name)?;
        }

        tokio::fs::create_dir_all(&self.config.data_dir).await?;
        let path = self.config.database_path(&self.database);

        let storage = RecordStorage::connect(&path, &self.config).await?;
        storage.init_schema().await?;
        let outcome = storage.upgrade(self.version, &self.collections).await?;

        info!(
            database = %self.database,
            path = %path.display(),
            version = self.version,
            previous_version = ?outcome.previous_version,
            created = ?outcome.created,
            "database open"
        );

        Ok(StoreHandle {
            storage,
            database: Arc::from(self.database.as_str()),
            version: self.version,
        })
    }

    /// The open handle, or `NotOpen` with the current state.
    pub async fn handle(&self) -> Result<StoreHandle, StoreError> {
        match &*self.slot.read().await {
            Slot::Open(handle) => Ok(handle.clone()),
            other => Err(StoreError::NotOpen {
                state: other.state(),
            }),
        }
    }

    /// Another collection of the open database.
    pub async fn collection(&self, name: &str) -> Result<Collection, StoreError> {
        Ok(self.handle().await?.collection(name))
    }

    async fn primary(&self) -> Result<Collection, StoreError> {
        self.collection(self.collection_name()).await
    }

    pub async fn add<T: Serialize + ?Sized>(&self, record: &T) -> Result<RecordId, StoreError> {
        self.primary().await?.add(record).await
    }

    pub async fn add_many<T: Serialize>(&self, records: &[T]) -> Result<Vec<RecordId>, StoreError> {
        self.primary().await?.add_many(records).await
    }

    pub async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        self.primary().await?.list_all().await
    }

    pub async fn list_all_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        self.primary().await?.list_all_as().await
    }

    pub async fn delete_by_id(&self, id: RecordId) -> Result<(), StoreError> {
        self.primary().await?.delete_by_id(id).await
    }
}

/// Collections of an existing database with their record counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSummary {
    pub database: String,
    pub version: Option<u32>,
    pub collections: Vec<(String, u64)>,
}

/// Inspect an existing database over a read-only connection.
pub async fn describe(database: &str, config: &Config) -> Result<DatabaseSummary, StoreError> {
    validate_database_name(database).map_err(|e| StoreError::open(database, e))?;
    let path = config.database_path(database);
    let storage = RecordStorage::connect_read_only(&path, config)
        .await
        .map_err(|e| StoreError::open(database, e))?;

    let version = storage
        .version()
        .await
        .map_err(|e| StoreError::read(database, e))?;
    let names = storage
        .collection_names()
        .await
        .map_err(|e| StoreError::read(database, e))?;

    let mut collections = Vec::with_capacity(names.len());
    for name in names {
        let count = storage
            .count(&name)
            .await
            .map_err(|e| StoreError::read(name.as_str(), e))?;
        collections.push((name, count));
    }
    storage.pool().close().await;

    Ok(DatabaseSummary {
        database: database.to_string(),
        version,
        collections,
    })
}

fn validate_database_name(name: &str) -> Result<(), EngineError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidName {
            what: "database",
            name: name.to_string(),
        })
    }
}

fn validate_collection_name(name: &str) -> Result<(), EngineError> {
    let ok = !name.is_empty()
        && name.len() <= MAX_COLLECTION_NAME_LEN
        && !name.chars().any(char::is_control);
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidName {
            what: "collection",
            name: name.to_string(),
        })
    }
}
