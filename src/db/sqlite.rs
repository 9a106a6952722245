use crate::config::Config;
use crate::db::models::{DbRecordRow, Record, RecordId};
use crate::db::schema::{SQLITE_INIT, VERSION_KEY};
use crate::error::EngineError;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection, Transaction};
use std::path::Path;
use std::time::Duration;

pub type SqlitePool = Pool<Sqlite>;

/// Write transactions take the write lock up front; under WAL a deferred
/// transaction that has already read cannot wait for the lock.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// What an upgrade pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeOutcome {
    /// Version stored before the upgrade; `None` for a fresh database.
    pub previous_version: Option<u32>,
    /// Collections that did not exist and were created.
    pub created: Vec<String>,
}

#[derive(Clone)]
pub struct RecordStorage {
    pool: SqlitePool,
}

impl RecordStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database file at `path`, creating it if missing.
    pub async fn connect(path: &Path, cfg: &Config) -> Result<Self, EngineError> {
        let connect_opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(cfg.busy_timeout_secs));
        Self::connect_with(connect_opts, cfg).await
    }

    /// Connect to an existing database file without writing to it.
    pub async fn connect_read_only(path: &Path, cfg: &Config) -> Result<Self, EngineError> {
        let connect_opts = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(Duration::from_secs(cfg.busy_timeout_secs));
        Self::connect_with(connect_opts, cfg).await
    }

    async fn connect_with(
        connect_opts: SqliteConnectOptions,
        cfg: &Config,
    ) -> Result<Self, EngineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections.max(1))
            .connect_with(connect_opts)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, EngineError> {
        Ok(self.pool.begin_with(BEGIN_WRITE).await?)
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), EngineError> {
        let mut tx = self.begin_write().await?;
        // sqlx::query runs a single statement at a time
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Bring the database to `version` and make sure every collection exists.
    ///
    /// Runs in one transaction. A stored version above `version` is rejected
    /// and nothing is changed.
    pub async fn upgrade(
        &self,
        version: u32,
        collections: &[String],
    ) -> Result<UpgradeOutcome, EngineError> {
        let mut tx = self.begin_write().await?;

        let previous_version = read_version(&mut *tx).await?;
        if let Some(stored) = previous_version {
            if stored > version {
                return Err(EngineError::VersionDowngrade {
                    requested: version,
                    stored,
                });
            }
        }

        sqlx::query(
            r#"INSERT INTO meta (key, value) VALUES (?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        )
        .bind(VERSION_KEY)
        .bind(version.to_string())
        .execute(&mut *tx)
        .await?;

        let mut created = Vec::new();
        for name in collections {
            let res = sqlx::query("INSERT INTO collections (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 1 {
                created.push(name.clone());
            }
        }

        tx.commit().await?;
        Ok(UpgradeOutcome {
            previous_version,
            created,
        })
    }

    pub async fn version(&self) -> Result<Option<u32>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        read_version(&mut *conn).await
    }

    pub async fn collection_names(&self) -> Result<Vec<String>, EngineError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Insert one body and return the id drawn from the collection's key generator.
    pub async fn insert(
        &self,
        collection: &str,
        body: &Map<String, Value>,
    ) -> Result<RecordId, EngineError> {
        let mut tx = self.begin_write().await?;
        let id = insert_in(&mut *tx, collection, body).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Batch insert using a single transaction. Returns ids in the same order.
    pub async fn insert_many(
        &self,
        collection: &str,
        bodies: &[Map<String, Value>],
    ) -> Result<Vec<RecordId>, EngineError> {
        let mut tx = self.begin_write().await?;
        let mut ids = Vec::with_capacity(bodies.len());
        for body in bodies {
            ids.push(insert_in(&mut *tx, collection, body).await?);
        }
        tx.commit().await?;
        Ok(ids)
    }

    pub async fn list_all(&self, collection: &str) -> Result<Vec<Record>, EngineError> {
        let mut tx = self.pool.begin().await?;
        ensure_collection(&mut *tx, collection).await?;
        let rows: Vec<DbRecordRow> =
            sqlx::query_as("SELECT id, body FROM records WHERE collection = ? ORDER BY id")
                .bind(collection)
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;
        rows.into_iter().map(Record::try_from).collect()
    }

    /// Remove a record. Returns whether a row was actually deleted.
    pub async fn delete(&self, collection: &str, id: RecordId) -> Result<bool, EngineError> {
        let mut tx = self.begin_write().await?;
        ensure_collection(&mut *tx, collection).await?;
        let res = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn count(&self, collection: &str) -> Result<u64, EngineError> {
        let mut tx = self.pool.begin().await?;
        ensure_collection(&mut *tx, collection).await?;
        let rec: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(rec.0.max(0) as u64)
    }
}

async fn read_version(conn: &mut SqliteConnection) -> Result<Option<u32>, EngineError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM meta WHERE key = ?")
        .bind(VERSION_KEY)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some((raw,)) => {
            let v = raw
                .parse::<u32>()
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

async fn ensure_collection(conn: &mut SqliteConnection, collection: &str) -> Result<(), EngineError> {
    let found: Option<(String,)> = sqlx::query_as("SELECT name FROM collections WHERE name = ?")
        .bind(collection)
        .fetch_optional(&mut *conn)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(EngineError::UnknownCollection(collection.to_string())),
    }
}

async fn insert_in(
    conn: &mut SqliteConnection,
    collection: &str,
    body: &Map<String, Value>,
) -> Result<RecordId, EngineError> {
    let body_json = serde_json::to_string(body)?;

    let next: Option<(i64,)> = sqlx::query_as(
        "UPDATE collections SET next_id = next_id + 1 WHERE name = ? RETURNING next_id - 1",
    )
    .bind(collection)
    .fetch_optional(&mut *conn)
    .await?;
    let Some((id,)) = next else {
        return Err(EngineError::UnknownCollection(collection.to_string()));
    };

    sqlx::query("INSERT INTO records (collection, id, body) VALUES (?, ?, ?)")
        .bind(collection)
        .bind(id)
        .bind(body_json)
        .execute(&mut *conn)
        .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Scratch directory for one database file and its WAL sidecars.
    struct TempDb {
        dir: PathBuf,
    }

    impl TempDb {
        fn new(tag: &str) -> Self {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system time before UNIX_EPOCH")
                .as_nanos();
            let mut dir = std::env::temp_dir();
            dir.push(format!("localstore-sqlite-{tag}-{}-{}", std::process::id(), nanos));
            std::fs::create_dir_all(&dir).expect("create temp dir");
            Self { dir }
        }

        fn path(&self) -> PathBuf {
            self.dir.join("test.sqlite")
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn storage(path: &Path) -> RecordStorage {
        let storage = RecordStorage::connect(path, &Config::default())
            .await
            .expect("connect failed");
        storage.init_schema().await.expect("schema init failed");
        storage
    }

    fn body(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let db = TempDb::new("reuse");
        let storage = storage(&db.path()).await;
        storage.upgrade(1, &["items".to_string()]).await.unwrap();

        let a = storage.insert("items", &body(json!({"t": "a"}))).await.unwrap();
        let b = storage.insert("items", &body(json!({"t": "b"}))).await.unwrap();
        assert_eq!((a, b), (1, 2));

        assert!(storage.delete("items", b).await.unwrap());
        let c = storage.insert("items", &body(json!({"t": "c"}))).await.unwrap();
        assert_eq!(c, 3);
        assert_eq!(storage.count("items").await.unwrap(), 2);

        storage.pool().close().await;
    }

    #[tokio::test]
    async fn key_generators_are_per_collection() {
        let db = TempDb::new("percoll");
        let storage = storage(&db.path()).await;
        let names = vec!["users".to_string(), "products".to_string()];
        let outcome = storage.upgrade(1, &names).await.unwrap();
        assert_eq!(outcome.previous_version, None);
        assert_eq!(outcome.created, names);

        let ids = storage
            .insert_many("users", &[body(json!({"name": "a"})), body(json!({"name": "b"}))])
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
        let pid = storage.insert("products", &body(json!({"name": "p"}))).await.unwrap();
        assert_eq!(pid, 1);

        assert_eq!(
            storage.collection_names().await.unwrap(),
            vec!["products".to_string(), "users".to_string()]
        );

        storage.pool().close().await;
    }

    #[tokio::test]
    async fn upgrade_rejects_downgrade_and_keeps_version() {
        let db = TempDb::new("version");
        let storage = storage(&db.path()).await;
        storage.upgrade(3, &["items".to_string()]).await.unwrap();

        let err = storage.upgrade(2, &["other".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::VersionDowngrade { requested: 2, stored: 3 }
        ));
        assert_eq!(storage.version().await.unwrap(), Some(3));
        assert_eq!(storage.collection_names().await.unwrap(), vec!["items".to_string()]);

        let again = storage.upgrade(3, &["items".to_string()]).await.unwrap();
        assert_eq!(again.previous_version, Some(3));
        assert!(again.created.is_empty());

        storage.pool().close().await;
    }

    #[tokio::test]
    async fn unknown_collection_is_reported() {
        let db = TempDb::new("unknown");
        let storage = storage(&db.path()).await;

        let err = storage.insert("ghost", &Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownCollection(ref c) if c == "ghost"));
        assert!(matches!(
            storage.list_all("ghost").await,
            Err(EngineError::UnknownCollection(_))
        ));

        storage.pool().close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writers_on_separate_pools_wait_for_each_other() {
        let db = TempDb::new("writers");
        let first = storage(&db.path()).await;
        first.upgrade(1, &["items".to_string()]).await.unwrap();
        let second = storage(&db.path()).await;
        second.upgrade(1, &["items".to_string()]).await.unwrap();

        let mut tasks = Vec::new();
        for (n, storage) in [first.clone(), second.clone()].into_iter().enumerate() {
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    let id = storage
                        .insert("items", &body(json!({"writer": n, "i": i})))
                        .await?;
                    if i % 2 == 0 {
                        storage.delete("items", id).await?;
                    }
                }
                Ok::<_, EngineError>(())
            }));
        }
        for task in tasks {
            task.await.expect("writer panicked").expect("writer failed");
        }

        assert_eq!(first.count("items").await.unwrap(), 50);
        let next = second.insert("items", &Map::new()).await.unwrap();
        assert_eq!(next, 101);

        first.pool().close().await;
        second.pool().close().await;
    }

    #[tokio::test]
    async fn read_only_connection_reads_but_never_writes() {
        let db = TempDb::new("readonly");
        let writer = storage(&db.path()).await;
        writer.upgrade(1, &["items".to_string()]).await.unwrap();
        writer.insert("items", &body(json!({"t": "a"}))).await.unwrap();

        let reader = RecordStorage::connect_read_only(&db.path(), &Config::default())
            .await
            .expect("read-only connect failed");
        assert_eq!(reader.list_all("items").await.unwrap().len(), 1);
        assert_eq!(reader.version().await.unwrap(), Some(1));
        assert!(matches!(
            reader.insert("items", &body(json!({"t": "b"}))).await,
            Err(EngineError::Database(_))
        ));

        reader.pool().close().await;
        writer.pool().close().await;
    }

    #[tokio::test]
    async fn read_only_connect_does_not_create_missing_files() {
        let db = TempDb::new("missing");
        let result = RecordStorage::connect_read_only(&db.path(), &Config::default()).await;
        assert!(result.is_err());
        assert!(!db.path().exists());
    }
}
