//! # Coinwatch Store
//!
//! DuckDB-backed implementation of the core [`KeyValueStore`] contract.
//!
//! ## Overview
//!
//! Every record lives in one table:
//!
//! | Column | Type | Description |
//! |--------|------|-------------|
//! | `record_key` | `VARCHAR` | Primary key, e.g. `PRICE#BTC` |
//! | `body` | `VARCHAR` | Opaque record body |
//! | `expires_at` | `BIGINT` | Unix seconds; `NULL` never expires |
//!
//! Reads hide rows whose `expires_at` has passed according to the injected
//! clock; [`KeyValueStore::purge_expired`] removes them physically. All
//! statements are parameterized and run on the blocking thread pool.
//!
//! Writes are serialized through a per-store gate. Pooled connections share
//! one `DuckDB` transaction manager, and two transactions writing the same
//! row would otherwise fail at commit with a conflict.
//!
//! ```rust,no_run
//! use coinwatch_store::{DuckDbStore, StoreConfig};
//!
//! let store = DuckDbStore::open(StoreConfig::default())?;
//! println!("{}", store.db_path().display());
//! # Ok::<(), coinwatch_store::DuckStoreError>(())
//! ```

pub mod duckdb;
pub mod error;
pub mod migrations;

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use ::duckdb::{Connection, ToSql};
use coinwatch_core::{
    Clock, IncrementOutcome, KeyValueStore, RateWindowCounter, StoreEntry, StoreError,
    SystemClock, UtcDateTime,
};
use tokio::sync::Mutex;
use tracing::debug;

pub use crate::duckdb::{DuckDbConnectionManager, PooledConnection};
pub use crate::error::DuckStoreError;

/// Location and pool sizing for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for coinwatch data.
    pub coinwatch_home: PathBuf,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let coinwatch_home = resolve_coinwatch_home();
        let db_path = env::var_os("COINWATCH_DB_PATH")
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| coinwatch_home.join("coinwatch.duckdb"));
        Self {
            coinwatch_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

impl StoreConfig {
    pub fn at_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}

/// Durable key-value store on a single `DuckDB` file.
#[derive(Clone)]
pub struct DuckDbStore {
    manager: DuckDbConnectionManager,
    clock: Arc<dyn Clock>,
    write_gate: Arc<Mutex<()>>,
}

impl DuckDbStore {
    pub fn open(config: StoreConfig) -> Result<Self, DuckStoreError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::open(config.db_path, config.max_pool_size)?;
        Self::initialize(manager)
    }

    pub fn open_in_memory() -> Result<Self, DuckStoreError> {
        Self::initialize(DuckDbConnectionManager::open_in_memory(2)?)
    }

    fn initialize(manager: DuckDbConnectionManager) -> Result<Self, DuckStoreError> {
        {
            let connection = manager.acquire()?;
            migrations::apply_migrations(&connection)?;
        }
        debug!(path = %manager.db_path().display(), "store initialized");
        Ok(Self {
            manager,
            clock: Arc::new(SystemClock),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Replace the clock used for expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    fn now_seconds(&self) -> i64 {
        self.clock.now().unix_timestamp()
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DuckStoreError> + Send + 'static,
    {
        let manager = self.manager.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<T, DuckStoreError> {
            let connection = manager.acquire()?;
            op(&connection)
        })
        .await;

        match outcome {
            Ok(result) => result.map_err(StoreError::from),
            Err(join) => Err(DuckStoreError::Task(join.to_string()).into()),
        }
    }

    /// Like [`Self::run`], holding the write gate until the statement
    /// (and its transaction, if any) has finished.
    async fn run_write<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DuckStoreError> + Send + 'static,
    {
        let _gate = self.write_gate.lock().await;
        self.run(op).await
    }
}

impl KeyValueStore for DuckDbStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoreEntry>, StoreError>> + Send + 'a>> {
        let key = key.to_owned();
        let now = self.now_seconds();
        Box::pin(self.run(move |connection| select_live(connection, &key, now)))
    }

    fn batch_get<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<String, StoreEntry>, StoreError>> + Send + 'a>>
    {
        let keys = keys.to_vec();
        let now = self.now_seconds();
        Box::pin(self.run(move |connection| select_many_live(connection, &keys, now)))
    }

    fn put<'a>(
        &'a self,
        entry: StoreEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(self.run_write(move |connection| {
            upsert(connection, &entry.key, &entry.body, expiry_seconds(&entry))
        }))
    }

    fn batch_put<'a>(
        &'a self,
        entries: Vec<StoreEntry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(self.run_write(move |connection| {
            if entries.is_empty() {
                return Ok(());
            }

            connection.execute_batch("BEGIN TRANSACTION")?;
            let result = (|| -> Result<(), DuckStoreError> {
                for entry in &entries {
                    upsert(connection, &entry.key, &entry.body, expiry_seconds(entry))?;
                }
                Ok(())
            })();

            finalize_transaction(connection, result)
        }))
    }

    fn increment_below<'a>(
        &'a self,
        key: &'a str,
        ceiling: u32,
        expires_at: Option<UtcDateTime>,
    ) -> Pin<Box<dyn Future<Output = Result<IncrementOutcome, StoreError>> + Send + 'a>> {
        let key = key.to_owned();
        let now = self.now_seconds();
        let expires_at = expires_at.map(UtcDateTime::unix_timestamp);

        Box::pin(self.run_write(move |connection| {
            connection.execute_batch("BEGIN TRANSACTION")?;
            let result = (|| -> Result<IncrementOutcome, DuckStoreError> {
                let current = select_live(connection, &key, now)?
                    .and_then(|entry| RateWindowCounter::parse_count(&entry.body))
                    .unwrap_or(0);

                if current >= ceiling {
                    return Ok(IncrementOutcome::AtCeiling(current));
                }

                let next = current + 1;
                upsert(connection, &key, &next.to_string(), expires_at)?;
                Ok(IncrementOutcome::Incremented(next))
            })();

            finalize_transaction(connection, result)
        }))
    }

    fn purge_expired<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + 'a>> {
        let now = self.now_seconds();
        Box::pin(self.run_write(move |connection| {
            let params: [&dyn ToSql; 1] = [&now];
            let removed = connection.execute(
                "DELETE FROM kv_records WHERE expires_at IS NOT NULL AND expires_at <= ?",
                params.as_slice(),
            )?;
            Ok(removed)
        }))
    }
}

fn select_live(
    connection: &Connection,
    key: &str,
    now: i64,
) -> Result<Option<StoreEntry>, DuckStoreError> {
    let mut statement = connection.prepare(
        "SELECT body, expires_at FROM kv_records \
         WHERE record_key = ? AND (expires_at IS NULL OR expires_at > ?)",
    )?;
    let params: [&dyn ToSql; 2] = [&key, &now];
    let mut rows = statement.query(params.as_slice())?;

    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let body: String = row.get(0)?;
    let expires_at: Option<i64> = row.get(1)?;
    Ok(Some(build_entry(key.to_owned(), body, expires_at)?))
}

fn select_many_live(
    connection: &Connection,
    keys: &[String],
    now: i64,
) -> Result<BTreeMap<String, StoreEntry>, DuckStoreError> {
    let mut found = BTreeMap::new();
    if keys.is_empty() {
        return Ok(found);
    }

    let placeholders = vec!["?"; keys.len()].join(", ");
    let sql = format!(
        "SELECT record_key, body, expires_at FROM kv_records \
         WHERE record_key IN ({placeholders}) AND (expires_at IS NULL OR expires_at > ?)"
    );

    let mut params: Vec<&dyn ToSql> = keys.iter().map(|key| key as &dyn ToSql).collect();
    params.push(&now);

    let mut statement = connection.prepare(&sql)?;
    let mut rows = statement.query(params.as_slice())?;
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        let body: String = row.get(1)?;
        let expires_at: Option<i64> = row.get(2)?;
        found.insert(key.clone(), build_entry(key, body, expires_at)?);
    }
    Ok(found)
}

fn upsert(
    connection: &Connection,
    key: &str,
    body: &str,
    expires_at: Option<i64>,
) -> Result<(), DuckStoreError> {
    let params: [&dyn ToSql; 3] = [&key, &body, &expires_at];
    connection.execute(
        "INSERT OR REPLACE INTO kv_records (record_key, body, expires_at) VALUES (?, ?, ?)",
        params.as_slice(),
    )?;
    Ok(())
}

fn build_entry(
    key: String,
    body: String,
    expires_at: Option<i64>,
) -> Result<StoreEntry, DuckStoreError> {
    let expires_at = expires_at
        .map(UtcDateTime::from_unix_timestamp)
        .transpose()
        .map_err(|e| DuckStoreError::InvalidData(format!("record '{key}': {e}")))?;
    Ok(StoreEntry {
        key,
        body,
        expires_at,
    })
}

fn expiry_seconds(entry: &StoreEntry) -> Option<i64> {
    entry.expires_at.map(UtcDateTime::unix_timestamp)
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, DuckStoreError>,
) -> Result<T, DuckStoreError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn resolve_coinwatch_home() -> PathBuf {
    if let Some(path) = env::var_os("COINWATCH_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".coinwatch");
    }

    PathBuf::from(".coinwatch")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coinwatch_core::{FixedWindowRateLimiter, ManualClock, RateLimiter};
    use tempfile::tempdir;

    use super::*;

    fn store_with_clock() -> (DuckDbStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid"),
        ));
        let store = DuckDbStore::open_in_memory()
            .expect("open store")
            .with_clock(clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn put_get_and_overwrite() {
        let (store, _) = store_with_clock();

        assert!(store.get("PRICE#BTC").await.expect("get").is_none());

        store
            .put(StoreEntry::new("PRICE#BTC", "{\"price\":1}"))
            .await
            .expect("put");
        store
            .put(StoreEntry::new("PRICE#BTC", "{\"price\":2}"))
            .await
            .expect("put");

        let entry = store.get("PRICE#BTC").await.expect("get").expect("present");
        assert_eq!(entry.body, "{\"price\":2}");
        assert_eq!(entry.expires_at, None);
    }

    #[tokio::test]
    async fn expired_rows_are_hidden_then_purged() {
        let (store, clock) = store_with_clock();
        let expires_at = clock.now().saturating_add(Duration::from_secs(60));
        store
            .batch_put(vec![
                StoreEntry::new("a", "1").expiring_at(expires_at),
                StoreEntry::new("b", "2"),
            ])
            .await
            .expect("batch put");

        let keys = vec![String::from("a"), String::from("b"), String::from("c")];
        let found = store.batch_get(&keys).await.expect("batch get");
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"].expires_at, Some(expires_at));

        clock.advance(Duration::from_secs(60));
        let found = store.batch_get(&keys).await.expect("batch get");
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["b"]);

        assert_eq!(store.purge_expired().await.expect("purge"), 1);
        assert_eq!(store.purge_expired().await.expect("purge"), 0);
    }

    #[tokio::test]
    async fn conditional_increment_respects_ceiling_and_expiry() {
        let (store, clock) = store_with_clock();
        let expires_at = Some(clock.now().saturating_add(Duration::from_secs(3600)));

        for expected in 1..=3 {
            assert_eq!(
                store.increment_below("counter", 3, expires_at).await.expect("inc"),
                IncrementOutcome::Incremented(expected)
            );
        }
        assert_eq!(
            store.increment_below("counter", 3, expires_at).await.expect("inc"),
            IncrementOutcome::AtCeiling(3)
        );

        clock.advance(Duration::from_secs(3600));
        assert_eq!(
            store.increment_below("counter", 3, expires_at).await.expect("inc"),
            IncrementOutcome::Incremented(1)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_never_exceed_the_limit() {
        let temp = tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::new(
            UtcDateTime::parse("2024-01-01T00:00:30Z").expect("valid"),
        ));
        let store = DuckDbStore::open(StoreConfig::at_path(temp.path().join("limits.duckdb")))
            .expect("open")
            .with_clock(clock.clone());
        let limiter = Arc::new(
            FixedWindowRateLimiter::new(Arc::new(store.clone()), clock).with_limit(10),
        );

        let tasks: Vec<_> = (0..60)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.check_and_increment("key_live_0001").await.is_ok() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.expect("task completes") {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
        let counter = store
            .get("APIKEY#key_live_0001#RATELIMIT#202401010000")
            .await
            .expect("get")
            .expect("counter exists");
        assert_eq!(counter.body, "10");
    }

    #[tokio::test]
    async fn keys_are_bound_as_parameters() {
        let (store, _) = store_with_clock();
        let hostile = "PRICE#X'; DROP TABLE kv_records; --";

        store.put(StoreEntry::new(hostile, "v")).await.expect("put");

        let entry = store.get(hostile).await.expect("get").expect("present");
        assert_eq!(entry.key, hostile);
    }

    #[tokio::test]
    async fn records_survive_reopening_the_file() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("nested").join("coinwatch.duckdb");

        {
            let store = DuckDbStore::open(StoreConfig::at_path(&db_path)).expect("open");
            store
                .put(StoreEntry::new("APIKEY#abc", "{}"))
                .await
                .expect("put");
        }

        let reopened = DuckDbStore::open(StoreConfig::at_path(&db_path)).expect("reopen");
        assert_eq!(reopened.db_path(), db_path.as_path());
        assert!(reopened.get("APIKEY#abc").await.expect("get").is_some());
    }
}
