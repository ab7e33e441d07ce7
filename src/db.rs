//! Record store for the slot exchange
//!
//! Turns typed select/insert/update requests into parametrized statements
//! over SQLite. Every call returns a `DbResult`; SQLite failures surface as
//! `Status::InternalError`, never as panics.

mod cache;
mod error;
mod query;
mod row;
mod schema;

pub use cache::CatalogCache;
pub use error::{DbError, DbResult, Status};
pub use query::{CompareOp, Condition, Insert, Join, Select, Update};
pub use row::Row;
pub use schema::*;

use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes query builders against one connection or transaction
pub struct Store<'c> {
    conn: &'c Connection,
}

impl<'c> Store<'c> {
    fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn select(&self, query: &Select) -> DbResult<Vec<Row>> {
        let stmt = query.build()?;
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "select");

        let names = query.column_names();
        let mut prepared = self.conn.prepare(&stmt.sql)?;
        let rows = prepared.query_map(params_from_iter(stmt.params.iter()), |row| {
            Row::read(row, &names)
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn exists(&self, query: &Select) -> DbResult<bool> {
        let rows = self.select(&query.clone().limit(1))?;
        Ok(!rows.is_empty())
    }

    /// Insert one row and read back its `RETURNING` columns.
    ///
    /// Without returning columns the result is an empty row.
    pub fn insert(&self, query: &Insert) -> DbResult<Row> {
        let stmt = query.build()?;
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "insert");

        let params = params_from_iter(stmt.params.iter());
        if query.returning_columns().is_empty() {
            self.conn.execute(&stmt.sql, params)?;
            return Ok(Row::default());
        }

        let names = query.returning_columns().to_vec();
        self.conn
            .query_row(&stmt.sql, params, |row| Row::read(row, &names))
            .map_err(DbError::from)
    }

    /// Returns the number of affected rows
    pub fn update(&self, query: &Update) -> DbResult<usize> {
        let stmt = query.build()?;
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "update");

        self.conn
            .execute(&stmt.sql, params_from_iter(stmt.params.iter()))
            .map_err(DbError::from)
    }
}

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    cache: Arc<CatalogCache>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cache: Arc::new(CatalogCache::default()),
        })
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DbError::internal("database connection lock poisoned"))
    }

    /// Run read-only work inside one deferred transaction
    pub fn read<T>(&self, work: impl FnOnce(&Store<'_>) -> DbResult<T>) -> DbResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = work(&Store::new(&tx))?;
        tx.commit()?;
        Ok(out)
    }

    /// Run work inside one immediate write transaction.
    ///
    /// Commits only when `work` succeeds; any error rolls every write back.
    pub fn write<T>(&self, work: impl FnOnce(&Store<'_>) -> DbResult<T>) -> DbResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = work(&Store::new(&tx));
        match result {
            Ok(out) => {
                tx.commit()?;
                Ok(out)
            }
            Err(err) => {
                tracing::debug!(status = %err.status, "Rolling back write transaction");
                // Dropping the transaction rolls it back
                drop(tx);
                Err(err)
            }
        }
    }

    pub fn select(&self, query: &Select) -> DbResult<Vec<Row>> {
        self.read(|store| store.select(query))
    }

    pub fn exists(&self, query: &Select) -> DbResult<bool> {
        self.read(|store| store.exists(query))
    }

    /// The insert and its returning read form one atomic unit
    pub fn insert(&self, query: &Insert) -> DbResult<Row> {
        self.write(|store| store.insert(query))
    }

    pub fn update(&self, query: &Update) -> DbResult<usize> {
        self.write(|store| store.update(query))
    }

    #[cfg(test)]
    pub fn execute_raw(&self, sql: &str) -> DbResult<()> {
        self.lock()?.execute_batch(sql).map_err(DbError::from)
    }
}
