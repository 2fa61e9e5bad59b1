//! `SQLite` backend storing records as JSON bodies.

use super::connection::{acquire_lock, configure_connection};
use super::sql::{build_select, validate_identifier};
use crate::models::{Filter, Optional, Record, RecordId, SortingMode};
use crate::storage::traits::{Backend, Operation};
use crate::{Error, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::instrument;

/// `SQLite`-backed record storage.
///
/// One table per backend, with schema
/// `(id INTEGER PRIMARY KEY, body TEXT NOT NULL)`. Bodies hold the record's
/// JSON form; filters and sorts are evaluated in SQL with `json_extract`.
/// Every call runs on the blocking thread pool.
pub struct SqliteBackend<R> {
    /// Connection to the `SQLite` database.
    conn: Arc<Mutex<Connection>>,
    /// Path to the database file (`None` for in-memory).
    db_path: Option<PathBuf>,
    /// Table holding the records.
    table: String,
    _record: PhantomData<fn() -> R>,
}

impl<R> std::fmt::Debug for SqliteBackend<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("db_path", &self.db_path)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<R> SqliteBackend<R>
where
    R: Record + Serialize + DeserializeOwned,
{
    /// Opens (or creates) a database file and ensures `table` exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a bad table name and
    /// [`Error::OperationFailed`] if the database cannot be opened.
    pub fn open(db_path: impl Into<PathBuf>, table: impl Into<String>) -> Result<Self> {
        let db_path = db_path.into();
        let table = table.into();
        validate_identifier(&table)?;

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::operation_failed("create_data_dir", e))?;
        }

        let conn = Connection::open(&db_path)
            .map_err(|e| Error::operation_failed("open_sqlite", e))?;
        Self::from_connection(conn, Some(db_path), table)
    }

    /// Creates an in-memory database holding `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a bad table name.
    pub fn in_memory(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::operation_failed("open_sqlite", e))?;
        Self::from_connection(conn, None, table)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>, table: String) -> Result<Self> {
        configure_connection(&conn)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, body TEXT NOT NULL)"
        ))
        .map_err(|e| Error::operation_failed("create_table", e))?;

        tracing::debug!(table = %table, path = ?db_path, "opened sqlite backend");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            table,
            _record: PhantomData,
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the query fails.
    pub async fn count(&self) -> Result<usize> {
        self.run("count", |conn, table| {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(|e| Error::operation_failed("count", e))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    /// Runs `work` against the connection on the blocking pool.
    ///
    /// Every call counts towards `storage_operations_total` and
    /// `storage_operation_duration_ms`, labelled with its outcome.
    async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        let start = Instant::now();

        let result = match tokio::task::spawn_blocking(move || {
            let guard = acquire_lock(&conn);
            work(&guard, table.as_str())
        })
        .await
        {
            Ok(result) => result,
            Err(e) => Err(Error::operation_failed(operation, e)),
        };

        let status = if result.is_ok() { "success" } else { "error" };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::counter!(
            "storage_operations_total",
            "backend" => "sqlite",
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            "storage_operation_duration_ms",
            "backend" => "sqlite",
            "operation" => operation,
            "status" => status
        )
        .record(elapsed_ms);
        result
    }

    async fn select(
        &self,
        operation: Operation,
        filter: &Filter,
        sort: &SortingMode,
        limit: Option<usize>,
    ) -> Result<Vec<R>> {
        let op = operation.as_str();
        let (sql, params) = build_select(&self.table, filter, sort, limit)?;
        self.run(op, move |conn, _| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::operation_failed(op, e))?;
            let bodies = stmt
                .query_map(params_from_iter(params), |row| row.get::<_, String>(0))
                .map_err(|e| Error::operation_failed(op, e))?;

            let mut records = Vec::new();
            for body in bodies {
                let body = body.map_err(|e| Error::operation_failed(op, e))?;
                records.push(decode(op, &body)?);
            }
            Ok(records)
        })
        .await
    }

    /// Applies `write` to every record inside one transaction.
    async fn write_each<F>(&self, operation: Operation, records: Vec<R>, write: F) -> Result<Vec<R>>
    where
        F: Fn(&Connection, &str, RecordId, &str) -> Result<()> + Send + 'static,
    {
        let op = operation.as_str();
        self.run(op, move |conn, table| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| Error::operation_failed(op, e))?;
            for record in &records {
                let body = serde_json::to_string(record)
                    .map_err(|e| Error::operation_failed(op, e))?;
                write(&tx, table, record.id(), &body)?;
            }
            tx.commit().map_err(|e| Error::operation_failed(op, e))?;
            Ok(records)
        })
        .await
    }
}

fn decode<R: DeserializeOwned>(operation: &str, body: &str) -> Result<R> {
    serde_json::from_str(body).map_err(|e| Error::operation_failed(operation, e))
}

#[async_trait]
impl<R> Backend<R> for SqliteBackend<R>
where
    R: Record + Serialize + DeserializeOwned,
{
    #[instrument(skip(self), fields(table = %self.table))]
    async fn read_all(&self, filter: &Filter, sort: &SortingMode) -> Result<Vec<R>> {
        self.select(Operation::ReadAll, filter, sort, None).await
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn read_one(&self, filter: &Filter, sort: &SortingMode) -> Result<Optional<R>> {
        let rows = self.select(Operation::ReadOne, filter, sort, Some(1)).await?;
        Ok(Optional::wrap(rows.into_iter().next()))
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn read_by_id(&self, id: RecordId) -> Result<Optional<R>> {
        let op = Operation::ReadById.as_str();
        self.run(op, move |conn, table| {
            let body: Option<String> = conn
                .query_row(
                    &format!("SELECT body FROM {table} WHERE id = ?1"),
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::operation_failed(op, e))?;
            body.map(|b| decode(op, &b)).transpose().map(Optional::wrap)
        })
        .await
    }

    #[instrument(skip(self, records), fields(table = %self.table, count = records.len()))]
    async fn insert(&self, records: Vec<R>) -> Result<Vec<R>> {
        self.write_each(Operation::Insert, records, |conn, table, id, body| {
            conn.execute(
                &format!("INSERT INTO {table} (id, body) VALUES (?1, ?2)"),
                params![id, body],
            )
            .map_err(|e| Error::operation_failed("insert", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, records), fields(table = %self.table, count = records.len()))]
    async fn update(&self, records: Vec<R>) -> Result<Vec<R>> {
        self.write_each(Operation::Update, records, |conn, table, id, body| {
            let changed = conn
                .execute(
                    &format!("UPDATE {table} SET body = ?2 WHERE id = ?1"),
                    params![id, body],
                )
                .map_err(|e| Error::operation_failed("update", e))?;
            if changed == 0 {
                return Err(Error::operation_failed(
                    "update",
                    format!("record {id} does not exist"),
                ));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, records), fields(table = %self.table, count = records.len()))]
    async fn insert_or_update(&self, records: Vec<R>) -> Result<Vec<R>> {
        self.write_each(Operation::InsertOrUpdate, records, |conn, table, id, body| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (id, body) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET body = excluded.body"
                ),
                params![id, body],
            )
            .map_err(|e| Error::operation_failed("insert_or_update", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, records), fields(table = %self.table, count = records.len()))]
    async fn delete(&self, records: Vec<R>) -> Result<usize> {
        let op = Operation::Delete.as_str();
        let ids: Vec<RecordId> = records.iter().map(Record::id).collect();
        self.run(op, move |conn, table| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| Error::operation_failed(op, e))?;
            let mut removed = 0;
            for id in ids {
                removed += tx
                    .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])
                    .map_err(|e| Error::operation_failed(op, e))?;
            }
            tx.commit().map_err(|e| Error::operation_failed(op, e))?;
            Ok(removed)
        })
        .await
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn delete_all(&self) -> Result<usize> {
        let op = Operation::DeleteAll.as_str();
        self.run(op, move |conn, table| {
            conn.execute(&format!("DELETE FROM {table}"), [])
                .map_err(|e| Error::operation_failed(op, e))
        })
        .await
    }
}
