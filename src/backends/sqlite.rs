//! SQLite database backend implementation
//!
//! One rusqlite connection guarded by a mutex; blocking calls run on the
//! blocking thread pool. A transaction holds the connection's single
//! admission permit from `BEGIN` until it finishes, so bare statements and
//! other `begin` calls wait for it instead of running inside it. SQLite has
//! no bulk-load protocol: `copy_in` keeps the configuration-error default.

use crate::core::{
    database::{Database, Executor, Transaction},
    dialect::Dialect,
    error::{DatabaseError, Result},
    value::{DatabaseResult, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// SQLite database implementation
pub struct SqliteDatabase {
    connection: SharedConnection,
    gate: Arc<Semaphore>,
    in_transaction: Arc<AtomicBool>,
    operation_timeout: Duration,
}

impl SqliteDatabase {
    /// Open the database at `path`; `":memory:"` opens a private in-memory one
    pub async fn open(path: &str) -> Result<Self> {
        let path = path.to_string();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute("PRAGMA foreign_keys = ON", [])?;
            Ok(conn)
        })
        .await
        .map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))??;

        Ok(Self {
            connection: Arc::new(Mutex::new(Some(conn))),
            gate: Arc::new(Semaphore::new(1)),
            in_transaction: Arc::new(AtomicBool::new(false)),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    /// Set the per-statement timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    /// Wait until no transaction holds the connection
    ///
    /// The wait is bounded by the operation timeout.
    async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.gate).acquire_owned();
        match tokio::time::timeout(self.operation_timeout, permit).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(DatabaseError::connection("Database closed")),
            Err(_) => Err(DatabaseError::connection_timeout(
                self.operation_timeout.as_millis() as u64,
            )),
        }
    }
}

/// Convert a rusqlite Row to a DatabaseRow
fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
    let mut db_row = DatabaseRow::new();
    let column_count = row.as_ref().column_count();

    for i in 0..column_count {
        let column_name = row.as_ref().column_name(i)?.to_string();
        let value = match row.get_ref(i)? {
            ValueRef::Null => DatabaseValue::Null,
            ValueRef::Integer(v) => DatabaseValue::Long(v),
            ValueRef::Real(v) => DatabaseValue::Double(v),
            ValueRef::Text(v) => DatabaseValue::String(String::from_utf8_lossy(v).to_string()),
            ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
        };
        db_row.insert(column_name, value);
    }

    Ok(db_row)
}

/// Convert DatabaseValue to an owned rusqlite value
fn to_sqlite_value(value: &DatabaseValue) -> Value {
    match value {
        DatabaseValue::Null => Value::Null,
        DatabaseValue::Bool(v) => Value::Integer(*v as i64),
        DatabaseValue::Int(v) => Value::Integer(*v as i64),
        DatabaseValue::Long(v) => Value::Integer(*v),
        DatabaseValue::Float(v) => Value::Real(*v as f64),
        DatabaseValue::Double(v) => Value::Real(*v),
        DatabaseValue::String(v) => Value::Text(v.clone()),
        DatabaseValue::Bytes(v) => Value::Blob(v.clone()),
        DatabaseValue::Timestamp(v) => Value::Text(v.to_rfc3339()),
    }
}

fn query_error(err: rusqlite::Error, sql: &str, params: &[DatabaseValue]) -> DatabaseError {
    DatabaseError::query(err.to_string(), sql, params)
}

/// Run `op` against the connection on the blocking pool, bounded by `timeout`
async fn with_connection<T, F>(connection: &SharedConnection, timeout: Duration, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let connection = Arc::clone(connection);
    let mut task = tokio::task::spawn_blocking(move || -> Result<T> {
        let guard = connection.blocking_lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        op(conn)
    });

    tokio::select! {
        result = &mut task => {
            result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?
        }
        _ = tokio::time::sleep(timeout) => {
            task.abort();
            Err(DatabaseError::query_timeout(timeout.as_millis() as u64))
        }
    }
}

async fn run_query(
    connection: &SharedConnection,
    timeout: Duration,
    sql: &str,
    params: &[DatabaseValue],
) -> Result<DatabaseResult> {
    let sql = sql.to_string();
    let params = params.to_vec();
    with_connection(connection, timeout, move |conn| {
        let values: Vec<Value> = params.iter().map(to_sqlite_value).collect();
        let run = || -> rusqlite::Result<DatabaseResult> {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_database_row)?;
            rows.collect()
        };
        run().map_err(|e| query_error(e, &sql, &params))
    })
    .await
}

async fn run_execute(
    connection: &SharedConnection,
    timeout: Duration,
    sql: &str,
    params: &[DatabaseValue],
) -> Result<u64> {
    let sql = sql.to_string();
    let params = params.to_vec();
    with_connection(connection, timeout, move |conn| {
        let values: Vec<Value> = params.iter().map(to_sqlite_value).collect();
        conn.execute(&sql, params_from_iter(values.iter()))
            .map(|affected| affected as u64)
            .map_err(|e| query_error(e, &sql, &params))
    })
    .await
}

/// Run a transaction control statement. A failed `COMMIT` that leaves the
/// transaction open is rolled back so the connection returns to autocommit.
async fn run_batch(connection: &SharedConnection, timeout: Duration, sql: &'static str) -> Result<()> {
    with_connection(connection, timeout, move |conn| {
        conn.execute_batch(sql).map_err(|e| {
            if sql != "BEGIN" && !conn.is_autocommit() {
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback, "rollback after failed {} also failed", sql);
                }
            }
            DatabaseError::transaction(format!("{}: {}", sql, e))
        })
    })
    .await
}

#[async_trait]
impl Executor for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let _permit = self.admit().await?;
        run_query(&self.connection, self.operation_timeout, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let _permit = self.admit().await?;
        run_execute(&self.connection, self.operation_timeout, sql, params).await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn begin(&self) -> Result<Arc<dyn Transaction>> {
        let permit = self.admit().await?;
        run_batch(&self.connection, self.operation_timeout, "BEGIN").await?;
        self.in_transaction.store(true, Ordering::Release);
        debug!("sqlite transaction started");

        Ok(Arc::new(SqliteTransaction {
            connection: Arc::clone(&self.connection),
            in_transaction: Arc::clone(&self.in_transaction),
            permit: SyncMutex::new(Some(permit)),
            finished: AtomicBool::new(false),
            operation_timeout: self.operation_timeout,
        }))
    }

    async fn close(&self) -> Result<()> {
        let _permit = self.admit().await?;
        let mut connection = self.connection.lock().await;
        *connection = None;
        self.gate.close();
        Ok(())
    }
}

/// A transaction on the shared SQLite connection
pub struct SqliteTransaction {
    connection: SharedConnection,
    in_transaction: Arc<AtomicBool>,
    permit: SyncMutex<Option<OwnedSemaphorePermit>>,
    finished: AtomicBool,
    operation_timeout: Duration,
}

impl SqliteTransaction {
    fn ensure_active(&self) -> Result<()> {
        if self.finished.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction("Transaction already finished"));
        }
        Ok(())
    }

    async fn finish(&self, sql: &'static str) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(DatabaseError::transaction("Transaction already finished"));
        }
        let result = run_batch(&self.connection, self.operation_timeout, sql).await;
        self.in_transaction.store(false, Ordering::Release);
        self.permit.lock().take();
        result
    }
}

#[async_trait]
impl Executor for SqliteTransaction {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        self.ensure_active()?;
        run_query(&self.connection, self.operation_timeout, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        self.ensure_active()?;
        run_execute(&self.connection, self.operation_timeout, sql, params).await
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        warn!("sqlite transaction dropped without commit or rollback; rolling back");
        let connection = Arc::clone(&self.connection);
        let in_transaction = Arc::clone(&self.in_transaction);
        let permit = self.permit.get_mut().take();
        let rollback = move || {
            if let Some(conn) = connection.blocking_lock().as_ref() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!(error = %e, "implicit rollback failed");
                }
            }
            in_transaction.store(false, Ordering::Release);
            drop(permit);
        };
        // Release the permit only once the rollback ran.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(rollback);
            }
            Err(_) => rollback(),
        }
    }
}
