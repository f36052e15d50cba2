//! PostgreSQL database backend implementation
//!
//! Connections come from a deadpool-postgres pool. Statements are prepared;
//! only the fixed-shape single-record statements stay in each connection's
//! statement cache. Every argument is encoded as the parameter type the server declared
//! for it, so an `i64` bound to an `int4` column or a string bound to a
//! `timestamptz` column both work. JSON columns travel as text.
//! Transactions pin one pooled connection until commit or rollback, and
//! bulk loads use `COPY ... FROM STDIN`.

use crate::core::{
    database::{ConnectionBuilder, CopyInWriter, Database, Executor, Transaction},
    dialect::Dialect,
    error::{DatabaseError, Result},
    query_builder::copy_statement,
    value::{DatabaseResult, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{
    ClientWrapper, Hook, HookError, Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime,
};
use futures::SinkExt;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{CopyInSink, NoTls, Row};
use tracing::{debug, error, warn};

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool configuration for [`PostgresDatabase`]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection string, URL or key/value form
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Connections older than this are discarded when returned to the pool
    pub max_lifetime: Duration,
    /// Timeout for acquiring a connection from the pool
    pub wait_timeout: Duration,
    /// Timeout for database operations (query, execute, etc.)
    pub operation_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_size: 10,
            max_lifetime: Duration::from_secs(60 * 60),
            wait_timeout: Duration::from_secs(5),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Pool configuration for a connection assembled with [`ConnectionBuilder`]
    pub fn from_builder(builder: &ConnectionBuilder) -> Result<Self> {
        Ok(Self::new(builder.build_connection_string()?))
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set connection acquisition timeout
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set database operation timeout (for query, execute, etc.)
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

/// Pooled PostgreSQL database
pub struct PostgresDatabase {
    pool: Pool,
    operation_timeout: Duration,
}

impl PostgresDatabase {
    /// Build the pool and verify it with a ping
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| DatabaseError::configuration(format!("invalid connection string: {}", e)))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
                ..Default::default()
            },
        );

        let max_lifetime = config.max_lifetime;
        let pool = Pool::builder(manager)
            .max_size(config.max_size)
            .wait_timeout(Some(config.wait_timeout))
            .runtime(Runtime::Tokio1)
            .post_recycle(Hook::sync_fn(move |_, metrics| {
                if metrics.age() > max_lifetime {
                    Err(HookError::Message("connection exceeded max lifetime".into()))
                } else {
                    Ok(())
                }
            }))
            .build()
            .map_err(|e| DatabaseError::connection(format!("Failed to create pool: {}", e)))?;

        let db = Self {
            pool,
            operation_timeout: config.operation_timeout,
        };
        if let Err(e) = db.ping().await {
            error!(error = %e, "could not connect to database");
            return Err(e);
        }
        Ok(db)
    }

    /// Connections currently held by the pool
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| DatabaseError::connection(format!("Failed to acquire connection: {}", e)))
    }
}

/// A statement argument encoded as whatever type the server declared
#[derive(Debug)]
struct PgParam<'a>(&'a DatabaseValue);

fn coercion_error(value: &DatabaseValue, ty: &Type) -> Box<dyn StdError + Sync + Send> {
    format!("cannot encode {} as {}", value.type_name(), ty.name()).into()
}

impl ToSql for PgParam<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }
        let fail = || coercion_error(value, ty);

        match ty.name() {
            "bool" => value.as_bool().ok_or_else(fail)?.to_sql(ty, out),
            "int2" => {
                let v = value.as_long().ok_or_else(fail)?;
                i16::try_from(v).map_err(|_| fail())?.to_sql(ty, out)
            }
            "int4" => {
                let v = value.as_long().ok_or_else(fail)?;
                i32::try_from(v).map_err(|_| fail())?.to_sql(ty, out)
            }
            "int8" => value.as_long().ok_or_else(fail)?.to_sql(ty, out),
            "float4" => (value.as_double().ok_or_else(fail)? as f32).to_sql(ty, out),
            "float8" => value.as_double().ok_or_else(fail)?.to_sql(ty, out),
            "bytea" => match value {
                DatabaseValue::Bytes(v) => v.to_sql(ty, out),
                _ => Err(fail()),
            },
            "timestamptz" => value.as_timestamp().ok_or_else(fail)?.to_sql(ty, out),
            "timestamp" => value
                .as_timestamp()
                .ok_or_else(fail)?
                .naive_utc()
                .to_sql(ty, out),
            "json" | "jsonb" => match value {
                DatabaseValue::String(text) => serde_json::from_str::<serde_json::Value>(text)
                    .map_err(|_| fail())?
                    .to_sql(ty, out),
                _ => Err(fail()),
            },
            "text" | "varchar" | "bpchar" | "name" | "unknown" => match value {
                DatabaseValue::Bytes(_) => Err(fail()),
                DatabaseValue::Timestamp(v) => v.to_rfc3339().to_sql(ty, out),
                other => other.to_string().to_sql(ty, out),
            },
            _ => Err(fail()),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn decode<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    wrap: impl FnOnce(T) -> DatabaseValue,
) -> DatabaseValue {
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => wrap(v),
        _ => DatabaseValue::Null,
    }
}

/// Convert a tokio_postgres Row to a DatabaseRow
fn row_to_database_row(row: &Row) -> DatabaseRow {
    let mut db_row = DatabaseRow::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_().name() {
            "bool" => decode(row, idx, DatabaseValue::Bool),
            "int2" => decode(row, idx, |v: i16| DatabaseValue::Int(v as i32)),
            "int4" => decode(row, idx, DatabaseValue::Int),
            "int8" => decode(row, idx, DatabaseValue::Long),
            "float4" => decode(row, idx, DatabaseValue::Float),
            "float8" => decode(row, idx, DatabaseValue::Double),
            "bytea" => decode(row, idx, DatabaseValue::Bytes),
            "timestamptz" => decode::<DateTime<Utc>>(row, idx, DatabaseValue::Timestamp),
            "timestamp" => decode(row, idx, |v: NaiveDateTime| {
                DatabaseValue::Timestamp(v.and_utc())
            }),
            "json" | "jsonb" => decode(row, idx, |v: serde_json::Value| {
                DatabaseValue::String(v.to_string())
            }),
            // text, varchar, name and anything else that decodes as text
            _ => decode(row, idx, DatabaseValue::String),
        };
        db_row.insert(column.name().to_string(), value);
    }

    db_row
}

fn query_error(err: tokio_postgres::Error, sql: &str, params: &[DatabaseValue]) -> DatabaseError {
    let message = err
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string());
    DatabaseError::query(message, sql, params)
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DatabaseError::query_timeout(timeout.as_millis() as u64))?
}

/// Prepare `sql`, through the connection's statement cache only when asked.
/// Uncached statements are closed on the server when they drop.
async fn prepare(
    client: &ClientWrapper,
    sql: &str,
    cached: bool,
) -> std::result::Result<tokio_postgres::Statement, tokio_postgres::Error> {
    if cached {
        client.prepare_cached(sql).await
    } else {
        client.prepare(sql).await
    }
}

async fn run_query(
    client: &ClientWrapper,
    timeout: Duration,
    sql: &str,
    params: &[DatabaseValue],
    cached: bool,
) -> Result<DatabaseResult> {
    bounded(timeout, async {
        let stmt = prepare(client, sql, cached)
            .await
            .map_err(|e| query_error(e, sql, params))?;
        let args: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = args.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = client
            .query(&stmt, &refs)
            .await
            .map_err(|e| query_error(e, sql, params))?;
        Ok(rows.iter().map(row_to_database_row).collect())
    })
    .await
}

async fn run_execute(
    client: &ClientWrapper,
    timeout: Duration,
    sql: &str,
    params: &[DatabaseValue],
    cached: bool,
) -> Result<u64> {
    bounded(timeout, async {
        let stmt = prepare(client, sql, cached)
            .await
            .map_err(|e| query_error(e, sql, params))?;
        let args: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = args.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        client
            .execute(&stmt, &refs)
            .await
            .map_err(|e| query_error(e, sql, params))
    })
    .await
}

async fn run_batch(client: &ClientWrapper, timeout: Duration, sql: &str) -> Result<()> {
    bounded(timeout, async {
        client
            .batch_execute(sql)
            .await
            .map_err(|e| DatabaseError::transaction(format!("{}: {}", sql, e)))
    })
    .await
}

#[async_trait]
impl Executor for PostgresDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let client = self.client().await?;
        run_query(&client, self.operation_timeout, sql, params, false).await
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let client = self.client().await?;
        run_execute(&client, self.operation_timeout, sql, params, false).await
    }

    async fn query_cached(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let client = self.client().await?;
        run_query(&client, self.operation_timeout, sql, params, true).await
    }

    async fn execute_cached(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let client = self.client().await?;
        run_execute(&client, self.operation_timeout, sql, params, true).await
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn begin(&self) -> Result<Arc<dyn Transaction>> {
        let client = self.client().await?;
        run_batch(&client, self.operation_timeout, "BEGIN").await?;
        debug!("postgres transaction started");
        Ok(Arc::new(PostgresTransaction {
            client: Mutex::new(Some(client)),
            operation_timeout: self.operation_timeout,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

/// A transaction pinned to one pooled connection
pub struct PostgresTransaction {
    client: Mutex<Option<Object>>,
    operation_timeout: Duration,
}

fn finished() -> DatabaseError {
    DatabaseError::transaction("Transaction already finished")
}

impl PostgresTransaction {
    async fn finish(&self, sql: &str) -> Result<()> {
        let client = self.client.lock().await.take().ok_or_else(finished)?;
        let result = run_batch(&client, self.operation_timeout, sql).await;
        if result.is_err() {
            // State unknown after a failed COMMIT/ROLLBACK; keep it out of the pool
            drop(Object::take(client));
        }
        result
    }
}

#[async_trait]
impl Executor for PostgresTransaction {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(finished)?;
        run_query(client, self.operation_timeout, sql, params, false).await
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(finished)?;
        run_execute(client, self.operation_timeout, sql, params, false).await
    }

    async fn query_cached(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(finished)?;
        run_query(client, self.operation_timeout, sql, params, true).await
    }

    async fn execute_cached(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(finished)?;
        run_execute(client, self.operation_timeout, sql, params, true).await
    }

    async fn copy_in(&self, table: &str, columns: &[String]) -> Result<Box<dyn CopyInWriter>> {
        let sql = copy_statement(table, columns);
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(finished)?;
        let sink: CopyInSink<Bytes> = bounded(self.operation_timeout, async {
            client
                .copy_in(sql.as_str())
                .await
                .map_err(|e| query_error(e, &sql, &[]))
        })
        .await?;

        Ok(Box::new(PostgresCopyIn {
            sink: Box::pin(sink),
            sql,
            line: String::new(),
        }))
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.get_mut().take() {
            warn!("postgres transaction dropped without commit or rollback; discarding connection");
            drop(Object::take(client));
        }
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
}

/// Append one row in COPY text format: tab separated, `\N` for null,
/// newline terminated
pub fn encode_copy_row(row: &[DatabaseValue], out: &mut String) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        match value {
            DatabaseValue::Null => out.push_str("\\N"),
            DatabaseValue::Bool(v) => out.push(if *v { 't' } else { 'f' }),
            DatabaseValue::Bytes(v) => {
                out.push_str("\\\\x");
                for byte in v {
                    out.push_str(&format!("{:02x}", byte));
                }
            }
            DatabaseValue::Timestamp(v) => out.push_str(&v.to_rfc3339()),
            other => push_escaped(out, &other.to_string()),
        }
    }
    out.push('\n');
}

/// Row writer for an open `COPY ... FROM STDIN`
struct PostgresCopyIn {
    sink: Pin<Box<CopyInSink<Bytes>>>,
    sql: String,
    line: String,
}

#[async_trait]
impl CopyInWriter for PostgresCopyIn {
    async fn write_row(&mut self, row: &[DatabaseValue]) -> Result<()> {
        self.line.clear();
        encode_copy_row(row, &mut self.line);
        let mut buf = BytesMut::with_capacity(self.line.len());
        buf.put_slice(self.line.as_bytes());
        self.sink
            .send(buf.freeze())
            .await
            .map_err(|e| query_error(e, &self.sql, row))
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        let sql = std::mem::take(&mut self.sql);
        self.sink
            .as_mut()
            .finish()
            .await
            .map_err(|e| query_error(e, &sql, &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::new("postgres://localhost/tlv2");
        assert_eq!(config.max_size, 10);
        assert_eq!(config.max_lifetime, Duration::from_secs(3600));
        assert_eq!(config.operation_timeout, DEFAULT_OPERATION_TIMEOUT);

        let config = config
            .with_max_size(4)
            .with_max_lifetime(Duration::from_secs(60))
            .with_wait_timeout(Duration::from_secs(1));
        assert_eq!(config.max_size, 4);
        assert_eq!(config.max_lifetime, Duration::from_secs(60));
        assert_eq!(config.wait_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_pool_config_from_builder() {
        let builder = ConnectionBuilder::new(Dialect::Postgres)
            .host("db")
            .database("tlv2");
        assert_eq!(PoolConfig::from_builder(&builder).unwrap().url, "postgres://db/tlv2");
    }

    #[test]
    fn test_encode_copy_row() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut line = String::new();
        encode_copy_row(
            &[
                DatabaseValue::Long(7),
                DatabaseValue::from("a\tb\\c\nd"),
                DatabaseValue::Null,
                DatabaseValue::Bool(true),
                DatabaseValue::Bytes(vec![0x01, 0xab]),
                DatabaseValue::Timestamp(ts),
            ],
            &mut line,
        );
        assert_eq!(
            line,
            "7\ta\\tb\\\\c\\nd\t\\N\tt\t\\\\x01ab\t2024-03-01T12:00:00+00:00\n"
        );
    }

    fn encode(value: DatabaseValue, ty: &Type) -> std::result::Result<IsNull, String> {
        let mut out = BytesMut::new();
        PgParam(&value).to_sql(ty, &mut out).map_err(|e| e.to_string())
    }

    #[test]
    fn test_param_coercion() {
        assert!(matches!(encode(DatabaseValue::Long(5), &Type::INT4), Ok(IsNull::No)));
        assert!(matches!(encode(DatabaseValue::Int(5), &Type::INT8), Ok(IsNull::No)));
        assert!(matches!(encode(DatabaseValue::Null, &Type::INT4), Ok(IsNull::Yes)));
        assert!(matches!(
            encode(DatabaseValue::from("2024-03-01T12:00:00Z"), &Type::TIMESTAMPTZ),
            Ok(IsNull::No)
        ));
        assert!(encode(DatabaseValue::Long(i64::MAX), &Type::INT4).is_err());
        assert!(encode(DatabaseValue::from("abc"), &Type::INT8).is_err());
        assert!(matches!(
            encode(DatabaseValue::from(r#"{"feed":"f-9q9"}"#), &Type::JSONB),
            Ok(IsNull::No)
        ));
        assert!(encode(DatabaseValue::from("not json"), &Type::JSON).is_err());
    }

    fn get_postgres_url() -> Option<String> {
        std::env::var("POSTGRES_URL").ok()
    }

    #[tokio::test]
    #[ignore] // Run with: POSTGRES_URL=... cargo test -- --ignored
    async fn test_postgres_connect() {
        let url = match get_postgres_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping test: POSTGRES_URL not set");
                return;
            }
        };

        let db = PostgresDatabase::connect(PoolConfig::new(url)).await.unwrap();
        assert!(db.ping().await.is_ok());
        assert!(db.pool_size() >= 1);
        assert!(db.close().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Run with: POSTGRES_URL=... cargo test -- --ignored
    async fn test_postgres_transaction_and_copy() -> Result<()> {
        let url = match get_postgres_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping test: POSTGRES_URL not set");
                return Ok(());
            }
        };

        let db = PostgresDatabase::connect(PoolConfig::new(url)).await?;
        db.execute("DROP TABLE IF EXISTS test_copy_in", &[]).await?;
        db.execute(
            "CREATE TABLE test_copy_in (id SERIAL PRIMARY KEY, name TEXT, seen_at TIMESTAMPTZ)",
            &[],
        )
        .await?;

        let tx = db.begin().await?;
        let mut writer = tx
            .copy_in("test_copy_in", &["name".to_string(), "seen_at".to_string()])
            .await?;
        writer
            .write_row(&[DatabaseValue::from("Alice"), DatabaseValue::Timestamp(Utc::now())])
            .await?;
        writer
            .write_row(&[DatabaseValue::from("Bob"), DatabaseValue::Null])
            .await?;
        assert_eq!(writer.finish().await?, 2);
        tx.commit().await?;
        assert!(tx.commit().await.is_err());

        let tx = db.begin().await?;
        tx.execute("INSERT INTO test_copy_in (name) VALUES ($1)", &["Carol".into()])
            .await?;
        tx.rollback().await?;

        let rows = db
            .query("SELECT name FROM test_copy_in WHERE id > $1 ORDER BY id", &[DatabaseValue::Long(0)])
            .await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&DatabaseValue::from("Alice")));

        db.execute("DROP TABLE test_copy_in", &[]).await?;
        Ok(())
    }
}
