//! The uniform database adapter
//!
//! [`Adapter`] wraps a [`Handle`] and the shared [`MapperCache`]. It renders
//! builders for the handle's dialect, runs them with cancellation and
//! query logging, and hosts the entity operations in
//! [`persistence`](super::persistence).

use super::database::Database;
use super::dialect::{Dialect, PlaceholderFormat};
use super::entity::Entity;
use super::error::{DatabaseError, Result};
use super::mapper::MapperCache;
use super::query_builder::{
    DeleteBuilder, InsertBuilder, SelectBuilder, Statement, StatementBuilder, UpdateBuilder,
};
use super::transaction::Handle;
use super::value::{DatabaseResult, DatabaseRow, DatabaseValue};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Table whose presence shows the schema is managed by migrations
pub const MIGRATIONS_TABLE: &str = "schema_migrations";

/// Entity-oriented access to one database
#[derive(Clone)]
pub struct Adapter {
    handle: Handle,
    mapper: Arc<MapperCache>,
}

impl Adapter {
    /// Wrap a connected database using the process-wide mapper cache
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self::with_mapper(db, MapperCache::global())
    }

    /// Wrap a connected database with a dedicated mapper cache
    pub fn with_mapper(db: Arc<dyn Database>, mapper: Arc<MapperCache>) -> Self {
        Self {
            handle: Handle::Bare(db),
            mapper,
        }
    }

    /// Open a pooled Postgres adapter and verify the connection
    #[cfg(feature = "postgres")]
    pub async fn postgres(config: crate::backends::postgres::PoolConfig) -> Result<Self> {
        let db = crate::backends::postgres::PostgresDatabase::connect(config).await?;
        Ok(Self::new(Arc::new(db)))
    }

    /// Open a SQLite adapter; `":memory:"` gives a private in-memory database
    #[cfg(feature = "sqlite")]
    pub async fn sqlite(path: &str) -> Result<Self> {
        let db = crate::backends::sqlite::SqliteDatabase::open(path).await?;
        Ok(Self::new(Arc::new(db)))
    }

    pub(crate) fn scoped(&self, handle: Handle) -> Self {
        Self {
            handle,
            mapper: Arc::clone(&self.mapper),
        }
    }

    /// The handle statements run on
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn mapper(&self) -> &Arc<MapperCache> {
        &self.mapper
    }

    pub fn dialect(&self) -> Dialect {
        self.handle.dialect()
    }

    pub fn in_transaction(&self) -> bool {
        self.handle.is_transaction()
    }

    /// Statement builder root using this handle's placeholder syntax
    pub fn sqrl(&self) -> StatementBuilder {
        StatementBuilder::new(self.dialect().placeholder_format())
    }

    /// Close the underlying pool; a transaction-scoped adapter leaves the
    /// pool to its owner
    pub async fn close(&self) -> Result<()> {
        match &self.handle {
            Handle::Bare(db) => db.close().await,
            Handle::InTransaction(_) => Ok(()),
        }
    }

    /// Confirm the schema exists. Schema is owned by external migrations,
    /// so this only checks and never creates anything.
    pub async fn create(&self, cancel: &CancellationToken) -> Result<()> {
        let sql = format!("SELECT * FROM {} LIMIT 0", MIGRATIONS_TABLE);
        match self.query_sql(cancel, &sql, &[]).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_canceled() => Err(err),
            Err(_) => Err(DatabaseError::configuration(
                "please run migrations manually",
            )),
        }
    }

    /// Whether `table` exists in the default schema
    pub async fn table_exists(&self, cancel: &CancellationToken, table: &str) -> Result<bool> {
        let rows = self
            .query_sql(cancel, self.dialect().table_exists_sql(), &[table.into()])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("found"))
            .and_then(DatabaseValue::as_bool)
            .unwrap_or(false))
    }

    /// Run raw SQL written with `?` placeholders and return its rows
    pub async fn query_sql(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let sql = self.dialect().rebind(sql);
        self.observe(cancel, &sql, args, self.handle.query(&sql, args))
            .await
    }

    /// Run raw SQL written with `?` placeholders and return the affected rows
    pub async fn execute_sql(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[DatabaseValue],
    ) -> Result<u64> {
        let sql = self.dialect().rebind(sql);
        self.observe(cancel, &sql, args, self.handle.execute(&sql, args))
            .await
    }

    /// Run a SELECT and map every row into a new record
    pub async fn select<E: Entity + Default>(
        &self,
        cancel: &CancellationToken,
        q: SelectBuilder,
    ) -> Result<Vec<E>> {
        let rows = self.run_query(cancel, &q).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut ent = E::default();
            self.mapper.mapping(&ent)?.populate(&mut ent, row)?;
            out.push(ent);
        }
        Ok(out)
    }

    /// Run a SELECT and return the raw rows
    pub async fn select_rows(
        &self,
        cancel: &CancellationToken,
        q: SelectBuilder,
    ) -> Result<DatabaseResult> {
        self.run_query(cancel, &q).await
    }

    /// Run a SELECT expected to match one row and load it into `dest`
    pub async fn get<E: Entity>(
        &self,
        cancel: &CancellationToken,
        q: SelectBuilder,
        dest: &mut E,
    ) -> Result<()> {
        let mapping = self.mapper.mapping(dest)?;
        let row = self.fetch_one(cancel, &q, mapping.table()).await?;
        mapping.populate(dest, &row)
    }

    /// Run an INSERT; returns the first returned value when the builder
    /// asked for one, otherwise 0
    pub async fn insert(&self, cancel: &CancellationToken, q: InsertBuilder) -> Result<i64> {
        if !q.has_returning() {
            self.run_execute(cancel, &q).await?;
            return Ok(0);
        }
        let rows = self.run_query(cancel, &q).await?;
        match rows.first() {
            Some(row) => returned_id(row),
            None => Ok(0),
        }
    }

    /// Run an UPDATE; returns the affected-row count
    pub async fn update(&self, cancel: &CancellationToken, q: UpdateBuilder) -> Result<u64> {
        self.run_execute(cancel, &q).await
    }

    /// Run a DELETE; returns the affected-row count
    pub async fn delete(&self, cancel: &CancellationToken, q: DeleteBuilder) -> Result<u64> {
        self.run_execute(cancel, &q).await
    }

    async fn fetch_one(
        &self,
        cancel: &CancellationToken,
        q: &SelectBuilder,
        table: &str,
    ) -> Result<DatabaseRow> {
        self.run_query(cancel, q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::not_found(table))
    }

    /// Render `q`, rebinding generic placeholders for this handle's dialect
    fn render(&self, q: &dyn Statement) -> Result<(String, Vec<DatabaseValue>)> {
        let (sql, args) = q.to_sql()?;
        match q.rendered_format() {
            PlaceholderFormat::Question => Ok((self.dialect().rebind(&sql), args)),
            PlaceholderFormat::Dollar => Ok((sql, args)),
        }
    }

    pub(crate) async fn run_query(
        &self,
        cancel: &CancellationToken,
        q: &dyn Statement,
    ) -> Result<DatabaseResult> {
        let (sql, args) = self.render(q)?;
        self.observe(cancel, &sql, &args, self.handle.query(&sql, &args))
            .await
    }

    pub(crate) async fn run_execute(&self, cancel: &CancellationToken, q: &dyn Statement) -> Result<u64> {
        let (sql, args) = self.render(q)?;
        self.observe(cancel, &sql, &args, self.handle.execute(&sql, &args))
            .await
    }

    /// [`run_query`](Adapter::run_query) for the fixed-shape single-record
    /// statements, which the backend may keep prepared
    pub(crate) async fn run_query_cached(
        &self,
        cancel: &CancellationToken,
        q: &dyn Statement,
    ) -> Result<DatabaseResult> {
        let (sql, args) = self.render(q)?;
        self.observe(cancel, &sql, &args, self.handle.query_cached(&sql, &args))
            .await
    }

    pub(crate) async fn run_execute_cached(
        &self,
        cancel: &CancellationToken,
        q: &dyn Statement,
    ) -> Result<u64> {
        let (sql, args) = self.render(q)?;
        self.observe(cancel, &sql, &args, self.handle.execute_cached(&sql, &args))
            .await
    }

    /// Run `fut` unless `cancel` fires first, logging the outcome.
    ///
    /// Failures after cancellation are logged at trace level; genuine
    /// failures at error level. Both are returned.
    pub(crate) async fn observe<T, F>(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[DatabaseValue],
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        if cancel.is_cancelled() {
            trace!(query = %sql, args = ?args, "query canceled before start");
            return Err(DatabaseError::canceled(sql, args));
        }

        trace!(query = %sql, args = ?args, "query");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DatabaseError::canceled(sql, args)),
            result = fut => result,
        };

        if let Err(err) = &result {
            if cancel.is_cancelled() {
                trace!(error = %err, query = %sql, args = ?args, "query canceled");
            } else {
                error!(error = %err, query = %sql, args = ?args, "query failed");
            }
        }
        result
    }
}

/// Read the generated identifier out of a `RETURNING "id"` row
pub(crate) fn returned_id(row: &DatabaseRow) -> Result<i64> {
    let value = row
        .get(super::mapper::ID_COLUMN)
        .or_else(|| row.values().next())
        .ok_or_else(|| DatabaseError::mapping("insert returned no identifier"))?;
    value
        .as_long()
        .ok_or_else(|| DatabaseError::type_mismatch("integer identifier", value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returned_id() {
        let mut row = DatabaseRow::new();
        row.insert("id".to_string(), DatabaseValue::Int(12));
        assert_eq!(returned_id(&row).unwrap(), 12);

        let mut row = DatabaseRow::new();
        row.insert("id".to_string(), DatabaseValue::from("x"));
        assert!(matches!(
            returned_id(&row),
            Err(DatabaseError::TypeMismatch { .. })
        ));

        assert!(matches!(
            returned_id(&DatabaseRow::new()),
            Err(DatabaseError::Mapping(_))
        ));
    }
}
