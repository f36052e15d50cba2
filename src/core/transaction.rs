//! Execution handles and transaction scoping
//!
//! A [`Handle`] is either bare (statements go straight to the pool) or
//! scoped to one active transaction. [`Adapter::tx`] only begins a
//! transaction from a bare handle; called on a transaction-scoped adapter
//! it runs the callback in the transaction that is already open, so nested
//! scopes flatten into the outermost one and only that one commits or
//! rolls back.

use super::adapter::Adapter;
use super::database::{CopyInWriter, Database, Transaction};
use super::dialect::Dialect;
use super::error::{DatabaseError, Result};
use super::value::{DatabaseResult, DatabaseValue};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// Where an adapter's statements run
#[derive(Clone)]
pub enum Handle {
    /// Directly against the shared pool
    Bare(Arc<dyn Database>),
    /// Inside one active transaction
    InTransaction(Arc<dyn Transaction>),
}

impl Handle {
    pub fn is_transaction(&self) -> bool {
        matches!(self, Handle::InTransaction(_))
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Handle::Bare(db) => db.dialect(),
            Handle::InTransaction(tx) => tx.dialect(),
        }
    }

    pub(crate) async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        match self {
            Handle::Bare(db) => db.query(sql, params).await,
            Handle::InTransaction(tx) => tx.query(sql, params).await,
        }
    }

    pub(crate) async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        match self {
            Handle::Bare(db) => db.execute(sql, params).await,
            Handle::InTransaction(tx) => tx.execute(sql, params).await,
        }
    }

    pub(crate) async fn query_cached(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        match self {
            Handle::Bare(db) => db.query_cached(sql, params).await,
            Handle::InTransaction(tx) => tx.query_cached(sql, params).await,
        }
    }

    pub(crate) async fn execute_cached(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        match self {
            Handle::Bare(db) => db.execute_cached(sql, params).await,
            Handle::InTransaction(tx) => tx.execute_cached(sql, params).await,
        }
    }

    pub(crate) async fn copy_in(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Box<dyn CopyInWriter>> {
        match self {
            Handle::Bare(db) => db.copy_in(table, columns).await,
            Handle::InTransaction(tx) => tx.copy_in(table, columns).await,
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handle::Bare(db) => write!(f, "Handle::Bare({})", db.dialect()),
            Handle::InTransaction(tx) => write!(f, "Handle::InTransaction({})", tx.dialect()),
        }
    }
}

impl Adapter {
    /// Run `f` inside a transaction.
    ///
    /// From a bare adapter this begins a transaction, hands `f` an adapter
    /// scoped to it, and commits when `f` succeeds or rolls back when it
    /// fails. A failed rollback is returned instead of `f`'s error.
    ///
    /// From an adapter that is already inside a transaction, `f` simply
    /// runs against it: no nested transaction, no commit, no rollback.
    ///
    /// ```ignore
    /// adapter
    ///     .tx(|atx| async move {
    ///         atx.insert_ent(&cancel, &mut agency).await?;
    ///         atx.insert_ent(&cancel, &mut route).await
    ///     })
    ///     .await?;
    /// ```
    pub async fn tx<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Adapter) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let db = match self.handle() {
            Handle::InTransaction(_) => {
                debug!("reusing active transaction");
                return f(self.clone()).await;
            }
            Handle::Bare(db) => Arc::clone(db),
        };

        let tx = db.begin().await?;
        debug!(dialect = %tx.dialect(), "transaction started");

        let scoped = self.scoped(Handle::InTransaction(Arc::clone(&tx)));
        match f(scoped).await {
            Ok(value) => {
                tx.commit().await?;
                debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, cause = %err, "transaction rollback failed");
                    return Err(match rollback_err {
                        DatabaseError::Transaction(_) => rollback_err,
                        other => DatabaseError::transaction(format!("rollback failed: {}", other)),
                    });
                }
                debug!(error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}
