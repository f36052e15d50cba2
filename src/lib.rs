//! # rust_dbutil
//!
//! A small data-access layer for record-oriented databases. Record types
//! describe their persistable fields once; the crate derives their column
//! headers, renders SQL for the target dialect and runs it with
//! cancellation, logging and transaction scoping.
//!
//! ## Features
//!
//! - **Record mapping**: a per-type column header computed once and cached
//!   for the life of the process
//! - **Optional capabilities**: generated integer ids, pre-write timestamp
//!   hooks and explicit table names, each opt-in per type
//! - **Statement builders**: select/insert/update/delete builders rendered
//!   with `?` placeholders and rebound per dialect
//! - **Bulk inserts**: chunked multi-row `INSERT ... RETURNING` and
//!   PostgreSQL `COPY FROM STDIN`
//! - **Transactions**: a closure-scoped coordinator where nested scopes
//!   flatten into the outermost one
//! - **Cancellation**: every I/O call takes a `CancellationToken`
//!
//! ## Supported Databases
//!
//! | Database | Feature | Notes |
//! |----------|---------|-------|
//! | PostgreSQL | `postgres` | deadpool-postgres pool, COPY bulk load |
//! | SQLite | `sqlite` | single bundled connection, no bulk load |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_dbutil::prelude::*;
//!
//! #[derive(Default)]
//! struct Stop {
//!     id: i64,
//!     stop_name: String,
//! }
//!
//! impl HasId for Stop {
//!     fn id(&self) -> i64 { self.id }
//!     fn set_id(&mut self, id: i64) { self.id = id; }
//! }
//!
//! impl Entity for Stop {
//!     fn describe(map: &mut FieldMap<Self>) {
//!         rust_dbutil::entity_fields!(map; id, stop_name);
//!     }
//!     fn as_has_id(&self) -> Option<&dyn HasId> { Some(self) }
//!     fn as_has_id_mut(&mut self) -> Option<&mut dyn HasId> { Some(self) }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let adapter = Adapter::sqlite(":memory:").await?;
//!     let cancel = CancellationToken::new();
//!     adapter
//!         .execute_sql(&cancel, "CREATE TABLE stop (id INTEGER PRIMARY KEY, stop_name TEXT)", &[])
//!         .await?;
//!
//!     let mut stop = Stop { stop_name: "Main St".into(), ..Default::default() };
//!     let id = adapter.insert_ent(&cancel, &mut stop).await?;
//!
//!     let mut found = Stop { id, ..Default::default() };
//!     adapter.find_ent(&cancel, &mut found).await?;
//!     assert_eq!(found.stop_name, "Main St");
//!     Ok(())
//! }
//! ```
//!
//! ### Working with Transactions
//!
//! ```rust,no_run
//! use rust_dbutil::prelude::*;
//!
//! # async fn run(adapter: Adapter, cancel: CancellationToken) -> Result<()> {
//! adapter
//!     .tx(|atx| async move {
//!         atx.execute_sql(&cancel, "UPDATE stop SET stop_name = ? WHERE id = ?", &["A".into(), 1.into()])
//!             .await?;
//!         atx.execute_sql(&cancel, "DELETE FROM stop WHERE id = ?", &[2.into()])
//!             .await?;
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Core types and traits
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::core::{
        Adapter, ConnectionBuilder, Database, DatabaseError, DatabaseResult, DatabaseRow,
        DatabaseValue, Dialect, Entity, FieldMap, FromValue, HasId, OrderDirection, Result,
        StatementBuilder, Timestamps, Transaction,
    };
    pub use tokio_util::sync::CancellationToken;

    #[cfg(feature = "postgres")]
    pub use crate::backends::{PoolConfig, PostgresDatabase};
    #[cfg(feature = "sqlite")]
    pub use crate::backends::SqliteDatabase;
}

// Re-export at root level for convenience
pub use core::{
    Adapter, ConnectionBuilder, Database, DatabaseError, DatabaseResult, DatabaseRow,
    DatabaseValue, Dialect, Entity, FieldMap, FromValue, HasId, Result, Timestamps,
};

#[cfg(feature = "postgres")]
pub use backends::{PoolConfig, PostgresDatabase};
#[cfg(feature = "sqlite")]
pub use backends::SqliteDatabase;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        use prelude::*;

        let dialect = Dialect::Postgres;
        assert_eq!(dialect.to_str(), "postgres");
        let sql = StatementBuilder::new(dialect.placeholder_format())
            .select("stops")
            .where_eq("id", 1)
            .build();
        assert_eq!(sql, "SELECT * FROM stops WHERE id = $1");
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn test_value_conversions() {
        use prelude::*;

        let val: DatabaseValue = 42.into();
        assert_eq!(val.as_int(), Some(42));

        let val: DatabaseValue = "test".into();
        assert_eq!(val.as_str(), Some("test"));

        let val: DatabaseValue = true.into();
        assert_eq!(val.as_bool(), Some(true));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_blocking_sqlite_adapter() {
        use prelude::*;

        tokio_test::block_on(async {
            let db = Adapter::sqlite(":memory:").await.unwrap();
            let cancel = CancellationToken::new();
            assert_eq!(db.dialect(), Dialect::Sqlite);
            assert!(!db.table_exists(&cancel, "stops").await.unwrap());
            db.close().await.unwrap();
        });
    }
}
