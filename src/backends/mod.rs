//! Database backend implementations
//!
//! Concrete [`Database`](crate::core::Database) implementations, one per
//! supported driver.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDatabase, SqliteTransaction};

#[cfg(feature = "postgres")]
pub use postgres::{PoolConfig, PostgresDatabase, PostgresTransaction};
