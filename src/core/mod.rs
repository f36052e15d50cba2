//! Core types and traits
//!
//! Record mapping, statement building, the driver traits, transaction
//! scoping and the [`Adapter`] that ties them together. Nothing in here
//! depends on a particular driver.

pub mod adapter;
pub mod database;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod naming;
pub mod persistence;
pub mod query_builder;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use adapter::{Adapter, MIGRATIONS_TABLE};
pub use database::{ConnectionBuilder, CopyInWriter, Database, Executor, Transaction};
pub use dialect::{Dialect, PlaceholderFormat};
pub use entity::{Entity, FieldDef, FieldMap, HasId, Timestamps};
pub use error::{DatabaseError, Result};
pub use mapper::{Capabilities, EntityMapping, MapperCache, ID_COLUMN};
pub use persistence::{batch_size, MAX_BIND_PARAMS};
pub use query_builder::{
    DeleteBuilder, InsertBuilder, Operator, OrderDirection, SelectBuilder, Statement,
    StatementBuilder, UpdateBuilder,
};
pub use transaction::Handle;
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue, FromValue};
