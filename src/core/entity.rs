//! Record declaration and optional capabilities
//!
//! A record type implements [`Entity`] by describing its persistable fields
//! once; the [`MapperCache`](super::mapper::MapperCache) turns that
//! description into a cached column header. Everything else is opt-in:
//!
//! - [`HasId`]: an auto-generated integer identifier the store assigns on
//!   insert and that find/update/delete key on
//! - [`Timestamps`]: a hook invoked right before every write; implement
//!   both [`Entity::as_timestamps`] and [`Entity::as_timestamps_mut`]
//! - [`Entity::table_name`]: an explicit table name instead of one derived
//!   from the type name
//!
//! # Example
//!
//! ```
//! use rust_dbutil::prelude::*;
//!
//! #[derive(Default)]
//! struct FeedVersion {
//!     id: i64,
//!     sha1: String,
//!     fetched_by: Option<String>,
//! }
//!
//! impl HasId for FeedVersion {
//!     fn id(&self) -> i64 { self.id }
//!     fn set_id(&mut self, id: i64) { self.id = id; }
//! }
//!
//! impl Entity for FeedVersion {
//!     fn describe(map: &mut FieldMap<Self>) {
//!         rust_dbutil::entity_fields!(map; id, sha1, fetched_by => "fetcher");
//!     }
//!     fn as_has_id(&self) -> Option<&dyn HasId> { Some(self) }
//!     fn as_has_id_mut(&mut self) -> Option<&mut dyn HasId> { Some(self) }
//! }
//! ```

use super::error::Result;
use super::value::DatabaseValue;

/// Reads one field out of a record
pub type Getter<E> = fn(&E) -> DatabaseValue;

/// Writes one decoded cell back into a record
pub type Setter<E> = fn(&mut E, DatabaseValue) -> Result<()>;

/// One persistable field of a record type
pub struct FieldDef<E> {
    /// Field name as declared on the type
    pub name: &'static str,
    /// Explicit column name; when absent the column is the snake_case field name
    pub column: Option<&'static str>,
    pub get: Getter<E>,
    pub set: Setter<E>,
}

impl<E> Clone for FieldDef<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            column: self.column,
            get: self.get,
            set: self.set,
        }
    }
}

impl<E> std::fmt::Debug for FieldDef<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("column", &self.column)
            .finish()
    }
}

/// Ordered field list collected by [`Entity::describe`]
pub struct FieldMap<E> {
    fields: Vec<FieldDef<E>>,
}

impl<E> FieldMap<E> {
    pub(crate) fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a field whose column is derived from its name
    pub fn field(&mut self, name: &'static str, get: Getter<E>, set: Setter<E>) -> &mut Self {
        self.add(FieldDef {
            name,
            column: None,
            get,
            set,
        })
    }

    /// Add a field stored under an explicit column name
    pub fn column(
        &mut self,
        name: &'static str,
        column: &'static str,
        get: Getter<E>,
        set: Setter<E>,
    ) -> &mut Self {
        self.add(FieldDef {
            name,
            column: Some(column),
            get,
            set,
        })
    }

    /// Add a prepared field definition
    pub fn add(&mut self, field: FieldDef<E>) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDef<E>] {
        &self.fields
    }

    pub(crate) fn into_fields(self) -> Vec<FieldDef<E>> {
        self.fields
    }
}

/// Auto-incrementing integer identifier
pub trait HasId {
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
}

/// Created/updated stamping, invoked before insert, update and bulk writes
pub trait Timestamps {
    fn update_timestamps(&mut self);
}

/// A record type that maps onto one table row
pub trait Entity: Sized + Send + Sync + 'static {
    /// Describe the persistable fields in a stable order
    fn describe(map: &mut FieldMap<Self>);

    /// Explicit table name; `None` derives it from the type name
    fn table_name() -> Option<&'static str> {
        None
    }

    fn as_has_id(&self) -> Option<&dyn HasId> {
        None
    }

    fn as_has_id_mut(&mut self) -> Option<&mut dyn HasId> {
        None
    }

    fn as_timestamps(&self) -> Option<&dyn Timestamps> {
        None
    }

    fn as_timestamps_mut(&mut self) -> Option<&mut dyn Timestamps> {
        None
    }
}

/// Write the body of [`Entity::describe`] for a list of fields.
///
/// Each field is read with `Clone` + `Into<DatabaseValue>` and written back
/// with [`FromValue`](crate::core::value::FromValue). `field => "column"`
/// overrides the derived column name.
#[macro_export]
macro_rules! entity_fields {
    ($map:ident; $($field:ident $(=> $column:literal)?),* $(,)?) => {
        $(
            $map.add($crate::core::entity::FieldDef {
                name: stringify!($field),
                column: $crate::entity_fields!(@column $($column)?),
                get: |e: &Self| {
                    $crate::core::value::DatabaseValue::from(::std::clone::Clone::clone(&e.$field))
                },
                set: |e: &mut Self, v: $crate::core::value::DatabaseValue| {
                    e.$field = $crate::core::value::FromValue::from_value(v)?;
                    Ok(())
                },
            });
        )*
    };
    (@column) => { None };
    (@column $column:literal) => { Some($column) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Agency {
        agency_name: String,
        agency_url: Option<String>,
    }

    impl Entity for Agency {
        fn describe(map: &mut FieldMap<Self>) {
            entity_fields!(map; agency_name, agency_url => "url");
        }
    }

    #[test]
    fn test_describe_order_and_columns() {
        let mut map = FieldMap::new();
        Agency::describe(&mut map);
        let names: Vec<_> = map.fields().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["agency_name", "agency_url"]);
        assert_eq!(map.fields()[0].column, None);
        assert_eq!(map.fields()[1].column, Some("url"));
    }

    #[test]
    fn test_macro_accessors() {
        let mut map = FieldMap::new();
        Agency::describe(&mut map);
        let mut agency = Agency::default();

        (map.fields()[1].set)(&mut agency, DatabaseValue::from("http://x")).unwrap();
        assert_eq!(agency.agency_url.as_deref(), Some("http://x"));
        assert_eq!(
            (map.fields()[1].get)(&agency),
            DatabaseValue::from("http://x")
        );
        assert_eq!((map.fields()[0].get)(&agency), DatabaseValue::from(""));
    }

    #[test]
    fn test_capabilities_default_absent() {
        let mut agency = Agency::default();
        assert!(agency.as_has_id().is_none());
        assert!(agency.as_timestamps().is_none());
        assert!(agency.as_timestamps_mut().is_none());
        assert_eq!(Agency::table_name(), None);
    }
}
