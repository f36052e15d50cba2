//! Per-type column mapping with a process-scoped cache
//!
//! The first time a record type is seen its [`FieldMap`] is collected,
//! column names are derived and the result is stored keyed by [`TypeId`].
//! Entries are never evicted: record types do not change while the process
//! runs. Two callers racing on the first lookup may both build a mapping;
//! the first one stored wins and the other is discarded.

use super::entity::{Entity, FieldDef, FieldMap};
use super::error::{DatabaseError, Result};
use super::naming::{table_name_from_type, to_snake_case};
use super::value::{DatabaseRow, DatabaseValue};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Column used for the auto-generated identifier
pub const ID_COLUMN: &str = "id";

/// Capability classification computed once per record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The type exposes get/set for an integer identifier
    pub has_id: bool,
    /// The type declares its own table name
    pub has_table_name: bool,
    /// The type stamps created/updated times before writes
    pub has_timestamps: bool,
}

/// Derived column layout of one record type
pub struct EntityMapping<E> {
    table: String,
    fields: Vec<FieldDef<E>>,
    columns: Vec<String>,
    by_column: HashMap<String, usize>,
    header: Vec<String>,
    header_fields: Vec<usize>,
    capabilities: Capabilities,
}

impl<E: Entity> EntityMapping<E> {
    fn build(ent: &E) -> Result<Self> {
        let type_name = std::any::type_name::<E>();
        let mut map = FieldMap::new();
        E::describe(&mut map);
        let fields = map.into_fields();
        if fields.is_empty() {
            return Err(DatabaseError::mapping(format!(
                "{} has no persistable fields",
                type_name
            )));
        }

        let capabilities = Capabilities {
            has_id: ent.as_has_id().is_some(),
            has_table_name: E::table_name().is_some(),
            has_timestamps: ent.as_timestamps().is_some(),
        };
        let table = E::table_name()
            .map(str::to_string)
            .unwrap_or_else(|| table_name_from_type(type_name));

        let mut columns = Vec::with_capacity(fields.len());
        let mut by_column = HashMap::with_capacity(fields.len());
        let mut header = Vec::with_capacity(fields.len());
        let mut header_fields = Vec::with_capacity(fields.len());

        for (idx, field) in fields.iter().enumerate() {
            let column = field
                .column
                .map(str::to_string)
                .unwrap_or_else(|| to_snake_case(field.name));
            if by_column.insert(column.clone(), idx).is_some() {
                return Err(DatabaseError::mapping(format!(
                    "{} maps column {} more than once",
                    type_name, column
                )));
            }
            // The store generates the identifier, so it is never written.
            if !(capabilities.has_id && column == ID_COLUMN) {
                header.push(column.clone());
                header_fields.push(idx);
            }
            columns.push(column);
        }

        if header.is_empty() {
            return Err(DatabaseError::mapping(format!(
                "{} has no writable columns",
                type_name
            )));
        }

        Ok(Self {
            table,
            fields,
            columns,
            by_column,
            header,
            header_fields,
            capabilities,
        })
    }

    /// Table the record type is stored in
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Writable columns in stable order
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Every mapped column, including the identifier
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Value tuple aligned with [`header`](Self::header)
    pub fn values(&self, ent: &E) -> Vec<DatabaseValue> {
        self.header_fields
            .iter()
            .map(|&idx| (self.fields[idx].get)(ent))
            .collect()
    }

    /// Value tuple aligned with an arbitrary header
    pub fn values_for(&self, ent: &E, header: &[String]) -> Result<Vec<DatabaseValue>> {
        let values = header
            .iter()
            .map(|column| {
                self.by_column
                    .get(column)
                    .map(|&idx| (self.fields[idx].get)(ent))
                    .ok_or_else(|| {
                        DatabaseError::mapping(format!(
                            "column {} is not mapped on {}",
                            column,
                            std::any::type_name::<E>()
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        if values.len() != header.len() {
            return Err(DatabaseError::mapping(format!(
                "header has {} columns but {} values were extracted",
                header.len(),
                values.len()
            )));
        }
        Ok(values)
    }

    /// Copy matching row cells into the record; unmapped cells are ignored
    pub fn populate(&self, ent: &mut E, row: &DatabaseRow) -> Result<()> {
        for (column, value) in row {
            if let Some(&idx) = self.by_column.get(column) {
                (self.fields[idx].set)(ent, value.clone()).map_err(|e| {
                    DatabaseError::mapping(format!("column {}: {}", column, e))
                })?;
            }
        }
        Ok(())
    }
}

/// Process-scoped cache of [`EntityMapping`]s keyed by record type
#[derive(Default)]
pub struct MapperCache {
    entries: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl MapperCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every adapter that was not given its own
    pub fn global() -> Arc<MapperCache> {
        static GLOBAL: OnceLock<Arc<MapperCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MapperCache::new())))
    }

    /// Mapping for the record's type, derived on first use
    pub fn mapping<E: Entity>(&self, ent: &E) -> Result<Arc<EntityMapping<E>>> {
        let key = TypeId::of::<E>();
        if let Some(entry) = self.entries.read().get(&key) {
            return Self::downcast(Arc::clone(entry));
        }

        let built: Arc<dyn Any + Send + Sync> = Arc::new(EntityMapping::build(ent)?);
        let entry = Arc::clone(self.entries.write().entry(key).or_insert(built));
        Self::downcast(entry)
    }

    fn downcast<E: Entity>(entry: Arc<dyn Any + Send + Sync>) -> Result<Arc<EntityMapping<E>>> {
        entry.downcast::<EntityMapping<E>>().map_err(|_| {
            DatabaseError::mapping(format!(
                "cached mapping for {} has the wrong type",
                std::any::type_name::<E>()
            ))
        })
    }

    /// Ordered writable columns of the record's type
    pub fn header<E: Entity>(&self, ent: &E) -> Result<Vec<String>> {
        Ok(self.mapping(ent)?.header().to_vec())
    }

    /// Values of `ent` in the order of `header`
    pub fn values<E: Entity>(&self, ent: &E, header: &[String]) -> Result<Vec<DatabaseValue>> {
        self.mapping(ent)?.values_for(ent, header)
    }

    /// Number of record types cached so far
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::{HasId, Timestamps};
    use crate::entity_fields;

    #[derive(Default, Clone)]
    struct StopTime {
        id: i64,
        trip_id: String,
        stop_sequence: i32,
        arrival_time: Option<i32>,
    }

    impl HasId for StopTime {
        fn id(&self) -> i64 {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    impl Entity for StopTime {
        fn describe(map: &mut FieldMap<Self>) {
            entity_fields!(map; id, trip_id, stop_sequence, arrival_time => "arrival");
        }
        fn as_has_id(&self) -> Option<&dyn HasId> {
            Some(self)
        }
    }

    struct Empty;

    impl Entity for Empty {
        fn describe(_map: &mut FieldMap<Self>) {}
    }

    struct Duplicate {
        a: i32,
    }

    impl Entity for Duplicate {
        fn describe(map: &mut FieldMap<Self>) {
            entity_fields!(map; a => "x");
            map.column("b", "x", |d| d.a.into(), |_, _| Ok(()));
        }
        fn table_name() -> Option<&'static str> {
            Some("dupes")
        }
    }

    #[test]
    fn test_header_excludes_generated_id() {
        let cache = MapperCache::new();
        let st = StopTime::default();
        let mapping = cache.mapping(&st).unwrap();
        assert_eq!(mapping.table(), "stop_time");
        assert_eq!(mapping.header(), ["trip_id", "stop_sequence", "arrival"]);
        assert_eq!(mapping.columns().len(), 4);
        assert!(mapping.capabilities().has_id);
        assert!(!mapping.capabilities().has_table_name);
        assert!(!mapping.capabilities().has_timestamps);
    }

    #[derive(Default)]
    struct Shape {
        shape_id: String,
        updated: i64,
    }

    impl Timestamps for Shape {
        fn update_timestamps(&mut self) {
            self.updated += 1;
        }
    }

    impl Entity for Shape {
        fn describe(map: &mut FieldMap<Self>) {
            entity_fields!(map; shape_id, updated);
        }
        fn as_timestamps(&self) -> Option<&dyn Timestamps> {
            Some(self)
        }
        fn as_timestamps_mut(&mut self) -> Option<&mut dyn Timestamps> {
            Some(self)
        }
    }

    #[test]
    fn test_capabilities_probe_timestamps() {
        let cache = MapperCache::new();
        let caps = cache.mapping(&Shape::default()).unwrap().capabilities();
        assert_eq!(
            caps,
            Capabilities {
                has_id: false,
                has_table_name: false,
                has_timestamps: true,
            }
        );
    }

    #[test]
    fn test_header_is_cached_once() {
        let cache = MapperCache::new();
        let st = StopTime::default();
        let first = cache.header(&st).unwrap();
        let second = cache.header(&st).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_values_align_with_header() {
        let cache = MapperCache::new();
        let st = StopTime {
            id: 9,
            trip_id: "t1".to_string(),
            stop_sequence: 3,
            arrival_time: None,
        };
        let header = cache.header(&st).unwrap();
        let values = cache.values(&st, &header).unwrap();
        assert_eq!(values.len(), header.len());
        assert_eq!(
            values,
            vec![
                DatabaseValue::from("t1"),
                DatabaseValue::Int(3),
                DatabaseValue::Null
            ]
        );

        let reordered = vec!["arrival".to_string(), "id".to_string()];
        let values = cache.values(&st, &reordered).unwrap();
        assert_eq!(values, vec![DatabaseValue::Null, DatabaseValue::Long(9)]);
    }

    #[test]
    fn test_unknown_header_column_is_mapping_error() {
        let cache = MapperCache::new();
        let st = StopTime::default();
        let err = cache
            .values(&st, &["nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Mapping(_)));
    }

    #[test]
    fn test_populate_from_row() {
        let cache = MapperCache::new();
        let mut st = StopTime::default();
        let mut row = DatabaseRow::new();
        row.insert("id".to_string(), DatabaseValue::Long(4));
        row.insert("trip_id".to_string(), DatabaseValue::from("t2"));
        row.insert("arrival".to_string(), DatabaseValue::Long(3600));
        row.insert("unmapped".to_string(), DatabaseValue::Bool(true));

        cache.mapping(&st).unwrap().populate(&mut st, &row).unwrap();
        assert_eq!(st.id, 4);
        assert_eq!(st.trip_id, "t2");
        assert_eq!(st.arrival_time, Some(3600));
        assert_eq!(st.stop_sequence, 0);
    }

    #[test]
    fn test_populate_type_mismatch() {
        let cache = MapperCache::new();
        let mut st = StopTime::default();
        let mut row = DatabaseRow::new();
        row.insert("stop_sequence".to_string(), DatabaseValue::from("abc"));
        let err = cache
            .mapping(&st)
            .unwrap()
            .populate(&mut st, &row)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Mapping(_)));
    }

    #[test]
    fn test_invalid_types_are_mapping_errors() {
        let cache = MapperCache::new();
        assert!(matches!(
            cache.mapping(&Empty),
            Err(DatabaseError::Mapping(_))
        ));
        assert!(matches!(
            cache.mapping(&Duplicate { a: 1 }),
            Err(DatabaseError::Mapping(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_first_population() {
        let cache = Arc::new(MapperCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.header(&StopTime::default()).unwrap())
            })
            .collect();
        let headers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(headers.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.len(), 1);
    }
}
