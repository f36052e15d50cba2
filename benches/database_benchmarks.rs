//! Criterion benchmarks for rust_dbutil

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_dbutil::core::dialect::PlaceholderFormat;
use rust_dbutil::core::query_builder::Statement;
use rust_dbutil::core::MapperCache;
use rust_dbutil::prelude::*;

#[derive(Debug, Default, Clone)]
struct StopTime {
    id: i64,
    trip_id: String,
    stop_id: String,
    stop_sequence: i32,
    arrival_time: Option<i32>,
    departure_time: Option<i32>,
    shape_dist_traveled: Option<f64>,
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
        rust_dbutil::entity_fields!(map;
            id, trip_id, stop_id, stop_sequence, arrival_time, departure_time, shape_dist_traveled);
    }
    fn table_name() -> Option<&'static str> {
        Some("gtfs_stop_times")
    }
    fn as_has_id(&self) -> Option<&dyn HasId> {
        Some(self)
    }
    fn as_has_id_mut(&mut self) -> Option<&mut dyn HasId> {
        Some(self)
    }
}

fn stop_time(i: usize) -> StopTime {
    StopTime {
        id: 0,
        trip_id: format!("trip-{}", i / 20),
        stop_id: format!("stop-{}", i),
        stop_sequence: (i % 20) as i32,
        arrival_time: Some(28_800 + i as i32 * 60),
        departure_time: Some(28_830 + i as i32 * 60),
        shape_dist_traveled: None,
    }
}

// ============================================================================
// Mapper Benchmarks
// ============================================================================

fn bench_mapper(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapper");
    let cache = MapperCache::new();
    let ent = stop_time(1);
    let _ = cache.mapping(&ent);

    group.bench_function("cached_header", |b| {
        b.iter(|| black_box(cache.header(black_box(&ent))))
    });

    group.bench_function("cold_header", |b| {
        b.iter(|| {
            let cold = MapperCache::new();
            black_box(cold.header(black_box(&ent)))
        })
    });

    let mapping = cache.mapping(&ent).unwrap();
    group.bench_function("values", |b| b.iter(|| black_box(mapping.values(black_box(&ent)))));

    let mut row = DatabaseRow::new();
    row.insert("id".to_string(), DatabaseValue::Long(42));
    row.insert("trip_id".to_string(), DatabaseValue::from("trip-1"));
    row.insert("stop_id".to_string(), DatabaseValue::from("stop-1"));
    row.insert("stop_sequence".to_string(), DatabaseValue::Long(3));
    row.insert("arrival_time".to_string(), DatabaseValue::Long(28_800));
    row.insert("departure_time".to_string(), DatabaseValue::Null);
    group.bench_function("populate", |b| {
        b.iter(|| {
            let mut dest = StopTime::default();
            mapping.populate(&mut dest, black_box(&row)).unwrap();
            black_box(dest)
        })
    });

    group.finish();
}

// ============================================================================
// Statement Rendering Benchmarks
// ============================================================================

fn bench_multi_row_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_row_insert");
    let cache = MapperCache::new();
    let mapping = cache.mapping(&stop_time(0)).unwrap();

    for rows in [10usize, 100, 1000].iter() {
        let ents: Vec<StopTime> = (0..*rows).map(stop_time).collect();
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| {
                let mut q = StatementBuilder::new(PlaceholderFormat::Dollar)
                    .insert(mapping.table())
                    .columns(mapping.header())
                    .returning("id");
                for ent in &ents {
                    q = q.values(mapping.values(ent));
                }
                black_box(q.to_sql().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_rebind(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebind");

    for placeholders in [1usize, 16, 256].iter() {
        let sql = format!(
            "SELECT * FROM gtfs_stops WHERE stop_name = 'what?' AND id IN ({})",
            vec!["?"; *placeholders].join(", ")
        );
        group.bench_with_input(
            BenchmarkId::from_parameter(placeholders),
            &sql,
            |b, sql| b.iter(|| black_box(Dialect::Postgres.rebind(black_box(sql)))),
        );
    }

    group.finish();
}

// ============================================================================
// Row Serialization Benchmarks
// ============================================================================

fn bench_json_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_serialization");

    let mut row = DatabaseRow::new();
    row.insert("id".to_string(), DatabaseValue::Long(1));
    row.insert("stop_name".to_string(), DatabaseValue::from("Main St"));
    row.insert("stop_lat".to_string(), DatabaseValue::Double(37.77));
    row.insert("parent_station".to_string(), DatabaseValue::Null);

    group.bench_function("serialize_row", |b| {
        b.iter(|| black_box(serde_json::to_string(black_box(&row)).unwrap()))
    });

    let json = serde_json::to_string(&row).unwrap();
    group.bench_function("deserialize_row", |b| {
        b.iter(|| black_box(serde_json::from_str::<DatabaseRow>(black_box(&json)).unwrap()))
    });

    group.finish();
}

#[cfg(feature = "postgres")]
fn bench_copy_encoding(c: &mut Criterion) {
    use rust_dbutil::backends::postgres::encode_copy_row;

    let cache = MapperCache::new();
    let ent = stop_time(7);
    let values = cache.mapping(&ent).unwrap().values(&ent);
    let mut line = String::new();

    c.bench_function("copy_encode_row", |b| {
        b.iter(|| {
            line.clear();
            encode_copy_row(black_box(&values), &mut line);
            black_box(line.len())
        })
    });
}

#[cfg(not(feature = "postgres"))]
fn bench_copy_encoding(_: &mut Criterion) {}

criterion_group!(
    benches,
    bench_mapper,
    bench_multi_row_insert,
    bench_rebind,
    bench_json_serialization,
    bench_copy_encoding
);

criterion_main!(benches);
