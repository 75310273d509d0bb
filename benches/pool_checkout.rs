#![allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]

//! Criterion benchmark for the hot paths of a session: leasing a connection from the pool
//! and running a single-row lookup through the statement cache, compared against plain
//! `rusqlite` with a freshly prepared statement per lookup.

use std::hint::black_box;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sql_session::{Database, LeaseIntent, RowValues};
use tempfile::TempDir;

const ROWS: i64 = 1_000;
const SELECT_BY_ID: &str = "SELECT id, name, score FROM test WHERE id = ?1";

struct Dataset {
    _dir: TempDir,
    path: String,
}

fn dataset() -> Dataset {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("bench.db").to_string_lossy().into_owned();
    let db = Database::builder(path.clone())
        .write_ahead_logging(true)
        .build()
        .expect("open bench database");
    db.execute_batch("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, score REAL)")
        .expect("create table");
    db.transaction(|conn| {
        for id in 1..=ROWS {
            conn.insert(
                "test",
                &[
                    ("id", RowValues::Int(id)),
                    ("name", RowValues::Text(format!("name-{id}"))),
                    ("score", RowValues::Float(id as f64 * 0.5)),
                ],
            )?;
        }
        Ok(())
    })
    .expect("seed rows");
    db.close().expect("close seeding pool");
    Dataset { _dir: dir, path }
}

fn bench_lease(c: &mut Criterion) {
    let data = dataset();
    let db = Database::builder(data.path.clone())
        .write_ahead_logging(true)
        .build()
        .expect("open bench database");

    let mut group = c.benchmark_group("lease");
    group.bench_function("acquire_release_read", |b| {
        b.iter(|| {
            let conn = db.pool().acquire_read().expect("lease");
            black_box(conn.id());
        });
    });
    group.bench_function("acquire_release_write", |b| {
        b.iter(|| {
            let conn = db.pool().acquire_write().expect("lease");
            black_box(conn.id());
        });
    });
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let data = dataset();
    let db = Database::builder(data.path.clone())
        .write_ahead_logging(true)
        .build()
        .expect("open bench database");
    let raw = rusqlite::Connection::open(&data.path).expect("open rusqlite connection");

    let mut group = c.benchmark_group("single_row_lookup");
    group.throughput(Throughput::Elements(1));
    group.bench_function("session_cached_statement", |b| {
        let mut id = 0;
        b.iter(|| {
            id = id % ROWS + 1;
            let rows = db
                .query(SELECT_BY_ID, &[RowValues::Int(id)])
                .expect("lookup");
            black_box(rows.results.len());
        });
    });
    group.bench_function("rusqlite_prepare_each_time", |b| {
        let mut id = 0;
        b.iter(|| {
            id = id % ROWS + 1;
            let mut stmt = raw.prepare(SELECT_BY_ID).expect("prepare");
            let name: String = stmt
                .query_row([id], |row| row.get(1))
                .expect("lookup");
            black_box(name);
        });
    });
    group.finish();
}

fn bench_concurrent_readers(c: &mut Criterion) {
    let data = dataset();
    let mut group = c.benchmark_group("concurrent_readers");
    for readers in [1_usize, 2, 4] {
        let db = Database::builder(data.path.clone())
            .write_ahead_logging(true)
            .max_reader_connections(readers)
            .build()
            .expect("open bench database");
        group.throughput(Throughput::Elements(readers as u64 * 64));
        group.bench_with_input(BenchmarkId::from_parameter(readers), &readers, |b, &readers| {
            b.iter(|| {
                thread::scope(|scope| {
                    for worker in 0..readers {
                        let db = &db;
                        scope.spawn(move || {
                            for n in 0..64_i64 {
                                let id = (worker as i64 * 64 + n) % ROWS + 1;
                                let mut conn = db
                                    .acquire(LeaseIntent::Read, std::time::Duration::from_secs(5))
                                    .expect("lease");
                                black_box(
                                    conn.long_for_query(
                                        "SELECT id FROM test WHERE id = ?1",
                                        &[RowValues::Int(id)],
                                    )
                                    .expect("lookup"),
                                );
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lease, bench_lookup, bench_concurrent_readers);
criterion_main!(benches);
