//! Micro-benchmarks for quintet core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- add       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use quintet::cond::{CmpMode, Condition, FilterOp, Scope};
use quintet::db::{Config, Database, OpenMode};
use quintet::fetch::{Fetch, FetchSpec};
use quintet::txn::TxnFlags;
use quintet::value::Value;
use tempfile::TempDir;

const ENTRIES: i32 = 10_000;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn open_fresh(dir: &TempDir) -> Database {
    Database::open(
        dir.path().join("bench.db"),
        Config {
            mode: OpenMode::OpenOrCreate,
            sync_thread: true,
            ..Config::default()
        },
    )
    .expect("open")
}

/// One relation per transaction, the pattern a scanner produces.
fn add_single(db: &Database, i: i32) {
    let val = Value::int(i);
    let mut tx = db.begin(TxnFlags::default()).unwrap();
    tx.add("a", &val, "b", &val, "src").unwrap();
    tx.commit().unwrap();
}

fn del_single(db: &Database, i: i32) {
    let val = Value::int(i);
    let mut tx = db.begin(TxnFlags::default()).unwrap();
    tx.del("a", &val, "b", &val, "src").unwrap();
    tx.commit().unwrap();
}

// ------------------------------------------------------------------------------------------------
// Write benchmarks
// ------------------------------------------------------------------------------------------------

/// Single-op transactions, forward and reverse insertion order — the
/// reverse pass lands every bucket insertion at the front of its index.
fn bench_add_del(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_del");
    group.sample_size(10);

    group.bench_function("single_op_txns", |b| {
        b.iter_batched(
            || TempDir::new().unwrap(),
            |dir| {
                let db = open_fresh(&dir);
                for i in 0..ENTRIES {
                    add_single(&db, i);
                }
                for i in 0..ENTRIES {
                    del_single(&db, i);
                }
                db.close().unwrap();
            },
            BatchSize::PerIteration,
        );
    });

    group.bench_function("batched_txn", |b| {
        b.iter_batched(
            || TempDir::new().unwrap(),
            |dir| {
                let db = open_fresh(&dir);
                let mut tx = db.begin(TxnFlags::default()).unwrap();
                for i in 0..ENTRIES {
                    let val = Value::int(i);
                    tx.add("a", &val, "b", &val, "src").unwrap();
                }
                tx.commit().unwrap();
                let mut tx = db.begin(TxnFlags::default()).unwrap();
                for i in 0..ENTRIES {
                    let val = Value::int(i);
                    tx.del("a", &val, "b", &val, "src").unwrap();
                }
                tx.commit().unwrap();
                db.close().unwrap();
            },
            BatchSize::PerIteration,
        );
    });

    group.bench_function("reverse_order", |b| {
        b.iter_batched(
            || TempDir::new().unwrap(),
            |dir| {
                let db = open_fresh(&dir);
                for i in (1..=ENTRIES).rev() {
                    add_single(&db, i);
                }
                for i in (1..=ENTRIES).rev() {
                    del_single(&db, i);
                }
                db.close().unwrap();
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

// ------------------------------------------------------------------------------------------------
// Read benchmarks
// ------------------------------------------------------------------------------------------------

fn bench_query(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);
    let mut tx = db.begin(TxnFlags::default()).unwrap();
    for i in 0..ENTRIES {
        tx.add(
            "entry",
            &Value::int(i),
            "property",
            &Value::str(format!("p{}", i % 97)),
            "src",
        )
        .unwrap();
    }
    tx.commit().unwrap();

    let mut spec = FetchSpec::new();
    spec.add(Some("property"), None, Fetch::ALL);

    let mut group = c.benchmark_group("query");

    group.bench_function("point_equality", |b| {
        let cond = Condition::filter(
            FilterOp::Equal,
            "entry",
            Some(Value::int(ENTRIES / 2)),
            None,
            CmpMode::Binary,
            Scope::Entry,
        );
        b.iter(|| {
            let tx = db.begin(TxnFlags::read_only()).unwrap();
            black_box(tx.query(&spec, &cond).unwrap())
        });
    });

    group.bench_function("range_scan", |b| {
        let cond = Condition::filter(
            FilterOp::Greater,
            "entry",
            Some(Value::int(ENTRIES - 100)),
            None,
            CmpMode::Binary,
            Scope::Entry,
        );
        b.iter(|| {
            let tx = db.begin(TxnFlags::read_only()).unwrap();
            black_box(tx.query(&spec, &cond).unwrap())
        });
    });

    group.bench_function("glob_match", |b| {
        let cond = Condition::filter(
            FilterOp::Match,
            "property",
            Some(Value::str("p1*")),
            None,
            CmpMode::Binary,
            Scope::Any,
        );
        b.iter(|| {
            let tx = db.begin(TxnFlags::read_only()).unwrap();
            black_box(tx.query(&spec, &cond).unwrap())
        });
    });

    group.finish();
    db.close().unwrap();
}

// ------------------------------------------------------------------------------------------------
// Open / recovery benchmarks
// ------------------------------------------------------------------------------------------------

fn bench_open(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.db");
    {
        let db = Database::open(
            &path,
            Config {
                mode: OpenMode::CreateNew,
                ..Config::default()
            },
        )
        .unwrap();
        let mut tx = db.begin(TxnFlags::default()).unwrap();
        for i in 0..ENTRIES {
            let val = Value::int(i);
            tx.add("a", &val, "b", &val, "src").unwrap();
        }
        tx.commit().unwrap();
        db.close().unwrap();
    }

    c.bench_function("open_snapshotted", |b| {
        b.iter(|| {
            let db = Database::open(
                &path,
                Config {
                    mode: OpenMode::OpenExisting,
                    sync_thread: false,
                    read_only: true,
                    ..Config::default()
                },
            )
            .unwrap();
            black_box(db.relation_count())
        });
    });
}

criterion_group!(benches, bench_add_del, bench_query, bench_open);
criterion_main!(benches);
