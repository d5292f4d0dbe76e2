//! Concurrency: parallel writers over one table must serialize into a
//! consistent index, and readers must never observe a torn row.

use mindb::{Column, DataType, Database, Row, StoreOptions, TableSchema, Value};
use tempfile::tempdir;

fn users_schema() -> TableSchema {
    TableSchema::new(
        vec![
            Column::new("id", DataType::I64),
            Column::new("name", DataType::Text),
        ],
        "id",
    )
    .unwrap()
}

fn user(id: i64) -> Row {
    vec![
        Some(Value::I64(id)),
        Some(Value::Text(format!("user-{:04}", id))),
    ]
}

#[test]
fn ten_threads_insert_disjoint_keys() {
    let dir = tempdir().unwrap();
    let db = Database::open(StoreOptions::new(dir.path().join("app"))).unwrap();
    let table = db.create_table("users", users_schema()).unwrap();

    std::thread::scope(|scope| {
        for thread in 0..10i64 {
            let db = &db;
            scope.spawn(move || {
                for i in 0..100i64 {
                    let id = thread * 100 + i + 1;
                    db.insert("users", &user(id)).unwrap();
                }
            });
        }
    });

    let rows = table.scan().unwrap();
    assert_eq!(rows.len(), 1000);

    let keys: Vec<i64> = rows
        .iter()
        .map(|(k, _)| match k {
            Value::I64(v) => *v,
            other => panic!("unexpected key {:?}", other),
        })
        .collect();

    // Strictly increasing: in order and duplicate-free in one check.
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(keys[0], 1);
    assert_eq!(keys[999], 1000);
}

#[test]
fn readers_never_observe_torn_rows_under_mixed_load() {
    let dir = tempdir().unwrap();
    let db = Database::open(StoreOptions::new(dir.path().join("app"))).unwrap();
    let table = db.create_table("users", users_schema()).unwrap();

    std::thread::scope(|scope| {
        for thread in 0..4i64 {
            let db = &db;
            scope.spawn(move || {
                for i in 0..200i64 {
                    let id = thread * 200 + i + 1;
                    db.insert("users", &user(id)).unwrap();
                }
            });
        }

        for _ in 0..4 {
            let db = &db;
            let table = &table;
            scope.spawn(move || {
                for probe in 1..=200i64 {
                    if let Some(row) = db.select_by_key("users", &Value::I64(probe)).unwrap() {
                        // A visible row is always complete and self-consistent.
                        match (&row[0], &row[1]) {
                            (Some(Value::I64(id)), Some(Value::Text(name))) => {
                                assert_eq!(*id, probe);
                                assert_eq!(name, &format!("user-{:04}", probe));
                            }
                            other => panic!("torn row observed: {:?}", other),
                        }
                    }

                    // Scans see a consistent snapshot: sorted, never torn.
                    let rows = table.scan().unwrap();
                    assert!(rows
                        .windows(2)
                        .all(|w| matches!((&w[0].0, &w[1].0), (Value::I64(a), Value::I64(b)) if a < b)));
                }
            });
        }
    });

    assert_eq!(table.row_count(), 800);
}

#[test]
fn concurrent_committed_inserts_all_survive_recovery() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app");

    {
        let db = Database::open(StoreOptions::new(&path)).unwrap();
        db.create_table("users", users_schema()).unwrap();

        std::thread::scope(|scope| {
            for thread in 0..8i64 {
                let db = &db;
                scope.spawn(move || {
                    for i in 0..25i64 {
                        db.insert("users", &user(thread * 25 + i + 1)).unwrap();
                    }
                });
            }
        });
    }

    let db = Database::open(StoreOptions::new(&path)).unwrap();
    let table = db.create_table("users", users_schema()).unwrap();
    let info = db.recover().unwrap();

    assert_eq!(info.records_replayed, 200);
    assert_eq!(table.row_count(), 200);
}
