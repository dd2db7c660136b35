use tempfile::TempDir;

use super::helpers::{add_one, db_path, properties_of, quiet};
use crate::db::{Config, Database, DbError, OpenMode};
use crate::txn::TxnFlags;
use crate::value::Value;

#[test]
fn open_existing_fails_on_a_missing_database() {
    let tmp = TempDir::new().unwrap();
    let err = Database::open(db_path(tmp.path()), quiet(OpenMode::OpenExisting)).unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[test]
fn create_new_fails_on_an_existing_database() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(tmp.path());
    let db = Database::open(&path, quiet(OpenMode::CreateNew)).unwrap();
    db.close().unwrap();

    let err = Database::open(&path, quiet(OpenMode::CreateNew)).unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists));
}

#[test]
fn create_then_reopen_with_open_existing() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(tmp.path());
    let db = Database::open(&path, quiet(OpenMode::CreateNew)).unwrap();
    add_one(&db, "a", "b", "src_a");
    add_one(&db, "a", "c", "src_a");
    db.close().unwrap();

    let db = Database::open(&path, quiet(OpenMode::OpenExisting)).unwrap();
    let mut props = properties_of(&db, "a");
    props.sort();
    assert_eq!(props, vec![
        ("b".to_string(), "src_a".to_string()),
        ("c".to_string(), "src_a".to_string()),
    ]);
    db.close().unwrap();
}

#[test]
fn a_fresh_database_is_visible_before_any_sync() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(tmp.path());
    // No close, no sync: the initial empty snapshot alone must satisfy a
    // later OpenExisting.
    let db = Database::open(&path, quiet(OpenMode::CreateNew)).unwrap();
    drop(db);
    let db = Database::open(&path, quiet(OpenMode::OpenExisting)).unwrap();
    assert_eq!(db.relation_count(), 0);
}

#[test]
fn read_only_handles_reject_writes() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(tmp.path());
    let db = Database::open(&path, quiet(OpenMode::CreateNew)).unwrap();
    add_one(&db, "a", "b", "s");
    db.close().unwrap();

    let config = Config {
        read_only: true,
        ..quiet(OpenMode::OpenExisting)
    };
    let db = Database::open(&path, config).unwrap();
    let mut tx = db.begin(TxnFlags::default()).unwrap();
    let err = tx
        .add("entry", &Value::str("x"), "property", &Value::str("y"), "s")
        .unwrap_err();
    assert!(matches!(err, DbError::ReadOnly));
    drop(tx);
    assert_eq!(properties_of(&db, "a").len(), 1);
}

#[test]
fn verify_passes_on_a_healthy_database() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(tmp.path());
    let db = Database::open(&path, quiet(OpenMode::CreateNew)).unwrap();
    for i in 0..10 {
        add_one(&db, "a", &format!("p{i}"), "s");
    }
    db.close().unwrap();

    let config = Config {
        verify: true,
        ..quiet(OpenMode::OpenExisting)
    };
    let db = Database::open(&path, config).unwrap();
    db.verify().unwrap();
}

#[test]
fn memory_databases_touch_no_files() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(db_path(tmp.path()), quiet(OpenMode::Memory)).unwrap();
    add_one(&db, "a", "b", "s");
    assert_eq!(db.relation_count(), 1);
    db.close().unwrap();
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn the_log_file_sits_next_to_the_snapshot() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(tmp.path());
    let db = Database::open(&path, quiet(OpenMode::CreateNew)).unwrap();
    db.close().unwrap();

    assert!(path.exists());
    let mut log = path.as_os_str().to_os_string();
    log.push(".log");
    assert!(std::path::PathBuf::from(log).exists());
}
