use std::path::Path;

use crate::cond::{CmpMode, Condition, FilterOp, Scope};
use crate::db::{Config, Database};
use crate::fetch::{Fetch, FetchSpec};
use crate::txn::TxnFlags;
use crate::value::Value;

/// A config without the background thread, so tests control exactly when
/// sync passes happen.
pub(crate) fn quiet(mode: crate::db::OpenMode) -> Config {
    Config {
        mode,
        sync_thread: false,
        ..Config::default()
    }
}

pub(crate) fn add_one(db: &Database, name: &str, prop: &str, src: &str) {
    let mut tx = db.begin(TxnFlags::default()).unwrap();
    tx.add(
        "entry",
        &Value::str(name),
        "property",
        &Value::str(prop),
        src,
    )
    .unwrap();
    tx.commit().unwrap();
}

/// Fetches every property of the named entry as `(value, src)` pairs.
pub(crate) fn properties_of(db: &Database, name: &str) -> Vec<(String, String)> {
    let mut spec = FetchSpec::new();
    spec.add(Some("property"), None, Fetch::ALL);
    let cond = Condition::filter(
        FilterOp::Equal,
        "entry",
        Some(Value::str(name)),
        None,
        CmpMode::Binary,
        Scope::Entry,
    );
    let tx = db.begin(TxnFlags::read_only()).unwrap();
    let set = tx.query(&spec, &cond).unwrap();
    let mut out = Vec::new();
    for row in 0..set.row_count() {
        for item in set.get(row, 0) {
            out.push((
                item.value().unwrap().as_str().unwrap().to_string(),
                item.source().unwrap().to_string(),
            ));
        }
    }
    out
}

pub(crate) fn db_path(dir: &Path) -> std::path::PathBuf {
    dir.join("media.db")
}
