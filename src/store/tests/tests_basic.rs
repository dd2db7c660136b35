use crate::store::{Store, StoreError};
use crate::strings::StringTable;
use crate::value::Value;

fn add_simple(store: &mut Store, strings: &StringTable, name: &str, prop: &str, src: &str) {
    store.add(
        strings,
        "entry",
        &Value::str(name),
        "property",
        &Value::str(prop),
        src,
    );
}

#[test]
fn add_creates_one_record_per_tuple() {
    let strings = StringTable::new();
    let mut store = Store::new();
    add_simple(&mut store, &strings, "a", "x", "1");
    add_simple(&mut store, &strings, "a", "y", "1");
    add_simple(&mut store, &strings, "a", "x", "1");
    assert_eq!(store.len(), 2);
    assert_eq!(
        store.refcount(
            &strings,
            "entry",
            &Value::str("a"),
            "property",
            &Value::str("x"),
            "1"
        ),
        2
    );
}

#[test]
fn del_counts_down_to_removal() {
    let strings = StringTable::new();
    let mut store = Store::new();
    add_simple(&mut store, &strings, "a", "x", "1");
    add_simple(&mut store, &strings, "a", "x", "1");

    store
        .del(
            &strings,
            "entry",
            &Value::str("a"),
            "property",
            &Value::str("x"),
            "1",
        )
        .unwrap();
    assert_eq!(store.len(), 1);

    store
        .del(
            &strings,
            "entry",
            &Value::str("a"),
            "property",
            &Value::str("x"),
            "1",
        )
        .unwrap();
    assert!(store.is_empty());
    assert!(strings.is_empty());
}

#[test]
fn del_of_unknown_relation_fails() {
    let strings = StringTable::new();
    let mut store = Store::new();
    add_simple(&mut store, &strings, "a", "x", "1");
    let err = store
        .del(
            &strings,
            "entry",
            &Value::str("a"),
            "property",
            &Value::str("x"),
            "other-src",
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownRelation));
    assert_eq!(store.len(), 1);
}

#[test]
fn entry_attributes_are_bidirectional() {
    let strings = StringTable::new();
    let mut store = Store::new();
    store.add(
        &strings,
        "album",
        &Value::str("ep"),
        "track",
        &Value::int(3),
        "scanner",
    );

    // Forward: the album entry sees its track.
    let album = (
        strings.lookup_str("album").unwrap(),
        strings.lookup(&Value::str("ep")).unwrap(),
    );
    let attrs = store.entry_attributes(&strings, album);
    assert_eq!(attrs.len(), 1);
    assert_eq!(strings.resolve(attrs[0].1), Some(Value::int(3)));

    // Backward: the track entry sees its album.
    let track = (
        strings.lookup_str("track").unwrap(),
        strings.lookup(&Value::int(3)).unwrap(),
    );
    let attrs = store.entry_attributes(&strings, track);
    assert_eq!(attrs.len(), 1);
    assert_eq!(strings.resolve(attrs[0].1), Some(Value::str("ep")));
}

#[test]
fn int_and_string_values_coexist_under_one_key() {
    let strings = StringTable::new();
    let mut store = Store::new();
    store.add(
        &strings,
        "entry",
        &Value::str("a"),
        "property",
        &Value::int(1),
        "s",
    );
    store.add(
        &strings,
        "entry",
        &Value::str("a"),
        "property",
        &Value::str("1"),
        "s",
    );
    assert_eq!(store.len(), 2);
    store.verify(&strings).unwrap();
}
