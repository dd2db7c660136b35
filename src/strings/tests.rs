use super::*;

#[test]
fn interning_is_idempotent() {
    let table = StringTable::new();
    let a = table.intern(&Value::str("artist"));
    let b = table.intern(&Value::str("artist"));
    assert_eq!(a, b);
    assert_eq!(table.len(), 1);
}

#[test]
fn ints_and_strings_get_distinct_tagged_ids() {
    let table = StringTable::new();
    let i = table.intern(&Value::int(42));
    let s = table.intern(&Value::str("42"));
    assert_ne!(i, s);
    assert!(i.is_int());
    assert!(!s.is_int());
}

#[test]
fn resolve_returns_the_content() {
    let table = StringTable::new();
    let id = table.intern(&Value::str("title"));
    assert_eq!(table.resolve(id), Some(Value::str("title")));
    let id = table.intern(&Value::int(-3));
    assert_eq!(table.resolve(id), Some(Value::int(-3)));
}

#[test]
fn lookup_does_not_create() {
    let table = StringTable::new();
    assert_eq!(table.lookup_str("missing"), None);
    assert!(table.is_empty());
    let id = table.intern(&Value::str("present"));
    assert_eq!(table.lookup_str("present"), Some(id));
    assert_eq!(table.len(), 1);
}

#[test]
fn release_recycles_at_zero() {
    let table = StringTable::new();
    let id = table.intern(&Value::str("gone"));
    table.release(id);
    assert_eq!(table.resolve(id), None);
    assert!(table.is_empty());

    // The freed id is reused for the next string literal.
    let next = table.intern(&Value::str("other"));
    assert_eq!(next.raw(), id.raw());
}

#[test]
fn refcount_tracks_intern_and_release() {
    let table = StringTable::new();
    let id = table.intern(&Value::str("x"));
    table.intern(&Value::str("x"));
    table.acquire(id);
    // Three references: two interns, one acquire.
    table.release(id);
    table.release(id);
    assert_eq!(table.resolve(id), Some(Value::str("x")));
    table.release(id);
    assert_eq!(table.resolve(id), None);
}

#[test]
fn restore_preserves_ids_and_advances_counters() {
    let table = StringTable::new();
    table.restore(LitId::from_raw(7), Value::str("kept"));
    assert_eq!(table.resolve(LitId::from_raw(7)), Some(Value::str("kept")));

    // A fresh allocation must not collide with the restored id.
    let fresh = table.intern(&Value::str("fresh"));
    assert!(fresh.raw() > 7);

    // Re-interning the restored content reuses its id.
    let again = table.intern(&Value::str("kept"));
    assert_eq!(again.raw(), 7);
}

#[test]
fn sweep_drops_only_unreferenced_entries() {
    let table = StringTable::new();
    table.restore(LitId::from_raw(0), Value::str("dead"));
    table.restore(LitId::from_raw(1), Value::str("live"));
    table.intern(&Value::str("live"));
    table.sweep_unreferenced();
    assert_eq!(table.resolve(LitId::from_raw(0)), None);
    assert_eq!(table.resolve(LitId::from_raw(1)), Some(Value::str("live")));
}

#[test]
fn entries_are_id_ordered() {
    let table = StringTable::new();
    table.intern(&Value::str("b"));
    table.intern(&Value::str("a"));
    table.intern(&Value::int(9));
    let entries = table.entries();
    assert_eq!(entries.len(), 3);
    for pair in entries.windows(2) {
        assert!(pair[0].0 < pair[1].0);
    }
}
