use super::*;

fn op(name: &str, prop: i32, src: &str) -> ModOp {
    ModOp {
        key_a: "entry".into(),
        val_a: Value::str(name),
        key_b: "property".into(),
        val_b: Value::int(prop),
        src: src.into(),
    }
}

#[test]
fn apply_runs_ops_in_order() {
    let strings = StringTable::new();
    let mut store = Store::new();
    let mut list = OpList::new();
    list.push_add(op("a", 1, "s"));
    list.push_add(op("a", 2, "s"));
    list.push_del(op("a", 1, "s"));

    list.apply(&mut store, &strings).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(
        store.refcount(
            &strings,
            "entry",
            &Value::str("a"),
            "property",
            &Value::int(2),
            "s"
        ),
        1
    );
}

#[test]
fn failed_apply_unwinds_the_prefix() {
    let strings = StringTable::new();
    let mut store = Store::new();

    let mut list = OpList::new();
    list.push_add(op("a", 1, "s"));
    // This del cannot resolve: nothing under source "t".
    list.push_del(op("a", 1, "t"));

    assert!(list.apply(&mut store, &strings).is_err());
    // The add before the failure was rolled back.
    assert!(store.is_empty());
    assert!(strings.is_empty());
}

#[test]
fn replay_skips_unresolvable_dels() {
    let strings = StringTable::new();
    let mut store = Store::new();

    let mut list = OpList::new();
    list.push_del(op("ghost", 1, "s"));
    list.push_add(op("a", 1, "s"));

    list.replay(&mut store, &strings);
    assert_eq!(store.len(), 1);
}

#[test]
fn writing_markers_do_not_touch_the_store() {
    let strings = StringTable::new();
    let mut store = Store::new();
    let mut list = OpList::new();
    list.push_writing();
    assert_eq!(list.len(), 1);
    list.apply(&mut store, &strings).unwrap();
    assert!(store.is_empty());
}
