use std::cmp::Ordering;

use super::*;
use crate::store::Store;
use crate::strings::StringTable;

/// RelRefs are only minted by the store; grab a few real ones.
fn rel_refs(n: u64) -> Vec<RelRef> {
    let strings = StringTable::new();
    let mut store = Store::new();
    for i in 0..n {
        store.add(
            &strings,
            "entry",
            &Value::int(i as i32),
            "property",
            &Value::int(i as i32),
            "src",
        );
    }
    store.all_refs()
}

#[test]
fn buckets_stay_sorted() {
    let rels = rel_refs(1);
    let mut index = ValueIndex::new();
    for v in ["m", "a", "z", "k"] {
        index.insert(&Value::str(v), rels[0]);
    }
    index.insert(&Value::int(5), rels[0]);
    index.insert(&Value::int(-5), rels[0]);

    let values = index.bucket_values();
    assert_eq!(values.len(), 6);
    for pair in values.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    // Ints first.
    assert_eq!(values[0], Value::int(-5));
    assert_eq!(values[1], Value::int(5));
}

#[test]
fn duplicate_insert_bumps_occurrence_count() {
    let rels = rel_refs(1);
    let mut index = ValueIndex::new();
    index.insert(&Value::str("v"), rels[0]);
    index.insert(&Value::str("v"), rels[0]);
    assert_eq!(index.len(), 1);
    assert_eq!(index.occurrence_count(&Value::str("v"), rels[0]), Some(2));
}

#[test]
fn remove_drops_bucket_at_zero() {
    let rels = rel_refs(2);
    let mut index = ValueIndex::new();
    index.insert(&Value::str("v"), rels[0]);
    index.insert(&Value::str("v"), rels[0]);
    index.insert(&Value::str("v"), rels[1]);

    assert!(index.remove(&Value::str("v"), rels[0]));
    assert_eq!(index.occurrence_count(&Value::str("v"), rels[0]), Some(1));

    assert!(index.remove(&Value::str("v"), rels[0]));
    assert_eq!(index.occurrence_count(&Value::str("v"), rels[0]), None);

    assert!(index.remove(&Value::str("v"), rels[1]));
    assert!(index.is_empty());
}

#[test]
fn remove_of_absent_pair_fails_silently() {
    let rels = rel_refs(2);
    let mut index = ValueIndex::new();
    index.insert(&Value::str("v"), rels[0]);
    assert!(!index.remove(&Value::str("w"), rels[0]));
    assert!(!index.remove(&Value::str("v"), rels[1]));
    assert_eq!(index.len(), 1);
}

#[test]
fn search_finds_the_whole_zero_region() {
    let rels = rel_refs(1);
    let mut index = ValueIndex::new();
    for i in 0..20 {
        index.insert(&Value::int(i), rels[0]);
    }
    // Range 5 <= v < 15 as a monotone comparator.
    let hits = index.search(|v| match v.as_int() {
        Some(i) if i < 5 => Ordering::Less,
        Some(i) if i >= 15 => Ordering::Greater,
        Some(_) => Ordering::Equal,
        None => Ordering::Greater,
    });
    // One relation in many buckets still dedups to one hit.
    assert_eq!(hits, vec![rels[0]]);

    let empty = index.search(|v| v.cmp(&Value::int(100)));
    assert!(empty.is_empty());
}

#[test]
fn search_results_follow_bucket_order() {
    let rels = rel_refs(3);
    let mut index = ValueIndex::new();
    index.insert(&Value::str("c"), rels[2]);
    index.insert(&Value::str("a"), rels[0]);
    index.insert(&Value::str("b"), rels[1]);

    let all = index.search(|_| Ordering::Equal);
    assert_eq!(all, vec![rels[0], rels[1], rels[2]]);
    assert_eq!(index.all(), vec![rels[0], rels[1], rels[2]]);
}

#[test]
fn scan_applies_arbitrary_predicates() {
    let rels = rel_refs(2);
    let mut index = ValueIndex::new();
    index.insert(&Value::str("Abc"), rels[0]);
    index.insert(&Value::str("xyz"), rels[1]);

    let hits = index.scan(|v| {
        v.as_str()
            .is_some_and(|s| s.eq_ignore_ascii_case("abc"))
    });
    assert_eq!(hits, vec![rels[0]]);
}
