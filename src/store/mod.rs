//! The relation store.
//!
//! The authoritative set of quintuples `(key_a, val_a, key_b, val_b, src)`.
//! Records hold interned [`LitId`]s only — never string contents — and a
//! refcount: duplicate adds increment it, dels decrement it, and the
//! record dies at zero. Each distinct record is assigned a stable
//! [`RelRef`] in insertion order; every deterministic ordering decision
//! downstream (index occurrence order, grouping tie-breaks) hangs off it.
//!
//! A relation is a bidirectional association: adding `(A, a, B, b, s)`
//! also makes `(A, a, s)` an attribute of the entry `(B, b)`. The store
//! therefore indexes every record twice, under `key_a → val_a` and
//! `key_b → val_b`, in the per-key [`ValueIndex`] table.
//!
//! ## Invariants
//!
//! - A live record has exactly one A-side and one B-side occurrence, each
//!   with a count equal to the record's refcount.
//! - A literal's table refcount equals the number of record fields that
//!   name it.
//! - An index with no buckets is dropped from the index table.
//!
//! [`Store::verify`] checks all of the above and is wired to the handle's
//! verify flag.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{trace, warn};

use crate::index::ValueIndex;
use crate::strings::{LitId, StringTable};
use crate::value::Value;

/// Stable, insertion-ordered identity of a relation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelRef(u64);

/// The A-side equivalence class a relation belongs to.
pub(crate) type EntryKey = (LitId, LitId);

/// Errors surfaced by store mutations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A del named a relation that is not in the store.
    #[error("relation is not in the store")]
    UnknownRelation,
}

/// One stored quintuple. All fields are interned ids.
#[derive(Debug, Clone)]
pub struct Relation {
    pub(crate) key_a: LitId,
    pub(crate) val_a: LitId,
    pub(crate) key_b: LitId,
    pub(crate) val_b: LitId,
    pub(crate) src: LitId,
    refcount: u32,
}

impl Relation {
    fn tuple(&self) -> [LitId; 5] {
        [self.key_a, self.val_a, self.key_b, self.val_b, self.src]
    }

    /// The A-side pair identifying this relation's entry.
    pub(crate) fn entry(&self) -> EntryKey {
        (self.key_a, self.val_a)
    }

    /// Outstanding add occurrences of this record.
    pub(crate) fn count(&self) -> u32 {
        self.refcount
    }
}

/// The relation store plus its per-key value indices.
#[derive(Default)]
pub struct Store {
    by_tuple: HashMap<[LitId; 5], RelRef>,
    by_ref: BTreeMap<RelRef, Relation>,
    indices: HashMap<LitId, ValueIndex>,
    next_ref: u64,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Store::default()
    }

    /// Number of distinct relation records.
    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    /// True when no relation is stored.
    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }

    /// Adds one occurrence of the quintuple.
    ///
    /// Literals are interned on record creation only, so table refcounts
    /// track distinct record fields; the index occurrence counts and the
    /// record refcount track duplicate adds.
    pub fn add(
        &mut self,
        strings: &StringTable,
        key_a: &str,
        val_a: &Value,
        key_b: &str,
        val_b: &Value,
        src: &str,
    ) {
        if let Some(rel) = self.lookup(strings, key_a, val_a, key_b, val_b, src) {
            let record = self
                .by_ref
                .get_mut(&rel)
                .filter(|r| r.refcount > 0);
            if let Some(record) = record {
                record.refcount += 1;
                let (ka, kb) = (record.key_a, record.key_b);
                self.index_mut(ka).insert(val_a, rel);
                self.index_mut(kb).insert(val_b, rel);
                trace!(?rel, "duplicate add, refcount bumped");
                return;
            }
        }

        let record = Relation {
            key_a: strings.intern(&Value::str(key_a)),
            val_a: strings.intern(val_a),
            key_b: strings.intern(&Value::str(key_b)),
            val_b: strings.intern(val_b),
            src: strings.intern(&Value::str(src)),
            refcount: 1,
        };
        let rel = RelRef(self.next_ref);
        self.next_ref += 1;

        self.by_tuple.insert(record.tuple(), rel);
        self.index_mut(record.key_a).insert(val_a, rel);
        self.index_mut(record.key_b).insert(val_b, rel);
        self.by_ref.insert(rel, record);
        trace!(?rel, key_a, key_b, src, "relation added");
    }

    /// Removes one occurrence of the quintuple.
    ///
    /// The record and its literals are released when the refcount drains.
    pub fn del(
        &mut self,
        strings: &StringTable,
        key_a: &str,
        val_a: &Value,
        key_b: &str,
        val_b: &Value,
        src: &str,
    ) -> Result<(), StoreError> {
        let Some(rel) = self.lookup(strings, key_a, val_a, key_b, val_b, src) else {
            warn!(key_a, key_b, src, "del of unknown relation");
            return Err(StoreError::UnknownRelation);
        };
        let Some(record) = self.by_ref.get_mut(&rel) else {
            return Err(StoreError::UnknownRelation);
        };

        record.refcount -= 1;
        let drained = record.refcount == 0;
        let (ka, kb) = (record.key_a, record.key_b);

        self.remove_occurrence(ka, val_a, rel);
        self.remove_occurrence(kb, val_b, rel);

        if drained {
            if let Some(record) = self.by_ref.remove(&rel) {
                self.by_tuple.remove(&record.tuple());
                for id in record.tuple() {
                    strings.release(id);
                }
            }
            trace!(?rel, "relation removed");
        }
        Ok(())
    }

    /// Current refcount of the quintuple, zero when absent.
    ///
    /// Transactions use this to validate dels against committed state.
    pub fn refcount(
        &self,
        strings: &StringTable,
        key_a: &str,
        val_a: &Value,
        key_b: &str,
        val_b: &Value,
        src: &str,
    ) -> u32 {
        self.lookup(strings, key_a, val_a, key_b, val_b, src)
            .and_then(|rel| self.by_ref.get(&rel))
            .map_or(0, |r| r.refcount)
    }

    /// The record behind a reference.
    pub(crate) fn relation(&self, rel: RelRef) -> Option<&Relation> {
        self.by_ref.get(&rel)
    }

    /// The index for `key`, if any value is stored under it.
    pub(crate) fn index(&self, key: LitId) -> Option<&ValueIndex> {
        self.indices.get(&key)
    }

    /// All relation refs in insertion order.
    pub(crate) fn all_refs(&self) -> Vec<RelRef> {
        self.by_ref.keys().copied().collect()
    }

    /// All records in insertion order.
    pub(crate) fn records(&self) -> impl Iterator<Item = &Relation> {
        self.by_ref.values()
    }

    /// The attributes of the entry `(key, value)`, in insertion order.
    ///
    /// An attribute is `(attr_key, attr_val, src, rel)`: the B-side triple
    /// of relations whose A-side is the entry, and symmetrically the
    /// A-side triple of relations whose B-side is the entry.
    pub(crate) fn entry_attributes(
        &self,
        strings: &StringTable,
        entry: EntryKey,
    ) -> Vec<(LitId, LitId, LitId, RelRef)> {
        let (key, val_id) = entry;
        let Some(value) = strings.resolve(val_id) else {
            return Vec::new();
        };
        let Some(index) = self.indices.get(&key) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for rel in index.search(|v| v.cmp(&value)) {
            let Some(record) = self.by_ref.get(&rel) else {
                continue;
            };
            if record.key_a == key && record.val_a == val_id {
                out.push((record.key_b, record.val_b, record.src, rel));
            }
            if record.key_b == key && record.val_b == val_id {
                out.push((record.key_a, record.val_a, record.src, rel));
            }
        }
        out
    }

    fn index_mut(&mut self, key: LitId) -> &mut ValueIndex {
        self.indices.entry(key).or_default()
    }

    fn remove_occurrence(&mut self, key: LitId, value: &Value, rel: RelRef) {
        if let Some(index) = self.indices.get_mut(&key) {
            index.remove(value, rel);
            if index.is_empty() {
                self.indices.remove(&key);
            }
        }
    }

    fn lookup(
        &self,
        strings: &StringTable,
        key_a: &str,
        val_a: &Value,
        key_b: &str,
        val_b: &Value,
        src: &str,
    ) -> Option<RelRef> {
        let tuple = [
            strings.lookup_str(key_a)?,
            strings.lookup(val_a)?,
            strings.lookup_str(key_b)?,
            strings.lookup(val_b)?,
            strings.lookup_str(src)?,
        ];
        self.by_tuple.get(&tuple).copied()
    }

    /// Checks every store/index/table invariant, returning the first
    /// violation as text.
    pub fn verify(&self, strings: &StringTable) -> Result<(), String> {
        // Field references per literal.
        let mut field_refs: HashMap<LitId, u32> = HashMap::new();
        for record in self.by_ref.values() {
            if record.refcount == 0 {
                return Err("record with zero refcount".into());
            }
            for id in record.tuple() {
                *field_refs.entry(id).or_insert(0) += 1;
            }
            let val_a = strings
                .resolve(record.val_a)
                .ok_or("val_a missing from string table")?;
            let val_b = strings
                .resolve(record.val_b)
                .ok_or("val_b missing from string table")?;
            let rel = self.by_tuple.get(&record.tuple()).copied();
            let Some(rel) = rel else {
                return Err("record missing from tuple map".into());
            };

            for (key, value) in [(record.key_a, &val_a), (record.key_b, &val_b)] {
                let index = self
                    .indices
                    .get(&key)
                    .ok_or("no index for a live record key")?;
                match index.occurrence_count(value, rel) {
                    Some(count) if count == record.refcount => {}
                    Some(count) => {
                        return Err(format!(
                            "occurrence count {count} != record refcount {}",
                            record.refcount
                        ));
                    }
                    None => return Err("record missing from its index bucket".into()),
                }
            }
        }

        // Literal refcounts match field references exactly.
        for (id, _, refcount) in strings.entries() {
            let expected = field_refs.get(&id).copied().unwrap_or(0);
            if refcount != expected {
                return Err(format!(
                    "literal {} refcount {refcount}, {expected} field references",
                    id.raw()
                ));
            }
        }

        // Index ordering and emptiness.
        for (key, index) in &self.indices {
            if index.is_empty() {
                return Err(format!("empty index left for key {}", key.raw()));
            }
            let values = index.bucket_values();
            for pair in values.windows(2) {
                if pair[0] >= pair[1] {
                    return Err("index buckets not strictly sorted".into());
                }
            }
        }
        Ok(())
    }
}
