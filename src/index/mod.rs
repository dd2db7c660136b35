//! The per-key value index.
//!
//! For every distinct key the store keeps a [`ValueIndex`]: a vector of
//! buckets strictly sorted by the canonical value comparator, each bucket
//! holding the relations whose A-side or B-side carries that value under
//! the key. Occurrences are reference-counted individually (duplicate adds
//! bump the count) and kept sorted by [`RelRef`], which is insertion order,
//! so iteration is deterministic.
//!
//! ## Invariants
//!
//! - Buckets are strictly sorted by `Value`'s canonical order.
//! - No empty buckets: the last removed occurrence takes the bucket with it.
//! - An occurrence count is the number of outstanding paired inserts.
//!
//! ## Searching
//!
//! [`ValueIndex::search`] takes a *monotone* comparator and binary-searches
//! for its zero region, then scans outward in both directions while the
//! comparator stays zero. Predicates that are not monotone along the
//! canonical order (case-folded equality, glob, token matching) must use
//! the linear [`ValueIndex::scan`] instead.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::warn;

use crate::store::RelRef;
use crate::value::Value;

struct Occurrence {
    rel: RelRef,
    count: u32,
}

struct Bucket {
    value: Value,
    occs: Vec<Occurrence>,
}

/// A value-ordered index over the relations of one key.
#[derive(Default)]
pub struct ValueIndex {
    buckets: Vec<Bucket>,
}

impl ValueIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        ValueIndex {
            buckets: Vec::new(),
        }
    }

    /// Number of distinct values in the index.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True when the index holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Records one occurrence of `rel` under `value`.
    ///
    /// Creates the bucket in sorted position on first use, otherwise bumps
    /// the occurrence count.
    pub fn insert(&mut self, value: &Value, rel: RelRef) {
        let i = match self.buckets.binary_search_by(|b| b.value.cmp(value)) {
            Ok(i) => i,
            Err(i) => {
                self.buckets.insert(i, Bucket {
                    value: value.clone(),
                    occs: Vec::new(),
                });
                i
            }
        };
        let occs = &mut self.buckets[i].occs;
        match occs.binary_search_by(|o| o.rel.cmp(&rel)) {
            Ok(j) => occs[j].count += 1,
            Err(j) => occs.insert(j, Occurrence { rel, count: 1 }),
        }
    }

    /// Releases one occurrence of `rel` under `value`.
    ///
    /// At zero the occurrence is removed; an emptied bucket is removed
    /// from the index. Returns `false` (and logs) when the pair was never
    /// inserted — callers only call this paired with a successful insert.
    pub fn remove(&mut self, value: &Value, rel: RelRef) -> bool {
        let Ok(i) = self.buckets.binary_search_by(|b| b.value.cmp(value)) else {
            warn!(%value, ?rel, "index remove: no bucket for value");
            return false;
        };
        let occs = &mut self.buckets[i].occs;
        let Ok(j) = occs.binary_search_by(|o| o.rel.cmp(&rel)) else {
            warn!(%value, ?rel, "index remove: relation not in bucket");
            return false;
        };
        occs[j].count -= 1;
        if occs[j].count == 0 {
            occs.remove(j);
        }
        if occs.is_empty() {
            self.buckets.remove(i);
        }
        true
    }

    /// Finds all relations in the zero region of a monotone comparator.
    ///
    /// `cmp(value)` must return `Less` for every bucket left of the region
    /// and `Greater` for every bucket right of it. Results are in bucket
    /// order, deduplicated, occurrences in insertion order within a bucket.
    pub fn search(&self, cmp: impl Fn(&Value) -> Ordering) -> Vec<RelRef> {
        let Ok(hit) = self.buckets.binary_search_by(|b| cmp(&b.value)) else {
            return Vec::new();
        };

        // Widen to the full run of buckets the comparator accepts.
        let mut lo = hit;
        while lo > 0 && cmp(&self.buckets[lo - 1].value) == Ordering::Equal {
            lo -= 1;
        }
        let mut hi = hit + 1;
        while hi < self.buckets.len() && cmp(&self.buckets[hi].value) == Ordering::Equal {
            hi += 1;
        }

        self.collect_range(lo..hi)
    }

    /// Linear fallback for predicates that are not canonically monotone.
    pub fn scan(&self, pred: impl Fn(&Value) -> bool) -> Vec<RelRef> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for bucket in &self.buckets {
            if pred(&bucket.value) {
                for occ in &bucket.occs {
                    if seen.insert(occ.rel) {
                        out.push(occ.rel);
                    }
                }
            }
        }
        out
    }

    /// Every relation in the index, bucket order, deduplicated.
    pub fn all(&self) -> Vec<RelRef> {
        self.collect_range(0..self.buckets.len())
    }

    fn collect_range(&self, range: std::ops::Range<usize>) -> Vec<RelRef> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for bucket in &self.buckets[range] {
            for occ in &bucket.occs {
                if seen.insert(occ.rel) {
                    out.push(occ.rel);
                }
            }
        }
        out
    }

    /// Occurrence count of `(value, rel)`, if present.
    ///
    /// Consistency checking only.
    pub(crate) fn occurrence_count(&self, value: &Value, rel: RelRef) -> Option<u32> {
        let i = self.buckets.binary_search_by(|b| b.value.cmp(value)).ok()?;
        let occs = &self.buckets[i].occs;
        let j = occs.binary_search_by(|o| o.rel.cmp(&rel)).ok()?;
        Some(occs[j].count)
    }

    /// Bucket values in index order.
    ///
    /// Consistency checking only; the checker asserts strict canonical
    /// ordering over this sequence.
    pub(crate) fn bucket_values(&self) -> Vec<Value> {
        self.buckets.iter().map(|b| b.value.clone()).collect()
    }
}
