//! The literal intern table.
//!
//! Every key, value and source string (and every integer value) is
//! canonicalised into a stable 32-bit [`LitId`] before it reaches the
//! relation store, so all hot-path comparisons are id comparisons. The
//! table is bidirectional: `content → id` for interning and `id → content`
//! for reverse lookup.
//!
//! Integers and strings share one id space; bit 31 tags integer literals.
//! Ids are handed out from per-kind monotonic counters with a free-list
//! for recycled ids, and stay stable for the lifetime of the process.
//!
//! A literal's refcount equals the number of relation-record fields that
//! reference it; the entry is recycled when the count reaches zero.
//!
//! One mutex guards both maps. Lookups take the lock briefly and return
//! plain ids.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::value::Value;

/// Bit 31 set on ids of integer literals.
const INT_TAG: u32 = 1 << 31;

/// Stable identifier of an interned literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LitId(pub(crate) u32);

impl LitId {
    /// Raw 32-bit representation (tag bit included).
    pub fn raw(self) -> u32 {
        self.0
    }

    /// True when this id names an integer literal.
    pub fn is_int(self) -> bool {
        self.0 & INT_TAG != 0
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        LitId(raw)
    }
}

struct LitEntry {
    value: Value,
    refcount: u32,
}

struct TableInner {
    by_content: HashMap<Value, LitId>,
    by_id: HashMap<u32, LitEntry>,
    next_str: u32,
    next_int: u32,
    free_str: Vec<u32>,
    free_int: Vec<u32>,
}

/// Bidirectional intern map: literal ↔ stable 32-bit id.
pub struct StringTable {
    inner: Mutex<TableInner>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        StringTable {
            inner: Mutex::new(TableInner {
                by_content: HashMap::new(),
                by_id: HashMap::new(),
                next_str: 0,
                next_int: 0,
                free_str: Vec::new(),
                free_int: Vec::new(),
            }),
        }
    }

    // The table never panics while holding the lock, so a poisoned mutex
    // still guards a consistent map and can be recovered.
    fn lock(&self) -> std::sync::MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interns `value`, bumping its refcount.
    ///
    /// Idempotent: repeated interning of equal content returns the same id.
    pub fn intern(&self, value: &Value) -> LitId {
        let mut inner = self.lock();
        if let Some(&id) = inner.by_content.get(value) {
            if let Some(entry) = inner.by_id.get_mut(&id.0) {
                entry.refcount += 1;
            }
            return id;
        }

        let raw = match value {
            Value::Int(_) => {
                let bare = match inner.free_int.pop() {
                    Some(recycled) => recycled,
                    None => {
                        let fresh = inner.next_int;
                        assert!(fresh < INT_TAG, "literal id space exhausted");
                        inner.next_int += 1;
                        fresh
                    }
                };
                bare | INT_TAG
            }
            Value::Str(_) => match inner.free_str.pop() {
                Some(recycled) => recycled,
                None => {
                    let fresh = inner.next_str;
                    assert!(fresh < INT_TAG, "literal id space exhausted");
                    inner.next_str += 1;
                    fresh
                }
            },
        };
        let id = LitId(raw);
        inner.by_content.insert(value.clone(), id);
        inner.by_id.insert(raw, LitEntry {
            value: value.clone(),
            refcount: 1,
        });
        id
    }

    /// Looks up the id of `value` without touching its refcount.
    pub fn lookup(&self, value: &Value) -> Option<LitId> {
        self.lock().by_content.get(value).copied()
    }

    /// Convenience: looks up the id of a string literal.
    pub fn lookup_str(&self, s: &str) -> Option<LitId> {
        self.lookup(&Value::str(s))
    }

    /// Returns the content behind `id`.
    pub fn resolve(&self, id: LitId) -> Option<Value> {
        self.lock().by_id.get(&id.0).map(|e| e.value.clone())
    }

    /// Bumps the refcount of an already-interned literal.
    pub fn acquire(&self, id: LitId) {
        let mut inner = self.lock();
        match inner.by_id.get_mut(&id.0) {
            Some(entry) => entry.refcount += 1,
            None => warn!(id = id.0, "acquire of unknown literal"),
        }
    }

    /// Drops one reference to `id`; the entry is recycled at zero.
    pub fn release(&self, id: LitId) {
        let mut inner = self.lock();
        let drained = match inner.by_id.get_mut(&id.0) {
            Some(entry) => {
                entry.refcount -= 1;
                entry.refcount == 0
            }
            None => {
                warn!(id = id.0, "release of unknown literal");
                false
            }
        };
        if drained {
            if let Some(entry) = inner.by_id.remove(&id.0) {
                inner.by_content.remove(&entry.value);
            }
            let raw = id.0 & !INT_TAG;
            if id.is_int() {
                inner.free_int.push(raw);
            } else {
                inner.free_str.push(raw);
            }
        }
    }

    /// Re-seeds an entry with a fixed id during snapshot load.
    ///
    /// The entry starts at refcount zero; replaying the relation section
    /// rebuilds the counts through the ordinary intern path. Counters are
    /// advanced past the restored id so future allocations never collide.
    pub(crate) fn restore(&self, id: LitId, value: Value) {
        let mut inner = self.lock();
        let raw = id.0 & !INT_TAG;
        if id.is_int() {
            if raw >= inner.next_int {
                inner.next_int = raw + 1;
            }
        } else if raw >= inner.next_str {
            inner.next_str = raw + 1;
        }
        inner.by_content.insert(value.clone(), id);
        inner.by_id.insert(id.0, LitEntry { value, refcount: 0 });
    }

    /// Drops restored entries that no relation re-referenced.
    ///
    /// Run once after snapshot load; keeps the refcount invariant exact.
    pub(crate) fn sweep_unreferenced(&self) {
        let mut inner = self.lock();
        let dead: Vec<u32> = inner
            .by_id
            .iter()
            .filter(|(_, e)| e.refcount == 0)
            .map(|(&raw, _)| raw)
            .collect();
        for raw in dead {
            if let Some(entry) = inner.by_id.remove(&raw) {
                inner.by_content.remove(&entry.value);
            }
            let id = LitId(raw);
            let bare = raw & !INT_TAG;
            if id.is_int() {
                inner.free_int.push(bare);
            } else {
                inner.free_str.push(bare);
            }
        }
    }

    /// Number of live literals.
    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    /// True when no literal is interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live `(id, content, refcount)` triples, id-ordered.
    ///
    /// Used by the snapshot writer and the consistency checker.
    pub(crate) fn entries(&self) -> Vec<(LitId, Value, u32)> {
        let inner = self.lock();
        let mut out: Vec<(LitId, Value, u32)> = inner
            .by_id
            .iter()
            .map(|(&raw, e)| (LitId(raw), e.value.clone(), e.refcount))
            .collect();
        out.sort_by_key(|(id, _, _)| id.0);
        out
    }
}
