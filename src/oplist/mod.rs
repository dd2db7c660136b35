//! Operation lists.
//!
//! An [`OpList`] batches the mutations of one transaction: tagged add and
//! del operations plus the `Writing` marker the sync pass injects to stamp
//! its position into the log. The list is what the write-ahead log
//! serialises and what commit and recovery apply to the store.
//!
//! Ops carry their literal strings and values, not interned ids — the log
//! writes literals, and interning happens when an op is applied.

#[cfg(test)]
mod tests;

use tracing::warn;

use crate::store::{Store, StoreError};
use crate::strings::StringTable;
use crate::value::Value;

/// The five literal fields of an add or del.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModOp {
    pub(crate) key_a: String,
    pub(crate) val_a: Value,
    pub(crate) key_b: String,
    pub(crate) val_b: Value,
    pub(crate) src: String,
}

/// One tagged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    /// Add one occurrence of the relation.
    Add(ModOp),
    /// Remove one occurrence of the relation.
    Del(ModOp),
    /// Sync-pass marker: the log up to here is being persisted to the
    /// snapshot.
    Writing,
}

/// An ordered batch of operations.
#[derive(Debug, Default, Clone)]
pub(crate) struct OpList {
    ops: Vec<Op>,
}

impl OpList {
    pub(crate) fn new() -> Self {
        OpList::default()
    }

    pub(crate) fn push_add(&mut self, op: ModOp) {
        self.ops.push(Op::Add(op));
    }

    pub(crate) fn push_del(&mut self, op: ModOp) {
        self.ops.push(Op::Del(op));
    }

    pub(crate) fn push_writing(&mut self) {
        self.ops.push(Op::Writing);
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Op> {
        self.ops.iter()
    }

    /// Applies every op in order; a failure unwinds the applied prefix.
    ///
    /// Commit uses this: the store either reflects the whole list or none
    /// of it.
    pub(crate) fn apply(&self, store: &mut Store, strings: &StringTable) -> Result<(), StoreError> {
        for (i, op) in self.ops.iter().enumerate() {
            let outcome = match op {
                Op::Add(m) => {
                    store.add(strings, &m.key_a, &m.val_a, &m.key_b, &m.val_b, &m.src);
                    Ok(())
                }
                Op::Del(m) => store.del(strings, &m.key_a, &m.val_a, &m.key_b, &m.val_b, &m.src),
                Op::Writing => Ok(()),
            };
            if let Err(error) = outcome {
                self.unwind(store, strings, i);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Applies every op, tolerating failures.
    ///
    /// Recovery uses this: a del that no longer resolves is logged and
    /// skipped rather than aborting the replay.
    pub(crate) fn replay(&self, store: &mut Store, strings: &StringTable) {
        for op in &self.ops {
            match op {
                Op::Add(m) => {
                    store.add(strings, &m.key_a, &m.val_a, &m.key_b, &m.val_b, &m.src);
                }
                Op::Del(m) => {
                    if store
                        .del(strings, &m.key_a, &m.val_a, &m.key_b, &m.val_b, &m.src)
                        .is_err()
                    {
                        warn!(key_a = %m.key_a, key_b = %m.key_b, "replayed del no longer resolves");
                    }
                }
                Op::Writing => {}
            }
        }
    }

    /// Reverses the first `applied` ops, newest first.
    fn unwind(&self, store: &mut Store, strings: &StringTable, applied: usize) {
        for op in self.ops[..applied].iter().rev() {
            match op {
                Op::Add(m) => {
                    if store
                        .del(strings, &m.key_a, &m.val_a, &m.key_b, &m.val_b, &m.src)
                        .is_err()
                    {
                        warn!("unwind of applied add failed");
                    }
                }
                Op::Del(m) => {
                    store.add(strings, &m.key_a, &m.val_a, &m.key_b, &m.val_b, &m.src);
                }
                Op::Writing => {}
            }
        }
    }
}
