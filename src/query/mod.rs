//! The query engine.
//!
//! Executes a [`Condition`] tree against the store's value indices and
//! projects the matches through a [`FetchSpec`] into a [`ResultSet`]:
//!
//! 1. Each leaf filter probes the index of its key — a binary search for
//!    canonically monotone predicates, a linear bucket scan otherwise —
//!    and post-checks scope, side and source-winnership per candidate.
//! 2. Combiners apply set algebra, preserving first-seen order, which per
//!    leaf is value-sorted index order.
//! 3. Conditions binding the entry side group candidates by their A-side
//!    pair; otherwise every relation is its own row.
//! 4. Every row's entry is projected through the fetch spec; source
//!    preferences keep only minimum-priority attributes per key, ties in
//!    insertion order.
//!
//! Repeating a query on an unchanged store yields identical cells in
//! identical order.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::cond::{CombineOp, Condition, Filter, FilterOp, Scope};
use crate::fetch::{Fetch, FetchSpec, Projection};
use crate::result::{ResultItem, ResultSet};
use crate::store::{EntryKey, RelRef, Store};
use crate::strings::{LitId, StringTable};
use crate::value::Value;

/// Runs `cond` over the store and projects the matches through `spec`.
pub(crate) fn execute(
    store: &Store,
    strings: &StringTable,
    spec: &FetchSpec,
    cond: &Condition,
) -> ResultSet {
    let candidates = eval(store, strings, cond);
    trace!(candidates = candidates.len(), "condition evaluated");

    let rows: Vec<EntryKey> = if cond.binds_entry() {
        group_by_entry(store, &candidates)
    } else {
        candidates
            .iter()
            .filter_map(|&rel| store.relation(rel).map(|r| r.entry()))
            .collect()
    };

    let cells = rows
        .iter()
        .map(|&entry| project_entry(store, strings, spec, entry))
        .collect();
    ResultSet::new(spec.len(), cells)
}

// ------------------------------------------------------------------------------------------------
// Condition evaluation
// ------------------------------------------------------------------------------------------------

fn eval(store: &Store, strings: &StringTable, cond: &Condition) -> Vec<RelRef> {
    match cond {
        Condition::Filter(filter) => eval_filter(store, strings, filter),
        Condition::Combiner { op, operands } => match op {
            CombineOp::And => {
                let mut iter = operands.iter();
                let Some(first) = iter.next() else {
                    return Vec::new();
                };
                let mut result = eval(store, strings, first);
                for child in iter {
                    let keep: HashSet<RelRef> =
                        eval(store, strings, child).into_iter().collect();
                    result.retain(|rel| keep.contains(rel));
                }
                result
            }
            CombineOp::Or => {
                let mut seen = HashSet::new();
                let mut result = Vec::new();
                for child in operands {
                    for rel in eval(store, strings, child) {
                        if seen.insert(rel) {
                            result.push(rel);
                        }
                    }
                }
                result
            }
            CombineOp::Not => {
                let mut excluded = HashSet::new();
                for child in operands {
                    excluded.extend(eval(store, strings, child));
                }
                store
                    .all_refs()
                    .into_iter()
                    .filter(|rel| !excluded.contains(rel))
                    .collect()
            }
        },
    }
}

fn eval_filter(store: &Store, strings: &StringTable, filter: &Filter) -> Vec<RelRef> {
    let Some(key) = strings.lookup_str(&filter.key) else {
        return Vec::new();
    };
    let Some(index) = store.index(key) else {
        return Vec::new();
    };

    let probed = match (&filter.op, &filter.operand) {
        (FilterOp::Exists, _) => index.all(),
        (FilterOp::Equal, Some(operand)) if filter.canonically_monotone() => {
            index.search(|v| v.cmp(operand))
        }
        (FilterOp::Greater, Some(operand)) if filter.canonically_monotone() => {
            index.search(|v| range_cmp(v, operand, Ordering::Greater))
        }
        (FilterOp::Smaller, Some(operand)) if filter.canonically_monotone() => {
            index.search(|v| range_cmp(v, operand, Ordering::Less))
        }
        // Caseless, glob, token, custom and inequality predicates are not
        // monotone along the canonical bucket order.
        _ => index.scan(|v| filter.value_matches(v)),
    };

    probed
        .into_iter()
        .filter(|&rel| relation_matches(store, strings, filter, key, rel))
        .collect()
}

/// Monotone comparator selecting the `side` region of `operand`'s subtype.
///
/// Buckets outside the region compare `Less`/`Greater` consistently with
/// the canonical order, so the zero region stays contiguous.
fn range_cmp(value: &Value, operand: &Value, side: Ordering) -> Ordering {
    let same_type = value.is_int() == operand.is_int();
    match value.cmp(operand) {
        ordering if ordering == side && same_type => Ordering::Equal,
        ordering => ordering,
    }
}

/// Scope, side and source-winner checks for one index candidate.
///
/// The index bucket only proves that *some* side of the relation carries
/// the matched value under the key; the filter may bind one side only,
/// and a filter with a source preference accepts only relations that win
/// their (entry, key) pair by priority.
fn relation_matches(
    store: &Store,
    strings: &StringTable,
    filter: &Filter,
    key: LitId,
    rel: RelRef,
) -> bool {
    let Some(record) = store.relation(rel) else {
        return false;
    };

    if filter.scope != Scope::Property && record.key_a == key {
        if let Some(val_a) = strings.resolve(record.val_a) {
            if filter.value_matches(&val_a) {
                // Entry-scoped filters match the A-side pair as the entry
                // itself; no source competition applies.
                if filter.scope == Scope::Entry {
                    return true;
                }
                if wins_source(
                    store,
                    strings,
                    filter,
                    (record.key_b, record.val_b),
                    key,
                    record.src,
                ) {
                    return true;
                }
            }
        }
    }

    if filter.scope != Scope::Entry && record.key_b == key {
        if let Some(val_b) = strings.resolve(record.val_b) {
            if filter.value_matches(&val_b) {
                return wins_source(
                    store,
                    strings,
                    filter,
                    (record.key_a, record.val_a),
                    key,
                    record.src,
                );
            }
        }
    }

    false
}

/// True when `src` has the minimum priority among the attributes the
/// entry holds under `key` (or the filter carries no preference).
fn wins_source(
    store: &Store,
    strings: &StringTable,
    filter: &Filter,
    entry: EntryKey,
    key: LitId,
    src: LitId,
) -> bool {
    let Some(pref) = &filter.pref else {
        return true;
    };
    let best = store
        .entry_attributes(strings, entry)
        .into_iter()
        .filter(|&(attr_key, ..)| attr_key == key)
        .map(|(_, _, attr_src, _)| pref.priority(strings, attr_src))
        .min();
    match best {
        Some(best) => pref.priority(strings, src) == best,
        None => true,
    }
}

// ------------------------------------------------------------------------------------------------
// Grouping and projection
// ------------------------------------------------------------------------------------------------

/// Collapses candidates into distinct entries, first-seen order.
fn group_by_entry(store: &Store, candidates: &[RelRef]) -> Vec<EntryKey> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for &rel in candidates {
        if let Some(record) = store.relation(rel) {
            let entry = record.entry();
            if seen.insert(entry) {
                rows.push(entry);
            }
        }
    }
    rows
}

fn project_entry(
    store: &Store,
    strings: &StringTable,
    spec: &FetchSpec,
    entry: EntryKey,
) -> Vec<Vec<ResultItem>> {
    let attrs = store.entry_attributes(strings, entry);
    spec.projections()
        .iter()
        .map(|projection| project_one(strings, projection, &attrs))
        .collect()
}

fn project_one(
    strings: &StringTable,
    projection: &Projection,
    attrs: &[(LitId, LitId, LitId, RelRef)],
) -> Vec<ResultItem> {
    let wanted: Option<LitId> = match &projection.key {
        Some(key) => match strings.lookup_str(key) {
            Some(id) => Some(id),
            // A key that was never interned has no attributes anywhere.
            None => return Vec::new(),
        },
        None => None,
    };

    let mut selected: Vec<&(LitId, LitId, LitId, RelRef)> = attrs
        .iter()
        .filter(|(attr_key, ..)| wanted.is_none_or(|id| *attr_key == id))
        .collect();

    // With a source preference, keep only the minimum-priority attributes
    // for each key; ties all survive, in insertion order.
    if let Some(pref) = &projection.pref {
        let mut best: HashMap<LitId, u32> = HashMap::new();
        for (attr_key, _, attr_src, _) in &selected {
            let priority = pref.priority(strings, *attr_src);
            best.entry(*attr_key)
                .and_modify(|b| *b = (*b).min(priority))
                .or_insert(priority);
        }
        selected.retain(|(attr_key, _, attr_src, _)| {
            pref.priority(strings, *attr_src) == best[attr_key]
        });
    }

    selected
        .into_iter()
        .map(|&(attr_key, attr_val, attr_src, _)| {
            let key = projection
                .flags
                .contains(Fetch::KEY)
                .then(|| resolve_str(strings, attr_key))
                .flatten();
            let value = projection
                .flags
                .contains(Fetch::DATA)
                .then(|| strings.resolve(attr_val))
                .flatten();
            let src = projection
                .flags
                .contains(Fetch::SRC)
                .then(|| resolve_str(strings, attr_src))
                .flatten();
            ResultItem::new(key, value, src)
        })
        .collect()
}

fn resolve_str(strings: &StringTable, id: LitId) -> Option<Arc<str>> {
    match strings.resolve(id) {
        Some(Value::Str(s)) => Some(s),
        _ => None,
    }
}
