//! Condition trees.
//!
//! A query condition is an immutable tree of filters and combiners built
//! by the client and handed to the query engine. Filters compare one key's
//! values against an operand under a comparator mode and a match scope;
//! combiners apply AND/OR/NOT set algebra over their children.
//!
//! A filter that carries a source preference only matches relations that
//! are source-winners for their (entry, key) pair — the query engine
//! enforces that part; this module owns the pure value predicates.


use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use tracing::warn;

use crate::sourcepref::SourcePreference;
use crate::value::{Value, eq_str_caseless};

/// Filter operators.
#[derive(Clone)]
pub enum FilterOp {
    /// Value equals the operand.
    Equal,
    /// Value differs from the operand.
    NotEqual,
    /// Value is strictly greater than the operand (same subtype only).
    Greater,
    /// Value is strictly smaller than the operand (same subtype only).
    Smaller,
    /// String value matches the operand glob pattern.
    Match,
    /// The key exists on the entry, any value.
    Exists,
    /// Any whitespace token of the string value equals the operand.
    Token,
    /// User-supplied predicate over the value.
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl fmt::Debug for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::Equal => write!(f, "Equal"),
            FilterOp::NotEqual => write!(f, "NotEqual"),
            FilterOp::Greater => write!(f, "Greater"),
            FilterOp::Smaller => write!(f, "Smaller"),
            FilterOp::Match => write!(f, "Match"),
            FilterOp::Exists => write!(f, "Exists"),
            FilterOp::Token => write!(f, "Token"),
            FilterOp::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Comparator mode for string content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CmpMode {
    /// Byte-wise comparison (the canonical order).
    #[default]
    Binary,
    /// Case-folded comparison. Query predicates only — not monotone along
    /// the canonical index order.
    Caseless,
}

/// Which side of a relation a filter binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Either side.
    #[default]
    Any,
    /// The A-side pair — the entry itself. Conditions binding this side
    /// group query rows by entry.
    Entry,
    /// The B-side pair — a property of the entry.
    Property,
}

/// Combiner operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOp {
    /// Intersection of the operands.
    And,
    /// Union of the operands.
    Or,
    /// Complement of the union of the operands.
    Not,
}

/// A leaf filter.
pub struct Filter {
    pub(crate) op: FilterOp,
    pub(crate) key: String,
    pub(crate) operand: Option<Value>,
    pub(crate) pref: Option<Arc<SourcePreference>>,
    pub(crate) mode: CmpMode,
    pub(crate) scope: Scope,
    /// Compiled glob for `FilterOp::Match`, built once at construction.
    pattern: Option<Pattern>,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("op", &self.op)
            .field("key", &self.key)
            .field("operand", &self.operand)
            .field("mode", &self.mode)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A composable predicate tree.
#[derive(Debug)]
pub enum Condition {
    /// A leaf filter.
    Filter(Filter),
    /// A combiner over child conditions.
    Combiner {
        /// The set operation.
        op: CombineOp,
        /// Child conditions, evaluated left to right.
        operands: Vec<Condition>,
    },
}

impl Condition {
    /// Builds a leaf filter condition.
    ///
    /// `operand` is ignored by [`FilterOp::Exists`] and
    /// [`FilterOp::Custom`]. A `Match` operand that fails to compile as a
    /// glob is logged and matches nothing.
    pub fn filter(
        op: FilterOp,
        key: impl Into<String>,
        operand: Option<Value>,
        pref: Option<Arc<SourcePreference>>,
        mode: CmpMode,
        scope: Scope,
    ) -> Condition {
        let pattern = match (&op, &operand) {
            (FilterOp::Match, Some(Value::Str(text))) => match Pattern::new(text) {
                Ok(pattern) => Some(pattern),
                Err(error) => {
                    warn!(pattern = %text, %error, "unparsable match pattern, filter matches nothing");
                    None
                }
            },
            _ => None,
        };
        Condition::Filter(Filter {
            op,
            key: key.into(),
            operand,
            pref,
            mode,
            scope,
            pattern,
        })
    }

    /// Shorthand for an equality filter with default mode and scope.
    pub fn equal(key: impl Into<String>, operand: Value) -> Condition {
        Condition::filter(FilterOp::Equal, key, Some(operand), None, CmpMode::Binary, Scope::Any)
    }

    /// Builds an empty combiner; populate it with [`Condition::add_operand`].
    pub fn combiner(op: CombineOp) -> Condition {
        Condition::Combiner {
            op,
            operands: Vec::new(),
        }
    }

    /// Appends a child to a combiner. No-op with a warning on a filter.
    pub fn add_operand(&mut self, cond: Condition) {
        match self {
            Condition::Combiner { operands, .. } => operands.push(cond),
            Condition::Filter(_) => warn!("add_operand on a filter condition ignored"),
        }
    }

    /// AND of `operands`.
    pub fn and(operands: Vec<Condition>) -> Condition {
        Condition::Combiner {
            op: CombineOp::And,
            operands,
        }
    }

    /// OR of `operands`.
    pub fn or(operands: Vec<Condition>) -> Condition {
        Condition::Combiner {
            op: CombineOp::Or,
            operands,
        }
    }

    /// Complement of `operand`.
    pub fn not(operand: Condition) -> Condition {
        Condition::Combiner {
            op: CombineOp::Not,
            operands: vec![operand],
        }
    }

    /// True when any filter in the tree binds the entry side; such
    /// conditions group query rows by entry.
    pub(crate) fn binds_entry(&self) -> bool {
        match self {
            Condition::Filter(filter) => filter.scope == Scope::Entry,
            Condition::Combiner { operands, .. } => operands.iter().any(Condition::binds_entry),
        }
    }
}

impl Filter {
    /// Applies the pure value predicate of this filter.
    pub(crate) fn value_matches(&self, value: &Value) -> bool {
        match &self.op {
            FilterOp::Equal => self.cmp_operand(value) == Some(Ordering::Equal),
            FilterOp::NotEqual => {
                matches!(self.cmp_operand(value), Some(o) if o != Ordering::Equal)
            }
            FilterOp::Greater => match (&self.operand, value) {
                (Some(Value::Int(op)), Value::Int(v)) => v > op,
                (Some(Value::Str(_)), Value::Str(_)) => {
                    self.cmp_operand(value) == Some(Ordering::Greater)
                }
                _ => false,
            },
            FilterOp::Smaller => match (&self.operand, value) {
                (Some(Value::Int(op)), Value::Int(v)) => v < op,
                (Some(Value::Str(_)), Value::Str(_)) => {
                    self.cmp_operand(value) == Some(Ordering::Less)
                }
                _ => false,
            },
            FilterOp::Match => match (&self.pattern, value) {
                (Some(pattern), Value::Str(text)) => pattern.matches_with(text, MatchOptions {
                    case_sensitive: self.mode == CmpMode::Binary,
                    ..MatchOptions::default()
                }),
                _ => false,
            },
            FilterOp::Exists => true,
            FilterOp::Token => match (&self.operand, value) {
                (Some(Value::Str(token)), Value::Str(text)) => text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                    .any(|t| match self.mode {
                        CmpMode::Binary => t == token.as_ref(),
                        CmpMode::Caseless => eq_str_caseless(t, token),
                    }),
                _ => false,
            },
            FilterOp::Custom(pred) => (**pred)(value),
        }
    }

    /// Canonical or case-folded comparison against the operand.
    fn cmp_operand(&self, value: &Value) -> Option<Ordering> {
        let operand = self.operand.as_ref()?;
        Some(match self.mode {
            CmpMode::Binary => value.cmp(operand),
            CmpMode::Caseless => value.cmp_caseless(operand),
        })
    }

    /// True when the predicate is monotone along the canonical order and
    /// may drive a binary search.
    pub(crate) fn canonically_monotone(&self) -> bool {
        matches!(
            self.op,
            FilterOp::Equal | FilterOp::Greater | FilterOp::Smaller
        ) && self.mode == CmpMode::Binary
    }
}
