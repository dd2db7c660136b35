//! Scalar values stored in relations.
//!
//! A [`Value`] is either a 32-bit signed integer or an immutable string.
//! String payloads are shared via `Arc<str>`, so cloning a value is cheap
//! and the same text can be referenced from the store, the indices and a
//! result set without copying.
//!
//! ## Ordering
//!
//! The canonical comparator is an invariant of the value index: all
//! integers sort before all strings, integers numerically, strings by byte
//! comparison. The derived `Ord` below encodes exactly that (variant order
//! first, then content). A case-folded comparator exists for query
//! predicates only — it is *not* monotone along the canonical order and
//! must never be used to maintain or binary-search an index.


use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A tagged scalar: integer or string.
///
/// Canonical ordering is derived: `Int(_) < Str(_)`, integers numeric,
/// strings byte-wise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// A 32-bit signed integer.
    Int(i32),
    /// An immutable, shared string.
    Str(Arc<str>),
}

impl Value {
    /// Creates a new integer value.
    pub fn int(i: i32) -> Self {
        Value::Int(i)
    }

    /// Creates a new string value.
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Returns the integer content, or `None` for strings.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Str(_) => None,
        }
    }

    /// Returns the string content, or `None` for integers.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Int(_) => None,
            Value::Str(s) => Some(s),
        }
    }

    /// True when this value is an integer.
    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    /// True when this value is a string.
    pub fn is_str(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// Compares two values ignoring letter case in string content.
    ///
    /// Integers compare numerically; mixed types keep the canonical
    /// int-before-string order. Only filter predicates use this.
    pub fn cmp_caseless(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => cmp_str_caseless(a, b),
            (Value::Int(_), Value::Str(_)) => Ordering::Less,
            (Value::Str(_), Value::Int(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

/// Case-folded string comparison, one code point at a time.
///
/// Folds through `char::to_lowercase`, so multi-char expansions (e.g. 'İ')
/// compare by their full lowercase sequence.
pub(crate) fn cmp_str_caseless(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().flat_map(char::to_lowercase);
    let mut bi = b.chars().flat_map(char::to_lowercase);
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

/// True when `a` and `b` are equal under case folding.
pub(crate) fn eq_str_caseless(a: &str, b: &str) -> bool {
    cmp_str_caseless(a, b) == Ordering::Equal
}
