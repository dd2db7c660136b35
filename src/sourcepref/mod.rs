//! Source preferences.
//!
//! A [`SourcePreference`] ranks source strings by an ordered list of glob
//! patterns: the priority of a source is the index of the first pattern
//! that matches it, or [`SourcePreference::NO_MATCH`] when none does.
//! Lower is better. Priorities are memoised per interned source id; the
//! cache is a hint and is keyed by id, so it never outlives the ids it
//! caches.
//!
//! Preferences are shared between filters and fetch specs via `Arc`.


use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use glob::{Pattern, PatternError};
use thiserror::Error;

use crate::strings::{LitId, StringTable};
use crate::value::Value;

/// Errors building a source preference.
#[derive(Debug, Error)]
pub enum SourcePrefError {
    /// One of the source patterns failed to compile.
    #[error("invalid source pattern `{pattern}`: {source}")]
    BadPattern {
        /// The offending pattern text.
        pattern: String,
        /// The underlying glob error.
        source: PatternError,
    },
}

/// An ordered set of glob patterns ranking sources by priority.
#[derive(Debug)]
pub struct SourcePreference {
    patterns: Vec<Pattern>,
    cache: Mutex<HashMap<LitId, u32>>,
}

impl SourcePreference {
    /// Priority assigned to sources no pattern matches.
    pub const NO_MATCH: u32 = u32::MAX;

    /// Compiles `sources` into a preference, best-first.
    pub fn new<S: AsRef<str>>(sources: &[S]) -> Result<Self, SourcePrefError> {
        let mut patterns = Vec::with_capacity(sources.len());
        for src in sources {
            let src = src.as_ref();
            let pattern = Pattern::new(src).map_err(|source| SourcePrefError::BadPattern {
                pattern: src.to_string(),
                source,
            })?;
            patterns.push(pattern);
        }
        Ok(SourcePreference {
            patterns,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Priority of the interned source `src`; lower wins.
    pub(crate) fn priority(&self, strings: &StringTable, src: LitId) -> u32 {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&priority) = cache.get(&src) {
            return priority;
        }
        let priority = match strings.resolve(src) {
            Some(Value::Str(name)) => self.priority_of(&name),
            _ => Self::NO_MATCH,
        };
        cache.insert(src, priority);
        priority
    }

    /// Priority of a raw source name, bypassing the cache.
    pub fn priority_of(&self, name: &str) -> u32 {
        for (i, pattern) in self.patterns.iter().enumerate() {
            if pattern.matches(name) {
                return i as u32;
            }
        }
        Self::NO_MATCH
    }
}
