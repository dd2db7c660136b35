//! Fetch specifications.
//!
//! A [`FetchSpec`] is an ordered list of projections applied to every
//! matched entry: each projection names a key to fetch (or `None` for
//! every attribute), an optional source preference that picks winners
//! when a key has values from several sources, and flags selecting which
//! of the value, the key and the source end up in the result items.


use std::ops::BitOr;
use std::sync::Arc;

use crate::sourcepref::SourcePreference;

/// What a projection places into its result items. Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetch(u32);

impl Fetch {
    /// Return the value field.
    pub const DATA: Fetch = Fetch(1);
    /// Return the key.
    pub const KEY: Fetch = Fetch(1 << 1);
    /// Return the source.
    pub const SRC: Fetch = Fetch(1 << 2);
    /// Everything.
    pub const ALL: Fetch = Fetch(0b111);

    /// True when every flag in `other` is set in `self`.
    pub fn contains(self, other: Fetch) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Fetch {
    type Output = Fetch;

    fn bitor(self, rhs: Fetch) -> Fetch {
        Fetch(self.0 | rhs.0)
    }
}

/// One projection of a fetch specification.
pub(crate) struct Projection {
    pub(crate) key: Option<String>,
    pub(crate) pref: Option<Arc<SourcePreference>>,
    pub(crate) flags: Fetch,
}

/// An ordered list of projections.
#[derive(Default)]
pub struct FetchSpec {
    projections: Vec<Projection>,
}

impl FetchSpec {
    /// Creates an empty specification.
    pub fn new() -> Self {
        FetchSpec::default()
    }

    /// Appends a projection.
    ///
    /// A `None` key fetches every attribute of the matched entry.
    pub fn add(
        &mut self,
        key: Option<&str>,
        pref: Option<Arc<SourcePreference>>,
        flags: Fetch,
    ) -> &mut Self {
        self.projections.push(Projection {
            key: key.map(str::to_string),
            pref,
            flags,
        });
        self
    }

    /// Number of projections — the column count of every result set this
    /// spec produces.
    pub fn len(&self) -> usize {
        self.projections.len()
    }

    /// True when the spec projects nothing.
    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    pub(crate) fn projections(&self) -> &[Projection] {
        &self.projections
    }
}
