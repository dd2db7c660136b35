//! # quintet
//!
//! An embeddable, transactional store of **quintuple relations**
//! `(key_a, val_a, key_b, val_b, src)` for media metadata — titles,
//! artists, paths and friends, each annotated with the source that
//! produced it. Designed as an in-process library with crash-safe
//! durability.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      Database                          │
//! │  ┌────────────┐   ┌─────────────┐   ┌──────────────┐  │
//! │  │  String     │   │  Relation   │   │  Value       │  │
//! │  │  Table      │◄──┤  Store      ├──►│  Indices     │  │
//! │  │ (intern ids)│   │ (refcounted)│   │ (per key)    │  │
//! │  └────────────┘   └──────┬──────┘   └──────┬───────┘  │
//! │                          │ commit          │ query     │
//! │  ┌───────────────────────┴─────────────────┴────────┐ │
//! │  │   Transactions (oplist) → circular WAL → apply   │ │
//! │  └───────────────────────┬──────────────────────────┘ │
//! │                          │ checkpoint                  │
//! │  ┌───────────────────────┴──────────────────────────┐ │
//! │  │   Sync thread → snapshot file (tmp + rename)     │ │
//! │  └──────────────────────────────────────────────────┘ │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | The handle — open, close, begin, verify |
//! | [`txn`] | Transactions: batched add/del, commit, abort |
//! | [`query`] | Condition execution, grouping and projection |
//! | [`cond`] | Filter and combiner condition trees |
//! | [`fetch`] | Fetch specifications (what a query returns) |
//! | [`result`] | Result sets — row-major matrices of items |
//! | [`sourcepref`] | Glob-ranked source preferences |
//! | [`value`] | The `Int` / `Str` scalar type |
//! | [`strings`] | The literal intern table |
//! | [`store`] | Refcounted relation records |
//! | [`index`] | Value-ordered per-key indices |
//! | [`oplist`] | Tagged operation batches |
//! | [`wal`] | The circular write-ahead log |
//! | [`snapshot`] | Snapshot persistence and the sync pass |
//! | [`encoding`] | Little-endian wire primitives |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every commit is appended to a bounded
//!   circular log before it is applied, so a crash replays cleanly.
//! - **Checkpointed snapshots** — a background thread rewrites the
//!   snapshot file and frees log space without blocking readers.
//! - **Value-ordered indices** — per-key buckets support equality, range
//!   and pattern filters with deterministic result order.
//! - **Source provenance** — every relation carries its source, and
//!   glob-ranked preferences decide which source wins a conflict.
//! - **Interned literals** — all hot-path comparisons are 32-bit id
//!   comparisons.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quintet::db::{Config, Database};
//! use quintet::cond::{CmpMode, Condition, FilterOp, Scope};
//! use quintet::fetch::{Fetch, FetchSpec};
//! use quintet::txn::TxnFlags;
//! use quintet::value::Value;
//!
//! let db = Database::open("/tmp/media.db", Config::default()).unwrap();
//!
//! // Write
//! let mut tx = db.begin(TxnFlags::default()).unwrap();
//! tx.add("entry", &Value::str("song-1"),
//!        "title", &Value::str("Ashes of Pompeii"), "scanner").unwrap();
//! tx.commit().unwrap();
//!
//! // Query
//! let mut spec = FetchSpec::new();
//! spec.add(Some("title"), None, Fetch::DATA | Fetch::SRC);
//! let cond = Condition::filter(
//!     FilterOp::Equal,
//!     "entry",
//!     Some(Value::str("song-1")),
//!     None,
//!     CmpMode::Binary,
//!     Scope::Entry,
//! );
//! let tx = db.begin(TxnFlags::read_only()).unwrap();
//! let set = tx.query(&spec, &cond).unwrap();
//! assert_eq!(set.row_count(), 1);
//! drop(tx);
//!
//! // Graceful shutdown
//! db.close().unwrap();
//! ```

pub mod cond;
pub mod db;
pub mod encoding;
pub mod fetch;
pub mod index;
pub mod oplist;
pub mod query;
pub mod result;
pub mod snapshot;
pub mod sourcepref;
pub mod store;
pub mod strings;
pub mod txn;
pub mod value;
pub mod wal;

pub use cond::{CmpMode, CombineOp, Condition, FilterOp, Scope};
pub use db::{Config, Database, DbError, OpenMode};
pub use fetch::{Fetch, FetchSpec};
pub use result::{ResultItem, ResultSet};
pub use sourcepref::SourcePreference;
pub use txn::{Transaction, TxnFlags};
pub use value::Value;
