//! Transactions.
//!
//! A [`Transaction`] is a scoped mutation context. Writing transactions
//! hold the database writer mutex from `begin` until commit or abort, so
//! writers are fully serialised; their mutations are batched into an
//! oplist and validated against committed state plus the transaction's
//! own pending effects. Commit appends the oplist to the log (BEGIN … ops
//! … END) and applies it to the store under the state write lock, making
//! all effects visible atomically; abort — or dropping the transaction —
//! discards the batch.
//!
//! Queries always read committed state under the reader lock and their
//! result sets remain valid after the transaction ends.
//!
//! When the log is full, commit signals the sync thread and blocks on the
//! space condvar; if no thread runs (or it cannot keep up), the sync pass
//! runs inline on the committing thread.


use std::collections::HashMap;
use std::sync::{MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::cond::Condition;
use crate::db::{Database, DbError};
use crate::fetch::FetchSpec;
use crate::oplist::{ModOp, OpList};
use crate::query;
use crate::result::ResultSet;
use crate::snapshot;
use crate::value::Value;
use crate::wal::Append;

/// How long one wait on the space condvar lasts before the committer
/// falls back to an inline sync pass.
const SPACE_WAIT: Duration = Duration::from_secs(2);

/// Attempts before a commit gives up on a log that stays full.
const FULL_RETRIES: usize = 3;

/// Transaction flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxnFlags {
    /// Fsync the log before commit returns.
    pub sync: bool,
    /// Reject add and del on this transaction.
    pub read_only: bool,
}

impl TxnFlags {
    /// A durable transaction: the log is fsynced at commit.
    pub fn durable() -> TxnFlags {
        TxnFlags {
            sync: true,
            read_only: false,
        }
    }

    /// A read-only transaction.
    pub fn read_only() -> TxnFlags {
        TxnFlags {
            sync: false,
            read_only: true,
        }
    }
}

type OverlayKey = (String, Value, String, Value, String);

/// A scoped mutation and query context.
///
/// Dropping an uncommitted transaction aborts it.
pub struct Transaction<'db> {
    db: &'db Database,
    flags: TxnFlags,
    list: OpList,
    /// Pending refcount deltas per quintuple, for del validation against
    /// this transaction's own uncommitted adds.
    overlay: HashMap<OverlayKey, i64>,
    writer: Option<MutexGuard<'db, ()>>,
    committed: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn begin(db: &'db Database, flags: TxnFlags) -> Result<Transaction<'db>, DbError> {
        let writes_allowed = !flags.read_only && !db.shared.read_only;
        if writes_allowed && db.shared.is_poisoned() {
            return Err(DbError::Poisoned);
        }
        let writer = if writes_allowed {
            Some(
                db.shared
                    .writer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            )
        } else {
            None
        };
        trace!(read_only = writer.is_none(), "transaction begun");
        Ok(Transaction {
            db,
            flags,
            list: OpList::new(),
            overlay: HashMap::new(),
            writer,
            committed: false,
        })
    }

    /// Queues one add of the quintuple.
    pub fn add(
        &mut self,
        key_a: &str,
        val_a: &Value,
        key_b: &str,
        val_b: &Value,
        src: &str,
    ) -> Result<(), DbError> {
        self.check_writable()?;
        self.list.push_add(ModOp {
            key_a: key_a.to_string(),
            val_a: val_a.clone(),
            key_b: key_b.to_string(),
            val_b: val_b.clone(),
            src: src.to_string(),
        });
        *self.overlay_entry(key_a, val_a, key_b, val_b, src) += 1;
        Ok(())
    }

    /// Queues one del of the quintuple.
    ///
    /// Fails with [`DbError::UnknownRelation`] when neither committed
    /// state nor this transaction's pending adds hold an occurrence; the
    /// transaction stays usable.
    pub fn del(
        &mut self,
        key_a: &str,
        val_a: &Value,
        key_b: &str,
        val_b: &Value,
        src: &str,
    ) -> Result<(), DbError> {
        self.check_writable()?;

        let committed = {
            let store = self
                .db
                .shared
                .state
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            store.refcount(&self.db.shared.strings, key_a, val_a, key_b, val_b, src) as i64
        };
        let pending = self
            .overlay
            .get(&overlay_key(key_a, val_a, key_b, val_b, src))
            .copied()
            .unwrap_or(0);
        if committed + pending <= 0 {
            warn!(key_a, key_b, src, "del of relation with no occurrences");
            return Err(DbError::UnknownRelation);
        }

        self.list.push_del(ModOp {
            key_a: key_a.to_string(),
            val_a: val_a.clone(),
            key_b: key_b.to_string(),
            val_b: val_b.clone(),
            src: src.to_string(),
        });
        *self.overlay_entry(key_a, val_a, key_b, val_b, src) -= 1;
        Ok(())
    }

    /// Runs a query against committed state.
    pub fn query(&self, spec: &FetchSpec, cond: &Condition) -> Result<ResultSet, DbError> {
        let store = self
            .db
            .shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(query::execute(&store, &self.db.shared.strings, spec, cond))
    }

    /// Commits the batch: log first, then apply, then release the writer.
    pub fn commit(mut self) -> Result<(), DbError> {
        if self.list.is_empty() {
            self.committed = true;
            return Ok(());
        }

        let shared = &self.db.shared;
        let mut attempts = 0;
        loop {
            let mut store = shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);

            let logged = match &shared.wal {
                Some(wal) => match wal.append(&self.list, self.flags.sync) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        shared.poison();
                        return Err(err.into());
                    }
                },
                None => Append::Written {
                    sync_hint: false,
                    synced: None,
                },
            };

            match logged {
                Append::Written { sync_hint, .. } => {
                    if let Err(err) = self.list.apply(&mut store, &shared.strings) {
                        // The log already carries the batch; the store no
                        // longer matches it.
                        shared.poison();
                        return Err(err.into());
                    }
                    drop(store);
                    if sync_hint {
                        if let Some(sync) = &self.db.sync {
                            sync.signal();
                        }
                    }
                    self.committed = true;
                    trace!(ops = self.list.len(), "transaction committed");
                    return Ok(());
                }
                Append::Full => {
                    drop(store);
                    attempts += 1;
                    if attempts > FULL_RETRIES {
                        return Err(DbError::LogFull);
                    }
                    self.wait_for_log_space()?;
                }
            }
        }
    }

    /// Discards the batch.
    pub fn abort(mut self) {
        self.committed = true;
        debug!(ops = self.list.len(), "transaction aborted");
    }

    /// Blocks until a checkpoint frees room for this batch, syncing
    /// inline when the background thread cannot.
    fn wait_for_log_space(&self) -> Result<(), DbError> {
        let shared = &self.db.shared;
        let Some(wal) = &shared.wal else {
            return Ok(());
        };
        let needed = wal.estimate(&self.list);
        debug!(needed, "log full, waiting for checkpoint");

        if let Some(sync) = &self.db.sync {
            sync.signal();
            if wal.wait_for_space(needed, SPACE_WAIT) {
                return Ok(());
            }
        }
        snapshot::sync_pass(shared)?;
        Ok(())
    }

    fn check_writable(&self) -> Result<(), DbError> {
        if self.writer.is_none() {
            warn!("write on a read-only transaction");
            return Err(DbError::ReadOnly);
        }
        if self.db.shared.is_poisoned() {
            return Err(DbError::Poisoned);
        }
        Ok(())
    }

    fn overlay_entry(
        &mut self,
        key_a: &str,
        val_a: &Value,
        key_b: &str,
        val_b: &Value,
        src: &str,
    ) -> &mut i64 {
        self.overlay
            .entry(overlay_key(key_a, val_a, key_b, val_b, src))
            .or_insert(0)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.list.is_empty() {
            debug!(ops = self.list.len(), "uncommitted transaction dropped");
        }
    }
}

fn overlay_key(
    key_a: &str,
    val_a: &Value,
    key_b: &str,
    val_b: &Value,
    src: &str,
) -> OverlayKey {
    (
        key_a.to_string(),
        val_a.clone(),
        key_b.to_string(),
        val_b.clone(),
        src.to_string(),
    )
}
