//! The database handle.
//!
//! [`Database::open`] wires the whole engine together: it loads the
//! snapshot, opens and redoes the circular log, optionally verifies every
//! in-memory invariant, and starts the background sync thread. The handle
//! hands out [`Transaction`]s for all reads and writes and is shared
//! freely across threads.
//!
//! ## Concurrency model
//!
//! Coarse locks, in acquisition order:
//!
//! 1. the database writer mutex — held from `begin` to `commit` of every
//!    writing transaction,
//! 2. the state `RwLock` over the store — readers hold it briefly per
//!    query; commit holds it in write mode across log append and apply so
//!    effects become visible atomically,
//! 3. the log mutex (inside the state lock),
//! 4. the string-table and source-pref cache mutexes.
//!
//! ## Files
//!
//! `<path>` is the snapshot, `<path>.log` the write-ahead log. The log
//! file carries an exclusive advisory lock for the lifetime of the
//! handle; the snapshot file is locked while it is rewritten or loaded.

#[cfg(test)]
mod tests;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::{info, warn};

use crate::snapshot::{self, SnapshotError, SyncThread};
use crate::store::{Store, StoreError};
use crate::strings::StringTable;
use crate::txn::{Transaction, TxnFlags};
use crate::wal::{DEFAULT_LOG_SIZE, Wal, WalError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by database operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DbError {
    /// The database does not exist and the open mode required it to.
    #[error("database does not exist")]
    NotFound,

    /// The database exists and the open mode required it not to.
    #[error("database already exists")]
    AlreadyExists,

    /// The snapshot file could not be opened.
    #[error("could not open database: {0}")]
    Open(#[source] io::Error),

    /// The log file could not be opened or created.
    #[error("could not open log: {0}")]
    LogOpen(#[source] WalError),

    /// Replaying the log failed.
    #[error("log redo failed: {0}")]
    LogRedo(#[source] WalError),

    /// The snapshot does not start with the expected magic.
    #[error("bad snapshot magic")]
    BadMagic,

    /// The snapshot was written by an unsupported format version.
    #[error("unsupported snapshot version {0}")]
    BadVersion(u32),

    /// An invariant or integrity check failed.
    #[error("database inconsistent: {0}")]
    Inconsistent(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write was attempted on a read-only handle or transaction.
    #[error("database or transaction is read-only")]
    ReadOnly,

    /// A del named a relation that is not in the store.
    #[error("relation is not in the store")]
    UnknownRelation,

    /// The log stayed full after a sync pass.
    #[error("log is full and could not be checkpointed")]
    LogFull,

    /// An earlier fatal I/O error poisoned the handle; writes are
    /// rejected.
    #[error("database handle is poisoned by an earlier I/O failure")]
    Poisoned,
}

impl From<SnapshotError> for DbError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::BadMagic => DbError::BadMagic,
            SnapshotError::BadVersion(v) => DbError::BadVersion(v),
            SnapshotError::ChecksumMismatch => {
                DbError::Inconsistent("snapshot checksum mismatch".into())
            }
            SnapshotError::DanglingLiteral(id) => {
                DbError::Inconsistent(format!("snapshot references unknown literal {id}"))
            }
            SnapshotError::Io(e) => DbError::Io(e),
            SnapshotError::Encoding(e) => DbError::Inconsistent(e.to_string()),
            SnapshotError::Wal(e) => DbError::from(e),
        }
    }
}

impl From<WalError> for DbError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io(e) => DbError::Io(e),
            other => DbError::Inconsistent(other.to_string()),
        }
    }
}

impl From<StoreError> for DbError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownRelation => DbError::UnknownRelation,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// How [`Database::open`] treats an existing or missing snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Create a fresh database; fail with [`DbError::AlreadyExists`] when
    /// the snapshot file exists.
    CreateNew,
    /// Open an existing database; fail with [`DbError::NotFound`] when it
    /// does not.
    OpenExisting,
    /// Open the database, creating it when absent.
    #[default]
    OpenOrCreate,
    /// Keep everything in memory; no files are touched.
    Memory,
}

/// Configuration for a [`Database`] handle.
#[derive(Debug, Clone)]
pub struct Config {
    /// Existence policy for the snapshot file.
    pub mode: OpenMode,

    /// Reject every write on this handle.
    pub read_only: bool,

    /// Run full invariant verification after load and redo.
    pub verify: bool,

    /// Run the background sync thread. Without it, sync passes run inline
    /// on close and when the log fills up.
    pub sync_thread: bool,

    /// Logical size of the circular log in bytes. An existing log keeps
    /// the size it was created with.
    pub log_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: OpenMode::OpenOrCreate,
            read_only: false,
            verify: false,
            sync_thread: true,
            log_size: DEFAULT_LOG_SIZE,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared internals
// ------------------------------------------------------------------------------------------------

/// State shared between the handle, its transactions and the sync thread.
pub(crate) struct DbShared {
    pub(crate) strings: StringTable,
    pub(crate) state: RwLock<Store>,
    /// Serialises writing transactions, begin to commit.
    pub(crate) writer: Mutex<()>,
    /// Serialises sync passes.
    pub(crate) sync_lock: Mutex<()>,
    pub(crate) wal: Option<Wal>,
    pub(crate) snapshot_path: Option<PathBuf>,
    pub(crate) read_only: bool,
    pub(crate) poisoned: AtomicBool,
}

impl DbShared {
    pub(crate) fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
        warn!("database handle poisoned");
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }
}

// ------------------------------------------------------------------------------------------------
// The handle
// ------------------------------------------------------------------------------------------------

/// An open database.
pub struct Database {
    pub(crate) shared: Arc<DbShared>,
    pub(crate) sync: Option<SyncThread>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens the database at `path` according to `config`.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Database, DbError> {
        let path = path.as_ref();
        if config.mode == OpenMode::Memory {
            let mut db = Self::memory();
            if config.read_only {
                // An empty read-only store: odd, but honoured.
                let shared = Arc::get_mut(&mut db.shared)
                    .ok_or_else(|| DbError::Inconsistent("fresh handle already shared".into()))?;
                shared.read_only = true;
            }
            return Ok(db);
        }

        let exists = path.exists();
        match config.mode {
            OpenMode::CreateNew if exists => return Err(DbError::AlreadyExists),
            OpenMode::OpenExisting if !exists => return Err(DbError::NotFound),
            _ => {}
        }

        let strings = StringTable::new();
        let mut store = Store::new();
        let snapshot_checkpoint = if exists {
            snapshot::load_snapshot(path, &strings, &mut store)?
        } else {
            0
        };

        let mut log_path = path.as_os_str().to_os_string();
        log_path.push(".log");
        let wal = Wal::open(&PathBuf::from(log_path), config.log_size).map_err(DbError::LogOpen)?;

        // A fresh log cannot continue an old snapshot's counter epoch; it
        // starts over and the next sync pass re-covers the loaded state.
        let checkpoint = if wal.is_fresh() { 0 } else { snapshot_checkpoint };
        wal.init(checkpoint);
        wal.redo(|list| list.replay(&mut store, &strings))
            .map_err(DbError::LogRedo)?;

        if config.verify {
            store.verify(&strings).map_err(DbError::Inconsistent)?;
        }

        let fresh_db = !exists;
        if fresh_db && !config.read_only {
            // An initial snapshot makes the database visible to a later
            // OpenExisting even if this process never syncs. It claims
            // coverage up to the last replayed record so a reopen does
            // not replay those transactions onto it a second time.
            snapshot::write_snapshot(path, &strings, &store, wal.last_logpoint())?;
        }

        let shared = Arc::new(DbShared {
            strings,
            state: RwLock::new(store),
            writer: Mutex::new(()),
            sync_lock: Mutex::new(()),
            wal: Some(wal),
            snapshot_path: Some(path.to_path_buf()),
            read_only: config.read_only,
            poisoned: AtomicBool::new(false),
        });

        let sync = if config.sync_thread && !config.read_only {
            Some(SyncThread::spawn(Arc::clone(&shared))?)
        } else {
            None
        };

        info!(path = %path.display(), mode = ?config.mode, "database opened");
        Ok(Database { shared, sync })
    }

    /// Opens a purely in-memory database; nothing is persisted.
    pub fn memory() -> Database {
        Database {
            shared: Arc::new(DbShared {
                strings: StringTable::new(),
                state: RwLock::new(Store::new()),
                writer: Mutex::new(()),
                sync_lock: Mutex::new(()),
                wal: None,
                snapshot_path: None,
                read_only: false,
                poisoned: AtomicBool::new(false),
            }),
            sync: None,
        }
    }

    /// Starts a transaction.
    ///
    /// Writing transactions serialise on the database writer mutex until
    /// commit or abort; read-only transactions only touch the reader lock.
    pub fn begin(&self, flags: TxnFlags) -> Result<Transaction<'_>, DbError> {
        Transaction::begin(self, flags)
    }

    /// Flushes everything and shuts the handle down cleanly.
    ///
    /// Stops the sync thread, runs a final sync pass so the snapshot
    /// covers every committed transaction, and releases the file locks.
    pub fn close(mut self) -> Result<(), DbError> {
        if let Some(sync) = self.sync.take() {
            sync.shutdown();
        }
        if !self.shared.read_only && !self.shared.is_poisoned() {
            snapshot::sync_pass(&self.shared)?;
        }
        info!("database closed");
        Ok(())
    }

    /// Checks every store, index and string-table invariant.
    pub fn verify(&self) -> Result<(), DbError> {
        let store = self
            .shared
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        store
            .verify(&self.shared.strings)
            .map_err(DbError::Inconsistent)
    }

    /// Number of distinct relations currently stored.
    pub fn relation_count(&self) -> usize {
        self.shared
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // A handle dropped without close still stops its thread; the
        // final sync is skipped, so the log alone carries recent commits.
        if let Some(sync) = self.sync.take() {
            sync.shutdown();
        }
    }
}
