//! Snapshot persistence and the background sync pass.
//!
//! The snapshot file is a full dump of the string table and the relation
//! store as of one log counter. Together with the log tail after that
//! counter it reconstructs the exact committed state.
//!
//! # On-disk layout
//!
//! ```text
//! [magic "S4\0"][u32 version][u64 last-checkpoint]
//! [u32 count] string records:   (u32 id, i32 len, bytes…)   len = -1 → i32
//! [u32 count] relation records: (u32 ka_id, i32 va_len, va,
//!                                u32 kb_id, i32 vb_len, vb, u32 src_id)
//! [u32 crc32 of everything above]
//! ```
//!
//! All integers little-endian. A relation with refcount *n* is written
//! *n* times; reload rebuilds the counts through the ordinary add path.
//!
//! # Sync pass
//!
//! A pass stamps a `WRITING` marker into the log under the state read
//! lock — so the marker and the serialised state correspond exactly —
//! writes the snapshot to `<path>.tmp`, fsyncs, renames it over `<path>`
//! while holding the snapshot file lock, fsyncs the directory, and
//! finally logs `CHECKPOINT(marker)`, which frees log space and wakes any
//! writer blocked on a full log.
//!
//! The background thread wakes on a channel message; the handle signals
//! it when more than half the log is unchecked and shuts it down on
//! close. Without the thread, the same pass runs inline.


use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use crc32fast::Hasher as Crc32;
use crossbeam::channel::{Sender, unbounded};
use fs2::FileExt;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::DbShared;
use crate::encoding::{self, Encode};
use crate::oplist::OpList;
use crate::store::Store;
use crate::strings::{LitId, StringTable};
use crate::value::Value;
use crate::wal::{Append, WalError};

/// Snapshot file magic.
pub const MAGIC: [u8; 3] = *b"S4\0";

/// Snapshot format version.
pub const VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] encoding::EncodingError),

    /// Log error during the sync pass.
    #[error("log error: {0}")]
    Wal(#[from] WalError),

    /// The file does not start with the snapshot magic.
    #[error("bad snapshot magic")]
    BadMagic,

    /// The snapshot was written by an unsupported format version.
    #[error("unsupported snapshot version {0}")]
    BadVersion(u32),

    /// The body checksum did not match.
    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,

    /// A relation referenced a literal id missing from the table section.
    #[error("snapshot references unknown literal {0}")]
    DanglingLiteral(u32),
}

// ------------------------------------------------------------------------------------------------
// Writing
// ------------------------------------------------------------------------------------------------

/// Serialises the table and store, covering the log up to `checkpoint`.
fn encode_snapshot(strings: &StringTable, store: &Store, checkpoint: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    MAGIC.encode_to(&mut buf);
    VERSION.encode_to(&mut buf);
    checkpoint.encode_to(&mut buf);

    let entries = strings.entries();
    (entries.len() as u32).encode_to(&mut buf);
    for (id, value, _) in &entries {
        id.raw().encode_to(&mut buf);
        put_sized_value(value, &mut buf);
    }

    let total: u32 = store.records().map(|r| r.count()).sum();
    total.encode_to(&mut buf);
    for record in store.records() {
        for _ in 0..record.count() {
            record.key_a.raw().encode_to(&mut buf);
            put_resolved(strings, record.val_a, &mut buf);
            record.key_b.raw().encode_to(&mut buf);
            put_resolved(strings, record.val_b, &mut buf);
            record.src.raw().encode_to(&mut buf);
        }
    }

    let mut hasher = Crc32::new();
    hasher.update(&buf);
    hasher.finalize().encode_to(&mut buf);
    buf
}

/// Writes `(i32 len, bytes)` for strings, `(-1, i32)` for integers.
fn put_sized_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            (-1i32).encode_to(buf);
            i.encode_to(buf);
        }
        Value::Str(s) => {
            (s.len() as i32).encode_to(buf);
            encoding::put_bytes(s.as_bytes(), buf);
        }
    }
}

fn put_resolved(strings: &StringTable, id: LitId, buf: &mut Vec<u8>) {
    match strings.resolve(id) {
        Some(value) => put_sized_value(&value, buf),
        // A live record always resolves; keep the layout decodable anyway.
        None => put_sized_value(&Value::str(""), buf),
    }
}

/// Atomically replaces the snapshot at `path`.
///
/// Writes to `<path>.tmp`, fsyncs, takes the snapshot file lock, renames
/// over `path` and fsyncs the parent directory.
pub(crate) fn write_snapshot(
    path: &Path,
    strings: &StringTable,
    store: &Store,
    checkpoint: u64,
) -> Result<(), SnapshotError> {
    let body = encode_snapshot(strings, store, checkpoint);

    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_os);
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(&body)?;
    tmp.sync_all()?;
    drop(tmp);

    // The snapshot lock excludes a concurrent reader's load while the
    // file is replaced.
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    lock_file.lock_exclusive()?;
    std::fs::rename(&tmp_path, path)?;
    fs2::FileExt::unlock(&lock_file)?;
    drop(lock_file);

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            dir.sync_all()?;
        }
    }

    debug!(path = %path.display(), checkpoint, bytes = body.len(), "snapshot written");
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Loading
// ------------------------------------------------------------------------------------------------

/// Loads the snapshot at `path` into an empty table and store.
///
/// Returns the checkpoint counter recovery should resume from.
pub(crate) fn load_snapshot(
    path: &Path,
    strings: &StringTable,
    store: &mut Store,
) -> Result<u64, SnapshotError> {
    let file = File::open(path)?;
    file.lock_shared()?;
    // Safety: the mapping is read-only and the snapshot lock excludes the
    // sync pass's rename while the map is alive.
    let mmap = unsafe { Mmap::map(&file)? };
    let result = decode_snapshot(&mmap, strings, store);
    fs2::FileExt::unlock(&file)?;
    result
}

fn decode_snapshot(
    buf: &[u8],
    strings: &StringTable,
    store: &mut Store,
) -> Result<u64, SnapshotError> {
    if buf.len() < MAGIC.len() + 4 + 8 + 4 {
        return Err(SnapshotError::BadMagic);
    }

    let (body, crc_bytes) = buf.split_at(buf.len() - 4);
    let mut offset = 0usize;
    let stored_crc: u32 = encoding::decode_at(crc_bytes, &mut 0)?;
    let mut hasher = Crc32::new();
    hasher.update(body);
    if hasher.finalize() != stored_crc {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let magic: [u8; 3] = encoding::decode_at(body, &mut offset)?;
    if magic != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version: u32 = encoding::decode_at(body, &mut offset)?;
    if version != VERSION {
        return Err(SnapshotError::BadVersion(version));
    }
    let checkpoint: u64 = encoding::decode_at(body, &mut offset)?;

    let string_count: u32 = encoding::decode_at(body, &mut offset)?;
    for _ in 0..string_count {
        let raw_id: u32 = encoding::decode_at(body, &mut offset)?;
        let value = take_sized_value(body, &mut offset)?;
        strings.restore(LitId::from_raw(raw_id), value);
    }

    let relation_count: u32 = encoding::decode_at(body, &mut offset)?;
    for _ in 0..relation_count {
        let key_a = take_key(body, &mut offset, strings)?;
        let val_a = take_sized_value(body, &mut offset)?;
        let key_b = take_key(body, &mut offset, strings)?;
        let val_b = take_sized_value(body, &mut offset)?;
        let src = take_key(body, &mut offset, strings)?;
        store.add(strings, &key_a, &val_a, &key_b, &val_b, &src);
    }

    // Entries nothing re-referenced are garbage from the dump; drop them
    // so the refcount invariant holds exactly.
    strings.sweep_unreferenced();

    info!(
        literals = strings.len(),
        relations = store.len(),
        checkpoint,
        "snapshot loaded"
    );
    Ok(checkpoint)
}

fn take_sized_value(buf: &[u8], offset: &mut usize) -> Result<Value, SnapshotError> {
    let len: i32 = encoding::decode_at(buf, offset)?;
    if len == -1 {
        let i: i32 = encoding::decode_at(buf, offset)?;
        Ok(Value::Int(i))
    } else {
        let (s, n) = encoding::take_str(&buf[*offset..], len as i64)?;
        *offset += n;
        Ok(Value::from(s))
    }
}

fn take_key(
    buf: &[u8],
    offset: &mut usize,
    strings: &StringTable,
) -> Result<String, SnapshotError> {
    let raw: u32 = encoding::decode_at(buf, offset)?;
    match strings.resolve(LitId::from_raw(raw)) {
        Some(Value::Str(s)) => Ok(s.to_string()),
        _ => Err(SnapshotError::DanglingLiteral(raw)),
    }
}

// ------------------------------------------------------------------------------------------------
// The sync pass
// ------------------------------------------------------------------------------------------------

/// Runs one full sync: WRITING mark, snapshot rewrite, CHECKPOINT.
///
/// The state read lock is held from the mark until the body is encoded,
/// so the snapshot covers exactly the transactions logged before the
/// mark. Memory databases return immediately.
pub(crate) fn sync_pass(shared: &DbShared) -> Result<(), SnapshotError> {
    let (Some(wal), Some(path)) = (&shared.wal, &shared.snapshot_path) else {
        return Ok(());
    };
    let _pass = shared
        .sync_lock
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    let store = shared
        .state
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    let mut mark = OpList::new();
    mark.push_writing();
    let synced = match wal.append(&mark, false)? {
        Append::Written {
            synced: Some(synced),
            ..
        } => synced,
        _ => {
            warn!("sync pass could not place a writing mark");
            return Ok(());
        }
    };

    write_snapshot(path, &shared.strings, &store, synced)?;
    drop(store);

    wal.checkpoint(synced)?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// The sync thread
// ------------------------------------------------------------------------------------------------

enum SyncMsg {
    Flush,
    Shutdown,
}

/// Handle to the background sync thread.
pub(crate) struct SyncThread {
    tx: Sender<SyncMsg>,
    handle: JoinHandle<()>,
}

impl SyncThread {
    /// Spawns the thread; it sleeps on the channel until signalled.
    pub(crate) fn spawn(shared: Arc<DbShared>) -> io::Result<SyncThread> {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("quintet-sync".into())
            .spawn(move || {
                for msg in rx.iter() {
                    match msg {
                        SyncMsg::Flush => {
                            if let Err(err) = sync_pass(&shared) {
                                error!(%err, "background sync pass failed");
                            }
                        }
                        SyncMsg::Shutdown => break,
                    }
                }
            })?;
        Ok(SyncThread { tx, handle })
    }

    /// Asks the thread to run a pass soon. Never blocks.
    pub(crate) fn signal(&self) {
        let _ = self.tx.send(SyncMsg::Flush);
    }

    /// Stops the thread and waits for it to exit.
    pub(crate) fn shutdown(self) {
        let _ = self.tx.send(SyncMsg::Shutdown);
        if self.handle.join().is_err() {
            error!("sync thread panicked");
        }
    }
}
