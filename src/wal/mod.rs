//! The circular write-ahead log.
//!
//! Every mutation is appended here before it is applied in memory, so a
//! crash can always be redone from the last checkpoint. The log file has a
//! fixed logical size and is addressed by a 64-bit monotonic counter: the
//! on-disk position of a record is `counter % LOG_SIZE`, its rotation is
//! `counter / LOG_SIZE`. Recovery detects truncation and stale wrapped
//! data purely from counter discontinuities — never from the file size.
//!
//! # On-disk layout
//!
//! ```text
//! log_header = { u32 type, u64 counter }                 (little-endian)
//! mod_header = { i32 ka_len, va_len, kb_len, vb_len, s_len }
//!
//! ADD/DEL: [log_header][mod_header][key_a][val_a][key_b][val_b][src]
//! ```
//!
//! Integer values use `len = -1` and are written as a 32-bit integer;
//! string payloads are raw bytes whose lengths live in the mod header.
//! `WRAP` rewinds the write position to offset 0 when the next record
//! would cross `LOG_SIZE - 2 * sizeof(log_header)`. `INIT` marks a
//! freshly-created log. A transaction is a `BEGIN … ops … END` group;
//! `WRITING` stamps the sync pass's position, `CHECKPOINT` certifies that
//! the snapshot covers everything up to its u64 payload.
//!
//! # Back-pressure
//!
//! A write that would pass `last_checkpoint + LOG_SIZE` is refused: the
//! committer signals the sync thread and waits on the space condvar until
//! a checkpoint frees room. A `WRITING`-bearing list is the escape hatch —
//! when the log is full its records are skipped but the sync position
//! still advances, so the checkpoint that frees the log can always happen.
//!
//! # Concurrency
//!
//! One mutex guards the file handle and all four log counters; it nests
//! inside the database writer lock and the state lock and is held only
//! while appending or redoing.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::oplist::{ModOp, Op, OpList};
use crate::value::Value;

/// Default logical log size: 2 MiB.
pub const DEFAULT_LOG_SIZE: u64 = 2 * 1024 * 1024;

const LOG_HEADER_SIZE: u64 = 12;
const MOD_HEADER_SIZE: u64 = 20;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by log operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A single record cannot fit in the log at all.
    #[error("record of {0} bytes exceeds the log size")]
    RecordTooLarge(u64),

    /// The configured log size cannot hold even one transaction.
    #[error("log size {0} is too small")]
    LogTooSmall(u64),
}

// ------------------------------------------------------------------------------------------------
// Record types and headers
// ------------------------------------------------------------------------------------------------

/// On-disk record type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum RecordType {
    Add = 0x00ad_dadd,
    Del = 0x00de_1e7e,
    Wrap = 0x0012_3123,
    Init = 0x8765_4321,
    Begin = 0x1,
    End = 0x2,
    Writing = 0x3,
    Checkpoint = 0x4,
}

impl RecordType {
    fn from_u32(raw: u32) -> Option<RecordType> {
        match raw {
            0x00ad_dadd => Some(RecordType::Add),
            0x00de_1e7e => Some(RecordType::Del),
            0x0012_3123 => Some(RecordType::Wrap),
            0x8765_4321 => Some(RecordType::Init),
            0x1 => Some(RecordType::Begin),
            0x2 => Some(RecordType::End),
            0x3 => Some(RecordType::Writing),
            0x4 => Some(RecordType::Checkpoint),
            _ => None,
        }
    }
}

/// `{ u32 type, u64 counter }` — starts every record.
struct LogHeader {
    rtype: u32,
    counter: u64,
}

impl Encode for LogHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.rtype.encode_to(buf);
        self.counter.encode_to(buf);
    }
}

impl Decode for LogHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let rtype: u32 = encoding::decode_at(buf, &mut offset)?;
        let counter: u64 = encoding::decode_at(buf, &mut offset)?;
        Ok((LogHeader { rtype, counter }, offset))
    }
}

/// Field lengths of an ADD/DEL payload; `-1` marks an integer value.
struct ModHeader {
    ka_len: i32,
    va_len: i32,
    kb_len: i32,
    vb_len: i32,
    s_len: i32,
}

impl ModHeader {
    fn for_op(op: &ModOp) -> ModHeader {
        ModHeader {
            ka_len: op.key_a.len() as i32,
            va_len: val_len(&op.val_a),
            kb_len: op.key_b.len() as i32,
            vb_len: val_len(&op.val_b),
            s_len: op.src.len() as i32,
        }
    }

    /// Payload bytes following the mod header.
    fn payload_size(&self) -> u64 {
        let val = |len: i32| if len == -1 { 4 } else { len as u64 };
        self.ka_len as u64 + val(self.va_len) + self.kb_len as u64 + val(self.vb_len)
            + self.s_len as u64
    }
}

impl Encode for ModHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.ka_len.encode_to(buf);
        self.va_len.encode_to(buf);
        self.kb_len.encode_to(buf);
        self.vb_len.encode_to(buf);
        self.s_len.encode_to(buf);
    }
}

impl Decode for ModHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let ka_len: i32 = encoding::decode_at(buf, &mut offset)?;
        let va_len: i32 = encoding::decode_at(buf, &mut offset)?;
        let kb_len: i32 = encoding::decode_at(buf, &mut offset)?;
        let vb_len: i32 = encoding::decode_at(buf, &mut offset)?;
        let s_len: i32 = encoding::decode_at(buf, &mut offset)?;
        Ok((
            ModHeader {
                ka_len,
                va_len,
                kb_len,
                vb_len,
                s_len,
            },
            offset,
        ))
    }
}

/// String length, or `-1` for integer values.
fn val_len(value: &Value) -> i32 {
    match value {
        Value::Int(_) => -1,
        Value::Str(s) => s.len() as i32,
    }
}

fn put_val(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Int(i) => i.encode_to(buf),
        Value::Str(s) => encoding::put_bytes(s.as_bytes(), buf),
    }
}

// ------------------------------------------------------------------------------------------------
// Append outcomes
// ------------------------------------------------------------------------------------------------

/// Result of appending an oplist.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Append {
    /// All records written.
    Written {
        /// More than half the log is unchecked; a sync should run soon.
        sync_hint: bool,
        /// Counter of the WRITING record, when the list carried one.
        synced: Option<u64>,
    },
    /// No room before the last checkpoint comes around again.
    Full,
}

// ------------------------------------------------------------------------------------------------
// The log
// ------------------------------------------------------------------------------------------------

struct WalInner {
    file: File,
    last_checkpoint: u64,
    last_synced: u64,
    last_logpoint: u64,
    next_logpoint: u64,
}

/// The circular write-ahead log of one database.
pub(crate) struct Wal {
    inner: Mutex<WalInner>,
    space: Condvar,
    log_size: u64,
    /// True when the file was created by this open (an INIT was written).
    created: bool,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").finish_non_exhaustive()
    }
}

impl Wal {
    /// Opens or creates the log file, holding an exclusive advisory lock
    /// on it for the lifetime of the value.
    pub(crate) fn open(path: &Path, log_size: u64) -> Result<Wal, WalError> {
        if log_size < 4 * LOG_HEADER_SIZE + MOD_HEADER_SIZE {
            return Err(WalError::LogTooSmall(log_size));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;

        let existing_len = file.metadata()?.len();
        let created = existing_len == 0;
        // An existing log keeps the size it was created with.
        let log_size = if created { log_size } else { existing_len };

        let wal = Wal {
            inner: Mutex::new(WalInner {
                file,
                last_checkpoint: 0,
                last_synced: 0,
                last_logpoint: 0,
                next_logpoint: 0,
            }),
            space: Condvar::new(),
            log_size,
            created,
        };

        if created {
            let mut inner = wal.lock();
            inner.file.set_len(log_size)?;
            write_record(&mut inner, log_size, RecordType::Init, &[])?;
            inner.file.sync_data()?;
            info!(path = %path.display(), log_size, "log created");
        } else {
            debug!(path = %path.display(), log_size, "log opened");
        }
        Ok(wal)
    }

    /// True when this open created the file.
    pub(crate) fn is_fresh(&self) -> bool {
        self.created
    }

    /// Logical size of the log.
    pub(crate) fn size(&self) -> u64 {
        self.log_size
    }

    // Record writes never panic with the lock held; a poisoned mutex
    // still guards consistent counters.
    fn lock(&self) -> MutexGuard<'_, WalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Positions the counters after recovery established `checkpoint` as
    /// the last snapshot-covered record.
    pub(crate) fn init(&self, checkpoint: u64) {
        let mut inner = self.lock();
        inner.last_checkpoint = checkpoint;
        inner.last_synced = checkpoint;
        inner.last_logpoint = checkpoint;
        inner.next_logpoint = checkpoint + LOG_HEADER_SIZE;
    }

    pub(crate) fn last_checkpoint(&self) -> u64 {
        self.lock().last_checkpoint
    }

    pub(crate) fn last_synced(&self) -> u64 {
        self.lock().last_synced
    }

    /// Counter of the last complete record, the point a snapshot written
    /// right now may claim to cover.
    pub(crate) fn last_logpoint(&self) -> u64 {
        self.lock().last_logpoint
    }

    /// Appends one transaction as a `BEGIN … END` group.
    ///
    /// Returns [`Append::Full`] without writing anything when the group
    /// would overrun the checkpoint; a WRITING-bearing list instead
    /// records the sync position and reports success, so a full log can
    /// still be checkpointed.
    pub(crate) fn append(&self, list: &OpList, sync: bool) -> Result<Append, WalError> {
        let (size, has_writing) = estimate_size(list);
        if size == 0 {
            return Ok(Append::Written {
                sync_hint: false,
                synced: None,
            });
        }
        if size > self.log_size {
            return Err(WalError::RecordTooLarge(size));
        }

        let mut inner = self.lock();
        if inner.next_logpoint + size > inner.last_checkpoint + self.log_size {
            if has_writing {
                // Full log: skip the records but still advance the sync
                // position to the last complete record.
                inner.last_synced = inner.last_logpoint;
                debug!(synced = inner.last_synced, "log full, sync position pinned");
                return Ok(Append::Written {
                    sync_hint: false,
                    synced: Some(inner.last_synced),
                });
            }
            trace!(
                next = inner.next_logpoint,
                checkpoint = inner.last_checkpoint,
                size,
                "log full, write refused"
            );
            return Ok(Append::Full);
        }

        write_record(&mut inner, self.log_size, RecordType::Begin, &[])?;

        let mut writing_counter = None;
        for op in list.iter() {
            match op {
                Op::Add(m) => {
                    let payload = mod_payload(m);
                    write_record(&mut inner, self.log_size, RecordType::Add, &payload)?;
                }
                Op::Del(m) => {
                    let payload = mod_payload(m);
                    write_record(&mut inner, self.log_size, RecordType::Del, &payload)?;
                }
                Op::Writing => {
                    let counter =
                        write_record(&mut inner, self.log_size, RecordType::Writing, &[])?;
                    writing_counter = Some(counter);
                }
            }
        }

        write_record(&mut inner, self.log_size, RecordType::End, &[])?;

        if let Some(counter) = writing_counter {
            inner.last_synced = counter;
        }
        if sync {
            inner.file.sync_data()?;
        }

        let sync_hint = inner.next_logpoint > inner.last_checkpoint + self.log_size / 2;
        trace!(
            ops = list.len(),
            next = inner.next_logpoint,
            sync_hint,
            "transaction logged"
        );
        Ok(Append::Written {
            sync_hint,
            synced: writing_counter,
        })
    }

    /// Writes a `BEGIN CHECKPOINT END` group certifying that the snapshot
    /// covers everything up to `synced`, then frees log space.
    ///
    /// Written unconditionally: by the time a checkpoint is due, the
    /// region it may overrun is already covered by the snapshot.
    pub(crate) fn checkpoint(&self, synced: u64) -> Result<(), WalError> {
        {
            let mut inner = self.lock();
            write_record(&mut inner, self.log_size, RecordType::Begin, &[])?;
            write_record(
                &mut inner,
                self.log_size,
                RecordType::Checkpoint,
                &encoding::encode_to_vec(&synced),
            )?;
            write_record(&mut inner, self.log_size, RecordType::End, &[])?;
            inner.last_synced = synced;
            inner.last_checkpoint = synced;
            inner.file.sync_data()?;
            debug!(checkpoint = synced, "checkpoint logged");
        }
        self.space.notify_all();
        Ok(())
    }

    /// Blocks until an oplist of `size` estimated bytes fits, or `timeout`
    /// elapses. Returns whether it fits now.
    pub(crate) fn wait_for_space(&self, size: u64, timeout: Duration) -> bool {
        let mut inner = self.lock();
        let deadline = std::time::Instant::now() + timeout;
        while inner.next_logpoint + size > inner.last_checkpoint + self.log_size {
            let now = std::time::Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return false;
            };
            let (guard, _) = self
                .space
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
        true
    }

    /// Estimated log footprint of `list`, for [`Wal::wait_for_space`].
    pub(crate) fn estimate(&self, list: &OpList) -> u64 {
        estimate_size(list).0
    }

    /// Redoes everything after the checkpoint the snapshot established.
    ///
    /// Records are verified by counter; complete `BEGIN … END` groups are
    /// handed to `apply`; the first discontinuity, unreadable payload or
    /// unknown type is the truncation point. When the record at
    /// `last_logpoint` no longer matches (the log wrapped past it, or the
    /// snapshot is stale), the scan restarts from offset 0 and skips
    /// transactions the snapshot already covers.
    pub(crate) fn redo(
        &self,
        mut apply: impl FnMut(OpList),
    ) -> Result<(), WalError> {
        let mut inner = self.lock();
        let initial_checkpoint = inner.last_checkpoint;

        // Locate the first record to scan.
        let last_logpoint = inner.last_logpoint;
        let start = match read_header_at(&mut inner, self.log_size, last_logpoint) {
            Some(hdr) if hdr.counter == inner.last_logpoint => {
                inner.last_logpoint + LOG_HEADER_SIZE
            }
            _ => match read_header_at(&mut inner, self.log_size, 0) {
                Some(hdr) if hdr.counter % self.log_size == 0 => {
                    warn!(
                        expected = inner.last_logpoint,
                        "logpoint stale, rescanning log from start"
                    );
                    hdr.counter
                }
                _ => {
                    warn!("log unreadable, keeping snapshot state");
                    inner.next_logpoint = inner.last_logpoint + LOG_HEADER_SIZE;
                    return Ok(());
                }
            },
        };

        let mut pos = start % self.log_size;
        let mut round = start / self.log_size;
        let mut last_valid = inner.last_logpoint;
        let mut oplist: Option<OpList> = None;
        let mut begin_counter = 0u64;
        let mut new_checkpoint: Option<u64> = None;
        let mut new_synced: Option<u64> = None;
        let mut replayed = 0usize;

        loop {
            inner.file.seek(SeekFrom::Start(pos))?;
            let Some(hdr) = read_header(&mut inner.file) else {
                break;
            };
            let expected = pos + round * self.log_size;
            if hdr.counter != expected {
                trace!(found = hdr.counter, expected, "counter mismatch, truncating");
                break;
            }
            let Some(rtype) = RecordType::from_u32(hdr.rtype) else {
                trace!(rtype = hdr.rtype, "unknown record type, truncating");
                break;
            };

            inner.last_logpoint = expected;

            match rtype {
                RecordType::Wrap => {
                    round += 1;
                    pos = 0;
                    continue;
                }
                RecordType::Add | RecordType::Del => {
                    let Some(op) = read_mod(&mut inner.file) else {
                        break;
                    };
                    match &mut oplist {
                        Some(list) => match rtype {
                            RecordType::Add => list.push_add(op),
                            _ => list.push_del(op),
                        },
                        // A mod record outside BEGIN/END is corruption.
                        None => break,
                    }
                }
                RecordType::Checkpoint => {
                    let mut buf = [0u8; 8];
                    if inner.file.read_exact(&mut buf).is_err() {
                        break;
                    }
                    new_checkpoint = Some(u64::from_le_bytes(buf));
                }
                RecordType::Writing => {
                    new_synced = Some(expected);
                }
                RecordType::Begin => {
                    oplist = Some(OpList::new());
                    begin_counter = expected;
                    new_checkpoint = None;
                    new_synced = None;
                }
                RecordType::End => {
                    if let Some(list) = oplist.take() {
                        if begin_counter > initial_checkpoint {
                            replayed += 1;
                            apply(list);
                        }
                        if let Some(cp) = new_checkpoint.take() {
                            inner.last_synced = cp;
                            inner.last_checkpoint = cp;
                        } else if let Some(s) = new_synced.take() {
                            inner.last_synced = s;
                        }
                        last_valid = expected;
                    }
                }
                RecordType::Init => {}
            }

            pos = inner.file.stream_position()?;
        }

        inner.last_logpoint = last_valid;
        inner.next_logpoint = last_valid + LOG_HEADER_SIZE;
        let seek_to = inner.next_logpoint % self.log_size;
        inner.file.seek(SeekFrom::Start(seek_to))?;

        info!(
            transactions = replayed,
            logpoint = inner.last_logpoint,
            checkpoint = inner.last_checkpoint,
            "log redo complete"
        );
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Record I/O
// ------------------------------------------------------------------------------------------------

/// Writes one record at the current logical position, emitting a WRAP
/// first when it would cross the end margin. Returns the record's counter.
fn write_record(
    inner: &mut WalInner,
    log_size: u64,
    rtype: RecordType,
    payload: &[u8],
) -> Result<u64, WalError> {
    let mut pos = inner.next_logpoint % log_size;
    let mut round = inner.next_logpoint / log_size;
    let total = LOG_HEADER_SIZE + payload.len() as u64;

    if pos + total > log_size - 2 * LOG_HEADER_SIZE {
        let wrap = LogHeader {
            rtype: RecordType::Wrap as u32,
            counter: pos + round * log_size,
        };
        inner.file.seek(SeekFrom::Start(pos))?;
        inner.file.write_all(&encoding::encode_to_vec(&wrap))?;
        pos = 0;
        round += 1;
    }

    let counter = pos + round * log_size;
    let header = LogHeader {
        rtype: rtype as u32,
        counter,
    };
    let mut buf = encoding::encode_to_vec(&header);
    buf.extend_from_slice(payload);

    inner.file.seek(SeekFrom::Start(pos))?;
    inner.file.write_all(&buf)?;

    inner.last_logpoint = counter;
    inner.next_logpoint = counter + total;
    Ok(counter)
}

/// Serialises the payload of an ADD/DEL record (mod header + fields).
fn mod_payload(op: &ModOp) -> Vec<u8> {
    let header = ModHeader::for_op(op);
    let mut buf = encoding::encode_to_vec(&header);
    encoding::put_bytes(op.key_a.as_bytes(), &mut buf);
    put_val(&op.val_a, &mut buf);
    encoding::put_bytes(op.key_b.as_bytes(), &mut buf);
    put_val(&op.val_b, &mut buf);
    encoding::put_bytes(op.src.as_bytes(), &mut buf);
    buf
}

/// Reads a log header at the file's current position; `None` on a short
/// or failed read.
fn read_header(file: &mut File) -> Option<LogHeader> {
    let mut buf = [0u8; LOG_HEADER_SIZE as usize];
    file.read_exact(&mut buf).ok()?;
    LogHeader::decode_from(&buf).ok().map(|(hdr, _)| hdr)
}

/// Seeks to `counter`'s position and reads the header there.
fn read_header_at(inner: &mut WalInner, log_size: u64, counter: u64) -> Option<LogHeader> {
    let pos = counter % log_size;
    inner.file.seek(SeekFrom::Start(pos)).ok()?;
    read_header(&mut inner.file)
}

/// Reads an ADD/DEL payload at the file's current position.
fn read_mod(file: &mut File) -> Option<ModOp> {
    let mut header_buf = [0u8; MOD_HEADER_SIZE as usize];
    file.read_exact(&mut header_buf).ok()?;
    let (header, _) = ModHeader::decode_from(&header_buf).ok()?;

    let payload_size = header.payload_size();
    if payload_size > encoding::MAX_FIELD_LEN as u64 * 5 {
        return None;
    }
    let mut payload = vec![0u8; payload_size as usize];
    file.read_exact(&mut payload).ok()?;

    let mut offset = 0usize;
    let key_a = take_field_str(&payload, &mut offset, header.ka_len)?;
    let val_a = take_field_val(&payload, &mut offset, header.va_len)?;
    let key_b = take_field_str(&payload, &mut offset, header.kb_len)?;
    let val_b = take_field_val(&payload, &mut offset, header.vb_len)?;
    let src = take_field_str(&payload, &mut offset, header.s_len)?;

    Some(ModOp {
        key_a,
        val_a,
        key_b,
        val_b,
        src,
    })
}

fn take_field_str(payload: &[u8], offset: &mut usize, len: i32) -> Option<String> {
    let (s, n) = encoding::take_str(&payload[*offset..], len as i64).ok()?;
    *offset += n;
    Some(s)
}

fn take_field_val(payload: &[u8], offset: &mut usize, len: i32) -> Option<Value> {
    if len == -1 {
        let (i, n) = i32::decode_from(&payload[*offset..]).ok()?;
        *offset += n;
        Some(Value::Int(i))
    } else {
        take_field_str(payload, offset, len).map(Value::from)
    }
}

// ------------------------------------------------------------------------------------------------
// Size estimation
// ------------------------------------------------------------------------------------------------

/// Estimated log footprint of an oplist and whether it carries a WRITING
/// marker.
///
/// Adds the BEGIN and END headers plus one WRAP header and the largest
/// single entry — the most extra space a wrap-around can cost.
fn estimate_size(list: &OpList) -> (u64, bool) {
    let mut total = 0u64;
    let mut largest = 0u64;
    let mut has_writing = false;

    for op in list.iter() {
        let size = match op {
            Op::Add(m) | Op::Del(m) => {
                LOG_HEADER_SIZE + MOD_HEADER_SIZE + ModHeader::for_op(m).payload_size()
            }
            Op::Writing => {
                has_writing = true;
                LOG_HEADER_SIZE
            }
        };
        largest = largest.max(size);
        total += size;
    }

    if total == 0 {
        return (0, has_writing);
    }
    (total + 3 * LOG_HEADER_SIZE + largest, has_writing)
}
