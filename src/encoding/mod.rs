//! Little-endian binary encoding for the on-disk formats.
//!
//! The write-ahead log and the snapshot file share a small, hand-written,
//! byte-stable wire format. Because quintet owns this format, the on-disk
//! representation never changes due to a dependency upgrade.
//!
//! # Wire format
//!
//! | Rust type | Encoding                                     |
//! |-----------|----------------------------------------------|
//! | `u32`     | 4 bytes, little-endian                       |
//! | `i32`     | 4 bytes, little-endian                       |
//! | `u64`     | 8 bytes, little-endian                       |
//! | `[u8; N]` | `N` raw bytes (fixed-size, no length prefix) |
//!
//! Strings are *not* length-prefixed here: both the log and the snapshot
//! carry string lengths in their own headers, so string payloads are
//! written as raw bytes via [`put_bytes`] / [`take_bytes`].
//!
//! # Safety limits
//!
//! [`take_bytes`] rejects lengths above [`MAX_FIELD_LEN`] so that a
//! corrupted length field cannot trigger an allocation bomb.
//!
//! # Zero-panic guarantee
//!
//! No function in this module uses `unwrap()`, `expect()`, or any other
//! panicking path. All errors are propagated via [`EncodingError`].


use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Safety limits
// ------------------------------------------------------------------------------------------------

/// Maximum byte length for a single string field during decoding (16 MiB).
///
/// Keys, values and source names are short in practice; any decoded length
/// above this is treated as corruption.
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A length field exceeded [`MAX_FIELD_LEN`] or was negative where a
    /// string length was required.
    #[error("invalid field length {0}")]
    InvalidLength(i64),

    /// A byte sequence decoded as a string was not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` into a byte buffer.
///
/// Implementations must produce deterministic output: the same logical
/// value always yields the exact same byte sequence.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>);
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` so that callers can advance a cursor
/// through a buffer containing multiple encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf);
    buf
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes.
#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Primitive implementations
// ------------------------------------------------------------------------------------------------

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[..4]);
        Ok((u32::from_le_bytes(bytes), 4))
    }
}

impl Encode for i32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decode for i32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[..4]);
        Ok((i32::from_le_bytes(bytes), 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[..8]);
        Ok((u64::from_le_bytes(bytes), 8))
    }
}

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(&buf[..N]);
        Ok((arr, N))
    }
}

// ------------------------------------------------------------------------------------------------
// Raw string / byte fields (length carried externally)
// ------------------------------------------------------------------------------------------------

/// Append `bytes` verbatim, without a length prefix.
#[inline]
pub fn put_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(bytes);
}

/// Take exactly `len` raw bytes from the front of `buf`.
///
/// `len` comes from an external header and is validated against
/// [`MAX_FIELD_LEN`].
pub fn take_bytes(buf: &[u8], len: i64) -> Result<(&[u8], usize), EncodingError> {
    if len < 0 || len as usize > MAX_FIELD_LEN {
        return Err(EncodingError::InvalidLength(len));
    }
    let len = len as usize;
    require(buf, len)?;
    Ok((&buf[..len], len))
}

/// Take exactly `len` raw bytes and decode them as UTF-8.
pub fn take_str(buf: &[u8], len: i64) -> Result<(String, usize), EncodingError> {
    let (raw, consumed) = take_bytes(buf, len)?;
    let s = String::from_utf8(raw.to_vec())?;
    Ok((s, consumed))
}

/// Decode a cursor-style sequence: advances `offset` through `buf`.
///
/// Convenience for section decoders that read many items in a row.
pub fn decode_at<T: Decode>(buf: &[u8], offset: &mut usize) -> Result<T, EncodingError> {
    let (value, n) = T::decode_from(&buf[*offset..])?;
    *offset += n;
    Ok(value)
}
