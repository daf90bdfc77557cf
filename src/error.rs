//! Error types shared by the hive engine and the `.reg` text pipeline.
//!
//! Decode-time corruption, `.reg` parse failures, and edit-apply failures
//! all surface through a single flat enum rather than per-module error
//! types, matching how the rest of this crate favors one `Result` alias
//! threaded through every layer.

use std::io;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HiveError>;

/// Errors that can occur while reading, mutating, or serializing a hive,
/// or while parsing and exporting `.reg` text.
#[derive(Error, Debug)]
pub enum HiveError {
    /// I/O error from the caller-supplied byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic signature on a header or cell record.
    #[error("invalid signature: expected {expected:?}, found {found:?}")]
    InvalidSignature { expected: Vec<u8>, found: Vec<u8> },

    /// Hive or record structurally malformed in a way not covered by a
    /// more specific variant.
    #[error("corrupt hive data: {0}")]
    Corrupt(String),

    /// Cell offset falls outside the buffer.
    #[error("invalid cell offset: {offset:#x} (buffer size: {buffer_size:#x})")]
    InvalidOffset { offset: u32, buffer_size: usize },

    /// Cell size prefix is zero or shorter than the size field itself.
    #[error("invalid cell size: {size} at offset {offset:#x}")]
    InvalidCellSize { size: i32, offset: u32 },

    /// Cell signature doesn't match any known record type.
    #[error("unknown cell type {cell_type:?} at offset {offset:#x}")]
    UnknownCellType { cell_type: [u8; 2], offset: u32 },

    /// Key or value lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// A caller-supplied argument is invalid (e.g. a name longer than 255
    /// characters, or an empty path component).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// UTF-16LE decode failed (odd byte length, or an encoding error under
    /// strict handling).
    #[error("invalid UTF-16 data at offset {offset:#x}")]
    InvalidUtf16 { offset: u32 },

    /// Data length, after masking the inline flag, is inconsistent with
    /// the inline flag itself (length > 4 while inline bit is set).
    #[error("invalid inline value length {length} at offset {offset:#x}")]
    InvalidInlineLength { length: u32, offset: u32 },

    /// Hive buffer is smaller than the base block.
    #[error("hive too small: {size} bytes (minimum {minimum} bytes)")]
    HiveTooSmall { size: usize, minimum: usize },

    /// Base block checksum didn't match (strict mode only; tolerant mode
    /// downgrades this to a warning).
    #[error("checksum mismatch: header says {expected:#x}, computed {calculated:#x}")]
    ChecksumMismatch { expected: u32, calculated: u32 },

    /// Header minor version outside the supported 3..=6 range.
    #[error("unsupported hive version: {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    /// A fixed-size or length-prefixed field ran past the end of its
    /// containing cell.
    #[error("truncated data at offset {offset:#x}: expected {expected} bytes, found {actual}")]
    TruncatedData {
        offset: u32,
        expected: usize,
        actual: usize,
    },

    /// `.reg` input is missing the `Windows Registry Editor Version 5.00`
    /// header line and `AllowMissingHeader` was not set.
    #[error("missing 'Windows Registry Editor Version 5.00' header")]
    MissingHeader,

    /// `.reg` input declared an encoding override that the bytes don't
    /// support (e.g. odd-length UTF-16LE payload).
    #[error("unsupported .reg encoding: {0}")]
    UnsupportedEncoding(String),

    /// A `[...]` or `[-...]` section line is malformed.
    #[error("malformed section at byte {offset}: {excerpt:?}")]
    MalformedSection { offset: usize, excerpt: String },

    /// A quoted string value name or payload has no matching closing quote.
    #[error("unterminated string at byte {offset}: {excerpt:?}")]
    UnterminatedString { offset: usize, excerpt: String },

    /// A value payload doesn't match any recognized form
    /// (`"..."`, `dword:`, `hex:`, `hex(N):`, `-`).
    #[error("unsupported value form at byte {offset}: {excerpt:?}")]
    UnsupportedValueForm { offset: usize, excerpt: String },

    /// Non-recursive `DeleteKey` targeted a key that still has children.
    #[error("key has children: {0}")]
    HasChildren(String),
}

impl HiveError {
    /// Builds an [`HiveError::InvalidSignature`] from borrowed slices.
    pub fn invalid_signature(expected: &[u8], found: &[u8]) -> Self {
        Self::InvalidSignature {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Builds an [`HiveError::InvalidOffset`].
    pub fn invalid_offset(offset: u32, buffer_size: usize) -> Self {
        Self::InvalidOffset {
            offset,
            buffer_size,
        }
    }

    /// Builds an [`HiveError::InvalidCellSize`].
    pub fn invalid_cell_size(size: i32, offset: u32) -> Self {
        Self::InvalidCellSize { size, offset }
    }

    /// Builds an [`HiveError::Corrupt`] from a formatted message.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Builds an [`HiveError::NotFound`] naming the kind and identifier of
    /// the thing that was searched for.
    pub fn not_found(item_kind: &str, name: &str) -> Self {
        Self::NotFound(format!("{item_kind} '{name}'"))
    }

    /// Builds an [`HiveError::UnknownCellType`].
    pub fn unknown_cell_type(cell_type: [u8; 2], offset: u32) -> Self {
        Self::UnknownCellType { cell_type, offset }
    }

    /// Returns a short excerpt of `line` (capped so error messages stay
    /// readable even for pathological single-line `.reg` files).
    pub fn excerpt(line: &[u8]) -> String {
        const MAX: usize = 80;
        let text = String::from_utf8_lossy(line);
        if text.len() > MAX {
            format!("{}...", &text[..MAX])
        } else {
            text.into_owned()
        }
    }
}
