//! Error types for the heap engine.
//!
//! Mirrors the shape of a Btrieve-style status/error split: a closed set of
//! named conditions plus a passthrough for the underlying I/O layer.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HeapError>;

/// Errors that can cross a public API boundary.
///
/// `PageFull` and `DirectoryFull` are used internally to drive retry and
/// allocation logic inside the directory and heap-file layers; they should
/// not normally escape to a caller of [`crate::controller::Controller`].
#[derive(Debug, Error)]
pub enum HeapError {
    /// A page cannot admit a record of the given size.
    #[error("page has no room for a record of {needed} bytes (free: {available})")]
    PageFull { needed: usize, available: usize },

    /// A directory page cannot admit another data-page entry.
    #[error("directory page {directory} has no room for another entry")]
    DirectoryFull { directory: u32 },

    /// No live record matched the requested key.
    #[error("no record found for key")]
    KeyNotFound,

    /// The schema does not describe how to encode or decode a field.
    #[error("schema error: {0}")]
    SchemaError(String),

    /// A variable-length field exceeded the one-byte length prefix.
    #[error("field of {len} bytes exceeds the 255-byte var_str limit")]
    LengthOverflow { len: usize },

    /// A page's footer decoded to values outside the bounds of the page.
    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: u32, reason: String },

    /// Underlying file I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
