//! Binary Diff Engine
//!
//! bsdiff-style deltas: `patch(old, &diff(old, new)?)? == new` for any pair
//! of byte strings, empty ones included.

pub mod bsdiff;
pub mod format;
pub mod patch;
pub mod suffix;

use thiserror::Error;

pub use patch::{apply_with_limit, DEFAULT_MAX_OUTPUT};

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Corrupt delta: {0}")]
    Corrupt(String),
    /// The delta was built against different bytes than the ones supplied
    #[error("Delta expects base sha256 {expected}, got {actual}")]
    WrongBase { expected: String, actual: String },
    #[error("Delta declares {size} output bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("Delta encoding failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Delta turning `old` into `new`
pub fn diff(old: &[u8], new: &[u8]) -> Result<Vec<u8>, DiffError> {
    let raw = bsdiff::compute(old, new);
    format::encode(&raw, old, new)
}

/// Rebuild the new bytes from `old` and a delta produced by [`diff`]
pub fn patch(old: &[u8], delta: &[u8]) -> Result<Vec<u8>, DiffError> {
    patch::apply(old, delta)
}
