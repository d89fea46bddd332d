//! Error types for trie operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, JudyError>;

/// Failures reported by the trie engine.
///
/// A missing key is never an error; lookups return `None` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JudyError {
    /// The arena could not obtain another segment.
    ///
    /// Mutations reserve their worst-case capacity up front, so the trie is
    /// unchanged when this is returned.
    #[error("out of memory: could not reserve {requested} block(s) ({segments} segment(s) in use)")]
    OutOfMemory { requested: usize, segments: usize },
    /// An auxiliary data request too large for a data handle to address.
    #[error("data block of {0} bytes is too large")]
    DataTooLarge(usize),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
