//! # judy-rs
//!
//! A Judy-style compressed trie mapping byte-string keys to `u64` cells, with
//! bounded edit-distance (fuzzy) search over the stored keys.
//!
//! Node encodings adapt to the data: sorted linear nodes for sparse
//! branches, 256-way radix nodes once a linear node overflows, and literal
//! span nodes for unbranched key tails. Every node lives in an arena with
//! size-class free lists, and ordered navigation runs off an explicit cursor
//! stack rather than parent pointers.
//!
//! ## Example
//!
//! ```rust
//! use judy_rs::Judy;
//!
//! let mut trie = Judy::open(64).unwrap();
//! *trie.insert(b"hello").unwrap() = 1;
//! *trie.insert(b"help").unwrap() = 2;
//! *trie.insert(b"world").unwrap() = 3;
//!
//! assert_eq!(trie.get(b"hello"), Some(1));
//! assert_eq!(trie.lookup_at_or_after(b"helm").copied(), Some(2));
//! assert_eq!(trie.key(), b"help");
//!
//! let close: Vec<_> = trie.fuzzy_matches(b"helo", 1, false);
//! assert_eq!(close, vec![(b"hello".to_vec(), 1), (b"help".to_vec(), 1)]);
//! ```
//!
//! ## Keys and cells
//!
//! A zero byte ends a key. Use [`encoding`] to store integers, whose raw
//! bytes may contain zeros. A freshly inserted cell reads zero and the caller
//! is expected to store a nonzero value in it.

#![forbid(unsafe_code)]

mod arena;
pub mod config;
pub mod encoding;
pub mod error;
pub mod fuzzy;
mod judy;

pub use arena::{ArenaStats, DataId};
pub use config::JudyConfig;
pub use encoding::{decode, encode, EncodedKey, NumericKey};
pub use error::{JudyError, Result};
pub use fuzzy::{CancelToken, FuzzyOptions, SearchOutcome};
pub use judy::{Iter, Judy};

#[cfg(test)]
mod proptests;
