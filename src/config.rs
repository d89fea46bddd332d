//! Trie configuration.

use crate::error::{JudyError, Result};

/// Default number of cursor frames; deep enough for keys of ~2000 bytes.
pub const DEFAULT_CURSOR_DEPTH: usize = 512;

/// Default number of block entries carved per arena segment.
pub const DEFAULT_SEGMENT_ENTRIES: usize = 1024;

/// Configuration for a [`Judy`](crate::Judy) trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudyConfig {
    /// Number of cursor frames replayed by key reconstruction.
    ///
    /// Traversals deeper than this still navigate correctly, but
    /// reconstructed keys are truncated.
    pub cursor_depth: usize,
    /// Block entries per arena segment.
    pub segment_entries: usize,
    /// Upper bound on arena segments, `None` for unbounded.
    pub max_segments: Option<usize>,
}

impl Default for JudyConfig {
    fn default() -> Self {
        Self {
            cursor_depth: DEFAULT_CURSOR_DEPTH,
            segment_entries: DEFAULT_SEGMENT_ENTRIES,
            max_segments: None,
        }
    }
}

impl JudyConfig {
    pub fn with_cursor_depth(mut self, depth: usize) -> Self {
        self.cursor_depth = depth;
        self
    }

    pub fn with_segment_entries(mut self, entries: usize) -> Self {
        self.segment_entries = entries;
        self
    }

    pub fn with_max_segments(mut self, max: Option<usize>) -> Self {
        self.max_segments = max;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.cursor_depth == 0 {
            return Err(JudyError::InvalidConfig("cursor_depth must be at least 1"));
        }
        if self.segment_entries == 0 {
            return Err(JudyError::InvalidConfig("segment_entries must be at least 1"));
        }
        if self.max_segments == Some(0) {
            return Err(JudyError::InvalidConfig("max_segments must allow at least one segment"));
        }
        Ok(())
    }
}
