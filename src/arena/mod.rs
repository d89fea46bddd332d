//! Memory arena for trie nodes.
//!
//! Every node a trie creates comes from its arena:
//! - Blocks are carved from fixed-size segments and never move
//! - Freed blocks are recycled through per-size-class free lists
//! - Segments are only released when the trie is dropped
//! - Handles carry a generation, so a stale handle cannot reach a reused block
//!
//! The arena also hands out auxiliary data blocks for the caller
//! ([`Arena::data_alloc`]), which live as long as the trie.

mod slab;

pub use slab::{Block, NodeId, SegmentBudget, Slab};

use tracing::trace;

use crate::config::JudyConfig;
use crate::error::{JudyError, Result};
use crate::judy::node::{LinearClass, LinearNode, RadixTable, SpanNode};

/// Bytes per auxiliary data segment.
const DATA_SEGMENT_BYTES: usize = 64 * 1024;

/// Alignment of auxiliary data blocks.
const DATA_ALIGN: usize = 8;

/// Handle to an auxiliary data block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DataId {
    segment: u32,
    offset: u32,
    len: u32,
}

impl DataId {
    pub fn len(self) -> usize {
        self.len as usize
    }

    pub fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// Worst-case block counts one mutation may need.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reserve {
    pub linear: usize,
    pub radix: usize,
    pub span: usize,
}

/// Arena usage snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Segments granted so far, including the header segment.
    pub segments: usize,
    pub live_linear: usize,
    pub live_radix: usize,
    pub live_span: usize,
    /// Blocks parked on free lists.
    pub free_blocks: usize,
    pub data_bytes: usize,
}

pub struct Arena {
    budget: SegmentBudget,
    linear: Slab<LinearNode>,
    radix: Slab<RadixTable>,
    span: Slab<SpanNode>,
    data: Vec<Vec<u8>>,
    data_bytes: usize,
}

impl Arena {
    /// Open an arena, granting the segment that holds the trie header.
    pub fn open(config: &JudyConfig) -> Result<Self> {
        let mut budget = SegmentBudget::new(config.max_segments);
        budget.grant(1)?;
        let entries = config.segment_entries;
        Ok(Self {
            budget,
            linear: Slab::new(LinearClass::ALL.len(), entries),
            radix: Slab::new(1, entries),
            span: Slab::new(1, entries),
            data: Vec::new(),
            data_bytes: 0,
        })
    }

    /// Make sure the given block counts can be allocated without failure.
    pub fn reserve(&mut self, need: Reserve) -> Result<()> {
        self.linear.reserve(need.linear, &mut self.budget)?;
        self.radix.reserve(need.radix, &mut self.budget)?;
        self.span.reserve(need.span, &mut self.budget)?;
        Ok(())
    }

    pub fn alloc_linear(&mut self, class: LinearClass, key_size: usize) -> Result<NodeId> {
        let (id, node) = self.linear.alloc(class.index(), &mut self.budget)?;
        node.init(class, key_size);
        Ok(id)
    }

    pub fn alloc_radix(&mut self) -> Result<NodeId> {
        let (id, _) = self.radix.alloc(0, &mut self.budget)?;
        Ok(id)
    }

    pub fn alloc_span(&mut self) -> Result<NodeId> {
        let (id, _) = self.span.alloc(0, &mut self.budget)?;
        Ok(id)
    }

    pub fn free_linear(&mut self, id: NodeId) {
        self.linear.free(id);
    }

    pub fn free_radix(&mut self, id: NodeId) {
        self.radix.free(id);
    }

    pub fn free_span(&mut self, id: NodeId) {
        self.span.free(id);
    }

    #[inline]
    pub fn linear(&self, id: NodeId) -> &LinearNode {
        match self.linear.get(id) {
            Some(node) => node,
            None => panic!("stale linear node handle {id:?}"),
        }
    }

    #[inline]
    pub fn linear_mut(&mut self, id: NodeId) -> &mut LinearNode {
        match self.linear.get_mut(id) {
            Some(node) => node,
            None => panic!("stale linear node handle {id:?}"),
        }
    }

    #[inline]
    pub fn radix(&self, id: NodeId) -> &RadixTable {
        match self.radix.get(id) {
            Some(table) => table,
            None => panic!("stale radix table handle {id:?}"),
        }
    }

    #[inline]
    pub fn radix_mut(&mut self, id: NodeId) -> &mut RadixTable {
        match self.radix.get_mut(id) {
            Some(table) => table,
            None => panic!("stale radix table handle {id:?}"),
        }
    }

    #[inline]
    pub fn span(&self, id: NodeId) -> &SpanNode {
        match self.span.get(id) {
            Some(span) => span,
            None => panic!("stale span node handle {id:?}"),
        }
    }

    #[inline]
    pub fn span_mut(&mut self, id: NodeId) -> &mut SpanNode {
        match self.span.get_mut(id) {
            Some(span) => span,
            None => panic!("stale span node handle {id:?}"),
        }
    }

    /// Allocate `len` zero-filled bytes of caller data, rounded up to 8.
    ///
    /// Handles address blocks with 32-bit fields, so larger requests fail with
    /// [`JudyError::DataTooLarge`] before anything is allocated.
    pub fn data_alloc(&mut self, len: usize) -> Result<DataId> {
        let (Ok(len32), Some(amount)) = (
            u32::try_from(len),
            len.checked_next_multiple_of(DATA_ALIGN),
        ) else {
            return Err(JudyError::DataTooLarge(len));
        };

        let tail = self
            .data
            .last()
            .filter(|seg| seg.capacity() - seg.len() >= amount)
            .map(Vec::len);
        let (segment_idx, offset) = match tail {
            Some(offset) => (self.data.len() - 1, offset),
            None => (self.data.len(), 0),
        };
        let (Ok(segment32), Ok(offset32)) = (u32::try_from(segment_idx), u32::try_from(offset))
        else {
            return Err(JudyError::DataTooLarge(len));
        };

        if tail.is_none() {
            self.budget.grant(1)?;
            let mut segment = Vec::new();
            if segment.try_reserve_exact(amount.max(DATA_SEGMENT_BYTES)).is_err() {
                return Err(JudyError::OutOfMemory {
                    requested: 1,
                    segments: self.budget.in_use(),
                });
            }
            self.data.push(segment);
            trace!(segments = self.data.len(), "arena.data.grow");
        }

        let segment = &mut self.data[segment_idx];
        segment.resize(offset + amount, 0);
        self.data_bytes += amount;

        Ok(DataId {
            segment: segment32,
            offset: offset32,
            len: len32,
        })
    }

    pub fn data(&self, id: DataId) -> &[u8] {
        let start = id.offset as usize;
        &self.data[id.segment as usize][start..start + id.len()]
    }

    pub fn data_mut(&mut self, id: DataId) -> &mut [u8] {
        let start = id.offset as usize;
        &mut self.data[id.segment as usize][start..start + id.len()]
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            segments: self.budget.in_use(),
            live_linear: self.linear.live(),
            live_radix: self.radix.live(),
            live_span: self.span.live(),
            free_blocks: self.linear.free_blocks()
                + self.radix.free_blocks()
                + self.span.free_blocks(),
            data_bytes: self.data_bytes,
        }
    }
}
