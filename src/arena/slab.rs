//! Segmented slab with size-class free lists and generation-checked handles.

use tracing::trace;

use crate::error::{JudyError, Result};

/// A block type stored in a [`Slab`].
pub trait Block: Default {
    /// Restore the zero-filled state before the block is handed out again.
    fn reset(&mut self);
}

/// Handle to a slab block.
///
/// The generation is bumped every time a block is freed, so a handle kept
/// across a free/reuse cycle no longer resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[cfg(test)]
impl NodeId {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Shared accounting of segments across every slab of one arena.
#[derive(Debug, Clone)]
pub struct SegmentBudget {
    in_use: usize,
    limit: Option<usize>,
}

impl SegmentBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self { in_use: 0, limit }
    }

    /// Account for one more segment, failing once the limit is reached.
    pub fn grant(&mut self, requested: usize) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.in_use >= limit {
                return Err(JudyError::OutOfMemory {
                    requested,
                    segments: self.in_use,
                });
            }
        }
        self.in_use += 1;
        Ok(())
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use
    }
}

struct Entry<T> {
    generation: u32,
    class: u8,
    live: bool,
    block: T,
}

/// Typed block storage.
///
/// Blocks are carved from fixed-size segments that are never reallocated, so
/// a block index stays valid for the lifetime of the slab. Freed blocks go to
/// the free list of their size class and are reused before new ones are
/// carved.
pub struct Slab<T> {
    segments: Vec<Vec<Entry<T>>>,
    segment_entries: usize,
    /// Segment currently being carved.
    tail: usize,
    /// Entries not yet carved across `tail..`.
    uncarved: usize,
    /// Free lists by size class.
    free: Vec<Vec<u32>>,
    live: usize,
}

impl<T: Block> Slab<T> {
    pub fn new(classes: usize, segment_entries: usize) -> Self {
        Self {
            segments: Vec::new(),
            segment_entries,
            tail: 0,
            uncarved: 0,
            free: (0..classes).map(|_| Vec::new()).collect(),
            live: 0,
        }
    }

    /// Make sure `count` blocks can be carved without touching the budget.
    pub fn reserve(&mut self, count: usize, budget: &mut SegmentBudget) -> Result<()> {
        while self.uncarved < count {
            self.grow(count, budget)?;
        }
        Ok(())
    }

    fn grow(&mut self, requested: usize, budget: &mut SegmentBudget) -> Result<()> {
        budget.grant(requested)?;
        let mut segment = Vec::new();
        if segment.try_reserve_exact(self.segment_entries).is_err() {
            return Err(JudyError::OutOfMemory {
                requested,
                segments: budget.in_use(),
            });
        }
        self.segments.push(segment);
        self.uncarved += self.segment_entries;
        trace!(
            segments = self.segments.len(),
            entries = self.segment_entries,
            "arena.slab.grow"
        );
        Ok(())
    }

    /// Hand out a zero-filled block of the given size class.
    pub fn alloc(&mut self, class: u8, budget: &mut SegmentBudget) -> Result<(NodeId, &mut T)> {
        let index = match self.free[class as usize].pop() {
            Some(index) => {
                trace!(class, index, "arena.slab.reuse");
                index
            }
            None => self.carve(class, budget)?,
        };

        let (seg, pos) = self.locate(index);
        let entry = &mut self.segments[seg][pos];
        debug_assert!(!entry.live);
        entry.live = true;
        entry.class = class;
        entry.block.reset();
        self.live += 1;

        let id = NodeId {
            index,
            generation: entry.generation,
        };
        Ok((id, &mut entry.block))
    }

    fn carve(&mut self, class: u8, budget: &mut SegmentBudget) -> Result<u32> {
        if self.uncarved == 0 {
            self.grow(1, budget)?;
        }
        while self.segments[self.tail].len() == self.segment_entries {
            self.tail += 1;
        }
        let seg = self.tail;
        let pos = self.segments[seg].len();
        self.segments[seg].push(Entry {
            generation: 0,
            class,
            live: false,
            block: T::default(),
        });
        self.uncarved -= 1;
        Ok((seg * self.segment_entries + pos) as u32)
    }

    /// Return a block to its size-class free list.
    pub fn free(&mut self, id: NodeId) {
        let (seg, pos) = self.locate(id.index);
        let entry = &mut self.segments[seg][pos];
        assert!(
            entry.live && entry.generation == id.generation,
            "double free of arena block {id:?}"
        );
        entry.live = false;
        entry.generation = entry.generation.wrapping_add(1);
        self.free[entry.class as usize].push(id.index);
        self.live -= 1;
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        let (seg, pos) = self.locate(id.index);
        let entry = self.segments.get(seg)?.get(pos)?;
        (entry.live && entry.generation == id.generation).then_some(&entry.block)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        let (seg, pos) = self.locate(id.index);
        let entry = self.segments.get_mut(seg)?.get_mut(pos)?;
        (entry.live && entry.generation == id.generation).then_some(&mut entry.block)
    }

    #[inline]
    fn locate(&self, index: u32) -> (usize, usize) {
        let index = index as usize;
        (index / self.segment_entries, index % self.segment_entries)
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn free_blocks(&self) -> usize {
        self.free.iter().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub fn segments(&self) -> usize {
        self.segments.len()
    }
}
