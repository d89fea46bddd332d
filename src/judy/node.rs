//! Node encodings.
//!
//! Three variants make up the trie:
//!
//! - [`LinearNode`]: sorted partial keys (1-4 bytes wide, narrowing so that
//!   every node ends on a 4-byte boundary of the key) with parallel slots.
//!   Grows through six size classes before it is split into a radix node.
//! - [`RadixTable`]: 16-way table. A radix node is an outer table whose
//!   entries point at inner tables, giving a 256-way fan-out on one byte.
//! - [`SpanNode`]: up to [`SPAN_BYTES`] literal key bytes with no branching.
//!
//! A key ends where its chunk contains the zero terminator; the slot of such
//! an entry holds the caller's cell instead of a child.

use crate::arena::{Block, NodeId};

/// Bytes a linear node consumes per level, at most.
pub const CHUNK_BYTES: usize = 4;

/// Literal bytes stored in one span node.
pub const SPAN_BYTES: usize = 28;

/// Entries per radix table (outer or inner).
pub const RADIX_FANOUT: usize = 16;

/// Bytes one slot reference costs in the size-class accounting.
const SLOT_BYTES: usize = 4;

/// Byte size classes of linear nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinearClass {
    #[default]
    B8,
    B16,
    B32,
    B64,
    B128,
    B256,
}

impl LinearClass {
    pub const ALL: [LinearClass; 6] = [
        LinearClass::B8,
        LinearClass::B16,
        LinearClass::B32,
        LinearClass::B64,
        LinearClass::B128,
        LinearClass::B256,
    ];
    pub const SMALLEST: LinearClass = LinearClass::B8;
    pub const LARGEST: LinearClass = LinearClass::B256;

    #[inline]
    pub fn bytes(self) -> usize {
        8 << self.index()
    }

    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() as usize + 1).copied()
    }

    /// Number of entries a node of this class holds at the given key size.
    #[inline]
    pub fn slots(self, key_size: usize) -> usize {
        self.bytes() / (SLOT_BYTES + key_size)
    }

    /// Smallest class that holds `count` entries, capped at the largest.
    pub fn fitting(count: usize, key_size: usize) -> Self {
        Self::ALL
            .into_iter()
            .find(|class| class.slots(key_size) >= count)
            .unwrap_or(Self::LARGEST)
    }
}

/// Typed reference to a node; the variant is the tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRef {
    Linear(NodeId),
    Radix(NodeId),
    Span(NodeId),
}

/// Contents of a node slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Slot {
    #[default]
    Empty,
    /// Caller-owned value of a key that ends here.
    Cell(u64),
    Node(NodeRef),
}

impl Slot {
    #[inline]
    pub fn is_empty(self) -> bool {
        matches!(self, Slot::Empty)
    }
}

// =============================================================================
// Key chunks
// =============================================================================

/// Width of the chunk a linear node at byte offset `off` compares.
#[inline]
pub fn key_size_at(off: usize) -> usize {
    CHUNK_BYTES - off % CHUNK_BYTES
}

/// Offset just past the chunk that starts at `off`.
#[inline]
pub fn next_chunk_offset(off: usize) -> usize {
    (off | (CHUNK_BYTES - 1)) + 1
}

/// Big-endian chunk of `key` from `off` up to the next 4-byte boundary.
///
/// Bytes past the end of the key read as the zero terminator, so chunks
/// compare in the same order as the keys they came from.
pub fn chunk_at(key: &[u8], off: usize) -> u32 {
    let end = next_chunk_offset(off);
    (off..end).fold(0u32, |value, i| {
        (value << 8) | u32::from(key.get(i).copied().unwrap_or(0))
    })
}

/// A chunk whose last byte is the terminator marks the end of a key.
#[inline]
pub fn is_leaf_chunk(value: u32) -> bool {
    value & 0xFF == 0
}

/// First (most significant) byte of a chunk.
#[inline]
pub fn lead_byte(value: u32, key_size: usize) -> u8 {
    (value >> (8 * (key_size - 1))) as u8
}

/// Drop the first byte of a chunk.
#[inline]
pub fn strip_lead_byte(value: u32, key_size: usize) -> u32 {
    value & ((1u32 << (8 * (key_size - 1))) - 1)
}

// =============================================================================
// Linear node
// =============================================================================

#[derive(Debug, Default)]
pub struct LinearNode {
    class: LinearClass,
    key_size: u8,
    keys: Vec<u32>,
    slots: Vec<Slot>,
}

impl Block for LinearNode {
    fn reset(&mut self) {
        self.keys.clear();
        self.slots.clear();
    }
}

impl LinearNode {
    pub(crate) fn init(&mut self, class: LinearClass, key_size: usize) {
        debug_assert!((1..=CHUNK_BYTES).contains(&key_size));
        self.class = class;
        self.key_size = key_size as u8;
        let cap = self.capacity();
        self.keys.reserve(cap);
        self.slots.reserve(cap);
    }

    #[inline]
    pub fn class(&self) -> LinearClass {
        self.class
    }

    #[inline]
    pub fn key_size(&self) -> usize {
        self.key_size as usize
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.class.slots(self.key_size())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    #[inline]
    pub fn key(&self, idx: usize) -> u32 {
        self.keys[idx]
    }

    #[inline]
    pub fn slot(&self, idx: usize) -> Slot {
        self.slots[idx]
    }

    #[inline]
    pub fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        &mut self.slots[idx]
    }

    #[cfg(test)]
    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    /// `Ok(idx)` on an exact match, else `Err(idx)` of the first larger key.
    #[inline]
    pub fn search(&self, value: u32) -> Result<usize, usize> {
        self.keys.binary_search(&value)
    }

    /// Shift-on-insert; the caller checks capacity.
    pub fn insert(&mut self, idx: usize, value: u32, slot: Slot) {
        debug_assert!(!self.is_full());
        debug_assert!(idx == 0 || self.keys[idx - 1] < value);
        debug_assert!(idx == self.len() || self.keys[idx] > value);
        self.keys.insert(idx, value);
        self.slots.insert(idx, slot);
    }

    /// Append an entry larger than every stored key.
    pub fn push(&mut self, value: u32, slot: Slot) {
        debug_assert!(self.keys.last().map_or(true, |&last| last < value));
        self.keys.push(value);
        self.slots.push(slot);
    }

    pub fn remove(&mut self, idx: usize) -> Slot {
        self.keys.remove(idx);
        self.slots.remove(idx)
    }

    /// Move every entry out, leaving the node empty.
    pub fn take_entries(&mut self) -> (Vec<u32>, Vec<Slot>) {
        (std::mem::take(&mut self.keys), std::mem::take(&mut self.slots))
    }
}

// =============================================================================
// Radix table
// =============================================================================

/// One 16-entry level of a radix node.
///
/// The outer table holds `Slot::Node(NodeRef::Radix(inner))` per high nibble;
/// inner tables hold children per low nibble. Byte 0 (outer 0, inner 0) is
/// the cell of a key that ends at this node.
#[derive(Debug, Default, Clone)]
pub struct RadixTable {
    pub slots: [Slot; RADIX_FANOUT],
}

impl Block for RadixTable {
    fn reset(&mut self) {
        self.slots = [Slot::Empty; RADIX_FANOUT];
    }
}

impl RadixTable {
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_empty())
    }

    /// Inner table covering the high nibble of `byte`.
    #[inline]
    pub fn inner(&self, byte: u8) -> Option<NodeId> {
        match self.slots[usize::from(byte >> 4)] {
            Slot::Node(NodeRef::Radix(inner)) => Some(inner),
            _ => None,
        }
    }
}

// =============================================================================
// Span node
// =============================================================================

/// How a key remainder relates to a span's stored run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanMatch {
    /// Key ends exactly where the span's key ends.
    Leaf,
    /// Key continues past a full span into its child.
    Through,
    /// Key sorts before everything under the span.
    Before,
    /// Key sorts after everything under the span.
    After,
}

#[derive(Debug, Default, Clone)]
pub struct SpanNode {
    bytes: [u8; SPAN_BYTES],
    len: u8,
    pub next: Slot,
}

impl Block for SpanNode {
    fn reset(&mut self) {
        self.bytes = [0; SPAN_BYTES];
        self.len = 0;
        self.next = Slot::Empty;
    }
}

impl SpanNode {
    pub fn fill(&mut self, run: &[u8]) {
        debug_assert!(run.len() <= SPAN_BYTES);
        debug_assert!(!run.contains(&0));
        self.bytes[..run.len()].copy_from_slice(run);
        self.len = run.len() as u8;
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// A span shorter than its capacity ends in the terminator: its `next`
    /// is a cell rather than a child.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        (self.len as usize) < SPAN_BYTES
    }

    pub fn compare(&self, rest: &[u8]) -> SpanMatch {
        let stored = self.bytes();
        let common = stored.len().min(rest.len());
        match stored[..common].cmp(&rest[..common]) {
            std::cmp::Ordering::Less => return SpanMatch::After,
            std::cmp::Ordering::Greater => return SpanMatch::Before,
            std::cmp::Ordering::Equal => {}
        }

        if self.is_leaf() {
            match rest.len().cmp(&stored.len()) {
                std::cmp::Ordering::Equal => SpanMatch::Leaf,
                std::cmp::Ordering::Greater => SpanMatch::After,
                std::cmp::Ordering::Less => SpanMatch::Before,
            }
        } else if rest.len() >= SPAN_BYTES {
            SpanMatch::Through
        } else {
            SpanMatch::Before
        }
    }
}
