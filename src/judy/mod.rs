//! Judy-style compressed trie over byte-string keys.
//!
//! Keys map to caller-owned `u64` cells. The trie adapts its node encoding
//! to the data:
//!
//! - Sparse branches live in sorted linear nodes that are
//!   promoted through six size classes as they fill.
//! - A full linear node of the largest class is split into a 256-way radix
//!   node keyed by its first byte.
//! - Unbranched key tails are stored literally in span nodes.
//!
//! Navigation is driven by a cursor stack of `(node, offset, slot)` frames.
//! Positioned lookups rebuild it, [`Judy::next`]/[`Judy::prev`] walk it, and
//! [`Judy::delete`] unwinds it to remove the current key.
//!
//! A zero byte terminates a key: bytes after the first zero are ignored.
//! Binary keys should go through [`crate::encoding`] first.

pub(crate) mod cursor;
pub(crate) mod iter;
pub(crate) mod node;

pub use iter::Iter;

use smallvec::SmallVec;
use tracing::debug;

use crate::arena::{Arena, ArenaStats, DataId, NodeId, Reserve};
use crate::config::JudyConfig;
use crate::error::Result;

use cursor::{Cursor, Frame, Gap};
use node::{
    chunk_at, is_leaf_chunk, key_size_at, lead_byte, next_chunk_offset, strip_lead_byte,
    LinearClass, NodeRef, Slot, SpanMatch, CHUNK_BYTES, RADIX_FANOUT, SPAN_BYTES,
};

/// Where a slot lives, so it can be read or overwritten in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotLoc {
    Root,
    Linear(NodeId, usize),
    /// Inner radix table and low nibble.
    Radix(NodeId, usize),
    /// A span's `next` slot.
    Span(NodeId),
}

/// Outcome of a positioned descent.
enum Probe {
    Found(SlotLoc),
    /// The key is absent; the deepest frame sits just before where it would
    /// be.
    Missing,
    /// The key is absent; the deepest frame selects the linear entry or span
    /// whose subtree precedes it.
    After,
    /// The key is absent and sorts before everything under the deepest frame
    /// (a span).
    Before,
}

/// A compressed trie mapping byte strings to `u64` cells.
///
/// Not thread-safe: lookups and iteration move the shared cursor, so even
/// read-only operations take `&mut self`.
pub struct Judy {
    pub(crate) arena: Arena,
    pub(crate) root: Slot,
    cursor: Cursor,
    count: usize,
}

/// Bytes up to the first zero terminator.
#[inline]
fn terminated(key: &[u8]) -> &[u8] {
    match key.iter().position(|&b| b == 0) {
        Some(end) => &key[..end],
        None => key,
    }
}

impl Judy {
    /// Open an empty trie whose cursor reconstructs keys up to `cursor_depth`
    /// levels deep.
    pub fn open(cursor_depth: usize) -> Result<Self> {
        Self::with_config(JudyConfig::default().with_cursor_depth(cursor_depth))
    }

    pub fn with_config(config: JudyConfig) -> Result<Self> {
        config.validate()?;
        let arena = Arena::open(&config)?;
        let cursor = Cursor::new(config.cursor_depth)?;
        debug!(
            cursor_depth = config.cursor_depth,
            segment_entries = config.segment_entries,
            max_segments = ?config.max_segments,
            "judy.open"
        );
        Ok(Self {
            arena,
            root: Slot::Empty,
            cursor,
            count: 0,
        })
    }

    /// Release the trie and every arena segment.
    pub fn close(self) {
        let stats = self.arena.stats();
        debug!(keys = self.count, segments = stats.segments, "judy.close");
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Allocate zero-filled auxiliary data that lives as long as the trie.
    pub fn data_alloc(&mut self, len: usize) -> Result<DataId> {
        self.arena.data_alloc(len)
    }

    pub fn data(&self, id: DataId) -> &[u8] {
        self.arena.data(id)
    }

    pub fn data_mut(&mut self, id: DataId) -> &mut [u8] {
        self.arena.data_mut(id)
    }

    // =========================================================================
    // Slot access
    // =========================================================================

    fn slot(&self, loc: SlotLoc) -> Slot {
        match loc {
            SlotLoc::Root => self.root,
            SlotLoc::Linear(id, idx) => self.arena.linear(id).slot(idx),
            SlotLoc::Radix(inner, idx) => self.arena.radix(inner).slots[idx],
            SlotLoc::Span(id) => self.arena.span(id).next,
        }
    }

    fn slot_mut(&mut self, loc: SlotLoc) -> &mut Slot {
        match loc {
            SlotLoc::Root => &mut self.root,
            SlotLoc::Linear(id, idx) => self.arena.linear_mut(id).slot_mut(idx),
            SlotLoc::Radix(inner, idx) => &mut self.arena.radix_mut(inner).slots[idx],
            SlotLoc::Span(id) => &mut self.arena.span_mut(id).next,
        }
    }

    fn cell_mut(&mut self, loc: SlotLoc) -> &mut u64 {
        match self.slot_mut(loc) {
            Slot::Cell(value) => value,
            other => unreachable!("expected a cell at {loc:?}, found {other:?}"),
        }
    }

    /// Turn an empty leaf slot into a fresh zero cell.
    fn claim_cell(&mut self, loc: SlotLoc) -> &mut u64 {
        let slot = self.slot_mut(loc);
        if slot.is_empty() {
            *slot = Slot::Cell(0);
            self.count += 1;
        }
        self.cell_mut(loc)
    }

    fn radix_inner_or_alloc(&mut self, outer: NodeId, byte: u8) -> Result<NodeId> {
        if let Some(inner) = self.arena.radix(outer).inner(byte) {
            return Ok(inner);
        }
        let inner = self.arena.alloc_radix()?;
        self.arena.radix_mut(outer).slots[usize::from(byte >> 4)] =
            Slot::Node(NodeRef::Radix(inner));
        Ok(inner)
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Worst case for one insert: a span split into linear nodes, a full
    /// linear split into a radix node and one node per distinct byte, a
    /// promotion, and the spans for the key tail.
    fn insert_reserve(key_len: usize) -> Reserve {
        let split_groups = LinearClass::LARGEST.slots(1);
        Reserve {
            linear: SPAN_BYTES / CHUNK_BYTES + split_groups + 3,
            radix: RADIX_FANOUT + 2,
            span: key_len / SPAN_BYTES + 2,
        }
    }

    /// Insert `key`, returning its cell.
    ///
    /// A new key's cell starts at zero and must be set to a nonzero value by
    /// the caller. The reference is invalidated by the next mutation. The
    /// cursor is left unpositioned.
    pub fn insert(&mut self, key: &[u8]) -> Result<&mut u64> {
        let key = terminated(key);
        self.cursor.reset();
        self.arena.reserve(Self::insert_reserve(key.len()))?;

        let mut loc = SlotLoc::Root;
        let mut off = 0usize;

        loop {
            let node = match self.slot(loc) {
                Slot::Empty => break,
                Slot::Cell(_) => return Ok(self.cell_mut(loc)),
                Slot::Node(node) => node,
            };

            match node {
                NodeRef::Linear(id) => {
                    let start = off;
                    let value = chunk_at(key, off);
                    let leaf = is_leaf_chunk(value);
                    off = next_chunk_offset(off);

                    let linear = self.arena.linear(id);
                    let (found, full, class) =
                        (linear.search(value), linear.is_full(), linear.class());

                    match found {
                        Ok(idx) => loc = SlotLoc::Linear(id, idx),
                        Err(idx) if !full => {
                            self.arena.linear_mut(id).insert(idx, value, Slot::Empty);
                            loc = SlotLoc::Linear(id, idx);
                        }
                        Err(idx) if class < LinearClass::LARGEST => {
                            let promoted = self.promote(loc, id, idx, value)?;
                            loc = SlotLoc::Linear(promoted, idx);
                        }
                        Err(_) => {
                            self.split_linear(loc, id)?;
                            off = start;
                            continue;
                        }
                    }

                    if leaf {
                        return Ok(self.claim_cell(loc));
                    }
                }
                NodeRef::Radix(id) => {
                    let byte = key.get(off).copied().unwrap_or(0);
                    let inner = self.radix_inner_or_alloc(id, byte)?;
                    loc = SlotLoc::Radix(inner, usize::from(byte & 0x0F));
                    if byte == 0 {
                        return Ok(self.claim_cell(loc));
                    }
                    off += 1;
                }
                NodeRef::Span(id) => {
                    let rest = &key[off.min(key.len())..];
                    match self.arena.span(id).compare(rest) {
                        SpanMatch::Leaf => return Ok(self.cell_mut(SlotLoc::Span(id))),
                        SpanMatch::Through => {
                            loc = SlotLoc::Span(id);
                            off += SPAN_BYTES;
                        }
                        SpanMatch::Before | SpanMatch::After => self.split_span(loc, id)?,
                    }
                }
            }
        }

        self.append(loc, key, off)
    }

    /// Copy a full linear node into the next size class with `value` opened
    /// up at `idx`.
    fn promote(&mut self, parent: SlotLoc, id: NodeId, idx: usize, value: u32) -> Result<NodeId> {
        let (class, key_size) = {
            let node = self.arena.linear(id);
            (node.class(), node.key_size())
        };
        let Some(bigger) = class.next() else {
            unreachable!("promotion past the largest linear class");
        };

        let promoted = self.arena.alloc_linear(bigger, key_size)?;
        let (keys, slots) = self.arena.linear_mut(id).take_entries();
        let node = self.arena.linear_mut(promoted);
        for (&key, &slot) in keys.iter().zip(&slots) {
            node.push(key, slot);
        }
        node.insert(idx, value, Slot::Empty);

        self.arena.free_linear(id);
        *self.slot_mut(parent) = Slot::Node(NodeRef::Linear(promoted));
        debug!(from = ?class, to = ?bigger, key_size, "judy.linear.promote");
        Ok(promoted)
    }

    /// Decompose a full linear node of the largest class into a radix node
    /// keyed by each entry's first byte.
    fn split_linear(&mut self, parent: SlotLoc, id: NodeId) -> Result<()> {
        let key_size = self.arena.linear(id).key_size();
        let (keys, slots) = self.arena.linear_mut(id).take_entries();
        let outer = self.arena.alloc_radix()?;

        let mut start = 0;
        while start < keys.len() {
            let byte = lead_byte(keys[start], key_size);
            let end = start
                + keys[start..]
                    .iter()
                    .take_while(|&&k| lead_byte(k, key_size) == byte)
                    .count();

            let slot = if byte == 0 || key_size == 1 {
                // Ends here, or the byte was the whole chunk: one entry.
                debug_assert_eq!(end - start, 1);
                slots[start]
            } else {
                let shorter = key_size - 1;
                let class = LinearClass::fitting(end - start, shorter);
                let child = self.arena.alloc_linear(class, shorter)?;
                let node = self.arena.linear_mut(child);
                for (&key, &slot) in keys[start..end].iter().zip(&slots[start..end]) {
                    node.push(strip_lead_byte(key, key_size), slot);
                }
                Slot::Node(NodeRef::Linear(child))
            };

            let inner = self.radix_inner_or_alloc(outer, byte)?;
            self.arena.radix_mut(inner).slots[usize::from(byte & 0x0F)] = slot;
            start = end;
        }

        self.arena.free_linear(id);
        *self.slot_mut(parent) = Slot::Node(NodeRef::Radix(outer));
        debug!(entries = keys.len(), key_size, "judy.linear.split");
        Ok(())
    }

    /// Replace a span with a chain of single-entry linear nodes, one per
    /// 4-byte chunk, ending at its terminator or its last chunk.
    fn split_span(&mut self, parent: SlotLoc, id: NodeId) -> Result<()> {
        let span = self.arena.span(id).clone();
        let run = span.bytes();

        let mut loc = parent;
        let mut off = 0;
        loop {
            let value = chunk_at(run, off);
            off += CHUNK_BYTES;
            let node = self.arena.alloc_linear(LinearClass::SMALLEST, CHUNK_BYTES)?;
            *self.slot_mut(loc) = Slot::Node(NodeRef::Linear(node));

            if off >= SPAN_BYTES || is_leaf_chunk(value) {
                self.arena.linear_mut(node).push(value, span.next);
                break;
            }
            self.arena.linear_mut(node).push(value, Slot::Empty);
            loc = SlotLoc::Linear(node, 0);
        }

        self.arena.free_span(id);
        debug!(bytes = run.len(), "judy.span.split");
        Ok(())
    }

    /// Store the rest of `key` from `off` below the empty slot at `loc`.
    fn append(&mut self, mut loc: SlotLoc, key: &[u8], mut off: usize) -> Result<&mut u64> {
        // Realign to a chunk boundary after radix levels.
        if off % CHUNK_BYTES != 0 {
            let value = chunk_at(key, off);
            let node = self.arena.alloc_linear(LinearClass::SMALLEST, key_size_at(off))?;
            self.arena.linear_mut(node).push(value, Slot::Empty);
            *self.slot_mut(loc) = Slot::Node(NodeRef::Linear(node));
            loc = SlotLoc::Linear(node, 0);
            off = next_chunk_offset(off);
            if is_leaf_chunk(value) {
                return Ok(self.claim_cell(loc));
            }
        }

        loop {
            let take = key.len().saturating_sub(off).min(SPAN_BYTES);
            let span = self.arena.alloc_span()?;
            self.arena.span_mut(span).fill(&key[off..off + take]);
            *self.slot_mut(loc) = Slot::Node(NodeRef::Span(span));
            loc = SlotLoc::Span(span);
            off += take;
            if take < SPAN_BYTES {
                return Ok(self.claim_cell(loc));
            }
        }
    }

    // =========================================================================
    // Positioned lookup
    // =========================================================================

    /// Descend along `key`, rebuilding the cursor stack.
    fn locate(&mut self, key: &[u8]) -> Probe {
        let key = terminated(key);
        self.cursor.reset();

        let mut slot = self.root;
        let mut off = 0usize;

        loop {
            let Slot::Node(node) = slot else {
                return Probe::Missing;
            };

            match node {
                NodeRef::Linear(id) => {
                    let value = chunk_at(key, off);
                    let linear = self.arena.linear(id);
                    let found = linear.search(value);
                    let selected = match found {
                        Ok(idx) => idx as i32,
                        Err(idx) => idx as i32 - 1,
                    };
                    let next = found.ok().map(|idx| linear.slot(idx));
                    self.cursor.push(Frame {
                        node,
                        off,
                        slot: selected,
                    });

                    let (Ok(idx), Some(next)) = (found, next) else {
                        return if selected >= 0 { Probe::After } else { Probe::Missing };
                    };
                    if is_leaf_chunk(value) {
                        return Probe::Found(SlotLoc::Linear(id, idx));
                    }
                    slot = next;
                    off = next_chunk_offset(off);
                }
                NodeRef::Radix(id) => {
                    let byte = key.get(off).copied().unwrap_or(0);
                    self.cursor.push(Frame {
                        node,
                        off,
                        slot: i32::from(byte),
                    });

                    let Some(inner) = self.arena.radix(id).inner(byte) else {
                        return Probe::Missing;
                    };
                    let lo = usize::from(byte & 0x0F);
                    let next = self.arena.radix(inner).slots[lo];
                    if byte == 0 {
                        return match next {
                            Slot::Cell(_) => Probe::Found(SlotLoc::Radix(inner, lo)),
                            _ => Probe::Missing,
                        };
                    }
                    slot = next;
                    off += 1;
                }
                NodeRef::Span(id) => {
                    self.cursor.push(Frame { node, off, slot: 0 });
                    let span = self.arena.span(id);
                    match span.compare(&key[off.min(key.len())..]) {
                        SpanMatch::Leaf => return Probe::Found(SlotLoc::Span(id)),
                        SpanMatch::Through => {
                            slot = span.next;
                            off += SPAN_BYTES;
                        }
                        SpanMatch::Before => return Probe::Before,
                        SpanMatch::After => return Probe::After,
                    }
                }
            }
        }
    }

    fn settle(&mut self, loc: Option<SlotLoc>) -> Option<&mut u64> {
        self.cursor.set_on_key(loc.is_some());
        match loc {
            Some(loc) => Some(self.cell_mut(loc)),
            None => None,
        }
    }

    /// Cell of `key`, positioning the cursor on it.
    ///
    /// On a miss the cursor stays where the key would be, so [`Judy::next`]
    /// and [`Judy::prev`] yield its neighbours.
    pub fn lookup_exact(&mut self, key: &[u8]) -> Option<&mut u64> {
        let loc = match self.locate(key) {
            Probe::Found(loc) => Some(loc),
            Probe::After => {
                self.cursor.set_gap(Gap::After);
                return None;
            }
            Probe::Before => {
                self.cursor.set_gap(Gap::Before);
                return None;
            }
            Probe::Missing => None,
        };
        self.settle(loc)
    }

    /// Cell of the smallest key greater than or equal to `key`.
    pub fn lookup_at_or_after(&mut self, key: &[u8]) -> Option<&mut u64> {
        let loc = match self.locate(key) {
            Probe::Found(loc) => Some(loc),
            Probe::Before => self.enter_deepest_span(),
            Probe::Missing | Probe::After => self.advance(),
        };
        self.settle(loc)
    }

    pub fn get(&mut self, key: &[u8]) -> Option<u64> {
        self.lookup_exact(key).map(|cell| *cell)
    }

    pub fn contains_key(&mut self, key: &[u8]) -> bool {
        self.lookup_exact(key).is_some()
    }

    // =========================================================================
    // Ordered navigation
    // =========================================================================

    /// Cell of the smallest key.
    pub fn first(&mut self) -> Option<&mut u64> {
        self.cursor.reset();
        let loc = self.descend_first(self.root, 0);
        self.settle(loc)
    }

    /// Cell of the largest key.
    pub fn last(&mut self) -> Option<&mut u64> {
        self.cursor.reset();
        let loc = self.descend_last(self.root, 0);
        self.settle(loc)
    }

    /// Cell of the key after the cursor.
    pub fn next(&mut self) -> Option<&mut u64> {
        let loc = self.advance();
        self.settle(loc)
    }

    /// Cell of the key before the cursor.
    pub fn prev(&mut self) -> Option<&mut u64> {
        let loc = self.retreat();
        self.settle(loc)
    }

    /// Key at the cursor, truncated to `max_len - 1` bytes.
    ///
    /// Only the first `cursor_depth` levels are replayed, so keys deeper than
    /// the configured depth come back truncated.
    pub fn reconstruct_key(&self, max_len: usize) -> Vec<u8> {
        self.cursor.reconstruct(&self.arena, max_len)
    }

    /// Key at the cursor.
    pub fn key(&self) -> Vec<u8> {
        self.reconstruct_key(usize::MAX)
    }

    /// First non-empty `(byte, inner, slot)` of a radix node at or above `from`.
    fn radix_scan_up(&self, outer: NodeId, from: i32) -> Option<(u8, NodeId, Slot)> {
        let table = self.arena.radix(outer);
        let mut byte = usize::try_from(from).unwrap_or(0);
        while byte < 256 {
            let Some(inner) = table.inner(byte as u8) else {
                byte = (byte | 0x0F) + 1;
                continue;
            };
            let slot = self.arena.radix(inner).slots[byte & 0x0F];
            if !slot.is_empty() {
                return Some((byte as u8, inner, slot));
            }
            byte += 1;
        }
        None
    }

    /// Last non-empty `(byte, inner, slot)` of a radix node at or below `from`.
    fn radix_scan_down(&self, outer: NodeId, from: i32) -> Option<(u8, NodeId, Slot)> {
        let table = self.arena.radix(outer);
        let mut byte = from.min(255);
        while byte >= 0 {
            let Some(inner) = table.inner(byte as u8) else {
                byte = (byte & !0x0F) - 1;
                continue;
            };
            let slot = self.arena.radix(inner).slots[(byte & 0x0F) as usize];
            if !slot.is_empty() {
                return Some((byte as u8, inner, slot));
            }
            byte -= 1;
        }
        None
    }

    /// Walk to the smallest key under `slot`, pushing one frame per level.
    fn descend_first(&mut self, mut slot: Slot, mut off: usize) -> Option<SlotLoc> {
        loop {
            let Slot::Node(node) = slot else {
                return None;
            };
            match node {
                NodeRef::Linear(id) => {
                    let linear = self.arena.linear(id);
                    if linear.is_empty() {
                        return None;
                    }
                    let (value, next) = (linear.key(0), linear.slot(0));
                    self.cursor.push(Frame { node, off, slot: 0 });
                    if is_leaf_chunk(value) {
                        return Some(SlotLoc::Linear(id, 0));
                    }
                    slot = next;
                    off = next_chunk_offset(off);
                }
                NodeRef::Radix(id) => {
                    let (byte, inner, next) = self.radix_scan_up(id, 0)?;
                    self.cursor.push(Frame {
                        node,
                        off,
                        slot: i32::from(byte),
                    });
                    if byte == 0 {
                        return Some(SlotLoc::Radix(inner, 0));
                    }
                    slot = next;
                    off += 1;
                }
                NodeRef::Span(id) => {
                    self.cursor.push(Frame { node, off, slot: 0 });
                    let span = self.arena.span(id);
                    if span.is_leaf() {
                        return Some(SlotLoc::Span(id));
                    }
                    slot = span.next;
                    off += SPAN_BYTES;
                }
            }
        }
    }

    /// Walk to the largest key under `slot`, pushing one frame per level.
    fn descend_last(&mut self, mut slot: Slot, mut off: usize) -> Option<SlotLoc> {
        loop {
            let Slot::Node(node) = slot else {
                return None;
            };
            match node {
                NodeRef::Linear(id) => {
                    let linear = self.arena.linear(id);
                    let idx = linear.len().checked_sub(1)?;
                    let (value, next) = (linear.key(idx), linear.slot(idx));
                    self.cursor.push(Frame {
                        node,
                        off,
                        slot: idx as i32,
                    });
                    if is_leaf_chunk(value) {
                        return Some(SlotLoc::Linear(id, idx));
                    }
                    slot = next;
                    off = next_chunk_offset(off);
                }
                NodeRef::Radix(id) => {
                    let (byte, inner, next) = self.radix_scan_down(id, 255)?;
                    self.cursor.push(Frame {
                        node,
                        off,
                        slot: i32::from(byte),
                    });
                    if byte == 0 {
                        return Some(SlotLoc::Radix(inner, 0));
                    }
                    slot = next;
                    off += 1;
                }
                NodeRef::Span(id) => {
                    self.cursor.push(Frame { node, off, slot: 0 });
                    let span = self.arena.span(id);
                    if span.is_leaf() {
                        return Some(SlotLoc::Span(id));
                    }
                    slot = span.next;
                    off += SPAN_BYTES;
                }
            }
        }
    }

    /// After a `Before` probe the deepest frame is a span whose whole subtree
    /// follows the key.
    fn enter_deepest_span(&mut self) -> Option<SlotLoc> {
        let frame = self.cursor.last()?;
        let NodeRef::Span(id) = frame.node else {
            return None;
        };
        let span = self.arena.span(id);
        if span.is_leaf() {
            return Some(SlotLoc::Span(id));
        }
        let next = span.next;
        self.descend_first(next, frame.off + SPAN_BYTES)
    }

    fn advance(&mut self) -> Option<SlotLoc> {
        if self.cursor.gap() == Gap::Before {
            if let Some(loc) = self.enter_deepest_span() {
                return Some(loc);
            }
        }
        while let Some(frame) = self.cursor.last() {
            match frame.node {
                NodeRef::Linear(id) => {
                    let linear = self.arena.linear(id);
                    let idx = (frame.slot + 1) as usize;
                    if idx < linear.len() {
                        let (value, next) = (linear.key(idx), linear.slot(idx));
                        self.cursor.set_slot(idx as i32);
                        if is_leaf_chunk(value) {
                            return Some(SlotLoc::Linear(id, idx));
                        }
                        return self.descend_first(next, next_chunk_offset(frame.off));
                    }
                }
                NodeRef::Radix(id) => {
                    if let Some((byte, inner, next)) = self.radix_scan_up(id, frame.slot + 1) {
                        self.cursor.set_slot(i32::from(byte));
                        if byte == 0 {
                            return Some(SlotLoc::Radix(inner, 0));
                        }
                        return self.descend_first(next, frame.off + 1);
                    }
                }
                NodeRef::Span(_) => {}
            }
            self.cursor.pop();
        }
        None
    }

    /// Largest key under the entry the deepest frame selects.
    fn enter_selected_last(&mut self) -> Option<SlotLoc> {
        let frame = self.cursor.last()?;
        match frame.node {
            NodeRef::Linear(id) => {
                let idx = usize::try_from(frame.slot).ok()?;
                let linear = self.arena.linear(id);
                let (value, next) = (linear.key(idx), linear.slot(idx));
                if is_leaf_chunk(value) {
                    return Some(SlotLoc::Linear(id, idx));
                }
                self.descend_last(next, next_chunk_offset(frame.off))
            }
            NodeRef::Span(id) => {
                let span = self.arena.span(id);
                if span.is_leaf() {
                    return Some(SlotLoc::Span(id));
                }
                let next = span.next;
                self.descend_last(next, frame.off + SPAN_BYTES)
            }
            NodeRef::Radix(_) => None,
        }
    }

    fn retreat(&mut self) -> Option<SlotLoc> {
        if self.cursor.gap() == Gap::After {
            if let Some(loc) = self.enter_selected_last() {
                return Some(loc);
            }
        }
        while let Some(frame) = self.cursor.last() {
            match frame.node {
                NodeRef::Linear(id) if frame.slot > 0 => {
                    let idx = (frame.slot - 1) as usize;
                    let linear = self.arena.linear(id);
                    let (value, next) = (linear.key(idx), linear.slot(idx));
                    self.cursor.set_slot(idx as i32);
                    if is_leaf_chunk(value) {
                        return Some(SlotLoc::Linear(id, idx));
                    }
                    return self.descend_last(next, next_chunk_offset(frame.off));
                }
                NodeRef::Radix(id) if frame.slot > 0 => {
                    if let Some((byte, inner, next)) = self.radix_scan_down(id, frame.slot - 1) {
                        self.cursor.set_slot(i32::from(byte));
                        if byte == 0 {
                            return Some(SlotLoc::Radix(inner, 0));
                        }
                        return self.descend_last(next, frame.off + 1);
                    }
                }
                _ => {}
            }
            self.cursor.pop();
        }
        None
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Slot of the key the cursor sits on.
    fn current(&self) -> Option<SlotLoc> {
        if !self.cursor.on_key() {
            return None;
        }
        let frame = self.cursor.last()?;
        match frame.node {
            NodeRef::Linear(id) => Some(SlotLoc::Linear(id, usize::try_from(frame.slot).ok()?)),
            NodeRef::Radix(id) => {
                let byte = u8::try_from(frame.slot).ok()?;
                let inner = self.arena.radix(id).inner(byte)?;
                Some(SlotLoc::Radix(inner, usize::from(byte & 0x0F)))
            }
            NodeRef::Span(id) => Some(SlotLoc::Span(id)),
        }
    }

    /// Remove the key at the cursor, returning its cell value.
    ///
    /// Returns `None` when the cursor is not on a key (no lookup yet, a
    /// failed lookup, or iteration past either end). Nodes emptied by the
    /// removal are returned to the arena. The cursor is left unpositioned.
    pub fn delete(&mut self) -> Option<u64> {
        let removed = match self.slot(self.current()?) {
            Slot::Cell(value) => value,
            _ => return None,
        };
        self.count -= 1;

        while let Some(frame) = self.cursor.pop() {
            match frame.node {
                NodeRef::Linear(id) => {
                    let linear = self.arena.linear_mut(id);
                    linear.remove(frame.slot as usize);
                    if !linear.is_empty() {
                        break;
                    }
                    self.arena.free_linear(id);
                }
                NodeRef::Radix(id) => {
                    let byte = frame.slot as u8;
                    let Some(inner) = self.arena.radix(id).inner(byte) else {
                        unreachable!("radix frame without inner table");
                    };
                    let table = self.arena.radix_mut(inner);
                    table.slots[usize::from(byte & 0x0F)] = Slot::Empty;
                    if !table.is_empty() {
                        break;
                    }
                    self.arena.free_radix(inner);

                    let outer = self.arena.radix_mut(id);
                    outer.slots[usize::from(byte >> 4)] = Slot::Empty;
                    if !outer.is_empty() {
                        break;
                    }
                    self.arena.free_radix(id);
                }
                NodeRef::Span(id) => self.arena.free_span(id),
            }

            if self.cursor.frames().is_empty() {
                self.root = Slot::Empty;
            }
        }

        self.cursor.reset();
        Some(removed)
    }

    /// Remove `key`, returning its cell value.
    pub fn remove(&mut self, key: &[u8]) -> Option<u64> {
        self.lookup_exact(key)?;
        self.delete()
    }

    /// Distinct bytes that follow `prefix` in stored keys, ascending.
    pub fn child_bytes(&mut self, prefix: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut from = 1u8;
        while let Some(byte) = self.next_branch(prefix, from) {
            bytes.push(byte);
            match byte.checked_add(1) {
                Some(next) => from = next,
                None => break,
            }
        }
        bytes
    }

    /// Smallest byte `>= from` that follows `prefix` in some stored key.
    ///
    /// One ordered probe: the first key at or after `prefix + [from]` either
    /// still starts with `prefix`, giving the byte, or has left the subtree.
    /// The byte is read from every cursor frame, so it is exact past the
    /// configured cursor depth.
    pub(crate) fn next_branch(&mut self, prefix: &[u8], from: u8) -> Option<u8> {
        let mut probe: SmallVec<[u8; 64]> = SmallVec::from_slice(prefix);
        probe.push(from);
        self.lookup_at_or_after(&probe)?;
        let key = self.cursor.reconstruct_full(&self.arena, prefix.len() + 2);
        (key.len() > prefix.len() && key.starts_with(prefix)).then(|| key[prefix.len()])
    }

    /// Ordered iterator over `(key, cell)` pairs; moves the cursor.
    pub fn iter(&mut self) -> Iter<'_> {
        Iter::new(self)
    }
}

impl std::fmt::Debug for Judy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Judy")
            .field("len", &self.count)
            .field("stats", &self.arena.stats())
            .finish()
    }
}
