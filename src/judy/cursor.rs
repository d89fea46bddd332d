//! Cursor stack.
//!
//! Every positioned lookup rebuilds the stack root-to-leaf; iteration extends
//! and unwinds it one level at a time. Deletion walks it bottom-up.

use tracing::warn;

use super::node::{NodeRef, SPAN_BYTES};
use crate::arena::Arena;
use crate::error::{JudyError, Result};

/// One level of the path to the current key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Frame {
    pub node: NodeRef,
    /// Key offset at which this node starts consuming bytes.
    pub off: usize,
    /// Entry index for linear nodes (`-1` before the first), byte value for
    /// radix nodes, always 0 for spans.
    pub slot: i32,
}

/// Where a failed lookup left the cursor relative to the deepest frame's
/// selected entry (a linear entry or a span).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Gap {
    #[default]
    None,
    /// The probed key sorts before everything under the selected entry.
    Before,
    /// The probed key sorts after everything under the selected entry.
    After,
}

pub(crate) struct Cursor {
    frames: Vec<Frame>,
    depth: usize,
    /// Whether the frames end on a stored key.
    on_key: bool,
    gap: Gap,
    depth_warned: bool,
}

impl Cursor {
    pub fn new(depth: usize) -> Result<Self> {
        let mut frames = Vec::new();
        if frames.try_reserve_exact(depth).is_err() {
            return Err(JudyError::OutOfMemory {
                requested: depth,
                segments: 1,
            });
        }
        Ok(Self {
            frames,
            depth,
            on_key: false,
            gap: Gap::None,
            depth_warned: false,
        })
    }

    #[inline]
    pub fn reset(&mut self) {
        self.frames.clear();
        self.on_key = false;
        self.gap = Gap::None;
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == self.depth && !self.depth_warned {
            self.depth_warned = true;
            warn!(
                depth = self.depth,
                "cursor depth exceeded; reconstructed keys will be truncated"
            );
        }
        self.frames.push(frame);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    #[inline]
    pub fn last(&self) -> Option<Frame> {
        self.frames.last().copied()
    }

    /// Re-select the entry of the deepest frame.
    #[inline]
    pub fn set_slot(&mut self, slot: i32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.slot = slot;
        }
    }

    #[inline]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    #[inline]
    pub fn on_key(&self) -> bool {
        self.on_key
    }

    #[inline]
    pub fn set_on_key(&mut self, on_key: bool) {
        self.on_key = on_key;
        self.gap = Gap::None;
    }

    #[inline]
    pub fn gap(&self) -> Gap {
        self.gap
    }

    /// Leave the cursor off-key, next to the deepest frame's entry.
    #[inline]
    pub fn set_gap(&mut self, gap: Gap) {
        self.on_key = false;
        self.gap = gap;
    }

    /// Replay the first `depth` frames into at most `max_len - 1` key bytes.
    pub fn reconstruct(&self, arena: &Arena, max_len: usize) -> Vec<u8> {
        self.replay(arena, max_len, self.depth)
    }

    /// Like [`Cursor::reconstruct`], but replays frames past the configured
    /// depth too.
    pub fn reconstruct_full(&self, arena: &Arena, max_len: usize) -> Vec<u8> {
        self.replay(arena, max_len, usize::MAX)
    }

    fn replay(&self, arena: &Arena, max_len: usize, frames: usize) -> Vec<u8> {
        let limit = max_len.saturating_sub(1);
        let mut key = Vec::new();

        'frames: for frame in self.frames.iter().take(frames) {
            if key.len() >= limit {
                break;
            }
            match frame.node {
                NodeRef::Linear(id) => {
                    let node = arena.linear(id);
                    let Ok(idx) = usize::try_from(frame.slot) else {
                        break;
                    };
                    if idx >= node.len() {
                        break;
                    }
                    let value = node.key(idx);
                    for shift in (0..node.key_size()).rev() {
                        let byte = (value >> (8 * shift)) as u8;
                        if byte == 0 {
                            break 'frames;
                        }
                        key.push(byte);
                    }
                }
                NodeRef::Radix(_) => {
                    if frame.slot <= 0 {
                        break;
                    }
                    key.push(frame.slot as u8);
                }
                NodeRef::Span(id) => {
                    let span = arena.span(id);
                    key.extend_from_slice(span.bytes());
                    if span.bytes().len() < SPAN_BYTES {
                        break;
                    }
                }
            }
        }

        key.truncate(limit);
        key
    }
}
