//! file: src/interp/frame.rs
//! description: dynamic-scope frames held in an index-based arena.
//!
//! Frames form the lexical binding chain: a closure's frame points at the
//! frame it captured. Storing frames in an arena and referring to them by
//! index lets closures outlive their creating call without reference cycles;
//! frame identity (the index) is what non-local returns target.

use crate::interp::value::RtValue;
use crate::ir::scope::ScopeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub usize);

#[derive(Debug)]
struct Frame {
    locals: Vec<RtValue>,
    parent: Option<FrameId>,
    kind: ScopeKind,
    /// Cleared when the owning activation returns; a non-local return into a
    /// dead frame is a guest LocalJumpError.
    alive: bool,
}

#[derive(Debug, Default)]
pub struct Frames {
    frames: Vec<Frame>,
}

impl Frames {
    pub fn new() -> Frames {
        Frames { frames: Vec::new() }
    }

    pub fn alloc(&mut self, kind: ScopeKind, parent: Option<FrameId>, locals: usize) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames.push(Frame {
            locals: vec![RtValue::Undefined; locals],
            parent,
            kind,
            alive: true,
        });
        id
    }

    /// Walks `depth` lexical levels up from `frame`.
    pub fn ancestor(&self, frame: FrameId, depth: usize) -> Option<FrameId> {
        let mut current = frame;
        for _ in 0..depth {
            current = self.frames[current.0].parent?;
        }
        Some(current)
    }

    /// The activation a non-local return from `frame` targets: the nearest
    /// frame on the lexical chain whose scope kind consumes returns.
    pub fn return_target(&self, frame: FrameId) -> Option<FrameId> {
        let mut current = frame;
        loop {
            if self.frames[current.0].kind.is_return_target() {
                return Some(current);
            }
            current = self.frames[current.0].parent?;
        }
    }

    pub fn get_local(&self, frame: FrameId, depth: usize, slot: usize) -> Option<RtValue> {
        let target = self.ancestor(frame, depth)?;
        let frame = &self.frames[target.0];
        match frame.locals.get(slot) {
            Some(RtValue::Undefined) | None => Some(RtValue::Nil),
            Some(v) => Some(v.clone()),
        }
    }

    pub fn set_local(&mut self, frame: FrameId, depth: usize, slot: usize, value: RtValue) -> bool {
        let Some(target) = self.ancestor(frame, depth) else { return false };
        let locals = &mut self.frames[target.0].locals;
        if slot >= locals.len() {
            locals.resize(slot + 1, RtValue::Undefined);
        }
        locals[slot] = value;
        true
    }

    pub fn deactivate(&mut self, frame: FrameId) {
        self.frames[frame.0].alive = false;
    }

    pub fn is_alive(&self, frame: FrameId) -> bool {
        self.frames[frame.0].alive
    }
}
