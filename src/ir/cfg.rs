//! file: src/ir/cfg.rs
//! description: basic-block graph construction from the linear stream.
//!
//! Blocks are index ranges into the owning scope's instruction list; edges
//! carry a kind tag. Edge insertion order is part of the contract: dataflow
//! meets iterate edges in insertion order, and for a conditional-branch block
//! the fall-through (not-taken) edge is inserted before the taken edge.

use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::ir::err::IcError;
use crate::ir::instr::Op;
use crate::ir::operand::Label;
use crate::ir::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    FallThrough,
    Jump,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub target: BlockId,
    pub kind: EdgeKind,
}

/// A maximal straight-line run of instructions (indices into the scope's
/// list), identified stably by a label. Entry and exit placeholders carry no
/// instructions.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: Rc<Label>,
    pub instrs: Vec<usize>,
}

#[derive(Debug)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
    succs: Vec<Vec<Edge>>,
    preds: Vec<Vec<Edge>>,
    entry: BlockId,
    exit: BlockId,
    by_label: HashMap<Label, BlockId>,
}

impl Cfg {
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn exit(&self) -> BlockId {
        self.exit
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    /// Blocks other than the entry/exit placeholders.
    pub fn body_block_count(&self) -> usize {
        self.blocks.len() - 2
    }

    pub fn succs(&self, id: BlockId) -> &[Edge] {
        &self.succs[id.0]
    }

    pub fn preds(&self, id: BlockId) -> &[Edge] {
        &self.preds[id.0]
    }

    pub fn block_of_label(&self, label: &Label) -> Option<BlockId> {
        self.by_label.get(label).copied()
    }

    /// The unique fall-through successor, if the block has one.
    pub fn fallthrough_of(&self, id: BlockId) -> Option<BlockId> {
        self.succs[id.0]
            .iter()
            .find(|e| e.kind == EdgeKind::FallThrough)
            .map(|e| e.target)
    }

    pub fn build(scope: &Scope) -> Result<Cfg, IcError> {
        Builder::default().run(scope)
    }
}

// Open exception region while scanning.
struct OpenRegion {
    rescue: Rc<Label>,
    ensure: Option<Rc<Label>>,
    start: usize,
}

// Closed region span over instruction indices.
struct RegionSpan {
    rescue: Rc<Label>,
    ensure: Option<Rc<Label>>,
    range: std::ops::Range<usize>,
}

#[derive(Default)]
struct Builder {
    blocks: Vec<BasicBlock>,
    succs: Vec<Vec<Edge>>,
    by_label: HashMap<Label, BlockId>,
    synth_labels: u32,
}

impl Builder {
    fn synth_label(&mut self, prefix: &str) -> Rc<Label> {
        let id = self.synth_labels;
        self.synth_labels += 1;
        Label::new(prefix, id)
    }

    fn push_block(&mut self, label: Rc<Label>) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock { id, label, instrs: Vec::new() });
        self.succs.push(Vec::new());
        id
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        let edges = &mut self.succs[from.0];
        if !edges.iter().any(|e| e.target == to && e.kind == kind) {
            edges.push(Edge { target: to, kind });
        }
    }

    fn run(mut self, scope: &Scope) -> Result<Cfg, IcError> {
        let instrs = scope.instrs();
        let scope_name = scope.name();

        // Leader scan: a block starts at instruction 0, at every label site
        // and after every block-ending instruction.
        let mut leader = vec![false; instrs.len()];
        if !instrs.is_empty() {
            leader[0] = true;
        }
        for (i, instr) in instrs.iter().enumerate() {
            if matches!(instr.op, Op::LabelMark { .. }) {
                leader[i] = true;
            }
            if instr.ends_block() && i + 1 < instrs.len() {
                leader[i + 1] = true;
            }
        }

        let entry_label = self.synth_label("_entry");
        let entry = self.push_block(entry_label);

        // Carve blocks and validate exception-region nesting in one scan.
        // The marker stack enforces LIFO pairing: an end always closes the
        // innermost open region.
        let mut open_regions: Vec<OpenRegion> = Vec::new();
        let mut regions: Vec<RegionSpan> = Vec::new();
        let mut current: Option<BlockId> = None;
        for (i, instr) in instrs.iter().enumerate() {
            if leader[i] {
                let label = match &instr.op {
                    Op::LabelMark { label } => label.clone(),
                    _ => self.synth_label("_bb"),
                };
                let id = self.push_block(label.clone());
                self.by_label.insert(label.as_ref().clone(), id);
                current = Some(id);
            }
            let block = current.expect("leader[0] guarantees a current block");
            self.blocks[block.0].instrs.push(i);

            match &instr.op {
                Op::ExcRegionStart { rescue, ensure } => {
                    open_regions.push(OpenRegion {
                        rescue: rescue.clone(),
                        ensure: ensure.clone(),
                        start: i + 1,
                    });
                }
                Op::ExcRegionEnd => {
                    let open = open_regions.pop().ok_or_else(|| IcError::UnmatchedRegionEnd {
                        scope: scope_name.to_string(),
                    })?;
                    regions.push(RegionSpan {
                        rescue: open.rescue,
                        ensure: open.ensure,
                        range: open.start..i,
                    });
                }
                _ => {}
            }
        }
        if !open_regions.is_empty() {
            return Err(IcError::UnclosedRegion {
                scope: scope_name.to_string(),
                count: open_regions.len(),
            });
        }

        let exit_label = self.synth_label("_exit");
        let exit = self.push_block(exit_label);

        // Intra-block-scan edges. Order matters: for a conditional-branch
        // block the fall-through edge goes in before the taken edge.
        let first_target = if instrs.is_empty() { exit } else { BlockId(entry.0 + 1) };
        self.add_edge(entry, first_target, EdgeKind::FallThrough);

        let body_range: Vec<BlockId> = (entry.0 + 1..exit.0).map(BlockId).collect();
        for (pos, &bid) in body_range.iter().enumerate() {
            let last_idx = *self.blocks[bid.0].instrs.last().expect("body blocks are non-empty");
            let next = body_range.get(pos + 1).copied();

            match &instrs[last_idx].op {
                Op::Jump { target } => {
                    let to = self.resolve(target, scope_name)?;
                    self.add_edge(bid, to, EdgeKind::Jump);
                }
                Op::BTrue { target, .. } | Op::BFalse { target, .. } => {
                    let not_taken = next.ok_or_else(|| IcError::MissingFallthrough {
                        scope: scope_name.to_string(),
                    })?;
                    let taken = self.resolve(target, scope_name)?;
                    self.add_edge(bid, not_taken, EdgeKind::FallThrough);
                    self.add_edge(bid, taken, EdgeKind::Jump);
                }
                Op::Return { .. } | Op::NonlocalReturn { .. } | Op::Raise { .. } => {
                    self.add_edge(bid, exit, EdgeKind::Jump);
                }
                _ => {
                    self.add_edge(bid, next.unwrap_or(exit), EdgeKind::FallThrough);
                }
            }
        }

        // Exception-dispatch edges: every block with an instruction inside a
        // region can transfer to the region's rescue (and ensure) block.
        for region in &regions {
            let rescue_block = self.resolve(&region.rescue, scope_name)?;
            let ensure_block = match &region.ensure {
                Some(label) => Some(self.resolve(label, scope_name)?),
                None => None,
            };
            for &bid in &body_range {
                let inside = self.blocks[bid.0]
                    .instrs
                    .iter()
                    .any(|&i| region.range.contains(&i));
                if !inside || bid == rescue_block {
                    continue;
                }
                self.add_edge(bid, rescue_block, EdgeKind::Exception);
                if let Some(ens) = ensure_block {
                    if ens != bid {
                        self.add_edge(bid, ens, EdgeKind::Exception);
                    }
                }
            }
        }

        self.finish(scope_name, entry, exit)
    }

    fn resolve(&self, label: &Rc<Label>, scope_name: &str) -> Result<BlockId, IcError> {
        self.by_label.get(label.as_ref()).copied().ok_or_else(|| IcError::DanglingJumpTarget {
            scope: scope_name.to_string(),
            label: label.to_string(),
        })
    }

    // Prune unreachable blocks and freeze the graph.
    fn finish(self, scope_name: &str, entry: BlockId, exit: BlockId) -> Result<Cfg, IcError> {
        let Builder { blocks, succs, by_label, .. } = self;

        let mut reachable = vec![false; blocks.len()];
        let mut work = vec![entry];
        reachable[entry.0] = true;
        while let Some(b) = work.pop() {
            for e in &succs[b.0] {
                if !reachable[e.target.0] {
                    reachable[e.target.0] = true;
                    work.push(e.target);
                }
            }
        }
        reachable[exit.0] = true; // the exit placeholder always survives

        let mut remap: HashMap<BlockId, BlockId> = HashMap::new();
        let mut new_blocks = Vec::new();
        let mut new_succs: Vec<Vec<Edge>> = Vec::new();
        for (old, block) in blocks.into_iter().enumerate() {
            if !reachable[old] {
                continue;
            }
            let id = BlockId(new_blocks.len());
            remap.insert(BlockId(old), id);
            new_blocks.push(BasicBlock { id, ..block });
            new_succs.push(Vec::new());
        }
        for (old, edges) in succs.into_iter().enumerate() {
            let Some(&from) = remap.get(&BlockId(old)) else { continue };
            for e in edges {
                if let Some(&to) = remap.get(&e.target) {
                    new_succs[from.0].push(Edge { target: to, kind: e.kind });
                }
            }
        }
        let by_label = by_label
            .into_iter()
            .filter_map(|(label, id)| remap.get(&id).map(|&new| (label, new)))
            .collect();
        let entry = remap[&entry];
        let exit = remap[&exit];

        let mut preds: Vec<Vec<Edge>> = vec![Vec::new(); new_blocks.len()];
        for (from, edges) in new_succs.iter().enumerate() {
            for e in edges {
                preds[e.target.0].push(Edge { target: BlockId(from), kind: e.kind });
            }
        }

        for block in &new_blocks {
            if block.id != exit && new_succs[block.id.0].is_empty() {
                return Err(IcError::NoOutgoingEdge {
                    scope: scope_name.to_string(),
                    block: block.id.0,
                });
            }
        }

        debug!(
            "cfg for '{}': {} block(s), entry {:?}, exit {:?}",
            scope_name,
            new_blocks.len(),
            entry,
            exit
        );

        Ok(Cfg { blocks: new_blocks, succs: new_succs, preds, entry, exit, by_label })
    }
}
