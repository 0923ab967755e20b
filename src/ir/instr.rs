//! file: src/ir/instr.rs
//! description: instruction model for the Tanager IR.
//!
//! One closed `Op` enum covers every operation the pipeline, interpreter and
//! codec must handle. `Instr` wraps an op with the bookkeeping flags the
//! optimizer uses (dead mark, simplification opt-out).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::ir::operand::{Label, Operand, Variable};
use crate::ir::scope::Scope;

#[derive(Debug, Clone)]
pub enum Op {
    /// Source line marker.
    LineNum { line: usize },
    Nop,
    Copy { dest: Variable, src: Operand },
    /// Method dispatch. `meth` is conventionally a `MethAddr` operand.
    Call {
        dest: Option<Variable>,
        meth: Operand,
        receiver: Operand,
        args: Vec<Operand>,
        block: Option<Operand>,
    },
    Jump { target: Rc<Label> },
    BTrue { cond: Operand, target: Rc<Label> },
    BFalse { cond: Operand, target: Rc<Label> },
    /// Marks a jump-target site in the linear stream.
    LabelMark { label: Rc<Label> },
    Return { value: Operand },
    /// A `return` lexically inside a closure: unwinds to the nearest
    /// enclosing method (or script) activation.
    NonlocalReturn { value: Operand },
    ReceiveArg { dest: Variable, index: usize },
    /// Receives the block passed to the current activation.
    ReceiveClosure { dest: Variable },
    /// Reads the in-flight exception inside a rescue block.
    ReceiveException { dest: Variable },
    /// Opens a rescue/ensure region covering instructions up to the matching
    /// `ExcRegionEnd`. Regions nest LIFO.
    ExcRegionStart { rescue: Rc<Label>, ensure: Option<Rc<Label>> },
    ExcRegionEnd,
    Raise { exception: Operand },
    Yield { dest: Option<Variable>, args: Vec<Operand> },
    DefineMethod { name: Arc<str>, body: Rc<RefCell<Scope>> },
}

// Structural equality; nested-scope references compare by identity.
impl PartialEq for Op {
    fn eq(&self, other: &Op) -> bool {
        use Op::*;
        match (self, other) {
            (LineNum { line: a }, LineNum { line: b }) => a == b,
            (Nop, Nop) => true,
            (Copy { dest: d1, src: s1 }, Copy { dest: d2, src: s2 }) => d1 == d2 && s1 == s2,
            (
                Call { dest: d1, meth: m1, receiver: r1, args: a1, block: b1 },
                Call { dest: d2, meth: m2, receiver: r2, args: a2, block: b2 },
            ) => d1 == d2 && m1 == m2 && r1 == r2 && a1 == a2 && b1 == b2,
            (Jump { target: a }, Jump { target: b }) => a == b,
            (BTrue { cond: c1, target: t1 }, BTrue { cond: c2, target: t2 }) => {
                c1 == c2 && t1 == t2
            }
            (BFalse { cond: c1, target: t1 }, BFalse { cond: c2, target: t2 }) => {
                c1 == c2 && t1 == t2
            }
            (LabelMark { label: a }, LabelMark { label: b }) => a == b,
            (Return { value: a }, Return { value: b }) => a == b,
            (NonlocalReturn { value: a }, NonlocalReturn { value: b }) => a == b,
            (ReceiveArg { dest: d1, index: i1 }, ReceiveArg { dest: d2, index: i2 }) => {
                d1 == d2 && i1 == i2
            }
            (ReceiveClosure { dest: a }, ReceiveClosure { dest: b }) => a == b,
            (ReceiveException { dest: a }, ReceiveException { dest: b }) => a == b,
            (
                ExcRegionStart { rescue: r1, ensure: e1 },
                ExcRegionStart { rescue: r2, ensure: e2 },
            ) => r1 == r2 && e1 == e2,
            (ExcRegionEnd, ExcRegionEnd) => true,
            (Raise { exception: a }, Raise { exception: b }) => a == b,
            (Yield { dest: d1, args: a1 }, Yield { dest: d2, args: a2 }) => {
                d1 == d2 && a1 == a2
            }
            (DefineMethod { name: n1, body: b1 }, DefineMethod { name: n2, body: b2 }) => {
                n1 == n2 && Rc::ptr_eq(b1, b2)
            }
            _ => false,
        }
    }
}

/// One IR instruction: an operation plus optimizer bookkeeping. Dead-code
/// elimination marks instructions dead in place; a later compaction sweep
/// drops them so same-round passes still see the full stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub op: Op,
    dead: bool,
    no_simplify: bool,
}

impl Instr {
    pub fn new(op: Op) -> Instr {
        Instr { op, dead: false, no_simplify: false }
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn mark_dead(&mut self) {
        self.dead = true;
    }

    /// Exempts this instruction from operand substitution (the front end
    /// marks instructions whose operands must stay as written).
    pub fn set_no_simplify(&mut self) {
        self.no_simplify = true;
    }

    pub fn no_simplify(&self) -> bool {
        self.no_simplify
    }

    /// The variable this instruction writes, if any.
    pub fn result(&self) -> Option<&Variable> {
        match &self.op {
            Op::Copy { dest, .. }
            | Op::ReceiveArg { dest, .. }
            | Op::ReceiveClosure { dest }
            | Op::ReceiveException { dest } => Some(dest),
            Op::Call { dest, .. } | Op::Yield { dest, .. } => dest.as_ref(),
            _ => None,
        }
    }

    /// Ordered operand inputs. Branch labels are included even though they
    /// are control-flow edges rather than data dependencies.
    pub fn operands(&self) -> Vec<&Operand> {
        match &self.op {
            Op::Copy { src, .. } => vec![src],
            Op::Call { meth, receiver, args, block, .. } => {
                let mut ops = vec![meth, receiver];
                ops.extend(args.iter());
                if let Some(b) = block {
                    ops.push(b);
                }
                ops
            }
            Op::BTrue { cond, .. } | Op::BFalse { cond, .. } => vec![cond],
            Op::Return { value } | Op::NonlocalReturn { value } | Op::Raise { exception: value } => {
                vec![value]
            }
            Op::Yield { args, .. } => args.iter().collect(),
            _ => Vec::new(),
        }
    }

    fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match &mut self.op {
            Op::Copy { src, .. } => vec![src],
            Op::Call { meth, receiver, args, block, .. } => {
                let mut ops = vec![meth, receiver];
                ops.extend(args.iter_mut());
                if let Some(b) = block {
                    ops.push(b);
                }
                ops
            }
            Op::BTrue { cond, .. } | Op::BFalse { cond, .. } => vec![cond],
            Op::Return { value } | Op::NonlocalReturn { value } | Op::Raise { exception: value } => {
                vec![value]
            }
            Op::Yield { args, .. } => args.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// Every variable read by this instruction's operands.
    pub fn variables_read(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        for op in self.operands() {
            op.collect_reads(&mut out);
        }
        out
    }

    /// Branch target, for the ops that carry one.
    pub fn branch_target(&self) -> Option<&Rc<Label>> {
        match &self.op {
            Op::Jump { target } | Op::BTrue { target, .. } | Op::BFalse { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }

    /// True for instructions after which a new basic block must start.
    pub fn ends_block(&self) -> bool {
        matches!(
            self.op,
            Op::Jump { .. }
                | Op::BTrue { .. }
                | Op::BFalse { .. }
                | Op::Return { .. }
                | Op::NonlocalReturn { .. }
                | Op::Raise { .. }
                | Op::ExcRegionStart { .. }
                | Op::ExcRegionEnd
        )
    }

    /// True when control cannot flow past this instruction into the next one.
    pub fn terminates(&self) -> bool {
        matches!(
            self.op,
            Op::Jump { .. } | Op::Return { .. } | Op::NonlocalReturn { .. } | Op::Raise { .. }
        )
    }

    /// Conservative effect test used by dead-code elimination: an instruction
    /// with observable behavior beyond its result variable must survive even
    /// when the result is dead.
    pub fn has_side_effects(&self) -> bool {
        match &self.op {
            Op::Copy { .. }
            | Op::ReceiveArg { .. }
            | Op::ReceiveClosure { .. }
            | Op::ReceiveException { .. }
            | Op::LineNum { .. }
            | Op::Nop
            | Op::LabelMark { .. } => false,
            _ => true,
        }
    }

    /// Replaces variable operands found in `map`. Instructions marked
    /// un-simplifiable are skipped unless `force` is set.
    pub fn simplify(&mut self, map: &HashMap<Variable, Operand>, force: bool) {
        if self.no_simplify && !force {
            return;
        }
        for op in self.operands_mut() {
            op.substitute(map);
        }
    }

    /// Deep clone under a renaming map: variables are rewritten per the map
    /// and labels are freshened consistently, so an inlined body cannot
    /// collide with the host scope's names.
    pub fn clone_for_inlining(&self, cm: &mut CloneMap) -> Instr {
        let mut cloned = self.clone();
        let var_ops: HashMap<Variable, Operand> = cm
            .vars
            .iter()
            .map(|(from, to)| (from.clone(), Operand::Variable(to.clone())))
            .collect();
        for op in cloned.operands_mut() {
            op.substitute(&var_ops);
        }
        match &mut cloned.op {
            Op::Jump { target } | Op::BTrue { target, .. } | Op::BFalse { target, .. } => {
                *target = cm.renamed_label(target);
            }
            Op::LabelMark { label } => {
                *label = cm.renamed_label(label);
            }
            Op::ExcRegionStart { rescue, ensure } => {
                *rescue = cm.renamed_label(rescue);
                if let Some(e) = ensure {
                    *e = cm.renamed_label(e);
                }
            }
            _ => {}
        }
        if let Some(dest) = result_mut(&mut cloned.op) {
            if let Some(renamed) = cm.vars.get(dest) {
                *dest = renamed.clone();
            }
        }
        cloned
    }
}

fn result_mut(op: &mut Op) -> Option<&mut Variable> {
    match op {
        Op::Copy { dest, .. }
        | Op::ReceiveArg { dest, .. }
        | Op::ReceiveClosure { dest }
        | Op::ReceiveException { dest } => Some(dest),
        Op::Call { dest, .. } | Op::Yield { dest, .. } => dest.as_mut(),
        _ => None,
    }
}

/// Renaming state for `clone_for_inlining`: a variable map supplied by the
/// inliner and a label map that allocates fresh label ids on first sight.
pub struct CloneMap {
    pub vars: HashMap<Variable, Variable>,
    labels: HashMap<Label, Rc<Label>>,
    next_label_id: u32,
}

impl CloneMap {
    /// `label_base` must be past every label id already allocated in the
    /// host scope (see `Scope::next_label_id`).
    pub fn new(vars: HashMap<Variable, Variable>, label_base: u32) -> CloneMap {
        CloneMap { vars, labels: HashMap::new(), next_label_id: label_base }
    }

    pub fn renamed_label(&mut self, label: &Rc<Label>) -> Rc<Label> {
        if let Some(fresh) = self.labels.get(label.as_ref()) {
            return fresh.clone();
        }
        let fresh = Label::new(label.prefix.clone(), self.next_label_id);
        self.next_label_id += 1;
        self.labels.insert(label.as_ref().clone(), fresh.clone());
        fresh
    }

    /// One past the highest label id handed out so far.
    pub fn next_label_id(&self) -> u32 {
        self.next_label_id
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dead {
            write!(f, "[dead] ")?;
        }
        match &self.op {
            Op::LineNum { line } => write!(f, "line_num({})", line),
            Op::Nop => write!(f, "nop"),
            Op::Copy { dest, src } => write!(f, "{} = copy({})", dest, src),
            Op::Call { dest, meth, receiver, args, block } => {
                if let Some(d) = dest {
                    write!(f, "{} = ", d)?;
                }
                write!(f, "call({}, {}", meth, receiver)?;
                for a in args {
                    write!(f, ", {}", a)?;
                }
                if let Some(b) = block {
                    write!(f, ", &{}", b)?;
                }
                write!(f, ")")
            }
            Op::Jump { target } => write!(f, "jump {}", target),
            Op::BTrue { cond, target } => write!(f, "b_true({}) {}", cond, target),
            Op::BFalse { cond, target } => write!(f, "b_false({}) {}", cond, target),
            Op::LabelMark { label } => write!(f, "{}:", label),
            Op::Return { value } => write!(f, "return {}", value),
            Op::NonlocalReturn { value } => write!(f, "nonlocal_return {}", value),
            Op::ReceiveArg { dest, index } => write!(f, "{} = recv_arg({})", dest, index),
            Op::ReceiveClosure { dest } => write!(f, "{} = recv_closure", dest),
            Op::ReceiveException { dest } => write!(f, "{} = recv_exception", dest),
            Op::ExcRegionStart { rescue, ensure } => {
                write!(f, "exc_region_start(rescue: {}", rescue)?;
                if let Some(e) = ensure {
                    write!(f, ", ensure: {}", e)?;
                }
                write!(f, ")")
            }
            Op::ExcRegionEnd => write!(f, "exc_region_end"),
            Op::Raise { exception } => write!(f, "raise {}", exception),
            Op::Yield { dest, args } => {
                if let Some(d) = dest {
                    write!(f, "{} = ", d)?;
                }
                write!(f, "yield(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Op::DefineMethod { name, .. } => write!(f, "def_method('{}')", name),
        }
    }
}
