//! file: src/ir/dataflow/mod.rs
//! description: generic fixed-point dataflow solver over the CFG.
//!
//! A problem supplies a fact lattice (bottom element, meet) and a monotone
//! per-instruction transfer function; the solver iterates to the maximum
//! fixed point. Termination holds because facts are subsets of a finite
//! variable universe and transfers are monotone.

pub mod liveness;

use crate::ir::cfg::Cfg;
use crate::ir::instr::Instr;
use crate::ir::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub trait DataflowProblem {
    type Fact: Clone + PartialEq;

    fn name(&self) -> &'static str;
    fn direction(&self) -> Direction;
    fn bottom(&self, scope: &Scope) -> Self::Fact;
    /// Folds a neighbor's fact into `acc`. Callers iterate edges in
    /// insertion order, so the meet sees a deterministic sequence.
    fn meet(&self, acc: &mut Self::Fact, incoming: &Self::Fact);
    /// Applies one instruction's transfer to `fact`. For backward problems
    /// the solver feeds instructions in reverse order.
    fn transfer(&self, scope: &Scope, instr: &Instr, fact: &mut Self::Fact);
}

/// Entry/exit fact per block, indexed by `BlockId`.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution<F> {
    pub entry: Vec<F>,
    pub exit: Vec<F>,
}

impl<F: Clone> Solution<F> {
    fn seeded(bottom: &F, len: usize) -> Solution<F> {
        Solution { entry: vec![bottom.clone(); len], exit: vec![bottom.clone(); len] }
    }
}

/// Iterative relaxation to the maximum fixed point. Blocks are revisited in
/// a stable order until no fact changes.
pub fn solve<P: DataflowProblem>(problem: &P, scope: &Scope, cfg: &Cfg) -> Solution<P::Fact> {
    let bottom = problem.bottom(scope);
    let n = cfg.blocks().len();
    let mut sol = Solution::seeded(&bottom, n);

    let order: Vec<usize> = match problem.direction() {
        Direction::Forward => (0..n).collect(),
        Direction::Backward => (0..n).rev().collect(),
    };

    loop {
        let mut changed = false;
        for &b in &order {
            let block = &cfg.blocks()[b];
            match problem.direction() {
                Direction::Forward => {
                    let mut inflow = bottom.clone();
                    for e in cfg.preds(block.id) {
                        problem.meet(&mut inflow, &sol.exit[e.target.0]);
                    }
                    let mut fact = inflow.clone();
                    for &i in &block.instrs {
                        let instr = &scope.instrs()[i];
                        if instr.is_dead() {
                            continue;
                        }
                        problem.transfer(scope, instr, &mut fact);
                    }
                    if sol.entry[b] != inflow {
                        sol.entry[b] = inflow;
                        changed = true;
                    }
                    if sol.exit[b] != fact {
                        sol.exit[b] = fact;
                        changed = true;
                    }
                }
                Direction::Backward => {
                    let mut outflow = bottom.clone();
                    for e in cfg.succs(block.id) {
                        problem.meet(&mut outflow, &sol.entry[e.target.0]);
                    }
                    let mut fact = outflow.clone();
                    for &i in block.instrs.iter().rev() {
                        let instr = &scope.instrs()[i];
                        if instr.is_dead() {
                            continue;
                        }
                        problem.transfer(scope, instr, &mut fact);
                    }
                    if sol.exit[b] != outflow {
                        sol.exit[b] = outflow;
                        changed = true;
                    }
                    if sol.entry[b] != fact {
                        sol.entry[b] = fact;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    sol
}
