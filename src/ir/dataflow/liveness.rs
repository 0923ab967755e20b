//! file: src/ir/dataflow/liveness.rs
//! description: live-variable analysis (backward may-problem).
//!
//! A variable is live at a point if some path from that point reads it
//! before writing it. The transfer removes the instruction's result then
//! adds every variable its operands read; wrapped-closure operands read the
//! enclosing-scope variables the closure captures.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ir::dataflow::{solve, DataflowProblem, Direction, Solution};
use crate::ir::err::IcError;
use crate::ir::instr::Instr;
use crate::ir::operand::Variable;
use crate::ir::scope::Scope;

pub type VarSet = HashSet<Variable>;
pub type LivenessSolution = Solution<VarSet>;

pub const LIVE_VARS: &str = "live-vars";

pub struct LiveVariableAnalysis;

impl DataflowProblem for LiveVariableAnalysis {
    type Fact = VarSet;

    fn name(&self) -> &'static str {
        LIVE_VARS
    }

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn bottom(&self, _scope: &Scope) -> VarSet {
        VarSet::new()
    }

    fn meet(&self, acc: &mut VarSet, incoming: &VarSet) {
        for v in incoming {
            acc.insert(v.clone());
        }
    }

    fn transfer(&self, _scope: &Scope, instr: &Instr, fact: &mut VarSet) {
        if let Some(result) = instr.result() {
            fact.remove(result);
        }
        for v in instr.variables_read() {
            fact.insert(v);
        }
    }
}

/// Runs the analysis and caches the solution on the scope under `LIVE_VARS`.
/// Returns the cached solution unchanged if one is already present. Requires
/// a built CFG.
pub fn run_liveness(scope: &mut Scope) -> Result<Rc<LivenessSolution>, IcError> {
    if let Some(cached) = scope.dataflow_solution::<LivenessSolution>(LIVE_VARS) {
        return Ok(cached);
    }
    let sol = {
        let cfg = scope.cfg().ok_or_else(|| IcError::MissingCfg {
            pass: LIVE_VARS.to_string(),
            scope: scope.name().to_string(),
        })?;
        Rc::new(solve(&LiveVariableAnalysis, scope, cfg))
    };
    scope.set_dataflow_solution(LIVE_VARS, sol.clone());
    Ok(sol)
}
