//! file: src/ir/opt/dce.rs
//! description: dead-code-elimination pass.
//!
//! Uses the cached live-variable solution. An instruction whose result is
//! not live immediately after it, and which has no side effects, is marked
//! dead in place; the compaction pass drops marked instructions later so
//! that other passes in the same round still see the full stream.

use crate::ir::dataflow::liveness::{LivenessSolution, LIVE_VARS};
use crate::ir::err::IcError;
use crate::ir::opt::{Pass, PassOrder};
use crate::ir::scope::Scope;

pub struct DeadCodeEliminationPass;

pub const DEAD_CODE: &str = "dead-code";

impl Pass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        DEAD_CODE
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["dce"]
    }

    // Nested closures first: their capture sets feed the enclosing scope's
    // liveness through wrapped-closure operands.
    fn order(&self) -> PassOrder {
        PassOrder::Post
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["cfg", LIVE_VARS]
    }

    fn execute(&self, scope: &mut Scope) -> Result<bool, IcError> {
        let solution = scope.dataflow_solution::<LivenessSolution>(LIVE_VARS).ok_or_else(|| {
            IcError::MissingAnalysis {
                pass: DEAD_CODE.to_string(),
                analysis: LIVE_VARS.to_string(),
                scope: scope.name().to_string(),
            }
        })?;

        // Backward walk per block: `live` holds the set immediately after
        // the instruction under inspection.
        let mut dead: Vec<usize> = Vec::new();
        {
            let cfg = scope.cfg().ok_or_else(|| IcError::MissingCfg {
                pass: DEAD_CODE.to_string(),
                scope: scope.name().to_string(),
            })?;
            for block in cfg.blocks() {
                let mut live = solution.exit[block.id.0].clone();
                for &i in block.instrs.iter().rev() {
                    let instr = &scope.instrs()[i];
                    if instr.is_dead() {
                        continue;
                    }
                    let result_dead = match instr.result() {
                        Some(result) => !live.contains(result),
                        None => false,
                    };
                    if result_dead && !instr.has_side_effects() {
                        dead.push(i);
                        continue;
                    }
                    if let Some(result) = instr.result() {
                        live.remove(result);
                    }
                    for v in instr.variables_read() {
                        live.insert(v);
                    }
                }
            }
        }

        for i in &dead {
            scope.instrs_mut()[*i].mark_dead();
        }
        Ok(!dead.is_empty())
    }
}
