//! file: src/ir/opt/compact.rs
//! description: drops dead-marked instructions and stale no-ops.

use crate::ir::err::IcError;
use crate::ir::instr::Op;
use crate::ir::opt::{Pass, PassOrder};
use crate::ir::scope::Scope;

pub struct CompactPass;

impl Pass for CompactPass {
    fn name(&self) -> &'static str {
        "compact"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["compact-instrs"]
    }

    fn order(&self) -> PassOrder {
        PassOrder::Post
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["dead-code"]
    }

    // Removing instructions shifts every index the graph and the liveness
    // vectors were built over.
    fn invalidates(&self) -> &'static [&'static str] {
        &["cfg", crate::ir::dataflow::liveness::LIVE_VARS]
    }

    fn execute(&self, scope: &mut Scope) -> Result<bool, IcError> {
        let before = scope.instrs().len();
        scope.instrs_mut().retain(|instr| !instr.is_dead() && !matches!(instr.op, Op::Nop));
        Ok(scope.instrs().len() != before)
    }
}
