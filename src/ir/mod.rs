pub mod cfg;
pub mod dataflow;
pub mod err;
pub mod instr;
pub mod operand;
pub mod opt;
pub mod persist;
pub mod scope;

use std::cell::RefCell;
use std::rc::Rc;

pub use self::err::{DecodeError, IcError};
pub use self::persist::{decode_scope, encode_scope};

use crate::reports::CompileReport;

/// Runs the standard optimization pipeline over `scope` and its nested
/// scopes, returning a report of what ran and what changed.
pub fn optimize(scope: &Rc<RefCell<Scope>>) -> Result<CompileReport, IcError> {
    let mut report = CompileReport::new(scope.borrow().name(), scope.borrow().instrs().len());
    let pipeline = opt::PassPipeline::standard();
    pipeline.run_with_report(scope, &mut report)?;
    report.finish(scope.borrow().instrs().len());
    Ok(report)
}

pub use self::scope::{Arity, Scope, ScopeKind};
