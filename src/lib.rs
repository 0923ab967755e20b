pub mod error;
pub mod interp;
pub mod ir;
pub mod reports;

pub use error::{Level, ReportableError};
pub use interp::{CoreRuntime, Interpreter, InterpError, RtValue, Runtime};
pub use ir::{decode_scope, encode_scope, optimize, Arity, DecodeError, IcError, Scope, ScopeKind};
pub use reports::{error_report, CompileReport};
