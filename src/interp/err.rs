//! file: src/interp/err.rs
//! description: host-boundary errors from interpretation.

use crate::error::Level;
use crate::ir::err::IcError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterpError {
    /// A guest exception left the outermost activation unrescued.
    #[error("uncaught guest exception {class_name}: {message}")]
    UncaughtException { class_name: String, message: String },
    /// The instruction stream violated a compiler invariant at run time.
    #[error("internal error during interpretation: {0}")]
    Internal(#[from] IcError),
}

impl crate::error::ReportableError for InterpError {
    fn level(&self) -> Level {
        match self {
            InterpError::UncaughtException { .. } => Level::Error,
            InterpError::Internal(_) => Level::Critical,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn issuer(&self) -> String {
        "interpreter".to_string()
    }
}
