//! file: src/ir/err.rs
//! description: compiler-side error types.
//!
//! `IcError` covers internal-compiler conditions: they abort compilation of
//! the affected scope and always indicate a front-end or pipeline bug, never
//! a user-facing diagnostic. `DecodeError` covers fatal persistence-read
//! failures; there is no partial-result recovery.

use crate::error::Level;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IcError {
    #[error("dangling jump target {label} in scope '{scope}'")]
    DanglingJumpTarget { scope: String, label: String },
    #[error("exception region end without a matching start in scope '{scope}'")]
    UnmatchedRegionEnd { scope: String },
    #[error("{count} exception region(s) left open at end of scope '{scope}'")]
    UnclosedRegion { scope: String, count: usize },
    #[error("conditional branch at end of scope '{scope}' has no fall-through")]
    MissingFallthrough { scope: String },
    #[error("block {block} has no outgoing edge in scope '{scope}'")]
    NoOutgoingEdge { scope: String, block: usize },
    #[error("closure operand does not reference a nested scope of '{scope}'")]
    DetachedClosure { scope: String },
    #[error("operand '{operand}' is not executable")]
    UnexecutableOperand { operand: String },
    #[error("dependency cycle through pass '{pass}'")]
    PassDependencyCycle { pass: String },
    #[error("pass '{pass}' depends on unknown pass '{dependency}'")]
    UnknownPassDependency { pass: String, dependency: String },
    #[error("pass '{pass}' requires a built CFG for scope '{scope}'")]
    MissingCfg { pass: String, scope: String },
    #[error("pass '{pass}' requires analysis '{analysis}' for scope '{scope}'")]
    MissingAnalysis { pass: String, analysis: String, scope: String },
}

impl crate::error::ReportableError for IcError {
    fn level(&self) -> Level {
        Level::Critical
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn issuer(&self) -> String {
        "compiler".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated stream: needed {needed} byte(s) at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("bad magic: expected {expected:?}")]
    BadMagic { expected: [u8; 4] },
    #[error("unsupported format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("unknown {what} tag {tag:#04x} at offset {offset}")]
    UnknownTag { what: &'static str, tag: u8, offset: usize },
    #[error("{what} index {index} out of range ({len} available)")]
    IndexOutOfRange { what: &'static str, index: usize, len: usize },
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("expected a {expected} operand at offset {offset}")]
    UnexpectedOperand { expected: &'static str, offset: usize },
}

impl crate::error::ReportableError for DecodeError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn issuer(&self) -> String {
        "persistence".to_string()
    }
}
