//! file: src/ir/operand.rs
//! description: operand model for the Tanager IR.
//!
//! Operands are the immutable inputs of instructions: literals, composite
//! literals, variables, labels and call-target descriptors. Literal operands
//! carry a write-once cache of their materialized runtime value so that every
//! retrieval of the same operand instance observes the same object.

use std::cell::{OnceCell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use crate::interp::value::RtValue;
use crate::ir::scope::Scope;

/// A jump target. Labels are compared structurally by `(prefix, id)` but
/// control-flow code relies on shared `Rc<Label>` instances: the decoder
/// deduplicates labels per session so equal keys become the identical object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub prefix: String,
    pub id: u32,
}

impl Label {
    pub fn new(prefix: impl Into<String>, id: u32) -> Rc<Label> {
        Rc::new(Label { prefix: prefix.into(), id })
    }

    /// Composite key used for dedup maps.
    pub fn key(&self) -> String {
        format!("{}_{}", self.prefix, self.id)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.prefix, self.id)
    }
}

/// Temporary-variable flavors. Each activation keeps a separate slot array
/// per flavor; closure temporaries additionally carry how many closure
/// nesting levels up their owning scope sits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TempVar {
    Local { slot: usize },
    Float { slot: usize },
    Closure { depth: usize, slot: usize },
    CurrentModule { slot: usize },
    CurrentScope { slot: usize },
}

impl TempVar {
    pub fn slot(&self) -> usize {
        match self {
            TempVar::Local { slot }
            | TempVar::Float { slot }
            | TempVar::Closure { slot, .. }
            | TempVar::CurrentModule { slot }
            | TempVar::CurrentScope { slot } => *slot,
        }
    }
}

impl std::fmt::Display for TempVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TempVar::Local { slot } => write!(f, "%v_{}", slot),
            TempVar::Float { slot } => write!(f, "%f_{}", slot),
            TempVar::Closure { depth, slot } => write!(f, "%c_{}:{}", depth, slot),
            TempVar::CurrentModule { slot } => write!(f, "%m_{}", slot),
            TempVar::CurrentScope { slot } => write!(f, "%s_{}", slot),
        }
    }
}

/// A variable an instruction can read or write: a named local (with the
/// lexical-nesting distance used by closures) or a temporary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    Local { name: Arc<str>, depth: usize, slot: usize },
    Temp(TempVar),
}

impl Variable {
    pub fn local(name: impl AsRef<str>, depth: usize, slot: usize) -> Variable {
        Variable::Local { name: Arc::from(name.as_ref()), depth, slot }
    }

    pub fn temp(slot: usize) -> Variable {
        Variable::Temp(TempVar::Local { slot })
    }

    /// The same variable seen from one lexical level further out, if any.
    /// Depth-0 locals belong to the current scope and do not translate.
    pub fn hoisted(&self) -> Option<Variable> {
        match self {
            Variable::Local { name, depth, slot } if *depth >= 1 => {
                Some(Variable::Local { name: name.clone(), depth: depth - 1, slot: *slot })
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variable::Local { name, depth, .. } => {
                if *depth == 0 {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}<{}>", name, depth)
                }
            }
            Variable::Temp(t) => write!(f, "{}", t),
        }
    }
}

/// Regexp literal flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexpFlags {
    pub ignore_case: bool,
    pub multiline: bool,
    pub extended: bool,
}

/// Write-once cache for a literal's materialized runtime value. Clones of an
/// operand share the cell, so they observe the same boxed object.
pub type LiteralCache = Rc<OnceCell<RtValue>>;

fn fresh_cache() -> LiteralCache {
    Rc::new(OnceCell::new())
}

/// Instruction input. The set is closed: every consumer (interpreter,
/// simplifier, cloner, codec) matches exhaustively over it.
#[derive(Debug, Clone)]
pub enum Operand {
    Fixnum { value: i64, cached: LiteralCache },
    Float { value: f64, cached: LiteralCache },
    Boolean { value: bool, cached: LiteralCache },
    Str { value: String, cached: LiteralCache },
    Symbol { name: Arc<str>, cached: LiteralCache },
    Regexp { pattern: String, flags: RegexpFlags, cached: LiteralCache },
    Array(Vec<Operand>),
    Hash(Vec<(Operand, Operand)>),
    Range { begin: Box<Operand>, end: Box<Operand>, exclusive: bool },
    CompoundString(Vec<Operand>),
    SelfRef,
    Nil,
    UndefinedValue,
    UnexecutableNil,
    Label(Rc<Label>),
    Variable(Variable),
    MethAddr(Arc<str>),
    MethodHandle { receiver: Box<Operand>, name: Box<Operand> },
    WrappedClosure { scope: Rc<RefCell<Scope>>, binding: Variable },
}

impl Operand {
    pub fn fixnum(value: i64) -> Operand {
        Operand::Fixnum { value, cached: fresh_cache() }
    }

    pub fn float(value: f64) -> Operand {
        Operand::Float { value, cached: fresh_cache() }
    }

    pub fn boolean(value: bool) -> Operand {
        Operand::Boolean { value, cached: fresh_cache() }
    }

    pub fn str(value: impl Into<String>) -> Operand {
        Operand::Str { value: value.into(), cached: fresh_cache() }
    }

    pub fn symbol(name: impl AsRef<str>) -> Operand {
        Operand::Symbol { name: crate::interp::runtime::intern(name.as_ref()), cached: fresh_cache() }
    }

    pub fn regexp(pattern: impl Into<String>, flags: RegexpFlags) -> Operand {
        Operand::Regexp { pattern: pattern.into(), flags, cached: fresh_cache() }
    }

    pub fn meth_addr(name: impl AsRef<str>) -> Operand {
        Operand::MethAddr(crate::interp::runtime::intern(name.as_ref()))
    }

    pub fn var(v: Variable) -> Operand {
        Operand::Variable(v)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Operand::Variable(_))
    }

    /// Collects every variable this operand reads, recursing through
    /// composites. A wrapped closure reads each enclosing-scope variable the
    /// closure (or anything nested in it) captures, translated down one
    /// lexical level into this scope's frame of reference.
    pub fn collect_reads(&self, out: &mut Vec<Variable>) {
        match self {
            Operand::Variable(v) => out.push(v.clone()),
            Operand::Array(items) | Operand::CompoundString(items) => {
                for item in items {
                    item.collect_reads(out);
                }
            }
            Operand::Hash(pairs) => {
                for (k, v) in pairs {
                    k.collect_reads(out);
                    v.collect_reads(out);
                }
            }
            Operand::Range { begin, end, .. } => {
                begin.collect_reads(out);
                end.collect_reads(out);
            }
            Operand::MethodHandle { receiver, name } => {
                receiver.collect_reads(out);
                name.collect_reads(out);
            }
            Operand::WrappedClosure { scope, .. } => {
                for captured in scope.borrow().free_outer_locals() {
                    if let Some(v) = captured.hoisted() {
                        out.push(v);
                    }
                }
            }
            _ => {}
        }
    }

    /// Rewrites variable operands found in `map`, recursing through
    /// composites. Used by copy propagation and inlining support.
    pub fn substitute(&mut self, map: &std::collections::HashMap<Variable, Operand>) {
        match self {
            Operand::Variable(v) => {
                if let Some(replacement) = map.get(v) {
                    *self = replacement.clone();
                }
            }
            Operand::Array(items) | Operand::CompoundString(items) => {
                for item in items {
                    item.substitute(map);
                }
            }
            Operand::Hash(pairs) => {
                for (k, v) in pairs {
                    k.substitute(map);
                    v.substitute(map);
                }
            }
            Operand::Range { begin, end, .. } => {
                begin.substitute(map);
                end.substitute(map);
            }
            Operand::MethodHandle { receiver, name } => {
                receiver.substitute(map);
                name.substitute(map);
            }
            _ => {}
        }
    }
}

// Structural equality; literal caches are identity state, not value, and are
// ignored. Labels compare by key, closures by scope identity.
impl PartialEq for Operand {
    fn eq(&self, other: &Operand) -> bool {
        use Operand::*;
        match (self, other) {
            (Fixnum { value: a, .. }, Fixnum { value: b, .. }) => a == b,
            (Float { value: a, .. }, Float { value: b, .. }) => a == b,
            (Boolean { value: a, .. }, Boolean { value: b, .. }) => a == b,
            (Str { value: a, .. }, Str { value: b, .. }) => a == b,
            (Symbol { name: a, .. }, Symbol { name: b, .. }) => a == b,
            (
                Regexp { pattern: a, flags: fa, .. },
                Regexp { pattern: b, flags: fb, .. },
            ) => a == b && fa == fb,
            (Array(a), Array(b)) => a == b,
            (Hash(a), Hash(b)) => a == b,
            (
                Range { begin: ab, end: ae, exclusive: ax },
                Range { begin: bb, end: be, exclusive: bx },
            ) => ab == bb && ae == be && ax == bx,
            (CompoundString(a), CompoundString(b)) => a == b,
            (SelfRef, SelfRef) => true,
            (Nil, Nil) => true,
            (UndefinedValue, UndefinedValue) => true,
            (UnexecutableNil, UnexecutableNil) => true,
            (Label(a), Label(b)) => a == b,
            (Variable(a), Variable(b)) => a == b,
            (MethAddr(a), MethAddr(b)) => a == b,
            (
                MethodHandle { receiver: ar, name: an },
                MethodHandle { receiver: br, name: bn },
            ) => ar == br && an == bn,
            (
                WrappedClosure { scope: a, binding: ab },
                WrappedClosure { scope: b, binding: bb },
            ) => Rc::ptr_eq(a, b) && ab == bb,
            _ => false,
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Fixnum { value, .. } => write!(f, "{}", value),
            Operand::Float { value, .. } => write!(f, "{}", value),
            Operand::Boolean { value, .. } => write!(f, "{}", value),
            Operand::Str { value, .. } => write!(f, "{:?}", value),
            Operand::Symbol { name, .. } => write!(f, ":{}", name),
            Operand::Regexp { pattern, .. } => write!(f, "/{}/", pattern),
            Operand::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Operand::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} => {}", k, v)?;
                }
                write!(f, "}}")
            }
            Operand::Range { begin, end, exclusive } => {
                write!(f, "({}{}{})", begin, if *exclusive { "..." } else { ".." }, end)
            }
            Operand::CompoundString(parts) => {
                write!(f, "\"")?;
                for part in parts {
                    write!(f, "#{{{}}}", part)?;
                }
                write!(f, "\"")
            }
            Operand::SelfRef => write!(f, "%self"),
            Operand::Nil => write!(f, "nil"),
            Operand::UndefinedValue => write!(f, "%undefined"),
            Operand::UnexecutableNil => write!(f, "%u_nil"),
            Operand::Label(l) => write!(f, "{}", l),
            Operand::Variable(v) => write!(f, "{}", v),
            Operand::MethAddr(name) => write!(f, "'{}'", name),
            Operand::MethodHandle { receiver, name } => write!(f, "<{}.{}>", receiver, name),
            Operand::WrappedClosure { scope, binding } => {
                write!(f, "&closure({}, {})", scope.borrow().name(), binding)
            }
        }
    }
}
