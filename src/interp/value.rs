//! file: src/interp/value.rs
//! description: runtime value representation for the interpreter.
//!
//! Heap-like values (strings, arrays, hashes) are shared through `Rc`, so
//! retrieving a cached literal twice observes the same object and mutation
//! through one handle is visible through all of them.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::ir::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexpOptions {
    pub ignore_case: bool,
    pub multiline: bool,
    pub extended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtRegexp {
    pub pattern: String,
    pub options: RegexpOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtRange {
    pub begin: RtValue,
    pub end: RtValue,
    pub exclusive: bool,
}

/// A closure value: the nested scope plus the frame it captured at creation.
#[derive(Debug, Clone)]
pub struct RtProc {
    pub scope: Rc<RefCell<Scope>>,
    pub frame: crate::interp::frame::FrameId,
    pub self_val: RtValue,
}

impl PartialEq for RtProc {
    fn eq(&self, other: &RtProc) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope) && self.frame == other.frame
    }
}

/// A method reference produced by retrieving a method-handle operand.
#[derive(Debug, Clone, PartialEq)]
pub struct RtBoundMethod {
    pub receiver: RtValue,
    pub name: Arc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtException {
    pub class_name: Arc<str>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    Nil,
    /// Distinct from `Nil`: the marker for not-yet-assigned bindings.
    Undefined,
    Bool(bool),
    Fixnum(i64),
    Float(f64),
    Str(Rc<RefCell<String>>),
    Symbol(Arc<str>),
    Regexp(Rc<RtRegexp>),
    Array(Rc<RefCell<Vec<RtValue>>>),
    Hash(Rc<RefCell<Vec<(RtValue, RtValue)>>>),
    Range(Rc<RtRange>),
    Proc(Rc<RtProc>),
    BoundMethod(Rc<RtBoundMethod>),
    Exception(Rc<RtException>),
}

impl RtValue {
    pub fn str(s: impl Into<String>) -> RtValue {
        RtValue::Str(Rc::new(RefCell::new(s.into())))
    }

    pub fn array(items: Vec<RtValue>) -> RtValue {
        RtValue::Array(Rc::new(RefCell::new(items)))
    }

    pub fn exception(class_name: Arc<str>, message: impl Into<String>) -> RtValue {
        RtValue::Exception(Rc::new(RtException { class_name, message: message.into() }))
    }

    /// Guest truthiness: only nil and false are falsy.
    pub fn truthy(&self) -> bool {
        !matches!(self, RtValue::Nil | RtValue::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RtValue::Nil => "NilClass",
            RtValue::Undefined => "Undefined",
            RtValue::Bool(true) => "TrueClass",
            RtValue::Bool(false) => "FalseClass",
            RtValue::Fixnum(_) => "Fixnum",
            RtValue::Float(_) => "Float",
            RtValue::Str(_) => "String",
            RtValue::Symbol(_) => "Symbol",
            RtValue::Regexp(_) => "Regexp",
            RtValue::Array(_) => "Array",
            RtValue::Hash(_) => "Hash",
            RtValue::Range(_) => "Range",
            RtValue::Proc(_) => "Proc",
            RtValue::BoundMethod(_) => "Method",
            RtValue::Exception(_) => "Exception",
        }
    }

    /// Object identity, where the value has any: shared handles compare by
    /// pointer, immediates by value.
    pub fn same_object(&self, other: &RtValue) -> bool {
        match (self, other) {
            (RtValue::Str(a), RtValue::Str(b)) => Rc::ptr_eq(a, b),
            (RtValue::Array(a), RtValue::Array(b)) => Rc::ptr_eq(a, b),
            (RtValue::Hash(a), RtValue::Hash(b)) => Rc::ptr_eq(a, b),
            (RtValue::Regexp(a), RtValue::Regexp(b)) => Rc::ptr_eq(a, b),
            (RtValue::Range(a), RtValue::Range(b)) => Rc::ptr_eq(a, b),
            (RtValue::Proc(a), RtValue::Proc(b)) => Rc::ptr_eq(a, b),
            (RtValue::BoundMethod(a), RtValue::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (RtValue::Exception(a), RtValue::Exception(b)) => Rc::ptr_eq(a, b),
            (RtValue::Symbol(a), RtValue::Symbol(b)) => a == b,
            _ => self == other,
        }
    }
}

impl std::fmt::Display for RtValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtValue::Nil => write!(f, "nil"),
            RtValue::Undefined => write!(f, "undefined"),
            RtValue::Bool(b) => write!(f, "{}", b),
            RtValue::Fixnum(i) => write!(f, "{}", i),
            RtValue::Float(x) => write!(f, "{}", x),
            RtValue::Str(s) => write!(f, "{}", s.borrow()),
            RtValue::Symbol(s) => write!(f, ":{}", s),
            RtValue::Regexp(r) => write!(f, "/{}/", r.pattern),
            RtValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            RtValue::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} => {}", k, v)?;
                }
                write!(f, "}}")
            }
            RtValue::Range(r) => {
                write!(f, "{}{}{}", r.begin, if r.exclusive { "..." } else { ".." }, r.end)
            }
            RtValue::Proc(p) => write!(f, "#<Proc {}>", p.scope.borrow().name()),
            RtValue::BoundMethod(m) => write!(f, "#<Method {}>", m.name),
            RtValue::Exception(e) => write!(f, "#<{}: {}>", e.class_name, e.message),
        }
    }
}
