//! file: src/ir/scope.rs
//! description: compiled-unit model (script, module, method, closure).
//!
//! A `Scope` owns the linear instruction list the front end produced, its
//! nested scopes, the lazily built CFG and any cached dataflow solutions.
//! The pass pipeline mutates scopes in place; transforms invalidate the CFG
//! and solution caches.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::ir::cfg::Cfg;
use crate::ir::err::IcError;
use crate::ir::instr::Instr;
use crate::ir::operand::{Label, TempVar, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Script,
    Module,
    Method,
    Closure,
}

impl ScopeKind {
    /// Whether a non-local return targets this scope's activation.
    pub fn is_return_target(self) -> bool {
        matches!(self, ScopeKind::Script | ScopeKind::Method)
    }
}

/// Declared parameter shape, checked at call dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Arity {
    pub required: usize,
    pub optional: usize,
    pub rest: bool,
}

impl Arity {
    pub fn fixed(required: usize) -> Arity {
        Arity { required, optional: 0, rest: false }
    }

    pub fn accepts(&self, argc: usize) -> bool {
        if argc < self.required {
            return false;
        }
        self.rest || argc <= self.required + self.optional
    }
}

/// Number of temporary-variable flavors (see `TempVar`).
pub const TEMP_FLAVORS: usize = 5;

fn flavor_index(t: &TempVar) -> usize {
    match t {
        TempVar::Local { .. } => 0,
        TempVar::Float { .. } => 1,
        TempVar::Closure { .. } => 2,
        TempVar::CurrentModule { .. } => 3,
        TempVar::CurrentScope { .. } => 4,
    }
}

pub struct Scope {
    kind: ScopeKind,
    name: String,
    file: String,
    line: usize,
    arity: Arity,
    /// Named local slots, in declaration order.
    locals: Vec<Arc<str>>,
    local_slots: HashMap<Arc<str>, usize>,
    temp_counters: [usize; TEMP_FLAVORS],
    next_label_id: u32,
    instrs: Vec<Instr>,
    nested: Vec<Rc<RefCell<Scope>>>,
    cfg: Option<Cfg>,
    analyses: HashMap<String, Rc<dyn Any>>,
}

impl Scope {
    pub fn new(kind: ScopeKind, name: impl Into<String>, file: impl Into<String>, line: usize) -> Scope {
        Scope {
            kind,
            name: name.into(),
            file: file.into(),
            line,
            arity: Arity::default(),
            locals: Vec::new(),
            local_slots: HashMap::new(),
            temp_counters: [0; TEMP_FLAVORS],
            next_label_id: 0,
            instrs: Vec::new(),
            nested: Vec::new(),
            cfg: None,
            analyses: HashMap::new(),
        }
    }

    /// Reconstructs a scope from persisted layout data. Slot order of
    /// `locals` is preserved; counters resume where the encoder left them.
    pub fn restore(
        kind: ScopeKind,
        name: String,
        file: String,
        line: usize,
        arity: Arity,
        locals: Vec<String>,
        temp_counters: [usize; TEMP_FLAVORS],
        next_label_id: u32,
    ) -> Scope {
        let mut scope = Scope::new(kind, name, file, line);
        scope.arity = arity;
        for name in locals {
            scope.declare_local(&name);
        }
        scope.temp_counters = temp_counters;
        scope.next_label_id = next_label_id;
        scope
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn set_arity(&mut self, arity: Arity) {
        self.arity = arity;
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn instrs_mut(&mut self) -> &mut Vec<Instr> {
        &mut self.instrs
    }

    pub fn add_instr(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    pub fn nested_scopes(&self) -> &[Rc<RefCell<Scope>>] {
        &self.nested
    }

    pub fn add_nested(&mut self, scope: Rc<RefCell<Scope>>) {
        self.nested.push(scope);
    }

    /// Position of `scope` in the nested list, by identity.
    pub fn nested_index(&self, scope: &Rc<RefCell<Scope>>) -> Option<usize> {
        self.nested.iter().position(|s| Rc::ptr_eq(s, scope))
    }

    // -- name/slot allocation ------------------------------------------------

    /// Declares (or looks up) a named local and returns its slot.
    pub fn declare_local(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.local_slots.get(name) {
            return slot;
        }
        let interned: Arc<str> = crate::interp::runtime::intern(name);
        let slot = self.locals.len();
        self.locals.push(interned.clone());
        self.local_slots.insert(interned, slot);
        slot
    }

    pub fn local_slot(&self, name: &str) -> Option<usize> {
        self.local_slots.get(name).copied()
    }

    pub fn local_names(&self) -> &[Arc<str>] {
        &self.locals
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Convenience: a depth-0 local variable for `name`, declaring it if new.
    pub fn local(&mut self, name: &str) -> Variable {
        let slot = self.declare_local(name);
        Variable::local(name, 0, slot)
    }

    pub fn alloc_temp(&mut self, flavor: fn(usize) -> TempVar) -> Variable {
        let probe = flavor(0);
        let idx = flavor_index(&probe);
        let slot = self.temp_counters[idx];
        self.temp_counters[idx] += 1;
        Variable::Temp(flavor(slot))
    }

    /// A fresh ordinary temporary.
    pub fn temp(&mut self) -> Variable {
        self.alloc_temp(|slot| TempVar::Local { slot })
    }

    pub fn temp_counters(&self) -> [usize; TEMP_FLAVORS] {
        self.temp_counters
    }

    pub fn new_label(&mut self, prefix: &str) -> Rc<Label> {
        let id = self.next_label_id;
        self.next_label_id += 1;
        Label::new(prefix, id)
    }

    pub fn next_label_id(&self) -> u32 {
        self.next_label_id
    }

    // -- CFG -----------------------------------------------------------------

    /// Builds the CFG if it is not already cached and returns it. Building
    /// fails only on instruction-level invariant violations, which indicate a
    /// front-end bug rather than a user-facing condition.
    pub fn build_cfg(&mut self) -> Result<&Cfg, IcError> {
        if self.cfg.is_none() {
            let cfg = Cfg::build(self)?;
            self.cfg = Some(cfg);
        }
        Ok(self.cfg.as_ref().expect("cfg just built"))
    }

    pub fn cfg(&self) -> Option<&Cfg> {
        self.cfg.as_ref()
    }

    pub fn invalidate_cfg(&mut self) {
        self.cfg = None;
    }

    // -- dataflow solution cache --------------------------------------------

    pub fn dataflow_solution<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        self.analyses.get(name).and_then(|any| any.clone().downcast::<T>().ok())
    }

    pub fn set_dataflow_solution<T: 'static>(&mut self, name: &str, solution: Rc<T>) {
        self.analyses.insert(name.to_string(), solution);
    }

    pub fn remove_dataflow_solution(&mut self, name: &str) {
        self.analyses.remove(name);
    }

    pub fn invalidate_dataflow(&mut self) {
        self.analyses.clear();
    }

    // -- capture analysis ----------------------------------------------------

    /// Locals referenced at depth >= 1, relative to this scope: variables it
    /// (or anything nested inside it) captures from enclosing scopes.
    pub fn free_outer_locals(&self) -> Vec<Variable> {
        let mut seen = Vec::new();
        for instr in &self.instrs {
            for v in instr.variables_read() {
                if matches!(&v, Variable::Local { depth, .. } if *depth >= 1) && !seen.contains(&v) {
                    seen.push(v);
                }
            }
            if let Some(v) = instr.result() {
                if matches!(v, Variable::Local { depth, .. } if *depth >= 1) && !seen.contains(v) {
                    seen.push(v.clone());
                }
            }
        }
        // Captures from nested scopes translate down one lexical level when
        // seen from here; depth-1 references were this scope's own locals.
        let nested: Vec<Variable> = self
            .nested
            .iter()
            .flat_map(|n| n.borrow().free_outer_locals())
            .collect();
        for v in nested {
            if let Some(hoisted) = v.hoisted() {
                if matches!(&hoisted, Variable::Local { depth, .. } if *depth >= 1)
                    && !seen.contains(&hoisted)
                {
                    seen.push(hoisted);
                }
            }
        }
        seen
    }
}

// The analysis cache holds type-erased entries, so Debug is by hand.
impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("locals", &self.locals)
            .field("instrs", &self.instrs.len())
            .field("nested", &self.nested.len())
            .field("cfg_built", &self.cfg.is_some())
            .finish()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:?} {} ({}:{})", self.kind, self.name, self.file, self.line)?;
        for (i, instr) in self.instrs.iter().enumerate() {
            writeln!(f, "{:04}: {}", i, instr)?;
        }
        for nested in &self.nested {
            writeln!(f, "--- nested: {}", nested.borrow())?;
        }
        Ok(())
    }
}
