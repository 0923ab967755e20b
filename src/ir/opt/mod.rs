//! file: src/ir/opt/mod.rs
//! description: optimization-pass trait and dependency-ordered pipeline.
//!
//! Passes declare a stable name (plus aliases for selection), an ordering
//! preference relative to nested scopes, and dependencies on other passes.
//! The pipeline topologically orders passes, short-circuits ones whose
//! cached result is still valid, and invalidates stale results when a pass
//! reports that it mutated the scope.

pub mod compact;
pub mod dce;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use log::debug;

use crate::ir::dataflow::liveness::{run_liveness, LivenessSolution, LIVE_VARS};
use crate::ir::err::IcError;
use crate::ir::scope::Scope;
use crate::reports::CompileReport;

/// When a pass runs relative to the nested scopes of its target: pre-order
/// passes handle a scope before its children, post-order after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOrder {
    Pre,
    Post,
}

pub trait Pass {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn order(&self) -> PassOrder {
        PassOrder::Pre
    }

    /// Pass names that must run before this one.
    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }

    /// Passes whose cached results this pass's mutations violate.
    fn invalidates(&self) -> &'static [&'static str] {
        &[]
    }

    /// True when a cached result is still valid for `scope`; the pipeline
    /// then skips `execute`.
    fn previously_run(&self, _scope: &Scope) -> bool {
        false
    }

    /// Runs the pass. Returns true when the scope was mutated.
    fn execute(&self, scope: &mut Scope) -> Result<bool, IcError>;

    /// Drops any cached result this pass left on `scope`.
    fn invalidate(&self, _scope: &mut Scope) {}

    fn answers_to(&self, name: &str) -> bool {
        self.name() == name || self.aliases().contains(&name)
    }
}

/// CFG construction modeled as a pass so other passes can depend on it and
/// the pipeline can short-circuit on the cached graph.
pub struct CfgBuildPass;

impl Pass for CfgBuildPass {
    fn name(&self) -> &'static str {
        "cfg"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["cfg-build"]
    }

    fn previously_run(&self, scope: &Scope) -> bool {
        scope.cfg().is_some()
    }

    fn execute(&self, scope: &mut Scope) -> Result<bool, IcError> {
        scope.build_cfg()?;
        Ok(false)
    }

    fn invalidate(&self, scope: &mut Scope) {
        scope.invalidate_cfg();
    }
}

pub struct LiveVariablePass;

impl Pass for LiveVariablePass {
    fn name(&self) -> &'static str {
        LIVE_VARS
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["liveness"]
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["cfg"]
    }

    fn previously_run(&self, scope: &Scope) -> bool {
        scope.dataflow_solution::<LivenessSolution>(LIVE_VARS).is_some()
    }

    fn execute(&self, scope: &mut Scope) -> Result<bool, IcError> {
        run_liveness(scope)?;
        Ok(false)
    }

    fn invalidate(&self, scope: &mut Scope) {
        scope.remove_dataflow_solution(LIVE_VARS);
    }
}

pub struct PassPipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl PassPipeline {
    pub fn new() -> PassPipeline {
        PassPipeline { passes: Vec::new() }
    }

    /// The stock optimization pipeline: build-cfg, liveness, dead-code
    /// elimination, compaction.
    pub fn standard() -> PassPipeline {
        let mut p = PassPipeline::new();
        p.add(Box::new(CfgBuildPass));
        p.add(Box::new(LiveVariablePass));
        p.add(Box::new(dce::DeadCodeEliminationPass));
        p.add(Box::new(compact::CompactPass));
        p
    }

    pub fn add(&mut self, pass: Box<dyn Pass>) -> &mut PassPipeline {
        self.passes.push(pass);
        self
    }

    pub fn find(&self, name: &str) -> Option<&dyn Pass> {
        self.passes.iter().map(|p| p.as_ref()).find(|p| p.answers_to(name))
    }

    pub fn run(&self, scope: &Rc<RefCell<Scope>>) -> Result<(), IcError> {
        self.run_inner(scope, None)
    }

    /// Like `run`, but records per-pass timings into the report.
    pub fn run_with_report(
        &self,
        scope: &Rc<RefCell<Scope>>,
        report: &mut CompileReport,
    ) -> Result<(), IcError> {
        self.run_inner(scope, Some(report))
    }

    fn run_inner(
        &self,
        scope: &Rc<RefCell<Scope>>,
        mut report: Option<&mut CompileReport>,
    ) -> Result<(), IcError> {
        for idx in self.ordered()? {
            let pass = self.passes[idx].as_ref();
            let started = Instant::now();
            let changed = self.run_on_scope(pass, scope)?;
            debug!("pass '{}' done (changed: {})", pass.name(), changed);
            if let Some(r) = report.as_deref_mut() {
                r.record_pass(pass.name(), started.elapsed(), changed);
            }
        }
        Ok(())
    }

    // One pass over a scope tree, honoring the pass's ordering preference.
    fn run_on_scope(&self, pass: &dyn Pass, scope: &Rc<RefCell<Scope>>) -> Result<bool, IcError> {
        let mut changed = false;
        if pass.order() == PassOrder::Pre {
            changed |= self.execute_one(pass, scope)?;
        }
        let nested: Vec<Rc<RefCell<Scope>>> = scope.borrow().nested_scopes().to_vec();
        for child in &nested {
            changed |= self.run_on_scope(pass, child)?;
        }
        if pass.order() == PassOrder::Post {
            changed |= self.execute_one(pass, scope)?;
        }
        Ok(changed)
    }

    fn execute_one(&self, pass: &dyn Pass, scope: &Rc<RefCell<Scope>>) -> Result<bool, IcError> {
        let mut s = scope.borrow_mut();
        if pass.previously_run(&s) {
            return Ok(false);
        }
        let changed = pass.execute(&mut s)?;
        if changed {
            for name in pass.invalidates() {
                if let Some(stale) = self.find(name) {
                    stale.invalidate(&mut s);
                }
            }
        }
        Ok(changed)
    }

    /// Dependency-respecting order over the registered passes. Registration
    /// order is preserved where dependencies allow.
    fn ordered(&self) -> Result<Vec<usize>, IcError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }

        fn visit(
            pipeline: &PassPipeline,
            idx: usize,
            marks: &mut [Mark],
            out: &mut Vec<usize>,
        ) -> Result<(), IcError> {
            match marks[idx] {
                Mark::Done => return Ok(()),
                Mark::Visiting => {
                    return Err(IcError::PassDependencyCycle {
                        pass: pipeline.passes[idx].name().to_string(),
                    });
                }
                Mark::Unvisited => {}
            }
            marks[idx] = Mark::Visiting;
            for dep in pipeline.passes[idx].depends_on() {
                let dep_idx = pipeline
                    .passes
                    .iter()
                    .position(|p| p.answers_to(dep))
                    .ok_or_else(|| IcError::UnknownPassDependency {
                        pass: pipeline.passes[idx].name().to_string(),
                        dependency: dep.to_string(),
                    })?;
                visit(pipeline, dep_idx, marks, out)?;
            }
            marks[idx] = Mark::Done;
            out.push(idx);
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.passes.len()];
        let mut out = Vec::with_capacity(self.passes.len());
        for idx in 0..self.passes.len() {
            visit(self, idx, &mut marks, &mut out)?;
        }
        Ok(out)
    }
}

impl Default for PassPipeline {
    fn default() -> PassPipeline {
        PassPipeline::new()
    }
}
