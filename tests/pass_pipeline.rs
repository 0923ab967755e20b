mod common;

use common::*;
use tanager_core::ir::err::IcError;
use tanager_core::ir::operand::{Label, Operand};
use tanager_core::ir::opt::{
    compact::CompactPass, dce::DeadCodeEliminationPass, CfgBuildPass, LiveVariablePass, Pass,
    PassPipeline,
};
use tanager_core::ir::scope::Scope;
use tanager_core::reports::CompileReport;

fn scope_with_dead_code() -> std::rc::Rc<std::cell::RefCell<Scope>> {
    let scope = script("wasteful");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        let t1 = s.temp();
        s.add_instr(copy(t0.clone(), Operand::fixnum(1)));
        s.add_instr(copy(t1, Operand::fixnum(2)));
        s.add_instr(ret(Operand::Variable(t0)));
    }
    scope
}

#[test]
fn registration_order_is_corrected_by_dependencies() {
    // Scrambled registration; execution order must still respect deps.
    let mut pipeline = PassPipeline::new();
    pipeline.add(Box::new(CompactPass));
    pipeline.add(Box::new(DeadCodeEliminationPass));
    pipeline.add(Box::new(LiveVariablePass));
    pipeline.add(Box::new(CfgBuildPass));

    let scope = scope_with_dead_code();
    let mut report = CompileReport::new("wasteful", 3);
    pipeline.run_with_report(&scope, &mut report).expect("pipeline");

    let order: Vec<&str> = report.passes.iter().map(|p| p.pass.as_str()).collect();
    let position = |name: &str| order.iter().position(|p| *p == name).expect(name);
    assert!(position("cfg") < position("live-vars"));
    assert!(position("live-vars") < position("dead-code"));
    assert!(position("dead-code") < position("compact"));
    assert_eq!(scope.borrow().instrs().len(), 2);
}

#[test]
fn optimize_reports_what_changed() {
    let scope = scope_with_dead_code();
    let report = tanager_core::ir::optimize(&scope).expect("optimize");
    assert_eq!(report.instrs_before, 3);
    assert_eq!(report.instrs_after, 2);
    let changed: Vec<&str> =
        report.passes.iter().filter(|p| p.changed).map(|p| p.pass.as_str()).collect();
    assert_eq!(changed, vec!["dead-code", "compact"]);

    let json = report.to_json().expect("json");
    assert!(json.contains("\"instrs_before\": 3"), "got: {}", json);
    assert!(report.summary().contains("3 -> 2"));
}

#[test]
fn previously_run_short_circuits_cfg_construction() {
    let scope = scope_with_dead_code();
    {
        let mut s = scope.borrow_mut();
        s.build_cfg().expect("cfg");
        // Poison the stream with a dangling branch WITHOUT invalidating: a
        // rebuild would fail, so a passing run proves the short-circuit.
        s.add_instr(jump(Label::new("NOWHERE", 7)));
    }
    let mut pipeline = PassPipeline::new();
    pipeline.add(Box::new(CfgBuildPass));
    pipeline.run(&scope).expect("must use the cached CFG");

    scope.borrow_mut().invalidate_cfg();
    let err = pipeline.run(&scope).err().expect("rebuild must now fail");
    assert!(matches!(err, IcError::DanglingJumpTarget { .. }));
}

#[test]
fn unknown_dependency_is_reported() {
    struct Needy;
    impl Pass for Needy {
        fn name(&self) -> &'static str {
            "needy"
        }
        fn depends_on(&self) -> &'static [&'static str] {
            &["no-such-pass"]
        }
        fn execute(&self, _scope: &mut Scope) -> Result<bool, IcError> {
            Ok(false)
        }
    }

    let mut pipeline = PassPipeline::new();
    pipeline.add(Box::new(Needy));
    let err = pipeline.run(&scope_with_dead_code()).err().expect("must fail");
    assert!(
        matches!(err, IcError::UnknownPassDependency { ref dependency, .. } if dependency == "no-such-pass"),
        "got {:?}",
        err
    );
}

#[test]
fn dependency_cycles_are_reported() {
    struct Chicken;
    impl Pass for Chicken {
        fn name(&self) -> &'static str {
            "chicken"
        }
        fn depends_on(&self) -> &'static [&'static str] {
            &["egg"]
        }
        fn execute(&self, _scope: &mut Scope) -> Result<bool, IcError> {
            Ok(false)
        }
    }
    struct Egg;
    impl Pass for Egg {
        fn name(&self) -> &'static str {
            "egg"
        }
        fn depends_on(&self) -> &'static [&'static str] {
            &["chicken"]
        }
        fn execute(&self, _scope: &mut Scope) -> Result<bool, IcError> {
            Ok(false)
        }
    }

    let mut pipeline = PassPipeline::new();
    pipeline.add(Box::new(Chicken));
    pipeline.add(Box::new(Egg));
    let err = pipeline.run(&scope_with_dead_code()).err().expect("must fail");
    assert!(matches!(err, IcError::PassDependencyCycle { .. }), "got {:?}", err);
}

#[test]
fn passes_are_selectable_by_alias() {
    let pipeline = PassPipeline::standard();
    assert!(pipeline.find("dce").is_some());
    assert!(pipeline.find("dead-code").is_some());
    assert!(pipeline.find("cfg-build").is_some());
    assert!(pipeline.find("liveness").is_some());
    assert!(pipeline.find("no-such-pass").is_none());
}

#[test]
fn mutating_passes_invalidate_dependent_results() {
    let scope = scope_with_dead_code();
    tanager_core::ir::optimize(&scope).expect("optimize");
    let s = scope.borrow();
    assert!(s.cfg().is_none(), "compaction changed the stream, the CFG must be dropped");
    assert!(
        s.dataflow_solution::<tanager_core::ir::dataflow::liveness::LivenessSolution>(
            tanager_core::ir::dataflow::liveness::LIVE_VARS
        )
        .is_none(),
        "liveness must be dropped with the CFG"
    );
}
