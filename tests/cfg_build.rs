mod common;

use common::*;
use tanager_core::ir::cfg::EdgeKind;
use tanager_core::ir::err::IcError;
use tanager_core::ir::instr::{Instr, Op};
use tanager_core::ir::operand::{Label, Operand};

#[test]
fn straight_line_scope_has_one_body_block() {
    let scope = straight_line_add();
    let mut s = scope.borrow_mut();
    let cfg = s.build_cfg().expect("cfg");
    assert_eq!(cfg.body_block_count(), 1, "expected a single non-empty block");
    assert!(cfg.block(cfg.entry()).instrs.is_empty(), "entry placeholder must be empty");
    assert!(cfg.block(cfg.exit()).instrs.is_empty(), "exit placeholder must be empty");
    let body = &cfg.blocks()[cfg.entry().0 + 1];
    assert_eq!(body.instrs.len(), 4);
}

#[test]
fn branch_diamond_has_four_body_blocks() {
    let scope = branch_diamond();
    let mut s = scope.borrow_mut();
    let cfg = s.build_cfg().expect("cfg");
    assert_eq!(cfg.body_block_count(), 4);
}

#[test]
fn every_block_except_exit_has_an_outgoing_edge() {
    let scope = branch_diamond();
    let mut s = scope.borrow_mut();
    let cfg = s.build_cfg().expect("cfg");
    for block in cfg.blocks() {
        if block.id == cfg.exit() {
            continue;
        }
        assert!(!cfg.succs(block.id).is_empty(), "block {:?} has no outgoing edge", block.id);
    }
}

#[test]
fn conditional_block_orders_fallthrough_before_taken_edge() {
    let scope = branch_diamond();
    let mut s = scope.borrow_mut();
    s.build_cfg().expect("cfg");
    let cfg = s.cfg().expect("cfg cached");
    let branch_block = cfg
        .blocks()
        .iter()
        .find(|b| {
            b.instrs
                .iter()
                .any(|&i| matches!(s.instrs()[i].op, Op::BTrue { .. }))
        })
        .map(|b| b.id)
        .expect("branch block");
    let edges = cfg.succs(branch_block);
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].kind, EdgeKind::FallThrough, "not-taken edge must come first");
    assert_eq!(edges[1].kind, EdgeKind::Jump, "taken edge must come second");
}

#[test]
fn branch_targets_resolve_to_label_blocks() {
    let scope = branch_diamond();
    let mut s = scope.borrow_mut();
    s.build_cfg().expect("cfg");
    let cfg = s.cfg().expect("cfg cached");
    for instr in s.instrs() {
        if let Some(target) = instr.branch_target() {
            let block = cfg.block_of_label(target).expect("target resolves");
            let first = *cfg.block(block).instrs.first().expect("target block non-empty");
            match &s.instrs()[first].op {
                Op::LabelMark { label } => assert_eq!(label.as_ref(), target.as_ref()),
                other => panic!("target block does not start at a label site: {:?}", other),
            }
        }
    }
}

#[test]
fn dangling_jump_target_is_an_internal_error() {
    let scope = script("broken");
    {
        let mut s = scope.borrow_mut();
        let nowhere = Label::new("L", 99);
        s.add_instr(jump(nowhere));
        s.add_instr(ret(Operand::Nil));
    }
    let err = scope.borrow_mut().build_cfg().err().expect("must fail");
    assert!(matches!(err, IcError::DanglingJumpTarget { .. }), "got {:?}", err);
}

#[test]
fn unmatched_region_end_is_an_internal_error() {
    let scope = script("broken");
    {
        let mut s = scope.borrow_mut();
        s.add_instr(Instr::new(Op::ExcRegionEnd));
        s.add_instr(ret(Operand::Nil));
    }
    let err = scope.borrow_mut().build_cfg().err().expect("must fail");
    assert!(matches!(err, IcError::UnmatchedRegionEnd { .. }), "got {:?}", err);
}

#[test]
fn unclosed_region_is_an_internal_error() {
    let scope = script("broken");
    {
        let mut s = scope.borrow_mut();
        let rescue = s.new_label("RESCUE");
        s.add_instr(Instr::new(Op::ExcRegionStart { rescue: rescue.clone(), ensure: None }));
        s.add_instr(label_mark(rescue));
        s.add_instr(ret(Operand::Nil));
    }
    let err = scope.borrow_mut().build_cfg().err().expect("must fail");
    assert!(matches!(err, IcError::UnclosedRegion { count: 1, .. }), "got {:?}", err);
}

#[test]
fn region_blocks_get_exception_edges_to_the_rescue_block() {
    let scope = script("guarded");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        let rescue = s.new_label("RESCUE");
        let done = s.new_label("DONE");
        s.add_instr(Instr::new(Op::ExcRegionStart { rescue: rescue.clone(), ensure: None }));
        s.add_instr(Instr::new(Op::Raise { exception: Operand::str("boom") }));
        s.add_instr(Instr::new(Op::ExcRegionEnd));
        s.add_instr(jump(done.clone()));
        s.add_instr(label_mark(rescue.clone()));
        s.add_instr(Instr::new(Op::ReceiveException { dest: t0.clone() }));
        s.add_instr(label_mark(done));
        s.add_instr(ret(Operand::Variable(t0)));
    }
    let mut s = scope.borrow_mut();
    s.build_cfg().expect("cfg");
    let cfg = s.cfg().expect("cfg cached");
    let rescue_block = cfg
        .blocks()
        .iter()
        .find(|b| {
            b.instrs
                .iter()
                .any(|&i| matches!(s.instrs()[i].op, Op::ReceiveException { .. }))
        })
        .map(|b| b.id)
        .expect("rescue block");
    let raising_block = cfg
        .blocks()
        .iter()
        .find(|b| b.instrs.iter().any(|&i| matches!(s.instrs()[i].op, Op::Raise { .. })))
        .map(|b| b.id)
        .expect("raising block");
    let has_exc_edge = cfg
        .succs(raising_block)
        .iter()
        .any(|e| e.kind == EdgeKind::Exception && e.target == rescue_block);
    assert!(has_exc_edge, "raising block must carry an exception edge to the rescue block");
}

#[test]
fn unreachable_blocks_are_pruned() {
    let scope = script("skippy");
    {
        let mut s = scope.borrow_mut();
        let orphan = s.new_label("ORPHAN");
        let done = s.new_label("DONE");
        let t0 = s.temp();
        s.add_instr(jump(done.clone()));
        s.add_instr(label_mark(orphan));
        s.add_instr(copy(t0, Operand::fixnum(1)));
        s.add_instr(label_mark(done));
        s.add_instr(ret(Operand::Nil));
    }
    let mut s = scope.borrow_mut();
    let cfg = s.build_cfg().expect("cfg");
    assert_eq!(cfg.body_block_count(), 2, "orphan block must be pruned");
}

#[test]
fn build_cfg_is_idempotent_until_invalidated() {
    let scope = straight_line_add();
    let mut s = scope.borrow_mut();
    let blocks_first = s.build_cfg().expect("cfg").blocks().len();
    // A second build must return the cached graph even though the stream
    // grew; only invalidation forces a rebuild.
    s.add_instr(Instr::new(Op::Nop));
    let blocks_cached = s.build_cfg().expect("cfg").blocks().len();
    assert_eq!(blocks_first, blocks_cached);
    s.invalidate_cfg();
    let blocks_rebuilt = s.build_cfg().expect("cfg").blocks().len();
    assert!(blocks_rebuilt >= blocks_cached);
}
