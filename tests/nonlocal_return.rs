mod common;

use common::*;
use tanager_core::interp::{Interpreter, InterpError, RtValue};
use tanager_core::ir::instr::{Instr, Op};
use tanager_core::ir::operand::Operand;
use tanager_core::ir::scope::Arity;

/// `def run_block; yield; return 555; end`: the yielded block is where the
/// non-local return fires from.
fn run_block_method() -> std::rc::Rc<std::cell::RefCell<tanager_core::ir::scope::Scope>> {
    let body = method("run_block", Arity::fixed(0));
    {
        let mut s = body.borrow_mut();
        s.add_instr(Instr::new(Op::Yield { dest: None, args: vec![] }));
        s.add_instr(ret(Operand::fixnum(555)));
    }
    body
}

#[test]
fn return_inside_a_block_unwinds_to_the_defining_method() {
    // def escape; run_block { return 100 }; return 7; end
    let escape = method("escape", Arity::fixed(0));
    let block = closure("block");
    {
        let mut c = block.borrow_mut();
        c.add_instr(Instr::new(Op::NonlocalReturn { value: Operand::fixnum(100) }));
    }
    {
        let mut s = escape.borrow_mut();
        let t0 = s.temp();
        let binding = s.temp();
        s.add_nested(block.clone());
        s.add_instr(call_with_block(
            t0,
            "run_block",
            Operand::SelfRef,
            vec![],
            Operand::WrappedClosure { scope: block.clone(), binding },
        ));
        s.add_instr(ret(Operand::fixnum(7)));
    }

    let scope = script("main");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        s.add_instr(call(t0.clone(), "escape", Operand::SelfRef, vec![]));
        s.add_instr(ret(Operand::Variable(t0)));
    }

    let mut interp = Interpreter::with_core_runtime();
    interp.define_method("run_block", run_block_method());
    interp.define_method("escape", escape);
    let result = interp.execute(&scope, RtValue::Nil, &[], None).expect("run");
    assert_eq!(
        result,
        RtValue::Fixnum(100),
        "the return must unwind run_block and escape's own tail"
    );
}

#[test]
fn reentrant_activations_each_catch_their_own_return() {
    // def nest(d)
    //   if d > 0 then return nest(d - 1) + 1 end
    //   run_block { return 100 }
    //   return 555   # unreachable when the non-local return targets this frame
    // end
    let nest = method("nest", Arity::fixed(1));
    let block = closure("block");
    {
        let mut c = block.borrow_mut();
        c.add_instr(Instr::new(Op::NonlocalReturn { value: Operand::fixnum(100) }));
    }
    {
        let mut s = nest.borrow_mut();
        let d = s.local("d");
        let t_cmp = s.temp();
        let t_sub = s.temp();
        let t_rec = s.temp();
        let t_sum = s.temp();
        let t_blk = s.temp();
        let binding = s.temp();
        let recurse = s.new_label("RECURSE");
        s.add_nested(block.clone());

        s.add_instr(recv_arg(d.clone(), 0));
        s.add_instr(call(t_cmp.clone(), ">", Operand::Variable(d.clone()), vec![Operand::fixnum(0)]));
        s.add_instr(btrue(Operand::Variable(t_cmp), recurse.clone()));
        s.add_instr(call_with_block(
            t_blk,
            "run_block",
            Operand::SelfRef,
            vec![],
            Operand::WrappedClosure { scope: block.clone(), binding },
        ));
        s.add_instr(ret(Operand::fixnum(555)));
        s.add_instr(label_mark(recurse));
        s.add_instr(call(t_sub.clone(), "-", Operand::Variable(d), vec![Operand::fixnum(1)]));
        s.add_instr(call(t_rec.clone(), "nest", Operand::SelfRef, vec![Operand::Variable(t_sub)]));
        s.add_instr(call(t_sum.clone(), "+", Operand::Variable(t_rec), vec![Operand::fixnum(1)]));
        s.add_instr(ret(Operand::Variable(t_sum)));
    }

    let scope = script("main");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        s.add_instr(call(t0.clone(), "nest", Operand::SelfRef, vec![Operand::fixnum(3)]));
        s.add_instr(ret(Operand::Variable(t0)));
    }

    let mut interp = Interpreter::with_core_runtime();
    interp.define_method("run_block", run_block_method());
    interp.define_method("nest", nest);
    let result = interp.execute(&scope, RtValue::Nil, &[], None).expect("run");
    // Each recursive activation must consume only the return targeting its
    // own frame: the innermost yields 100, then one increment per level.
    assert_eq!(result, RtValue::Fixnum(103));
}

#[test]
fn nonlocal_return_is_invisible_to_rescue_regions() {
    // def shielded; run_block { return 100 } rescue nil; return 7; end
    // The rescue region around the call must not swallow the return.
    let shielded = method("shielded", Arity::fixed(0));
    let block = closure("block");
    {
        let mut c = block.borrow_mut();
        c.add_instr(Instr::new(Op::NonlocalReturn { value: Operand::fixnum(100) }));
    }
    {
        let mut s = shielded.borrow_mut();
        let t0 = s.temp();
        let binding = s.temp();
        let rescue = s.new_label("RESCUE");
        let done = s.new_label("DONE");
        s.add_nested(block.clone());
        s.add_instr(Instr::new(Op::ExcRegionStart { rescue: rescue.clone(), ensure: None }));
        s.add_instr(call_with_block(
            t0,
            "run_block",
            Operand::SelfRef,
            vec![],
            Operand::WrappedClosure { scope: block.clone(), binding },
        ));
        s.add_instr(Instr::new(Op::ExcRegionEnd));
        s.add_instr(jump(done.clone()));
        s.add_instr(label_mark(rescue));
        s.add_instr(ret(Operand::fixnum(-1)));
        s.add_instr(label_mark(done));
        s.add_instr(ret(Operand::fixnum(7)));
    }

    let scope = script("main");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        s.add_instr(call(t0.clone(), "shielded", Operand::SelfRef, vec![]));
        s.add_instr(ret(Operand::Variable(t0)));
    }

    let mut interp = Interpreter::with_core_runtime();
    interp.define_method("run_block", run_block_method());
    interp.define_method("shielded", shielded);
    let result = interp.execute(&scope, RtValue::Nil, &[], None).expect("run");
    assert_eq!(result, RtValue::Fixnum(100), "rescue must never catch a non-local return");
}

#[test]
fn orphaned_return_raises_local_jump_error() {
    // A closure executed with no enclosing method activation has no frame to
    // return to.
    let stray = closure("stray");
    {
        let mut c = stray.borrow_mut();
        c.add_instr(Instr::new(Op::NonlocalReturn { value: Operand::fixnum(1) }));
    }
    let mut interp = Interpreter::with_core_runtime();
    let err = interp.execute(&stray, RtValue::Nil, &[], None).err().expect("must fail");
    assert!(
        matches!(err, InterpError::UncaughtException { ref class_name, .. } if class_name == "LocalJumpError"),
        "got {:?}",
        err
    );
}

#[test]
fn guest_exceptions_still_cross_method_boundaries() {
    // Contrast case: a genuine raise inside the block must be caught by the
    // rescue region in the calling method.
    let shielded = method("shielded", Arity::fixed(0));
    let block = closure("block");
    {
        let mut c = block.borrow_mut();
        c.add_instr(Instr::new(Op::Raise { exception: Operand::str("kaboom") }));
    }
    {
        let mut s = shielded.borrow_mut();
        let t0 = s.temp();
        let binding = s.temp();
        let rescue = s.new_label("RESCUE");
        let done = s.new_label("DONE");
        s.add_nested(block.clone());
        s.add_instr(Instr::new(Op::ExcRegionStart { rescue: rescue.clone(), ensure: None }));
        s.add_instr(call_with_block(
            t0,
            "run_block",
            Operand::SelfRef,
            vec![],
            Operand::WrappedClosure { scope: block.clone(), binding },
        ));
        s.add_instr(Instr::new(Op::ExcRegionEnd));
        s.add_instr(jump(done.clone()));
        s.add_instr(label_mark(rescue));
        s.add_instr(ret(Operand::fixnum(-1)));
        s.add_instr(label_mark(done));
        s.add_instr(ret(Operand::fixnum(7)));
    }

    let scope = script("main");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        s.add_instr(call(t0.clone(), "shielded", Operand::SelfRef, vec![]));
        s.add_instr(ret(Operand::Variable(t0)));
    }

    let mut interp = Interpreter::with_core_runtime();
    interp.define_method("run_block", run_block_method());
    interp.define_method("shielded", shielded);
    let result = interp.execute(&scope, RtValue::Nil, &[], None).expect("run");
    assert_eq!(result, RtValue::Fixnum(-1), "the raise must land in the rescue block");
}
