#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use tanager_core::ir::instr::{Instr, Op};
use tanager_core::ir::operand::{Label, Operand, TempVar, Variable};
use tanager_core::ir::scope::{Arity, Scope, ScopeKind};

pub fn script(name: &str) -> Rc<RefCell<Scope>> {
    Rc::new(RefCell::new(Scope::new(ScopeKind::Script, name, "t.tngr", 1)))
}

pub fn method(name: &str, arity: Arity) -> Rc<RefCell<Scope>> {
    let mut s = Scope::new(ScopeKind::Method, name, "t.tngr", 1);
    s.set_arity(arity);
    Rc::new(RefCell::new(s))
}

pub fn closure(name: &str) -> Rc<RefCell<Scope>> {
    Rc::new(RefCell::new(Scope::new(ScopeKind::Closure, name, "t.tngr", 1)))
}

pub fn temp(slot: usize) -> Variable {
    Variable::Temp(TempVar::Local { slot })
}

pub fn copy(dest: Variable, src: Operand) -> Instr {
    Instr::new(Op::Copy { dest, src })
}

pub fn call(dest: Variable, name: &str, receiver: Operand, args: Vec<Operand>) -> Instr {
    Instr::new(Op::Call {
        dest: Some(dest),
        meth: Operand::meth_addr(name),
        receiver,
        args,
        block: None,
    })
}

pub fn call_with_block(
    dest: Variable,
    name: &str,
    receiver: Operand,
    args: Vec<Operand>,
    block: Operand,
) -> Instr {
    Instr::new(Op::Call {
        dest: Some(dest),
        meth: Operand::meth_addr(name),
        receiver,
        args,
        block: Some(block),
    })
}

pub fn ret(value: Operand) -> Instr {
    Instr::new(Op::Return { value })
}

pub fn jump(target: Rc<Label>) -> Instr {
    Instr::new(Op::Jump { target })
}

pub fn btrue(cond: Operand, target: Rc<Label>) -> Instr {
    Instr::new(Op::BTrue { cond, target })
}

pub fn label_mark(label: Rc<Label>) -> Instr {
    Instr::new(Op::LabelMark { label })
}

pub fn recv_arg(dest: Variable, index: usize) -> Instr {
    Instr::new(Op::ReceiveArg { dest, index })
}

/// The straight-line add scenario: `t0 = 2; t1 = 3; t2 = t0 + t1; return t2`.
pub fn straight_line_add() -> Rc<RefCell<Scope>> {
    let scope = script("main");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        let t1 = s.temp();
        let t2 = s.temp();
        s.add_instr(copy(t0.clone(), Operand::fixnum(2)));
        s.add_instr(copy(t1.clone(), Operand::fixnum(3)));
        s.add_instr(call(t2.clone(), "+", Operand::Variable(t0), vec![Operand::Variable(t1)]));
        s.add_instr(ret(Operand::Variable(t2)));
    }
    scope
}

/// The diamond scenario: branch on argument 0, assign 0 or 1, return it.
///
/// ```text
/// recv_arg t0, 0
/// b_true(t0) L1
/// t1 = copy(0)
/// jump L2
/// L1: t1 = copy(1)
/// L2: return t1
/// ```
pub fn branch_diamond() -> Rc<RefCell<Scope>> {
    let scope = method("pick", Arity::fixed(1));
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        let t1 = s.temp();
        let l1 = s.new_label("L");
        let l2 = s.new_label("L");
        s.add_instr(recv_arg(t0.clone(), 0));
        s.add_instr(btrue(Operand::Variable(t0), l1.clone()));
        s.add_instr(copy(t1.clone(), Operand::fixnum(0)));
        s.add_instr(jump(l2.clone()));
        s.add_instr(label_mark(l1));
        s.add_instr(copy(t1.clone(), Operand::fixnum(1)));
        s.add_instr(label_mark(l2));
        s.add_instr(ret(Operand::Variable(t1)));
    }
    scope
}
