//! file: src/interp/exec.rs
//! description: CFG-aware tree-walking interpreter.
//!
//! One activation per call: a frame in the arena, per-flavor temporary
//! slots, the received block and an exception-region stack. Control leaves
//! an activation through an explicit `Unwind` signal constructed fresh per
//! throw; only the frame a non-local return targets consumes it, and guest
//! rescue regions only ever observe `Raise`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::interp::err::InterpError;
use crate::interp::frame::{FrameId, Frames};
use crate::interp::runtime::{intern, CoreRuntime, Runtime};
use crate::interp::value::{RtBoundMethod, RtProc, RtRange, RtRegexp, RtValue, RegexpOptions};
use crate::ir::err::IcError;
use crate::ir::instr::{Instr, Op};
use crate::ir::operand::{Label, Operand, TempVar, Variable};
use crate::ir::scope::{Scope, TEMP_FLAVORS};

/// Non-local control leaving an activation.
#[derive(Debug, Clone)]
pub enum Unwind {
    /// A `return` executed inside a closure, targeting the identified
    /// method/script activation. Every other frame re-propagates unchanged.
    NonlocalReturn { target: FrameId, value: RtValue },
    /// An in-flight guest exception.
    Raise { exception: RtValue },
    /// Compiler-invariant violation observed at run time; bypasses all guest
    /// handling.
    Fatal(IcError),
}

enum Step {
    Next,
    Goto(Rc<Label>),
    Return(RtValue),
}

// Per-flavor temporary slots for one activation.
struct TempStore {
    locals: Vec<RtValue>,
    floats: Vec<f64>,
    closures: Vec<RtValue>,
    modules: Vec<RtValue>,
    scopes: Vec<RtValue>,
}

impl TempStore {
    fn new(counters: [usize; TEMP_FLAVORS]) -> TempStore {
        TempStore {
            locals: vec![RtValue::Nil; counters[0]],
            floats: vec![0.0; counters[1]],
            closures: vec![RtValue::Nil; counters[2]],
            modules: vec![RtValue::Nil; counters[3]],
            scopes: vec![RtValue::Nil; counters[4]],
        }
    }
}

struct Activation<'a> {
    frame: FrameId,
    temps: TempStore,
    self_val: &'a RtValue,
    args: &'a [RtValue],
    block: Option<&'a RtValue>,
    /// Innermost-last stack of open rescue regions.
    regions: Vec<(Rc<Label>, Option<Rc<Label>>)>,
    exception: Option<RtValue>,
}

pub struct Interpreter {
    runtime: Box<dyn Runtime>,
    frames: Frames,
    methods: HashMap<Arc<str>, Rc<RefCell<Scope>>>,
}

impl Interpreter {
    pub fn new(runtime: Box<dyn Runtime>) -> Interpreter {
        Interpreter { runtime, frames: Frames::new(), methods: HashMap::new() }
    }

    pub fn with_core_runtime() -> Interpreter {
        Interpreter::new(Box::new(CoreRuntime::new()))
    }

    /// Registers a method body outside of guest execution (the front end
    /// uses this for predefined methods; guest code uses `DefineMethod`).
    pub fn define_method(&mut self, name: &str, body: Rc<RefCell<Scope>>) {
        self.methods.insert(intern(name), body);
    }

    /// Runs `scope` as a fresh activation. Guest exceptions that reach this
    /// boundary, including orphaned non-local returns, surface as
    /// `InterpError`.
    pub fn execute(
        &mut self,
        scope: &Rc<RefCell<Scope>>,
        self_val: RtValue,
        args: &[RtValue],
        block: Option<RtValue>,
    ) -> Result<RtValue, InterpError> {
        if let Err(Unwind::Fatal(e)) = self.ensure_cfg(scope) {
            return Err(InterpError::Internal(e));
        }
        let (kind, locals) = {
            let s = scope.borrow();
            (s.kind(), s.local_count())
        };
        let frame = self.frames.alloc(kind, None, locals);
        match self.run_activation(scope, frame, &self_val, args, block.as_ref()) {
            Ok(value) => Ok(value),
            Err(Unwind::Raise { exception }) => {
                let (class_name, message) = describe_exception(&exception);
                Err(InterpError::UncaughtException { class_name, message })
            }
            Err(Unwind::NonlocalReturn { .. }) => Err(InterpError::UncaughtException {
                class_name: "LocalJumpError".to_string(),
                message: "unexpected return".to_string(),
            }),
            Err(Unwind::Fatal(e)) => Err(InterpError::Internal(e)),
        }
    }

    // -- activation machinery ------------------------------------------------

    fn ensure_cfg(&mut self, scope: &Rc<RefCell<Scope>>) -> Result<(), Unwind> {
        let built = scope.borrow().cfg().is_some();
        if !built {
            scope.borrow_mut().build_cfg().map(|_| ()).map_err(Unwind::Fatal)?;
        }
        Ok(())
    }

    /// Runs one activation and consumes the non-local return that targets
    /// its frame; anything else propagates unchanged.
    fn run_activation(
        &mut self,
        scope: &Rc<RefCell<Scope>>,
        frame: FrameId,
        self_val: &RtValue,
        args: &[RtValue],
        block: Option<&RtValue>,
    ) -> Result<RtValue, Unwind> {
        let result = self.run(scope, frame, self_val, args, block);
        self.frames.deactivate(frame);
        match result {
            Err(Unwind::NonlocalReturn { target, value }) if target == frame => Ok(value),
            other => other,
        }
    }

    fn run(
        &mut self,
        scope_rc: &Rc<RefCell<Scope>>,
        frame: FrameId,
        self_val: &RtValue,
        args: &[RtValue],
        block: Option<&RtValue>,
    ) -> Result<RtValue, Unwind> {
        let scope = scope_rc.borrow();
        let cfg = scope.cfg().ok_or_else(|| {
            Unwind::Fatal(IcError::MissingCfg {
                pass: "interpret".to_string(),
                scope: scope.name().to_string(),
            })
        })?;

        let mut act = Activation {
            frame,
            temps: TempStore::new(scope.temp_counters()),
            self_val,
            args,
            block,
            regions: Vec::new(),
            exception: None,
        };

        let mut block_id = cfg.entry();
        loop {
            if block_id == cfg.exit() {
                return Ok(RtValue::Nil);
            }
            let bb = cfg.block(block_id);
            let mut transfer: Option<Rc<Label>> = None;
            for &i in &bb.instrs {
                let instr = &scope.instrs()[i];
                if instr.is_dead() {
                    continue;
                }
                match self.exec_instr(instr, &mut act) {
                    Ok(Step::Next) => {}
                    Ok(Step::Goto(label)) => {
                        transfer = Some(label);
                        break;
                    }
                    Ok(Step::Return(value)) => return Ok(value),
                    Err(Unwind::Raise { exception }) => {
                        // Innermost open region handles the exception; the
                        // region is closed so a raise inside the rescue body
                        // dispatches outward.
                        if let Some((rescue, _ensure)) = act.regions.pop() {
                            act.exception = Some(exception);
                            transfer = Some(rescue);
                            break;
                        }
                        return Err(Unwind::Raise { exception });
                    }
                    Err(other) => return Err(other),
                }
            }

            block_id = match transfer {
                Some(label) => cfg.block_of_label(&label).ok_or_else(|| {
                    Unwind::Fatal(IcError::DanglingJumpTarget {
                        scope: scope.name().to_string(),
                        label: label.to_string(),
                    })
                })?,
                None => cfg.fallthrough_of(block_id).unwrap_or_else(|| cfg.exit()),
            };
        }
    }

    fn exec_instr(&mut self, instr: &Instr, act: &mut Activation) -> Result<Step, Unwind> {
        match &instr.op {
            Op::LineNum { .. } | Op::Nop | Op::LabelMark { .. } => Ok(Step::Next),
            Op::ExcRegionStart { rescue, ensure } => {
                act.regions.push((rescue.clone(), ensure.clone()));
                Ok(Step::Next)
            }
            Op::ExcRegionEnd => {
                if act.regions.pop().is_none() {
                    return Err(Unwind::Fatal(IcError::UnmatchedRegionEnd {
                        scope: "<active>".to_string(),
                    }));
                }
                Ok(Step::Next)
            }
            Op::Copy { dest, src } => {
                let value = self.retrieve(src, act)?;
                self.write_var(dest, value, act)?;
                Ok(Step::Next)
            }
            Op::Call { dest, meth, receiver, args, block } => {
                let name = self.call_target_name(meth, act)?;
                let recv = self.retrieve(receiver, act)?;
                let mut argv = Vec::with_capacity(args.len());
                for a in args {
                    argv.push(self.retrieve(a, act)?);
                }
                let blk = match block {
                    Some(b) => match self.retrieve(b, act)? {
                        RtValue::Nil => None,
                        v => Some(v),
                    },
                    None => None,
                };
                let result = self.dispatch_call(&recv, &name, argv, blk)?;
                if let Some(d) = dest {
                    self.write_var(d, result, act)?;
                }
                Ok(Step::Next)
            }
            Op::Jump { target } => Ok(Step::Goto(target.clone())),
            Op::BTrue { cond, target } => {
                if self.retrieve(cond, act)?.truthy() {
                    Ok(Step::Goto(target.clone()))
                } else {
                    Ok(Step::Next)
                }
            }
            Op::BFalse { cond, target } => {
                if self.retrieve(cond, act)?.truthy() {
                    Ok(Step::Next)
                } else {
                    Ok(Step::Goto(target.clone()))
                }
            }
            Op::Return { value } => Ok(Step::Return(self.retrieve(value, act)?)),
            Op::NonlocalReturn { value } => {
                let value = self.retrieve(value, act)?;
                let Some(target) = self.frames.return_target(act.frame) else {
                    return Err(self.guest_error("LocalJumpError", "unexpected return"));
                };
                if !self.frames.is_alive(target) {
                    return Err(self.guest_error("LocalJumpError", "unexpected return"));
                }
                Err(Unwind::NonlocalReturn { target, value })
            }
            Op::ReceiveArg { dest, index } => {
                let value = act.args.get(*index).cloned().unwrap_or(RtValue::Nil);
                self.write_var(dest, value, act)?;
                Ok(Step::Next)
            }
            Op::ReceiveClosure { dest } => {
                let value = act.block.cloned().unwrap_or(RtValue::Nil);
                self.write_var(dest, value, act)?;
                Ok(Step::Next)
            }
            Op::ReceiveException { dest } => {
                let value = act.exception.clone().unwrap_or(RtValue::Nil);
                self.write_var(dest, value, act)?;
                Ok(Step::Next)
            }
            Op::Raise { exception } => {
                let value = self.retrieve(exception, act)?;
                let exception = match value {
                    exc @ RtValue::Exception(_) => exc,
                    other => {
                        let message = self.runtime.stringify(&other);
                        self.runtime.exception("RuntimeError", message)
                    }
                };
                Err(Unwind::Raise { exception })
            }
            Op::Yield { dest, args } => {
                let proc = match act.block {
                    Some(RtValue::Proc(p)) => p.clone(),
                    _ => {
                        return Err(self.guest_error("LocalJumpError", "no block given (yield)"));
                    }
                };
                let mut argv = Vec::with_capacity(args.len());
                for a in args {
                    argv.push(self.retrieve(a, act)?);
                }
                let result = self.call_proc(&proc, argv)?;
                if let Some(d) = dest {
                    self.write_var(d, result, act)?;
                }
                Ok(Step::Next)
            }
            Op::DefineMethod { name, body } => {
                self.methods.insert(name.clone(), body.clone());
                Ok(Step::Next)
            }
        }
    }

    // -- dispatch ------------------------------------------------------------

    fn call_target_name(&mut self, meth: &Operand, act: &mut Activation) -> Result<Arc<str>, Unwind> {
        match meth {
            Operand::MethAddr(name) => Ok(name.clone()),
            Operand::Symbol { name, .. } => Ok(name.clone()),
            other => match self.retrieve(other, act)? {
                RtValue::Symbol(name) => Ok(name),
                RtValue::Str(s) => Ok(intern(&s.borrow())),
                v => Err(self.guest_error(
                    "TypeError",
                    format!("{} is not a method name", v.type_name()),
                )),
            },
        }
    }

    fn dispatch_call(
        &mut self,
        recv: &RtValue,
        name: &Arc<str>,
        args: Vec<RtValue>,
        block: Option<RtValue>,
    ) -> Result<RtValue, Unwind> {
        if let Some(result) = self.runtime.call_builtin(recv, name, &args) {
            return result.map_err(|exception| Unwind::Raise { exception });
        }
        let Some(body) = self.methods.get(name).cloned() else {
            return Err(self.guest_error(
                "NoMethodError",
                format!("undefined method '{}' for {}", name, recv.type_name()),
            ));
        };
        let arity = body.borrow().arity();
        if !arity.accepts(args.len()) {
            let expected = if arity.rest {
                format!("{}+", arity.required)
            } else if arity.optional > 0 {
                format!("{}..{}", arity.required, arity.required + arity.optional)
            } else {
                arity.required.to_string()
            };
            return Err(self.guest_error(
                "ArgumentError",
                format!("wrong number of arguments (given {}, expected {})", args.len(), expected),
            ));
        }
        self.ensure_cfg(&body)?;
        let (kind, locals) = {
            let b = body.borrow();
            (b.kind(), b.local_count())
        };
        let frame = self.frames.alloc(kind, None, locals);
        self.run_activation(&body, frame, recv, &args, block.as_ref())
    }

    fn call_proc(&mut self, proc: &Rc<RtProc>, args: Vec<RtValue>) -> Result<RtValue, Unwind> {
        self.ensure_cfg(&proc.scope)?;
        let (kind, locals) = {
            let s = proc.scope.borrow();
            (s.kind(), s.local_count())
        };
        let frame = self.frames.alloc(kind, Some(proc.frame), locals);
        let self_val = proc.self_val.clone();
        self.run_activation(&proc.scope, frame, &self_val, &args, None)
    }

    // -- operand retrieval / assignment --------------------------------------

    fn retrieve(&mut self, operand: &Operand, act: &mut Activation) -> Result<RtValue, Unwind> {
        match operand {
            Operand::Fixnum { value, cached } => {
                Ok(cached.get_or_init(|| RtValue::Fixnum(*value)).clone())
            }
            Operand::Float { value, cached } => {
                Ok(cached.get_or_init(|| RtValue::Float(*value)).clone())
            }
            Operand::Boolean { value, cached } => {
                Ok(cached.get_or_init(|| RtValue::Bool(*value)).clone())
            }
            Operand::Str { value, cached } => {
                if let Some(v) = cached.get() {
                    return Ok(v.clone());
                }
                let boxed = self.runtime.box_string(value);
                Ok(cached.get_or_init(|| boxed).clone())
            }
            Operand::Symbol { name, cached } => {
                Ok(cached.get_or_init(|| RtValue::Symbol(name.clone())).clone())
            }
            Operand::Regexp { pattern, flags, cached } => {
                if let Some(v) = cached.get() {
                    return Ok(v.clone());
                }
                let compiled = RtValue::Regexp(Rc::new(RtRegexp {
                    pattern: pattern.clone(),
                    options: RegexpOptions {
                        ignore_case: flags.ignore_case,
                        multiline: flags.multiline,
                        extended: flags.extended,
                    },
                }));
                Ok(cached.get_or_init(|| compiled).clone())
            }
            Operand::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.retrieve(item, act)?);
                }
                Ok(RtValue::array(out))
            }
            Operand::Hash(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push((self.retrieve(k, act)?, self.retrieve(v, act)?));
                }
                Ok(RtValue::Hash(Rc::new(RefCell::new(out))))
            }
            Operand::Range { begin, end, exclusive } => {
                let begin = self.retrieve(begin, act)?;
                let end = self.retrieve(end, act)?;
                Ok(RtValue::Range(Rc::new(RtRange { begin, end, exclusive: *exclusive })))
            }
            Operand::CompoundString(parts) => {
                let mut out = String::new();
                for part in parts {
                    let v = self.retrieve(part, act)?;
                    out.push_str(&self.runtime.stringify(&v));
                }
                Ok(RtValue::str(out))
            }
            Operand::SelfRef => Ok(act.self_val.clone()),
            Operand::Nil => Ok(RtValue::Nil),
            Operand::UndefinedValue => Ok(RtValue::Undefined),
            Operand::UnexecutableNil | Operand::Label(_) => {
                Err(Unwind::Fatal(IcError::UnexecutableOperand { operand: operand.to_string() }))
            }
            Operand::Variable(v) => self.read_var(v, act),
            Operand::MethAddr(name) => Ok(RtValue::Symbol(name.clone())),
            Operand::MethodHandle { receiver, name } => {
                let recv = self.retrieve(receiver, act)?;
                let name = match self.retrieve(name, act)? {
                    RtValue::Symbol(s) => s,
                    RtValue::Str(s) => intern(&s.borrow()),
                    v => {
                        return Err(self.guest_error(
                            "TypeError",
                            format!("{} is not a method name", v.type_name()),
                        ));
                    }
                };
                Ok(RtValue::BoundMethod(Rc::new(RtBoundMethod { receiver: recv, name })))
            }
            Operand::WrappedClosure { scope, binding } => {
                let proc = RtValue::Proc(Rc::new(RtProc {
                    scope: scope.clone(),
                    frame: act.frame,
                    self_val: act.self_val.clone(),
                }));
                self.write_var(binding, proc.clone(), act)?;
                Ok(proc)
            }
        }
    }

    fn read_var(&mut self, var: &Variable, act: &mut Activation) -> Result<RtValue, Unwind> {
        match var {
            Variable::Local { depth, slot, .. } => {
                self.frames.get_local(act.frame, *depth, *slot).ok_or_else(|| {
                    Unwind::Fatal(IcError::UnexecutableOperand { operand: var.to_string() })
                })
            }
            Variable::Temp(TempVar::Local { slot }) => {
                Ok(act.temps.locals.get(*slot).cloned().unwrap_or(RtValue::Nil))
            }
            Variable::Temp(TempVar::Float { slot }) => {
                Ok(RtValue::Float(act.temps.floats.get(*slot).copied().unwrap_or(0.0)))
            }
            Variable::Temp(TempVar::Closure { slot, .. }) => {
                Ok(act.temps.closures.get(*slot).cloned().unwrap_or(RtValue::Nil))
            }
            Variable::Temp(TempVar::CurrentModule { slot }) => {
                Ok(act.temps.modules.get(*slot).cloned().unwrap_or(RtValue::Nil))
            }
            Variable::Temp(TempVar::CurrentScope { slot }) => {
                Ok(act.temps.scopes.get(*slot).cloned().unwrap_or(RtValue::Nil))
            }
        }
    }

    fn write_var(
        &mut self,
        var: &Variable,
        value: RtValue,
        act: &mut Activation,
    ) -> Result<(), Unwind> {
        match var {
            Variable::Local { depth, slot, .. } => {
                if !self.frames.set_local(act.frame, *depth, *slot, value) {
                    return Err(Unwind::Fatal(IcError::UnexecutableOperand {
                        operand: var.to_string(),
                    }));
                }
                Ok(())
            }
            Variable::Temp(TempVar::Local { slot }) => {
                store_slot(&mut act.temps.locals, *slot, value);
                Ok(())
            }
            Variable::Temp(TempVar::Float { slot }) => {
                let raw = match value {
                    RtValue::Float(x) => x,
                    RtValue::Fixnum(i) => i as f64,
                    other => {
                        return Err(self.guest_error(
                            "TypeError",
                            format!("can't store {} in a float slot", other.type_name()),
                        ));
                    }
                };
                if *slot >= act.temps.floats.len() {
                    act.temps.floats.resize(*slot + 1, 0.0);
                }
                act.temps.floats[*slot] = raw;
                Ok(())
            }
            Variable::Temp(TempVar::Closure { slot, .. }) => {
                store_slot(&mut act.temps.closures, *slot, value);
                Ok(())
            }
            Variable::Temp(TempVar::CurrentModule { slot }) => {
                store_slot(&mut act.temps.modules, *slot, value);
                Ok(())
            }
            Variable::Temp(TempVar::CurrentScope { slot }) => {
                store_slot(&mut act.temps.scopes, *slot, value);
                Ok(())
            }
        }
    }

    fn guest_error(&mut self, class_name: &str, message: impl Into<String>) -> Unwind {
        Unwind::Raise { exception: self.runtime.exception(class_name, message.into()) }
    }
}

fn store_slot(slots: &mut Vec<RtValue>, slot: usize, value: RtValue) {
    if slot >= slots.len() {
        slots.resize(slot + 1, RtValue::Nil);
    }
    slots[slot] = value;
}

fn describe_exception(exception: &RtValue) -> (String, String) {
    match exception {
        RtValue::Exception(e) => (e.class_name.to_string(), e.message.clone()),
        other => ("RuntimeError".to_string(), other.to_string()),
    }
}
