//! file: src/ir/persist/decode.rs
//! description: scope-tree decoder, the exact dual of the encoder.
//!
//! A decode session owns a context holding the operand pool and the label
//! dedup map: two encoded references to the same `(prefix, id)` come back as
//! one shared `Rc<Label>` instance. That identity is load-bearing; control
//! flow resolves targets by the shared instance, not by a fresh equal copy.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ir::err::DecodeError;
use crate::ir::instr::{Instr, Op};
use crate::ir::operand::{Label, Operand, RegexpFlags, TempVar, Variable};
use crate::ir::persist::{
    instr_tag, operand_tag, scope_tag, FLAG_DEAD, FLAG_NO_SIMPLIFY, MAGIC, VERSION,
};
use crate::ir::scope::{Arity, Scope, ScopeKind, TEMP_FLAVORS};

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::Truncated { offset: self.pos, needed: n });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }

    fn boolean(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    fn str_list(&mut self) -> Result<Vec<String>, DecodeError> {
        let len = self.u32()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.str()?);
        }
        Ok(out)
    }
}

/// Per-session decode state: the operand pool and the label dedup map.
#[derive(Default)]
struct DecodeContext {
    pool: Vec<Operand>,
    labels: HashMap<String, Rc<Label>>,
}

impl DecodeContext {
    fn label(&mut self, prefix: String, id: u32) -> Rc<Label> {
        let key = format!("{}_{}", prefix, id);
        if let Some(existing) = self.labels.get(&key) {
            return existing.clone();
        }
        let fresh = Label::new(prefix, id);
        self.labels.insert(key, fresh.clone());
        fresh
    }
}

fn read_variable_tagged(
    r: &mut Reader<'_>,
    tag: u8,
    offset: usize,
) -> Result<Variable, DecodeError> {
    match tag {
        operand_tag::LOCAL_VARIABLE => {
            let name = r.str()?;
            let depth = r.u32()? as usize;
            let slot = r.u32()? as usize;
            Ok(Variable::local(name, depth, slot))
        }
        operand_tag::TEMP_LOCAL => Ok(Variable::Temp(TempVar::Local { slot: r.u32()? as usize })),
        operand_tag::TEMP_FLOAT => Ok(Variable::Temp(TempVar::Float { slot: r.u32()? as usize })),
        operand_tag::TEMP_CLOSURE => {
            let depth = r.u32()? as usize;
            let slot = r.u32()? as usize;
            Ok(Variable::Temp(TempVar::Closure { depth, slot }))
        }
        operand_tag::TEMP_CURRENT_MODULE => {
            Ok(Variable::Temp(TempVar::CurrentModule { slot: r.u32()? as usize }))
        }
        operand_tag::TEMP_CURRENT_SCOPE => {
            Ok(Variable::Temp(TempVar::CurrentScope { slot: r.u32()? as usize }))
        }
        tag => Err(DecodeError::UnknownTag { what: "variable", tag, offset }),
    }
}

fn read_variable(r: &mut Reader<'_>) -> Result<Variable, DecodeError> {
    let offset = r.pos;
    let tag = r.u8()?;
    read_variable_tagged(r, tag, offset)
}

fn read_operand(
    r: &mut Reader<'_>,
    ctx: &mut DecodeContext,
    nested: &[Rc<RefCell<Scope>>],
) -> Result<Operand, DecodeError> {
    let offset = r.pos;
    let tag = r.u8()?;
    match tag {
        operand_tag::FIXNUM => Ok(Operand::fixnum(r.i64()?)),
        operand_tag::FLOAT => Ok(Operand::float(r.f64()?)),
        operand_tag::BOOLEAN => Ok(Operand::boolean(r.boolean()?)),
        operand_tag::STR => Ok(Operand::str(r.str()?)),
        operand_tag::SYMBOL => Ok(Operand::symbol(r.str()?)),
        operand_tag::REGEXP => {
            let pattern = r.str()?;
            let flags = RegexpFlags {
                ignore_case: r.boolean()?,
                multiline: r.boolean()?,
                extended: r.boolean()?,
            };
            Ok(Operand::regexp(pattern, flags))
        }
        operand_tag::ARRAY => {
            let len = r.u32()? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(read_operand(r, ctx, nested)?);
            }
            Ok(Operand::Array(items))
        }
        operand_tag::HASH => {
            let len = r.u32()? as usize;
            let mut pairs = Vec::with_capacity(len);
            for _ in 0..len {
                let k = read_operand(r, ctx, nested)?;
                let v = read_operand(r, ctx, nested)?;
                pairs.push((k, v));
            }
            Ok(Operand::Hash(pairs))
        }
        operand_tag::RANGE => {
            let begin = Box::new(read_operand(r, ctx, nested)?);
            let end = Box::new(read_operand(r, ctx, nested)?);
            let exclusive = r.boolean()?;
            Ok(Operand::Range { begin, end, exclusive })
        }
        operand_tag::COMPOUND_STRING => {
            let len = r.u32()? as usize;
            let mut parts = Vec::with_capacity(len);
            for _ in 0..len {
                parts.push(read_operand(r, ctx, nested)?);
            }
            Ok(Operand::CompoundString(parts))
        }
        operand_tag::SELF => Ok(Operand::SelfRef),
        operand_tag::NIL => Ok(Operand::Nil),
        operand_tag::UNDEFINED => Ok(Operand::UndefinedValue),
        operand_tag::UNEXECUTABLE_NIL => Ok(Operand::UnexecutableNil),
        operand_tag::LABEL => {
            let prefix = r.str()?;
            let id = r.u32()?;
            Ok(Operand::Label(ctx.label(prefix, id)))
        }
        operand_tag::METH_ADDR => Ok(Operand::meth_addr(r.str()?)),
        operand_tag::METHOD_HANDLE => {
            let receiver = Box::new(read_operand(r, ctx, nested)?);
            let name = Box::new(read_operand(r, ctx, nested)?);
            Ok(Operand::MethodHandle { receiver, name })
        }
        operand_tag::WRAPPED_CLOSURE => {
            let index = r.u32()? as usize;
            let binding = read_variable(r)?;
            let scope = nested.get(index).cloned().ok_or(DecodeError::IndexOutOfRange {
                what: "nested scope",
                index,
                len: nested.len(),
            })?;
            Ok(Operand::WrappedClosure { scope, binding })
        }
        operand_tag::POOL_REF => {
            let index = r.u16()? as usize;
            ctx.pool.get(index).cloned().ok_or(DecodeError::IndexOutOfRange {
                what: "operand pool",
                index,
                len: ctx.pool.len(),
            })
        }
        tag if tag >= operand_tag::LOCAL_VARIABLE && tag <= operand_tag::TEMP_CURRENT_SCOPE => {
            Ok(Operand::Variable(read_variable_tagged(r, tag, offset)?))
        }
        tag => Err(DecodeError::UnknownTag { what: "operand", tag, offset }),
    }
}

fn expect_variable(
    r: &mut Reader<'_>,
    ctx: &mut DecodeContext,
    nested: &[Rc<RefCell<Scope>>],
) -> Result<Variable, DecodeError> {
    let offset = r.pos;
    match read_operand(r, ctx, nested)? {
        Operand::Variable(v) => Ok(v),
        _ => Err(DecodeError::UnexpectedOperand { expected: "variable", offset }),
    }
}

fn expect_label(
    r: &mut Reader<'_>,
    ctx: &mut DecodeContext,
    nested: &[Rc<RefCell<Scope>>],
) -> Result<Rc<Label>, DecodeError> {
    let offset = r.pos;
    match read_operand(r, ctx, nested)? {
        Operand::Label(l) => Ok(l),
        _ => Err(DecodeError::UnexpectedOperand { expected: "label", offset }),
    }
}

fn read_instr(
    r: &mut Reader<'_>,
    ctx: &mut DecodeContext,
    nested: &[Rc<RefCell<Scope>>],
) -> Result<Instr, DecodeError> {
    let flags = r.u8()?;
    let offset = r.pos;
    let tag = r.u8()?;
    let op = match tag {
        instr_tag::LINE_NUM => Op::LineNum { line: r.u32()? as usize },
        instr_tag::NOP => Op::Nop,
        instr_tag::COPY => {
            let dest = expect_variable(r, ctx, nested)?;
            let src = read_operand(r, ctx, nested)?;
            Op::Copy { dest, src }
        }
        instr_tag::CALL => {
            let dest = if r.boolean()? { Some(expect_variable(r, ctx, nested)?) } else { None };
            let meth = read_operand(r, ctx, nested)?;
            let receiver = read_operand(r, ctx, nested)?;
            let argc = r.u32()? as usize;
            let mut args = Vec::with_capacity(argc);
            for _ in 0..argc {
                args.push(read_operand(r, ctx, nested)?);
            }
            let block =
                if r.boolean()? { Some(read_operand(r, ctx, nested)?) } else { None };
            Op::Call { dest, meth, receiver, args, block }
        }
        instr_tag::JUMP => Op::Jump { target: expect_label(r, ctx, nested)? },
        instr_tag::B_TRUE => {
            let cond = read_operand(r, ctx, nested)?;
            let target = expect_label(r, ctx, nested)?;
            Op::BTrue { cond, target }
        }
        instr_tag::B_FALSE => {
            let cond = read_operand(r, ctx, nested)?;
            let target = expect_label(r, ctx, nested)?;
            Op::BFalse { cond, target }
        }
        instr_tag::LABEL_MARK => Op::LabelMark { label: expect_label(r, ctx, nested)? },
        instr_tag::RETURN => Op::Return { value: read_operand(r, ctx, nested)? },
        instr_tag::NONLOCAL_RETURN => {
            Op::NonlocalReturn { value: read_operand(r, ctx, nested)? }
        }
        instr_tag::RECEIVE_ARG => {
            let dest = expect_variable(r, ctx, nested)?;
            let index = r.u32()? as usize;
            Op::ReceiveArg { dest, index }
        }
        instr_tag::RECEIVE_CLOSURE => Op::ReceiveClosure { dest: expect_variable(r, ctx, nested)? },
        instr_tag::RECEIVE_EXCEPTION => {
            Op::ReceiveException { dest: expect_variable(r, ctx, nested)? }
        }
        instr_tag::EXC_REGION_START => {
            let rescue = expect_label(r, ctx, nested)?;
            let ensure = if r.boolean()? { Some(expect_label(r, ctx, nested)?) } else { None };
            Op::ExcRegionStart { rescue, ensure }
        }
        instr_tag::EXC_REGION_END => Op::ExcRegionEnd,
        instr_tag::RAISE => Op::Raise { exception: read_operand(r, ctx, nested)? },
        instr_tag::YIELD => {
            let dest = if r.boolean()? { Some(expect_variable(r, ctx, nested)?) } else { None };
            let argc = r.u32()? as usize;
            let mut args = Vec::with_capacity(argc);
            for _ in 0..argc {
                args.push(read_operand(r, ctx, nested)?);
            }
            Op::Yield { dest, args }
        }
        instr_tag::DEFINE_METHOD => {
            let name = crate::interp::runtime::intern(&r.str()?);
            let index = r.u32()? as usize;
            let body = nested.get(index).cloned().ok_or(DecodeError::IndexOutOfRange {
                what: "nested scope",
                index,
                len: nested.len(),
            })?;
            Op::DefineMethod { name, body }
        }
        tag => return Err(DecodeError::UnknownTag { what: "instruction", tag, offset }),
    };

    let mut instr = Instr::new(op);
    if flags & FLAG_DEAD != 0 {
        instr.mark_dead();
    }
    if flags & FLAG_NO_SIMPLIFY != 0 {
        instr.set_no_simplify();
    }
    Ok(instr)
}

fn read_scope(
    r: &mut Reader<'_>,
    ctx: &mut DecodeContext,
) -> Result<Rc<RefCell<Scope>>, DecodeError> {
    let offset = r.pos;
    let kind = match r.u8()? {
        scope_tag::SCRIPT => ScopeKind::Script,
        scope_tag::MODULE => ScopeKind::Module,
        scope_tag::METHOD => ScopeKind::Method,
        scope_tag::CLOSURE => ScopeKind::Closure,
        tag => return Err(DecodeError::UnknownTag { what: "scope kind", tag, offset }),
    };
    let name = r.str()?;
    let file = r.str()?;
    let line = r.u32()? as usize;
    let arity = Arity {
        required: r.u32()? as usize,
        optional: r.u32()? as usize,
        rest: r.boolean()?,
    };
    let locals = r.str_list()?;
    let mut temp_counters = [0usize; TEMP_FLAVORS];
    for counter in temp_counters.iter_mut() {
        *counter = r.u32()? as usize;
    }
    let next_label_id = r.u32()?;

    let scope = Rc::new(RefCell::new(Scope::restore(
        kind,
        name,
        file,
        line,
        arity,
        locals,
        temp_counters,
        next_label_id,
    )));

    let nested_count = r.u32()? as usize;
    for _ in 0..nested_count {
        let child = read_scope(r, ctx)?;
        scope.borrow_mut().add_nested(child);
    }

    let instr_count = r.u32()? as usize;
    {
        let nested: Vec<Rc<RefCell<Scope>>> = scope.borrow().nested_scopes().to_vec();
        let mut s = scope.borrow_mut();
        for _ in 0..instr_count {
            let instr = read_instr(r, ctx, &nested)?;
            s.add_instr(instr);
        }
    }
    Ok(scope)
}

/// Decodes one scope tree from `bytes`. All errors are fatal; no partial
/// scope is returned.
pub fn decode_scope(bytes: &[u8]) -> Result<Rc<RefCell<Scope>>, DecodeError> {
    let mut r = Reader::new(bytes);
    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic { expected: MAGIC });
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion { found: version, supported: VERSION });
    }

    let mut ctx = DecodeContext::default();
    let pool_len = r.u16()? as usize;
    for _ in 0..pool_len {
        // Pool entries are scope-independent by construction, so no nested
        // list is in play here.
        let operand = read_operand(&mut r, &mut ctx, &[])?;
        ctx.pool.push(operand);
    }

    read_scope(&mut r, &mut ctx)
}
