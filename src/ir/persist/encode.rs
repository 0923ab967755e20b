//! file: src/ir/persist/encode.rs
//! description: scope-tree encoder with operand-frequency pooling.
//!
//! Encoding runs twice over the same walk: first a counting pass whose
//! scalar hooks are no-ops and which only tallies operand occurrences, then
//! the byte writer, which replaces pooled operands with pool references.
//! Both passes serialize operands through one inline routine, so the bytes
//! the counter keys on are exactly the bytes the writer would emit and pool
//! indices line up by construction.

use std::collections::HashMap;

use log::debug;

use crate::ir::err::IcError;
use crate::ir::instr::{Instr, Op};
use crate::ir::operand::{Label, Operand, TempVar, Variable};
use crate::ir::persist::{
    instr_tag, operand_tag, scope_tag, FLAG_DEAD, FLAG_NO_SIMPLIFY, MAGIC, POOL_THRESHOLD, VERSION,
};
use crate::ir::scope::{Scope, ScopeKind};
use std::cell::RefCell;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// Raw little-endian byte sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct ByteBuf {
    pub out: Vec<u8>,
}

impl ByteBuf {
    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn boolean(&mut self, v: bool) {
        self.out.push(if v { 1 } else { 0 });
    }

    fn str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.u32(bytes.len() as u32);
        self.out.extend_from_slice(bytes);
    }
}

// ---------------------------------------------------------------------------
// Encoder contract
// ---------------------------------------------------------------------------

/// Sink for one encode pass. The byte writer implements every hook; the
/// frequency analyzer leaves scalars and brackets as no-ops and only counts
/// operands.
pub trait IrEncoder {
    fn start_scope_header(&mut self, _scope: &Scope) {}
    fn end_scope_header(&mut self, _scope: &Scope) {}
    fn start_scope_instrs(&mut self, _scope: &Scope, _count: usize) {}
    fn end_scope_instrs(&mut self, _scope: &Scope) {}

    fn encode_bool(&mut self, _v: bool) {}
    fn encode_u8(&mut self, _v: u8) {}
    fn encode_u32(&mut self, _v: u32) {}
    fn encode_i64(&mut self, _v: i64) {}
    fn encode_f64(&mut self, _v: f64) {}
    fn encode_str(&mut self, _s: &str) {}
    fn encode_str_list(&mut self, _items: &[&str]) {}

    fn encode_operand(&mut self, scope: &Scope, operand: &Operand) -> Result<(), IcError>;
}

// ---------------------------------------------------------------------------
// Inline operand serialization (shared by both passes)
// ---------------------------------------------------------------------------

fn emit_variable(buf: &mut ByteBuf, var: &Variable) {
    match var {
        Variable::Local { name, depth, slot } => {
            buf.u8(operand_tag::LOCAL_VARIABLE);
            buf.str(name);
            buf.u32(*depth as u32);
            buf.u32(*slot as u32);
        }
        Variable::Temp(TempVar::Local { slot }) => {
            buf.u8(operand_tag::TEMP_LOCAL);
            buf.u32(*slot as u32);
        }
        Variable::Temp(TempVar::Float { slot }) => {
            buf.u8(operand_tag::TEMP_FLOAT);
            buf.u32(*slot as u32);
        }
        Variable::Temp(TempVar::Closure { depth, slot }) => {
            buf.u8(operand_tag::TEMP_CLOSURE);
            buf.u32(*depth as u32);
            buf.u32(*slot as u32);
        }
        Variable::Temp(TempVar::CurrentModule { slot }) => {
            buf.u8(operand_tag::TEMP_CURRENT_MODULE);
            buf.u32(*slot as u32);
        }
        Variable::Temp(TempVar::CurrentScope { slot }) => {
            buf.u8(operand_tag::TEMP_CURRENT_SCOPE);
            buf.u32(*slot as u32);
        }
    }
}

fn emit_label(buf: &mut ByteBuf, label: &Label) {
    buf.u8(operand_tag::LABEL);
    buf.str(&label.prefix);
    buf.u32(label.id);
}

pub(crate) fn emit_operand_inline(
    buf: &mut ByteBuf,
    scope: &Scope,
    operand: &Operand,
) -> Result<(), IcError> {
    match operand {
        Operand::Fixnum { value, .. } => {
            buf.u8(operand_tag::FIXNUM);
            buf.i64(*value);
        }
        Operand::Float { value, .. } => {
            buf.u8(operand_tag::FLOAT);
            buf.f64(*value);
        }
        Operand::Boolean { value, .. } => {
            buf.u8(operand_tag::BOOLEAN);
            buf.boolean(*value);
        }
        Operand::Str { value, .. } => {
            buf.u8(operand_tag::STR);
            buf.str(value);
        }
        Operand::Symbol { name, .. } => {
            buf.u8(operand_tag::SYMBOL);
            buf.str(name);
        }
        Operand::Regexp { pattern, flags, .. } => {
            buf.u8(operand_tag::REGEXP);
            buf.str(pattern);
            buf.boolean(flags.ignore_case);
            buf.boolean(flags.multiline);
            buf.boolean(flags.extended);
        }
        Operand::Array(items) => {
            buf.u8(operand_tag::ARRAY);
            buf.u32(items.len() as u32);
            for item in items {
                emit_operand_inline(buf, scope, item)?;
            }
        }
        Operand::Hash(pairs) => {
            buf.u8(operand_tag::HASH);
            buf.u32(pairs.len() as u32);
            for (k, v) in pairs {
                emit_operand_inline(buf, scope, k)?;
                emit_operand_inline(buf, scope, v)?;
            }
        }
        Operand::Range { begin, end, exclusive } => {
            buf.u8(operand_tag::RANGE);
            emit_operand_inline(buf, scope, begin)?;
            emit_operand_inline(buf, scope, end)?;
            buf.boolean(*exclusive);
        }
        Operand::CompoundString(parts) => {
            buf.u8(operand_tag::COMPOUND_STRING);
            buf.u32(parts.len() as u32);
            for part in parts {
                emit_operand_inline(buf, scope, part)?;
            }
        }
        Operand::SelfRef => buf.u8(operand_tag::SELF),
        Operand::Nil => buf.u8(operand_tag::NIL),
        Operand::UndefinedValue => buf.u8(operand_tag::UNDEFINED),
        Operand::UnexecutableNil => buf.u8(operand_tag::UNEXECUTABLE_NIL),
        Operand::Label(label) => emit_label(buf, label),
        Operand::Variable(var) => emit_variable(buf, var),
        Operand::MethAddr(name) => {
            buf.u8(operand_tag::METH_ADDR);
            buf.str(name);
        }
        Operand::MethodHandle { receiver, name } => {
            buf.u8(operand_tag::METHOD_HANDLE);
            emit_operand_inline(buf, scope, receiver)?;
            emit_operand_inline(buf, scope, name)?;
        }
        Operand::WrappedClosure { scope: closure, binding } => {
            let index = scope.nested_index(closure).ok_or_else(|| IcError::DetachedClosure {
                scope: scope.name().to_string(),
            })?;
            buf.u8(operand_tag::WRAPPED_CLOSURE);
            buf.u32(index as u32);
            emit_variable(buf, binding);
        }
    }
    Ok(())
}

/// Closure references are only meaningful relative to their owning scope,
/// so operands containing one never enter the pool.
fn poolable(operand: &Operand) -> bool {
    match operand {
        Operand::WrappedClosure { .. } => false,
        Operand::Array(items) | Operand::CompoundString(items) => items.iter().all(poolable),
        Operand::Hash(pairs) => pairs.iter().all(|(k, v)| poolable(k) && poolable(v)),
        Operand::Range { begin, end, .. } => poolable(begin) && poolable(end),
        Operand::MethodHandle { receiver, name } => poolable(receiver) && poolable(name),
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Pass 1: operand frequency analyzer (no output)
// ---------------------------------------------------------------------------

/// Counts operand occurrences keyed by their inline encoding; every other
/// hook is a no-op. Drives pool construction for the writer pass.
#[derive(Default)]
pub struct OperandCounter {
    counts: HashMap<Vec<u8>, usize>,
    order: Vec<Vec<u8>>,
}

impl OperandCounter {
    /// Pool entries in first-seen order: operands seen at least
    /// `POOL_THRESHOLD` times.
    pub fn pool_entries(&self) -> Vec<Vec<u8>> {
        self.order
            .iter()
            .filter(|bytes| self.counts[*bytes] >= POOL_THRESHOLD)
            .take(u16::MAX as usize)
            .cloned()
            .collect()
    }
}

impl IrEncoder for OperandCounter {
    fn encode_operand(&mut self, scope: &Scope, operand: &Operand) -> Result<(), IcError> {
        if !poolable(operand) {
            return Ok(());
        }
        let mut buf = ByteBuf::default();
        emit_operand_inline(&mut buf, scope, operand)?;
        let count = self.counts.entry(buf.out.clone()).or_insert(0);
        if *count == 0 {
            self.order.push(buf.out);
        }
        *count += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pass 2: byte writer
// ---------------------------------------------------------------------------

pub struct BinaryWriter {
    buf: ByteBuf,
    pool: HashMap<Vec<u8>, u16>,
}

impl BinaryWriter {
    fn new(pool_entries: &[Vec<u8>]) -> BinaryWriter {
        let mut buf = ByteBuf::default();
        buf.out.extend_from_slice(&MAGIC);
        buf.u32(VERSION);
        buf.u16(pool_entries.len() as u16);
        let mut pool = HashMap::new();
        for (index, entry) in pool_entries.iter().enumerate() {
            buf.out.extend_from_slice(entry);
            pool.insert(entry.clone(), index as u16);
        }
        BinaryWriter { buf, pool }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf.out
    }
}

impl IrEncoder for BinaryWriter {
    fn encode_bool(&mut self, v: bool) {
        self.buf.boolean(v);
    }

    fn encode_u8(&mut self, v: u8) {
        self.buf.u8(v);
    }

    fn encode_u32(&mut self, v: u32) {
        self.buf.u32(v);
    }

    fn encode_i64(&mut self, v: i64) {
        self.buf.i64(v);
    }

    fn encode_f64(&mut self, v: f64) {
        self.buf.f64(v);
    }

    fn encode_str(&mut self, s: &str) {
        self.buf.str(s);
    }

    fn encode_str_list(&mut self, items: &[&str]) {
        self.buf.u32(items.len() as u32);
        for item in items {
            self.buf.str(item);
        }
    }

    fn encode_operand(&mut self, scope: &Scope, operand: &Operand) -> Result<(), IcError> {
        let mut inline = ByteBuf::default();
        emit_operand_inline(&mut inline, scope, operand)?;
        if poolable(operand) {
            if let Some(&index) = self.pool.get(&inline.out) {
                self.buf.u8(operand_tag::POOL_REF);
                self.buf.u16(index);
                return Ok(());
            }
        }
        self.buf.out.extend_from_slice(&inline.out);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared walk
// ---------------------------------------------------------------------------

fn kind_tag(kind: ScopeKind) -> u8 {
    match kind {
        ScopeKind::Script => scope_tag::SCRIPT,
        ScopeKind::Module => scope_tag::MODULE,
        ScopeKind::Method => scope_tag::METHOD,
        ScopeKind::Closure => scope_tag::CLOSURE,
    }
}

pub(crate) fn emit_scope<E: IrEncoder + ?Sized>(
    enc: &mut E,
    scope_rc: &Rc<RefCell<Scope>>,
) -> Result<(), IcError> {
    let scope = scope_rc.borrow();

    enc.start_scope_header(&scope);
    enc.encode_u8(kind_tag(scope.kind()));
    enc.encode_str(scope.name());
    enc.encode_str(scope.file());
    enc.encode_u32(scope.line() as u32);
    let arity = scope.arity();
    enc.encode_u32(arity.required as u32);
    enc.encode_u32(arity.optional as u32);
    enc.encode_bool(arity.rest);
    let locals: Vec<&str> = scope.local_names().iter().map(|n| n.as_ref()).collect();
    enc.encode_str_list(&locals);
    for counter in scope.temp_counters() {
        enc.encode_u32(counter as u32);
    }
    enc.encode_u32(scope.next_label_id());
    enc.end_scope_header(&scope);

    enc.encode_u32(scope.nested_scopes().len() as u32);
    for nested in scope.nested_scopes() {
        emit_scope(enc, nested)?;
    }

    enc.start_scope_instrs(&scope, scope.instrs().len());
    enc.encode_u32(scope.instrs().len() as u32);
    for instr in scope.instrs() {
        emit_instr(enc, &scope, instr)?;
    }
    enc.end_scope_instrs(&scope);
    Ok(())
}

fn emit_optional_variable<E: IrEncoder + ?Sized>(
    enc: &mut E,
    scope: &Scope,
    var: &Option<Variable>,
) -> Result<(), IcError> {
    match var {
        Some(v) => {
            enc.encode_bool(true);
            enc.encode_operand(scope, &Operand::Variable(v.clone()))
        }
        None => {
            enc.encode_bool(false);
            Ok(())
        }
    }
}

fn emit_instr<E: IrEncoder + ?Sized>(
    enc: &mut E,
    scope: &Scope,
    instr: &Instr,
) -> Result<(), IcError> {
    let mut flags = 0u8;
    if instr.is_dead() {
        flags |= FLAG_DEAD;
    }
    if instr.no_simplify() {
        flags |= FLAG_NO_SIMPLIFY;
    }
    enc.encode_u8(flags);

    match &instr.op {
        Op::LineNum { line } => {
            enc.encode_u8(instr_tag::LINE_NUM);
            enc.encode_u32(*line as u32);
        }
        Op::Nop => enc.encode_u8(instr_tag::NOP),
        Op::Copy { dest, src } => {
            enc.encode_u8(instr_tag::COPY);
            enc.encode_operand(scope, &Operand::Variable(dest.clone()))?;
            enc.encode_operand(scope, src)?;
        }
        Op::Call { dest, meth, receiver, args, block } => {
            enc.encode_u8(instr_tag::CALL);
            emit_optional_variable(enc, scope, dest)?;
            enc.encode_operand(scope, meth)?;
            enc.encode_operand(scope, receiver)?;
            enc.encode_u32(args.len() as u32);
            for a in args {
                enc.encode_operand(scope, a)?;
            }
            match block {
                Some(b) => {
                    enc.encode_bool(true);
                    enc.encode_operand(scope, b)?;
                }
                None => enc.encode_bool(false),
            }
        }
        Op::Jump { target } => {
            enc.encode_u8(instr_tag::JUMP);
            enc.encode_operand(scope, &Operand::Label(target.clone()))?;
        }
        Op::BTrue { cond, target } => {
            enc.encode_u8(instr_tag::B_TRUE);
            enc.encode_operand(scope, cond)?;
            enc.encode_operand(scope, &Operand::Label(target.clone()))?;
        }
        Op::BFalse { cond, target } => {
            enc.encode_u8(instr_tag::B_FALSE);
            enc.encode_operand(scope, cond)?;
            enc.encode_operand(scope, &Operand::Label(target.clone()))?;
        }
        Op::LabelMark { label } => {
            enc.encode_u8(instr_tag::LABEL_MARK);
            enc.encode_operand(scope, &Operand::Label(label.clone()))?;
        }
        Op::Return { value } => {
            enc.encode_u8(instr_tag::RETURN);
            enc.encode_operand(scope, value)?;
        }
        Op::NonlocalReturn { value } => {
            enc.encode_u8(instr_tag::NONLOCAL_RETURN);
            enc.encode_operand(scope, value)?;
        }
        Op::ReceiveArg { dest, index } => {
            enc.encode_u8(instr_tag::RECEIVE_ARG);
            enc.encode_operand(scope, &Operand::Variable(dest.clone()))?;
            enc.encode_u32(*index as u32);
        }
        Op::ReceiveClosure { dest } => {
            enc.encode_u8(instr_tag::RECEIVE_CLOSURE);
            enc.encode_operand(scope, &Operand::Variable(dest.clone()))?;
        }
        Op::ReceiveException { dest } => {
            enc.encode_u8(instr_tag::RECEIVE_EXCEPTION);
            enc.encode_operand(scope, &Operand::Variable(dest.clone()))?;
        }
        Op::ExcRegionStart { rescue, ensure } => {
            enc.encode_u8(instr_tag::EXC_REGION_START);
            enc.encode_operand(scope, &Operand::Label(rescue.clone()))?;
            match ensure {
                Some(e) => {
                    enc.encode_bool(true);
                    enc.encode_operand(scope, &Operand::Label(e.clone()))?;
                }
                None => enc.encode_bool(false),
            }
        }
        Op::ExcRegionEnd => enc.encode_u8(instr_tag::EXC_REGION_END),
        Op::Raise { exception } => {
            enc.encode_u8(instr_tag::RAISE);
            enc.encode_operand(scope, exception)?;
        }
        Op::Yield { dest, args } => {
            enc.encode_u8(instr_tag::YIELD);
            emit_optional_variable(enc, scope, dest)?;
            enc.encode_u32(args.len() as u32);
            for a in args {
                enc.encode_operand(scope, a)?;
            }
        }
        Op::DefineMethod { name, body } => {
            let index = scope.nested_index(body).ok_or_else(|| IcError::DetachedClosure {
                scope: scope.name().to_string(),
            })?;
            enc.encode_u8(instr_tag::DEFINE_METHOD);
            enc.encode_str(name);
            enc.encode_u32(index as u32);
        }
    }
    Ok(())
}

/// Encodes a scope tree: a counting pass drives pool construction, then the
/// writer emits header, pool and stream.
pub fn encode_scope(scope: &Rc<RefCell<Scope>>) -> Result<Vec<u8>, IcError> {
    let mut counter = OperandCounter::default();
    emit_scope(&mut counter, scope)?;
    let pool_entries = counter.pool_entries();
    debug!(
        "encoding scope '{}': {} pooled operand(s)",
        scope.borrow().name(),
        pool_entries.len()
    );
    let mut writer = BinaryWriter::new(&pool_entries);
    emit_scope(&mut writer, scope)?;
    Ok(writer.into_bytes())
}
