//! file: src/ir/persist/mod.rs
//! description: binary persistence of IR scope trees.
//!
//! Stream layout (little-endian):
//! - 4 bytes magic `TNGR`, u32 format version
//! - u16 operand-pool entry count, then each pooled operand's inline encoding
//! - the root scope, recursively:
//!   `[header][nested count][nested scope...]*[instr count][instr...]*`
//!   where header is kind, name, file, line, arity, locals, temporary
//!   counters and the label counter; each instruction is a flag byte, an
//!   operation tag and its fields; each operand is a tag plus fields, or a
//!   pool reference.
//!
//! The version word covers the whole format including the pool section; the
//! tag tables below are part of the format, so reordering or inserting tags
//! is a breaking change that must bump `VERSION`.

pub mod decode;
pub mod encode;

pub use decode::decode_scope;
pub use encode::encode_scope;

pub const MAGIC: [u8; 4] = *b"TNGR";
pub const VERSION: u32 = 1;

/// Operands occurring at least this often across one encode pass go to the
/// pool.
pub const POOL_THRESHOLD: usize = 2;

pub(crate) mod operand_tag {
    pub const FIXNUM: u8 = 0x01;
    pub const FLOAT: u8 = 0x02;
    pub const BOOLEAN: u8 = 0x03;
    pub const STR: u8 = 0x04;
    pub const SYMBOL: u8 = 0x05;
    pub const REGEXP: u8 = 0x06;
    pub const ARRAY: u8 = 0x07;
    pub const HASH: u8 = 0x08;
    pub const RANGE: u8 = 0x09;
    pub const COMPOUND_STRING: u8 = 0x0A;
    pub const SELF: u8 = 0x0B;
    pub const NIL: u8 = 0x0C;
    pub const UNDEFINED: u8 = 0x0D;
    pub const UNEXECUTABLE_NIL: u8 = 0x0E;
    pub const LABEL: u8 = 0x0F;
    pub const LOCAL_VARIABLE: u8 = 0x10;
    pub const TEMP_LOCAL: u8 = 0x11;
    pub const TEMP_FLOAT: u8 = 0x12;
    pub const TEMP_CLOSURE: u8 = 0x13;
    pub const TEMP_CURRENT_MODULE: u8 = 0x14;
    pub const TEMP_CURRENT_SCOPE: u8 = 0x15;
    pub const METH_ADDR: u8 = 0x16;
    pub const METHOD_HANDLE: u8 = 0x17;
    pub const WRAPPED_CLOSURE: u8 = 0x18;
    pub const POOL_REF: u8 = 0xFF;
}

pub(crate) mod instr_tag {
    pub const LINE_NUM: u8 = 0x01;
    pub const NOP: u8 = 0x02;
    pub const COPY: u8 = 0x03;
    pub const CALL: u8 = 0x04;
    pub const JUMP: u8 = 0x05;
    pub const B_TRUE: u8 = 0x06;
    pub const B_FALSE: u8 = 0x07;
    pub const LABEL_MARK: u8 = 0x08;
    pub const RETURN: u8 = 0x09;
    pub const NONLOCAL_RETURN: u8 = 0x0A;
    pub const RECEIVE_ARG: u8 = 0x0B;
    pub const RECEIVE_CLOSURE: u8 = 0x0C;
    pub const RECEIVE_EXCEPTION: u8 = 0x0D;
    pub const EXC_REGION_START: u8 = 0x0E;
    pub const EXC_REGION_END: u8 = 0x0F;
    pub const RAISE: u8 = 0x10;
    pub const YIELD: u8 = 0x11;
    pub const DEFINE_METHOD: u8 = 0x12;
}

pub(crate) mod scope_tag {
    pub const SCRIPT: u8 = 0x00;
    pub const MODULE: u8 = 0x01;
    pub const METHOD: u8 = 0x02;
    pub const CLOSURE: u8 = 0x03;
}

// Instruction flag bits.
pub(crate) const FLAG_DEAD: u8 = 0b0000_0001;
pub(crate) const FLAG_NO_SIMPLIFY: u8 = 0b0000_0010;
