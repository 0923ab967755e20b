mod common;

use std::rc::Rc;

use common::*;
use tanager_core::interp::{Interpreter, RtValue};
use tanager_core::ir::err::DecodeError;
use tanager_core::ir::instr::{Instr, Op};
use tanager_core::ir::operand::{Operand, RegexpFlags, TempVar, Variable};
use tanager_core::ir::persist::{decode_scope, encode_scope, MAGIC, VERSION};
use tanager_core::ir::scope::Arity;

fn pool_count(bytes: &[u8]) -> u16 {
    // magic (4) + version (4), then the pool entry count.
    u16::from_le_bytes([bytes[8], bytes[9]])
}

#[test]
fn label_references_decode_to_one_shared_instance() {
    // Two branches to the same label object plus the label site itself.
    let scope = script("labels");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        let target = s.new_label("L");
        let done = s.new_label("L");
        s.add_instr(recv_arg(t0.clone(), 0));
        s.add_instr(btrue(Operand::Variable(t0.clone()), target.clone()));
        s.add_instr(jump(target.clone()));
        s.add_instr(label_mark(target));
        s.add_instr(label_mark(done));
        s.add_instr(ret(Operand::Nil));
    }

    let bytes = encode_scope(&scope).expect("encode");
    let decoded = decode_scope(&bytes).expect("decode");
    let d = decoded.borrow();

    let mut seen = Vec::new();
    for instr in d.instrs() {
        match &instr.op {
            Op::BTrue { target, .. } | Op::Jump { target } => seen.push(target.clone()),
            _ => {}
        }
    }
    assert_eq!(seen.len(), 2);
    assert!(
        Rc::ptr_eq(&seen[0], &seen[1]),
        "equal label keys must decode to the identical instance"
    );

    // The label-site instruction shares it too.
    let site = d
        .instrs()
        .iter()
        .find_map(|i| match &i.op {
            Op::LabelMark { label } if label.prefix == seen[0].prefix && label.id == seen[0].id => {
                Some(label.clone())
            }
            _ => None,
        })
        .expect("label site");
    assert!(Rc::ptr_eq(&site, &seen[0]));
}

#[test]
fn full_scope_tree_round_trips() {
    let inner = closure("inner");
    {
        let mut c = inner.borrow_mut();
        let t0 = c.temp();
        c.add_instr(copy(t0.clone(), Operand::Variable(Variable::local("x", 1, 0))));
        c.add_instr(Instr::new(Op::NonlocalReturn { value: Operand::Variable(t0) }));
    }

    let scope = method("everything", Arity { required: 1, optional: 1, rest: true });
    {
        let mut s = scope.borrow_mut();
        let x = s.local("x");
        let y = s.local("y");
        let t0 = s.temp();
        let tf = s.alloc_temp(|slot| TempVar::Float { slot });
        let tc = s.alloc_temp(|slot| TempVar::Closure { depth: 0, slot });
        let tm = s.alloc_temp(|slot| TempVar::CurrentModule { slot });
        let ts = s.alloc_temp(|slot| TempVar::CurrentScope { slot });
        let t_arr = s.temp();
        let t_mh = s.temp();
        let t_wc = s.temp();
        let t_exc = s.temp();
        let t_pin = s.temp();
        let t_dead = s.temp();
        let binding = s.temp();
        let rescue = s.new_label("RESCUE");
        let ensure = s.new_label("ENSURE");
        s.add_nested(inner.clone());

        s.add_instr(Instr::new(Op::LineNum { line: 3 }));
        s.add_instr(recv_arg(x.clone(), 0));
        s.add_instr(Instr::new(Op::ReceiveClosure { dest: y.clone() }));
        s.add_instr(copy(t0.clone(), Operand::fixnum(-7)));
        s.add_instr(copy(tf, Operand::float(2.5)));
        s.add_instr(copy(tc, Operand::boolean(true)));
        s.add_instr(copy(tm, Operand::symbol("mod")));
        s.add_instr(copy(
            ts,
            Operand::regexp(
                "a+b",
                RegexpFlags { ignore_case: true, multiline: false, extended: true },
            ),
        ));
        s.add_instr(copy(
            t_arr,
            Operand::Array(vec![
                Operand::str("part"),
                Operand::Hash(vec![(Operand::symbol("k"), Operand::fixnum(1))]),
                Operand::Range {
                    begin: Box::new(Operand::fixnum(0)),
                    end: Box::new(Operand::fixnum(9)),
                    exclusive: true,
                },
                Operand::CompoundString(vec![Operand::str("n="), Operand::fixnum(1)]),
                Operand::UndefinedValue,
                Operand::SelfRef,
            ]),
        ));
        s.add_instr(copy(
            t_mh,
            Operand::MethodHandle {
                receiver: Box::new(Operand::SelfRef),
                name: Box::new(Operand::symbol("send_me")),
            },
        ));
        s.add_instr(Instr::new(Op::ExcRegionStart {
            rescue: rescue.clone(),
            ensure: Some(ensure.clone()),
        }));
        s.add_instr(copy(t_wc, Operand::WrappedClosure { scope: inner.clone(), binding }));
        s.add_instr(Instr::new(Op::ExcRegionEnd));
        s.add_instr(label_mark(rescue));
        s.add_instr(Instr::new(Op::ReceiveException { dest: t_exc }));
        s.add_instr(label_mark(ensure));
        s.add_instr(Instr::new(Op::Raise { exception: Operand::Nil }));

        let mut pinned = copy(t_pin, Operand::UnexecutableNil);
        pinned.set_no_simplify();
        s.add_instr(pinned);
        let mut dead = copy(t_dead, Operand::Nil);
        dead.mark_dead();
        s.add_instr(dead);
        s.add_instr(ret(Operand::Variable(t0)));
    }

    let bytes = encode_scope(&scope).expect("encode");
    let decoded = decode_scope(&bytes).expect("decode");

    let original = scope.borrow();
    let restored = decoded.borrow();
    assert_eq!(original.kind(), restored.kind());
    assert_eq!(original.name(), restored.name());
    assert_eq!(original.file(), restored.file());
    assert_eq!(original.line(), restored.line());
    assert_eq!(original.arity(), restored.arity());
    assert_eq!(original.local_names(), restored.local_names());
    assert_eq!(original.temp_counters(), restored.temp_counters());
    assert_eq!(original.next_label_id(), restored.next_label_id());
    assert_eq!(original.nested_scopes().len(), restored.nested_scopes().len());
    assert_eq!(original.instrs().len(), restored.instrs().len());

    // Instruction streams must match structurally; scope-referencing
    // instructions are compared by their rendering since the decoded tree is
    // a distinct allocation.
    for (a, b) in original.instrs().iter().zip(restored.instrs().iter()) {
        assert_eq!(format!("{}", a), format!("{}", b));
        assert_eq!(a.is_dead(), b.is_dead());
        assert_eq!(a.no_simplify(), b.no_simplify());
        let references_scope = matches!(
            a.op,
            Op::DefineMethod { .. }
        ) || a.operands().iter().any(|o| matches!(o, Operand::WrappedClosure { .. }));
        if !references_scope {
            assert_eq!(a, b);
        }
    }

    // Nested instruction stream survives too.
    let inner_original = inner.borrow();
    let inner_restored = restored.nested_scopes()[0].borrow();
    assert_eq!(inner_original.instrs().len(), inner_restored.instrs().len());
    for (a, b) in inner_original.instrs().iter().zip(inner_restored.instrs().iter()) {
        assert_eq!(a, b);
    }
}

#[test]
fn decoded_scope_rebuilds_the_same_cfg() {
    let scope = branch_diamond();
    let bytes = encode_scope(&scope).expect("encode");
    let decoded = decode_scope(&bytes).expect("decode");

    let original_blocks = scope.borrow_mut().build_cfg().expect("cfg").blocks().len();
    let decoded_blocks = decoded.borrow_mut().build_cfg().expect("cfg").blocks().len();
    assert_eq!(original_blocks, decoded_blocks);
}

#[test]
fn repeated_operands_are_pooled_and_still_interpret() {
    let shared = Operand::str("dup");
    let scope = script("pooled");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        let t1 = s.temp();
        let t2 = s.temp();
        s.add_instr(copy(t0.clone(), shared.clone()));
        s.add_instr(copy(t1.clone(), shared.clone()));
        s.add_instr(copy(
            t2.clone(),
            Operand::Array(vec![Operand::Variable(t0), Operand::Variable(t1)]),
        ));
        s.add_instr(ret(Operand::Variable(t2)));
    }

    let bytes = encode_scope(&scope).expect("encode");
    assert!(pool_count(&bytes) > 0, "the repeated string must enter the operand pool");

    let decoded = decode_scope(&bytes).expect("decode");
    let mut interp = Interpreter::with_core_runtime();
    let result = interp.execute(&decoded, RtValue::Nil, &[], None).expect("run");
    let RtValue::Array(items) = result else { panic!("expected array") };
    let items = items.borrow();
    assert_eq!(items[0], RtValue::str("dup"));
    // Pool references clone one operand, so the shared literal cache makes
    // both retrievals the identical object.
    assert!(items[0].same_object(&items[1]));
}

#[test]
fn pooling_does_not_change_decoded_structure() {
    let scope = script("pooled");
    {
        let mut s = scope.borrow_mut();
        let t0 = s.temp();
        s.add_instr(copy(t0.clone(), Operand::symbol("dup")));
        s.add_instr(copy(t0.clone(), Operand::symbol("dup")));
        s.add_instr(copy(t0.clone(), Operand::symbol("once")));
        s.add_instr(ret(Operand::Variable(t0)));
    }
    let bytes = encode_scope(&scope).expect("encode");
    // Two pooled entries: the t0 destination variable (written three times,
    // read once) and the repeated :dup symbol.
    assert_eq!(pool_count(&bytes), 2);
    let decoded = decode_scope(&bytes).expect("decode");
    let original = scope.borrow();
    let restored = decoded.borrow();
    for (a, b) in original.instrs().iter().zip(restored.instrs().iter()) {
        assert_eq!(a, b);
    }
}

#[test]
fn truncated_stream_is_a_fatal_decode_error() {
    let scope = straight_line_add();
    let bytes = encode_scope(&scope).expect("encode");
    for cut in [0, 3, 8, 10, bytes.len() / 2, bytes.len() - 1] {
        let err = decode_scope(&bytes[..cut]).err().expect("must fail");
        assert!(
            matches!(err, DecodeError::Truncated { .. } | DecodeError::BadMagic { .. }),
            "cut at {}: got {:?}",
            cut,
            err
        );
    }
}

#[test]
fn bad_magic_and_version_are_rejected() {
    let scope = straight_line_add();
    let mut bytes = encode_scope(&scope).expect("encode");

    let mut wrong_magic = bytes.clone();
    wrong_magic[0] = b'X';
    assert!(matches!(
        decode_scope(&wrong_magic).err().expect("must fail"),
        DecodeError::BadMagic { expected } if expected == MAGIC
    ));

    bytes[4..8].copy_from_slice(&(VERSION + 1).to_le_bytes());
    assert!(matches!(
        decode_scope(&bytes).err().expect("must fail"),
        DecodeError::UnsupportedVersion { found, .. } if found == VERSION + 1
    ));
}

#[test]
fn unknown_tags_are_rejected() {
    // magic + version + empty pool + a bogus scope-kind tag.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.push(0xEE);
    assert!(matches!(
        decode_scope(&bytes).err().expect("must fail"),
        DecodeError::UnknownTag { what: "scope kind", tag: 0xEE, .. }
    ));
}

#[test]
fn streams_survive_a_file_round_trip() {
    use std::io::{Read, Write};

    let scope = branch_diamond();
    let bytes = encode_scope(&scope).expect("encode");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pick.tngr");
    std::fs::File::create(&path).expect("create").write_all(&bytes).expect("write");

    let mut read_back = Vec::new();
    std::fs::File::open(&path).expect("open").read_to_end(&mut read_back).expect("read");
    assert_eq!(bytes, read_back);

    let decoded = decode_scope(&read_back).expect("decode");
    let mut interp = Interpreter::with_core_runtime();
    let result = interp.execute(&decoded, RtValue::Nil, &[RtValue::Bool(true)], None).expect("run");
    assert_eq!(result, RtValue::Fixnum(1));
}
