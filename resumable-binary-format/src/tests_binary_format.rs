#![allow(non_snake_case)]

use super::*;
use std::fmt::Debug;

use resumable_structure::classes::access;

enum CheckRes<T> {
    Failed,
    OkWith(T),
}
use self::CheckRes::*;

fn check<'a, T, F>(parse: F, input: &'a [u8], res: CheckRes<T>)
    where T: Debug + PartialEq,
          F: Fn(Inp<'a>) -> PResult<'a, T>,
{
    let mut err = None;
    match parse(input) {
        Ok((&[], is)) => {
            if let OkWith(should) = res {
                if is != should {
                    err = Some(format!("Should have parsed with {:?}, but is {:?}", should, is));
                }
            } else {
                err = Some(format!("Should have failed, but parsed with {:?}", is));
            }
        }
        Ok((x, is)) => {
            err = Some(format!("Accepted without parsing all input. Remaining: {:?}, result: {:?}", x, is));
        }
        Err(x) => {
            if let OkWith(should) = res {
                err = Some(format!("Should have parsed with {:?}, but failed with {:?}", should, x));
            }
        }
    }
    if let Some(err) = err {
        panic!("\n\nERROR: {}\nInput:\n{:?}\n\n", err, input);
    }
}

fn encoded(instr: &Instr) -> Vec<u8> {
    let mut e = emit::Emitter::default();
    e.instr(instr);
    e.into_bytes()
}

#[test]
fn test_parse_u32() {
    let parse = |i| parse_uN(i, 32);
    check(&parse, &[0x00], OkWith(0x00));
    check(&parse, &[0x7f], OkWith(0x7f));
    check(&parse, &[0xff], Failed);
    check(&parse, &[0xff, 0x01], OkWith(0xff));
    check(&parse, &[0x80, 0x80, 0x80, 0x80, 0x0f], OkWith(0xf000_0000));
    check(&parse, &[0xff, 0xff, 0xff, 0xff, 0x0f], OkWith(0xffff_ffff));
    // unused bits of the last byte must be zero
    check(&parse, &[0xff, 0xff, 0xff, 0xff, 0x1f], Failed);
    check(&parse, &[0x80, 0x80, 0x80, 0x80, 0x80, 0x00], Failed);
}

#[test]
fn test_parse_u16() {
    check(parse_u16, &[0xff, 0xff, 0x03], OkWith(0xffff));
    check(parse_u16, &[0xff, 0xff, 0x07], Failed);
}

#[test]
fn test_parse_s32() {
    check(parse_s32, &[0x00], OkWith(0));
    check(parse_s32, &[0x7f], OkWith(-1));
    check(parse_s32, &[0x3f], OkWith(63));
    check(parse_s32, &[0xc0, 0x00], OkWith(64));
    check(parse_s32, &[0x80, 0x7f], OkWith(-128));
    check(parse_s32, &[0x80, 0x80, 0x80, 0x80, 0x78], OkWith(i32::MIN));
    check(parse_s32, &[0xff, 0xff, 0xff, 0xff, 0x07], OkWith(i32::MAX));
    check(parse_s32, &[0xff, 0xff, 0xff, 0xff, 0x0f], Failed);
}

#[test]
fn test_parse_name() {
    check(parse_name, &[0x00], OkWith(String::new()));
    check(parse_name, &[0x03, b'a', b'/', b'B'], OkWith("a/B".to_string()));
    check(parse_name, &[0x02, 0xff, 0xfe], Failed);
    check(parse_name, &[0x04, b'a'], Failed);
}

#[test]
fn test_parse_instr() {
    use crate::opcodes::*;

    check(parse_instr, &[NOP], OkWith(Instr::Nop));
    check(parse_instr, &[ICONST_M1], OkWith(Instr::IConst(-1)));
    check(parse_instr, &[ICONST_5], OkWith(Instr::IConst(5)));
    check(parse_instr, &[ICONST_W, 0xc0, 0x00], OkWith(Instr::IConst(64)));
    check(parse_instr, &[BIPUSH, 0xfe], OkWith(Instr::BiPush(-2)));
    check(parse_instr, &[ILOAD, 0x03], OkWith(Instr::ILoad(3)));
    check(parse_instr, &[IINC, 0x01, 0x7f], OkWith(Instr::IInc(1, -1)));
    check(parse_instr, &[GOTO, 0x07], OkWith(Instr::Goto(Label(7))));
    check(parse_instr, &[LABEL, 0x07], OkWith(Instr::Label(Label(7))));
    check(parse_instr, &[NEWARRAY, 10], OkWith(Instr::NewArray(ArrayKind::Int)));
    check(parse_instr, &[NEWARRAY, 3], Failed);
    check(parse_instr, &[LDC, TAG_STRING, 0x02, b'h', b'i'], OkWith(Instr::Ldc(Constant::String("hi".into()))));
    check(parse_instr, &[LDC, 0x09, 0x00], Failed);
    check(
        parse_instr,
        &[INVOKESTATIC, 0x01, b'A', 0x01, b'f', 0x03, b'(', b')', b'V'],
        OkWith(Instr::InvokeStatic(MethodRef::new("A", "f", "()V"))),
    );
    check(
        parse_instr,
        &[TABLESWITCH, 0x00, 0x01, 0x09, 0x02, 0x01, 0x02],
        OkWith(Instr::TableSwitch { low: 0, high: 1, default: Label(9), targets: vec![Label(1), Label(2)] }),
    );
    // target count has to match the key range
    check(parse_instr, &[TABLESWITCH, 0x00, 0x02, 0x09, 0x02, 0x01, 0x02], Failed);
    check(parse_instr, &[0xff], Failed);
}

#[test]
fn constants_use_short_forms() {
    use crate::opcodes::*;

    assert_eq!(encoded(&Instr::IConst(3)), vec![ICONST_M1 + 4]);
    assert_eq!(encoded(&Instr::IConst(100)), vec![ICONST_W, 0xe4, 0x00]);
    assert_eq!(encoded(&Instr::LConst(1)), vec![LCONST_1]);
    assert_eq!(encoded(&Instr::FConst(2.0)), vec![FCONST_2]);
    // negative zero is not the short form
    assert_eq!(encoded(&Instr::FConst(-0.0))[0], FCONST_W);
    assert_eq!(encoded(&Instr::DConst(0.0)), vec![DCONST_0]);
}

fn sample_class() -> Class {
    Class {
        access: access::PUBLIC,
        name: "app/Counter".to_string(),
        super_name: Some("java/lang/Object".to_string()),
        interfaces: vec!["app/Continuable".to_string()],
        methods: vec![Method {
            access: access::PUBLIC,
            name: "execute".to_string(),
            descriptor: "()V".to_string(),
            max_locals: 3,
            code: Code {
                instrs: vec![
                    Instr::IConst(5),
                    Instr::IStore(1),
                    Instr::Label(Label(0)),
                    Instr::ILoad(1),
                    Instr::IfLe(Label(1)),
                    Instr::ALoad(0),
                    Instr::InvokeVirtual(MethodRef::new("app/Counter", "pause", "()V")),
                    Instr::IInc(1, -1),
                    Instr::Ldc(Constant::Double(2.5)),
                    Instr::DStore(1),
                    Instr::Goto(Label(0)),
                    Instr::Label(Label(1)),
                    Instr::LookupSwitch { default: Label(2), pairs: vec![(-4, Label(0)), (100_000, Label(1))] },
                    Instr::Label(Label(2)),
                    Instr::Return,
                ],
                try_catch: vec![TryCatchBlock {
                    start: Label(0),
                    end: Label(1),
                    handler: Label(2),
                    catch_type: Some("java/lang/Exception".to_string()),
                }],
            },
        }],
    }
}

#[test]
fn class_round_trip() {
    let class = sample_class();
    let bytes = encode_class(&class);
    assert_eq!(&bytes[..4], MAGIC);
    assert_eq!(decode_class(&bytes), Ok(class.clone()));
    // canonical encoding is a fixpoint
    assert_eq!(encode_class(&decode_class(&bytes).unwrap()), bytes);
}

#[test]
fn decode_errors_carry_offset_and_context() {
    let bytes = encode_class(&sample_class());

    let err = decode_class(&bytes[..bytes.len() - 3]).unwrap_err();
    assert!(err.offset <= bytes.len());
    assert!(err.contexts.contains(&"method"), "{:?}", err);

    let mut bad_magic = bytes.clone();
    bad_magic[1] = b'x';
    let err = decode_class(&bad_magic).unwrap_err();
    assert_eq!(err.offset, 0);
    assert_eq!(err.contexts, vec!["magic"]);

    let mut trailing = bytes;
    trailing.push(0x00);
    assert!(decode_class(&trailing).is_err());
}

#[test]
fn non_canonical_integers_decode() {
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(VERSION);
    // access 0 written with a redundant continuation byte
    bytes.extend_from_slice(&[0x80, 0x00]);
    bytes.extend_from_slice(&[0x01, b'A']);
    bytes.extend_from_slice(&[0x00, 0x00, 0x00]);
    let class = decode_class(&bytes).unwrap();
    assert_eq!(class.name, "A");
    assert_ne!(encode_class(&class), bytes);
}
