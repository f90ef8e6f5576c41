use super::*;

use resumable_analysis::{analyze_metrics, analyze_shape};
use resumable_structure::classes::{access, TryCatchBlock};
use resumable_structure::contract::*;

const CLASS: &str = "app/Flow";

fn method(instrs: Vec<Instr>) -> Method {
    Method {
        access: access::PUBLIC,
        name: "execute".to_string(),
        descriptor: "()V".to_string(),
        max_locals: 1,
        code: Code { instrs, try_catch: vec![] },
    }
}

fn pause() -> Instr {
    Instr::InvokeVirtual(MethodRef::new(CLASS, "pause", "()V"))
}

fn rewrite_with(m: &Method, config: &InstrumentConfig) -> RResult<Method> {
    let metrics = analyze_metrics(CLASS, m, config).unwrap();
    let shape = analyze_shape(CLASS, m, config, &metrics).unwrap();
    rewrite_method(CLASS, m, config, &metrics, &shape)
}

fn rewrite(m: &Method) -> RResult<Method> {
    rewrite_with(m, &InstrumentConfig::default())
}

fn contains_run(haystack: &[Instr], needle: &[Instr]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn counter() -> Method {
    method(vec![
        Instr::IConst(5),
        Instr::IStore(1),
        Instr::ILoad(1),
        Instr::ALoad(0),
        pause(),
        Instr::IInc(1, 1),
        Instr::Pop,
        Instr::Return,
    ])
}

#[test]
fn small_ints_use_short_forms() {
    assert_eq!(push_int(-1), Instr::IConst(-1));
    assert_eq!(push_int(5), Instr::IConst(5));
    assert_eq!(push_int(6), Instr::BiPush(6));
    assert_eq!(push_int(-129), Instr::SiPush(-129));
    assert_eq!(push_int(40_000), Instr::Ldc(Constant::Int(40_000)));
}

#[test]
fn prologue_dispatches_on_pending_label() {
    let out = rewrite(&counter()).unwrap();
    let ctx = 2;
    assert_eq!(out.max_locals, 7);
    assert_eq!(&out.code.instrs[..7], &[
        Instr::ALoad(0),
        Instr::InvokeStatic(CREATE_OR_RESET_CONTEXT.to_ref()),
        Instr::AStore(ctx),
        Instr::ALoad(ctx),
        Instr::InvokeVirtual(GET_LABEL.to_ref()),
        Instr::TableSwitch { low: 0, high: 0, default: Label(0), targets: vec![Label(1)] },
        Instr::Label(Label(0)),
    ][..]);
}

#[test]
fn stores_are_mirrored() {
    let out = rewrite(&counter()).unwrap().code.instrs;
    assert!(contains_run(&out, &[
        Instr::IStore(1),
        Instr::ALoad(2),
        Instr::InvokeVirtual(GET_LOCAL_VARS.to_ref()),
        Instr::IConst(1),
        Instr::ILoad(1),
        Instr::InvokeVirtual(STORE_INT.to_ref()),
    ]));
    assert!(contains_run(&out, &[
        Instr::IInc(1, 1),
        Instr::ALoad(2),
        Instr::InvokeVirtual(GET_LOCAL_VARS.to_ref()),
        Instr::IConst(1),
        Instr::IConst(1),
        Instr::InvokeVirtual(INCREMENT_INT.to_ref()),
    ]));
}

#[test]
fn pause_saves_throws_and_restores() {
    let out = rewrite(&counter()).unwrap().code.instrs;
    assert!(!out.contains(&pause()));
    assert!(contains_run(&out, &[
        // receiver, then the pending int through the temp slot
        Instr::Pop,
        Instr::IStore(5),
        Instr::ALoad(2),
        Instr::InvokeVirtual(GET_LOCAL_STACK.to_ref()),
        Instr::ILoad(5),
        Instr::InvokeVirtual(PUSH_INT.to_ref()),
        Instr::ALoad(2),
        Instr::IConst(0),
        Instr::InvokeVirtual(SET_LABEL.to_ref()),
        Instr::New(PAUSE_SIGNAL_CLASS.to_string()),
        Instr::Dup,
        Instr::ALoad(2),
        Instr::InvokeSpecial(MethodRef::new(PAUSE_SIGNAL_CLASS, SIGNAL_INIT, SIGNAL_INIT_CONTEXT)),
        Instr::AThrow,
        Instr::Label(Label(1)),
        Instr::ALoad(2),
        Instr::InvokeVirtual(CLEAR_LABEL.to_ref()),
        Instr::ALoad(2),
        Instr::InvokeVirtual(GET_LOCAL_VARS.to_ref()),
        Instr::IConst(1),
        Instr::InvokeVirtual(GET_INT.to_ref()),
        Instr::IStore(1),
        Instr::ALoad(2),
        Instr::InvokeVirtual(GET_LOCAL_STACK.to_ref()),
        Instr::InvokeVirtual(POP_INT.to_ref()),
        Instr::IInc(1, 1),
    ]));
}

#[test]
fn returns_deregister_the_context() {
    let out = rewrite(&counter()).unwrap().code.instrs;
    assert!(contains_run(&out, &[
        Instr::ALoad(2),
        Instr::InvokeVirtual(REGISTER_CONTEXT.to_ref()),
        Instr::ALoad(2),
        Instr::InvokeVirtual(DEACTIVATE.to_ref()),
        Instr::Return,
    ]));
}

#[test]
fn restores_narrow_locals_before_wide_and_casts_references() {
    let m = method(vec![
        Instr::DConst(2.0),
        Instr::DStore(1),
        Instr::Ldc(Constant::String("s".into())),
        Instr::AStore(3),
        Instr::ALoad(0),
        pause(),
        Instr::Return,
    ]);
    let out = rewrite(&m).unwrap().code.instrs;
    assert!(contains_run(&out, &[
        Instr::IConst(3),
        Instr::InvokeVirtual(GET_REFERENCE.to_ref()),
        Instr::CheckCast("java/lang/String".into()),
        Instr::AStore(3),
        Instr::ALoad(4),
        Instr::InvokeVirtual(GET_LOCAL_VARS.to_ref()),
        Instr::IConst(1),
        Instr::InvokeVirtual(GET_DOUBLE.to_ref()),
        Instr::DStore(1),
    ]));
}

#[test]
fn handlers_rethrow_signals() {
    let mut m = method(vec![
        Instr::Label(Label(0)),
        Instr::ALoad(0),
        pause(),
        Instr::Label(Label(1)),
        Instr::Return,
        Instr::Label(Label(2)),
        Instr::AStore(1),
        Instr::Return,
    ]);
    m.code.try_catch = vec![TryCatchBlock { start: Label(0), end: Label(1), handler: Label(2), catch_type: None }];
    let out = rewrite(&m).unwrap();
    let instrs = &out.code.instrs;
    // labels 0..=2 are taken: start is 3, resume_0 is 4, rethrow is 5
    assert!(contains_run(instrs, &[
        Instr::Label(Label(2)),
        Instr::Dup,
        Instr::InstanceOf(SIGNAL_CLASS.to_string()),
        Instr::IfNe(Label(5)),
        Instr::AStore(1),
    ]));
    assert_eq!(&instrs[instrs.len() - 2..], &[Instr::Label(Label(5)), Instr::AThrow][..]);
    assert_eq!(out.code.try_catch, m.code.try_catch);
}

#[test]
fn answers_throw_without_resumption() {
    let m = method(vec![
        Instr::ALoad(0),
        Instr::InvokeVirtual(MethodRef::new(CLASS, "answer", "()V")),
        Instr::Return,
    ]);
    let out = rewrite(&m).unwrap().code.instrs;
    assert!(!out.iter().any(|i| matches!(i, Instr::TableSwitch { .. })));
    assert!(contains_run(&out, &[
        Instr::AConstNull,
        Instr::AStore(3),
        Instr::Pop,
        Instr::New(ANSWER_SIGNAL_CLASS.to_string()),
        Instr::Dup,
        Instr::ALoad(1),
        Instr::ALoad(3),
        Instr::InvokeSpecial(MethodRef::new(ANSWER_SIGNAL_CLASS, SIGNAL_INIT, SIGNAL_INIT_PAYLOAD)),
        Instr::AThrow,
    ]));
}

#[test]
fn call_parks_target_and_pushes_answer() {
    let m = method(vec![
        Instr::ALoad(0),
        Instr::Ldc(Constant::String("target".into())),
        Instr::InvokeVirtual(MethodRef::new(CLASS, "call", "(Ljava/lang/Object;)Ljava/lang/Object;")),
        Instr::Pop,
        Instr::Return,
    ]);
    let out = rewrite(&m).unwrap().code.instrs;
    assert!(contains_run(&out, &[Instr::AStore(2), Instr::Pop, Instr::ALoad(1), Instr::IConst(0)]));
    assert!(contains_run(&out, &[
        Instr::ALoad(1),
        Instr::ALoad(2),
        Instr::InvokeSpecial(MethodRef::new(CALL_SIGNAL_CLASS, SIGNAL_INIT, SIGNAL_INIT_PAYLOAD)),
    ]));
    assert!(contains_run(&out, &[
        Instr::ALoad(1),
        Instr::InvokeVirtual(GET_CALL_ANSWER.to_ref()),
        Instr::Pop,
    ]));
}

fn call_with(descriptor: &str, args: &[&str]) -> (Method, InstrumentConfig) {
    let mut instrs = vec![Instr::ALoad(0)];
    instrs.extend(args.iter().map(|a| Instr::Ldc(Constant::String(a.to_string()))));
    instrs.push(Instr::InvokeVirtual(MethodRef::new(CLASS, "call", descriptor)));
    if !descriptor.ends_with(")V") {
        instrs.push(if descriptor.ends_with(")J") { Instr::Pop2 } else { Instr::Pop });
    }
    instrs.push(Instr::Return);
    let config = InstrumentConfig {
        call_method_descriptor: descriptor.to_string(),
        ..InstrumentConfig::default()
    };
    (method(instrs), config)
}

#[test]
fn call_descriptor_must_take_one_reference() {
    let two = "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;";
    let (m, config) = call_with(two, &["a", "b"]);
    assert_eq!(rewrite_with(&m, &config).unwrap_err(), RewriteError::UnsupportedCallDescriptor(two.to_string()));

    let (m, config) = call_with("()Ljava/lang/Object;", &[]);
    assert!(matches!(rewrite_with(&m, &config), Err(RewriteError::UnsupportedCallDescriptor(_))));

    let m = method(vec![
        Instr::ALoad(0),
        Instr::IConst(1),
        Instr::InvokeVirtual(MethodRef::new(CLASS, "call", "(I)Ljava/lang/Object;")),
        Instr::Pop,
        Instr::Return,
    ]);
    let config = InstrumentConfig {
        call_method_descriptor: "(I)Ljava/lang/Object;".to_string(),
        ..InstrumentConfig::default()
    };
    assert!(matches!(rewrite_with(&m, &config), Err(RewriteError::UnsupportedCallDescriptor(_))));
}

#[test]
fn call_answers_must_be_references() {
    let (m, config) = call_with("(Ljava/lang/Object;)J", &["a"]);
    assert_eq!(rewrite_with(&m, &config).unwrap_err(), RewriteError::PrimitiveCallAnswer(TypeTag::Long));

    let (m, config) = call_with("(Ljava/lang/String;)V", &["a"]);
    let out = rewrite_with(&m, &config).unwrap().code.instrs;
    assert!(!out.contains(&Instr::InvokeVirtual(GET_CALL_ANSWER.to_ref())));
}

#[test]
fn ordinary_calls_pass_through() {
    let other = Instr::InvokeVirtual(MethodRef::new("other/Owner", "pause", "()V"));
    let m = method(vec![Instr::ALoad(0), other.clone(), Instr::ALoad(0), pause(), Instr::Return]);
    let out = rewrite(&m).unwrap().code.instrs;
    assert!(out.contains(&other));
}

#[test]
fn return_addresses_cannot_be_captured() {
    let m = method(vec![
        Instr::Jsr(Label(1)),
        Instr::Return,
        Instr::Label(Label(1)),
        Instr::ALoad(0),
        pause(),
        Instr::AStore(1),
        Instr::Ret(1),
    ]);
    assert_eq!(
        rewrite(&m).unwrap_err(),
        RewriteError::UncapturableValue { site: 0, ty: TypeTag::ReturnAddress }
    );
}
