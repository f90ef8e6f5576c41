use super::*;

use resumable_structure::classes::{access, Code, Method, TryCatchBlock};
use resumable_structure::config::{InstrumentConfig, JoinPolicy};
use resumable_structure::instructions::{Constant, Instr, Label, MethodRef};
use resumable_structure::types::TypeTag;

use crate::graph::{Graph, NodeSort};
use crate::liveness::Liveness;

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

fn call() -> Instr {
    Instr::InvokeVirtual(MethodRef::new(CLASS, "call", "(Ljava/lang/Object;)Ljava/lang/Object;"))
}

fn shape_with(m: &Method, config: &InstrumentConfig) -> AResult<ShapeAnalysis> {
    let metrics = analyze_metrics(CLASS, m, config)?;
    analyze_shape(CLASS, m, config, &metrics)
}

fn shape(m: &Method) -> AResult<ShapeAnalysis> {
    shape_with(m, &InstrumentConfig::default())
}

fn this() -> TypeTag {
    TypeTag::reference(CLASS)
}

#[test]
fn metrics_count_sites_and_slots() {
    let mut m = method(vec![
        Instr::ALoad(0),
        pause(),
        Instr::DConst(1.0),
        Instr::DStore(3),
        Instr::ALoad(0),
        Instr::InvokeVirtual(MethodRef::new(CLASS, "answer", "()V")),
        Instr::ALoad(0),
        Instr::InvokeVirtual(MethodRef::new("other/Type", "pause", "()V")),
        Instr::Return,
    ]);
    m.code.try_catch = vec![
        TryCatchBlock { start: Label(0), end: Label(1), handler: Label(2), catch_type: Some("a/X".into()) },
        TryCatchBlock { start: Label(0), end: Label(1), handler: Label(2), catch_type: Some("a/Y".into()) },
        TryCatchBlock { start: Label(0), end: Label(1), handler: Label(3), catch_type: None },
    ];
    let metrics = analyze_metrics(CLASS, &m, &InstrumentConfig::default()).unwrap();
    assert_eq!(metrics.suspension_count, 1);
    assert_eq!(metrics.answer_count, 1);
    assert_eq!(metrics.max_locals, 5);
    assert_eq!(metrics.exception_type(Label(2)), Some("java/lang/Throwable"));
    assert_eq!(metrics.exception_type(Label(3)), Some("java/lang/Throwable"));
    assert!(metrics.needs_transform());
}

#[test]
fn plain_methods_need_no_transform() {
    let mut m = method(vec![Instr::ILoad(1), Instr::IReturn]);
    m.descriptor = "(J)I".into();
    let metrics = analyze_metrics(CLASS, &m, &InstrumentConfig::default()).unwrap();
    assert!(!metrics.needs_transform());
    assert_eq!(metrics.max_locals, 3);
}

#[test]
fn suspension_snapshot_excludes_receiver() {
    let m = method(vec![Instr::IConst(7), Instr::ALoad(0), pause(), Instr::Pop, Instr::Return]);
    let a = shape(&m).unwrap();
    let site = a.suspension(0).unwrap();
    assert_eq!(site.stack, vec![TypeTag::Int]);
    assert_eq!(site.locals.get(&0), Some(&this()));
}

#[test]
fn call_site_excludes_target_and_pushes_result() {
    let m = method(vec![
        Instr::IConst(3),
        Instr::ALoad(0),
        Instr::Ldc(Constant::String("target".into())),
        call(),
        Instr::AStore(1),
        Instr::Label(Label(0)),
        Instr::Pop,
        Instr::Return,
    ]);
    let a = shape(&m).unwrap();
    assert_eq!(a.suspension(0).unwrap().stack, vec![TypeTag::Int]);
    let after = &a.label(Label(0)).unwrap().types;
    assert_eq!(after.locals.get(&1), Some(&TypeTag::object()));
    assert_eq!(after.stack, vec![TypeTag::Int]);
}

#[test]
fn loop_header_sees_counter() {
    let m = method(vec![
        Instr::IConst(0),
        Instr::IStore(1),
        Instr::Label(Label(0)),
        Instr::ILoad(1),
        Instr::BiPush(10),
        Instr::IfICmpGe(Label(1)),
        Instr::ALoad(0),
        pause(),
        Instr::IInc(1, 1),
        Instr::Goto(Label(0)),
        Instr::Label(Label(1)),
        Instr::Return,
    ]);
    let a = shape(&m).unwrap();
    let header = &a.label(Label(0)).unwrap().types;
    assert_eq!(header.locals.get(&1), Some(&TypeTag::Int));
    assert!(header.stack.is_empty());
    assert_eq!(a.suspension(0).unwrap().locals.len(), 2);
}

#[test]
fn handler_snapshot_is_retyped_once() {
    let mut m = method(vec![
        Instr::Label(Label(0)),
        Instr::ALoad(0),
        pause(),
        Instr::Label(Label(1)),
        Instr::Return,
        Instr::Label(Label(2)),
        Instr::AStore(1),
        Instr::IConst(1),
        Instr::IStore(2),
        Instr::Return,
    ]);
    m.code.try_catch = vec![TryCatchBlock {
        start: Label(0),
        end: Label(1),
        handler: Label(2),
        catch_type: Some("java/lang/Exception".into()),
    }];
    let a = shape(&m).unwrap();
    let handler = a.label(Label(2)).unwrap();
    assert_eq!(handler.sort, NodeSort::ExceptionHandler);
    assert_eq!(handler.types.stack, vec![TypeTag::reference("java/lang/Exception")]);
    assert_eq!(handler.types.locals.get(&1), Some(&TypeTag::reference("java/lang/Exception")));
    assert_eq!(handler.types.locals.get(&2), None);
    assert_eq!(a.retype_at.iter().collect::<Vec<_>>(), vec![(&6, &Label(2))]);
}

#[test]
fn subroutine_entry_holds_return_address() {
    let m = method(vec![
        Instr::Jsr(Label(1)),
        Instr::Return,
        Instr::Label(Label(1)),
        Instr::AStore(1),
        Instr::Ret(1),
    ]);
    let a = shape(&m).unwrap();
    assert_eq!(a.label(Label(1)).unwrap().types.stack, vec![TypeTag::ReturnAddress]);
}

#[test]
fn unreachable_sites_have_no_snapshot() {
    let m = method(vec![Instr::Return, Instr::ALoad(0), pause(), Instr::Return]);
    let a = shape(&m).unwrap();
    assert_eq!(a.suspensions, vec![None]);
}

#[test]
fn malformed_streams_are_rejected() {
    assert_eq!(
        shape(&method(vec![Instr::Goto(Label(9))])).unwrap_err(),
        AnalysisError::UnknownLabel(Label(9))
    );
    assert_eq!(
        shape(&method(vec![Instr::Label(Label(0)), Instr::Label(Label(0)), Instr::Return])).unwrap_err(),
        AnalysisError::DuplicateLabel(Label(0))
    );
    assert_eq!(
        shape(&method(vec![Instr::Pop, Instr::Return])).unwrap_err(),
        AnalysisError::StackUnderflow { at: 0 }
    );
    assert_eq!(
        shape(&method(vec![Instr::ILoad(3), Instr::Pop, Instr::Return])).unwrap_err(),
        AnalysisError::UndefinedLocal { at: 0, slot: 3 }
    );
    assert_eq!(
        shape(&method(vec![Instr::LConst(1), Instr::Pop, Instr::Return])).unwrap_err(),
        AnalysisError::WideValueSplit { at: 1 }
    );
}

fn divergent_join(read_after: bool) -> Method {
    let mut instrs = vec![
        Instr::IConst(0),
        Instr::IStore(1),
        Instr::ILoad(1),
        Instr::IfEq(Label(1)),
        Instr::FConst(1.0),
        Instr::FStore(1),
        Instr::Label(Label(1)),
    ];
    if read_after {
        instrs.extend(vec![Instr::ILoad(1), Instr::Pop]);
    }
    instrs.push(Instr::Return);
    method(instrs)
}

#[test]
fn divergent_live_local_is_rejected() {
    assert_eq!(
        shape(&divergent_join(true)).unwrap_err(),
        AnalysisError::DivergentLocal {
            at: 6,
            slot: 1,
            expected: Some(TypeTag::Int),
            found: Some(TypeTag::Float),
        }
    );
}

#[test]
fn dead_slot_reuse_is_not_a_conflict() {
    assert!(shape(&divergent_join(false)).is_ok());
}

#[test]
fn first_predecessor_policy_keeps_first_view() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = InstrumentConfig { join_policy: JoinPolicy::FirstPredecessor, ..InstrumentConfig::default() };
    let a = shape_with(&divergent_join(true), &config).unwrap();
    assert_eq!(a.label(Label(1)).unwrap().types.locals.get(&1), Some(&TypeTag::Int));
}

#[test]
fn divergent_stack_is_always_rejected() {
    let m = method(vec![
        Instr::IConst(0),
        Instr::IfEq(Label(1)),
        Instr::IConst(5),
        Instr::Label(Label(1)),
        Instr::Return,
    ]);
    let config = InstrumentConfig { join_policy: JoinPolicy::FirstPredecessor, ..InstrumentConfig::default() };
    match shape_with(&m, &config) {
        Err(AnalysisError::DivergentStack { at: 3, expected, found }) => {
            assert!(expected.is_empty());
            assert_eq!(found, vec![TypeTag::Int]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

/// Slot 1 holds a `java/lang/Class` on the taken branch and a string on the
/// fallthrough, then meets at `Label(1)`.
fn reference_join(suspend_after: bool) -> Method {
    let mut instrs = vec![
        Instr::Ldc(Constant::Class("x/Y".into())),
        Instr::AStore(1),
        Instr::IConst(0),
        Instr::IfEq(Label(1)),
        Instr::Ldc(Constant::String("s".into())),
        Instr::AStore(1),
        Instr::Label(Label(1)),
    ];
    if suspend_after {
        instrs.extend(vec![Instr::ALoad(0), pause()]);
    }
    instrs.extend(vec![Instr::ALoad(1), Instr::Pop, Instr::Return]);
    method(instrs)
}

#[test]
fn differing_reference_classes_widen_at_join() {
    let a = shape(&reference_join(true)).unwrap();
    assert_eq!(a.label(Label(1)).unwrap().types.locals.get(&1), Some(&TypeTag::object()));
    assert_eq!(a.suspension(0).unwrap().locals.get(&1), Some(&TypeTag::object()));
    // `this` keeps its class
    assert_eq!(a.suspension(0).unwrap().locals.get(&0), Some(&this()));
}

#[test]
fn differing_stack_references_widen_at_join() {
    let m = method(vec![
        Instr::IConst(0),
        Instr::IfEq(Label(1)),
        Instr::Ldc(Constant::String("s".into())),
        Instr::Goto(Label(2)),
        Instr::Label(Label(1)),
        Instr::Ldc(Constant::Class("x/Y".into())),
        Instr::Label(Label(2)),
        Instr::ALoad(0),
        pause(),
        Instr::Pop,
        Instr::Return,
    ]);
    let a = shape(&m).unwrap();
    assert_eq!(a.label(Label(2)).unwrap().types.stack, vec![TypeTag::object()]);
    assert_eq!(a.suspension(0).unwrap().stack, vec![TypeTag::object()]);
}

#[test]
fn matching_and_null_references_keep_their_class() {
    let m = method(vec![
        Instr::AConstNull,
        Instr::AStore(1),
        Instr::IConst(0),
        Instr::IfEq(Label(1)),
        Instr::Ldc(Constant::String("s".into())),
        Instr::AStore(1),
        Instr::Label(Label(1)),
        Instr::ALoad(0),
        pause(),
        Instr::Return,
    ]);
    let a = shape(&m).unwrap();
    let slot = a.suspension(0).unwrap().locals.get(&1).cloned();
    assert!(slot == Some(TypeTag::Null) || slot == Some(TypeTag::reference("java/lang/String")), "{:?}", slot);
}

#[test]
fn wide_store_kills_the_upper_half() {
    let m = method(vec![
        Instr::DConst(1.0),
        Instr::DStore(1),
        Instr::ILoad(2),
        Instr::Pop,
        Instr::Return,
    ]);
    let graph = Graph::build(CLASS, &m, &InstrumentConfig::default()).unwrap();
    let live = Liveness::compute(&graph);
    assert!(live.live_in(graph.entry).is_empty());
}
