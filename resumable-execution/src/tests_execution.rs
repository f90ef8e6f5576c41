use super::*;

use resumable_structure::classes::{access, Class, Code, Method, TryCatchBlock};
use resumable_structure::config::InstrumentConfig;
use resumable_structure::contract::{self, PAUSE_SIGNAL_CLASS, SIGNAL_CLASS};
use resumable_structure::instructions::{FieldRef, Instr, InvokeKind, Label, MethodRef};
use resumable_structure::types::{ArrayKind, THROWABLE_CLASS};

use crate::machine::{ARITHMETIC_EXCEPTION, ARRAY_INDEX_EXCEPTION};

const CLASS: &str = "app/Subject";

fn method(name: &str, descriptor: &str, max_locals: u16, instrs: Vec<Instr>) -> Method {
    Method {
        access: access::PUBLIC | access::STATIC,
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        max_locals,
        code: Code { instrs, try_catch: Vec::new() },
    }
}

fn class(methods: Vec<Method>) -> Class {
    Class {
        access: access::PUBLIC,
        name: CLASS.to_string(),
        super_name: Some("java/lang/Object".to_string()),
        interfaces: Vec::new(),
        methods,
    }
}

fn run_method(m: Method, host: &mut dyn Host) -> (Machine, EResult<Completion>) {
    let c = class(vec![m]);
    let mut machine = Machine::new();
    let res = machine.execute(&c, &c.methods[0], Vec::new(), host);
    (machine, res)
}

fn run(instrs: Vec<Instr>) -> EResult<Completion> {
    run_method(method("f", "()I", 4, instrs), &mut NoHost).1
}

fn returned(v: Value) -> EResult<Completion> {
    Ok(Completion::Returned(Some(v)))
}

#[derive(Default)]
struct Recorder {
    seen: Vec<Value>,
}

impl Host for Recorder {
    fn invoke(
        &mut self,
        _heap: &mut Heap,
        kind: InvokeKind,
        m: &MethodRef,
        _receiver: Option<Value>,
        args: &[Value],
    ) -> EResult<Option<Value>> {
        match (kind, m.owner.as_str(), m.name.as_str()) {
            (InvokeKind::Static, "app/Probe", "record") => {
                self.seen.extend_from_slice(args);
                Ok(None)
            }
            _ => Err(ExecError::NoSuchMethod(m.name.clone())),
        }
    }

    fn superclass(&self, class: &str) -> Option<String> {
        match class {
            "app/Oops" => Some("java/lang/Exception".to_string()),
            _ => None,
        }
    }
}

#[test]
fn integer_arithmetic() {
    let res = run(vec![
        Instr::BiPush(7),
        Instr::IConst(2),
        Instr::IDiv,
        Instr::IConst(3),
        Instr::IMul,
        Instr::IConst(-1),
        Instr::IConst(28),
        Instr::IUShr,
        Instr::IAdd,
        Instr::IReturn,
    ]);
    assert_eq!(res, returned(Value::Int(9 + 15)));

    let res = run(vec![
        Instr::Ldc(resumable_structure::instructions::Constant::Int(i32::MIN)),
        Instr::IConst(-1),
        Instr::IDiv,
        Instr::I2B,
        Instr::IReturn,
    ]);
    assert_eq!(res, returned(Value::Int(0)));
}

#[test]
fn float_compare_and_convert() {
    let res = run(vec![
        Instr::FConst(0.0),
        Instr::FConst(0.0),
        Instr::FDiv,
        Instr::FConst(1.0),
        Instr::FCmpG,
        Instr::DConst(1.0),
        Instr::Ldc(resumable_structure::instructions::Constant::Double(1e12)),
        Instr::DAdd,
        Instr::D2I,
        Instr::IAdd,
        Instr::IReturn,
    ]);
    // NaN compares as 1 under fcmpg, d2i saturates
    assert_eq!(res, returned(Value::Int(1i32.wrapping_add(i32::MAX))));
}

#[test]
fn wide_values_occupy_two_words() {
    let res = run_method(
        method("f", "()J", 4, vec![
            Instr::LConst(3),
            Instr::Dup2,
            Instr::LAdd,
            Instr::LStore(1),
            Instr::IConst(9),
            Instr::IStore(0),
            Instr::LLoad(1),
            Instr::LReturn,
        ]),
        &mut NoHost,
    )
    .1;
    assert_eq!(res, returned(Value::Long(6)));

    // a store into the upper half invalidates the wide value
    assert_eq!(
        run(vec![Instr::LConst(1), Instr::LStore(0), Instr::IConst(0), Instr::IStore(1), Instr::LLoad(0), Instr::L2I, Instr::IReturn,]),
        Err(ExecError::UnsetLocal(0))
    );
    // pop2 cannot split a long
    assert!(matches!(
        run(vec![Instr::LConst(1), Instr::IConst(0), Instr::Pop2, Instr::IConst(0), Instr::IReturn]),
        Err(ExecError::TypeMismatch { .. })
    ));
}

#[test]
fn handler_catches_by_type() {
    let mut m = method("f", "()I", 2, vec![
        Instr::Label(Label(0)),
        Instr::IConst(1),
        Instr::IConst(0),
        Instr::IDiv,
        Instr::IReturn,
        Instr::Label(Label(1)),
        Instr::Label(Label(2)),
        Instr::AStore(0),
        Instr::IConst(-1),
        Instr::IReturn,
    ]);
    m.code.try_catch.push(TryCatchBlock {
        start: Label(0),
        end: Label(1),
        handler: Label(2),
        catch_type: Some("java/lang/RuntimeException".to_string()),
    });
    assert_eq!(run_method(m.clone(), &mut NoHost).1, returned(Value::Int(-1)));

    m.code.try_catch[0].catch_type = Some("java/lang/Error".to_string());
    let (machine, res) = run_method(m, &mut NoHost);
    match res {
        Ok(Completion::Threw(exc)) => assert_eq!(machine.heap.class_of(exc), Ok(ARITHMETIC_EXCEPTION)),
        other => panic!("{:?}", other),
    }
}

#[test]
fn host_classes_join_the_hierarchy() {
    let mut m = method("f", "()I", 1, vec![
        Instr::Label(Label(0)),
        Instr::New("app/Oops".to_string()),
        Instr::Dup,
        Instr::InvokeSpecial(MethodRef::new("app/Oops", "<init>", "()V")),
        Instr::AThrow,
        Instr::Label(Label(1)),
        Instr::InstanceOf(THROWABLE_CLASS.to_string()),
        Instr::IReturn,
    ]);
    m.code.try_catch.push(TryCatchBlock {
        start: Label(0),
        end: Label(1),
        handler: Label(1),
        catch_type: Some("java/lang/Exception".to_string()),
    });
    assert_eq!(run_method(m, &mut Recorder::default()).1, returned(Value::Int(1)));
}

#[test]
fn signals_extend_the_common_supertype() {
    let probe = |target: &str| {
        run(vec![
            Instr::New(PAUSE_SIGNAL_CLASS.to_string()),
            Instr::InstanceOf(target.to_string()),
            Instr::IReturn,
        ])
    };
    assert_eq!(probe(SIGNAL_CLASS), returned(Value::Int(1)));
    assert_eq!(probe("java/lang/RuntimeException"), returned(Value::Int(1)));
    assert_eq!(probe(THROWABLE_CLASS), returned(Value::Int(1)));
    assert_eq!(probe(contract::CALL_SIGNAL_CLASS), returned(Value::Int(0)));
    assert_eq!(probe("java/lang/Error"), returned(Value::Int(0)));
}

#[test]
fn subroutines_return_through_a_local() {
    let res = run(vec![
        Instr::IConst(1),
        Instr::IStore(0),
        Instr::Jsr(Label(0)),
        Instr::ILoad(0),
        Instr::IReturn,
        Instr::Label(Label(0)),
        Instr::AStore(1),
        Instr::IInc(0, 41),
        Instr::Ret(1),
    ]);
    assert_eq!(res, returned(Value::Int(42)));
}

#[test]
fn byte_arrays_truncate() {
    let res = run(vec![
        Instr::IConst(2),
        Instr::NewArray(ArrayKind::Byte),
        Instr::AStore(0),
        Instr::ALoad(0),
        Instr::IConst(1),
        Instr::SiPush(300),
        Instr::BAStore,
        Instr::ALoad(0),
        Instr::IConst(1),
        Instr::BALoad,
        Instr::ALoad(0),
        Instr::ArrayLength,
        Instr::IAdd,
        Instr::IReturn,
    ]);
    assert_eq!(res, returned(Value::Int(44 + 2)));

    let (machine, res) = run_method(
        method("f", "()I", 1, vec![
            Instr::IConst(1),
            Instr::ANewArray("java/lang/String".to_string()),
            Instr::IConst(1),
            Instr::AALoad,
            Instr::AReturn,
        ]),
        &mut NoHost,
    );
    match res {
        Ok(Completion::Threw(exc)) => assert_eq!(machine.heap.class_of(exc), Ok(ARRAY_INDEX_EXCEPTION)),
        other => panic!("{:?}", other),
    }
}

#[test]
fn fields_default_to_zero() {
    let field = FieldRef {
        owner: CLASS.to_string(),
        name: "count".to_string(),
        descriptor: "J".to_string(),
    };
    let (machine, res) = run_method(
        method("f", "()J", 1, vec![
            Instr::GetStatic(field.clone()),
            Instr::LConst(1),
            Instr::LAdd,
            Instr::Dup2,
            Instr::PutStatic(field),
            Instr::LReturn,
        ]),
        &mut NoHost,
    );
    assert_eq!(res, returned(Value::Long(1)));
    assert_eq!(machine.static_field(CLASS, "count"), Some(Value::Long(1)));
}

#[test]
fn host_receives_foreign_calls() {
    let mut host = Recorder::default();
    let (_, res) = run_method(
        method("f", "()V", 1, vec![
            Instr::IConst(5),
            Instr::InvokeStatic(MethodRef::new("app/Probe", "record", "(I)V")),
            Instr::Return,
        ]),
        &mut host,
    );
    assert_eq!(res, Ok(Completion::Returned(None)));
    assert_eq!(host.seen, vec![Value::Int(5)]);

    let (_, res) = run_method(
        method("f", "()V", 1, vec![Instr::InvokeStatic(MethodRef::new("app/Other", "go", "()V")), Instr::Return]),
        &mut host,
    );
    assert_eq!(res, Err(ExecError::NoSuchMethod("go".to_string())));
}

#[test]
fn calls_within_the_class_run_in_place() {
    let c = class(vec![
        method("f", "()I", 1, vec![
            Instr::IConst(4),
            Instr::InvokeStatic(MethodRef::new(CLASS, "twice", "(I)I")),
            Instr::IReturn,
        ]),
        method("twice", "(I)I", 1, vec![Instr::ILoad(0), Instr::IConst(1), Instr::IShl, Instr::IReturn]),
    ]);
    let mut machine = Machine::new();
    assert_eq!(machine.execute(&c, &c.methods[0], Vec::new(), &mut NoHost), returned(Value::Int(8)));
}

#[test]
fn fuel_bounds_execution() {
    let c = class(vec![method("f", "()V", 0, vec![Instr::Label(Label(0)), Instr::Goto(Label(0))])]);
    let mut machine = Machine::new();
    machine.set_fuel(Some(100));
    assert_eq!(machine.execute(&c, &c.methods[0], Vec::new(), &mut NoHost), Err(ExecError::OutOfFuel));
    assert_eq!(machine.fuel(), Some(0));
}

#[test]
fn malformed_code_is_an_error() {
    assert_eq!(run(vec![Instr::IAdd]), Err(ExecError::StackUnderflow));
    assert_eq!(run(vec![Instr::ILoad(3), Instr::IReturn]), Err(ExecError::UnsetLocal(3)));
    assert_eq!(run(vec![Instr::Goto(Label(9))]), Err(ExecError::UnknownLabel(Label(9))));
    assert_eq!(run(vec![Instr::Nop]), Err(ExecError::FellOffEnd));
    assert!(matches!(
        run(vec![Instr::FConst(1.0), Instr::IReturn]),
        Err(ExecError::TypeMismatch { expected: "int", .. })
    ));
}

fn ctx_call(m: contract::ContractMethod) -> Instr {
    Instr::InvokeVirtual(m.to_ref())
}

#[test]
fn context_services() {
    let (machine, res) = run_method(
        method("f", "()I", 1, vec![
            Instr::AConstNull,
            Instr::InvokeStatic(contract::CREATE_OR_RESET_CONTEXT.to_ref()),
            Instr::AStore(0),
            // locals[1] = 42, pushed 7 onto the stack store
            Instr::ALoad(0),
            ctx_call(contract::GET_LOCAL_VARS),
            Instr::IConst(1),
            Instr::BiPush(42),
            ctx_call(contract::STORE_INT),
            Instr::ALoad(0),
            ctx_call(contract::GET_LOCAL_STACK),
            Instr::BiPush(7),
            ctx_call(contract::PUSH_INT),
            Instr::ALoad(0),
            Instr::IConst(3),
            ctx_call(contract::SET_LABEL),
            Instr::ALoad(0),
            ctx_call(contract::GET_LABEL),
            Instr::ALoad(0),
            ctx_call(contract::GET_LOCAL_VARS),
            Instr::IConst(1),
            ctx_call(contract::GET_INT),
            Instr::IAdd,
            Instr::IReturn,
        ]),
        &mut NoHost,
    );
    assert_eq!(res, returned(Value::Int(45)));

    let id = machine.contexts.current().unwrap();
    let ctx = machine.contexts.get(id).unwrap();
    assert_eq!(ctx.label, 3);
    assert_eq!(ctx.local_vars.get_int(1), 42);
    assert_eq!(ctx.local_stack.entries(), &[Value::Int(7)]);
}

fn pausing_class() -> Class {
    let mut m = method("execute", "()V", 2, vec![
        Instr::ALoad(0),
        Instr::InvokeStatic(contract::CREATE_OR_RESET_CONTEXT.to_ref()),
        Instr::AStore(1),
        Instr::New(PAUSE_SIGNAL_CLASS.to_string()),
        Instr::Dup,
        Instr::ALoad(1),
        Instr::InvokeSpecial(MethodRef::new(PAUSE_SIGNAL_CLASS, contract::SIGNAL_INIT, contract::SIGNAL_INIT_CONTEXT)),
        Instr::AThrow,
    ]);
    m.access = access::PUBLIC;
    class(vec![m])
}

#[test]
fn runner_decodes_signals() {
    let mut runner = ContinuableRunner::new(pausing_class(), &InstrumentConfig::default());
    let first = match runner.start(&mut NoHost) {
        Ok(RunOutcome::Paused(id)) => id,
        other => panic!("{:?}", other),
    };
    let second = match runner.resume(first, &mut NoHost) {
        Ok(RunOutcome::Paused(id)) => id,
        other => panic!("{:?}", other),
    };
    assert_ne!(first, second);
    assert_eq!(runner.last_context(), Some(second));
    assert_eq!(runner.machine().contexts.get(second).unwrap().parent, Some(first));
    assert_eq!(runner.machine().contexts.len(), 2);
}

#[test]
fn runner_reports_plain_exceptions() {
    let mut m = method("execute", "()V", 1, vec![
        Instr::New("app/Oops".to_string()),
        Instr::AThrow,
    ]);
    m.access = access::PUBLIC;
    let mut runner = ContinuableRunner::new(class(vec![m]), &InstrumentConfig::default());
    match runner.start(&mut NoHost) {
        Ok(RunOutcome::Threw(exc)) => assert_eq!(runner.machine().heap.class_of(exc), Ok("app/Oops")),
        other => panic!("{:?}", other),
    }

    let mut runner = ContinuableRunner::new(class(Vec::new()), &InstrumentConfig::default());
    assert!(matches!(runner.start(&mut NoHost), Err(ExecError::NoSuchMethod(_))));
}
