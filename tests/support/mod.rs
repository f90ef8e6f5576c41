//! Class builders and a recording host shared by the integration tests.
#![allow(dead_code)]

use resumable::binary_format::{decode_class, encode_class};
use resumable::execution::{ContinuableRunner, EResult, ExecError, Heap, Host, Object, RunOutcome, Value};
use resumable::structure::classes::{access, Class, Code, Method, TryCatchBlock};
use resumable::structure::config::InstrumentConfig;
use resumable::structure::instructions::{Instr, InvokeKind, MethodRef};
use resumable::{transform_class, Transformed};

pub const CLASS: &str = "app/Counter";
pub const PROBE: &str = "app/Probe";
pub const OBJECT_DESC: &str = "(Ljava/lang/Object;)V";

pub fn entry(max_locals: u16, instrs: Vec<Instr>, try_catch: Vec<TryCatchBlock>) -> Method {
    Method {
        access: access::PUBLIC,
        name: "execute".to_string(),
        descriptor: "()V".to_string(),
        max_locals,
        code: Code { instrs, try_catch },
    }
}

pub fn class(methods: Vec<Method>) -> Class {
    Class {
        access: access::PUBLIC,
        name: CLASS.to_string(),
        super_name: Some("java/lang/Object".to_string()),
        interfaces: Vec::new(),
        methods,
    }
}

fn on_self(name: &str, descriptor: &str) -> Instr {
    Instr::InvokeVirtual(MethodRef::new(CLASS, name, descriptor))
}

pub fn pause() -> Vec<Instr> {
    vec![Instr::ALoad(0), on_self("pause", "()V")]
}

pub fn step_back() -> Vec<Instr> {
    vec![Instr::ALoad(0), on_self("stepBack", "()V")]
}

/// Expects the call target on top of the stack, leaves the answer.
pub fn call() -> Vec<Instr> {
    vec![Instr::ALoad(0), Instr::Swap, on_self("call", "(Ljava/lang/Object;)Ljava/lang/Object;")]
}

/// Expects the answer value on top of the stack.
pub fn answer() -> Vec<Instr> {
    vec![Instr::ALoad(0), Instr::Swap, on_self("answer", OBJECT_DESC)]
}

/// Hands the top of the stack, of descriptor type `arg`, to the probe.
pub fn record(arg: &str) -> Instr {
    Instr::InvokeStatic(MethodRef::new(PROBE, "record", format!("({})V", arg)))
}

/// What the probe saw, with references resolved so runs on different heaps
/// compare equal.
#[derive(Clone, Debug, PartialEq)]
pub enum Seen {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Null,
    Object(String),
}

/// Records every probe call. Suspension methods reached in untransformed
/// code return immediately.
#[derive(Default)]
pub struct Probe {
    pub seen: Vec<Seen>,
    pub answers: Vec<Value>,
}

impl Host for Probe {
    fn invoke(
        &mut self,
        heap: &mut Heap,
        _kind: InvokeKind,
        m: &MethodRef,
        _receiver: Option<Value>,
        args: &[Value],
    ) -> EResult<Option<Value>> {
        match (m.owner.as_str(), m.name.as_str()) {
            (PROBE, "record") => {
                for v in args {
                    let seen = match *v {
                        Value::Int(v) => Seen::Int(v),
                        Value::Long(v) => Seen::Long(v),
                        Value::Float(v) => Seen::Float(v),
                        Value::Double(v) => Seen::Double(v),
                        Value::Ref(None) => Seen::Null,
                        Value::Ref(Some(r)) => match heap.get(r)? {
                            Object::Str(s) => Seen::Str(s.clone()),
                            other => Seen::Object(other.class_name().to_string()),
                        },
                        Value::ReturnAddress(_) => Seen::Object("return address".to_string()),
                    };
                    self.seen.push(seen);
                }
                Ok(None)
            }
            (CLASS, "pause") | (CLASS, "stepBack") => Ok(None),
            (CLASS, "call") => Ok(Some(self.answers.pop().unwrap_or(Value::NULL))),
            _ => Err(ExecError::NoSuchMethod(format!("{}.{}", m.owner, m.name))),
        }
    }
}

/// Honors `RUST_LOG`, for example `RUST_LOG=resumable_rewrite=trace`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> InstrumentConfig {
    InstrumentConfig::default()
}

pub fn transform(class: &Class) -> Class {
    let bytes = encode_class(class);
    match transform_class(&bytes, &class.name, &config()).unwrap() {
        Transformed::Rewritten(out) => decode_class(&out).unwrap(),
        Transformed::Unchanged => panic!("{} was left unchanged", class.name),
    }
}

/// Runs the untransformed class in one go.
pub fn straight_line(class: &Class) -> Vec<Seen> {
    let mut probe = Probe::default();
    let mut runner = ContinuableRunner::new(class.clone(), &config()).with_fuel(1_000_000);
    assert_eq!(runner.start(&mut probe).unwrap(), RunOutcome::Completed(None));
    probe.seen
}

/// Runs the transformed class, resuming after every pause until it
/// completes. Returns what the probe saw and every outcome in order.
pub fn drive(class: Class) -> (Vec<Seen>, Vec<RunOutcome>, ContinuableRunner) {
    init_logging();
    let mut probe = Probe::default();
    let mut runner = ContinuableRunner::new(class, &config()).with_fuel(1_000_000);
    let mut outcomes = Vec::new();
    let mut outcome = runner.start(&mut probe).unwrap();
    loop {
        outcomes.push(outcome.clone());
        outcome = match outcome {
            RunOutcome::Paused(id) => runner.resume(id, &mut probe).unwrap(),
            _ => break,
        };
        assert!(outcomes.len() < 10_000, "runaway flow");
    }
    (probe.seen, outcomes, runner)
}

/// Points at the first line where two debug renderings differ.
pub fn diff_print<T: ::std::fmt::Debug>(value_is: &T, value_should: &T) -> String {
    let value_is = format!("{:#?}", value_is);
    let value_should = format!("{:#?}", value_should);

    let mut i = 0;
    let mut j = 0;
    for (&a, &b) in value_is.as_bytes().iter().zip(value_should.as_bytes()) {
        if a != b {
            break;
        }
        i += 1;
        if a == b'\n' {
            j = i;
        }
    }

    let p = if j != 0 { "...\n" } else { "" };
    format!("Is:\n{}{}\nShould:\n{}{}", p, &value_is[j..], p, &value_should[j..])
}
