use tracing::debug;

use resumable_structure::classes::{Class, Method};
use resumable_structure::config::{CallKind, InstrumentConfig};
use resumable_structure::contract::signal_kind;

use crate::context::ContextId;
use crate::heap::Object;
use crate::machine::{Completion, Host, Machine, SIGNAL_CONTEXT_FIELD, SIGNAL_PAYLOAD_FIELD};
use crate::value::{ObjRef, Value};
use crate::{EResult, ExecError};

fn entry_method<'c>(class: &'c Class, name: &str, descriptor: &str) -> EResult<&'c Method> {
    class
        .method(name, descriptor)
        .ok_or_else(|| ExecError::NoSuchMethod(format!("{}.{}{}", class.name, name, descriptor)))
}

/// How one run of the entry method ended. Signals never escape a runner,
/// each is decoded into its variant here.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed(Option<Value>),
    Paused(ContextId),
    SteppedBack { context: ContextId, previous: Option<ContextId> },
    Called { context: ContextId, target: Value },
    Answered { context: ContextId, value: Value },
    /// An ordinary exception left the entry method.
    Threw(ObjRef),
}

/// Drives the entry method of one continuable instance.
pub struct ContinuableRunner {
    machine: Machine,
    class: Class,
    entry_name: String,
    entry_descriptor: String,
    receiver: ObjRef,
}

impl ContinuableRunner {
    pub fn new(class: Class, config: &InstrumentConfig) -> Self {
        let mut machine = Machine::new();
        let receiver = machine.heap.alloc(Object::instance(class.name.as_str()));
        ContinuableRunner {
            machine,
            class,
            entry_name: config.entry_method_name.clone(),
            entry_descriptor: config.entry_method_descriptor.clone(),
            receiver,
        }
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.machine.set_fuel(Some(fuel));
        self
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn receiver(&self) -> ObjRef {
        self.receiver
    }

    /// Runs the entry method from the top on a fresh context.
    pub fn start(&mut self, host: &mut dyn Host) -> EResult<RunOutcome> {
        self.start_with(Vec::new(), host)
    }

    /// As `start`, passing `args` as the entry method's parameters.
    pub fn start_with(&mut self, args: Vec<Value>, host: &mut dyn Host) -> EResult<RunOutcome> {
        self.machine.contexts.reset();
        self.run(args, host)
    }

    /// Continues a suspended flow from a clone of `context`.
    pub fn resume(&mut self, context: ContextId, host: &mut dyn Host) -> EResult<RunOutcome> {
        self.machine.contexts.resume(context)?;
        self.run(Vec::new(), host)
    }

    /// Continues a flow suspended at a call site, handing it `value`.
    pub fn answer(&mut self, context: ContextId, value: Value, host: &mut dyn Host) -> EResult<RunOutcome> {
        self.machine.contexts.answer(context, value)?;
        self.run(Vec::new(), host)
    }

    /// Context used by the most recent run. A completed run has already
    /// deactivated it.
    pub fn last_context(&self) -> Option<ContextId> {
        self.machine.contexts.current()
    }

    fn run(&mut self, params: Vec<Value>, host: &mut dyn Host) -> EResult<RunOutcome> {
        let method = entry_method(&self.class, &self.entry_name, &self.entry_descriptor)?;
        let mut args = Vec::new();
        if !method.is_static() {
            args.push(Value::from(self.receiver));
        }
        args.extend(params);

        let outcome = match self.machine.execute(&self.class, method, args, host)? {
            Completion::Returned(v) => RunOutcome::Completed(v),
            Completion::Threw(exc) => self.decode(exc)?,
        };
        debug!(class = %self.class.name, ?outcome, "run finished");
        Ok(outcome)
    }

    fn decode(&self, exc: ObjRef) -> EResult<RunOutcome> {
        let heap = &self.machine.heap;
        let kind = match signal_kind(heap.class_of(exc)?) {
            Some(kind) => kind,
            None => return Ok(RunOutcome::Threw(exc)),
        };
        let context = match heap.field(exc, SIGNAL_CONTEXT_FIELD) {
            Some(Value::Ref(Some(r))) => match *heap.get(r)? {
                Object::Context(id) => id,
                _ => return Err(ExecError::TypeMismatch { expected: "context", found: Value::from(r) }),
            },
            other => {
                return Err(ExecError::TypeMismatch { expected: "context", found: other.unwrap_or(Value::NULL) })
            }
        };
        let payload = heap.field(exc, SIGNAL_PAYLOAD_FIELD).unwrap_or(Value::NULL);

        Ok(match kind {
            CallKind::Pause => RunOutcome::Paused(context),
            CallKind::StepBack => RunOutcome::SteppedBack {
                context,
                previous: self.machine.contexts.get(context)?.parent,
            },
            CallKind::Call => RunOutcome::Called { context, target: payload },
            CallKind::Answer => RunOutcome::Answered { context, value: payload },
        })
    }
}
