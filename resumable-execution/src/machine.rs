use std::collections::HashMap;

use tracing::trace;

use resumable_structure::classes::{Class, Method};
use resumable_structure::contract::{
    self, signal_kind, CONTEXT_CLASS, SIGNAL_CLASS, SIGNAL_INIT, SIGNAL_SUPERCLASSES, STACK_CLASS,
};
use resumable_structure::descriptors::{parse_field_type, DescriptorError, MethodDescriptor};
use resumable_structure::instructions::{Constant, Instr, InvokeKind, Label, MethodRef};
use resumable_structure::types::{array_of, Slot, OBJECT_CLASS, THROWABLE_CLASS};

use crate::context::{ContextId, ContextManager, NO_LABEL};
use crate::heap::{ContextView, Heap, Object};
use crate::stack::ContinuationStack;
use crate::value::{ObjRef, ValCast, Value};
use crate::{EResult, ExecError};

pub const ARITHMETIC_EXCEPTION: &str = "java/lang/ArithmeticException";
pub const NULL_POINTER_EXCEPTION: &str = "java/lang/NullPointerException";
pub const ARRAY_INDEX_EXCEPTION: &str = "java/lang/ArrayIndexOutOfBoundsException";
pub const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "java/lang/NegativeArraySizeException";
pub const CLASS_CAST_EXCEPTION: &str = "java/lang/ClassCastException";

/// Fields a signal object carries.
pub const SIGNAL_CONTEXT_FIELD: &str = "context";
pub const SIGNAL_PAYLOAD_FIELD: &str = "payload";

/// Everything outside the class being run.
pub trait Host {
    /// Invoked for every call the machine cannot resolve itself.
    fn invoke(
        &mut self,
        heap: &mut Heap,
        kind: InvokeKind,
        method: &MethodRef,
        receiver: Option<Value>,
        args: &[Value],
    ) -> EResult<Option<Value>> {
        let _ = (heap, kind, receiver, args);
        Err(ExecError::NoSuchMethod(format!("{}.{}{}", method.owner, method.name, method.descriptor)))
    }

    /// Direct superclass of a class the machine does not know.
    fn superclass(&self, class: &str) -> Option<String> {
        let _ = class;
        None
    }
}

/// A host that provides nothing.
pub struct NoHost;

impl Host for NoHost {}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Completion {
    Returned(Option<Value>),
    Threw(ObjRef),
}

enum Flow {
    Next,
    Jump(Label),
    JumpTo(usize),
    Return(Option<Value>),
    Throw(ObjRef),
}

fn branch(cond: bool, l: Label) -> Flow {
    if cond {
        Flow::Jump(l)
    } else {
        Flow::Next
    }
}

struct Frame<'m> {
    labels: HashMap<Label, usize>,
    locals: Vec<Option<Value>>,
    stack: Vec<Value>,
    pc: usize,
    method: &'m Method,
}

impl<'m> Frame<'m> {
    fn new(method: &'m Method, args: Vec<Value>) -> Self {
        let labels = method
            .code
            .instrs
            .iter()
            .enumerate()
            .filter_map(|(i, instr)| match instr {
                Instr::Label(l) => Some((*l, i)),
                _ => None,
            })
            .collect();
        let mut frame = Frame {
            labels,
            locals: vec![None; usize::from(method.max_locals)],
            stack: Vec::new(),
            pc: 0,
            method,
        };
        let mut slot: Slot = 0;
        for v in args {
            frame.set_local(slot, v);
            slot += if v.is_wide() { 2 } else { 1 };
        }
        frame
    }

    fn target(&self, l: Label) -> EResult<usize> {
        self.labels.get(&l).copied().ok_or(ExecError::UnknownLabel(l))
    }

    fn push<T: ValCast>(&mut self, v: T) {
        self.stack.push(v.to_val());
    }

    fn push_val(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop_val(&mut self) -> EResult<Value> {
        self.stack.pop().ok_or(ExecError::StackUnderflow)
    }

    fn pop<T: ValCast>(&mut self) -> EResult<T> {
        T::from_val(self.pop_val()?)
    }

    /// Pops `n` values, returned bottom first.
    fn pop_n(&mut self, n: usize) -> EResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(ExecError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    /// Pops the values covering `words` stack words, bottom first.
    fn pop_words(&mut self, words: usize) -> EResult<Vec<Value>> {
        let mut taken = Vec::new();
        let mut n = 0;
        while n < words {
            let v = self.pop_val()?;
            n += if v.is_wide() { 2 } else { 1 };
            if n > words {
                return Err(ExecError::TypeMismatch { expected: "category-1 value", found: v });
            }
            taken.push(v);
        }
        taken.reverse();
        Ok(taken)
    }

    fn dup(&mut self, words: usize, under: usize) -> EResult<()> {
        let top = self.pop_words(words)?;
        let below = self.pop_words(under)?;
        self.stack.extend_from_slice(&top);
        self.stack.extend(below);
        self.stack.extend(top);
        Ok(())
    }

    fn local(&self, slot: Slot) -> EResult<Value> {
        self.locals
            .get(usize::from(slot))
            .copied()
            .flatten()
            .ok_or(ExecError::UnsetLocal(slot))
    }

    fn set_local(&mut self, slot: Slot, v: Value) {
        let s = usize::from(slot);
        let needed = s + if v.is_wide() { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, None);
        }
        // overwriting the upper half kills the wide value below
        if s > 0 && matches!(self.locals[s - 1], Some(w) if w.is_wide()) {
            self.locals[s - 1] = None;
        }
        self.locals[s] = Some(v);
        if v.is_wide() {
            self.locals[s + 1] = None;
        }
    }

    fn load<T: ValCast>(&mut self, slot: Slot) -> EResult<Flow> {
        let v = self.local(slot)?;
        T::from_val(v)?;
        self.stack.push(v);
        Ok(Flow::Next)
    }

    fn store<T: ValCast>(&mut self, slot: Slot) -> EResult<Flow> {
        let v = self.pop_val()?;
        T::from_val(v)?;
        self.set_local(slot, v);
        Ok(Flow::Next)
    }
}

/// References and subroutine return addresses share the `a*` instructions.
fn reference_like(v: Value) -> EResult<Value> {
    match v {
        Value::Ref(_) | Value::ReturnAddress(_) => Ok(v),
        _ => Err(ExecError::TypeMismatch { expected: "reference", found: v }),
    }
}

fn binop<T: ValCast, F: FnOnce(T, T) -> T>(frame: &mut Frame, f: F) -> EResult<Flow> {
    let b = frame.pop::<T>()?;
    let a = frame.pop::<T>()?;
    frame.push(f(a, b));
    Ok(Flow::Next)
}

fn unop<T: ValCast, F: FnOnce(T) -> T>(frame: &mut Frame, f: F) -> EResult<Flow> {
    let a = frame.pop::<T>()?;
    frame.push(f(a));
    Ok(Flow::Next)
}

fn cvtop<T: ValCast, U: ValCast, F: FnOnce(T) -> U>(frame: &mut Frame, f: F) -> EResult<Flow> {
    let a = frame.pop::<T>()?;
    frame.push(f(a));
    Ok(Flow::Next)
}

fn shiftop<T: ValCast, F: FnOnce(T, u32) -> T>(frame: &mut Frame, f: F) -> EResult<Flow> {
    let n = frame.pop::<i32>()?;
    let a = frame.pop::<T>()?;
    frame.push(f(a, n as u32));
    Ok(Flow::Next)
}

fn cmpop<T: ValCast, F: FnOnce(T, T) -> i32>(frame: &mut Frame, f: F) -> EResult<Flow> {
    let b = frame.pop::<T>()?;
    let a = frame.pop::<T>()?;
    frame.push(f(a, b));
    Ok(Flow::Next)
}

fn fcmp<T: PartialOrd>(a: T, b: T, nan: i32) -> i32 {
    if a > b {
        1
    } else if a == b {
        0
    } else if a < b {
        -1
    } else {
        nan
    }
}

fn if_int<F: FnOnce(i32) -> bool>(frame: &mut Frame, l: Label, f: F) -> EResult<Flow> {
    let a = frame.pop::<i32>()?;
    Ok(branch(f(a), l))
}

fn if_icmp<F: FnOnce(i32, i32) -> bool>(frame: &mut Frame, l: Label, f: F) -> EResult<Flow> {
    let b = frame.pop::<i32>()?;
    let a = frame.pop::<i32>()?;
    Ok(branch(f(a, b), l))
}

fn arg<T: ValCast>(args: &[Value], i: usize) -> EResult<T> {
    T::from_val(*args.get(i).ok_or(ExecError::StackUnderflow)?)
}

fn arg_val(args: &[Value], i: usize) -> EResult<Value> {
    args.get(i).copied().ok_or(ExecError::StackUnderflow)
}

fn method_name(m: &MethodRef) -> String {
    format!("{}.{}{}", m.owner, m.name, m.descriptor)
}

/// Superclasses the machine knows without asking the host.
fn builtin_superclass(class: &str) -> Option<&'static str> {
    if signal_kind(class).is_some() {
        return Some(SIGNAL_CLASS);
    }
    if class == SIGNAL_CLASS {
        return Some(SIGNAL_SUPERCLASSES[0]);
    }
    if let Some(i) = SIGNAL_SUPERCLASSES.iter().position(|c| *c == class) {
        return SIGNAL_SUPERCLASSES.get(i + 1).copied();
    }
    match class {
        ARITHMETIC_EXCEPTION | NULL_POINTER_EXCEPTION | NEGATIVE_ARRAY_SIZE_EXCEPTION | CLASS_CAST_EXCEPTION
        | "java/lang/IndexOutOfBoundsException" => Some(SIGNAL_SUPERCLASSES[0]),
        ARRAY_INDEX_EXCEPTION => Some("java/lang/IndexOutOfBoundsException"),
        "java/lang/Error" => Some(THROWABLE_CLASS),
        _ => None,
    }
}

enum StackView {
    Vars,
    Stack,
}

/// Interpreter state shared by every frame of one run.
#[derive(Default)]
pub struct Machine {
    pub heap: Heap,
    pub contexts: ContextManager,
    statics: HashMap<(String, String), Value>,
    fuel: Option<u64>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the number of instructions executed from now on. `None` lifts
    /// the limit.
    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel;
    }

    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    pub fn static_field(&self, owner: &str, name: &str) -> Option<Value> {
        self.statics.get(&(owner.to_string(), name.to_string())).copied()
    }

    fn burn(&mut self) -> EResult<()> {
        if let Some(fuel) = &mut self.fuel {
            if *fuel == 0 {
                return Err(ExecError::OutOfFuel);
            }
            *fuel -= 1;
        }
        Ok(())
    }

    fn throw(&mut self, class: &str) -> Flow {
        Flow::Throw(self.heap.alloc(Object::instance(class)))
    }

    pub fn instance_of(&self, r: ObjRef, target: &str, host: &dyn Host) -> EResult<bool> {
        if target == OBJECT_CLASS {
            return Ok(true);
        }
        let mut class = self.heap.class_of(r)?.to_string();
        loop {
            if class == target {
                return Ok(true);
            }
            let next = match builtin_superclass(&class) {
                Some(s) => Some(s.to_string()),
                None if class == OBJECT_CLASS => None,
                None => host.superclass(&class).or_else(|| Some(OBJECT_CLASS.to_string())),
            };
            match next {
                Some(next) => class = next,
                None => return Ok(false),
            }
        }
    }

    /// Runs `method` of `class` to completion. `args` fills the local slots
    /// from slot 0, receiver first.
    pub fn execute(
        &mut self,
        class: &Class,
        method: &Method,
        args: Vec<Value>,
        host: &mut dyn Host,
    ) -> EResult<Completion> {
        trace!(class = %class.name, method = %method.name, "enter");
        let mut frame = Frame::new(method, args);
        loop {
            self.burn()?;
            let at = frame.pc;
            let instr = method.code.instrs.get(at).ok_or(ExecError::FellOffEnd)?;
            frame.pc += 1;
            trace!(at, ?instr, depth = frame.stack.len(), "step");

            match self.step(class, &mut frame, instr, host)? {
                Flow::Next => {}
                Flow::Jump(l) => frame.pc = frame.target(l)?,
                Flow::JumpTo(pc) => frame.pc = pc,
                Flow::Return(v) => return Ok(Completion::Returned(v)),
                Flow::Throw(exc) => match self.handler_for(&frame, at, exc, &*host)? {
                    Some(pc) => {
                        frame.stack.clear();
                        frame.push_val(Value::from(exc));
                        frame.pc = pc;
                    }
                    None => {
                        trace!(method = %method.name, at, "exception leaves frame");
                        return Ok(Completion::Threw(exc));
                    }
                },
            }
        }
    }

    fn handler_for(&self, frame: &Frame, at: usize, exc: ObjRef, host: &dyn Host) -> EResult<Option<usize>> {
        for t in &frame.method.code.try_catch {
            if !(frame.target(t.start)? <= at && at < frame.target(t.end)?) {
                continue;
            }
            let caught = match &t.catch_type {
                None => true,
                Some(c) => self.instance_of(exc, c, host)?,
            };
            if caught {
                return Ok(Some(frame.target(t.handler)?));
            }
        }
        Ok(None)
    }

    fn div<T: ValCast, F: FnOnce(T, T) -> Option<T>>(&mut self, frame: &mut Frame, f: F) -> EResult<Flow> {
        let b = frame.pop::<T>()?;
        let a = frame.pop::<T>()?;
        match f(a, b) {
            Some(v) => {
                frame.push(v);
                Ok(Flow::Next)
            }
            None => Ok(self.throw(ARITHMETIC_EXCEPTION)),
        }
    }

    fn array_load(&mut self, frame: &mut Frame) -> EResult<Flow> {
        let index = frame.pop::<i32>()?;
        let arr = match frame.pop::<Option<ObjRef>>()? {
            Some(arr) => arr,
            None => return Ok(self.throw(NULL_POINTER_EXCEPTION)),
        };
        let v = match self.heap.get(arr)? {
            Object::Array { elems, .. } => usize::try_from(index).ok().and_then(|i| elems.get(i)).copied(),
            _ => return Err(ExecError::TypeMismatch { expected: "array", found: Value::from(arr) }),
        };
        match v {
            Some(v) => {
                frame.push_val(v);
                Ok(Flow::Next)
            }
            None => Ok(self.throw(ARRAY_INDEX_EXCEPTION)),
        }
    }

    /// `narrow` receives the array descriptor and the value to store.
    fn array_store<F>(&mut self, frame: &mut Frame, narrow: F) -> EResult<Flow>
    where
        F: FnOnce(&str, Value) -> EResult<Value>,
    {
        let v = frame.pop_val()?;
        let index = frame.pop::<i32>()?;
        let arr = match frame.pop::<Option<ObjRef>>()? {
            Some(arr) => arr,
            None => return Ok(self.throw(NULL_POINTER_EXCEPTION)),
        };
        let stored = match self.heap.get_mut(arr)? {
            Object::Array { descriptor, elems } => {
                let v = narrow(descriptor.as_str(), v)?;
                match usize::try_from(index).ok().and_then(|i| elems.get_mut(i)) {
                    Some(slot) => {
                        *slot = v;
                        true
                    }
                    None => false,
                }
            }
            _ => return Err(ExecError::TypeMismatch { expected: "array", found: Value::from(arr) }),
        };
        if stored {
            Ok(Flow::Next)
        } else {
            Ok(self.throw(ARRAY_INDEX_EXCEPTION))
        }
    }

    fn new_array(&mut self, descriptor: &str, counts: &[i32]) -> EResult<ObjRef> {
        let component = descriptor
            .strip_prefix('[')
            .ok_or_else(|| DescriptorError(descriptor.to_string()))?;
        let n = usize::try_from(counts[0]).unwrap_or(0);
        let elems = if counts.len() > 1 {
            (0..n)
                .map(|_| self.new_array(component, &counts[1..]).map(Value::from))
                .collect::<EResult<Vec<_>>>()?
        } else {
            vec![Value::default_for(&parse_field_type(component)?); n]
        };
        Ok(self.heap.alloc(Object::Array { descriptor: descriptor.to_string(), elems }))
    }

    fn alloc_array(&mut self, frame: &mut Frame, descriptor: &str, dims: usize) -> EResult<Flow> {
        let counts = frame
            .pop_n(dims)?
            .into_iter()
            .map(i32::from_val)
            .collect::<EResult<Vec<_>>>()?;
        if counts.is_empty() || counts.iter().any(|&c| c < 0) {
            return Ok(self.throw(NEGATIVE_ARRAY_SIZE_EXCEPTION));
        }
        let arr = self.new_array(descriptor, &counts)?;
        frame.push_val(Value::from(arr));
        Ok(Flow::Next)
    }

    fn contract_call(&mut self, m: &MethodRef, receiver: Option<Value>, args: &[Value]) -> EResult<Option<Value>> {
        if contract::CREATE_OR_RESET_CONTEXT.matches(m) {
            let id = self.contexts.create_or_reset();
            return Ok(Some(Value::from(self.heap.context_handle(id, ContextView::Context))));
        }
        let target = match receiver {
            Some(Value::Ref(Some(r))) => r,
            Some(v) => return Err(ExecError::TypeMismatch { expected: "reference", found: v }),
            None => return Err(ExecError::NoSuchMethod(method_name(m))),
        };
        let (id, view) = match *self.heap.get(target)? {
            Object::Context(id) => (id, None),
            Object::LocalVars(id) => (id, Some(StackView::Vars)),
            Object::LocalStack(id) => (id, Some(StackView::Stack)),
            _ => return Err(ExecError::TypeMismatch { expected: "context", found: Value::from(target) }),
        };
        let view = match view {
            Some(view) => view,
            None => return self.context_call(id, m, args),
        };
        let ctx = self.contexts.get_mut(id)?;
        let store = match view {
            StackView::Vars => &mut ctx.local_vars,
            StackView::Stack => &mut ctx.local_stack,
        };
        stack_call(store, m, args)
    }

    fn context_call(&mut self, id: ContextId, m: &MethodRef, args: &[Value]) -> EResult<Option<Value>> {
        let result = match m.name.as_str() {
            "getLabel" => Some(Value::Int(self.contexts.get(id)?.label)),
            "setLabel" => {
                self.contexts.get_mut(id)?.label = arg(args, 0)?;
                None
            }
            "clearLabel" => {
                self.contexts.get_mut(id)?.label = NO_LABEL;
                None
            }
            "getLocalVars" => {
                self.contexts.get(id)?;
                Some(Value::from(self.heap.context_handle(id, ContextView::LocalVars)))
            }
            "getLocalStack" => {
                self.contexts.get(id)?;
                Some(Value::from(self.heap.context_handle(id, ContextView::LocalStack)))
            }
            "registerContext" => {
                self.contexts.register(id)?;
                None
            }
            "deactivate" => {
                self.contexts.deactivate(id);
                None
            }
            "getCallAnswer" => Some(self.contexts.get_mut(id)?.call_answer.take().unwrap_or(Value::NULL)),
            _ => return Err(ExecError::NoSuchMethod(method_name(m))),
        };
        Ok(result)
    }

    fn invoke(
        &mut self,
        class: &Class,
        frame: &mut Frame,
        kind: InvokeKind,
        m: &MethodRef,
        host: &mut dyn Host,
    ) -> EResult<Flow> {
        let sig = MethodDescriptor::parse(&m.descriptor)?;
        let args = frame.pop_n(sig.params.len())?;
        let receiver = if kind.has_receiver() { Some(frame.pop_val()?) } else { None };
        if receiver == Some(Value::NULL) {
            return Ok(self.throw(NULL_POINTER_EXCEPTION));
        }

        let local = if m.owner == class.name { class.method(&m.name, &m.descriptor) } else { None };
        let completion = if m.owner == CONTEXT_CLASS || m.owner == STACK_CLASS {
            Completion::Returned(self.contract_call(m, receiver, &args)?)
        } else if let Some(callee) = local.filter(|c| !c.code.instrs.is_empty()) {
            let mut callee_args: Vec<Value> = receiver.into_iter().collect();
            callee_args.extend(args);
            self.execute(class, callee, callee_args, host)?
        } else if m.name == SIGNAL_INIT {
            // foreign constructors only record signal payloads
            if let (Some(Value::Ref(Some(obj))), Some(_)) = (receiver, signal_kind(&m.owner)) {
                self.heap.set_field(obj, SIGNAL_CONTEXT_FIELD, arg_val(&args, 0)?)?;
                if let Some(&payload) = args.get(1) {
                    self.heap.set_field(obj, SIGNAL_PAYLOAD_FIELD, payload)?;
                }
            }
            Completion::Returned(None)
        } else {
            Completion::Returned(host.invoke(&mut self.heap, kind, m, receiver, &args)?)
        };

        match completion {
            Completion::Returned(v) => {
                if let Some(ret) = sig.ret {
                    frame.push_val(v.unwrap_or_else(|| Value::default_for(&ret)));
                }
                Ok(Flow::Next)
            }
            Completion::Threw(exc) => Ok(Flow::Throw(exc)),
        }
    }

    fn step(&mut self, class: &Class, frame: &mut Frame, instr: &Instr, host: &mut dyn Host) -> EResult<Flow> {
        use self::Instr::*;

        let flow = match instr {
            Nop | Label(_) => Flow::Next,
            AConstNull => {
                frame.push_val(Value::NULL);
                Flow::Next
            }
            IConst(v) => {
                frame.push(*v);
                Flow::Next
            }
            LConst(v) => {
                frame.push(*v);
                Flow::Next
            }
            FConst(v) => {
                frame.push(*v);
                Flow::Next
            }
            DConst(v) => {
                frame.push(*v);
                Flow::Next
            }
            BiPush(v) => {
                frame.push(i32::from(*v));
                Flow::Next
            }
            SiPush(v) => {
                frame.push(i32::from(*v));
                Flow::Next
            }
            Ldc(c) => {
                let v = match c {
                    Constant::Int(v) => Value::Int(*v),
                    Constant::Float(v) => Value::Float(*v),
                    Constant::Long(v) => Value::Long(*v),
                    Constant::Double(v) => Value::Double(*v),
                    Constant::String(s) => Value::from(self.heap.intern(s)),
                    Constant::Class(c) => Value::from(self.heap.alloc(Object::Class(c.clone()))),
                };
                frame.push_val(v);
                Flow::Next
            }

            ILoad(s) => frame.load::<i32>(*s)?,
            LLoad(s) => frame.load::<i64>(*s)?,
            FLoad(s) => frame.load::<f32>(*s)?,
            DLoad(s) => frame.load::<f64>(*s)?,
            ALoad(s) => {
                let v = reference_like(frame.local(*s)?)?;
                frame.push_val(v);
                Flow::Next
            }
            IStore(s) => frame.store::<i32>(*s)?,
            LStore(s) => frame.store::<i64>(*s)?,
            FStore(s) => frame.store::<f32>(*s)?,
            DStore(s) => frame.store::<f64>(*s)?,
            AStore(s) => {
                let v = reference_like(frame.pop_val()?)?;
                frame.set_local(*s, v);
                Flow::Next
            }
            IInc(s, by) => {
                let v = i32::from_val(frame.local(*s)?)?;
                frame.set_local(*s, Value::Int(v.wrapping_add(i32::from(*by))));
                Flow::Next
            }

            IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad => self.array_load(frame)?,
            IAStore | AAStore => self.array_store(frame, |_, v| Ok(v))?,
            LAStore => self.array_store(frame, |_, v| i64::from_val(v).map(Value::Long))?,
            FAStore => self.array_store(frame, |_, v| f32::from_val(v).map(Value::Float))?,
            DAStore => self.array_store(frame, |_, v| f64::from_val(v).map(Value::Double))?,
            BAStore => self.array_store(frame, |desc, v| {
                let v = i32::from_val(v)?;
                Ok(Value::Int(if desc == "[Z" { v & 1 } else { i32::from(v as i8) }))
            })?,
            CAStore => self.array_store(frame, |_, v| Ok(Value::Int(i32::from(i32::from_val(v)? as u16))))?,
            SAStore => self.array_store(frame, |_, v| Ok(Value::Int(i32::from(i32::from_val(v)? as i16))))?,
            NewArray(kind) => self.alloc_array(frame, kind.descriptor(), 1)?,
            ANewArray(c) => self.alloc_array(frame, &array_of(c), 1)?,
            MultiANewArray(desc, dims) => self.alloc_array(frame, desc, usize::from(*dims))?,
            ArrayLength => match frame.pop::<Option<ObjRef>>()? {
                None => self.throw(NULL_POINTER_EXCEPTION),
                Some(arr) => match self.heap.get(arr)? {
                    Object::Array { elems, .. } => {
                        frame.push(elems.len() as i32);
                        Flow::Next
                    }
                    _ => return Err(ExecError::TypeMismatch { expected: "array", found: Value::from(arr) }),
                },
            },

            Pop => {
                frame.pop_words(1)?;
                Flow::Next
            }
            Pop2 => {
                frame.pop_words(2)?;
                Flow::Next
            }
            Dup => {
                frame.dup(1, 0)?;
                Flow::Next
            }
            DupX1 => {
                frame.dup(1, 1)?;
                Flow::Next
            }
            DupX2 => {
                frame.dup(1, 2)?;
                Flow::Next
            }
            Dup2 => {
                frame.dup(2, 0)?;
                Flow::Next
            }
            Dup2X1 => {
                frame.dup(2, 1)?;
                Flow::Next
            }
            Dup2X2 => {
                frame.dup(2, 2)?;
                Flow::Next
            }
            Swap => {
                let b = frame.pop_val()?;
                let a = frame.pop_val()?;
                frame.push_val(b);
                frame.push_val(a);
                Flow::Next
            }

            IAdd => binop(frame, i32::wrapping_add)?,
            LAdd => binop(frame, i64::wrapping_add)?,
            FAdd => binop(frame, |a: f32, b| a + b)?,
            DAdd => binop(frame, |a: f64, b| a + b)?,
            ISub => binop(frame, i32::wrapping_sub)?,
            LSub => binop(frame, i64::wrapping_sub)?,
            FSub => binop(frame, |a: f32, b| a - b)?,
            DSub => binop(frame, |a: f64, b| a - b)?,
            IMul => binop(frame, i32::wrapping_mul)?,
            LMul => binop(frame, i64::wrapping_mul)?,
            FMul => binop(frame, |a: f32, b| a * b)?,
            DMul => binop(frame, |a: f64, b| a * b)?,
            IDiv => self.div(frame, |a: i32, b| if b == 0 { None } else { Some(a.wrapping_div(b)) })?,
            LDiv => self.div(frame, |a: i64, b| if b == 0 { None } else { Some(a.wrapping_div(b)) })?,
            FDiv => binop(frame, |a: f32, b| a / b)?,
            DDiv => binop(frame, |a: f64, b| a / b)?,
            IRem => self.div(frame, |a: i32, b| if b == 0 { None } else { Some(a.wrapping_rem(b)) })?,
            LRem => self.div(frame, |a: i64, b| if b == 0 { None } else { Some(a.wrapping_rem(b)) })?,
            FRem => binop(frame, |a: f32, b| a % b)?,
            DRem => binop(frame, |a: f64, b| a % b)?,
            INeg => unop(frame, i32::wrapping_neg)?,
            LNeg => unop(frame, i64::wrapping_neg)?,
            FNeg => unop(frame, |a: f32| -a)?,
            DNeg => unop(frame, |a: f64| -a)?,
            IShl => shiftop(frame, i32::wrapping_shl)?,
            LShl => shiftop(frame, i64::wrapping_shl)?,
            IShr => shiftop(frame, i32::wrapping_shr)?,
            LShr => shiftop(frame, i64::wrapping_shr)?,
            IUShr => shiftop(frame, |a: i32, n| (a as u32).wrapping_shr(n) as i32)?,
            LUShr => shiftop(frame, |a: i64, n| (a as u64).wrapping_shr(n) as i64)?,
            IAnd => binop(frame, |a: i32, b| a & b)?,
            LAnd => binop(frame, |a: i64, b| a & b)?,
            IOr => binop(frame, |a: i32, b| a | b)?,
            LOr => binop(frame, |a: i64, b| a | b)?,
            IXor => binop(frame, |a: i32, b| a ^ b)?,
            LXor => binop(frame, |a: i64, b| a ^ b)?,

            I2L => cvtop(frame, |a: i32| i64::from(a))?,
            I2F => cvtop(frame, |a: i32| a as f32)?,
            I2D => cvtop(frame, |a: i32| f64::from(a))?,
            L2I => cvtop(frame, |a: i64| a as i32)?,
            L2F => cvtop(frame, |a: i64| a as f32)?,
            L2D => cvtop(frame, |a: i64| a as f64)?,
            F2I => cvtop(frame, |a: f32| a as i32)?,
            F2L => cvtop(frame, |a: f32| a as i64)?,
            F2D => cvtop(frame, |a: f32| f64::from(a))?,
            D2I => cvtop(frame, |a: f64| a as i32)?,
            D2L => cvtop(frame, |a: f64| a as i64)?,
            D2F => cvtop(frame, |a: f64| a as f32)?,
            I2B => unop(frame, |a: i32| i32::from(a as i8))?,
            I2C => unop(frame, |a: i32| i32::from(a as u16))?,
            I2S => unop(frame, |a: i32| i32::from(a as i16))?,

            LCmp => cmpop(frame, |a: i64, b| a.cmp(&b) as i32)?,
            FCmpL => cmpop(frame, |a: f32, b| fcmp(a, b, -1))?,
            FCmpG => cmpop(frame, |a: f32, b| fcmp(a, b, 1))?,
            DCmpL => cmpop(frame, |a: f64, b| fcmp(a, b, -1))?,
            DCmpG => cmpop(frame, |a: f64, b| fcmp(a, b, 1))?,

            IfEq(l) => if_int(frame, *l, |a| a == 0)?,
            IfNe(l) => if_int(frame, *l, |a| a != 0)?,
            IfLt(l) => if_int(frame, *l, |a| a < 0)?,
            IfGe(l) => if_int(frame, *l, |a| a >= 0)?,
            IfGt(l) => if_int(frame, *l, |a| a > 0)?,
            IfLe(l) => if_int(frame, *l, |a| a <= 0)?,
            IfICmpEq(l) => if_icmp(frame, *l, |a, b| a == b)?,
            IfICmpNe(l) => if_icmp(frame, *l, |a, b| a != b)?,
            IfICmpLt(l) => if_icmp(frame, *l, |a, b| a < b)?,
            IfICmpGe(l) => if_icmp(frame, *l, |a, b| a >= b)?,
            IfICmpGt(l) => if_icmp(frame, *l, |a, b| a > b)?,
            IfICmpLe(l) => if_icmp(frame, *l, |a, b| a <= b)?,
            IfACmpEq(l) | IfACmpNe(l) => {
                let b = frame.pop::<Option<ObjRef>>()?;
                let a = frame.pop::<Option<ObjRef>>()?;
                branch((a == b) == matches!(instr, IfACmpEq(_)), *l)
            }
            IfNull(l) => branch(frame.pop::<Option<ObjRef>>()?.is_none(), *l),
            IfNonNull(l) => branch(frame.pop::<Option<ObjRef>>()?.is_some(), *l),
            Goto(l) => Flow::Jump(*l),
            Jsr(l) => {
                frame.push_val(Value::ReturnAddress(frame.pc));
                Flow::Jump(*l)
            }
            Ret(s) => match frame.local(*s)? {
                Value::ReturnAddress(pc) => Flow::JumpTo(pc),
                v => return Err(ExecError::TypeMismatch { expected: "return address", found: v }),
            },
            TableSwitch { low, high, default, targets } => {
                let key = frame.pop::<i32>()?;
                let target = if (*low..=*high).contains(&key) {
                    targets.get((i64::from(key) - i64::from(*low)) as usize).copied()
                } else {
                    None
                };
                Flow::Jump(target.unwrap_or(*default))
            }
            LookupSwitch { default, pairs } => {
                let key = frame.pop::<i32>()?;
                let target = pairs.iter().find(|&&(k, _)| k == key).map(|&(_, l)| l);
                Flow::Jump(target.unwrap_or(*default))
            }
            IReturn => Flow::Return(Some(frame.pop::<i32>()?.to_val())),
            LReturn => Flow::Return(Some(frame.pop::<i64>()?.to_val())),
            FReturn => Flow::Return(Some(frame.pop::<f32>()?.to_val())),
            DReturn => Flow::Return(Some(frame.pop::<f64>()?.to_val())),
            AReturn => Flow::Return(Some(frame.pop::<Option<ObjRef>>()?.to_val())),
            Return => Flow::Return(None),

            GetStatic(f) => {
                let key = (f.owner.clone(), f.name.clone());
                let v = match self.statics.get(&key) {
                    Some(v) => *v,
                    None => Value::default_for(&parse_field_type(&f.descriptor)?),
                };
                frame.push_val(v);
                Flow::Next
            }
            PutStatic(f) => {
                let v = frame.pop_val()?;
                self.statics.insert((f.owner.clone(), f.name.clone()), v);
                Flow::Next
            }
            GetField(f) => match frame.pop::<Option<ObjRef>>()? {
                None => self.throw(NULL_POINTER_EXCEPTION),
                Some(obj) => {
                    let v = match self.heap.field(obj, &f.name) {
                        Some(v) => v,
                        None => Value::default_for(&parse_field_type(&f.descriptor)?),
                    };
                    frame.push_val(v);
                    Flow::Next
                }
            },
            PutField(f) => {
                let v = frame.pop_val()?;
                match frame.pop::<Option<ObjRef>>()? {
                    None => self.throw(NULL_POINTER_EXCEPTION),
                    Some(obj) => {
                        self.heap.set_field(obj, &f.name, v)?;
                        Flow::Next
                    }
                }
            }
            InvokeVirtual(m) => self.invoke(class, frame, InvokeKind::Virtual, m, host)?,
            InvokeSpecial(m) => self.invoke(class, frame, InvokeKind::Special, m, host)?,
            InvokeStatic(m) => self.invoke(class, frame, InvokeKind::Static, m, host)?,
            InvokeInterface(m) => self.invoke(class, frame, InvokeKind::Interface, m, host)?,
            InvokeDynamic { name, descriptor } => {
                let m = MethodRef::new("", name.as_str(), descriptor.as_str());
                let sig = MethodDescriptor::parse(descriptor)?;
                let args = frame.pop_n(sig.params.len())?;
                let v = host.invoke(&mut self.heap, InvokeKind::Static, &m, None, &args)?;
                if let Some(ret) = sig.ret {
                    frame.push_val(v.unwrap_or_else(|| Value::default_for(&ret)));
                }
                Flow::Next
            }
            New(c) => {
                let obj = self.heap.alloc(Object::instance(c.as_str()));
                frame.push_val(Value::from(obj));
                Flow::Next
            }
            AThrow => match frame.pop::<Option<ObjRef>>()? {
                Some(exc) => Flow::Throw(exc),
                None => self.throw(NULL_POINTER_EXCEPTION),
            },
            CheckCast(c) => {
                let v = frame.pop::<Option<ObjRef>>()?;
                match v {
                    Some(obj) if !self.instance_of(obj, c, &*host)? => self.throw(CLASS_CAST_EXCEPTION),
                    _ => {
                        frame.push(v);
                        Flow::Next
                    }
                }
            }
            InstanceOf(c) => {
                let is = match frame.pop::<Option<ObjRef>>()? {
                    Some(obj) => self.instance_of(obj, c, &*host)?,
                    None => false,
                };
                frame.push(i32::from(is));
                Flow::Next
            }
            MonitorEnter | MonitorExit => match frame.pop::<Option<ObjRef>>()? {
                Some(_) => Flow::Next,
                None => self.throw(NULL_POINTER_EXCEPTION),
            },
        };
        Ok(flow)
    }
}

fn stack_call(store: &mut ContinuationStack, m: &MethodRef, args: &[Value]) -> EResult<Option<Value>> {
    let result = match m.name.as_str() {
        "storeInt" => {
            store.store_int(arg(args, 0)?, arg(args, 1)?);
            None
        }
        "storeLong" => {
            store.store_long(arg(args, 0)?, arg(args, 1)?);
            None
        }
        "storeFloat" => {
            store.store_float(arg(args, 0)?, arg(args, 1)?);
            None
        }
        "storeDouble" => {
            store.store_double(arg(args, 0)?, arg(args, 1)?);
            None
        }
        "storeReference" => {
            store.store_value(arg(args, 0)?, reference_like(arg_val(args, 1)?)?);
            None
        }
        "incrementInt" => {
            store.increment_int(arg(args, 0)?, arg(args, 1)?);
            None
        }
        "getInt" => Some(Value::Int(store.get_int(arg(args, 0)?))),
        "getLong" => Some(Value::Long(store.get_long(arg(args, 0)?))),
        "getFloat" => Some(Value::Float(store.get_float(arg(args, 0)?))),
        "getDouble" => Some(Value::Double(store.get_double(arg(args, 0)?))),
        "getReference" => Some(match store.slot(arg(args, 0)?) {
            Some(v @ Value::Ref(_)) | Some(v @ Value::ReturnAddress(_)) => v,
            _ => Value::NULL,
        }),
        "pushInt" => {
            store.push_int(arg(args, 0)?);
            None
        }
        "pushLong" => {
            store.push_long(arg(args, 0)?);
            None
        }
        "pushFloat" => {
            store.push_float(arg(args, 0)?);
            None
        }
        "pushDouble" => {
            store.push_double(arg(args, 0)?);
            None
        }
        "pushReference" => {
            store.push_value(reference_like(arg_val(args, 0)?)?);
            None
        }
        "popInt" => Some(Value::Int(store.pop_int())),
        "popLong" => Some(Value::Long(store.pop_long())),
        "popFloat" => Some(Value::Float(store.pop_float())),
        "popDouble" => Some(Value::Double(store.pop_double())),
        "popReference" => Some(Value::Ref(store.pop_reference())),
        _ => return Err(ExecError::NoSuchMethod(method_name(m))),
    };
    Ok(result)
}
