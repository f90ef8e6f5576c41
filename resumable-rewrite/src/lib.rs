//! Rewrites one method so it can be suspended at its pause, step-back and
//! call sites and re-entered at the same point later.
//!
//! Layout of the rewritten stream:
//!
//! ```text
//! prologue:   ctx = createOrResetContext(this | null)
//!             tableswitch ctx.getLabel() -> resume_0 .. resume_N-1, default start
//! start:      mirror parameters into ctx.getLocalVars()
//!             <original code, every local store mirrored>
//! site k:     save operand stack, ctx.setLabel(k), throw signal
//! resume_k:   ctx.clearLabel(), restore locals, restore operand stack
//! return:     ctx.registerContext(), ctx.deactivate(), return
//! handler:    dup, instanceof ControlFlowSignal, ifne rethrow
//! rethrow:    athrow
//! ```

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;
use tracing::debug;

use resumable_analysis::{Metrics, ShapeAnalysis, TypeSnapshot};
use resumable_structure::classes::{Code, Method};
use resumable_structure::config::{CallKind, InstrumentConfig};
use resumable_structure::contract::{self, slot_ops, ContractMethod, SlotOps};
use resumable_structure::descriptors::{DescriptorError, MethodDescriptor};
use resumable_structure::instructions::{Constant, Instr, InvokeKind, Label, MethodRef};
use resumable_structure::types::{Category, Slot, SlotKind, TypeTag};

pub type RResult<T> = Result<T, RewriteError>;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum RewriteError {
    #[error("value of type {ty} at suspension site {site} cannot be captured")]
    UncapturableValue { site: usize, ty: TypeTag },
    #[error("metrics counted {expected} suspension sites but the shape analysis has {found} snapshots")]
    SnapshotCountMismatch { expected: usize, found: usize },
    #[error("call answers must be references, the configured call returns {0}")]
    PrimitiveCallAnswer(TypeTag),
    #[error("call sites take exactly one reference target, the configured call is {0}")]
    UnsupportedCallDescriptor(String),
    #[error("no room for the context slots above local {0}")]
    TooManyLocals(u16),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Local slots the rewritten code reserves above the method's own.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReservedSlots {
    pub context: Slot,
    pub call_target: Slot,
    pub answer: Slot,
    /// Two wide, holds one stack value while it is saved.
    pub temp: Slot,
}

impl ReservedSlots {
    pub fn above(base: u16) -> RResult<Self> {
        match base.checked_add(5) {
            Some(_) => Ok(ReservedSlots {
                context: base,
                call_target: base + 1,
                answer: base + 2,
                temp: base + 3,
            }),
            None => Err(RewriteError::TooManyLocals(base)),
        }
    }

    pub fn max_locals(&self) -> u16 {
        self.temp + 2
    }
}

fn load(kind: SlotKind, slot: Slot) -> Instr {
    match kind {
        SlotKind::Int => Instr::ILoad(slot),
        SlotKind::Long => Instr::LLoad(slot),
        SlotKind::Float => Instr::FLoad(slot),
        SlotKind::Double => Instr::DLoad(slot),
        SlotKind::Reference | SlotKind::ReturnAddress => Instr::ALoad(slot),
    }
}

fn store(kind: SlotKind, slot: Slot) -> Instr {
    match kind {
        SlotKind::Int => Instr::IStore(slot),
        SlotKind::Long => Instr::LStore(slot),
        SlotKind::Float => Instr::FStore(slot),
        SlotKind::Double => Instr::DStore(slot),
        SlotKind::Reference | SlotKind::ReturnAddress => Instr::AStore(slot),
    }
}

/// Shortest instruction pushing the int `v`.
pub fn push_int(v: i32) -> Instr {
    if (-1..=5).contains(&v) {
        Instr::IConst(v)
    } else if let Ok(b) = i8::try_from(v) {
        Instr::BiPush(b)
    } else if let Ok(s) = i16::try_from(v) {
        Instr::SiPush(s)
    } else {
        Instr::Ldc(Constant::Int(v))
    }
}

fn invoke(m: ContractMethod) -> Instr {
    Instr::InvokeVirtual(m.to_ref())
}

pub struct Rewriter<'a> {
    class_name: &'a str,
    method: &'a Method,
    config: &'a InstrumentConfig,
    shape: &'a ShapeAnalysis,
    slots: ReservedSlots,
    handlers: HashSet<Label>,
    resume_labels: Vec<Label>,
    start: Label,
    rethrow: Option<Label>,
    next_label: u32,
    site: usize,
    out: Vec<Instr>,
}

impl<'a> Rewriter<'a> {
    pub fn new(
        class_name: &'a str,
        method: &'a Method,
        config: &'a InstrumentConfig,
        metrics: &'a Metrics,
        shape: &'a ShapeAnalysis,
    ) -> RResult<Self> {
        if shape.suspensions.len() != metrics.suspension_count {
            return Err(RewriteError::SnapshotCountMismatch {
                expected: metrics.suspension_count,
                found: shape.suspensions.len(),
            });
        }
        let slots = ReservedSlots::above(method.max_locals.max(metrics.max_locals))?;

        let mut rewriter = Rewriter {
            class_name,
            method,
            config,
            shape,
            slots,
            handlers: method.code.try_catch.iter().map(|t| t.handler).collect(),
            resume_labels: Vec::new(),
            start: Label(0),
            rethrow: None,
            next_label: method.code.max_label().map_or(0, |n| n + 1),
            site: 0,
            out: Vec::new(),
        };
        rewriter.start = rewriter.fresh_label();
        let resume_labels: Vec<Label> = (0..metrics.suspension_count).map(|_| rewriter.fresh_label()).collect();
        rewriter.resume_labels = resume_labels;
        Ok(rewriter)
    }

    fn fresh_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    fn emit(&mut self, instr: Instr) {
        self.out.push(instr);
    }

    fn rethrow_label(&mut self) -> Label {
        match self.rethrow {
            Some(l) => l,
            None => {
                let l = self.fresh_label();
                self.rethrow = Some(l);
                l
            }
        }
    }

    pub fn rewrite(mut self) -> RResult<Method> {
        self.prologue()?;

        let (method, shape) = (self.method, self.shape);
        for (at, instr) in method.code.instrs.iter().enumerate() {
            if let Instr::Label(l) = instr {
                self.emit(instr.clone());
                if self.handlers.contains(l) {
                    self.signal_check();
                }
                continue;
            }
            if instr.is_return() {
                self.deregister();
                self.emit(instr.clone());
                continue;
            }

            let site = instr
                .invocation()
                .and_then(|(kind, m)| self.config.classify(self.class_name, m).map(|call| (kind, call, m)));
            match site {
                Some((kind, CallKind::Answer, m)) => self.answer(kind, m)?,
                Some((kind, call, _)) => self.suspend(kind, call)?,
                None => {
                    self.emit(instr.clone());
                    self.mirror(instr);
                    if let Some(handler) = shape.retype_at.get(&at) {
                        if let Some(snapshot) = shape.label(*handler) {
                            self.restore_locals(self.site, &snapshot.types.locals)?;
                        }
                    }
                }
            }
        }

        if let Some(rethrow) = self.rethrow {
            self.emit(Instr::Label(rethrow));
            self.emit(Instr::AThrow);
        }

        debug!(
            class = self.class_name,
            method = %self.method.name,
            before = self.method.code.instrs.len(),
            after = self.out.len(),
            "rewrote method"
        );
        Ok(Method {
            access: self.method.access,
            name: self.method.name.clone(),
            descriptor: self.method.descriptor.clone(),
            max_locals: self.slots.max_locals(),
            code: Code {
                instrs: self.out,
                try_catch: self.method.code.try_catch.clone(),
            },
        })
    }

    fn prologue(&mut self) -> RResult<()> {
        let ctx = self.slots.context;
        self.emit(if self.method.is_static() { Instr::AConstNull } else { Instr::ALoad(0) });
        self.emit(Instr::InvokeStatic(contract::CREATE_OR_RESET_CONTEXT.to_ref()));
        self.emit(Instr::AStore(ctx));

        if !self.resume_labels.is_empty() {
            self.emit(Instr::ALoad(ctx));
            self.emit(invoke(contract::GET_LABEL));
            self.emit(Instr::TableSwitch {
                low: 0,
                high: self.resume_labels.len() as i32 - 1,
                default: self.start,
                targets: self.resume_labels.clone(),
            });
        }
        self.emit(Instr::Label(self.start));

        // parameters never pass through a store, mirror them once up front
        let mut slot: Slot = if self.method.is_static() { 0 } else { 1 };
        for param in self.method.signature()?.params {
            let kind = param.kind();
            self.mirror_slot(kind, slot);
            slot += if param.is_wide() { 2 } else { 1 };
        }
        Ok(())
    }

    fn local_vars(&mut self) {
        self.emit(Instr::ALoad(self.slots.context));
        self.emit(invoke(contract::GET_LOCAL_VARS));
    }

    fn local_stack(&mut self) {
        self.emit(Instr::ALoad(self.slots.context));
        self.emit(invoke(contract::GET_LOCAL_STACK));
    }

    fn ops(&self, ty: &TypeTag) -> RResult<&'static SlotOps> {
        slot_ops(ty.kind()).ok_or_else(|| RewriteError::UncapturableValue { site: self.site, ty: ty.clone() })
    }

    /// Copies local `slot` into the context's local store.
    fn mirror_slot(&mut self, kind: SlotKind, slot: Slot) {
        if let Some(ops) = slot_ops(kind) {
            self.local_vars();
            self.emit(push_int(i32::from(slot)));
            self.emit(load(kind, slot));
            self.emit(invoke(ops.store));
        }
    }

    fn mirror(&mut self, instr: &Instr) {
        match *instr {
            Instr::IInc(slot, by) => {
                self.local_vars();
                self.emit(push_int(i32::from(slot)));
                self.emit(push_int(i32::from(by)));
                self.emit(invoke(contract::INCREMENT_INT));
            }
            _ => {
                if let Some((slot, kind)) = instr.stored_slot() {
                    self.mirror_slot(kind, slot);
                }
            }
        }
    }

    fn cast(&mut self, ty: &TypeTag) {
        if let Some(class) = ty.cast_target() {
            self.emit(Instr::CheckCast(class.to_string()));
        }
    }

    /// Saves the operand stack, top first, through the temp slot.
    fn save_stack(&mut self, stack: &[TypeTag]) -> RResult<()> {
        let temp = self.slots.temp;
        for ty in stack.iter().rev() {
            let ops = self.ops(ty)?;
            self.emit(store(ty.kind(), temp));
            self.local_stack();
            self.emit(load(ty.kind(), temp));
            self.emit(invoke(ops.push));
        }
        Ok(())
    }

    /// Reloads the operand stack, bottom first.
    fn restore_stack(&mut self, stack: &[TypeTag]) -> RResult<()> {
        for ty in stack {
            let ops = self.ops(ty)?;
            self.local_stack();
            self.emit(invoke(ops.pop));
            self.cast(ty);
        }
        Ok(())
    }

    /// Reloads every recorded local, category-1 slots first. The receiver is
    /// never reloaded.
    fn restore_locals(&mut self, site: usize, locals: &BTreeMap<Slot, TypeTag>) -> RResult<()> {
        let skip_this = !self.method.is_static();
        for category in &[Category::One, Category::Two] {
            for (&slot, ty) in locals {
                if ty.category() != *category || (skip_this && slot == 0) {
                    continue;
                }
                let ops = slot_ops(ty.kind()).ok_or_else(|| RewriteError::UncapturableValue { site, ty: ty.clone() })?;
                self.local_vars();
                self.emit(push_int(i32::from(slot)));
                self.emit(invoke(ops.get));
                self.cast(ty);
                self.emit(store(ty.kind(), slot));
            }
        }
        Ok(())
    }

    fn throw_signal(&mut self, call: CallKind, payload: Option<Slot>) {
        let class = contract::signal_class(call);
        self.emit(Instr::New(class.to_string()));
        self.emit(Instr::Dup);
        self.emit(Instr::ALoad(self.slots.context));
        if let Some(slot) = payload {
            self.emit(Instr::ALoad(slot));
        }
        self.emit(Instr::InvokeSpecial(MethodRef::new(
            class,
            contract::SIGNAL_INIT,
            contract::signal_init_descriptor(call),
        )));
        self.emit(Instr::AThrow);
    }

    fn suspend(&mut self, kind: InvokeKind, call: CallKind) -> RResult<()> {
        let k = self.site;
        let empty = TypeSnapshot::default();
        let shape = self.shape;
        let snapshot = shape.suspension(k).unwrap_or(&empty);
        let answer = if call == CallKind::Call { self.call_answer_type()? } else { None };

        let payload = if call == CallKind::Call {
            self.emit(Instr::AStore(self.slots.call_target));
            Some(self.slots.call_target)
        } else {
            None
        };
        if kind.has_receiver() {
            self.emit(Instr::Pop);
        }
        self.save_stack(&snapshot.stack)?;
        self.emit(Instr::ALoad(self.slots.context));
        self.emit(push_int(k as i32));
        self.emit(invoke(contract::SET_LABEL));
        self.throw_signal(call, payload);

        self.emit(Instr::Label(self.resume_labels[k]));
        self.emit(Instr::ALoad(self.slots.context));
        self.emit(invoke(contract::CLEAR_LABEL));
        self.restore_locals(k, &snapshot.locals)?;
        self.restore_stack(&snapshot.stack)?;

        if let Some(ret) = answer {
            self.emit(Instr::ALoad(self.slots.context));
            self.emit(invoke(contract::GET_CALL_ANSWER));
            self.cast(&ret);
        }
        self.site += 1;
        Ok(())
    }

    /// Checks the configured call signature against the code emitted for a
    /// call site: one parked target, at most one reference answer.
    fn call_answer_type(&self) -> RResult<Option<TypeTag>> {
        let descriptor = self.config.call_descriptor()?;
        match descriptor.params.as_slice() {
            [target] if target.kind() == SlotKind::Reference => {}
            _ => return Err(RewriteError::UnsupportedCallDescriptor(self.config.call_method_descriptor.clone())),
        }
        match descriptor.ret {
            Some(ret) if ret.kind() != SlotKind::Reference => Err(RewriteError::PrimitiveCallAnswer(ret)),
            ret => Ok(ret),
        }
    }

    fn answer(&mut self, kind: InvokeKind, m: &MethodRef) -> RResult<()> {
        if MethodDescriptor::parse(&m.descriptor)?.params.is_empty() {
            self.emit(Instr::AConstNull);
        }
        self.emit(Instr::AStore(self.slots.answer));
        if kind.has_receiver() {
            self.emit(Instr::Pop);
        }
        self.throw_signal(CallKind::Answer, Some(self.slots.answer));
        Ok(())
    }

    fn deregister(&mut self) {
        self.emit(Instr::ALoad(self.slots.context));
        self.emit(invoke(contract::REGISTER_CONTEXT));
        self.emit(Instr::ALoad(self.slots.context));
        self.emit(invoke(contract::DEACTIVATE));
    }

    fn signal_check(&mut self) {
        let rethrow = self.rethrow_label();
        self.emit(Instr::Dup);
        self.emit(Instr::InstanceOf(contract::SIGNAL_CLASS.to_string()));
        self.emit(Instr::IfNe(rethrow));
    }
}

/// Rewrites `method` from the results of both analyses.
pub fn rewrite_method(
    class_name: &str,
    method: &Method,
    config: &InstrumentConfig,
    metrics: &Metrics,
    shape: &ShapeAnalysis,
) -> RResult<Method> {
    Rewriter::new(class_name, method, config, metrics, shape)?.rewrite()
}

#[cfg(test)]
#[path = "tests_rewrite.rs"]
mod tests;
