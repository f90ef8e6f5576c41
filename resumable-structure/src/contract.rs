//! Names of the runtime services rewritten code calls into, and of the
//! signal types it throws.
//!
//! The rewriter emits calls against these names and any runtime hosting the
//! rewritten code has to provide them.

use crate::config::CallKind;
use crate::instructions::MethodRef;
use crate::types::SlotKind;

pub const CONTEXT_CLASS: &str = "resumable/runtime/ContinuationContext";
pub const STACK_CLASS: &str = "resumable/runtime/ContinuationStack";

/// Common supertype of every signal.
pub const SIGNAL_CLASS: &str = "resumable/runtime/ControlFlowSignal";
pub const PAUSE_SIGNAL_CLASS: &str = "resumable/runtime/PauseSignal";
pub const STEP_BACK_SIGNAL_CLASS: &str = "resumable/runtime/StepBackSignal";
pub const CALL_SIGNAL_CLASS: &str = "resumable/runtime/CallSignal";
pub const ANSWER_SIGNAL_CLASS: &str = "resumable/runtime/AnswerSignal";

/// Superclass chain of `SIGNAL_CLASS`, nearest first.
pub const SIGNAL_SUPERCLASSES: [&str; 4] = [
    "java/lang/RuntimeException",
    "java/lang/Exception",
    "java/lang/Throwable",
    "java/lang/Object",
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ContractMethod {
    pub owner: &'static str,
    pub name: &'static str,
    pub descriptor: &'static str,
}

impl ContractMethod {
    pub fn to_ref(&self) -> MethodRef {
        MethodRef::new(self.owner, self.name, self.descriptor)
    }

    pub fn matches(&self, m: &MethodRef) -> bool {
        self.owner == m.owner && self.name == m.name && self.descriptor == m.descriptor
    }
}

macro_rules! contract {
    ($($id:ident = $owner:ident . $name:literal $desc:literal;)*) => {
        $(pub const $id: ContractMethod = ContractMethod {
            owner: $owner,
            name: $name,
            descriptor: $desc,
        };)*
    }
}

contract! {
    CREATE_OR_RESET_CONTEXT = CONTEXT_CLASS."createOrResetContext"
        "(Ljava/lang/Object;)Lresumable/runtime/ContinuationContext;";
    GET_LABEL = CONTEXT_CLASS."getLabel" "()I";
    SET_LABEL = CONTEXT_CLASS."setLabel" "(I)V";
    CLEAR_LABEL = CONTEXT_CLASS."clearLabel" "()V";
    GET_LOCAL_VARS = CONTEXT_CLASS."getLocalVars" "()Lresumable/runtime/ContinuationStack;";
    GET_LOCAL_STACK = CONTEXT_CLASS."getLocalStack" "()Lresumable/runtime/ContinuationStack;";
    REGISTER_CONTEXT = CONTEXT_CLASS."registerContext" "()V";
    DEACTIVATE = CONTEXT_CLASS."deactivate" "()V";
    GET_CALL_ANSWER = CONTEXT_CLASS."getCallAnswer" "()Ljava/lang/Object;";

    STORE_INT = STACK_CLASS."storeInt" "(II)V";
    STORE_LONG = STACK_CLASS."storeLong" "(IJ)V";
    STORE_FLOAT = STACK_CLASS."storeFloat" "(IF)V";
    STORE_DOUBLE = STACK_CLASS."storeDouble" "(ID)V";
    STORE_REFERENCE = STACK_CLASS."storeReference" "(ILjava/lang/Object;)V";
    INCREMENT_INT = STACK_CLASS."incrementInt" "(II)V";

    GET_INT = STACK_CLASS."getInt" "(I)I";
    GET_LONG = STACK_CLASS."getLong" "(I)J";
    GET_FLOAT = STACK_CLASS."getFloat" "(I)F";
    GET_DOUBLE = STACK_CLASS."getDouble" "(I)D";
    GET_REFERENCE = STACK_CLASS."getReference" "(I)Ljava/lang/Object;";

    PUSH_INT = STACK_CLASS."pushInt" "(I)V";
    PUSH_LONG = STACK_CLASS."pushLong" "(J)V";
    PUSH_FLOAT = STACK_CLASS."pushFloat" "(F)V";
    PUSH_DOUBLE = STACK_CLASS."pushDouble" "(D)V";
    PUSH_REFERENCE = STACK_CLASS."pushReference" "(Ljava/lang/Object;)V";

    POP_INT = STACK_CLASS."popInt" "()I";
    POP_LONG = STACK_CLASS."popLong" "()J";
    POP_FLOAT = STACK_CLASS."popFloat" "()F";
    POP_DOUBLE = STACK_CLASS."popDouble" "()D";
    POP_REFERENCE = STACK_CLASS."popReference" "()Ljava/lang/Object;";
}

pub const SIGNAL_INIT: &str = "<init>";
pub const SIGNAL_INIT_CONTEXT: &str = "(Lresumable/runtime/ContinuationContext;)V";
pub const SIGNAL_INIT_PAYLOAD: &str = "(Lresumable/runtime/ContinuationContext;Ljava/lang/Object;)V";

/// Typed entry points of a context store for one storage kind.
pub struct SlotOps {
    pub store: ContractMethod,
    pub get: ContractMethod,
    pub push: ContractMethod,
    pub pop: ContractMethod,
}

const INT_OPS: SlotOps = SlotOps { store: STORE_INT, get: GET_INT, push: PUSH_INT, pop: POP_INT };
const LONG_OPS: SlotOps = SlotOps { store: STORE_LONG, get: GET_LONG, push: PUSH_LONG, pop: POP_LONG };
const FLOAT_OPS: SlotOps = SlotOps { store: STORE_FLOAT, get: GET_FLOAT, push: PUSH_FLOAT, pop: POP_FLOAT };
const DOUBLE_OPS: SlotOps = SlotOps { store: STORE_DOUBLE, get: GET_DOUBLE, push: PUSH_DOUBLE, pop: POP_DOUBLE };
const REFERENCE_OPS: SlotOps = SlotOps {
    store: STORE_REFERENCE,
    get: GET_REFERENCE,
    push: PUSH_REFERENCE,
    pop: POP_REFERENCE,
};

/// `None` for return addresses, which no store can hold.
pub fn slot_ops(kind: SlotKind) -> Option<&'static SlotOps> {
    match kind {
        SlotKind::Int => Some(&INT_OPS),
        SlotKind::Long => Some(&LONG_OPS),
        SlotKind::Float => Some(&FLOAT_OPS),
        SlotKind::Double => Some(&DOUBLE_OPS),
        SlotKind::Reference => Some(&REFERENCE_OPS),
        SlotKind::ReturnAddress => None,
    }
}

pub fn signal_class(kind: CallKind) -> &'static str {
    match kind {
        CallKind::Pause => PAUSE_SIGNAL_CLASS,
        CallKind::StepBack => STEP_BACK_SIGNAL_CLASS,
        CallKind::Call => CALL_SIGNAL_CLASS,
        CallKind::Answer => ANSWER_SIGNAL_CLASS,
    }
}

pub fn signal_kind(class: &str) -> Option<CallKind> {
    match class {
        PAUSE_SIGNAL_CLASS => Some(CallKind::Pause),
        STEP_BACK_SIGNAL_CLASS => Some(CallKind::StepBack),
        CALL_SIGNAL_CLASS => Some(CallKind::Call),
        ANSWER_SIGNAL_CLASS => Some(CallKind::Answer),
        _ => None,
    }
}

/// Constructor descriptor of the signal thrown for `kind`.
pub fn signal_init_descriptor(kind: CallKind) -> &'static str {
    match kind {
        CallKind::Pause | CallKind::StepBack => SIGNAL_INIT_CONTEXT,
        CallKind::Call | CallKind::Answer => SIGNAL_INIT_PAYLOAD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::MethodDescriptor;

    #[test]
    fn contract_descriptors_parse() {
        for m in &[
            CREATE_OR_RESET_CONTEXT, GET_LABEL, SET_LABEL, CLEAR_LABEL, GET_LOCAL_VARS,
            GET_LOCAL_STACK, REGISTER_CONTEXT, DEACTIVATE, GET_CALL_ANSWER, INCREMENT_INT,
        ] {
            assert!(MethodDescriptor::parse(m.descriptor).is_ok(), "{}", m.name);
        }
        for kind in &[SlotKind::Int, SlotKind::Long, SlotKind::Float, SlotKind::Double, SlotKind::Reference] {
            let ops = slot_ops(*kind).unwrap();
            for m in &[ops.store, ops.get, ops.push, ops.pop] {
                assert!(MethodDescriptor::parse(m.descriptor).is_ok(), "{}", m.name);
            }
        }
        assert!(slot_ops(SlotKind::ReturnAddress).is_none());
    }

    #[test]
    fn signal_classes_map_back() {
        for kind in &[CallKind::Pause, CallKind::StepBack, CallKind::Call, CallKind::Answer] {
            assert_eq!(signal_kind(signal_class(*kind)), Some(*kind));
        }
        assert_eq!(signal_kind(SIGNAL_CLASS), None);
    }
}
