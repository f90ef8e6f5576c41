//! A small runtime able to execute rewritten methods: the context store the
//! generated code talks to, a heap, an interpreter for the instruction set,
//! and a runner turning thrown signals into tagged outcomes.
//!
//! This is test infrastructure, not a production VM. It has no verifier,
//! no class loading and no threads.

use thiserror::Error;

use resumable_structure::descriptors::DescriptorError;
use resumable_structure::instructions::Label;
use resumable_structure::types::Slot;

pub mod value;
pub mod heap;
pub mod stack;
pub mod context;
pub mod machine;
pub mod runner;

pub use crate::context::{CapturedContext, ContextId, ContextManager};
pub use crate::heap::{Heap, Object};
pub use crate::machine::{Completion, Host, Machine, NoHost};
pub use crate::runner::{ContinuableRunner, RunOutcome};
pub use crate::stack::ContinuationStack;
pub use crate::value::{ObjRef, Value};

pub type EResult<T> = Result<T, ExecError>;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ExecError {
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("expected {expected}, found {found:?}")]
    TypeMismatch { expected: &'static str, found: Value },
    #[error("local {0} read before it was set")]
    UnsetLocal(Slot),
    #[error("jump to undefined label {0:?}")]
    UnknownLabel(Label),
    #[error("no method {0}")]
    NoSuchMethod(String),
    #[error("dangling reference {0:?}")]
    DanglingRef(ObjRef),
    #[error("no context {0:?}")]
    UnknownContext(ContextId),
    #[error("execution ran past the last instruction")]
    FellOffEnd,
    #[error("instruction budget exhausted")]
    OutOfFuel,
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

#[cfg(test)]
#[path = "tests_execution.rs"]
mod tests;
