//! Static analyses run over one method before it is rewritten.
//!
//! `metrics` is a single linear pass deciding whether a method needs the
//! transform at all. `shape` builds the control-flow graph (`graph`), runs
//! an abstract interpretation over it (`context`) and checks every join
//! against the live slots computed by `liveness`.

use thiserror::Error;

use resumable_structure::descriptors::DescriptorError;
use resumable_structure::instructions::Label;
use resumable_structure::types::{Slot, TypeTag};

pub mod metrics;
pub mod context;
pub mod graph;
pub mod liveness;
pub mod shape;

pub use crate::metrics::{analyze_metrics, Metrics};
pub use crate::shape::{analyze_shape, LabelSnapshot, ShapeAnalysis, TypeSnapshot};

pub type AResult<T> = Result<T, AnalysisError>;

/// Positions are instruction indices into the method's stream.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum AnalysisError {
    #[error("operand stack underflow at instruction {at}")]
    StackUnderflow { at: usize },
    #[error("local {slot} read before any store at instruction {at}")]
    UndefinedLocal { at: usize, slot: Slot },
    #[error("branch or try region refers to undefined label {0:?}")]
    UnknownLabel(Label),
    #[error("label {0:?} is defined more than once")]
    DuplicateLabel(Label),
    #[error("instruction {at} splits a category-2 value")]
    WideValueSplit { at: usize },
    #[error("operand stacks disagree at the join at instruction {at}: {expected:?} vs {found:?}")]
    DivergentStack {
        at: usize,
        expected: Vec<TypeTag>,
        found: Vec<TypeTag>,
    },
    #[error("live local {slot} disagrees at the join at instruction {at}: {expected:?} vs {found:?}")]
    DivergentLocal {
        at: usize,
        slot: Slot,
        expected: Option<TypeTag>,
        found: Option<TypeTag>,
    },
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("metrics counted {metrics} suspension sites but the graph has {graph}")]
    SuspensionCountMismatch { metrics: usize, graph: usize },
}

#[cfg(test)]
#[path = "tests_analysis.rs"]
mod tests;
