//! Control-flow graph over basic blocks, with each block's instructions
//! lowered to the symbolic operations the shape analyzer interprets.

use std::collections::HashMap;

use tracing::trace;

use resumable_structure::classes::Method;
use resumable_structure::config::{CallKind, InstrumentConfig};
use resumable_structure::descriptors::{parse_field_type, MethodDescriptor};
use resumable_structure::instructions::{Constant, Instr, InvokeKind, Label, MethodRef};
use resumable_structure::types::{array_of, Slot, TypeTag, CLASS_CLASS, STRING_CLASS};
use resumable_utils::{arena_id, Arena};

use crate::{AResult, AnalysisError};

arena_id! {
    pub struct NodeId;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeSort {
    Regular,
    ExceptionHandler,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    Branch,
    Fallthrough,
    Subroutine,
    Exception,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SymOp {
    Push(TypeTag),
    /// Pops one value of either width.
    Pop,
    /// `pop` and `pop2`: exactly this many words.
    PopWords(usize),
    /// `ty` overrides the popped tag.
    Set { slot: Slot, ty: Option<TypeTag> },
    /// `ty` replaces the recorded tag when pushing.
    Get { slot: Slot, ty: Option<TypeTag> },
    Inc(Slot),
    /// `ret` reading its return address.
    Read(Slot),
    AALoad,
    Dup { words: usize, under: usize },
    Swap,
    Suspend(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    /// Index of the originating instruction.
    pub at: usize,
    pub op: SymOp,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub label: Option<Label>,
    /// Index of the first instruction, the label itself for labeled nodes.
    pub start: usize,
    pub sort: NodeSort,
    pub steps: Vec<Step>,
    /// Branch, subroutine and exception edges, in registration order.
    pub successors: Vec<(NodeId, EdgeKind)>,
    pub fallthrough: Option<NodeId>,
    pub predecessor: Option<(NodeId, EdgeKind)>,
    pub processed: bool,
}

impl Node {
    fn new(label: Option<Label>, start: usize) -> Self {
        Node {
            label,
            start,
            sort: NodeSort::Regular,
            steps: Vec::new(),
            successors: Vec::new(),
            fallthrough: None,
            predecessor: None,
            processed: false,
        }
    }

    /// Every outgoing edge, the fallthrough last.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, EdgeKind)> + '_ {
        self.successors
            .iter()
            .copied()
            .chain(self.fallthrough.map(|n| (n, EdgeKind::Fallthrough)))
    }
}

#[derive(Debug)]
pub struct Graph {
    pub nodes: Arena<NodeId, Node>,
    pub entry: NodeId,
    /// Nodes in stream order.
    pub order: Vec<NodeId>,
    /// Suspension sites with their index, in stream order.
    pub suspensions: Vec<(usize, CallKind)>,
    labels: HashMap<Label, NodeId>,
}

impl Graph {
    /// Clears what a previous traversal recorded on the nodes.
    pub fn reset_traversal(&mut self) {
        for &id in &self.order {
            let node = &mut self.nodes[id];
            node.processed = false;
            node.predecessor = None;
        }
    }

    pub fn node_of(&self, label: Label) -> AResult<NodeId> {
        self.labels.get(&label).copied().ok_or(AnalysisError::UnknownLabel(label))
    }

    pub fn build(class_name: &str, method: &Method, config: &InstrumentConfig) -> AResult<Graph> {
        let instrs = &method.code.instrs;
        let mut nodes: Arena<NodeId, Node> = Arena::new();
        let mut labels = HashMap::new();

        // first pass: every label gets its node up front
        for (i, instr) in instrs.iter().enumerate() {
            if let Instr::Label(l) = instr {
                if labels.insert(*l, nodes.append(Node::new(Some(*l), i))).is_some() {
                    return Err(AnalysisError::DuplicateLabel(*l));
                }
            }
        }

        let mut graph = Graph {
            nodes,
            entry: NodeId(0),
            order: Vec::new(),
            suspensions: Vec::new(),
            labels,
        };

        let mut current: Option<NodeId> = None;
        let mut falling: Option<NodeId> = None;
        for (i, instr) in instrs.iter().enumerate() {
            let id = match (instr, current) {
                (Instr::Label(l), _) => {
                    if let Some(c) = current.take() {
                        falling = Some(c);
                    }
                    let id = graph.node_of(*l)?;
                    graph.begin(id, falling.take());
                    current = Some(id);
                    continue;
                }
                (_, Some(id)) => id,
                (_, None) => {
                    let id = graph.nodes.append(Node::new(None, i));
                    graph.begin(id, falling.take());
                    current = Some(id);
                    id
                }
            };

            let steps = graph.lower(class_name, config, i, instr)?;
            graph.nodes[id].steps.extend(steps);

            if instr.ends_block() {
                for target in instr.branch_targets() {
                    let kind = if let Instr::Jsr(_) = instr { EdgeKind::Subroutine } else { EdgeKind::Branch };
                    let to = graph.node_of(target)?;
                    graph.nodes[id].successors.push((to, kind));
                }
                falling = if instr.falls_through() { Some(id) } else { None };
                current = None;
            }
        }

        if graph.order.is_empty() {
            let id = graph.nodes.append(Node::new(None, 0));
            graph.order.push(id);
        }
        graph.entry = graph.order[0];

        for block in &method.code.try_catch {
            let start = graph.nodes[graph.node_of(block.start)?].start;
            let end = graph.nodes[graph.node_of(block.end)?].start;
            let handler = graph.node_of(block.handler)?;
            graph.nodes[handler].sort = NodeSort::ExceptionHandler;
            for &id in &graph.order {
                let s = graph.nodes[id].start;
                if s >= start && s < end {
                    graph.nodes[id].successors.push((handler, EdgeKind::Exception));
                }
            }
        }

        trace!(nodes = graph.order.len(), suspensions = graph.suspensions.len(), "built control-flow graph");
        Ok(graph)
    }

    fn begin(&mut self, id: NodeId, from: Option<NodeId>) {
        if let Some(prev) = from {
            self.nodes[prev].fallthrough = Some(id);
        }
        self.order.push(id);
    }

    /// Symbolic effect of one instruction.
    fn lower(&mut self, class_name: &str, config: &InstrumentConfig, at: usize, instr: &Instr) -> AResult<Vec<Step>> {
        use self::SymOp::*;

        let push = |t: TypeTag| vec![Push(t)];
        let unary = |t: TypeTag| vec![Pop, Push(t)];
        let binary = |t: TypeTag| vec![Pop, Pop, Push(t)];
        let pops = |n: usize| vec![Pop; n];

        let ops = match instr {
            Instr::Nop | Instr::Goto(_) | Instr::Jsr(_) | Instr::Return | Instr::Label(_) => vec![],
            Instr::AConstNull => push(TypeTag::Null),
            Instr::IConst(_) => push(TypeTag::Int),
            Instr::LConst(_) => push(TypeTag::Long),
            Instr::FConst(_) => push(TypeTag::Float),
            Instr::DConst(_) => push(TypeTag::Double),
            Instr::BiPush(_) => push(TypeTag::Byte),
            Instr::SiPush(_) => push(TypeTag::Short),
            Instr::Ldc(c) => push(match c {
                Constant::Int(_) => TypeTag::Int,
                Constant::Float(_) => TypeTag::Float,
                Constant::Long(_) => TypeTag::Long,
                Constant::Double(_) => TypeTag::Double,
                Constant::String(_) => TypeTag::reference(STRING_CLASS),
                Constant::Class(_) => TypeTag::reference(CLASS_CLASS),
            }),

            Instr::ILoad(s) => vec![Get { slot: *s, ty: Some(TypeTag::Int) }],
            Instr::LLoad(s) => vec![Get { slot: *s, ty: Some(TypeTag::Long) }],
            Instr::FLoad(s) => vec![Get { slot: *s, ty: Some(TypeTag::Float) }],
            Instr::DLoad(s) => vec![Get { slot: *s, ty: Some(TypeTag::Double) }],
            Instr::ALoad(s) => vec![Get { slot: *s, ty: None }],
            Instr::IStore(s) => vec![Set { slot: *s, ty: Some(TypeTag::Int) }],
            Instr::LStore(s) => vec![Set { slot: *s, ty: Some(TypeTag::Long) }],
            Instr::FStore(s) => vec![Set { slot: *s, ty: Some(TypeTag::Float) }],
            Instr::DStore(s) => vec![Set { slot: *s, ty: Some(TypeTag::Double) }],
            Instr::AStore(s) => vec![Set { slot: *s, ty: None }],
            Instr::IInc(s, _) => vec![Inc(*s)],

            Instr::IALoad | Instr::BALoad => binary(TypeTag::Int),
            Instr::LALoad => binary(TypeTag::Long),
            Instr::FALoad => binary(TypeTag::Float),
            Instr::DALoad => binary(TypeTag::Double),
            Instr::CALoad => binary(TypeTag::Char),
            Instr::SALoad => binary(TypeTag::Short),
            Instr::AALoad => vec![AALoad],
            Instr::IAStore | Instr::LAStore | Instr::FAStore | Instr::DAStore
            | Instr::AAStore | Instr::BAStore | Instr::CAStore | Instr::SAStore => pops(3),
            Instr::NewArray(kind) => unary(TypeTag::reference(kind.descriptor())),
            Instr::ANewArray(c) => unary(TypeTag::reference(array_of(c))),
            Instr::MultiANewArray(desc, dims) => {
                let mut v = pops(usize::from(*dims));
                v.push(Push(TypeTag::reference(desc.as_str())));
                v
            }
            Instr::ArrayLength => unary(TypeTag::Int),

            Instr::Pop => vec![PopWords(1)],
            Instr::Pop2 => vec![PopWords(2)],
            Instr::Dup => vec![Dup { words: 1, under: 0 }],
            Instr::DupX1 => vec![Dup { words: 1, under: 1 }],
            Instr::DupX2 => vec![Dup { words: 1, under: 2 }],
            Instr::Dup2 => vec![Dup { words: 2, under: 0 }],
            Instr::Dup2X1 => vec![Dup { words: 2, under: 1 }],
            Instr::Dup2X2 => vec![Dup { words: 2, under: 2 }],
            Instr::Swap => vec![Swap],

            Instr::IAdd | Instr::ISub | Instr::IMul | Instr::IDiv | Instr::IRem
            | Instr::IShl | Instr::IShr | Instr::IUShr | Instr::IAnd | Instr::IOr | Instr::IXor => binary(TypeTag::Int),
            Instr::LAdd | Instr::LSub | Instr::LMul | Instr::LDiv | Instr::LRem
            | Instr::LShl | Instr::LShr | Instr::LUShr | Instr::LAnd | Instr::LOr | Instr::LXor => binary(TypeTag::Long),
            Instr::FAdd | Instr::FSub | Instr::FMul | Instr::FDiv | Instr::FRem => binary(TypeTag::Float),
            Instr::DAdd | Instr::DSub | Instr::DMul | Instr::DDiv | Instr::DRem => binary(TypeTag::Double),
            Instr::INeg => unary(TypeTag::Int),
            Instr::LNeg => unary(TypeTag::Long),
            Instr::FNeg => unary(TypeTag::Float),
            Instr::DNeg => unary(TypeTag::Double),

            Instr::L2I | Instr::F2I | Instr::D2I | Instr::I2B | Instr::I2C | Instr::I2S => unary(TypeTag::Int),
            Instr::I2L | Instr::F2L | Instr::D2L => unary(TypeTag::Long),
            Instr::I2F | Instr::L2F | Instr::D2F => unary(TypeTag::Float),
            Instr::I2D | Instr::L2D | Instr::F2D => unary(TypeTag::Double),

            Instr::LCmp | Instr::FCmpL | Instr::FCmpG | Instr::DCmpL | Instr::DCmpG => binary(TypeTag::Int),

            Instr::IfEq(_) | Instr::IfNe(_) | Instr::IfLt(_) | Instr::IfGe(_) | Instr::IfGt(_)
            | Instr::IfLe(_) | Instr::IfNull(_) | Instr::IfNonNull(_) => pops(1),
            Instr::IfICmpEq(_) | Instr::IfICmpNe(_) | Instr::IfICmpLt(_) | Instr::IfICmpGe(_)
            | Instr::IfICmpGt(_) | Instr::IfICmpLe(_) | Instr::IfACmpEq(_) | Instr::IfACmpNe(_) => pops(2),
            Instr::Ret(s) => vec![Read(*s)],
            Instr::TableSwitch { .. } | Instr::LookupSwitch { .. } => pops(1),
            Instr::IReturn | Instr::LReturn | Instr::FReturn | Instr::DReturn | Instr::AReturn => pops(1),

            Instr::GetStatic(f) => push(parse_field_type(&f.descriptor)?),
            Instr::PutStatic(_) => pops(1),
            Instr::GetField(f) => unary(parse_field_type(&f.descriptor)?),
            Instr::PutField(_) => pops(2),

            Instr::InvokeVirtual(_) | Instr::InvokeSpecial(_) | Instr::InvokeStatic(_) | Instr::InvokeInterface(_) => {
                match instr.invocation() {
                    Some((kind, m)) => self.lower_call(class_name, config, kind, m)?,
                    None => vec![],
                }
            }
            Instr::InvokeDynamic { descriptor, .. } => call_effect(false, &MethodDescriptor::parse(descriptor)?),

            Instr::New(c) => push(TypeTag::reference(c.as_str())),
            Instr::AThrow | Instr::MonitorEnter | Instr::MonitorExit => pops(1),
            Instr::CheckCast(c) => unary(TypeTag::reference(c.as_str())),
            Instr::InstanceOf(_) => unary(TypeTag::Int),
        };
        Ok(ops.into_iter().map(|op| Step { at, op }).collect())
    }

    fn lower_call(
        &mut self,
        class_name: &str,
        config: &InstrumentConfig,
        kind: InvokeKind,
        m: &MethodRef,
    ) -> AResult<Vec<SymOp>> {
        let signature = MethodDescriptor::parse(&m.descriptor)?;
        let receiver = kind.has_receiver();
        Ok(match config.classify(class_name, m) {
            Some(call @ CallKind::Pause) | Some(call @ CallKind::StepBack) | Some(call @ CallKind::Call) => {
                let index = self.suspensions.len();
                self.suspensions.push((index, call));
                // the site's snapshot excludes receiver and target
                let mut ops = call_effect(receiver, &MethodDescriptor { params: signature.params, ret: None });
                ops.push(SymOp::Suspend(index));
                if let Some(ret) = signature.ret {
                    ops.push(SymOp::Push(ret));
                }
                ops
            }
            Some(CallKind::Answer) | None => call_effect(receiver, &signature),
        })
    }
}

fn call_effect(receiver: bool, signature: &MethodDescriptor) -> Vec<SymOp> {
    let mut ops = vec![SymOp::Pop; signature.params.len()];
    if receiver {
        ops.push(SymOp::Pop);
    }
    if let Some(ret) = &signature.ret {
        ops.push(SymOp::Push(ret.clone()));
    }
    ops
}
