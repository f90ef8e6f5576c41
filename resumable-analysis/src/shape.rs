//! Abstract interpretation of a method over its control-flow graph.
//!
//! Nodes are visited from a LIFO worklist. Each node is interpreted exactly
//! once, starting from the context handed over by the first predecessor that
//! reached it. Every other incoming edge is checked afterwards against the
//! slots live at the join, see `check_joins`. Joins that bring different
//! classes into one reference slot relax that slot to `java/lang/Object`,
//! and the method is interpreted again until no join needs relaxing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{trace, warn};

use resumable_structure::classes::Method;
use resumable_structure::config::{InstrumentConfig, JoinPolicy};
use resumable_structure::instructions::Label;
use resumable_structure::types::{Slot, TypeTag, THROWABLE_CLASS};

use crate::context::{needs_widening, store_local, TypesContext};
use crate::graph::{EdgeKind, Graph, Node, NodeId, NodeSort, Step, SymOp};
use crate::liveness::Liveness;
use crate::metrics::Metrics;
use crate::{AResult, AnalysisError};

/// Owned copy of a `TypesContext`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TypeSnapshot {
    pub locals: BTreeMap<Slot, TypeTag>,
    /// Bottom first.
    pub stack: Vec<TypeTag>,
}

impl TypeSnapshot {
    fn of(ctx: &TypesContext) -> Self {
        TypeSnapshot {
            locals: ctx.locals().clone(),
            stack: ctx.stack().to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LabelSnapshot {
    pub sort: NodeSort,
    pub types: TypeSnapshot,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ShapeAnalysis {
    /// Indexed by suspension site in stream order. `None` for sites in
    /// unreachable code.
    pub suspensions: Vec<Option<TypeSnapshot>>,
    /// Entry snapshot of every reachable label.
    pub labels: BTreeMap<Label, LabelSnapshot>,
    /// Instruction index of the first store of each handler block, mapped to
    /// the handler whose snapshot it retyped.
    pub retype_at: BTreeMap<usize, Label>,
}

impl ShapeAnalysis {
    pub fn suspension(&self, index: usize) -> Option<&TypeSnapshot> {
        self.suspensions.get(index).and_then(Option::as_ref)
    }

    pub fn label(&self, label: Label) -> Option<&LabelSnapshot> {
        self.labels.get(&label)
    }
}

fn derive(exit: &TypesContext, kind: EdgeKind) -> TypesContext {
    match kind {
        EdgeKind::Fallthrough => exit.share(),
        EdgeKind::Branch => exit.isolate(),
        EdgeKind::Subroutine => {
            let mut ctx = exit.isolate();
            ctx.push(TypeTag::ReturnAddress);
            ctx
        }
        EdgeKind::Exception => {
            let mut ctx = exit.isolate();
            ctx.clear_stack();
            ctx
        }
    }
}

/// A position relaxed to `java/lang/Object` on entry to a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Widen {
    Local(Slot),
    Stack(usize),
}

type Widenings = HashMap<NodeId, BTreeSet<Widen>>;

struct Interpreter<'a> {
    metrics: &'a Metrics,
    widened: &'a Widenings,
    analysis: ShapeAnalysis,
    entries: HashMap<NodeId, TypesContext>,
    exits: HashMap<NodeId, TypesContext>,
}

impl<'a> Interpreter<'a> {
    fn enter(&mut self, id: NodeId, mut ctx: TypesContext) {
        for w in self.widened.get(&id).into_iter().flatten() {
            match *w {
                Widen::Local(slot) => ctx.widen_local(slot),
                Widen::Stack(index) => ctx.widen_stack(index),
            }
        }
        self.entries.insert(id, ctx);
    }

    fn run(&mut self, graph: &mut Graph, root: TypesContext) -> AResult<()> {
        self.enter(graph.entry, root);
        let mut worklist = vec![graph.entry];

        while let Some(id) = worklist.pop() {
            if graph.nodes[id].processed {
                continue;
            }
            graph.nodes[id].processed = true;

            let exit = self.interpret(&graph.nodes[id], id)?;
            let edges: Vec<_> = graph.nodes[id].edges().collect();
            for (succ, kind) in edges {
                let node = &mut graph.nodes[succ];
                if node.processed || node.predecessor.is_some() || succ == graph.entry {
                    continue;
                }
                node.predecessor = Some((id, kind));
                self.enter(succ, derive(&exit, kind));
                worklist.push(succ);
            }
            self.exits.insert(id, exit);
        }
        Ok(())
    }

    fn interpret(&mut self, node: &Node, id: NodeId) -> AResult<TypesContext> {
        let mut ctx = match self.entries.get(&id) {
            Some(ctx) => ctx.clone(),
            None => TypesContext::new(),
        };

        let mut pending_retype = None;
        if node.sort == NodeSort::ExceptionHandler {
            let caught = node
                .label
                .and_then(|l| self.metrics.exception_type(l))
                .unwrap_or(THROWABLE_CLASS);
            ctx.clear_stack();
            ctx.push(TypeTag::reference(caught));
            pending_retype = node.label;
        }
        if let Some(label) = node.label {
            self.analysis.labels.insert(label, LabelSnapshot {
                sort: node.sort,
                types: TypeSnapshot::of(&ctx),
            });
        }
        trace!(node = id.0, start = node.start, locals = ctx.locals().len(), stack = ctx.stack().len(), "interpreting node");

        for step in &node.steps {
            self.apply(&mut ctx, step, &mut pending_retype)?;
        }
        Ok(ctx)
    }

    fn apply(&mut self, ctx: &mut TypesContext, step: &Step, pending_retype: &mut Option<Label>) -> AResult<()> {
        let at = step.at;
        match &step.op {
            SymOp::Push(t) => ctx.push(t.clone()),
            SymOp::Pop => {
                ctx.pop().map_err(|f| f.at(at))?;
            }
            SymOp::PopWords(n) => {
                ctx.pop_words(*n).map_err(|f| f.at(at))?;
            }
            SymOp::Set { slot, ty } => {
                let popped = ctx.pop().map_err(|f| f.at(at))?;
                let stored = ty.clone().unwrap_or(popped);
                if let Some(handler) = pending_retype.take() {
                    if let Some(snapshot) = self.analysis.labels.get_mut(&handler) {
                        store_local(&mut snapshot.types.locals, *slot, stored.clone());
                        self.analysis.retype_at.insert(at, handler);
                    }
                }
                ctx.set_local(*slot, stored);
            }
            SymOp::Get { slot, ty } => {
                let recorded = ctx.local(*slot).map_err(|f| f.at(at))?.clone();
                ctx.push(ty.clone().unwrap_or(recorded));
            }
            SymOp::Inc(slot) | SymOp::Read(slot) => {
                ctx.local(*slot).map_err(|f| f.at(at))?;
            }
            SymOp::AALoad => {
                ctx.pop().map_err(|f| f.at(at))?;
                let array = ctx.pop().map_err(|f| f.at(at))?;
                ctx.push(match array {
                    TypeTag::Null => TypeTag::Null,
                    t => t.component().unwrap_or_else(TypeTag::object),
                });
            }
            SymOp::Dup { words, under } => ctx.dup(*words, *under).map_err(|f| f.at(at))?,
            SymOp::Swap => ctx.swap().map_err(|f| f.at(at))?,
            SymOp::Suspend(index) => {
                if let Some(site) = self.analysis.suspensions.get_mut(*index) {
                    *site = Some(TypeSnapshot::of(ctx));
                }
            }
        }
        Ok(())
    }
}

/// Checks every edge that did not seed its successor. Returns the entry
/// positions that have to be relaxed.
fn check_joins(
    graph: &Graph,
    interp: &Interpreter,
    liveness: &Liveness,
    policy: JoinPolicy,
) -> AResult<Vec<(NodeId, Widen)>> {
    let mut widen = Vec::new();
    for &id in &graph.order {
        let exit = match interp.exits.get(&id) {
            Some(exit) => exit,
            None => continue,
        };
        for (succ, kind) in graph.nodes[id].edges() {
            if graph.nodes[succ].predecessor == Some((id, kind)) {
                continue;
            }
            let entry = match interp.entries.get(&succ) {
                Some(entry) => entry,
                None => continue,
            };
            let target = &graph.nodes[succ];
            let incoming = derive(exit, kind);

            for (&slot, expected) in entry.locals() {
                match incoming.locals().get(&slot) {
                    Some(found) if needs_widening(expected, found) => widen.push((succ, Widen::Local(slot))),
                    _ => {}
                }
            }
            // handlers are retyped from their first store instead
            if kind == EdgeKind::Exception {
                continue;
            }

            if target.sort != NodeSort::ExceptionHandler {
                let same = incoming.stack().len() == entry.stack().len()
                    && incoming.stack().iter().zip(entry.stack()).all(|(a, b)| a.kind() == b.kind());
                if !same {
                    return Err(AnalysisError::DivergentStack {
                        at: target.start,
                        expected: entry.stack().to_vec(),
                        found: incoming.stack().to_vec(),
                    });
                }
                for (index, (expected, found)) in entry.stack().iter().zip(incoming.stack()).enumerate() {
                    if needs_widening(expected, found) {
                        widen.push((succ, Widen::Stack(index)));
                    }
                }
            }

            for &slot in liveness.live_in(succ) {
                let expected = entry.locals().get(&slot);
                let found = incoming.locals().get(&slot);
                let agree = match (expected, found) {
                    (Some(a), Some(b)) => a.kind() == b.kind(),
                    (None, None) => true,
                    _ => false,
                };
                if agree {
                    continue;
                }
                match policy {
                    JoinPolicy::Reject => {
                        return Err(AnalysisError::DivergentLocal {
                            at: target.start,
                            slot,
                            expected: expected.cloned(),
                            found: found.cloned(),
                        })
                    }
                    JoinPolicy::FirstPredecessor => warn!(
                        at = target.start,
                        slot,
                        expected = ?expected,
                        found = ?found,
                        "divergent local at join, keeping the first predecessor's type"
                    ),
                }
            }
        }
    }
    Ok(widen)
}

/// Computes the type snapshot of every suspension site and reachable label.
pub fn analyze_shape(
    class_name: &str,
    method: &Method,
    config: &InstrumentConfig,
    metrics: &Metrics,
) -> AResult<ShapeAnalysis> {
    let mut graph = Graph::build(class_name, method, config)?;
    if graph.suspensions.len() != metrics.suspension_count {
        return Err(AnalysisError::SuspensionCountMismatch {
            metrics: metrics.suspension_count,
            graph: graph.suspensions.len(),
        });
    }

    let root = TypesContext::root(class_name, method)?;
    let liveness = Liveness::compute(&graph);
    let mut widened = Widenings::new();
    loop {
        graph.reset_traversal();
        let (analysis, relax) = {
            let mut interp = Interpreter {
                metrics,
                widened: &widened,
                analysis: ShapeAnalysis {
                    suspensions: vec![None; graph.suspensions.len()],
                    ..ShapeAnalysis::default()
                },
                entries: HashMap::new(),
                exits: HashMap::new(),
            };
            interp.run(&mut graph, root.clone())?;
            let relax = check_joins(&graph, &interp, &liveness, config.join_policy)?;
            (interp.analysis, relax)
        };
        let mut grown = false;
        for (node, w) in relax {
            grown |= widened.entry(node).or_default().insert(w);
        }
        if !grown {
            trace!(
                method = %method.name,
                labels = analysis.labels.len(),
                retyped = analysis.retype_at.len(),
                widened = widened.values().map(BTreeSet::len).sum::<usize>(),
                "shape analysis finished"
            );
            return Ok(analysis);
        }
        trace!(method = %method.name, "reference join widened, interpreting again");
    }
}
