//! Backward liveness of local slots, per node.

use std::collections::{BTreeSet, HashMap};

use resumable_structure::types::{Slot, TypeTag};

use crate::graph::{EdgeKind, Graph, NodeId, SymOp};

#[derive(Debug, Default)]
pub struct Liveness {
    live_in: HashMap<NodeId, BTreeSet<Slot>>,
}

impl Liveness {
    pub fn compute(graph: &Graph) -> Liveness {
        let mut uses: HashMap<NodeId, BTreeSet<Slot>> = HashMap::new();
        let mut defs: HashMap<NodeId, BTreeSet<Slot>> = HashMap::new();
        for &id in &graph.order {
            let (u, d) = (uses.entry(id).or_default(), defs.entry(id).or_default());
            for step in &graph.nodes[id].steps {
                match step.op {
                    SymOp::Get { slot, .. } | SymOp::Inc(slot) | SymOp::Read(slot) => {
                        if !d.contains(&slot) {
                            u.insert(slot);
                        }
                    }
                    // reads name the base slot only; a wide store also kills
                    // whatever the upper half held
                    SymOp::Set { slot, ref ty } => {
                        d.insert(slot);
                        if ty.as_ref().map_or(false, TypeTag::is_wide) {
                            d.insert(slot.saturating_add(1));
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut live = Liveness::default();
        let mut changed = true;
        while changed {
            changed = false;
            for &id in graph.order.iter().rev() {
                let node = &graph.nodes[id];
                let mut out = BTreeSet::new();
                let mut thrown = BTreeSet::new();
                for (succ, kind) in node.edges() {
                    let succ_in = live.live_in(succ);
                    if kind == EdgeKind::Exception {
                        // the handler may be entered before any store of this node ran
                        thrown.extend(succ_in.iter().copied());
                    } else {
                        out.extend(succ_in.iter().copied());
                    }
                }
                let mut inn: BTreeSet<Slot> = out.difference(&defs[&id]).copied().collect();
                inn.extend(uses[&id].iter().copied());
                inn.extend(thrown);

                if live.live_in.get(&id) != Some(&inn) {
                    live.live_in.insert(id, inn);
                    changed = true;
                }
            }
        }
        live
    }

    pub fn live_in(&self, id: NodeId) -> &BTreeSet<Slot> {
        static EMPTY: BTreeSet<Slot> = BTreeSet::new();
        self.live_in.get(&id).unwrap_or(&EMPTY)
    }
}
