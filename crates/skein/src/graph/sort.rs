use std::collections::{HashMap, VecDeque};

use skein_core::{Error, Result};

use super::node::{GraphData, OprId, VarId};

// Dependency sorter
//
// Given a set of target variable slots, discover every operator they
// transitively depend on and produce a topological order plus the
// consumer (out-)edge map the compiler needs for reachability labeling.
//
// Ordering is Kahn's algorithm with a FIFO queue seeded in discovery
// order, so ties break deterministically by when an operator was first
// reached, not by any incidental identity.
//
// `satisfied` lists operators whose results are assumed already computed
// (used for incremental scheduling of the post-gradient region): they are
// excluded from discovery, and the in-degrees of their consumers are
// pre-decremented accordingly.

/// Result of a dependency sort.
pub(crate) struct TopoSort {
    /// Reachable operators in topological order (producers first).
    pub order: Vec<OprId>,
    /// For each variable slot, the discovered operators consuming it.
    /// A slot consumed twice by one operator appears twice.
    pub out_edges: HashMap<VarId, Vec<OprId>>,
}

impl TopoSort {
    /// Membership test over the sorted set, as a dense mask.
    pub fn member_mask(&self, g: &GraphData) -> Vec<bool> {
        let mut mask = vec![false; g.oprs.len()];
        for &o in &self.order {
            mask[o.0] = true;
        }
        mask
    }
}

pub(crate) fn topo_sort(g: &GraphData, targets: &[VarId], satisfied: &[OprId]) -> Result<TopoSort> {
    let n = g.oprs.len();
    let mut visited = vec![false; n];
    for &s in satisfied {
        visited[s.0] = true;
    }

    // Discovery: breadth-first from each target's owner, walking input
    // edges backward. Every reachable, unsatisfied operator exactly once.
    let mut related: Vec<OprId> = Vec::new();
    let mut queue: VecDeque<OprId> = VecDeque::new();
    for &t in targets {
        let owner = g.var(t).owner;
        if visited[owner.0] {
            continue;
        }
        visited[owner.0] = true;
        queue.push_back(owner);
        while let Some(opr) = queue.pop_front() {
            related.push(opr);
            for &input in &g.opr(opr).inputs {
                let producer = g.var(input).owner;
                if !visited[producer.0] {
                    visited[producer.0] = true;
                    queue.push_back(producer);
                }
            }
        }
    }

    // In-degrees and consumer edges over the discovered set.
    let mut degree: HashMap<OprId, usize> = HashMap::with_capacity(related.len());
    let mut out_edges: HashMap<VarId, Vec<OprId>> = HashMap::new();
    for &opr in &related {
        degree.insert(opr, g.opr(opr).inputs.len());
        for &input in &g.opr(opr).inputs {
            out_edges.entry(input).or_default().push(opr);
        }
    }

    // Inputs produced by satisfied operators count as already resolved.
    // The list may name an operator twice (two extractions sharing one
    // w.r.t. producer); decrement only once per operator.
    let mut seen = vec![false; n];
    for &s in satisfied {
        if seen[s.0] {
            continue;
        }
        seen[s.0] = true;
        for &out in &g.opr(s).outputs {
            if let Some(consumers) = out_edges.get(&out) {
                for &c in consumers {
                    if let Some(d) = degree.get_mut(&c) {
                        *d -= 1;
                    }
                }
            }
        }
    }

    let mut ready: VecDeque<OprId> = related
        .iter()
        .copied()
        .filter(|o| degree[o] == 0)
        .collect();
    let mut order = Vec::with_capacity(related.len());
    while let Some(opr) = ready.pop_front() {
        order.push(opr);
        for &out in &g.opr(opr).outputs {
            if let Some(consumers) = out_edges.get(&out) {
                for &c in consumers {
                    let d = degree
                        .get_mut(&c)
                        .ok_or_else(|| Error::msg("consumer outside discovered set"))?;
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(c);
                    }
                }
            }
        }
    }

    // Anything still above zero in-degree never became ready: the graph
    // has a cycle (or an input fed by an undiscovered producer, which the
    // arena construction rules make impossible).
    for (&opr, &d) in &degree {
        if d != 0 {
            return Err(Error::CycleDetected {
                opr: g.opr(opr).display_name(),
            });
        }
    }

    Ok(TopoSort { order, out_edges })
}
