use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use skein_core::{Error, Result};

use super::node::{Graph, GraphData, OpKind, OprId, Var, VarId};
use super::sort::topo_sort;

// Compilation
//
// Compiling freezes a schedule for a set of requested outputs. The
// schedule has three regions:
//
//   pre_grad   — everything each loss depends on, forward order
//   per loss   — the operators to re-walk backward, plus the gradient
//                extraction operators to run once gradients exist
//   post_grad  — everything else the outputs need, assuming the first
//                two regions already ran
//
// Gradient extraction operators are grouped by their loss input, in the
// order the sorter first discovered them, so two compiles of the same
// graph always produce the same schedule.

/// Per-loss backward plan, fixed at compile time.
pub(crate) struct LossPlan {
    /// The loss variable slot (must evaluate to a single element).
    pub loss: VarId,
    /// Gradient extraction operators reading gradients of this loss.
    pub grad_oprs: Vec<OprId>,
    /// Operators walked backward for this loss, in forward topological
    /// order (the executor reverses them).
    pub rel_oprs: Vec<OprId>,
    /// Variable slots flagged need-grad before this loss's backward pass:
    /// the requested slots plus everything between them and the loss.
    pub need_grad: Vec<VarId>,
}

/// A compiled, immutable schedule over a shared graph arena.
///
/// Calling it evaluates the requested outputs (see `Function::call`).
/// Several Functions compiled from one Graph share Parameter state.
pub struct Function {
    pub(crate) graph: Rc<RefCell<GraphData>>,
    pub(crate) outputs: Vec<VarId>,
    pub(crate) all_oprs: Vec<OprId>,
    pub(crate) pre_grad: Vec<OprId>,
    pub(crate) losses: Vec<LossPlan>,
    pub(crate) post_grad: Vec<OprId>,
}

impl Graph {
    /// Compile a schedule evaluating `outputs`, in order.
    ///
    /// Fails if an output belongs to a different graph, if a gradient
    /// extraction depends on another gradient extraction (nested
    /// differentiation), or if a loss does not depend on its w.r.t.
    pub fn compile(&self, outputs: &[Var]) -> Result<Function> {
        for v in outputs {
            if !Rc::ptr_eq(&v.graph, &self.inner) {
                return Err(Error::msg(format!(
                    "output '{}' belongs to a different graph",
                    v.name()
                )));
            }
        }
        let out_ids: Vec<VarId> = outputs.iter().map(|v| v.id).collect();
        let g = self.inner.borrow();

        let all = topo_sort(&g, &out_ids, &[])?;

        // Gradient extractions, in schedule order.
        let grad_oprs: Vec<OprId> = all
            .order
            .iter()
            .copied()
            .filter(|&o| matches!(g.opr(o).kind, OpKind::Gradient))
            .collect();

        // Differentiating a gradient is not supported: no extraction may
        // have another extraction in its dependency closure.
        for &go in &grad_oprs {
            if closure_has_gradient(&g, go) {
                return Err(Error::UnsupportedGraph(format!(
                    "'{}' differentiates through another gradient; \
                     nested differentiation is not supported",
                    g.opr(go).display_name()
                )));
            }
        }

        // Group extractions by loss, preserving schedule order.
        let mut groups: Vec<(VarId, Vec<OprId>)> = Vec::new();
        for &go in &grad_oprs {
            let loss = g.opr(go).inputs[0];
            match groups.iter_mut().find(|(l, _)| *l == loss) {
                Some((_, oprs)) => oprs.push(go),
                None => groups.push((loss, vec![go])),
            }
        }

        let loss_ids: Vec<VarId> = groups.iter().map(|(l, _)| *l).collect();
        let pre_grad = topo_sort(&g, &loss_ids, &[])?.order;

        let mut losses = Vec::with_capacity(groups.len());
        for (loss, group) in groups {
            losses.push(plan_loss(&g, loss, group)?);
        }

        // Everything the outputs still need once losses, backward passes
        // and extractions have run.
        let mut satisfied = pre_grad.clone();
        satisfied.extend(grad_oprs.iter().copied());
        let post_grad = topo_sort(&g, &out_ids, &satisfied)?.order;

        Ok(Function {
            graph: Rc::clone(&self.inner),
            outputs: out_ids,
            all_oprs: all.order,
            pre_grad,
            losses,
            post_grad,
        })
    }
}

// Reachability queries over the same sorter, for callers that want to
// inspect or post-process a graph without compiling it (for example,
// building one update node per trainable source).
impl Graph {
    fn sorted_reachable(&self, outputs: &[Var]) -> Result<Vec<OprId>> {
        let g = self.inner.borrow();
        let ids: Vec<VarId> = outputs.iter().map(|v| v.id).collect();
        Ok(topo_sort(&g, &ids, &[])?.order)
    }

    /// Display names of every operator reachable from `outputs`, in
    /// topological order.
    pub fn reachable_oprs(&self, outputs: &[Var]) -> Result<Vec<String>> {
        let order = self.sorted_reachable(outputs)?;
        let g = self.inner.borrow();
        Ok(order.iter().map(|&o| g.opr(o).display_name()).collect())
    }

    /// Find a reachable operator by its (explicit or auto-generated) name
    /// and return its output handle.
    pub fn find_opr(&self, outputs: &[Var], name: &str) -> Result<Option<Var>> {
        let order = self.sorted_reachable(outputs)?;
        let found = {
            let g = self.inner.borrow();
            order
                .iter()
                .find(|&&o| g.opr(o).name == name || g.opr(o).auto_name == name)
                .map(|&o| g.opr(o).outputs[0])
        };
        Ok(found.map(|v| self.var_handle(v)))
    }

    /// The reachable trainable sources (Parameter outputs), in
    /// topological order.
    pub fn trainable_params(&self, outputs: &[Var]) -> Result<Vec<Var>> {
        let order = self.sorted_reachable(outputs)?;
        let params: Vec<VarId> = {
            let g = self.inner.borrow();
            order
                .iter()
                .filter(|&&o| g.opr(o).kind.is_trainable_source())
                .map(|&o| g.opr(o).outputs[0])
                .collect()
        };
        Ok(params.into_iter().map(|v| self.var_handle(v)).collect())
    }
}

/// Build the backward plan for one loss and its extraction group.
fn plan_loss(g: &GraphData, loss: VarId, grad_oprs: Vec<OprId>) -> Result<LossPlan> {
    let full = topo_sort(g, &[loss], &[])?;
    let in_closure = full.member_mask(g);

    let wrts: Vec<VarId> = grad_oprs.iter().map(|&o| g.opr(o).inputs[1]).collect();
    for &w in &wrts {
        if !in_closure[g.var(w).owner.0] {
            return Err(Error::UnsupportedGraph(format!(
                "loss '{}' does not depend on '{}'",
                g.var(loss).name,
                g.var(w).name
            )));
        }
    }

    // Operators between the requested slots and the loss: re-sort with the
    // slots' producers treated as satisfied, so the backward walk skips
    // everything upstream of them.
    let wrt_owners: Vec<OprId> = wrts.iter().map(|&w| g.var(w).owner).collect();
    let rel = topo_sort(g, &[loss], &wrt_owners)?;
    let rel_mask = rel.member_mask(g);

    // need-grad labeling: flood forward from the requested slots along
    // consumer edges, staying inside the backward region. The loss slot
    // itself is flagged so the unit seed has somewhere to land.
    let mut need = vec![false; g.vars.len()];
    let mut queue: VecDeque<VarId> = VecDeque::new();
    for &w in &wrts {
        if !need[w.0] {
            need[w.0] = true;
            queue.push_back(w);
        }
    }
    while let Some(v) = queue.pop_front() {
        if let Some(consumers) = full.out_edges.get(&v) {
            for &c in consumers {
                if !rel_mask[c.0] {
                    continue;
                }
                for &out in &g.opr(c).outputs {
                    if !need[out.0] {
                        need[out.0] = true;
                        queue.push_back(out);
                    }
                }
            }
        }
    }
    need[loss.0] = true;
    let need_grad: Vec<VarId> = (0..g.vars.len())
        .filter(|&i| need[i])
        .map(VarId)
        .collect();

    Ok(LossPlan {
        loss,
        grad_oprs,
        rel_oprs: rel.order,
        need_grad,
    })
}

/// Whether any operator in `opr`'s dependency closure (excluding itself)
/// is a gradient extraction.
fn closure_has_gradient(g: &GraphData, opr: OprId) -> bool {
    let mut visited = vec![false; g.oprs.len()];
    visited[opr.0] = true;
    let mut queue: VecDeque<OprId> = VecDeque::new();
    for &input in &g.opr(opr).inputs {
        let p = g.var(input).owner;
        if !visited[p.0] {
            visited[p.0] = true;
            queue.push_back(p);
        }
    }
    while let Some(o) = queue.pop_front() {
        if matches!(g.opr(o).kind, OpKind::Gradient) {
            return true;
        }
        for &input in &g.opr(o).inputs {
            let p = g.var(input).owner;
            if !visited[p.0] {
                visited[p.0] = true;
                queue.push_back(p);
            }
        }
    }
    false
}
