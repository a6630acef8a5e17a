use std::collections::HashMap;

use skein_core::{Error, Result, Tensor};

use super::compile::Function;
use super::node::{GraphData, OpKind};
use crate::opr;

// Execution
//
// A call is one pass over the compiled schedule:
//
//   1. reset every slot the schedule touches, then stage the caller's
//      bindings on the placeholder nodes
//   2. run the pre-gradient region forward
//   3. for each loss: flag the need-grad slots, seed a unit gradient at
//      the loss, walk its region backward, then run its gradient
//      extractions forward
//   4. run the post-gradient region forward and collect the outputs
//
// Gradient state never survives a call, and each loss's backward pass
// starts from cleared gradients, so losses cannot contaminate each other.

impl Function {
    /// Evaluate the compiled outputs, in compile order.
    ///
    /// `bindings` maps placeholder names to this call's input tensors.
    /// Every placeholder the schedule reaches must be bound; extra
    /// bindings are ignored.
    pub fn call(&self, bindings: &HashMap<String, Tensor>) -> Result<Vec<Tensor>> {
        let mut guard = self.graph.borrow_mut();
        let g = &mut *guard;
        self.reset(g);
        self.bind(g, bindings)?;

        for &o in &self.pre_grad {
            opr::forward(g, o)?;
        }

        for plan in &self.losses {
            let loss_shape = {
                let slot = g.var(plan.loss);
                let value = slot.value()?;
                if value.elem_count() != 1 {
                    return Err(Error::NotAScalar {
                        shape: value.shape().clone(),
                    });
                }
                value.shape().clone()
            };

            for slot in g.vars.iter_mut() {
                slot.clear_grad();
            }
            for &v in &plan.need_grad {
                g.var_mut(v).need_grad = true;
            }
            g.var_mut(plan.loss)
                .accumulate_grad(Some(Tensor::ones(loss_shape)))?;

            for &o in plan.rel_oprs.iter().rev() {
                opr::backward(g, o)?;
            }
            for &o in &plan.grad_oprs {
                opr::forward(g, o)?;
            }
        }

        for &o in &self.post_grad {
            opr::forward(g, o)?;
        }

        let mut results = Vec::with_capacity(self.outputs.len());
        for &v in &self.outputs {
            results.push(g.var(v).value()?.clone());
        }
        Ok(results)
    }

    /// Drop all transient state the schedule touches: slot values and
    /// gradients, staged placeholder bindings, recorded broadcast plans.
    fn reset(&self, g: &mut GraphData) {
        for &o in &self.all_oprs {
            match &mut g.opr_mut(o).kind {
                OpKind::Placeholder { pending } => *pending = None,
                OpKind::Binary { plan, .. } => *plan = None,
                _ => {}
            }
            let outputs = g.opr(o).outputs.clone();
            for v in outputs {
                g.var_mut(v).clear_state();
            }
        }
    }

    /// Stage bindings on every placeholder in the schedule. The binding
    /// key is the placeholder's node name.
    fn bind(&self, g: &mut GraphData, bindings: &HashMap<String, Tensor>) -> Result<()> {
        for &o in &self.all_oprs {
            let name = match &g.opr(o).kind {
                OpKind::Placeholder { .. } => g.opr(o).name.clone(),
                _ => continue,
            };
            let value = bindings
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::UnboundInput { name: name.clone() })?;
            if let OpKind::Placeholder { pending } = &mut g.opr_mut(o).kind {
                *pending = Some(value);
            }
        }
        Ok(())
    }
}
