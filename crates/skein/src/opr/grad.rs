use skein_core::{Error, Result, Tensor};

use crate::graph::{GraphData, OpKind, OprId};

// Gradient extraction and in-place parameter update.
//
// Both kinds run as ordinary forward steps, but at fixed points in the
// schedule: extraction after its loss's backward pass has filled the
// gradient slots, update wherever its new value is ready. An update
// mutates the durable storage inside the Parameter node; the values
// already materialized in slots this call are untouched, so operators
// reading the parameter keep seeing the pre-update value.

/// Read the accumulated gradient of the w.r.t. input.
pub(crate) fn gradient_forward(g: &GraphData, id: OprId) -> Result<Tensor> {
    let wrt = g.opr(id).inputs[1];
    g.var(wrt).grad().map(Tensor::clone)
}

/// Overwrite the Parameter behind input 0 with input 1's result, and pass
/// the new value through as this node's output.
pub(crate) fn update_forward(g: &mut GraphData, id: OprId, inputs: &[Tensor]) -> Result<Tensor> {
    let param_var = g.opr(id).inputs[0];
    let owner = g.var(param_var).owner;
    let param_name = g.var(param_var).name.clone();
    match &mut g.opr_mut(owner).kind {
        OpKind::Parameter { value } => {
            *value = inputs[1].clone();
            Ok(inputs[1].clone())
        }
        _ => Err(Error::msg(format!(
            "update target '{param_name}' is not a Parameter output"
        ))),
    }
}
