//! Operator semantics: one forward and one backward step per node kind.
//!
//! The executor drives these two entry points over its schedule; every
//! kind-specific rule (broadcast alignment, reduction layouts, kernel
//! calls, gradient formulas) lives in the submodules.

mod arith;
pub(crate) mod broadcast;
mod cnn;
mod grad;
mod index;
mod reduce;

use skein_core::{Error, Result, Tensor};

use crate::graph::{BinaryOp, GraphData, OpKind, OprId};

/// Evaluate one operator: read input slot values, compute, write the
/// output slot.
pub(crate) fn forward(g: &mut GraphData, id: OprId) -> Result<()> {
    let value = compute_forward(g, id)?;
    let out = g.opr(id).outputs[0];
    g.var_mut(out).set_value(value);
    Ok(())
}

fn gather_inputs(g: &GraphData, id: OprId) -> Result<Vec<Tensor>> {
    g.opr(id)
        .inputs
        .iter()
        .map(|&v| g.var(v).value().map(Tensor::clone))
        .collect()
}

fn compute_forward(g: &mut GraphData, id: OprId) -> Result<Tensor> {
    let inputs = gather_inputs(g, id)?;

    // The two kinds that write back into the graph go first; everything
    // below is read-only.
    match &g.opr(id).kind {
        OpKind::Binary { op, .. } => {
            let op = *op;
            return binary_with_plan(g, id, op, &inputs);
        }
        OpKind::Update => return grad::update_forward(g, id, &inputs),
        _ => {}
    }

    let value = match &g.opr(id).kind {
        OpKind::Placeholder { pending } => match pending {
            Some(v) => v.clone(),
            None => {
                return Err(Error::UnboundInput {
                    name: g.opr(id).name.clone(),
                })
            }
        },
        OpKind::Parameter { value } => value.clone(),
        OpKind::Immutable { value } => value.clone(),

        OpKind::Neg => inputs[0].neg(),
        OpKind::Exp => inputs[0].map(f64::exp),
        OpKind::Log => inputs[0].map(f64::ln),
        OpKind::Tanh => inputs[0].map(f64::tanh),
        OpKind::SumAll => Tensor::scalar(inputs[0].sum_all()),

        OpKind::Matmul => inputs[0].matmul(&inputs[1])?,

        OpKind::ShapeOf => index::shape_of(&inputs[0]),
        OpKind::ShapeIndex => index::shape_index(&inputs[0], &inputs[1])?,
        OpKind::Flatten => index::flatten(&inputs[0])?,
        OpKind::IndexOnehot { axis } => {
            index::index_onehot_forward(&inputs[0], &inputs[1], *axis)?
        }

        OpKind::Reduce { op, axis, keepdims } => {
            reduce::reduce_forward(*op, &inputs[0], *axis, *keepdims)?
        }

        OpKind::Conv2d { padding, stride } => {
            cnn::conv2d_forward(&inputs[0], &inputs[1], *padding, *stride)?
        }
        OpKind::Pooling2d {
            kernel,
            padding,
            stride,
            mode,
        } => cnn::pooling2d_forward(&inputs[0], *kernel, *padding, *stride, *mode)?,

        OpKind::Gradient => grad::gradient_forward(g, id)?,

        // Handled above.
        OpKind::Binary { .. } | OpKind::Update => {
            return Err(Error::msg("unreachable operator dispatch"))
        }
    };
    Ok(value)
}

/// Binary forward: resolve alignment, expand the small side, evaluate,
/// and record the plan on the node for the backward pass.
fn binary_with_plan(
    g: &mut GraphData,
    id: OprId,
    op: BinaryOp,
    inputs: &[Tensor],
) -> Result<Tensor> {
    let plan = broadcast::resolve(inputs[0].shape(), inputs[1].shape())?;
    let value = match &plan {
        None => arith::binary_forward(op, &inputs[0], &inputs[1])?,
        Some(p) if p.small == 0 => {
            let a = p.expand(&inputs[0])?;
            arith::binary_forward(op, &a, &inputs[1])?
        }
        Some(p) => {
            let b = p.expand(&inputs[1])?;
            arith::binary_forward(op, &inputs[0], &b)?
        }
    };
    if let OpKind::Binary { plan: slot, .. } = &mut g.opr_mut(id).kind {
        *slot = plan;
    }
    Ok(value)
}

/// Propagate this operator's output gradient to every input flagged
/// need-grad. Inputs that receive no analytic gradient (comparisons,
/// shape introspection, the parameter side of an update) get a symbolic
/// zero, so their slots are still initialized.
pub(crate) fn backward(g: &mut GraphData, id: OprId) -> Result<()> {
    let (input_ids, out) = {
        let node = g.opr(id);
        (node.inputs.clone(), node.outputs[0])
    };
    if input_ids.is_empty() {
        return Ok(());
    }
    let needs: Vec<bool> = input_ids.iter().map(|&v| g.var(v).need_grad).collect();
    if !needs.iter().any(|&n| n) {
        return Ok(());
    }

    let gy = g.var(out).grad()?.clone();
    let y = g.var(out).value()?.clone();
    let xs = gather_inputs(g, id)?;

    let contribs: Vec<Option<Tensor>> = match &g.opr(id).kind {
        OpKind::Placeholder { .. } | OpKind::Parameter { .. } | OpKind::Immutable { .. } => {
            Vec::new()
        }

        OpKind::Neg => vec![Some(gy.neg())],
        OpKind::Exp => vec![Some(gy.mul(&y)?)],
        OpKind::Log => vec![Some(gy.zip(&xs[0], |gv, xv| gv / xv)?)],
        OpKind::Tanh => vec![Some(gy.zip(&y, |gv, yv| gv * (1.0 - yv * yv))?)],
        OpKind::SumAll => vec![Some(Tensor::full(xs[0].shape().clone(), gy.item()?))],

        OpKind::Binary { op, plan } => {
            let op = *op;
            let plan = plan.clone();
            let (a, b) = match &plan {
                None => (xs[0].clone(), xs[1].clone()),
                Some(p) if p.small == 0 => (p.expand(&xs[0])?, xs[1].clone()),
                Some(p) => (xs[0].clone(), p.expand(&xs[1])?),
            };
            let (ga, gb) = arith::binary_backward(op, &a, &b, &y, &gy, (needs[0], needs[1]))?;
            let ga = match (&plan, ga) {
                (Some(p), Some(t)) if p.small == 0 => Some(p.fold(&t)?),
                (_, other) => other,
            };
            let gb = match (&plan, gb) {
                (Some(p), Some(t)) if p.small == 1 => Some(p.fold(&t)?),
                (_, other) => other,
            };
            vec![ga, gb]
        }

        OpKind::Matmul => {
            let (ga, gb) = arith::matmul_backward(&xs[0], &xs[1], &gy, (needs[0], needs[1]))?;
            vec![ga, gb]
        }

        OpKind::ShapeOf => vec![None],
        OpKind::ShapeIndex => vec![None, None],
        OpKind::Flatten => vec![Some(gy.reshape(xs[0].shape().clone())?)],
        OpKind::IndexOnehot { axis } => vec![
            Some(index::index_onehot_backward(&xs[0], &xs[1], &gy, *axis)?),
            None,
        ],

        OpKind::Reduce { op, axis, keepdims } => {
            vec![Some(reduce::reduce_backward(
                *op, &xs[0], &gy, *axis, *keepdims,
            )?)]
        }

        OpKind::Conv2d { padding, stride } => {
            let (gx, gk) = cnn::conv2d_backward(
                &xs[0],
                &xs[1],
                &gy,
                *padding,
                *stride,
                (needs[0], needs[1]),
            )?;
            vec![gx, gk]
        }
        OpKind::Pooling2d {
            kernel,
            padding,
            stride,
            mode,
        } => vec![Some(cnn::pooling2d_backward(
            &xs[0], &gy, *kernel, *padding, *stride, *mode,
        )?)],

        // Extractions are never differentiated through (rejected at
        // compile time); the update's new-value input takes the output
        // gradient unchanged, its parameter input takes nothing.
        OpKind::Gradient => vec![None, None],
        OpKind::Update => vec![None, Some(gy.clone())],
    };

    for ((&vid, &need), contrib) in input_ids.iter().zip(needs.iter()).zip(contribs) {
        if need {
            g.var_mut(vid).accumulate_grad(contrib)?;
        }
    }
    Ok(())
}
