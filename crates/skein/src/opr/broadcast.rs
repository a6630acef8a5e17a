use skein_core::{Error, Result, Shape, Tensor};

// Broadcast resolution for binary elementwise operators
//
// Exactly one operand may be reshaped: the one with fewer non-unit
// dimensions (the "small" side). Its non-unit dimensions are matched, in
// order, against the other operand's non-unit axes; every unmatched axis
// of the target is synthesized by repetition (stride 0). If a non-unit
// dimension of the small side finds no match, the shapes are incompatible.
//
// The resulting plan is recorded on the operator node during the forward
// pass and consumed by the backward pass: gradients flowing to the small
// side are summed over the synthesized axes and reshaped back.

/// How a binary operand pair was aligned, fixed per forward pass.
#[derive(Debug, Clone)]
pub struct BroadcastPlan {
    /// Which input (0 = lhs, 1 = rhs) was expanded.
    pub(crate) small: usize,
    /// Shape the expanded operand had before expansion.
    pub(crate) small_shape: Shape,
    /// Shape both operands take during evaluation (the other operand's).
    pub(crate) eval_shape: Shape,
    /// Evaluation axes synthesized by repetition.
    pub(crate) broadcast_axes: Vec<usize>,
    /// Per evaluation axis, the stride into the small operand's buffer
    /// (0 for synthesized and unit axes).
    pub(crate) strides: Vec<usize>,
}

/// Work out how to align `lhs` and `rhs`. `Ok(None)` means the shapes
/// already match and no plan is needed.
pub(crate) fn resolve(lhs: &Shape, rhs: &Shape) -> Result<Option<BroadcastPlan>> {
    if lhs == rhs {
        return Ok(None);
    }
    let lhs_nu = lhs.non_unit_axes();
    let rhs_nu = rhs.non_unit_axes();
    // The operand with fewer non-unit dims bends; on a tie, the one with
    // fewer elements.
    let small = if lhs_nu.len() != rhs_nu.len() {
        if lhs_nu.len() < rhs_nu.len() {
            0
        } else {
            1
        }
    } else if lhs.elem_count() <= rhs.elem_count() {
        0
    } else {
        1
    };
    let (small_shape, target) = if small == 0 { (lhs, rhs) } else { (rhs, lhs) };

    let small_nu = small_shape.non_unit_axes();
    let small_strides = small_shape.stride_contiguous();
    let small_dims = small_shape.dims();
    let target_dims = target.dims();

    let mut strides = vec![0usize; target.rank()];
    let mut broadcast_axes = Vec::new();
    let mut next = 0;
    for &axis in &target.non_unit_axes() {
        if next < small_nu.len() && target_dims[axis] == small_dims[small_nu[next]] {
            strides[axis] = small_strides[small_nu[next]];
            next += 1;
        } else {
            broadcast_axes.push(axis);
        }
    }
    if next < small_nu.len() {
        return Err(Error::BroadcastMismatch {
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        });
    }

    Ok(Some(BroadcastPlan {
        small,
        small_shape: small_shape.clone(),
        eval_shape: target.clone(),
        broadcast_axes,
        strides,
    }))
}

impl BroadcastPlan {
    /// Materialize the small operand at the evaluation shape.
    pub(crate) fn expand(&self, t: &Tensor) -> Result<Tensor> {
        if *t.shape() != self.small_shape {
            return Err(Error::ShapeMismatch {
                expected: self.small_shape.clone(),
                got: t.shape().clone(),
            });
        }
        let eval_strides = self.eval_shape.stride_contiguous();
        let src = t.data();
        let mut out = vec![0.0; self.eval_shape.elem_count()];
        for (flat, slot) in out.iter_mut().enumerate() {
            let mut src_flat = 0;
            let mut rem = flat;
            for (d, &es) in eval_strides.iter().enumerate() {
                let coord = rem / es;
                rem %= es;
                src_flat += coord * self.strides[d];
            }
            *slot = src[src_flat];
        }
        Tensor::from_vec(out, self.eval_shape.clone())
    }

    /// Collapse an evaluation-shaped gradient back to the small operand's
    /// shape: sum over the synthesized axes, then restore unit dims.
    pub(crate) fn fold(&self, grad: &Tensor) -> Result<Tensor> {
        let summed = if self.broadcast_axes.is_empty() {
            grad.clone()
        } else {
            grad.sum_axes(&self.broadcast_axes)?
        };
        summed.reshape(self.small_shape.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(lhs: impl Into<Shape>, rhs: impl Into<Shape>) -> Result<Option<BroadcastPlan>> {
        resolve(&lhs.into(), &rhs.into())
    }

    #[test]
    fn test_equal_shapes_need_no_plan() {
        assert!(plan((2, 3), (2, 3)).unwrap().is_none());
    }

    #[test]
    fn test_scalar_against_vector() {
        let p = plan(5, 1).unwrap().unwrap();
        assert_eq!(p.small, 1);
        assert_eq!(p.eval_shape, Shape::from(5));
        assert_eq!(p.broadcast_axes, vec![0]);

        let x = Tensor::scalar(2.0);
        let e = p.expand(&x).unwrap();
        assert_eq!(e.to_vec(), vec![2.0; 5]);

        let g = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0], 5).unwrap();
        let folded = p.fold(&g).unwrap();
        assert_eq!(folded.dims(), &[1]);
        assert_eq!(folded.to_vec(), vec![15.0]);
    }

    #[test]
    fn test_row_against_matrix() {
        let p = plan((2, 3), 3).unwrap().unwrap();
        assert_eq!(p.small, 1);
        assert_eq!(p.eval_shape, Shape::from((2, 3)));
        assert_eq!(p.broadcast_axes, vec![0]);

        let row = Tensor::from_vec(vec![1.0, 2.0, 3.0], 3).unwrap();
        let e = p.expand(&row).unwrap();
        assert_eq!(e.to_vec(), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);

        let g = Tensor::ones((2, 3));
        assert_eq!(p.fold(&g).unwrap().to_vec(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_unit_axes_are_skipped() {
        // [1, 3] against [2, 3]: the unit axis carries nothing.
        let p = plan((1, 3), (2, 3)).unwrap().unwrap();
        assert_eq!(p.small, 0);
        assert_eq!(p.broadcast_axes, vec![0]);
        let g = Tensor::ones((2, 3));
        let folded = p.fold(&g).unwrap();
        assert_eq!(folded.dims(), &[1, 3]);
        assert_eq!(folded.to_vec(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_interleaved_alignment() {
        // [3, 1, 4] aligns against [2, 3, 5, 4] on the 3 and 4 axes.
        let p = plan((3, 1, 4), (2, 3, 5, 4)).unwrap().unwrap();
        assert_eq!(p.small, 0);
        assert_eq!(p.broadcast_axes, vec![0, 2]);
        assert_eq!(p.strides, vec![0, 4, 0, 1]);
    }

    #[test]
    fn test_incompatible_extent() {
        // 6 elements cannot align with either axis of [2, 3].
        match plan(6, (2, 3)) {
            Err(Error::BroadcastMismatch { .. }) => {}
            other => panic!("expected broadcast mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_no_mutual_broadcast() {
        // [2, 1] against [1, 3] would require expanding both sides.
        assert!(plan((2, 1), (1, 3)).is_err());
    }
}
