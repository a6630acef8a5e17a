use skein_core::{Error, Result, Shape, Tensor};

use crate::graph::ReduceOp;

// Axis reductions.
//
// The reduced axis is moved to the end so every window is a contiguous
// row; the backward pass works on the same layout and moves the axis
// back. Max/min route the gradient to the first position attaining the
// extreme, matching the forward tie choice.

fn check_axis(x: &Tensor, axis: usize) -> Result<()> {
    if axis >= x.rank() {
        return Err(Error::DimOutOfRange {
            dim: axis,
            rank: x.rank(),
        });
    }
    Ok(())
}

/// Output shape of reducing `axis`: either kept as size 1 or removed
/// (removing the only axis yields [1]).
fn reduced_shape(x: &Tensor, axis: usize, keepdims: bool) -> Shape {
    let mut dims: Vec<usize> = x.dims().to_vec();
    if keepdims {
        dims[axis] = 1;
    } else {
        dims.remove(axis);
        if dims.is_empty() {
            dims.push(1);
        }
    }
    Shape::new(dims)
}

pub(crate) fn reduce_forward(
    op: ReduceOp,
    x: &Tensor,
    axis: usize,
    keepdims: bool,
) -> Result<Tensor> {
    check_axis(x, axis)?;
    let rank = x.rank();
    let n = x.dims()[axis];
    let rows = x.elem_count() / n;
    let xm = x.moveaxis(axis, rank - 1)?;
    let xd = xm.data();

    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        let row = &xd[i * n..(i + 1) * n];
        let v = match op {
            ReduceOp::Sum => row.iter().sum(),
            ReduceOp::Max => row.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ReduceOp::Min => row.iter().copied().fold(f64::INFINITY, f64::min),
        };
        out.push(v);
    }
    Tensor::from_vec(out, reduced_shape(x, axis, keepdims))
}

pub(crate) fn reduce_backward(
    op: ReduceOp,
    x: &Tensor,
    gy: &Tensor,
    axis: usize,
    keepdims: bool,
) -> Result<Tensor> {
    check_axis(x, axis)?;
    let rank = x.rank();
    let n = x.dims()[axis];
    let rows = x.elem_count() / n;
    let expected = reduced_shape(x, axis, keepdims);
    if *gy.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected,
            got: gy.shape().clone(),
        });
    }
    let xm = x.moveaxis(axis, rank - 1)?;
    let xd = xm.data();
    let gd = gy.data();

    let mut gxm = vec![0.0; x.elem_count()];
    for i in 0..rows {
        match op {
            ReduceOp::Sum => {
                for j in 0..n {
                    gxm[i * n + j] = gd[i];
                }
            }
            ReduceOp::Max | ReduceOp::Min => {
                let row = &xd[i * n..(i + 1) * n];
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    let better = match op {
                        ReduceOp::Max => v > row[best],
                        _ => v < row[best],
                    };
                    if better {
                        best = j;
                    }
                }
                gxm[i * n + best] = gd[i];
            }
        }
    }
    Tensor::from_vec(gxm, xm.shape().clone())?.moveaxis(rank - 1, axis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_sum_axes() {
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap();
        let rows = reduce_forward(ReduceOp::Sum, &x, 1, false).unwrap();
        assert_eq!(rows.dims(), &[2]);
        assert_eq!(rows.to_vec(), vec![6.0, 15.0]);
        let cols = reduce_forward(ReduceOp::Sum, &x, 0, true).unwrap();
        assert_eq!(cols.dims(), &[1, 3]);
        assert_eq!(cols.to_vec(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_reduce_max_min() {
        let x = Tensor::from_vec(vec![3.0, 1.0, 2.0, 6.0, 5.0, 4.0], (2, 3)).unwrap();
        let mx = reduce_forward(ReduceOp::Max, &x, 1, false).unwrap();
        assert_eq!(mx.to_vec(), vec![3.0, 6.0]);
        let mn = reduce_forward(ReduceOp::Min, &x, 1, false).unwrap();
        assert_eq!(mn.to_vec(), vec![1.0, 4.0]);
    }

    #[test]
    fn test_sum_backward_spreads() {
        let x = Tensor::zeros((2, 3));
        let gy = Tensor::from_vec(vec![1.0, 2.0], 2).unwrap();
        let gx = reduce_backward(ReduceOp::Sum, &x, &gy, 1, false).unwrap();
        assert_eq!(gx.to_vec(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_max_backward_first_winner() {
        // Both elements tie: the gradient goes to the first.
        let x = Tensor::from_vec(vec![7.0, 7.0], 2).unwrap();
        let gy = Tensor::scalar(3.0);
        let gx = reduce_backward(ReduceOp::Max, &x, &gy, 0, false).unwrap();
        assert_eq!(gx.to_vec(), vec![3.0, 0.0]);
    }

    #[test]
    fn test_reduce_only_axis_yields_unit_shape() {
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0], 3).unwrap();
        let s = reduce_forward(ReduceOp::Sum, &x, 0, false).unwrap();
        assert_eq!(s.dims(), &[1]);
        assert_eq!(s.to_vec(), vec![6.0]);
    }

    #[test]
    fn test_axis_out_of_range() {
        let x = Tensor::zeros((2, 3));
        assert!(reduce_forward(ReduceOp::Sum, &x, 2, false).is_err());
    }
}
