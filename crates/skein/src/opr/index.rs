use skein_core::{Error, Result, Shape, Tensor};

// Shape introspection, flattening and one-hot indexing.

/// The input's dimension sizes as a 1-D tensor.
pub(crate) fn shape_of(x: &Tensor) -> Tensor {
    Tensor::from(x.dims().iter().map(|&d| d as f64).collect::<Vec<f64>>())
}

/// One dimension size, selected by a one-element index tensor.
pub(crate) fn shape_index(x: &Tensor, idx: &Tensor) -> Result<Tensor> {
    let raw = idx.item()?;
    if raw < 0.0 || raw.fract() != 0.0 {
        return Err(Error::msg(format!(
            "shape index must be a non-negative integer, got {raw}"
        )));
    }
    let d = raw as usize;
    Ok(Tensor::scalar(x.shape().dim(d)? as f64))
}

/// Collapse all trailing dimensions: [b, ...] -> [b, rest].
pub(crate) fn flatten(x: &Tensor) -> Result<Tensor> {
    let b = x.dims()[0];
    let rest = if b == 0 { 0 } else { x.elem_count() / b };
    x.reshape((b, rest))
}

fn onehot_layout(x: &Tensor, idx: &Tensor, axis: usize) -> Result<(usize, usize)> {
    if axis >= x.rank() {
        return Err(Error::DimOutOfRange {
            dim: axis,
            rank: x.rank(),
        });
    }
    let n = x.dims()[axis];
    let rows = x.elem_count() / n;
    if idx.elem_count() != rows {
        return Err(Error::ElementCountMismatch {
            shape: idx.shape().clone(),
            expected: rows,
            got: idx.elem_count(),
        });
    }
    Ok((n, rows))
}

fn onehot_index(idx_val: f64, n: usize) -> Result<usize> {
    let j = idx_val as usize;
    if idx_val < 0.0 || idx_val.fract() != 0.0 || j >= n {
        return Err(Error::msg(format!(
            "one-hot index {idx_val} out of range for axis extent {n}"
        )));
    }
    Ok(j)
}

/// For each position of `idx`, the element of `x` at that index along
/// `axis`. Output shape is `x`'s shape with `axis` removed.
pub(crate) fn index_onehot_forward(x: &Tensor, idx: &Tensor, axis: usize) -> Result<Tensor> {
    let (n, rows) = onehot_layout(x, idx, axis)?;
    let xm = x.moveaxis(axis, x.rank() - 1)?;
    let xd = xm.data();
    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        let j = onehot_index(idx.data()[i], n)?;
        out.push(xd[i * n + j]);
    }
    let mut dims: Vec<usize> = x.dims().to_vec();
    dims.remove(axis);
    let shape = if dims.is_empty() {
        Shape::from(1)
    } else {
        Shape::new(dims)
    };
    Tensor::from_vec(out, shape)
}

/// Scatter the output gradient back to the selected positions.
pub(crate) fn index_onehot_backward(
    x: &Tensor,
    idx: &Tensor,
    gy: &Tensor,
    axis: usize,
) -> Result<Tensor> {
    let (n, rows) = onehot_layout(x, idx, axis)?;
    let rank = x.rank();
    let gd = gy.data();
    let mut gxm = vec![0.0; x.elem_count()];
    for i in 0..rows {
        let j = onehot_index(idx.data()[i], n)?;
        gxm[i * n + j] = gd[i];
    }
    let moved = x.moveaxis(axis, rank - 1)?;
    Tensor::from_vec(gxm, moved.shape().clone())?.moveaxis(rank - 1, axis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_of() {
        let x = Tensor::zeros((2, 3, 4));
        assert_eq!(shape_of(&x).to_vec(), vec![2.0, 3.0, 4.0]);
        assert_eq!(shape_of(&x).dims(), &[3]);
    }

    #[test]
    fn test_shape_index() {
        let x = Tensor::zeros((2, 3, 4));
        let d = shape_index(&x, &Tensor::scalar(1.0)).unwrap();
        assert_eq!(d.to_vec(), vec![3.0]);
        assert!(shape_index(&x, &Tensor::scalar(3.0)).is_err());
        assert!(shape_index(&x, &Tensor::scalar(-1.0)).is_err());
    }

    #[test]
    fn test_flatten() {
        let x = Tensor::zeros((2, 3, 4));
        assert_eq!(flatten(&x).unwrap().dims(), &[2, 12]);
        let v = Tensor::zeros(5);
        assert_eq!(flatten(&v).unwrap().dims(), &[5, 1]);
    }

    #[test]
    fn test_index_onehot_forward() {
        // Pick one class score per batch row.
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap();
        let idx = Tensor::from_vec(vec![2.0, 0.0], 2).unwrap();
        let y = index_onehot_forward(&x, &idx, 1).unwrap();
        assert_eq!(y.dims(), &[2]);
        assert_eq!(y.to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_index_onehot_backward_scatters() {
        let x = Tensor::zeros((2, 3));
        let idx = Tensor::from_vec(vec![2.0, 0.0], 2).unwrap();
        let gy = Tensor::from_vec(vec![10.0, 20.0], 2).unwrap();
        let gx = index_onehot_backward(&x, &idx, &gy, 1).unwrap();
        assert_eq!(gx.to_vec(), vec![0.0, 0.0, 10.0, 20.0, 0.0, 0.0]);
    }

    #[test]
    fn test_index_onehot_bad_index() {
        let x = Tensor::zeros((2, 3));
        let idx = Tensor::from_vec(vec![3.0, 0.0], 2).unwrap();
        assert!(index_onehot_forward(&x, &idx, 1).is_err());
    }
}
