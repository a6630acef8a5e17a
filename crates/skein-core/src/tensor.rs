use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};
use crate::shape::Shape;

// Tensor — dense n-dimensional array of f64
//
// The graph engine is single-dtype by design: every value flowing through
// it is a dense, contiguous, row-major f64 array. The interesting part of
// this project is the graph compiler and executor, not a dtype/layout
// system, so the tensor stays deliberately small.
//
// MEMORY MODEL: the element buffer is behind an Arc, so cloning a Tensor
// is cheap (refcount bump). All operations are value-producing; "mutation"
// of a parameter replaces the whole tensor held by its source node. Two
// tensors therefore never observe each other's writes.

/// A dense, contiguous, row-major tensor of f64 elements.
#[derive(Clone)]
pub struct Tensor {
    shape: Shape,
    data: Arc<Vec<f64>>,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.elem_count() <= 8 {
            write!(f, "Tensor(shape={}, data={:?})", self.shape, self.data)
        } else {
            write!(f, "Tensor(shape={})", self.shape)
        }
    }
}

impl Tensor {
    // Constructors

    /// Create a tensor from a flat element vector and a shape.
    pub fn from_vec(data: Vec<f64>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        Ok(Tensor {
            shape,
            data: Arc::new(data),
        })
    }

    /// Create a tensor from a slice of elements.
    pub fn from_slice(data: &[f64], shape: impl Into<Shape>) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// A single-element tensor of shape [1].
    ///
    /// This is the canonical form of a scalar: graph literals, summed
    /// losses, and shape indices all take shape [1] rather than rank 0.
    pub fn scalar(v: f64) -> Self {
        Tensor {
            shape: Shape::from(1),
            data: Arc::new(vec![v]),
        }
    }

    /// A tensor filled with a constant.
    pub fn full(shape: impl Into<Shape>, v: f64) -> Self {
        let shape = shape.into();
        let n = shape.elem_count();
        Tensor {
            shape,
            data: Arc::new(vec![v; n]),
        }
    }

    /// A tensor of zeros.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 0.0)
    }

    /// A tensor of ones.
    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 1.0)
    }

    /// A zero tensor with the same shape as `self`.
    pub fn zeros_like(&self) -> Self {
        Self::full(self.shape.clone(), 0.0)
    }

    /// Samples from a normal distribution N(mean, std^2).
    pub fn randn(shape: impl Into<Shape>, mean: f64, std: f64) -> Result<Self> {
        let shape = shape.into();
        let normal = Normal::new(mean, std)
            .map_err(|e| Error::msg(format!("invalid normal distribution: {e}")))?;
        let mut rng = rand::thread_rng();
        let data: Vec<f64> = (0..shape.elem_count())
            .map(|_| normal.sample(&mut rng))
            .collect();
        Tensor::from_vec(data, shape)
    }

    /// Uniform samples from [low, high).
    pub fn rand(shape: impl Into<Shape>, low: f64, high: f64) -> Self {
        let shape = shape.into();
        let mut rng = rand::thread_rng();
        let data: Vec<f64> = (0..shape.elem_count())
            .map(|_| rng.gen_range(low..high))
            .collect();
        Tensor {
            shape,
            data: Arc::new(data),
        }
    }

    // Accessors

    /// The shape of this tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// The flat element buffer (row-major).
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Copy out the elements as a Vec.
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.as_ref().clone()
    }

    /// Read the single element of a one-element tensor.
    pub fn item(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape.clone(),
            });
        }
        Ok(self.data[0])
    }

    // Elementwise

    /// Apply a function to every element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: Arc::new(self.data.iter().map(|&v| f(v)).collect()),
        }
    }

    /// Combine two same-shaped tensors elementwise.
    pub fn zip(&self, other: &Tensor, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Tensor {
            shape: self.shape.clone(),
            data: Arc::new(data),
        })
    }

    /// Elementwise addition (shapes must already match; graph-level
    /// broadcasting happens before tensors reach this point).
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| a + b)
    }

    /// Elementwise subtraction.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| a - b)
    }

    /// Elementwise multiplication.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| a * b)
    }

    /// Multiply every element by a constant.
    pub fn scale(&self, k: f64) -> Tensor {
        self.map(|v| k * v)
    }

    /// Negate every element.
    pub fn neg(&self) -> Tensor {
        self.map(|v| -v)
    }

    /// Sum of all elements.
    pub fn sum_all(&self) -> f64 {
        self.data.iter().sum()
    }

    // Shape manipulation

    /// Same data, different shape. Element counts must match.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ReshapeElementMismatch {
                src: self.elem_count(),
                dst: shape.elem_count(),
                dst_shape: shape,
            });
        }
        Ok(Tensor {
            shape,
            data: Arc::clone(&self.data),
        })
    }

    /// 2-D transpose.
    pub fn t(&self) -> Result<Tensor> {
        let dims = self.dims();
        if dims.len() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: dims.len(),
            });
        }
        let (r, c) = (dims[0], dims[1]);
        let mut out = vec![0.0; r * c];
        for i in 0..r {
            for j in 0..c {
                out[j * r + i] = self.data[i * c + j];
            }
        }
        Tensor::from_vec(out, (c, r))
    }

    /// Move axis `src` to position `dst`, shifting the others.
    ///
    /// moveaxis([2,3,4], 0, 2) has shape [3,4,2]. This is the workhorse
    /// behind axis reductions and one-hot indexing: move the interesting
    /// axis to the end, operate on contiguous rows, move it back.
    pub fn moveaxis(&self, src: usize, dst: usize) -> Result<Tensor> {
        let rank = self.rank();
        if src >= rank {
            return Err(Error::DimOutOfRange { dim: src, rank });
        }
        if dst >= rank {
            return Err(Error::DimOutOfRange { dim: dst, rank });
        }
        if src == dst {
            return Ok(self.clone());
        }
        // Permutation: remove src, insert it at dst.
        let mut perm: Vec<usize> = (0..rank).collect();
        let axis = perm.remove(src);
        perm.insert(dst, axis);

        let src_dims = self.dims();
        let src_strides = self.shape.stride_contiguous();
        let out_dims: Vec<usize> = perm.iter().map(|&p| src_dims[p]).collect();
        let out_shape = Shape::new(out_dims);
        let out_strides = out_shape.stride_contiguous();

        let mut out = vec![0.0; self.elem_count()];
        for (flat, slot) in out.iter_mut().enumerate() {
            // Decompose the output index, map each coordinate back to the
            // source axis it came from.
            let mut src_flat = 0;
            let mut rem = flat;
            for d in 0..rank {
                let coord = rem / out_strides[d];
                rem %= out_strides[d];
                src_flat += coord * src_strides[perm[d]];
            }
            *slot = self.data[src_flat];
        }
        Tensor::from_vec(out, out_shape)
    }

    /// Sum over a set of axes, removing them from the shape.
    ///
    /// Summing every axis yields shape [1].
    pub fn sum_axes(&self, axes: &[usize]) -> Result<Tensor> {
        let rank = self.rank();
        for &a in axes {
            if a >= rank {
                return Err(Error::DimOutOfRange { dim: a, rank });
            }
        }
        let dims = self.dims();
        let strides = self.shape.stride_contiguous();
        let kept: Vec<usize> = (0..rank).filter(|d| !axes.contains(d)).collect();
        let out_dims: Vec<usize> = kept.iter().map(|&d| dims[d]).collect();
        let out_shape = if out_dims.is_empty() {
            Shape::from(1)
        } else {
            Shape::new(out_dims)
        };
        let out_strides = out_shape.stride_contiguous();

        let mut out = vec![0.0; out_shape.elem_count()];
        for (flat, &v) in self.data.iter().enumerate() {
            let mut out_flat = 0;
            let mut rem = flat;
            for d in 0..rank {
                let coord = rem / strides[d];
                rem %= strides[d];
                if let Some(pos) = kept.iter().position(|&k| k == d) {
                    out_flat += coord * out_strides[pos];
                }
            }
            out[out_flat] += v;
        }
        Tensor::from_vec(out, out_shape)
    }

    // Linear algebra

    /// Matrix multiply. Both operands must be 2-D with matching inner dims.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let (l, r) = (self.dims(), other.dims());
        if l.len() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: l.len(),
            });
        }
        if r.len() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: r.len(),
            });
        }
        let (m, k1) = (l[0], l[1]);
        let (k2, n) = (r[0], r[1]);
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        let a = self.data();
        let b = other.data();
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k1 {
                let av = a[i * k1 + p];
                if av == 0.0 {
                    continue;
                }
                let row = &b[p * n..(p + 1) * n];
                let dst = &mut out[i * n..(i + 1) * n];
                for (o, &bv) in dst.iter_mut().zip(row.iter()) {
                    *o += av * bv;
                }
            }
        }
        Tensor::from_vec(out, (m, n))
    }
}

// Literal coercions: scalars become shape [1], vectors become 1-D.
// These are what let graph factories accept plain numbers and vecs.

impl From<f64> for Tensor {
    fn from(v: f64) -> Self {
        Tensor::scalar(v)
    }
}

impl From<Vec<f64>> for Tensor {
    fn from(v: Vec<f64>) -> Self {
        let shape = Shape::from(v.len());
        Tensor {
            shape,
            data: Arc::new(v),
        }
    }
}

impl From<&[f64]> for Tensor {
    fn from(v: &[f64]) -> Self {
        v.to_vec().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_count_check() {
        assert!(Tensor::from_vec(vec![1.0, 2.0], (2, 2)).is_err());
        assert!(Tensor::from_vec(vec![1.0; 4], (2, 2)).is_ok());
    }

    #[test]
    fn test_item() {
        assert_eq!(Tensor::scalar(3.5).item().unwrap(), 3.5);
        assert!(Tensor::zeros(3).item().is_err());
    }

    #[test]
    fn test_matmul() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap();
        let b = Tensor::from_vec(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], (3, 2)).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.to_vec(), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_inner_mismatch() {
        let a = Tensor::zeros((2, 3));
        let b = Tensor::zeros((4, 5));
        match a.matmul(&b) {
            Err(Error::MatmulShapeMismatch { k1: 3, k2: 4, .. }) => {}
            other => panic!("expected matmul mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_transpose() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap();
        let t = a.t().unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_moveaxis_roundtrip() {
        let a = Tensor::from_vec((0..24).map(|v| v as f64).collect(), (2, 3, 4)).unwrap();
        let m = a.moveaxis(0, 2).unwrap();
        assert_eq!(m.dims(), &[3, 4, 2]);
        // [i,j,k] of original lands at [j,k,i]
        assert_eq!(m.data()[0 * 8 + 0 * 2 + 1], a.data()[1 * 12 + 0 * 4 + 0]);
        let back = m.moveaxis(2, 0).unwrap();
        assert_eq!(back.to_vec(), a.to_vec());
    }

    #[test]
    fn test_sum_axes() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap();
        let rows = a.sum_axes(&[1]).unwrap();
        assert_eq!(rows.dims(), &[2]);
        assert_eq!(rows.to_vec(), vec![6.0, 15.0]);
        let cols = a.sum_axes(&[0]).unwrap();
        assert_eq!(cols.to_vec(), vec![5.0, 7.0, 9.0]);
        let all = a.sum_axes(&[0, 1]).unwrap();
        assert_eq!(all.dims(), &[1]);
        assert_eq!(all.to_vec(), vec![21.0]);
    }

    #[test]
    fn test_reshape_shares_data() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], (2, 2)).unwrap();
        let b = a.reshape(4).unwrap();
        assert_eq!(b.dims(), &[4]);
        assert!(a.reshape((3, 2)).is_err());
    }
}
