//! # skein-core
//!
//! Dense tensor primitives and numeric kernels for skein.
//!
//! This crate provides:
//! - [`Tensor`] — dense, row-major f64 n-dimensional array
//! - [`Shape`] — dimension sizes and contiguous strides
//! - [`Error`] / [`Result`] — the single error type used across skein
//! - [`kernel`] — conv2d / pooling2d forward and backward kernels
//!
//! The graph engine in the `skein` crate treats everything here as an
//! opaque numeric collaborator: it hands tensors in, gets tensors out,
//! and never looks at element buffers itself.

pub mod error;
pub mod kernel;
pub mod shape;
pub mod tensor;

pub use error::{Error, Result};
pub use kernel::PoolMode;
pub use shape::Shape;
pub use tensor::Tensor;
