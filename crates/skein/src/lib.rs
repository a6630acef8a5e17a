//! # Skein
//!
//! Compiled dataflow graphs with reverse-mode automatic differentiation.
//!
//! A model is described once as a graph of operator nodes, compiled into
//! an executable [`Function`], then called repeatedly with fresh inputs:
//!
//! ```rust
//! use skein::prelude::*;
//! use std::collections::HashMap;
//!
//! let g = Graph::new();
//! let x = g.placeholder("x");
//! let w = g.parameter(Tensor::scalar(2.0), Some("w"));
//! let loss = ((&x * &w) - 7.0).pow(2.0).sum();
//! let gw = g.grad(&loss, &w);
//!
//! let f = g.compile(&[loss, gw]).unwrap();
//! let out = f
//!     .call(&HashMap::from([("x".to_string(), Tensor::scalar(3.0))]))
//!     .unwrap();
//! assert_eq!(out[0].item().unwrap(), 1.0); // (2*3 - 7)^2
//! assert_eq!(out[1].item().unwrap(), -6.0); // 2*(2*3 - 7)*3
//! ```
//!
//! Gradients are ordinary graph values: [`Graph::grad`] yields a node
//! whose result is filled in by a selective backward pass the compiler
//! schedules between the forward regions. Parameters persist across
//! calls and across every [`Function`] compiled from the same [`Graph`],
//! which is how a train function and a test function share weights.
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `skein-core` | Tensor, Shape, error type, conv/pool kernels |
//! | `skein` | Graph arena, compiler, executor, operator semantics |

pub mod graph;
mod opr;

pub use skein_core::{kernel, Error, PoolMode, Result, Shape, Tensor};

pub use graph::{BinaryOp, Function, Graph, IntoOperand, IntoPair, OpKind, ReduceOp, Var};
pub use opr::broadcast::BroadcastPlan;

/// Everything needed to build, compile and run a graph.
pub mod prelude {
    pub use crate::graph::{Function, Graph, Var};
    pub use skein_core::{PoolMode, Shape, Tensor};
}
