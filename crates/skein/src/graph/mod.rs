//! Graph construction, compilation and execution.
//!
//! [`Graph`] builds an arena of operator nodes and variable slots;
//! [`Graph::compile`] freezes a topologically-sorted schedule into a
//! [`Function`]; calling the function evaluates it, running selective
//! reverse-mode differentiation for every gradient extraction the
//! schedule contains.

mod compile;
mod exec;
mod node;
mod sort;

pub use compile::Function;
pub use node::{BinaryOp, Graph, IntoOperand, IntoPair, OpKind, ReduceOp, Var};

pub(crate) use node::{GraphData, OprId, VarId};
