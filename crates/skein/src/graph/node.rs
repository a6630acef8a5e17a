use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use skein_core::{Error, PoolMode, Result, Tensor};

use crate::opr::broadcast::BroadcastPlan;

// Graph arena — operator nodes and variable slots
//
// The graph is an arena: operators and variable slots live in two flat
// vectors inside GraphData, addressed by OprId / VarId indices. Edges are
// index lists ("operator A's output slot is operator B's input"), so the
// owner/output back-references that would otherwise form ownership cycles
// are just integers.
//
// GraphData sits behind Rc<RefCell<..>> shared by the Graph builder handle,
// every Var handle, and every compiled Function. Sharing is what lets two
// Functions compiled from the same builder (say a train function with
// updates and a test function without) see the same Parameter state.
// Rc also makes everything here !Send: execution is single-threaded by
// contract, and the type system now says so.

/// Index of a variable slot in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) usize);

/// Index of an operator node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OprId(pub(crate) usize);

/// Elementwise binary operations (all broadcast-aware).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
    Ge,
    Gt,
    Eq,
}

impl BinaryOp {
    /// Comparisons produce 0/1 masks and never propagate gradient.
    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Ge | BinaryOp::Gt | BinaryOp::Eq)
    }
}

/// Axis reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

/// The operation an operator node performs.
///
/// Source kinds carry their value storage in the variant payload:
/// Placeholder holds the binding staged for the current call, Parameter
/// holds durable state mutated in place by Update, Immutable holds a
/// literal fixed at construction.
#[derive(Debug)]
pub enum OpKind {
    /// Named input, rebound from the caller's bindings on every call.
    Placeholder { pending: Option<Tensor> },
    /// Trainable source; its value survives across calls.
    Parameter { value: Tensor },
    /// Literal source; never changes.
    Immutable { value: Tensor },

    /// Unary elementwise ops.
    Neg,
    Exp,
    Log,
    Tanh,
    /// Sum of every element, producing shape [1].
    SumAll,

    /// Binary elementwise with broadcasting. `plan` is transient per-call
    /// state recorded by forward and consumed by backward.
    Binary {
        op: BinaryOp,
        plan: Option<BroadcastPlan>,
    },

    /// 2-D matrix multiply.
    Matmul,

    /// Shape introspection: the input's dims as a 1-D tensor.
    ShapeOf,
    /// One dimension of the first input's shape, indexed by the second.
    ShapeIndex,
    /// Collapse all but the leading dimension: [b, ...] -> [b, rest].
    Flatten,
    /// Select one element along `axis` per position of the index input.
    IndexOnehot { axis: usize },

    /// Reduction along one axis.
    Reduce {
        op: ReduceOp,
        axis: usize,
        keepdims: bool,
    },

    /// 2-D convolution of (input, kernel).
    Conv2d {
        padding: (usize, usize),
        stride: (usize, usize),
    },
    /// 2-D pooling.
    Pooling2d {
        kernel: (usize, usize),
        padding: (usize, usize),
        stride: (usize, usize),
        mode: PoolMode,
    },

    /// Reads the accumulated gradient of input 1 (w.r.t.) for loss input 0.
    Gradient,
    /// Overwrites the Parameter owning input 0 with input 1's value.
    Update,
}

impl OpKind {
    /// Declared input arity. Every kind is fixed-arity.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::Placeholder { .. } | OpKind::Parameter { .. } | OpKind::Immutable { .. } => 0,
            OpKind::Neg
            | OpKind::Exp
            | OpKind::Log
            | OpKind::Tanh
            | OpKind::SumAll
            | OpKind::ShapeOf
            | OpKind::Flatten
            | OpKind::Reduce { .. }
            | OpKind::Pooling2d { .. } => 1,
            OpKind::Binary { .. }
            | OpKind::Matmul
            | OpKind::ShapeIndex
            | OpKind::IndexOnehot { .. }
            | OpKind::Conv2d { .. }
            | OpKind::Gradient
            | OpKind::Update => 2,
        }
    }

    /// Declared output count. Currently 1 for every kind; the slot vector
    /// is still sized from here so multi-output kinds stay possible.
    pub fn n_outputs(&self) -> usize {
        1
    }

    /// Whether this is a source node (no inputs, produces a stored value).
    pub fn is_source(&self) -> bool {
        self.arity() == 0
    }

    /// Whether this source holds trainable, durable state. This is the
    /// structural replacement for "is this node a Parameter" type checks.
    pub fn is_trainable_source(&self) -> bool {
        matches!(self, OpKind::Parameter { .. })
    }

    /// Short tag used for auto-generated names.
    pub fn tag(&self) -> &'static str {
        match self {
            OpKind::Placeholder { .. } => "placeholder",
            OpKind::Parameter { .. } => "parameter",
            OpKind::Immutable { .. } => "immutable",
            OpKind::Neg => "neg",
            OpKind::Exp => "exp",
            OpKind::Log => "log",
            OpKind::Tanh => "tanh",
            OpKind::SumAll => "sum",
            OpKind::Binary { op, .. } => match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::Div => "div",
                BinaryOp::Pow => "pow",
                BinaryOp::Max => "max",
                BinaryOp::Min => "min",
                BinaryOp::Ge => "ge",
                BinaryOp::Gt => "gt",
                BinaryOp::Eq => "eq",
            },
            OpKind::Matmul => "matmul",
            OpKind::ShapeOf => "shapeof",
            OpKind::ShapeIndex => "shapeidx",
            OpKind::Flatten => "flatten",
            OpKind::IndexOnehot { .. } => "index_onehot",
            OpKind::Reduce { op, .. } => match op {
                ReduceOp::Sum => "reduce_sum",
                ReduceOp::Max => "reduce_max",
                ReduceOp::Min => "reduce_min",
            },
            OpKind::Conv2d { .. } => "conv2d",
            OpKind::Pooling2d { .. } => "pooling2d",
            OpKind::Gradient => "grad",
            OpKind::Update => "update",
        }
    }
}

/// One tensor value/gradient holder, tied to one operator output.
#[derive(Debug)]
pub(crate) struct VarSlot {
    pub owner: OprId,
    pub output_idx: usize,
    pub name: String,
    pub value: Option<Tensor>,
    pub grad: Option<Tensor>,
    pub need_grad: bool,
}

impl VarSlot {
    /// Read the value; an absent value is an invalid state access.
    pub fn value(&self) -> Result<&Tensor> {
        self.value.as_ref().ok_or_else(|| Error::ValueNotSet {
            var: self.name.clone(),
        })
    }

    pub fn set_value(&mut self, t: Tensor) {
        self.value = Some(t);
    }

    /// Read the gradient; an absent gradient is an invalid state access.
    pub fn grad(&self) -> Result<&Tensor> {
        self.grad.as_ref().ok_or_else(|| Error::GradNotSet {
            var: self.name.clone(),
        })
    }

    /// Accumulate a gradient contribution. `None` is a symbolic zero: it
    /// still initializes the slot (with a zero tensor shaped like the
    /// value) so later has-gradient checks succeed consistently.
    pub fn accumulate_grad(&mut self, contrib: Option<Tensor>) -> Result<()> {
        let value_shape = self.value()?.shape().clone();
        match contrib {
            None => {
                if self.grad.is_none() {
                    self.grad = Some(Tensor::zeros(value_shape));
                }
                Ok(())
            }
            Some(g) => {
                if *g.shape() != value_shape {
                    return Err(Error::ShapeMismatch {
                        expected: value_shape,
                        got: g.shape().clone(),
                    });
                }
                self.grad = Some(match self.grad.take() {
                    None => g,
                    Some(acc) => acc.add(&g)?,
                });
                Ok(())
            }
        }
    }

    /// Drop the value and all gradient state.
    pub fn clear_state(&mut self) {
        self.value = None;
        self.clear_grad();
    }

    pub fn clear_grad(&mut self) {
        self.grad = None;
        self.need_grad = false;
    }
}

/// An operator node: kind, input slot references, output slots.
#[derive(Debug)]
pub(crate) struct OprNode {
    pub kind: OpKind,
    pub name: String,
    /// Auto-generated name (kind tag + sequence number); kept so renamed
    /// nodes can display as `name{auto}` in diagnostics.
    pub auto_name: String,
    pub inputs: Vec<VarId>,
    pub outputs: Vec<VarId>,
}

impl OprNode {
    pub fn display_name(&self) -> String {
        if self.name == self.auto_name {
            self.name.clone()
        } else {
            format!("{}{{{}}}", self.name, self.auto_name)
        }
    }
}

/// The arena behind a Graph and its compiled Functions.
#[derive(Debug, Default)]
pub(crate) struct GraphData {
    pub oprs: Vec<OprNode>,
    pub vars: Vec<VarSlot>,
}

impl GraphData {
    pub fn opr(&self, id: OprId) -> &OprNode {
        &self.oprs[id.0]
    }

    pub fn opr_mut(&mut self, id: OprId) -> &mut OprNode {
        &mut self.oprs[id.0]
    }

    pub fn var(&self, id: VarId) -> &VarSlot {
        &self.vars[id.0]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut VarSlot {
        &mut self.vars[id.0]
    }

    /// Append an operator node and its output slots.
    ///
    /// Callers pass exactly `kind.arity()` inputs; the public fallible
    /// entry point is `Graph::push_opr`, which checks before calling here.
    pub fn push(&mut self, kind: OpKind, inputs: Vec<VarId>, name: Option<String>) -> OprId {
        debug_assert_eq!(inputs.len(), kind.arity());
        let id = OprId(self.oprs.len());
        let auto_name = format!("{}_{}", kind.tag(), id.0);
        let name = name.unwrap_or_else(|| auto_name.clone());
        let n_outputs = kind.n_outputs();
        let mut outputs = Vec::with_capacity(n_outputs);
        for idx in 0..n_outputs {
            let vid = VarId(self.vars.len());
            self.vars.push(VarSlot {
                owner: id,
                output_idx: idx,
                name: format!("{}:{}", name, idx),
                value: None,
                grad: None,
                need_grad: false,
            });
            outputs.push(vid);
        }
        self.oprs.push(OprNode {
            kind,
            name,
            auto_name,
            inputs,
            outputs,
        });
        id
    }
}

/// Builder handle over a shared graph arena.
///
/// Cloning a Graph clones the handle, not the graph: all clones (and every
/// Var and compiled Function derived from it) address the same arena.
#[derive(Clone, Default)]
pub struct Graph {
    pub(crate) inner: Rc<RefCell<GraphData>>,
}

/// Handle to one operator output — the user-facing "symbolic value".
#[derive(Clone)]
pub struct Var {
    pub(crate) graph: Rc<RefCell<GraphData>>,
    pub(crate) id: VarId,
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.graph, &other.graph) && self.id == other.id
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var({})", self.name())
    }
}

impl Var {
    /// The display name of this variable slot.
    pub fn name(&self) -> String {
        self.graph.borrow().var(self.id).name.clone()
    }

    fn graph_handle(&self) -> Graph {
        Graph {
            inner: Rc::clone(&self.graph),
        }
    }

    /// Sum of every element, as a shape-[1] value.
    pub fn sum(&self) -> Var {
        self.graph_handle().sum(self)
    }

    /// Elementwise power.
    pub fn pow(&self, e: impl IntoOperand) -> Var {
        self.graph_handle().pow(self, e)
    }

    /// The shape of this value, as a 1-D tensor value.
    pub fn shape_of(&self) -> Var {
        self.graph_handle().shape_of(self)
    }

    /// One dimension of this value's shape, as a shape-[1] value.
    pub fn shape_index(&self, idx: impl IntoOperand) -> Var {
        self.graph_handle().shape_index(self, idx)
    }

    /// Elementwise greater-or-equal mask (0/1 valued, zero gradient).
    pub fn ge(&self, other: impl IntoOperand) -> Var {
        self.graph_handle().ge(self, other)
    }

    /// Elementwise strictly-greater mask.
    pub fn gt(&self, other: impl IntoOperand) -> Var {
        self.graph_handle().gt(self, other)
    }

    /// Elementwise equality mask.
    pub fn eq_elem(&self, other: impl IntoOperand) -> Var {
        self.graph_handle().eq_elem(self, other)
    }
}

/// Anything that can stand for an operand in a factory call: an existing
/// Var, or a literal that gets coerced into an Immutable source node.
pub trait IntoOperand {
    fn into_operand(self, g: &Graph) -> Var;
}

impl IntoOperand for Var {
    fn into_operand(self, _g: &Graph) -> Var {
        self
    }
}

impl IntoOperand for &Var {
    fn into_operand(self, _g: &Graph) -> Var {
        self.clone()
    }
}

impl IntoOperand for f64 {
    fn into_operand(self, g: &Graph) -> Var {
        g.immutable(Tensor::scalar(self))
    }
}

impl IntoOperand for i32 {
    fn into_operand(self, g: &Graph) -> Var {
        g.immutable(Tensor::scalar(self as f64))
    }
}

impl IntoOperand for Tensor {
    fn into_operand(self, g: &Graph) -> Var {
        g.immutable(self)
    }
}

impl IntoOperand for Vec<f64> {
    fn into_operand(self, g: &Graph) -> Var {
        g.immutable(Tensor::from(self))
    }
}

impl IntoOperand for &[f64] {
    fn into_operand(self, g: &Graph) -> Var {
        g.immutable(Tensor::from(self))
    }
}

/// Scalar-or-pair normalization for 2-D parameters (padding, stride,
/// pooling kernels): `1` means `(1, 1)`.
pub trait IntoPair {
    fn into_pair(self) -> (usize, usize);
}

impl IntoPair for usize {
    fn into_pair(self) -> (usize, usize) {
        (self, self)
    }
}

impl IntoPair for (usize, usize) {
    fn into_pair(self) -> (usize, usize) {
        self
    }
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Internal infallible constructor: factories below always pass the
    /// right number of inputs for the kind.
    fn push_internal(&self, kind: OpKind, inputs: Vec<VarId>, name: Option<String>) -> Var {
        let opr = self.inner.borrow_mut().push(kind, inputs, name);
        let out = self.inner.borrow().opr(opr).outputs[0];
        Var {
            graph: Rc::clone(&self.inner),
            id: out,
        }
    }

    /// Generic operator constructor. This is the one place input counts
    /// can go wrong, so it is the one place that reports arity violations.
    pub fn push_opr(&self, kind: OpKind, inputs: &[Var], name: Option<&str>) -> Result<Var> {
        if inputs.len() != kind.arity() {
            return Err(Error::ArityViolation {
                opr: kind.tag().to_string(),
                expected: kind.arity(),
                got: inputs.len(),
            });
        }
        let ids = inputs.iter().map(|v| v.id).collect();
        Ok(self.push_internal(kind, ids, name.map(String::from)))
    }

    // Source nodes

    /// A named input, rebound from the caller's bindings on every call.
    /// The name is the binding key and must be unique per graph.
    pub fn placeholder(&self, name: &str) -> Var {
        self.push_internal(
            OpKind::Placeholder { pending: None },
            vec![],
            Some(name.to_string()),
        )
    }

    /// A trainable source whose value persists across calls and is
    /// mutated in place by `update`.
    pub fn parameter(&self, value: impl Into<Tensor>, name: Option<&str>) -> Var {
        self.push_internal(
            OpKind::Parameter {
                value: value.into(),
            },
            vec![],
            name.map(String::from),
        )
    }

    /// A literal source, fixed at construction.
    pub fn immutable(&self, value: impl Into<Tensor>) -> Var {
        self.push_internal(
            OpKind::Immutable {
                value: value.into(),
            },
            vec![],
            None,
        )
    }

    // Unary elementwise

    fn unary(&self, kind: OpKind, x: impl IntoOperand) -> Var {
        let x = x.into_operand(self);
        self.push_internal(kind, vec![x.id], None)
    }

    pub fn neg(&self, x: impl IntoOperand) -> Var {
        self.unary(OpKind::Neg, x)
    }

    pub fn exp(&self, x: impl IntoOperand) -> Var {
        self.unary(OpKind::Exp, x)
    }

    pub fn log(&self, x: impl IntoOperand) -> Var {
        self.unary(OpKind::Log, x)
    }

    pub fn tanh(&self, x: impl IntoOperand) -> Var {
        self.unary(OpKind::Tanh, x)
    }

    /// Sum of all elements, shape [1].
    pub fn sum(&self, x: impl IntoOperand) -> Var {
        self.unary(OpKind::SumAll, x)
    }

    // Binary elementwise (broadcast-aware)

    fn binary(&self, op: BinaryOp, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        let a = a.into_operand(self);
        let b = b.into_operand(self);
        self.push_internal(OpKind::Binary { op, plan: None }, vec![a.id, b.id], None)
    }

    pub fn add(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Div, a, b)
    }

    pub fn pow(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Pow, a, b)
    }

    /// Elementwise maximum.
    pub fn max(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Max, a, b)
    }

    /// Elementwise minimum.
    pub fn min(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Min, a, b)
    }

    pub fn ge(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Ge, a, b)
    }

    pub fn gt(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Gt, a, b)
    }

    pub fn eq_elem(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        self.binary(BinaryOp::Eq, a, b)
    }

    // Linear algebra

    pub fn matmul(&self, a: impl IntoOperand, b: impl IntoOperand) -> Var {
        let a = a.into_operand(self);
        let b = b.into_operand(self);
        self.push_internal(OpKind::Matmul, vec![a.id, b.id], None)
    }

    // Shape and index utilities

    pub fn shape_of(&self, x: impl IntoOperand) -> Var {
        self.unary(OpKind::ShapeOf, x)
    }

    pub fn shape_index(&self, x: impl IntoOperand, idx: impl IntoOperand) -> Var {
        let x = x.into_operand(self);
        let idx = idx.into_operand(self);
        self.push_internal(OpKind::ShapeIndex, vec![x.id, idx.id], None)
    }

    /// Collapse all but the leading dimension.
    pub fn flatten(&self, x: impl IntoOperand) -> Var {
        self.unary(OpKind::Flatten, x)
    }

    /// For each position of `idx`, select the element of `x` along `axis`
    /// at that index.
    pub fn index_onehot(&self, x: impl IntoOperand, idx: impl IntoOperand, axis: usize) -> Var {
        let x = x.into_operand(self);
        let idx = idx.into_operand(self);
        self.push_internal(OpKind::IndexOnehot { axis }, vec![x.id, idx.id], None)
    }

    // Reductions

    fn reduce(&self, op: ReduceOp, x: impl IntoOperand, axis: usize, keepdims: bool) -> Var {
        self.unary(OpKind::Reduce { op, axis, keepdims }, x)
    }

    pub fn reduce_sum(&self, x: impl IntoOperand, axis: usize, keepdims: bool) -> Var {
        self.reduce(ReduceOp::Sum, x, axis, keepdims)
    }

    pub fn reduce_max(&self, x: impl IntoOperand, axis: usize, keepdims: bool) -> Var {
        self.reduce(ReduceOp::Max, x, axis, keepdims)
    }

    pub fn reduce_min(&self, x: impl IntoOperand, axis: usize, keepdims: bool) -> Var {
        self.reduce(ReduceOp::Min, x, axis, keepdims)
    }

    // Convolution / pooling

    pub fn conv2d(
        &self,
        x: impl IntoOperand,
        kernel: impl IntoOperand,
        padding: impl IntoPair,
        stride: impl IntoPair,
    ) -> Var {
        let x = x.into_operand(self);
        let k = kernel.into_operand(self);
        self.push_internal(
            OpKind::Conv2d {
                padding: padding.into_pair(),
                stride: stride.into_pair(),
            },
            vec![x.id, k.id],
            None,
        )
    }

    /// 2-D pooling. A `None` stride defaults to the kernel extent
    /// (non-overlapping windows).
    pub fn pooling2d(
        &self,
        x: impl IntoOperand,
        kernel: impl IntoPair,
        padding: impl IntoPair,
        stride: Option<(usize, usize)>,
        mode: PoolMode,
    ) -> Var {
        let x = x.into_operand(self);
        let kernel = kernel.into_pair();
        self.push_internal(
            OpKind::Pooling2d {
                kernel,
                padding: padding.into_pair(),
                stride: stride.unwrap_or(kernel),
                mode,
            },
            vec![x.id],
            None,
        )
    }

    // Gradient extraction / parameter update

    /// The gradient of `loss` with respect to `wrt`, as an ordinary graph
    /// value. Nesting these (differentiating a gradient) is rejected at
    /// compile time.
    pub fn grad(&self, loss: &Var, wrt: &Var) -> Var {
        let name = {
            let g = self.inner.borrow();
            format!("grad({}, {})", g.var(loss.id).name, g.var(wrt.id).name)
        };
        self.push_internal(OpKind::Gradient, vec![loss.id, wrt.id], Some(name))
    }

    /// Overwrite the Parameter owning `param` with `value`'s result; the
    /// node's own output passes the new value through. Fails if `param`
    /// is not a Parameter output.
    pub fn update(&self, param: &Var, value: impl IntoOperand) -> Result<Var> {
        let value = value.into_operand(self);
        {
            let g = self.inner.borrow();
            let owner = g.var(param.id).owner;
            if !g.opr(owner).kind.is_trainable_source() {
                return Err(Error::msg(format!(
                    "update requires a Parameter output as its first input, got '{}'",
                    g.var(param.id).name
                )));
            }
        }
        Ok(self.push_internal(OpKind::Update, vec![param.id, value.id], None))
    }

    // Parameter access from outside execution

    /// Read the durable value stored in the Parameter owning `param`.
    pub fn param_value(&self, param: &Var) -> Result<Tensor> {
        let g = self.inner.borrow();
        let owner = g.var(param.id).owner;
        match &g.opr(owner).kind {
            OpKind::Parameter { value } => Ok(value.clone()),
            _ => Err(Error::msg(format!(
                "'{}' is not a Parameter output",
                g.var(param.id).name
            ))),
        }
    }

    /// Overwrite the durable value stored in the Parameter owning `param`.
    pub fn set_param_value(&self, param: &Var, value: Tensor) -> Result<()> {
        let mut g = self.inner.borrow_mut();
        let owner = g.var(param.id).owner;
        match &mut g.opr_mut(owner).kind {
            OpKind::Parameter { value: slot } => {
                *slot = value;
                Ok(())
            }
            _ => Err(Error::msg(format!(
                "'{}' is not a Parameter output",
                g.var(param.id).name
            ))),
        }
    }

    pub(crate) fn var_handle(&self, id: VarId) -> Var {
        Var {
            graph: Rc::clone(&self.inner),
            id,
        }
    }
}

// Operator sugar on Var handles: `a + b`, `2.0 * x`, `-y`, mirroring the
// graph factory methods. Literals coerce to Immutable source nodes.

macro_rules! var_binop {
    ($trait:ident, $method:ident, $factory:ident) => {
        impl std::ops::$trait for Var {
            type Output = Var;
            fn $method(self, rhs: Var) -> Var {
                self.graph_handle().$factory(&self, &rhs)
            }
        }

        impl std::ops::$trait<&Var> for Var {
            type Output = Var;
            fn $method(self, rhs: &Var) -> Var {
                self.graph_handle().$factory(&self, rhs)
            }
        }

        impl std::ops::$trait<Var> for &Var {
            type Output = Var;
            fn $method(self, rhs: Var) -> Var {
                self.graph_handle().$factory(self, &rhs)
            }
        }

        impl std::ops::$trait<&Var> for &Var {
            type Output = Var;
            fn $method(self, rhs: &Var) -> Var {
                self.graph_handle().$factory(self, rhs)
            }
        }

        impl std::ops::$trait<f64> for Var {
            type Output = Var;
            fn $method(self, rhs: f64) -> Var {
                self.graph_handle().$factory(&self, rhs)
            }
        }

        impl std::ops::$trait<f64> for &Var {
            type Output = Var;
            fn $method(self, rhs: f64) -> Var {
                self.graph_handle().$factory(self, rhs)
            }
        }

        impl std::ops::$trait<Var> for f64 {
            type Output = Var;
            fn $method(self, rhs: Var) -> Var {
                rhs.graph_handle().$factory(self, &rhs)
            }
        }

        impl std::ops::$trait<&Var> for f64 {
            type Output = Var;
            fn $method(self, rhs: &Var) -> Var {
                rhs.graph_handle().$factory(self, rhs)
            }
        }
    };
}

var_binop!(Add, add, add);
var_binop!(Sub, sub, sub);
var_binop!(Mul, mul, mul);
var_binop!(Div, div, div);

impl std::ops::Neg for Var {
    type Output = Var;
    fn neg(self) -> Var {
        self.graph_handle().neg(&self)
    }
}

impl std::ops::Neg for &Var {
    type Output = Var;
    fn neg(self) -> Var {
        self.graph_handle().neg(self)
    }
}
