use crate::shape::Shape;

/// All errors that can occur within skein.
///
/// One enum covers both the tensor layer (shape/rank mismatches, bad
/// reshapes) and the graph layer (unbound inputs, invalid state access,
/// malformed graphs). Using a single error type across the workspace keeps
/// propagation simple: everything is `Result<T>` and `?`.
///
/// Every error is fatal. Execution is deterministic, so retrying a failed
/// call with the same inputs would fail the same way; nothing is caught or
/// downgraded internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors (e.g., adding [2,3] to [4,5]
    /// gradient-side, or a gradient whose shape differs from its value).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// Two operand shapes cannot be aligned by broadcasting.
    #[error("shapes {lhs} and {rhs} are not broadcast-compatible")]
    BroadcastMismatch { lhs: Shape, rhs: Shape },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Tried to read a scalar out of a multi-element tensor.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Shape },

    /// Element count mismatch when creating a tensor from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Matrix multiplication dimension mismatch.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}] - inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// A placeholder required by the compiled graph has no binding.
    #[error("missing input value for placeholder '{name}'")]
    UnboundInput { name: String },

    /// A variable's value was read before any forward step set it.
    #[error("value not set for variable '{var}'")]
    ValueNotSet { var: String },

    /// A variable's gradient was read before any backward step set it.
    #[error("gradient not set for variable '{var}'")]
    GradNotSet { var: String },

    /// An operator was constructed with the wrong number of inputs.
    #[error("arity violation: operator '{opr}' expects {expected} inputs, got {got}")]
    ArityViolation {
        opr: String,
        expected: usize,
        got: usize,
    },

    /// The graph asks for something the engine does not support
    /// (nested gradients, gradients of unrelated parameters, non-scalar
    /// losses).
    #[error("unsupported graph: {0}")]
    UnsupportedGraph(String),

    /// Topological sort could not drive every in-degree to zero.
    #[error("cycle detected: topological sort failed at operator '{opr}'")]
    CycleDetected { opr: String },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout skein.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
