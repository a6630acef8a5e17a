use skein_core::{Result, Tensor};

use crate::graph::BinaryOp;

// Elementwise and matrix arithmetic, forward and backward.
//
// Everything here is pure tensor math: operands arrive already aligned
// (broadcast expansion happens in the dispatcher), gradients are returned
// at the evaluation shape and folded back by the caller. `None` means the
// operation contributes no gradient toward that input.

pub(crate) fn binary_forward(op: BinaryOp, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let f: fn(f64, f64) -> f64 = match op {
        BinaryOp::Add => |x, y| x + y,
        BinaryOp::Sub => |x, y| x - y,
        BinaryOp::Mul => |x, y| x * y,
        BinaryOp::Div => |x, y| x / y,
        BinaryOp::Pow => f64::powf,
        // Ties go to the left operand, in both forward and backward.
        BinaryOp::Max => |x, y| if x >= y { x } else { y },
        BinaryOp::Min => |x, y| if x <= y { x } else { y },
        BinaryOp::Ge => |x, y| if x >= y { 1.0 } else { 0.0 },
        BinaryOp::Gt => |x, y| if x > y { 1.0 } else { 0.0 },
        BinaryOp::Eq => |x, y| if x == y { 1.0 } else { 0.0 },
    };
    a.zip(b, f)
}

/// Gradients of `op` toward each operand, at the evaluation shape.
/// Only the sides flagged in `needs` are computed.
pub(crate) fn binary_backward(
    op: BinaryOp,
    a: &Tensor,
    b: &Tensor,
    y: &Tensor,
    gy: &Tensor,
    needs: (bool, bool),
) -> Result<(Option<Tensor>, Option<Tensor>)> {
    if op.is_comparison() {
        return Ok((None, None));
    }
    let ga = if !needs.0 {
        None
    } else {
        match op {
            BinaryOp::Add | BinaryOp::Sub => Some(gy.clone()),
            BinaryOp::Mul => Some(gy.mul(b)?),
            BinaryOp::Div => Some(gy.zip(b, |g, bv| g / bv)?),
            BinaryOp::Pow => {
                let d = a.zip(b, |av, bv| bv * av.powf(bv - 1.0))?;
                Some(gy.mul(&d)?)
            }
            BinaryOp::Max => {
                let m = a.zip(b, |av, bv| if av >= bv { 1.0 } else { 0.0 })?;
                Some(gy.mul(&m)?)
            }
            BinaryOp::Min => {
                let m = a.zip(b, |av, bv| if av <= bv { 1.0 } else { 0.0 })?;
                Some(gy.mul(&m)?)
            }
            BinaryOp::Ge | BinaryOp::Gt | BinaryOp::Eq => None,
        }
    };
    let gb = if !needs.1 {
        None
    } else {
        match op {
            BinaryOp::Add => Some(gy.clone()),
            BinaryOp::Sub => Some(gy.neg()),
            BinaryOp::Mul => Some(gy.mul(a)?),
            BinaryOp::Div => {
                let d = a.zip(b, |av, bv| -av / (bv * bv))?;
                Some(gy.mul(&d)?)
            }
            BinaryOp::Pow => {
                // d(a^b)/db = a^b * ln a
                let d = a.zip(y, |av, yv| yv * av.ln())?;
                Some(gy.mul(&d)?)
            }
            BinaryOp::Max => {
                let m = a.zip(b, |av, bv| if av >= bv { 0.0 } else { 1.0 })?;
                Some(gy.mul(&m)?)
            }
            BinaryOp::Min => {
                let m = a.zip(b, |av, bv| if av <= bv { 0.0 } else { 1.0 })?;
                Some(gy.mul(&m)?)
            }
            BinaryOp::Ge | BinaryOp::Gt | BinaryOp::Eq => None,
        }
    };
    Ok((ga, gb))
}

pub(crate) fn matmul_backward(
    a: &Tensor,
    b: &Tensor,
    gy: &Tensor,
    needs: (bool, bool),
) -> Result<(Option<Tensor>, Option<Tensor>)> {
    let ga = if needs.0 {
        Some(gy.matmul(&b.t()?)?)
    } else {
        None
    };
    let gb = if needs.1 {
        Some(a.t()?.matmul(gy)?)
    } else {
        None
    };
    Ok((ga, gb))
}
