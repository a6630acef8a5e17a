use skein_core::{kernel, PoolMode, Result, Tensor};

// Convolution and pooling operator glue.
//
// The numeric work lives in skein-core's kernels; this module only routes
// values and gradients through them with the node's hyperparameters.

pub(crate) fn conv2d_forward(
    x: &Tensor,
    k: &Tensor,
    padding: (usize, usize),
    stride: (usize, usize),
) -> Result<Tensor> {
    kernel::conv2d_forward(x, k, padding, stride)
}

pub(crate) fn conv2d_backward(
    x: &Tensor,
    k: &Tensor,
    gy: &Tensor,
    padding: (usize, usize),
    stride: (usize, usize),
    needs: (bool, bool),
) -> Result<(Option<Tensor>, Option<Tensor>)> {
    let gx = if needs.0 {
        Some(kernel::conv2d_backward_data(gy, x, k, padding, stride)?)
    } else {
        None
    };
    let gk = if needs.1 {
        Some(kernel::conv2d_backward_kernel(gy, x, k, padding, stride)?)
    } else {
        None
    };
    Ok((gx, gk))
}

pub(crate) fn pooling2d_forward(
    x: &Tensor,
    kernel_size: (usize, usize),
    padding: (usize, usize),
    stride: (usize, usize),
    mode: PoolMode,
) -> Result<Tensor> {
    kernel::pooling2d_forward(x, kernel_size, padding, stride, mode)
}

pub(crate) fn pooling2d_backward(
    x: &Tensor,
    gy: &Tensor,
    kernel_size: (usize, usize),
    padding: (usize, usize),
    stride: (usize, usize),
    mode: PoolMode,
) -> Result<Tensor> {
    kernel::pooling2d_backward(gy, x, kernel_size, padding, stride, mode)
}
