use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

// Numeric kernels — 2-D convolution and pooling
//
// These are the opaque dense-tensor functions the graph layer delegates to
// for its conv/pool operator nodes. Shape contract:
//
//   conv2d_forward:   x [B, CI, H, W] * k [CO, CI, KH, KW] → [B, CO, OH, OW]
//   backward_data:    grad of x, same shape as x
//   backward_kernel:  grad of k, same shape as k
//   pooling2d:        x [B, C, H, W] → [B, C, OH, OW], per-channel windows
//
// with OH = (H + 2*ph - KH) / sh + 1 (floor), zero padding.
//
// Direct loops, no im2col or fusion; the forward convolution parallelizes
// over the batch dimension with rayon.

/// Pooling reduction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    Max,
    Avg,
}

fn require_rank4(t: &Tensor, what: &str) -> Result<()> {
    if t.rank() != 4 {
        return Err(Error::msg(format!(
            "{} must be 4-D [batch, channel, height, width], got shape {}",
            what,
            t.shape()
        )));
    }
    Ok(())
}

fn out_extent(input: usize, kernel: usize, pad: usize, stride: usize) -> Result<usize> {
    let padded = input + 2 * pad;
    if padded < kernel {
        return Err(Error::msg(format!(
            "kernel extent {} exceeds padded input extent {}",
            kernel, padded
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

/// Forward 2-D convolution (cross-correlation, zero padding).
pub fn conv2d_forward(
    x: &Tensor,
    k: &Tensor,
    (ph, pw): (usize, usize),
    (sh, sw): (usize, usize),
) -> Result<Tensor> {
    require_rank4(x, "conv2d input")?;
    require_rank4(k, "conv2d kernel")?;
    let (b, ci, h, w) = (x.dims()[0], x.dims()[1], x.dims()[2], x.dims()[3]);
    let (co, kci, kh, kw) = (k.dims()[0], k.dims()[1], k.dims()[2], k.dims()[3]);
    if ci != kci {
        return Err(Error::msg(format!(
            "conv2d channel mismatch: input has {} channels, kernel expects {}",
            ci, kci
        )));
    }
    let oh = out_extent(h, kh, ph, sh)?;
    let ow = out_extent(w, kw, pw, sw)?;

    let xd = x.data();
    let kd = k.data();
    let mut out = vec![0.0; b * co * oh * ow];
    out.par_chunks_mut(co * oh * ow)
        .enumerate()
        .for_each(|(bi, chunk)| {
            for oc in 0..co {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut acc = 0.0;
                        for ic in 0..ci {
                            for ky in 0..kh {
                                let iy = oy * sh + ky;
                                if iy < ph || iy - ph >= h {
                                    continue;
                                }
                                let iy = iy - ph;
                                for kx in 0..kw {
                                    let ix = ox * sw + kx;
                                    if ix < pw || ix - pw >= w {
                                        continue;
                                    }
                                    let ix = ix - pw;
                                    acc += xd[((bi * ci + ic) * h + iy) * w + ix]
                                        * kd[((oc * ci + ic) * kh + ky) * kw + kx];
                                }
                            }
                        }
                        chunk[(oc * oh + oy) * ow + ox] = acc;
                    }
                }
            }
        });
    Tensor::from_vec(out, (b, co, oh, ow))
}

/// Gradient of conv2d w.r.t. the input data.
pub fn conv2d_backward_data(
    g: &Tensor,
    x: &Tensor,
    k: &Tensor,
    (ph, pw): (usize, usize),
    (sh, sw): (usize, usize),
) -> Result<Tensor> {
    require_rank4(g, "conv2d output gradient")?;
    require_rank4(x, "conv2d input")?;
    require_rank4(k, "conv2d kernel")?;
    let (b, ci, h, w) = (x.dims()[0], x.dims()[1], x.dims()[2], x.dims()[3]);
    let (co, _, kh, kw) = (k.dims()[0], k.dims()[1], k.dims()[2], k.dims()[3]);
    let (oh, ow) = (g.dims()[2], g.dims()[3]);

    let gd = g.data();
    let kd = k.data();
    let mut gx = vec![0.0; b * ci * h * w];
    for bi in 0..b {
        for oc in 0..co {
            for oy in 0..oh {
                for ox in 0..ow {
                    let gv = gd[((bi * co + oc) * oh + oy) * ow + ox];
                    if gv == 0.0 {
                        continue;
                    }
                    for ic in 0..ci {
                        for ky in 0..kh {
                            let iy = oy * sh + ky;
                            if iy < ph || iy - ph >= h {
                                continue;
                            }
                            let iy = iy - ph;
                            for kx in 0..kw {
                                let ix = ox * sw + kx;
                                if ix < pw || ix - pw >= w {
                                    continue;
                                }
                                let ix = ix - pw;
                                gx[((bi * ci + ic) * h + iy) * w + ix] +=
                                    gv * kd[((oc * ci + ic) * kh + ky) * kw + kx];
                            }
                        }
                    }
                }
            }
        }
    }
    Tensor::from_vec(gx, (b, ci, h, w))
}

/// Gradient of conv2d w.r.t. the kernel.
pub fn conv2d_backward_kernel(
    g: &Tensor,
    x: &Tensor,
    k: &Tensor,
    (ph, pw): (usize, usize),
    (sh, sw): (usize, usize),
) -> Result<Tensor> {
    require_rank4(g, "conv2d output gradient")?;
    require_rank4(x, "conv2d input")?;
    require_rank4(k, "conv2d kernel")?;
    let (b, ci, h, w) = (x.dims()[0], x.dims()[1], x.dims()[2], x.dims()[3]);
    let (co, _, kh, kw) = (k.dims()[0], k.dims()[1], k.dims()[2], k.dims()[3]);
    let (oh, ow) = (g.dims()[2], g.dims()[3]);

    let gd = g.data();
    let xd = x.data();
    let mut gk = vec![0.0; co * ci * kh * kw];
    for bi in 0..b {
        for oc in 0..co {
            for oy in 0..oh {
                for ox in 0..ow {
                    let gv = gd[((bi * co + oc) * oh + oy) * ow + ox];
                    if gv == 0.0 {
                        continue;
                    }
                    for ic in 0..ci {
                        for ky in 0..kh {
                            let iy = oy * sh + ky;
                            if iy < ph || iy - ph >= h {
                                continue;
                            }
                            let iy = iy - ph;
                            for kx in 0..kw {
                                let ix = ox * sw + kx;
                                if ix < pw || ix - pw >= w {
                                    continue;
                                }
                                let ix = ix - pw;
                                gk[((oc * ci + ic) * kh + ky) * kw + kx] +=
                                    gv * xd[((bi * ci + ic) * h + iy) * w + ix];
                            }
                        }
                    }
                }
            }
        }
    }
    Tensor::from_vec(gk, (co, ci, kh, kw))
}

/// Forward 2-D pooling (max or average), zero padding.
///
/// Padded positions are excluded from max windows; average windows divide
/// by the full kernel area (count-include-pad).
pub fn pooling2d_forward(
    x: &Tensor,
    (kh, kw): (usize, usize),
    (ph, pw): (usize, usize),
    (sh, sw): (usize, usize),
    mode: PoolMode,
) -> Result<Tensor> {
    require_rank4(x, "pooling2d input")?;
    let (b, c, h, w) = (x.dims()[0], x.dims()[1], x.dims()[2], x.dims()[3]);
    let oh = out_extent(h, kh, ph, sh)?;
    let ow = out_extent(w, kw, pw, sw)?;

    let xd = x.data();
    let mut out = vec![0.0; b * c * oh * ow];
    for bc in 0..b * c {
        for oy in 0..oh {
            for ox in 0..ow {
                let mut best = f64::NEG_INFINITY;
                let mut sum = 0.0;
                let mut seen = false;
                for ky in 0..kh {
                    let iy = oy * sh + ky;
                    if iy < ph || iy - ph >= h {
                        continue;
                    }
                    let iy = iy - ph;
                    for kx in 0..kw {
                        let ix = ox * sw + kx;
                        if ix < pw || ix - pw >= w {
                            continue;
                        }
                        let ix = ix - pw;
                        let v = xd[(bc * h + iy) * w + ix];
                        seen = true;
                        sum += v;
                        if v > best {
                            best = v;
                        }
                    }
                }
                out[(bc * oh + oy) * ow + ox] = match mode {
                    PoolMode::Max if seen => best,
                    PoolMode::Max => 0.0,
                    PoolMode::Avg => sum / (kh * kw) as f64,
                };
            }
        }
    }
    Tensor::from_vec(out, (b, c, oh, ow))
}

/// Gradient of pooling2d w.r.t. the input.
///
/// Max pooling routes each output gradient to the first position that
/// attained the window maximum; average pooling spreads it uniformly.
pub fn pooling2d_backward(
    g: &Tensor,
    x: &Tensor,
    (kh, kw): (usize, usize),
    (ph, pw): (usize, usize),
    (sh, sw): (usize, usize),
    mode: PoolMode,
) -> Result<Tensor> {
    require_rank4(g, "pooling2d output gradient")?;
    require_rank4(x, "pooling2d input")?;
    let (b, c, h, w) = (x.dims()[0], x.dims()[1], x.dims()[2], x.dims()[3]);
    let (oh, ow) = (g.dims()[2], g.dims()[3]);

    let gd = g.data();
    let xd = x.data();
    let mut gx = vec![0.0; b * c * h * w];
    for bc in 0..b * c {
        for oy in 0..oh {
            for ox in 0..ow {
                let gv = gd[(bc * oh + oy) * ow + ox];
                match mode {
                    PoolMode::Max => {
                        let mut best = f64::NEG_INFINITY;
                        let mut best_pos = None;
                        for ky in 0..kh {
                            let iy = oy * sh + ky;
                            if iy < ph || iy - ph >= h {
                                continue;
                            }
                            let iy = iy - ph;
                            for kx in 0..kw {
                                let ix = ox * sw + kx;
                                if ix < pw || ix - pw >= w {
                                    continue;
                                }
                                let ix = ix - pw;
                                let v = xd[(bc * h + iy) * w + ix];
                                if v > best {
                                    best = v;
                                    best_pos = Some((iy, ix));
                                }
                            }
                        }
                        if let Some((iy, ix)) = best_pos {
                            gx[(bc * h + iy) * w + ix] += gv;
                        }
                    }
                    PoolMode::Avg => {
                        let share = gv / (kh * kw) as f64;
                        for ky in 0..kh {
                            let iy = oy * sh + ky;
                            if iy < ph || iy - ph >= h {
                                continue;
                            }
                            let iy = iy - ph;
                            for kx in 0..kw {
                                let ix = ox * sw + kx;
                                if ix < pw || ix - pw >= w {
                                    continue;
                                }
                                let ix = ix - pw;
                                gx[(bc * h + iy) * w + ix] += share;
                            }
                        }
                    }
                }
            }
        }
    }
    Tensor::from_vec(gx, (b, c, h, w))
}
