use ndarray::prelude::*;

use super::init::Initializer;
use super::Param;

/// 3x3-style convolution, unit stride, zero padding. Filters are He-normal
/// scaled by the kernel fan-out, matching the classifier init policy.
pub struct Conv2d {
    pub filter: Param<Ix4>,
    pub bias: Option<Param<Ix1>>,
    pad: usize,
}

impl Conv2d {
    pub fn new(in_chan: usize, out_chan: usize, ksize: usize, pad: usize, bias: bool) -> Conv2d {
        let fan_out = ksize * ksize * out_chan;
        let fan_in = ksize * ksize * in_chan;
        let std = (2.0 / fan_out as f32).sqrt();
        let filter = Param::new(Initializer::NormalScaled(0.0, std).init(
            (out_chan, in_chan, ksize, ksize),
            fan_in,
            fan_out,
        ));
        let bias = if bias {
            Some(Param::new(Initializer::Zeros.init(out_chan, fan_in, fan_out)))
        } else {
            None
        };
        Conv2d { filter, bias, pad }
    }

    pub fn out_shape(&self, x: &Array4<f32>) -> (usize, usize, usize, usize) {
        let (n, _, h, w) = x.dim();
        let (o, _, k, _) = self.filter.w.dim();
        (n, o, h + 2 * self.pad + 1 - k, w + 2 * self.pad + 1 - k)
    }

    pub fn forward(
        &self,
        x: &Array4<f32>,
    ) -> (Array4<f32>, impl FnMut(&mut Self, &Array4<f32>) -> Array4<f32>) {
        let (n, cin, hin, win) = x.dim();
        let (o, _, k, _) = self.filter.w.dim();
        let (_, _, hout, wout) = self.out_shape(x);
        let pad = self.pad as isize;

        let mut y = Array4::<f32>::zeros((n, o, hout, wout));
        for b in 0..n {
            for oc in 0..o {
                let b0 = self.bias.as_ref().map(|p| p.w[oc]).unwrap_or(0.0);
                for i in 0..hout {
                    for j in 0..wout {
                        let mut acc = b0;
                        for c in 0..cin {
                            for ki in 0..k {
                                let ii = i as isize + ki as isize - pad;
                                if ii < 0 || ii >= hin as isize {
                                    continue;
                                }
                                for kj in 0..k {
                                    let jj = j as isize + kj as isize - pad;
                                    if jj < 0 || jj >= win as isize {
                                        continue;
                                    }
                                    acc += x[[b, c, ii as usize, jj as usize]]
                                        * self.filter.w[[oc, c, ki, kj]];
                                }
                            }
                        }
                        y[[b, oc, i, j]] = acc;
                    }
                }
            }
        }

        let x1 = x.clone();
        let back_fn = move |s: &mut Conv2d, grad: &Array4<f32>| {
            let mut dx = Array4::<f32>::zeros((n, cin, hin, win));
            for b in 0..n {
                for oc in 0..o {
                    for i in 0..hout {
                        for j in 0..wout {
                            let g = grad[[b, oc, i, j]];
                            if g == 0.0 {
                                continue;
                            }
                            for c in 0..cin {
                                for ki in 0..k {
                                    let ii = i as isize + ki as isize - pad;
                                    if ii < 0 || ii >= hin as isize {
                                        continue;
                                    }
                                    for kj in 0..k {
                                        let jj = j as isize + kj as isize - pad;
                                        if jj < 0 || jj >= win as isize {
                                            continue;
                                        }
                                        let (iu, ju) = (ii as usize, jj as usize);
                                        dx[[b, c, iu, ju]] += g * s.filter.w[[oc, c, ki, kj]];
                                        s.filter.g[[oc, c, ki, kj]] += g * x1[[b, c, iu, ju]];
                                    }
                                }
                            }
                        }
                    }
                }
            }
            if let Some(bias) = &mut s.bias {
                for oc in 0..o {
                    bias.g[oc] += grad.index_axis(Axis(1), oc).sum();
                }
            }
            dx
        };
        (y, back_fn)
    }

    pub fn zero_grad(&mut self) {
        self.filter.zero_grad();
        if let Some(b) = &mut self.bias {
            b.zero_grad();
        }
    }
}
