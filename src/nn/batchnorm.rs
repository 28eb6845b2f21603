use ndarray::prelude::*;

use super::init::Initializer;
use super::Param;

/// Per-channel batch normalization over [N, C, H, W]. Gamma starts at one,
/// beta at zero. Training mode normalizes with batch statistics and updates
/// the running estimates, eval mode normalizes with the running estimates.
pub struct BatchNorm2d {
    pub gamma: Param<Ix1>,
    pub beta: Param<Ix1>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    momentum: f32,
    eps: f32,
}

impl BatchNorm2d {
    pub fn new(chan: usize) -> BatchNorm2d {
        BatchNorm2d {
            gamma: Param::new(Initializer::Ones.init(chan, chan, chan)),
            beta: Param::new(Initializer::Zeros.init(chan, chan, chan)),
            running_mean: Array1::zeros(chan),
            running_var: Array1::ones(chan),
            momentum: 0.1,
            eps: 1e-5,
        }
    }

    pub fn forward_t(
        &mut self,
        x: &Array4<f32>,
        train: bool,
    ) -> (Array4<f32>, impl FnMut(&mut Self, &Array4<f32>) -> Array4<f32>) {
        let (n, c, h, w) = x.dim();
        let m = (n * h * w) as f32;

        let mut xhat = Array4::<f32>::zeros((n, c, h, w));
        let mut inv_std = Array1::<f32>::zeros(c);
        for ch in 0..c {
            let view = x.index_axis(Axis(1), ch);
            let (mean, var) = if train {
                let mean = view.sum() / m;
                let var = view.mapv(|v| (v - mean) * (v - mean)).sum() / m;
                self.running_mean[ch] =
                    (1.0 - self.momentum) * self.running_mean[ch] + self.momentum * mean;
                self.running_var[ch] =
                    (1.0 - self.momentum) * self.running_var[ch] + self.momentum * var;
                (mean, var)
            } else {
                (self.running_mean[ch], self.running_var[ch])
            };
            let istd = 1.0 / (var + self.eps).sqrt();
            inv_std[ch] = istd;
            let mut out = xhat.index_axis_mut(Axis(1), ch);
            out.assign(&view.mapv(|v| (v - mean) * istd));
        }

        let mut y = xhat.clone();
        for ch in 0..c {
            let g = self.gamma.w[ch];
            let b = self.beta.w[ch];
            y.index_axis_mut(Axis(1), ch).mapv_inplace(|v| v * g + b);
        }

        let back_fn = move |s: &mut BatchNorm2d, grad: &Array4<f32>| {
            let mut dx = Array4::<f32>::zeros(grad.raw_dim());
            for ch in 0..c {
                let g = grad.index_axis(Axis(1), ch);
                let xh = xhat.index_axis(Axis(1), ch);
                let sum_g = g.sum();
                let sum_gx = (&g * &xh).sum();
                s.gamma.g[ch] += sum_gx;
                s.beta.g[ch] += sum_g;

                let scale = s.gamma.w[ch] * inv_std[ch];
                let mut out = dx.index_axis_mut(Axis(1), ch);
                if train {
                    // dx = gamma * inv_std / m * (m*g - sum(g) - xhat * sum(g*xhat))
                    out.assign(
                        &g.iter()
                            .zip(xh.iter())
                            .map(|(gi, xi)| scale / m * (m * gi - sum_g - xi * sum_gx))
                            .collect::<Array1<f32>>()
                            .into_shape((n, h, w))
                            .unwrap(),
                    );
                } else {
                    out.assign(&g.mapv(|gi| gi * scale));
                }
            }
            dx
        };
        (y, back_fn)
    }

    pub fn zero_grad(&mut self) {
        self.gamma.zero_grad();
        self.beta.zero_grad();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Array4<f32> {
        Array4::from_shape_fn((3, 2, 4, 4), |(b, c, i, j)| {
            ((b * 31 + c * 17 + i * 5 + j) as f32 * 0.37).sin() * 2.0 + c as f32
        })
    }

    #[test]
    fn train_mode_normalizes() {
        let mut bn = BatchNorm2d::new(2);
        let x = sample();
        let (y, _) = bn.forward_t(&x, true);
        for ch in 0..2 {
            let v = y.index_axis(Axis(1), ch);
            let mean = v.sum() / v.len() as f32;
            let var = v.mapv(|a| (a - mean) * (a - mean)).sum() / v.len() as f32;
            assert!(mean.abs() < 1e-4, "channel {ch} mean {mean}");
            assert!((var - 1.0).abs() < 1e-2, "channel {ch} var {var}");
        }
    }

    #[test]
    fn eval_uses_running_stats() {
        let mut bn = BatchNorm2d::new(2);
        let x = sample();
        // push the running stats most of the way toward the batch stats
        for _ in 0..200 {
            bn.forward_t(&x, true);
        }
        let (y_train, _) = bn.forward_t(&x, true);
        let (y_eval, _) = bn.forward_t(&x, false);
        let diff = (&y_train - &y_eval).mapv(f32::abs);
        assert!(diff.iter().cloned().fold(0.0f32, f32::max) < 1e-2);
    }

    #[test]
    fn backward_matches_finite_difference() {
        let mut bn = BatchNorm2d::new(2);
        bn.gamma.w[0] = 1.3;
        bn.gamma.w[1] = 0.7;
        let x = sample();
        let r = Array4::from_shape_fn(x.raw_dim(), |(b, c, i, j)| {
            ((b + c + i + j) as f32 * 0.21).cos()
        });

        let (_, mut back) = bn.forward_t(&x, true);
        bn.zero_grad();
        let dx = back(&mut bn, &r);

        let h = 1e-2f32;
        let mut xp = x.clone();
        for idx in [(0, 0, 0, 0), (2, 1, 3, 3), (1, 0, 2, 1)] {
            let old = xp[idx];
            xp[idx] = old + h;
            let (y1, _) = bn.forward_t(&xp, true);
            xp[idx] = old - h;
            let (y2, _) = bn.forward_t(&xp, true);
            xp[idx] = old;
            let num = ((y1 - y2) * &r).sum() / (2.0 * h);
            assert!((num - dx[idx]).abs() < 2e-2, "dx {} vs {}", num, dx[idx]);
        }
    }
}
