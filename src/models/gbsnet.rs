use std::io::{Read, Write};

use ndarray::prelude::*;
use ndarray::s;

use crate::nn::batchnorm::BatchNorm2d;
use crate::nn::conv::Conv2d;
use crate::nn::linear::Linear;
use crate::nn::pool::{global_mean_pool, MaxPool2d};
use crate::nn::{relu4, Param};
use crate::optim::Sgd;
use crate::runner::checkpoint::{read_arr, write_arr};

/// Nearest resize of each alpha row from `n_a` to `width`.
pub(crate) fn resize_nearest(alpha: &Array2<f32>, width: usize) -> Array2<f32> {
    let n_a = alpha.ncols();
    Array2::from_shape_fn((alpha.nrows(), width), |(n, j)| alpha[[n, j * n_a / width]])
}

/// Classifier head conditioned on the per-example weight rows. The weight
/// row is resized to the feature width, turned into the gate exp(-a), and
/// either multiplies the pooled features or is concatenated with them.
pub struct GbsCls {
    pub fc_out: Linear,
    in_feat: usize,
    n_a: usize,
    feature_adaptive: bool,
}

impl GbsCls {
    pub fn new(in_feat: usize, n_a: usize, num_classes: usize, feature_adaptive: bool) -> GbsCls {
        let fc_in = if feature_adaptive { in_feat } else { in_feat * 2 };
        GbsCls {
            fc_out: Linear::new(fc_in, num_classes, true),
            in_feat,
            n_a,
            feature_adaptive,
        }
    }

    pub fn forward(
        &self,
        feat: &Array2<f32>,
        alpha: &Array2<f32>,
        fac: f32,
    ) -> (Array2<f32>, impl FnMut(&mut Self, &Array2<f32>) -> Array2<f32>) {
        let gate = if self.in_feat != self.n_a {
            resize_nearest(alpha, self.in_feat).mapv(|a| (-a).exp())
        } else {
            alpha.mapv(|a| (-a).exp())
        };

        let adaptive = self.feature_adaptive;
        let in_feat = self.in_feat;
        let fc_in = if adaptive {
            feat * &gate
        } else {
            ndarray::concatenate(Axis(1), &[feat.view(), gate.view()]).unwrap()
        };
        let (y, mut b_fc) = self.fc_out.forward(&fc_in);
        let logits = y * fac;

        let back_fn = move |s: &mut GbsCls, grad: &Array2<f32>| {
            let g = grad * fac;
            let g = b_fc(&mut s.fc_out, &g);
            if adaptive {
                g * &gate
            } else {
                g.slice(s![.., ..in_feat]).to_owned()
            }
        };
        (logits, back_fn)
    }
}

/// CNN backbone plus GBS classifier head. Conv filters are He-normal over
/// the kernel fan-out, batch-norm starts at identity, linear biases at zero.
pub struct GbsConvNet {
    conv1: Conv2d,
    bn1: BatchNorm2d,
    conv2: Conv2d,
    bn2: BatchNorm2d,
    pool: MaxPool2d,
    pub cls: GbsCls,
}

impl GbsConvNet {
    pub fn new(
        in_chan: usize,
        width: usize,
        n_a: usize,
        num_classes: usize,
        feature_adaptive: bool,
    ) -> GbsConvNet {
        GbsConvNet {
            conv1: Conv2d::new(in_chan, width, 3, 1, false),
            bn1: BatchNorm2d::new(width),
            conv2: Conv2d::new(width, 2 * width, 3, 1, false),
            bn2: BatchNorm2d::new(2 * width),
            pool: MaxPool2d::new(2),
            cls: GbsCls::new(2 * width, n_a, num_classes, feature_adaptive),
        }
    }

    /// Forward pass over an image batch [N, C, H, W] with the per-example
    /// weight rows [N, n_a]. `train` toggles batch-norm behavior only.
    pub fn forward_t(
        &mut self,
        x: &Array4<f32>,
        alpha: &Array2<f32>,
        fac1: f32,
        train: bool,
    ) -> (Array2<f32>, impl FnMut(&mut Self, &Array2<f32>)) {
        let (y, mut b_c1) = self.conv1.forward(x);
        let (y, mut b_n1) = self.bn1.forward_t(&y, train);
        let (y, mut b_r1) = relu4(&y);
        let (y, mut b_p1) = self.pool.forward(&y);
        let (y, mut b_c2) = self.conv2.forward(&y);
        let (y, mut b_n2) = self.bn2.forward_t(&y, train);
        let (y, mut b_r2) = relu4(&y);
        let (y, mut b_p2) = self.pool.forward(&y);
        let (feat, mut b_gp) = global_mean_pool(&y);
        let (logits, mut b_cls) = self.cls.forward(&feat, alpha, fac1);

        let back_fn = move |s: &mut GbsConvNet, grad: &Array2<f32>| {
            let g = b_cls(&mut s.cls, grad);
            let g = b_gp(&g);
            let g = b_p2(&g);
            let g = b_r2(&g);
            let g = b_n2(&mut s.bn2, &g);
            let g = b_c2(&mut s.conv2, &g);
            let g = b_p1(&g);
            let g = b_r1(&g);
            let g = b_n1(&mut s.bn1, &g);
            let _ = b_c1(&mut s.conv1, &g);
        };
        (logits, back_fn)
    }

    pub fn zero_grad(&mut self) {
        self.conv1.zero_grad();
        self.bn1.zero_grad();
        self.conv2.zero_grad();
        self.bn2.zero_grad();
        self.cls.fc_out.zero_grad();
    }

    pub fn step(&mut self, opt: &Sgd, lr: f32) {
        fn upd<D: ndarray::Dimension>(opt: &Sgd, lr: f32, p: &mut Param<D>) {
            opt.update(p, lr);
        }
        upd(opt, lr, &mut self.conv1.filter);
        if let Some(b) = &mut self.conv1.bias {
            upd(opt, lr, b);
        }
        upd(opt, lr, &mut self.bn1.gamma);
        upd(opt, lr, &mut self.bn1.beta);
        upd(opt, lr, &mut self.conv2.filter);
        if let Some(b) = &mut self.conv2.bias {
            upd(opt, lr, b);
        }
        upd(opt, lr, &mut self.bn2.gamma);
        upd(opt, lr, &mut self.bn2.beta);
        upd(opt, lr, &mut self.cls.fc_out.w);
        if let Some(b) = &mut self.cls.fc_out.bias {
            upd(opt, lr, b);
        }
    }

    /// Fixed-order parameter dump, shapes are implied by the architecture.
    pub fn write_state(&self, w: &mut dyn Write) -> std::io::Result<()> {
        write_arr(w, &self.conv1.filter.w)?;
        write_arr(w, &self.bn1.gamma.w)?;
        write_arr(w, &self.bn1.beta.w)?;
        write_arr(w, &self.bn1.running_mean)?;
        write_arr(w, &self.bn1.running_var)?;
        write_arr(w, &self.conv2.filter.w)?;
        write_arr(w, &self.bn2.gamma.w)?;
        write_arr(w, &self.bn2.beta.w)?;
        write_arr(w, &self.bn2.running_mean)?;
        write_arr(w, &self.bn2.running_var)?;
        write_arr(w, &self.cls.fc_out.w.w)?;
        if let Some(b) = &self.cls.fc_out.bias {
            write_arr(w, &b.w)?;
        }
        Ok(())
    }

    pub fn read_state(&mut self, r: &mut dyn Read) -> std::io::Result<()> {
        read_arr(r, &mut self.conv1.filter.w)?;
        read_arr(r, &mut self.bn1.gamma.w)?;
        read_arr(r, &mut self.bn1.beta.w)?;
        read_arr(r, &mut self.bn1.running_mean)?;
        read_arr(r, &mut self.bn1.running_var)?;
        read_arr(r, &mut self.conv2.filter.w)?;
        read_arr(r, &mut self.bn2.gamma.w)?;
        read_arr(r, &mut self.bn2.beta.w)?;
        read_arr(r, &mut self.bn2.running_mean)?;
        read_arr(r, &mut self.bn2.running_var)?;
        read_arr(r, &mut self.cls.fc_out.w.w)?;
        if let Some(b) = &mut self.cls.fc_out.bias {
            read_arr(r, &mut b.w)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nearest_resize_upsamples_rows() {
        let alpha = arr2(&[[0.0f32, 1.0, 2.0, 3.0]]);
        let out = resize_nearest(&alpha, 8);
        assert_eq!(
            out,
            arr2(&[[0.0f32, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]])
        );
    }

    #[test]
    fn gate_is_bounded_for_nonnegative_alpha() {
        let cls = GbsCls::new(4, 2, 3, true);
        let feat = Array2::ones((5, 4));
        let alpha = arr2(&[[0.0f32, 1.0]; 5]);
        let (logits, _) = cls.forward(&feat, &alpha, 1.0);
        assert_eq!(logits.dim(), (5, 3));
        assert!(logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn concat_head_widens_input() {
        let cls = GbsCls::new(4, 4, 3, false);
        assert_eq!(cls.fc_out.w.w.dim(), (3, 8));
        let feat = Array2::ones((2, 4));
        let alpha = Array2::ones((2, 4));
        let (logits, _) = cls.forward(&feat, &alpha, 0.5);
        assert_eq!(logits.dim(), (2, 3));
    }

    #[test]
    fn forward_and_backward_shapes() {
        let mut net = GbsConvNet::new(1, 4, 10, 3, true);
        let x = Array4::from_shape_fn((2, 1, 8, 8), |(b, _, i, j)| {
            ((b + i + j) as f32 * 0.1).sin()
        });
        let alpha = Array2::ones((2, 10));
        let (logits, mut back) = net.forward_t(&x, &alpha, 0.125, true);
        assert_eq!(logits.dim(), (2, 3));
        net.zero_grad();
        back(&mut net, &Array2::ones((2, 3)));
        assert!(net.conv1.filter.g.iter().any(|&g| g != 0.0));
    }

    #[test]
    fn init_policy() {
        let net = GbsConvNet::new(1, 8, 10, 10, true);
        assert!(net.bn1.gamma.w.iter().all(|&g| g == 1.0));
        assert!(net.bn1.beta.w.iter().all(|&b| b == 0.0));
        assert!(net
            .cls
            .fc_out
            .bias
            .as_ref()
            .unwrap()
            .w
            .iter()
            .all(|&b| b == 0.0));
        // He over kernel fan-out: std = sqrt(2 / (3*3*8))
        let var = net.conv1.filter.w.mapv(|x| x * x).mean().unwrap();
        let expect = 2.0 / 72.0;
        assert!((var - expect).abs() < expect, "var {var} vs {expect}");
    }
}
