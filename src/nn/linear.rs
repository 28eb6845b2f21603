use ndarray::prelude::*;

use super::init::Initializer;
use super::Param;

/// Fully connected layer, x is [N, in_dim], output [N, out_dim].
/// Biases start at zero per the classifier init policy.
pub struct Linear {
    pub w: Param<Ix2>,
    pub bias: Option<Param<Ix1>>,
}

impl Linear {
    pub fn new(in_dim: usize, out_dim: usize, bias: bool) -> Linear {
        Linear {
            w: Param::new(Initializer::HeNormal.init((out_dim, in_dim), in_dim, out_dim)),
            bias: if bias {
                Some(Param::new(Initializer::Zeros.init(out_dim, in_dim, out_dim)))
            } else {
                None
            },
        }
    }

    pub fn forward(
        &self,
        x: &Array2<f32>,
    ) -> (Array2<f32>, impl FnMut(&mut Self, &Array2<f32>) -> Array2<f32>) {
        let mut y = x.dot(&self.w.w.t());
        if let Some(b) = &self.bias {
            y += &b.w;
        }
        let x1 = x.clone();
        let back_fn = move |s: &mut Linear, grad: &Array2<f32>| {
            let dx = grad.dot(&s.w.w);
            s.w.g += &grad.t().dot(&x1);
            if let Some(b) = &mut s.bias {
                b.g += &grad.sum_axis(Axis(0));
            }
            dx
        };
        (y, back_fn)
    }

    pub fn zero_grad(&mut self) {
        self.w.zero_grad();
        if let Some(b) = &mut self.bias {
            b.zero_grad();
        }
    }
}
