use ndarray::Dimension;
use serde::{Deserialize, Serialize};

use crate::nn::Param;

/// SGD with momentum, dampening, weight decay and optional nesterov update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sgd {
    pub momentum: f32,
    pub dampening: f32,
    pub wd: f32,
    pub nesterov: bool,
}

impl Default for Sgd {
    fn default() -> Self {
        Sgd {
            momentum: 0.9,
            dampening: 0.0,
            wd: 5e-4,
            nesterov: true,
        }
    }
}

impl Sgd {
    pub fn update<D: Dimension>(&self, p: &mut Param<D>, lr: f32) {
        let (mom, damp, wd) = (self.momentum, self.dampening, self.wd);
        for ((w, g), v) in p.w.iter_mut().zip(p.g.iter()).zip(p.v.iter_mut()) {
            let g = g + wd * *w;
            *v = mom * *v + (1.0 - damp) * g;
            let d = if self.nesterov { g + mom * *v } else { *v };
            *w -= lr * d;
        }
    }
}

/// Piecewise-constant learning rate, multiplied by `gamma` at each milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDecay {
    pub base: f32,
    pub gamma: f32,
    pub milestones: Vec<usize>,
}

impl StepDecay {
    pub fn lr(&self, epoch: usize) -> f32 {
        let passed = self.milestones.iter().filter(|&&m| epoch >= m).count();
        self.base * self.gamma.powi(passed as i32)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::prelude::*;

    #[test]
    fn plain_sgd_moves_against_gradient() {
        let opt = Sgd {
            momentum: 0.0,
            dampening: 0.0,
            wd: 0.0,
            nesterov: false,
        };
        let mut p = Param::new(arr1(&[1.0f32, -1.0]));
        p.g = arr1(&[0.5, -0.5]);
        opt.update(&mut p, 0.1);
        assert!((p.w[0] - 0.95).abs() < 1e-6);
        assert!((p.w[1] + 0.95).abs() < 1e-6);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let opt = Sgd {
            momentum: 0.9,
            dampening: 0.0,
            wd: 0.0,
            nesterov: false,
        };
        let mut p = Param::new(arr1(&[0.0f32]));
        p.g = arr1(&[1.0]);
        opt.update(&mut p, 1.0); // v = 1, w = -1
        p.g = arr1(&[1.0]);
        opt.update(&mut p, 1.0); // v = 1.9, w = -2.9
        assert!((p.w[0] + 2.9).abs() < 1e-6);
    }

    #[test]
    fn step_decay_schedule() {
        let s = StepDecay {
            base: 0.1,
            gamma: 0.1,
            milestones: vec![50, 100],
        };
        assert!((s.lr(0) - 0.1).abs() < 1e-9);
        assert!((s.lr(49) - 0.1).abs() < 1e-9);
        assert!((s.lr(50) - 0.01).abs() < 1e-9);
        assert!((s.lr(120) - 0.001).abs() < 1e-9);
    }
}
