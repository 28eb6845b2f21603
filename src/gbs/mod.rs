use ndarray::prelude::*;
use rand::seq::index;
use rand::Rng;
use rand_distr::{Distribution, Exp};

/// Row indices of the weight table for the half-open window [start, end),
/// wrapping modulo `nsub`. Exactly `end - start` indices, repeats allowed
/// when the window spans more than one full cycle.
pub fn cyclic_indices(start: usize, end: usize, nsub: usize) -> Vec<usize> {
    assert!(start <= end, "window must be non-decreasing");
    (start..end).map(|i| i % nsub).collect()
}

/// Rate-1 exponential sampler of a fixed row width.
pub struct ExpSampler {
    width: usize,
    dist: Exp<f32>,
}

impl ExpSampler {
    pub fn new(width: usize) -> ExpSampler {
        ExpSampler {
            width,
            dist: Exp::new(1.0).unwrap(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Array1<f32> {
        (0..self.width).map(|_| self.dist.sample(rng)).collect()
    }

    /// `n` independent rows, [n, width].
    pub fn sample_n<R: Rng>(&self, rng: &mut R, n: usize) -> Array2<f32> {
        let mut out = Array2::zeros((n, self.width));
        for mut row in out.rows_mut() {
            row.assign(&self.sample(rng));
        }
        out
    }
}

/// The persistent per-example weight table. `alpha` is [nsub, n_a] with
/// nsub = sub_size * n_b, initialized to ones and kept non-negative by only
/// ever overwriting cells with exponential draws. `proj` is the fixed block
/// identity [nsub, sub_size]: row i belongs to block i / n_b.
pub struct WeightTable {
    alpha: Array2<f32>,
    proj: Array2<f32>,
    sampler: ExpSampler,
    n_a: usize,
    n_b: usize,
    sub_size: usize,
}

impl WeightTable {
    pub fn new(n_a: usize, n_b: usize, sub_size: usize, v: usize) -> WeightTable {
        let nsub = sub_size * n_b;
        WeightTable {
            alpha: Array2::ones((nsub, n_a)),
            proj: Array2::from_shape_fn((nsub, sub_size), |(i, c)| {
                if i / n_b == c {
                    1.0
                } else {
                    0.0
                }
            }),
            sampler: ExpSampler::new(v),
            n_a,
            n_b,
            sub_size,
        }
    }

    pub fn nsub(&self) -> usize {
        self.sub_size * self.n_b
    }

    pub fn alpha(&self) -> &Array2<f32> {
        &self.alpha
    }

    pub fn alpha_mut(&mut self) -> &mut Array2<f32> {
        &mut self.alpha
    }

    /// Raw alpha rows for the current batch, [batch, n_a].
    pub fn rows(&self, indices: &[usize]) -> Array2<f32> {
        self.alpha.select(Axis(0), indices)
    }

    fn micro_steps(&self, batch: usize) -> usize {
        let v = self.sampler.width();
        (batch * 2 * v + self.nsub() - 1) / self.nsub()
    }

    /// One round of stochastic, spatially-local re-weighting: for
    /// ceil(batch / nsub * 2V) rows (drawn without replacement) overwrite a
    /// fresh V-column subset with Exponential(1) draws.
    pub fn resample<R: Rng>(&mut self, rng: &mut R, batch: usize) {
        let steps = self.micro_steps(batch);
        let v = self.sampler.width();
        let rows = index::sample(rng, self.nsub(), steps);
        for row in rows {
            let cols = index::sample(rng, self.n_a, v);
            let draws = self.sampler.sample(rng);
            for (slot, col) in cols.into_iter().enumerate() {
                self.alpha[[row, col]] = draws[slot];
            }
        }
    }

    /// Project a `sub_size`-column sub-table through the block identity:
    /// the weight of table row i is the selected column owned by i's block.
    pub fn project(&self, cols: &[usize]) -> Array1<f32> {
        (self.alpha.select(Axis(1), cols) * &self.proj).sum_axis(Axis(1))
    }

    /// Full per-batch weight generation: resample, fix a column subset for
    /// the whole batch, project, gather at the cyclic indices.
    pub fn generate<R: Rng>(&mut self, rng: &mut R, batch: usize, indices: &[usize]) -> Array1<f32> {
        self.resample(rng, batch);
        let cols = index::sample(rng, self.n_a, self.sub_size).into_vec();
        let w = self.project(&cols);
        indices.iter().map(|&i| w[i]).collect()
    }
}
