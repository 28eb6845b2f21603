use ndarray::prelude::*;
use ndarray::{Dimension, IntoDimension};
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;

/// Used to generate the initial values for the parameters of the model.
#[derive(Debug, Copy, Clone)]
pub enum Initializer {
    /// Given constant value.
    Constant(f32),
    /// Normal distribution scaled using Glorot scale factor.
    GlorotNormal,
    /// Normal distribution scaled using He scale factor over `fan_in`.
    HeNormal,
    /// Normal distribution with given mean and standard deviation.
    NormalScaled(f32, f32),
    /// Uniform distribution within the given bounds.
    UniformBounded(f32, f32),
    /// Ones.
    Ones,
    /// Zeros.
    Zeros,
}

impl Initializer {
    pub fn init<D, Sh>(self, dim: Sh, fan_in: usize, fan_out: usize) -> Array<f32, D>
    where
        D: Dimension,
        Sh: IntoDimension<Dim = D> + Clone,
    {
        match self {
            Initializer::Constant(x) => Array::from_elem(dim, x),
            Initializer::GlorotNormal => {
                let std = (2.0 / (fan_in + fan_out) as f32).sqrt();
                Array::random(dim, Normal::new(0.0, std).unwrap())
            }
            Initializer::HeNormal => {
                let std = (2.0 / fan_in as f32).sqrt();
                Array::random(dim, Normal::new(0.0, std).unwrap())
            }
            Initializer::NormalScaled(mean, std) => {
                Array::random(dim, Normal::new(mean, std).unwrap())
            }
            Initializer::UniformBounded(lb, ub) => Array::random(dim, Uniform::new(lb, ub)),
            Initializer::Ones => Array::ones(dim),
            Initializer::Zeros => Array::zeros(dim),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_fill() {
        let a: Array2<f32> = Initializer::Constant(0.5).init((3, 4), 3, 4);
        assert!(a.iter().all(|x| *x == 0.5));
        let z: Array1<f32> = Initializer::Zeros.init(8, 8, 8);
        assert!(z.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn he_scale_tracks_fan_in() {
        // std = sqrt(2 / fan_in), sample variance should land near it
        let a: Array2<f32> = Initializer::HeNormal.init((200, 200), 200, 200);
        let var = a.mapv(|x| x * x).mean().unwrap();
        let expect = 2.0 / 200.0;
        assert!((var - expect).abs() < expect * 0.25, "var {var} vs {expect}");
    }
}
