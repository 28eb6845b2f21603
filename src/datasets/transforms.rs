use ndarray::prelude::*;
use ndarray::s;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-channel normalization applied once at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalize {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Normalize {
    pub fn mnist() -> Normalize {
        Normalize {
            mean: vec![0.1307],
            std: vec![0.3081],
        }
    }

    pub fn apply(&self, images: &mut Array4<f32>) {
        let chans = images.dim().1;
        assert_eq!(chans, self.mean.len());
        for c in 0..chans {
            let (mu, sd) = (self.mean[c], self.std[c]);
            images
                .index_axis_mut(Axis(1), c)
                .mapv_inplace(|v| (v - mu) / sd);
        }
    }
}

/// Zero a square of side `len` at a random center, clipped to the image.
/// Applied per example, train phase only.
pub fn cutout<R: Rng>(images: &mut Array4<f32>, len: usize, rng: &mut R) {
    if len == 0 {
        return;
    }
    let (n, _, h, w) = images.dim();
    for b in 0..n {
        let cy = rng.gen_range(0..h);
        let cx = rng.gen_range(0..w);
        let y0 = cy.saturating_sub(len / 2);
        let y1 = (cy + len / 2).min(h);
        let x0 = cx.saturating_sub(len / 2);
        let x1 = (cx + len / 2).min(w);
        images
            .index_axis_mut(Axis(0), b)
            .slice_mut(s![.., y0..y1, x0..x1])
            .fill(0.0);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn normalize_centers_channel() {
        let mut images = Array4::from_elem((2, 1, 4, 4), 0.1307f32);
        Normalize::mnist().apply(&mut images);
        assert!(images.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn cutout_zeroes_bounded_square() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut images = Array4::from_elem((4, 1, 8, 8), 1.0f32);
        cutout(&mut images, 4, &mut rng);
        for b in 0..4 {
            let zeros = images
                .index_axis(Axis(0), b)
                .iter()
                .filter(|&&v| v == 0.0)
                .count();
            assert!(zeros > 0, "no mask applied to example {b}");
            assert!(zeros <= 16, "mask larger than len^2 on example {b}");
        }
    }

    #[test]
    fn cutout_zero_len_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut images = Array4::from_elem((1, 1, 4, 4), 1.0f32);
        cutout(&mut images, 0, &mut rng);
        assert!(images.iter().all(|&v| v == 1.0));
    }
}
