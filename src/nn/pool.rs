use ndarray::prelude::*;

/// Non-overlapping max pooling, kernel == stride. Odd trailing rows and
/// columns are dropped.
pub struct MaxPool2d {
    k: usize,
}

impl MaxPool2d {
    pub fn new(k: usize) -> MaxPool2d {
        MaxPool2d { k }
    }

    pub fn forward(&self, x: &Array4<f32>) -> (Array4<f32>, impl FnMut(&Array4<f32>) -> Array4<f32>) {
        let (n, c, h, w) = x.dim();
        let k = self.k;
        let (ho, wo) = (h / k, w / k);

        let mut y = Array4::<f32>::zeros((n, c, ho, wo));
        // flattened input offset of every winner, for the backward scatter
        let mut argmax = Array4::<usize>::zeros((n, c, ho, wo));
        for b in 0..n {
            for ch in 0..c {
                for i in 0..ho {
                    for j in 0..wo {
                        let mut best = f32::NEG_INFINITY;
                        let mut best_at = 0;
                        for di in 0..k {
                            for dj in 0..k {
                                let (ii, jj) = (i * k + di, j * k + dj);
                                let v = x[[b, ch, ii, jj]];
                                if v > best {
                                    best = v;
                                    best_at = ii * w + jj;
                                }
                            }
                        }
                        y[[b, ch, i, j]] = best;
                        argmax[[b, ch, i, j]] = best_at;
                    }
                }
            }
        }

        let back_fn = move |grad: &Array4<f32>| {
            let mut dx = Array4::<f32>::zeros((n, c, h, w));
            for b in 0..n {
                for ch in 0..c {
                    for i in 0..ho {
                        for j in 0..wo {
                            let at = argmax[[b, ch, i, j]];
                            dx[[b, ch, at / w, at % w]] += grad[[b, ch, i, j]];
                        }
                    }
                }
            }
            dx
        };
        (y, back_fn)
    }
}

/// Mean over the spatial axes, [N, C, H, W] -> [N, C].
pub fn global_mean_pool(x: &Array4<f32>) -> (Array2<f32>, impl FnMut(&Array2<f32>) -> Array4<f32>) {
    let (n, c, h, w) = x.dim();
    let m = (h * w) as f32;
    let mut y = Array2::<f32>::zeros((n, c));
    for b in 0..n {
        for ch in 0..c {
            y[[b, ch]] = x.index_axis(Axis(0), b).index_axis(Axis(0), ch).sum() / m;
        }
    }
    let back_fn = move |grad: &Array2<f32>| {
        let mut dx = Array4::<f32>::zeros((n, c, h, w));
        for b in 0..n {
            for ch in 0..c {
                let g = grad[[b, ch]] / m;
                dx.index_axis_mut(Axis(0), b)
                    .index_axis_mut(Axis(0), ch)
                    .fill(g);
            }
        }
        dx
    };
    (y, back_fn)
}
