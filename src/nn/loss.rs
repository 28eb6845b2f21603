use ndarray::prelude::*;

use super::activations::log_softmax;
use super::Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    Mean,
    Sum,
}

/// Cross-entropy between logits [N, K] and integer labels, optionally scaled
/// per example by `weights` before reduction. Returns the reduced loss and
/// the gradient with respect to the logits.
pub fn cross_entropy<F: Float>(
    logits: &Array2<F>,
    labels: &[u32],
    weights: Option<&Array1<F>>,
    reduce: Reduce,
) -> (F, Array2<F>) {
    let n = logits.nrows();
    assert_eq!(n, labels.len(), "logits and labels disagree on batch size");
    if let Some(w) = weights {
        assert_eq!(n, w.len(), "weights must be per-example");
    }

    let logp = log_softmax(logits);
    let norm = match reduce {
        Reduce::Mean => F::from(n).unwrap().recip(),
        Reduce::Sum => F::one(),
    };

    let mut loss = F::zero();
    let mut grad = logp.mapv(|v| v.exp());
    for (i, &y) in labels.iter().enumerate() {
        let y = y as usize;
        let w = weights.map(|w| w[i]).unwrap_or_else(F::one);
        loss = loss - w * logp[[i, y]];
        grad[[i, y]] = grad[[i, y]] - F::one();
        let scale = w * norm;
        grad.row_mut(i).mapv_inplace(|v| v * scale);
    }
    (loss * norm, grad)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nn::grad_check;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;

    // reference oracle: -log(exp(x_y) / sum exp(x_j)) averaged by hand
    fn oracle(logits: &Array2<f64>, labels: &[u32]) -> f64 {
        let mut total = 0.0;
        for (i, &y) in labels.iter().enumerate() {
            let row = logits.row(i);
            let denom: f64 = row.iter().map(|v| v.exp()).sum();
            total += -(row[y as usize].exp() / denom).ln();
        }
        total / labels.len() as f64
    }

    fn known_batch() -> (Array2<f64>, Vec<u32>) {
        let logits = arr2(&[
            [2.0, 1.0, 0.1],
            [0.5, 2.5, -1.0],
            [-0.3, 0.2, 0.9],
            [1.0, 1.0, 1.0],
        ]);
        (logits, vec![0, 1, 2, 0])
    }

    #[test]
    fn unweighted_matches_oracle() {
        let (logits, labels) = known_batch();
        let (loss, _) = cross_entropy(&logits, &labels, None, Reduce::Mean);
        assert!((loss - oracle(&logits, &labels)).abs() < 1e-12);
    }

    #[test]
    fn uniform_weights_scale_the_mean() {
        let (logits, labels) = known_batch();
        let (base, _) = cross_entropy(&logits, &labels, None, Reduce::Mean);
        let c = 3.5;
        let w = Array1::from_elem(labels.len(), c);
        let (scaled, _) = cross_entropy(&logits, &labels, Some(&w), Reduce::Mean);
        assert!((scaled - c * base).abs() < 1e-12);
    }

    #[test]
    fn sum_is_n_times_mean() {
        let (logits, labels) = known_batch();
        let (mean, _) = cross_entropy(&logits, &labels, None, Reduce::Mean);
        let (sum, _) = cross_entropy(&logits, &labels, None, Reduce::Sum);
        assert!((sum - mean * labels.len() as f64).abs() < 1e-12);
    }

    #[test]
    fn gradcheck_weighted_mean() {
        let n = 4;
        let k = 3;
        let labels = vec![0u32, 2, 1, 1];
        let w = arr1(&[0.3f64, 1.2, 0.0, 2.0]);
        let x0 = Array1::random(n * k, Normal::new(0.0, 1.0).unwrap());

        let f = {
            let labels = labels.clone();
            let w = w.clone();
            move |x: &Array1<f64>| {
                let logits = x.clone().into_shape((n, k)).unwrap();
                let (loss, _) = cross_entropy(&logits, &labels, Some(&w), Reduce::Mean);
                arr1(&[loss])
            }
        };
        // df is evaluated at x0, the same point grad_check perturbs around
        let df = {
            let x0 = x0.clone();
            move |grad: &Array1<f64>| {
                let logits = x0.clone().into_shape((n, k)).unwrap();
                let (_, dlogits) = cross_entropy(&logits, &labels, Some(&w), Reduce::Mean);
                dlogits.into_shape(n * k).unwrap() * grad[0]
            }
        };
        grad_check(x0, f, df, None, None, None).unwrap();
    }
}
