use ndarray::prelude::*;

use super::Float;

pub fn relu4(x: &Array4<f32>) -> (Array4<f32>, impl FnMut(&Array4<f32>) -> Array4<f32>) {
    let y = x.mapv(|v| v.max(0.0));
    let gate = x.mapv(|v| if v > 0.0 { 1.0f32 } else { 0.0 });
    let back_fn = move |grad: &Array4<f32>| grad * &gate;
    (y, back_fn)
}

pub fn relu2(x: &Array2<f32>) -> (Array2<f32>, impl FnMut(&Array2<f32>) -> Array2<f32>) {
    let y = x.mapv(|v| v.max(0.0));
    let gate = x.mapv(|v| if v > 0.0 { 1.0f32 } else { 0.0 });
    let back_fn = move |grad: &Array2<f32>| grad * &gate;
    (y, back_fn)
}

/// Row-wise log-softmax over the class axis, logits are [N, K].
pub fn log_softmax<F: Float>(x: &Array2<F>) -> Array2<F> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().cloned().fold(F::neg_infinity(), F::max);
        row.mapv_inplace(|v| v - max);
        let norm = row.iter().map(|v| v.exp()).fold(F::zero(), |a, b| a + b).ln();
        row.mapv_inplace(|v| v - norm);
    }
    out
}

pub fn softmax<F: Float>(x: &Array2<F>) -> Array2<F> {
    log_softmax(x).mapv(|v| v.exp())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn softmax_rows_normalize() {
        let x = arr2(&[[1.0f64, 2.0, 3.0], [-5.0, 0.0, 5.0]]);
        let p = softmax(&x);
        for row in p.rows() {
            let s: f64 = row.sum();
            assert!((s - 1.0).abs() < 1e-12);
            assert!(row.iter().all(|v| *v > 0.0));
        }
    }

    #[test]
    fn log_softmax_shift_invariant() {
        let x = arr2(&[[0.5f64, -1.0, 2.0]]);
        let shifted = &x + 100.0;
        assert!(super::super::isclose(&log_softmax(&x), &log_softmax(&shifted)));
    }

    #[test]
    fn relu_masks_gradient() {
        let x = arr2(&[[1.0f32, -1.0], [0.0, 2.0]]);
        let (y, mut back) = relu2(&x);
        assert_eq!(y, arr2(&[[1.0, 0.0], [0.0, 2.0]]));
        let g = back(&arr2(&[[3.0, 3.0], [3.0, 3.0]]));
        assert_eq!(g, arr2(&[[3.0, 0.0], [0.0, 3.0]]));
    }
}
