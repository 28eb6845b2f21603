use ndarray::prelude::*;
use ndarray::{Dimension, ScalarOperand};
use num_traits::FromPrimitive;

pub mod activations;
pub mod batchnorm;
pub mod conv;
pub mod init;
pub mod linear;
pub mod loss;
pub mod pool;

pub use activations::{log_softmax, relu2, relu4};
pub use loss::{cross_entropy, Reduce};

/// Scalar bound for the generic ops, the layers themselves are f32.
pub trait Float:
    num::Float + ScalarOperand + FromPrimitive + std::fmt::Display + std::fmt::Debug + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}

/// A learnable tensor with its gradient accumulator and SGD velocity buffer.
pub struct Param<D: Dimension> {
    pub w: Array<f32, D>,
    pub g: Array<f32, D>,
    pub v: Array<f32, D>,
}

impl<D: Dimension> Param<D> {
    pub fn new(w: Array<f32, D>) -> Param<D> {
        let g = Array::zeros(w.raw_dim());
        let v = Array::zeros(w.raw_dim());
        Param { w, g, v }
    }

    pub fn zero_grad(&mut self) {
        self.g.fill(0.0);
    }

    pub fn dim(&self) -> D {
        self.w.raw_dim()
    }
}

pub fn isclose<A: Float, D: Dimension>(a: &Array<A, D>, b: &Array<A, D>) -> bool {
    let rtol = A::from(1e-5).unwrap();
    let atol = A::from(1e-8).unwrap();
    for (i, j) in a.iter().zip(b.iter()) {
        if !(*i - *j).abs().le(&(atol + rtol * j.abs())) {
            return false;
        }
    }
    true
}

/// computes the jacobian with finite-difference approximation
/// where f: R^n -> R^m, the jacobian is R^nxm, out_len is m
fn compute_jacobian(
    mut input: Array1<f64>,
    f: impl Fn(&Array1<f64>) -> Array1<f64>,
    epsilon: f64,
    out_len: Option<usize>,
) -> Array2<f64> {
    // dy/dx = lim h->0 (f(x + h) - f(x - h)) / (2h)
    let d_eps = 2.0 * epsilon;

    let n = input.len();
    let m = if let Some(x) = out_len {
        x
    } else {
        f(&input).len()
    };

    let mut jac = Array2::<f64>::zeros((n, m));
    for i in 0..n {
        let old = input[i];
        input[i] = old + epsilon;
        let diff1 = f(&input);
        input[i] = old - epsilon;
        let diff2 = f(&input);

        jac.index_axis_mut(Axis(0), i)
            .iter_mut()
            .zip(diff1.iter())
            .zip(diff2.iter())
            .for_each(|((x, d1), d2)| {
                *x = (*d1 - *d2) / d_eps;
            });
        input[i] = old;
    }

    jac
}

/// Expect that both f and df are pure functions
/// f: R^n -> R^m
/// df: R^m -> R^n, where the argument is the gradient w.r.t. the image of f
/// grads are considered equal if the analytical gradient x, and perturbed gradient y
/// satisfies |x - y| <= atol + rtol * |y|
pub fn grad_check(
    input: Array1<f64>,
    f: impl Fn(&Array1<f64>) -> Array1<f64>,
    df: impl Fn(&Array1<f64>) -> Array1<f64>,
    epsilon: Option<f64>,
    atol: Option<f64>,
    rtol: Option<f64>,
) -> anyhow::Result<()> {
    let epsilon = epsilon.unwrap_or(1e-6);
    let atol = atol.unwrap_or(1e-5);
    let rtol = rtol.unwrap_or(0.001);

    let test_out = f(&input);
    let n = input.len();
    let m = test_out.len();
    let mut dy_dx = Array1::<f64>::zeros(m);
    let test_grad = df(&dy_dx);
    if test_grad.len() != n {
        return Err(anyhow::Error::msg(format!(
            "f maps R{n} to R{m}, but df maps R{m} to R{}",
            test_grad.len()
        )));
    }
    let jacobian = compute_jacobian(input, f, epsilon, Some(m));

    for i in 0..m {
        dy_dx[i] = 1.0;
        let grad = df(&dy_dx);
        let diff = jacobian.index_axis(Axis(1), i);
        for (x, y) in grad.iter().zip(diff.iter()) {
            if (x - y).abs() > atol + rtol * y.abs() {
                return Err(anyhow::Error::msg(format!(
                    "jacobian mismatch on column {i} \n numerical: \n {diff} \n analytical: \n {grad}"
                )));
            }
        }
        dy_dx[i] = 0.0;
    }

    Ok(())
}
