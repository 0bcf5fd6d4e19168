//! Recurrent classifier built on `ndarray`.
//!
//! Stacked LSTM layers feed dense layers ending in a single sigmoid unit.
//! Training uses full back-propagation through time and Adam.

mod activation;
mod dense;
mod lstm;
pub mod metrics;
mod network;
mod optimizer;

pub use activation::Activation;
pub use dense::{Dense, DenseGradients};
pub use lstm::{Lstm, LstmGradients};
pub use network::{NetworkConfig, NetworkGradients, SequenceClassifier, Sequential};
pub use optimizer::Adam;

use ndarray::linalg::general_mat_mul;
use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use rand::distributions::Uniform;

/// Gradient containers exposing their tensors in parameter order.
pub trait GradientSet {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f64>>;

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>>;

    fn accumulate(&mut self, other: &Self)
    where
        Self: Sized,
    {
        for (mut mine, theirs) in self.tensors_mut().into_iter().zip(other.tensors()) {
            mine += &theirs;
        }
    }

    fn scale(&mut self, factor: f64) {
        for mut tensor in self.tensors_mut() {
            tensor *= factor;
        }
    }

    fn global_norm(&self) -> f64 {
        self.tensors()
            .iter()
            .map(|t| t.iter().map(|v| v * v).sum::<f64>())
            .sum::<f64>()
            .sqrt()
    }
}

/// Glorot/Xavier uniform initialisation.
pub(crate) fn glorot_uniform<R: Rng + ?Sized>(
    shape: (usize, usize),
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn(shape, |_| rng.sample(&dist))
}

/// `target += a ⊗ b`
pub(crate) fn add_outer(target: &mut Array2<f64>, a: &Array1<f64>, b: &Array1<f64>) {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    general_mat_mul(1.0, &col, &row, 1.0, target);
}

/// Inverted dropout mask: kept units are scaled by `1 / (1 - rate)`.
pub(crate) fn dropout_mask<R: Rng + ?Sized>(len: usize, rate: f64, rng: &mut R) -> Array1<f64> {
    let keep = 1.0 - rate;
    Array1::from_shape_fn(len, |_| {
        if rng.gen_bool(keep) { 1.0 / keep } else { 0.0 }
    })
}
