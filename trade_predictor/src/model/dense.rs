use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::{GradientSet, glorot_uniform};

/// Fully connected layer, `y = act(W x + b)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

#[derive(Debug, Clone)]
pub(crate) struct DenseTrace {
    input: Array1<f64>,
    pre_activation: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct DenseGradients {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        units: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        Self {
            weights: glorot_uniform((units, input_size), input_size, units, rng),
            bias: Array1::zeros(units),
            activation,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.ncols()
    }

    pub fn units(&self) -> usize {
        self.weights.nrows()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub(crate) fn forward(&self, input: &Array1<f64>) -> (Array1<f64>, DenseTrace) {
        let pre_activation = self.weights.dot(input) + &self.bias;
        let activation = self.activation;
        let output = pre_activation.mapv(|v| activation.apply(v));
        let trace = DenseTrace {
            input: input.clone(),
            pre_activation,
        };
        (output, trace)
    }

    /// Back-propagate `d_output` (gradient w.r.t. this layer's output).
    /// Returns the gradient w.r.t. the input.
    pub(crate) fn backward(
        &self,
        trace: &DenseTrace,
        d_output: &Array1<f64>,
    ) -> (Array1<f64>, DenseGradients) {
        let activation = self.activation;
        let dz = d_output * &trace.pre_activation.mapv(|v| activation.derivative(v));
        self.backward_pre_activation(trace, &dz)
    }

    /// Back-propagate a gradient already taken w.r.t. the pre-activation.
    pub(crate) fn backward_pre_activation(
        &self,
        trace: &DenseTrace,
        dz: &Array1<f64>,
    ) -> (Array1<f64>, DenseGradients) {
        let mut weights = Array2::zeros(self.weights.raw_dim());
        super::add_outer(&mut weights, dz, &trace.input);
        let d_input = self.weights.t().dot(dz);
        let grads = DenseGradients {
            weights,
            bias: dz.clone(),
        };
        (d_input, grads)
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        vec![
            self.weights.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }

    pub(crate) fn matches_shape(&self, input_size: usize, units: usize) -> bool {
        self.weights.dim() == (units, input_size) && self.bias.len() == units
    }
}

impl DenseGradients {
    pub fn zeros_like(layer: &Dense) -> Self {
        Self {
            weights: Array2::zeros(layer.weights.raw_dim()),
            bias: Array1::zeros(layer.bias.raw_dim()),
        }
    }
}

impl GradientSet for DenseGradients {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f64>> {
        vec![self.weights.view().into_dyn(), self.bias.view().into_dyn()]
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        vec![
            self.weights.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_dense_shapes() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = Dense::new(4, 3, Activation::Relu, &mut rng);
        let (output, trace) = layer.forward(&array![0.1, -0.2, 0.3, 0.4]);
        assert_eq!(output.len(), 3);
        assert!(output.iter().all(|v| *v >= 0.0));

        let (d_input, grads) = layer.backward(&trace, &array![1.0, 1.0, 1.0]);
        assert_eq!(d_input.len(), 4);
        assert_eq!(grads.weights.dim(), (3, 4));
    }
}
