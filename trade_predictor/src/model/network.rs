use market_data::{Result, TradeError};
use ndarray::{Array1, ArrayView2, ArrayView3, ArrayViewD, ArrayViewMutD, array};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::dense::{Dense, DenseGradients, DenseTrace};
use super::lstm::{Lstm, LstmGradients, LstmTrace};
use super::{GradientSet, dropout_mask};

/// Model seam used by the inference engine.
pub trait SequenceClassifier {
    /// Feature count expected at every time step.
    fn input_size(&self) -> usize;

    /// Probability of the positive class for one `steps x features` window.
    fn predict_proba(&self, window: ArrayView2<'_, f64>) -> Result<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Units per stacked LSTM layer; all but the last return full sequences.
    pub lstm_units: Vec<usize>,
    /// Units per hidden dense layer between the LSTM stack and the output.
    pub dense_units: Vec<usize>,
    /// Dropout after every LSTM layer but the last and every hidden dense
    /// layer but the last.
    pub dropout: f64,
    pub activation: Activation,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            lstm_units: vec![128, 64, 32],
            dense_units: vec![64, 32],
            dropout: 0.2,
            activation: Activation::Relu,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lstm_units.is_empty() {
            return Err(TradeError::input("network needs at least one LSTM layer"));
        }
        if self.lstm_units.iter().chain(&self.dense_units).any(|u| *u == 0) {
            return Err(TradeError::input("layer sizes must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TradeError::input(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Stacked LSTM -> dense -> sigmoid binary classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequential {
    config: NetworkConfig,
    input_size: usize,
    recurrent: Vec<Lstm>,
    hidden: Vec<Dense>,
    output: Dense,
}

pub(crate) struct ForwardTrace {
    recurrent: Vec<LstmTrace>,
    recurrent_masks: Vec<Vec<Array1<f64>>>,
    hidden: Vec<DenseTrace>,
    hidden_masks: Vec<Option<Array1<f64>>>,
    output: DenseTrace,
    probability: f64,
}

impl ForwardTrace {
    pub(crate) fn probability(&self) -> f64 {
        self.probability
    }
}

#[derive(Debug, Clone)]
pub struct NetworkGradients {
    pub recurrent: Vec<LstmGradients>,
    pub hidden: Vec<DenseGradients>,
    pub output: DenseGradients,
}

impl Sequential {
    pub fn new<R: Rng + ?Sized>(
        config: NetworkConfig,
        input_size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        if input_size == 0 {
            return Err(TradeError::input("input size must be positive"));
        }

        let mut recurrent = Vec::with_capacity(config.lstm_units.len());
        let mut width = input_size;
        for &units in &config.lstm_units {
            recurrent.push(Lstm::new(width, units, config.activation, rng));
            width = units;
        }

        let mut hidden = Vec::with_capacity(config.dense_units.len());
        for &units in &config.dense_units {
            hidden.push(Dense::new(width, units, config.activation, rng));
            width = units;
        }

        let output = Dense::new(width, 1, Activation::Sigmoid, rng);

        Ok(Self {
            config,
            input_size,
            recurrent,
            hidden,
            output,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn parameter_count(&self) -> usize {
        self.zero_gradients().tensors().iter().map(|t| t.len()).sum()
    }

    /// Check that the layer shapes agree with the config, e.g. after loading.
    pub fn validate_shapes(&self) -> Result<()> {
        self.config.validate()?;

        let mut width = self.input_size;
        let recurrent_ok = self.recurrent.len() == self.config.lstm_units.len()
            && self
                .recurrent
                .iter()
                .zip(&self.config.lstm_units)
                .all(|(layer, &units)| {
                    let ok = layer.matches_shape(width, units);
                    width = units;
                    ok
                });

        let hidden_ok = self.hidden.len() == self.config.dense_units.len()
            && self
                .hidden
                .iter()
                .zip(&self.config.dense_units)
                .all(|(layer, &units)| {
                    let ok = layer.matches_shape(width, units);
                    width = units;
                    ok
                });

        if !recurrent_ok || !hidden_ok || !self.output.matches_shape(width, 1) {
            return Err(TradeError::data("model weights do not match its layer config"));
        }
        Ok(())
    }

    pub fn predict_batch(&self, windows: ArrayView3<'_, f64>) -> Result<Array1<f64>> {
        windows
            .outer_iter()
            .map(|window| self.predict_proba(window))
            .collect::<Result<Vec<_>>>()
            .map(Array1::from)
    }

    fn check_window(&self, window: &ArrayView2<'_, f64>) -> Result<()> {
        if window.nrows() == 0 {
            return Err(TradeError::input("window must contain at least one time step"));
        }
        if window.ncols() != self.input_size {
            return Err(TradeError::input(format!(
                "expected {} features per time step, got {}",
                self.input_size,
                window.ncols()
            )));
        }
        Ok(())
    }

    /// Forward pass over one window. Dropout is active only when `rng` is given.
    pub(crate) fn forward(
        &self,
        window: ArrayView2<'_, f64>,
        mut rng: Option<&mut StdRng>,
    ) -> ForwardTrace {
        let rate = self.config.dropout;
        let mut sequence: Vec<Array1<f64>> = window.outer_iter().map(|row| row.to_owned()).collect();

        let last_recurrent = self.recurrent.len() - 1;
        let mut recurrent = Vec::with_capacity(self.recurrent.len());
        let mut recurrent_masks = Vec::new();
        for (idx, layer) in self.recurrent.iter().enumerate() {
            let (outputs, trace) = layer.forward(&sequence);
            recurrent.push(trace);

            sequence = match rng.as_deref_mut() {
                Some(rng) if idx < last_recurrent && rate > 0.0 => {
                    let masks: Vec<Array1<f64>> = outputs
                        .iter()
                        .map(|_| dropout_mask(layer.units(), rate, rng))
                        .collect();
                    let dropped = outputs.into_iter().zip(&masks).map(|(h, m)| h * m).collect();
                    recurrent_masks.push(masks);
                    dropped
                }
                _ => {
                    if idx < last_recurrent {
                        recurrent_masks.push(Vec::new());
                    }
                    outputs
                }
            };
        }

        // Only the final step of the last LSTM layer feeds the dense stack.
        let mut activations = sequence.pop().unwrap_or_else(|| Array1::zeros(0));

        let last_hidden = self.hidden.len().saturating_sub(1);
        let mut hidden = Vec::with_capacity(self.hidden.len());
        let mut hidden_masks = Vec::with_capacity(self.hidden.len());
        for (idx, layer) in self.hidden.iter().enumerate() {
            let (output, trace) = layer.forward(&activations);
            hidden.push(trace);

            activations = match rng.as_deref_mut() {
                Some(rng) if idx < last_hidden && rate > 0.0 => {
                    let mask = dropout_mask(layer.units(), rate, rng);
                    let dropped = output * &mask;
                    hidden_masks.push(Some(mask));
                    dropped
                }
                _ => {
                    hidden_masks.push(None);
                    output
                }
            };
        }

        let (output, output_trace) = self.output.forward(&activations);

        ForwardTrace {
            recurrent,
            recurrent_masks,
            hidden,
            hidden_masks,
            output: output_trace,
            probability: output[0],
        }
    }

    /// Gradients of the binary cross-entropy for one traced window.
    pub(crate) fn backward(&self, trace: &ForwardTrace, label: f64) -> NetworkGradients {
        // Sigmoid + cross-entropy: d loss / d logit = p - y.
        let d_logit = array![trace.probability - label];
        let (mut d_activations, output) = self
            .output
            .backward_pre_activation(&trace.output, &d_logit);

        let mut hidden = Vec::with_capacity(self.hidden.len());
        for idx in (0..self.hidden.len()).rev() {
            if let Some(mask) = &trace.hidden_masks[idx] {
                d_activations = d_activations * mask;
            }
            let (d_input, grads) = self.hidden[idx].backward(&trace.hidden[idx], &d_activations);
            hidden.push(grads);
            d_activations = d_input;
        }
        hidden.reverse();

        let last_recurrent = self.recurrent.len() - 1;
        let steps = trace.recurrent[last_recurrent].len();
        let units = self.recurrent[last_recurrent].units();
        let mut d_sequence: Vec<Array1<f64>> = vec![Array1::zeros(units); steps];
        if let Some(last) = d_sequence.last_mut() {
            *last = d_activations;
        }

        let mut recurrent = Vec::with_capacity(self.recurrent.len());
        for idx in (0..self.recurrent.len()).rev() {
            if idx < last_recurrent {
                let masks = &trace.recurrent_masks[idx];
                if !masks.is_empty() {
                    d_sequence = d_sequence.into_iter().zip(masks).map(|(d, m)| d * m).collect();
                }
            }
            let (d_inputs, grads) = self.recurrent[idx].backward(&trace.recurrent[idx], &d_sequence);
            recurrent.push(grads);
            d_sequence = d_inputs;
        }
        recurrent.reverse();

        NetworkGradients {
            recurrent,
            hidden,
            output,
        }
    }

    pub(crate) fn zero_gradients(&self) -> NetworkGradients {
        NetworkGradients {
            recurrent: self.recurrent.iter().map(LstmGradients::zeros_like).collect(),
            hidden: self.hidden.iter().map(DenseGradients::zeros_like).collect(),
            output: DenseGradients::zeros_like(&self.output),
        }
    }

    /// Trainable tensors, in the same order as `NetworkGradients::tensors`.
    pub(crate) fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut params = Vec::new();
        for layer in &mut self.recurrent {
            params.extend(layer.parameters_mut());
        }
        for layer in &mut self.hidden {
            params.extend(layer.parameters_mut());
        }
        params.extend(self.output.parameters_mut());
        params
    }
}

impl SequenceClassifier for Sequential {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn predict_proba(&self, window: ArrayView2<'_, f64>) -> Result<f64> {
        self.check_window(&window)?;
        Ok(self.forward(window, None).probability)
    }
}

impl GradientSet for NetworkGradients {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f64>> {
        let mut tensors = Vec::new();
        for grads in &self.recurrent {
            tensors.extend(grads.tensors());
        }
        for grads in &self.hidden {
            tensors.extend(grads.tensors());
        }
        tensors.extend(self.output.tensors());
        tensors
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut tensors = Vec::new();
        for grads in &mut self.recurrent {
            tensors.extend(grads.tensors_mut());
        }
        for grads in &mut self.hidden {
            tensors.extend(grads.tensors_mut());
        }
        tensors.extend(self.output.tensors_mut());
        tensors
    }
}
