use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD, s};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::{Activation, sigmoid};
use super::{GradientSet, add_outer, glorot_uniform};

/// LSTM layer returning its hidden state at every time step.
///
/// Gate blocks are stacked in `i, f, g, o` order inside `kernel`
/// (`4H x D`), `recurrent` (`4H x H`) and `bias` (`4H`). The recurrent
/// activation is always sigmoid; `activation` is used for the candidate
/// and the cell output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lstm {
    units: usize,
    activation: Activation,
    kernel: Array2<f64>,
    recurrent: Array2<f64>,
    bias: Array1<f64>,
}

#[derive(Debug, Clone)]
struct LstmStep {
    input: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    g_pre: Array1<f64>,
    c: Array1<f64>,
    c_act: Array1<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct LstmTrace {
    steps: Vec<LstmStep>,
}

impl LstmTrace {
    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }
}

#[derive(Debug, Clone)]
pub struct LstmGradients {
    pub kernel: Array2<f64>,
    pub recurrent: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Lstm {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        units: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let gates = 4 * units;
        let mut bias: Array1<f64> = Array1::zeros(gates);
        // Forget gate starts open.
        bias.slice_mut(s![units..2 * units]).fill(1.0);

        Self {
            units,
            activation,
            kernel: glorot_uniform((gates, input_size), input_size, gates, rng),
            recurrent: glorot_uniform((gates, units), units, gates, rng),
            bias,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn input_size(&self) -> usize {
        self.kernel.ncols()
    }

    fn step(&self, input: &Array1<f64>, h_prev: &Array1<f64>, c_prev: &Array1<f64>) -> LstmStep {
        let h = self.units;
        let act = self.activation;
        let z = self.kernel.dot(input) + self.recurrent.dot(h_prev) + &self.bias;

        let i = z.slice(s![0..h]).mapv(sigmoid);
        let f = z.slice(s![h..2 * h]).mapv(sigmoid);
        let g_pre = z.slice(s![2 * h..3 * h]).to_owned();
        let g = g_pre.mapv(|v| act.apply(v));
        let o = z.slice(s![3 * h..4 * h]).mapv(sigmoid);

        let c = &f * c_prev + &i * &g;
        let c_act = c.mapv(|v| act.apply(v));

        LstmStep {
            input: input.clone(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            g_pre,
            c,
            c_act,
        }
    }

    /// Run the whole sequence from zero state, returning every hidden state.
    pub(crate) fn forward(&self, inputs: &[Array1<f64>]) -> (Vec<Array1<f64>>, LstmTrace) {
        let mut h: Array1<f64> = Array1::zeros(self.units);
        let mut c: Array1<f64> = Array1::zeros(self.units);
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut steps = Vec::with_capacity(inputs.len());

        for input in inputs {
            let step = self.step(input, &h, &c);
            h = &step.o * &step.c_act;
            c = step.c.clone();
            outputs.push(h.clone());
            steps.push(step);
        }

        (outputs, LstmTrace { steps })
    }

    /// Back-propagation through time.
    ///
    /// `d_outputs[t]` is the loss gradient w.r.t. the hidden state emitted at
    /// step `t`. Returns the gradient w.r.t. each input step.
    pub(crate) fn backward(
        &self,
        trace: &LstmTrace,
        d_outputs: &[Array1<f64>],
    ) -> (Vec<Array1<f64>>, LstmGradients) {
        let h = self.units;
        let act = self.activation;
        let mut grads = LstmGradients::zeros_like(self);
        let mut d_inputs: Vec<Array1<f64>> = vec![Array1::zeros(self.input_size()); trace.steps.len()];
        let mut dh_next: Array1<f64> = Array1::zeros(h);
        let mut dc_next: Array1<f64> = Array1::zeros(h);

        for (t, step) in trace.steps.iter().enumerate().rev() {
            let dh = &d_outputs[t] + &dh_next;

            let dz_o = &dh * &step.c_act * &step.o.mapv(|v| v * (1.0 - v));
            let dc = &dh * &step.o * &step.c.mapv(|v| act.derivative(v)) + &dc_next;
            let dz_f = &dc * &step.c_prev * &step.f.mapv(|v| v * (1.0 - v));
            let dz_i = &dc * &step.g * &step.i.mapv(|v| v * (1.0 - v));
            let dz_g = &dc * &step.i * &step.g_pre.mapv(|v| act.derivative(v));

            let mut dz: Array1<f64> = Array1::zeros(4 * h);
            dz.slice_mut(s![0..h]).assign(&dz_i);
            dz.slice_mut(s![h..2 * h]).assign(&dz_f);
            dz.slice_mut(s![2 * h..3 * h]).assign(&dz_g);
            dz.slice_mut(s![3 * h..4 * h]).assign(&dz_o);

            add_outer(&mut grads.kernel, &dz, &step.input);
            add_outer(&mut grads.recurrent, &dz, &step.h_prev);
            grads.bias += &dz;

            d_inputs[t] = self.kernel.t().dot(&dz);
            dh_next = self.recurrent.t().dot(&dz);
            dc_next = &dc * &step.f;
        }

        (d_inputs, grads)
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        vec![
            self.kernel.view_mut().into_dyn(),
            self.recurrent.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }

    pub(crate) fn matches_shape(&self, input_size: usize, units: usize) -> bool {
        self.units == units
            && self.kernel.dim() == (4 * units, input_size)
            && self.recurrent.dim() == (4 * units, units)
            && self.bias.len() == 4 * units
    }
}

impl LstmGradients {
    pub fn zeros_like(layer: &Lstm) -> Self {
        Self {
            kernel: Array2::zeros(layer.kernel.raw_dim()),
            recurrent: Array2::zeros(layer.recurrent.raw_dim()),
            bias: Array1::zeros(layer.bias.raw_dim()),
        }
    }
}

impl GradientSet for LstmGradients {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f64>> {
        vec![
            self.kernel.view().into_dyn(),
            self.recurrent.view().into_dyn(),
            self.bias.view().into_dyn(),
        ]
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        vec![
            self.kernel.view_mut().into_dyn(),
            self.recurrent.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }
}
