use feature_processing::{MinMaxScaler, WINDOW_SIZE, prepare_training};
use log::{debug, info};
use market_data::{LabeledDataset, Result, TradeError};
use ndarray::{ArrayView1, ArrayView3, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::InferenceEngine;
use crate::model::metrics::Evaluation;
use crate::model::{Adam, GradientSet, NetworkConfig, SequenceClassifier, Sequential};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of windows, taken from the end, held out for validation.
    pub validation_split: f64,
    pub learning_rate: f64,
    /// Global gradient norm cap; `0` disables clipping.
    pub clip_norm: f64,
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
            learning_rate: 0.001,
            clip_norm: 1.0,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(TradeError::input("epochs must be positive"));
        }
        if self.batch_size == 0 {
            return Err(TradeError::input("batch_size must be positive"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(TradeError::input(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TradeError::input("learning_rate must be positive"));
        }
        if !(self.clip_norm.is_finite() && self.clip_norm >= 0.0) {
            return Err(TradeError::input("clip_norm must be non-negative"));
        }
        Ok(())
    }
}

/// Metrics for one epoch. Validation columns are empty when nothing was held out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub auc: Option<f64>,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    pub val_auc: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn epochs(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        for metrics in &self.epochs {
            writer.serialize(metrics)?;
        }
        writer.flush()?;
        debug!("Wrote training history to {}", path.as_ref().display());
        Ok(())
    }
}

/// Output of a training run.
pub struct TrainingRun {
    pub engine: InferenceEngine,
    pub history: TrainingHistory,
}

pub struct Trainer {
    network: NetworkConfig,
    training: TrainingConfig,
}

impl Trainer {
    pub fn new(network: NetworkConfig, training: TrainingConfig) -> Self {
        Self { network, training }
    }

    /// Fit the scaler and the network on `dataset`.
    pub fn fit(&self, dataset: &LabeledDataset) -> Result<TrainingRun> {
        self.network.validate()?;
        self.training.validate()?;

        let scaler = MinMaxScaler::fit(dataset.table())?;
        let (windows, labels) = prepare_training(&scaler, dataset)?;
        if windows.len_of(Axis(0)) == 0 {
            return Err(TradeError::data(format!(
                "need more than {WINDOW_SIZE} rows to train, got {}",
                dataset.len()
            )));
        }

        let mut rng = match self.training.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut model = Sequential::new(self.network.clone(), windows.len_of(Axis(2)), &mut rng)?;
        info!(
            "Training on {} windows ({} parameters)",
            windows.len_of(Axis(0)),
            model.parameter_count()
        );
        let history = self.fit_network(&mut model, windows.view(), labels.view(), &mut rng);

        Ok(TrainingRun {
            engine: InferenceEngine::new(model, scaler),
            history,
        })
    }

    fn fit_network(
        &self,
        model: &mut Sequential,
        windows: ArrayView3<'_, f64>,
        labels: ArrayView1<'_, f64>,
        rng: &mut StdRng,
    ) -> TrainingHistory {
        let total = windows.len_of(Axis(0));
        let held_out = ((total as f64 * self.training.validation_split).floor() as usize).min(total - 1);
        let split = total - held_out;

        let mut order: Vec<usize> = (0..split).collect();
        let mut optimizer = Adam::new(self.training.learning_rate);
        let mut history = TrainingHistory::default();

        for epoch in 1..=self.training.epochs {
            order.shuffle(rng);

            let mut probabilities = Vec::with_capacity(split);
            let mut targets = Vec::with_capacity(split);
            for batch in order.chunks(self.training.batch_size) {
                let mut grads = model.zero_gradients();
                for &idx in batch {
                    let label = labels[idx];
                    let trace = model.forward(windows.index_axis(Axis(0), idx), Some(&mut *rng));
                    grads.accumulate(&model.backward(&trace, label));
                    probabilities.push(trace.probability());
                    targets.push(label);
                }

                grads.scale(1.0 / batch.len() as f64);
                let clip = self.training.clip_norm;
                if clip > 0.0 {
                    let norm = grads.global_norm();
                    if norm > clip {
                        grads.scale(clip / norm);
                    }
                }
                optimizer.step(model.parameters_mut(), grads.tensors());
            }

            let train = Evaluation::compute(&probabilities, &targets);
            let validation = (held_out > 0).then(|| {
                let probabilities: Vec<f64> = (split..total)
                    .map(|idx| model.forward(windows.index_axis(Axis(0), idx), None).probability())
                    .collect();
                let targets: Vec<f64> = labels.slice(ndarray::s![split..]).to_vec();
                Evaluation::compute(&probabilities, &targets)
            });

            let metrics = EpochMetrics {
                epoch,
                loss: train.loss,
                accuracy: train.accuracy,
                auc: train.auc,
                val_loss: validation.map(|v| v.loss),
                val_accuracy: validation.map(|v| v.accuracy),
                val_auc: validation.and_then(|v| v.auc),
            };
            info!("{}", format_epoch(&metrics, self.training.epochs));
            history.push(metrics);
        }

        history
    }

    /// Score a held-out dataset with the engine's fitted scaler.
    pub fn evaluate<M: SequenceClassifier>(
        engine: &InferenceEngine<M>,
        dataset: &LabeledDataset,
    ) -> Result<Evaluation> {
        let (windows, labels) = prepare_training(engine.scaler(), dataset)?;
        if windows.len_of(Axis(0)) == 0 {
            return Err(TradeError::data(format!(
                "need more than {WINDOW_SIZE} rows to evaluate, got {}",
                dataset.len()
            )));
        }

        let probabilities = windows
            .outer_iter()
            .map(|window| engine.model().predict_proba(window))
            .collect::<Result<Vec<_>>>()?;
        Ok(Evaluation::compute(&probabilities, &labels.to_vec()))
    }
}

fn format_epoch(metrics: &EpochMetrics, epochs: usize) -> String {
    let mut line = format!(
        "Epoch {}/{} - loss: {:.4} - accuracy: {:.4}",
        metrics.epoch, epochs, metrics.loss, metrics.accuracy
    );
    if let Some(auc) = metrics.auc {
        line.push_str(&format!(" - auc: {auc:.4}"));
    }
    if let (Some(loss), Some(accuracy)) = (metrics.val_loss, metrics.val_accuracy) {
        line.push_str(&format!(" - val_loss: {loss:.4} - val_accuracy: {accuracy:.4}"));
    }
    if let Some(auc) = metrics.val_auc {
        line.push_str(&format!(" - val_auc: {auc:.4}"));
    }
    line
}
