use feature_processing::{MinMaxScaler, WindowedFeatureStream};
use log::{debug, info};
use market_data::{FeatureInput, FeatureVector, Result, TradeError};
use ndarray::Axis;
use std::fs;
use std::path::Path;

use crate::misc::{PredictionOutcome, PredictionResult};
use crate::model::{SequenceClassifier, Sequential};

pub const MODEL_FILE: &str = "trade_model.bin";
pub const SCALER_FILE: &str = "scaler.bin";
pub const HISTORY_FILE: &str = "history.csv";

/// A trained classifier together with the scaler fitted on its training data.
///
/// The scaler is never re-fitted here; every prediction uses the stored
/// parameters.
#[derive(Debug, Clone)]
pub struct InferenceEngine<M = Sequential> {
    model: M,
    scaler: MinMaxScaler,
}

impl<M: SequenceClassifier> InferenceEngine<M> {
    pub fn new(model: M, scaler: MinMaxScaler) -> Self {
        Self { model, scaler }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }

    /// Predict from one observation, fed to the model as a single time step.
    pub fn predict(&self, features: &FeatureVector) -> Result<PredictionResult> {
        let scaled = self.scaler.transform_vector(features)?;
        let window = scaled.insert_axis(Axis(0));
        let probability = self.model.predict_proba(window.view())?;
        debug!("Single-step prediction: p = {probability:.4}");
        Ok(PredictionResult::from_probability(probability))
    }

    /// Predict from a time series, using at most its last `WINDOW_SIZE` rows.
    pub fn predict_series(&self, series: &[FeatureVector]) -> Result<PredictionResult> {
        if series.is_empty() {
            return Err(TradeError::input("feature series is empty"));
        }

        let mut stream = WindowedFeatureStream::init();
        stream.extend(series.iter().copied());
        let scaled = self.scaler.transform(&stream.to_table())?;
        let probability = self.model.predict_proba(scaled.view())?;
        debug!(
            "Series prediction over {} of {} rows: p = {probability:.4}",
            stream.len(),
            series.len()
        );
        Ok(PredictionResult::from_probability(probability))
    }

    pub fn predict_input(&self, input: &FeatureInput) -> Result<PredictionResult> {
        match input {
            FeatureInput::Single(vector) => self.predict(vector),
            FeatureInput::Series(series) => self.predict_series(series),
        }
    }
}

impl InferenceEngine<Sequential> {
    /// Load both artifacts from `dir`. Fails before reading anything if
    /// either file is missing.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let model_path = dir.join(MODEL_FILE);
        let scaler_path = dir.join(SCALER_FILE);
        if !model_path.is_file() || !scaler_path.is_file() {
            return Err(TradeError::ModelUnavailable(dir.to_path_buf()));
        }

        let data = fs::read(&model_path)?;
        let model: Sequential = bincode::deserialize(&data)?;
        model.validate_shapes()?;
        let scaler = MinMaxScaler::load(&scaler_path)?;

        info!("Loaded model from {}", dir.display());
        Ok(Self::new(model, scaler))
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        fs::write(dir.join(MODEL_FILE), bincode::serialize(&self.model)?)?;
        self.scaler.save(dir.join(SCALER_FILE))?;

        info!("Saved model to {}", dir.display());
        Ok(())
    }
}

/// Parse a JSON feature payload, load the model from `model_dir` and predict.
///
/// Every failure is folded into `PredictionOutcome::Failed`.
pub fn predict_trade(model_dir: &Path, raw: &str) -> PredictionOutcome {
    let result = FeatureInput::from_json_str(raw).and_then(|input| {
        let engine = InferenceEngine::load(model_dir)?;
        engine.predict_input(&input)
    });
    PredictionOutcome::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_data::FeatureTable;
    use ndarray::{ArrayView2, array};

    /// Returns a fixed probability and records nothing.
    struct FixedProbability(f64);

    impl SequenceClassifier for FixedProbability {
        fn input_size(&self) -> usize {
            market_data::NUM_FEATURES
        }

        fn predict_proba(&self, window: ArrayView2<'_, f64>) -> Result<f64> {
            if window.nrows() == 0 || window.ncols() != self.input_size() {
                return Err(TradeError::input("bad window"));
            }
            Ok(self.0)
        }
    }

    /// Reports the number of time steps it was given.
    struct StepCounter;

    impl SequenceClassifier for StepCounter {
        fn input_size(&self) -> usize {
            market_data::NUM_FEATURES
        }

        fn predict_proba(&self, window: ArrayView2<'_, f64>) -> Result<f64> {
            Ok(window.nrows() as f64 / 100.0)
        }
    }

    fn scaler() -> MinMaxScaler {
        let table = FeatureTable::from_array(array![
            [0.0, 0.0, 0.0, 0.0, -1.0, -1.0, 0.0, 0.0, 1.6e9, 0.0],
            [1e4, 1e3, 1e2, 50.0, 1.0, 1.0, 1.0, 1e5, 1.8e9, 10.0],
        ])
        .unwrap();
        MinMaxScaler::fit(&table).unwrap()
    }

    #[test]
    fn test_predict_maps_probability() {
        let engine = InferenceEngine::new(FixedProbability(0.73), scaler());
        let raw = r#"{"volume": 1000, "liquidity": 500, "holder_count": 10, "tx_count": 5,
            "price_change_1m": 0.1, "price_change_5m": 0.2, "volatility": 0.05,
            "market_cap": 10000, "created_timestamp": 1690000000, "dev_activity": 2}"#;
        let features = FeatureVector::from_json_str(raw).unwrap();

        let result = engine.predict(&features).unwrap();
        assert!(result.profitable);
        assert!((result.confidence - 0.46).abs() < 1e-9);
        assert_eq!(result.probability, 0.73);
    }

    #[test]
    fn test_predict_does_not_refit_scaler() {
        let fitted = scaler();
        let engine = InferenceEngine::new(FixedProbability(0.2), fitted.clone());
        engine
            .predict(&FeatureVector::from_array([9e9; market_data::NUM_FEATURES]))
            .unwrap();
        assert_eq!(engine.scaler(), &fitted);
    }

    #[test]
    fn test_series_uses_last_window() {
        let engine = InferenceEngine::new(StepCounter, scaler());
        let series = vec![FeatureVector::default(); 25];
        let result = engine.predict_series(&series).unwrap();
        assert!((result.probability - 0.10).abs() < 1e-12);

        let result = engine.predict_series(&series[..3]).unwrap();
        assert!((result.probability - 0.03).abs() < 1e-12);

        assert!(matches!(engine.predict_series(&[]), Err(TradeError::Input(_))));
    }

    #[test]
    fn test_single_vector_is_one_step() {
        let engine = InferenceEngine::new(StepCounter, scaler());
        let result = engine
            .predict_input(&FeatureInput::Single(FeatureVector::default()))
            .unwrap();
        assert!((result.probability - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_load_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            InferenceEngine::load(dir.path()),
            Err(TradeError::ModelUnavailable(_))
        ));

        // One artifact alone is still unavailable.
        scaler().save(dir.path().join(SCALER_FILE)).unwrap();
        assert!(matches!(
            InferenceEngine::load(dir.path()),
            Err(TradeError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_corrupt_model_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        scaler().save(dir.path().join(SCALER_FILE)).unwrap();
        fs::write(dir.path().join(MODEL_FILE), b"not a model").unwrap();
        assert!(matches!(
            InferenceEngine::load(dir.path()),
            Err(TradeError::Serialization(_))
        ));
    }

    #[test]
    fn test_predict_trade_reports_failures() {
        let dir = tempfile::tempdir().unwrap();

        let outcome = predict_trade(dir.path(), "{not json");
        assert!(matches!(outcome, PredictionOutcome::Failed(ref f) if f.status == "failed"));

        let outcome = predict_trade(dir.path(), r#"{"volume": 1}"#);
        match outcome {
            PredictionOutcome::Failed(failed) => assert!(failed.error.contains("No trained model")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
