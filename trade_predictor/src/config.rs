use config::{Config, ConfigError, Environment, File, FileFormat};
use market_data::DEFAULT_LABEL_COLUMN;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::model::NetworkConfig;
use crate::suggestion::SuggestionConfig;
use crate::trainer::TrainingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "trade_predictor.toml";
pub const ENV_PREFIX: &str = "TRADE_PREDICTOR";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub model_dir: PathBuf,
    pub label_column: String,
    /// Trailing fraction of a dataset held out for evaluation after training.
    pub test_fraction: f64,
    pub network: NetworkConfig,
    pub training: TrainingConfig,
    pub suggestion: SuggestionConfig,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./ml/models"),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            test_fraction: 0.2,
            network: NetworkConfig::default(),
            training: TrainingConfig::default(),
            suggestion: SuggestionConfig::default(),
        }
    }
}

impl PredictorConfig {
    /// Defaults, overlaid by the TOML file at `path` if present, then by
    /// `TRADE_PREDICTOR_*` environment variables (`__` separates sections).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("network.lstm_units")
                    .with_list_parse_key("network.dense_units"),
            )
            .build()?;

        let config: Self = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(ConfigError::Message(format!(
                "test_fraction must be in [0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.label_column.is_empty() {
            return Err(ConfigError::Message("label_column must not be empty".to_string()));
        }
        self.network
            .validate()
            .and_then(|_| self.training.validate())
            .and_then(|_| self.suggestion.validate())
            .map_err(|e| ConfigError::Message(e.to_string()))
    }
}
