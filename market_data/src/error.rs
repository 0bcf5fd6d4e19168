use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradeError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("No trained model found at {}", .0.display())]
    ModelUnavailable(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Dataset error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl TradeError {
    pub fn input(msg: impl Into<String>) -> Self {
        TradeError::Input(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        TradeError::Data(msg.into())
    }
}

pub type Result<T, E = TradeError> = std::result::Result<T, E>;
