pub mod config;
pub mod engine;
pub mod misc;
pub mod model;
pub mod suggestion;
pub mod trainer;

pub use config::PredictorConfig;
pub use engine::{HISTORY_FILE, InferenceEngine, MODEL_FILE, SCALER_FILE, predict_trade};
pub use misc::{FailedPrediction, PredictionOutcome, PredictionResult};
pub use suggestion::{
    SUGGESTIONS_FILE, SuggestionBook, SuggestionOutcome, TokenInfo, TradeSuggestion,
};
pub use trainer::{Trainer, TrainingConfig, TrainingHistory, TrainingRun};
