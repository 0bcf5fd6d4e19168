pub mod dataset;
pub mod error;
pub mod features;
pub mod logger;

pub use dataset::{DEFAULT_LABEL_COLUMN, LabeledDataset};
pub use error::{Result, TradeError};
pub use features::{FEATURE_COLUMNS, FeatureInput, FeatureTable, FeatureVector, NUM_FEATURES};
