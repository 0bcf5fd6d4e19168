pub mod processor;
pub mod scaler;

pub use processor::{WINDOW_SIZE, WindowedFeatureStream, align_labels, make_windows, prepare_training};
pub use scaler::MinMaxScaler;
