use log::debug;
use market_data::{FeatureTable, FeatureVector, LabeledDataset, Result};
use ndarray::{Array1, Array3, ArrayView1, ArrayView2, s};
use std::collections::VecDeque;

use crate::scaler::MinMaxScaler;

/// Time steps per model input sequence.
pub const WINDOW_SIZE: usize = 10;

/// Slice scaled rows into overlapping windows of `window` rows, stride 1.
///
/// Produces `n - window` windows (window `i` covers rows `[i, i + window)`),
/// so every window has a following row to take its label from. Tables with
/// `n <= window` rows produce no windows.
pub fn make_windows(scaled: ArrayView2<'_, f64>, window: usize) -> Array3<f64> {
    let count = scaled.nrows().saturating_sub(window);
    let mut windows = Array3::zeros((count, window, scaled.ncols()));

    for i in 0..count {
        windows
            .slice_mut(s![i, .., ..])
            .assign(&scaled.slice(s![i..i + window, ..]));
    }

    windows
}

/// Label for window `i` is the label of row `i + window`, the row right after it.
pub fn align_labels(labels: ArrayView1<'_, f64>, window: usize) -> Array1<f64> {
    if labels.len() <= window {
        return Array1::zeros(0);
    }
    labels.slice(s![window..]).to_owned()
}

/// Scale with an already fitted scaler, then window and align labels.
pub fn prepare_training(
    scaler: &MinMaxScaler,
    dataset: &LabeledDataset,
) -> Result<(Array3<f64>, Array1<f64>)> {
    let scaled = scaler.transform(dataset.table())?;
    let windows = make_windows(scaled.view(), WINDOW_SIZE);
    let labels = align_labels(dataset.labels(), WINDOW_SIZE);
    debug!(
        "Prepared {} windows from {} rows",
        windows.shape()[0],
        dataset.len()
    );
    Ok((windows, labels))
}

/// Rolling buffer over the most recent `WINDOW_SIZE` observations.
pub struct WindowedFeatureStream {
    data: VecDeque<FeatureVector>,
}

impl WindowedFeatureStream {
    pub fn init() -> Self {
        Self {
            data: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    pub fn insert(&mut self, data: FeatureVector) {
        if self.data.len() == WINDOW_SIZE {
            self.data.pop_front();
        }
        self.data.push_back(data);
    }

    pub fn extend(&mut self, series: impl IntoIterator<Item = FeatureVector>) {
        for vector in series {
            self.insert(vector);
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == WINDOW_SIZE
    }

    pub fn to_table(&self) -> FeatureTable {
        let rows: Vec<FeatureVector> = self.data.iter().copied().collect();
        FeatureTable::from_vectors(&rows)
    }
}

impl Default for WindowedFeatureStream {
    fn default() -> Self {
        Self::init()
    }
}
