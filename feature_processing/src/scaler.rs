use log::{debug, info};
use market_data::{FEATURE_COLUMNS, FeatureTable, FeatureVector, NUM_FEATURES, Result, TradeError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Per-column min-max normalisation to `[0, 1]`.
///
/// Parameters are fixed once fitted; `transform` never updates them, so the
/// same scaling is applied at training and inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    data_min: Array1<f64>,
    data_max: Array1<f64>,
}

impl MinMaxScaler {
    /// Fit on training rows. A column whose max equals its min cannot be
    /// scaled and is reported as a data error.
    pub fn fit(table: &FeatureTable) -> Result<Self> {
        if table.is_empty() {
            return Err(TradeError::data("cannot fit scaler on an empty table"));
        }

        let rows = table.view();
        let data_min = rows.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
        let data_max = rows.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));

        let scaler = Self::from_params(data_min, data_max)?;
        info!("Fitted min-max scaler on {} rows", table.len());
        Ok(scaler)
    }

    pub fn from_params(data_min: Array1<f64>, data_max: Array1<f64>) -> Result<Self> {
        if data_min.len() != NUM_FEATURES || data_max.len() != NUM_FEATURES {
            return Err(TradeError::input(format!(
                "scaler needs {} min/max values, got {}/{}",
                NUM_FEATURES,
                data_min.len(),
                data_max.len()
            )));
        }

        for (idx, (lo, hi)) in data_min.iter().zip(data_max.iter()).enumerate() {
            if hi == lo {
                return Err(TradeError::data(format!(
                    "column '{}' has zero range (min == max == {})",
                    FEATURE_COLUMNS[idx], lo
                )));
            }
        }

        Ok(Self { data_min, data_max })
    }

    pub fn data_min(&self) -> ArrayView1<'_, f64> {
        self.data_min.view()
    }

    pub fn data_max(&self) -> ArrayView1<'_, f64> {
        self.data_max.view()
    }

    fn range(&self) -> Array1<f64> {
        &self.data_max - &self.data_min
    }

    pub fn transform(&self, table: &FeatureTable) -> Result<Array2<f64>> {
        self.transform_rows(table.view())
    }

    pub fn transform_rows(&self, rows: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check_width(rows.ncols())?;
        Ok((&rows - &self.data_min) / &self.range())
    }

    pub fn transform_vector(&self, vector: &FeatureVector) -> Result<Array1<f64>> {
        let raw = vector.to_ndarray();
        self.check_width(raw.len())?;
        Ok((&raw - &self.data_min) / &self.range())
    }

    pub fn inverse_transform(&self, scaled: ArrayView2<'_, f64>) -> Result<FeatureTable> {
        self.check_width(scaled.ncols())?;
        FeatureTable::from_array(&scaled * &self.range() + &self.data_min)
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width != self.data_min.len() {
            return Err(TradeError::input(format!(
                "scaler was fitted on {} columns, got {}",
                self.data_min.len(),
                width
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let encoded = bincode::serialize(self)?;
        fs::write(path.as_ref(), encoded)?;
        debug!("Saved scaler to {}", path.as_ref().display());
        Ok(())
    }

    /// Load previously fitted parameters, re-checking them as `from_params` does.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        let scaler: Self = bincode::deserialize(&data)?;
        Self::from_params(scaler.data_min, scaler.data_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    fn table(rows: usize) -> FeatureTable {
        let data = Array2::from_shape_fn((rows, NUM_FEATURES), |(r, c)| (r * (c + 1)) as f64 - 3.0);
        FeatureTable::from_array(data).unwrap()
    }

    #[test]
    fn test_fit_maps_training_data_into_unit_range() {
        let table = table(20);
        let scaler = MinMaxScaler::fit(&table).unwrap();
        let scaled = scaler.transform(&table).unwrap();

        assert!(scaled.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(scaled[[0, 0]], 0.0);
        assert_eq!(scaled[[19, 9]], 1.0);
    }

    #[test]
    fn test_constant_column_is_data_error() {
        let mut data = Array2::from_shape_fn((5, NUM_FEATURES), |(r, _)| r as f64);
        data.column_mut(8).fill(1_690_000_000.0);
        let table = FeatureTable::from_array(data).unwrap();

        let err = MinMaxScaler::fit(&table).unwrap_err();
        assert!(matches!(err, TradeError::Data(msg) if msg.contains("created_timestamp")));
    }

    #[test]
    fn test_empty_table_is_data_error() {
        let table = FeatureTable::from_vectors(&[]);
        assert!(matches!(MinMaxScaler::fit(&table), Err(TradeError::Data(_))));
    }

    #[test]
    fn test_transform_reuses_fitted_params() {
        let scaler = MinMaxScaler::fit(&table(11)).unwrap();
        let vector = FeatureVector {
            volume: 1000.0,
            ..Default::default()
        };

        let first = scaler.transform_vector(&vector).unwrap();
        let second = scaler.transform_vector(&vector).unwrap();
        assert_eq!(first, second);
        // Out-of-range values are not clipped.
        assert!(first[0] > 1.0);
    }

    #[test]
    fn test_width_mismatch_is_input_error() {
        let scaler = MinMaxScaler::fit(&table(3)).unwrap();
        let narrow = array![[1.0, 2.0]];
        assert!(matches!(
            scaler.transform_rows(narrow.view()),
            Err(TradeError::Input(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.bin");
        let scaler = MinMaxScaler::fit(&table(12)).unwrap();

        scaler.save(&path).unwrap();
        let loaded = MinMaxScaler::load(&path).unwrap();
        assert_eq!(scaler, loaded);
    }

    proptest! {
        #[test]
        fn prop_inverse_transform_round_trips(
            values in prop::collection::vec(-1.0e6f64..1.0e6, NUM_FEATURES * 12)
        ) {
            let data = Array2::from_shape_vec((12, NUM_FEATURES), values).unwrap();
            let table = FeatureTable::from_array(data.clone()).unwrap();
            // Random columns are constant with negligible probability; skip those.
            prop_assume!(MinMaxScaler::fit(&table).is_ok());

            let scaler = MinMaxScaler::fit(&table).unwrap();
            let scaled = scaler.transform(&table).unwrap();
            let restored = scaler.inverse_transform(scaled.view()).unwrap().into_inner();

            for (a, b) in data.iter().zip(restored.iter()) {
                prop_assert!((a - b).abs() <= 1e-6 * a.abs().max(1.0));
            }
        }
    }
}
