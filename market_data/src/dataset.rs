use log::info;
use ndarray::{Array1, Array2, ArrayView1, s};
use polars::prelude::*;
use std::path::Path;

use crate::error::{Result, TradeError};
use crate::features::{FEATURE_COLUMNS, FeatureTable, NUM_FEATURES};

pub const DEFAULT_LABEL_COLUMN: &str = "profitable";

/// Feature rows paired with a 0/1 profitability label per row.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    table: FeatureTable,
    labels: Array1<f64>,
}

impl LabeledDataset {
    pub fn new(table: FeatureTable, labels: Array1<f64>) -> Result<Self> {
        if table.len() != labels.len() {
            return Err(TradeError::input(format!(
                "dataset has {} rows but {} labels",
                table.len(),
                labels.len()
            )));
        }
        Ok(Self { table, labels })
    }

    pub fn from_csv(path: impl AsRef<Path>, label_column: &str) -> Result<Self> {
        let path = path.as_ref();
        let df = CsvReader::from_path(path)?.has_header(true).finish()?;
        info!("Loaded {} rows from {}", df.height(), path.display());
        Self::from_dataframe(&df, label_column)
    }

    /// All ten feature columns and the label column must be present.
    /// Null cells read as 0.
    pub fn from_dataframe(df: &DataFrame, label_column: &str) -> Result<Self> {
        let mut rows = Array2::zeros((df.height(), NUM_FEATURES));
        for (idx, name) in FEATURE_COLUMNS.iter().enumerate() {
            let values = numeric_column(df, name)?;
            rows.column_mut(idx).assign(&values);
        }

        let labels = numeric_column(df, label_column)?.mapv(|v| if v > 0.5 { 1.0 } else { 0.0 });

        Self::new(FeatureTable::from_array(rows)?, labels)
    }

    pub fn table(&self) -> &FeatureTable {
        &self.table
    }

    pub fn labels(&self) -> ArrayView1<'_, f64> {
        self.labels.view()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Split into (train, test) without shuffling; rows are a time series.
    pub fn split_chronological(&self, test_fraction: f64) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&test_fraction) {
            return Err(TradeError::input(format!(
                "test fraction must be in [0, 1), got {test_fraction}"
            )));
        }

        let split_at = (self.len() as f64 * (1.0 - test_fraction)).floor() as usize;
        let train = Self {
            table: self.table.slice(0..split_at),
            labels: self.labels.slice(s![..split_at]).to_owned(),
        };
        let test = Self {
            table: self.table.slice(split_at..self.len()),
            labels: self.labels.slice(s![split_at..]).to_owned(),
        };
        Ok((train, test))
    }
}

fn numeric_column(df: &DataFrame, name: &str) -> Result<Array1<f64>> {
    let column = df
        .column(name)
        .map_err(|_| TradeError::input(format!("dataset is missing required column '{name}'")))?;
    let values = column.cast(&DataType::Float64)?;
    let values = values.f64()?;
    Ok(values.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}
