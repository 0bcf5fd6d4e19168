use ndarray::{Array1, Array2, ArrayView2, s};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Range;

use crate::error::{Result, TradeError};

pub const NUM_FEATURES: usize = 10;

/// Column order shared by training, scaling, the model input and the CLI.
pub const FEATURE_COLUMNS: [&str; NUM_FEATURES] = [
    "volume",
    "liquidity",
    "holder_count",
    "tx_count",
    "price_change_1m",
    "price_change_5m",
    "volatility",
    "market_cap",
    "created_timestamp",
    "dev_activity",
];

/// One observation of a token's market state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub volume: f64,
    pub liquidity: f64,
    pub holder_count: f64,
    pub tx_count: f64,
    pub price_change_1m: f64,
    pub price_change_5m: f64,
    pub volatility: f64,
    pub market_cap: f64,
    pub created_timestamp: f64,
    pub dev_activity: f64,
}

impl FeatureVector {
    pub fn from_array(values: [f64; NUM_FEATURES]) -> Self {
        let [
            volume,
            liquidity,
            holder_count,
            tx_count,
            price_change_1m,
            price_change_5m,
            volatility,
            market_cap,
            created_timestamp,
            dev_activity,
        ] = values;

        Self {
            volume,
            liquidity,
            holder_count,
            tx_count,
            price_change_1m,
            price_change_5m,
            volatility,
            market_cap,
            created_timestamp,
            dev_activity,
        }
    }

    /// Values in `FEATURE_COLUMNS` order.
    pub fn to_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.volume,
            self.liquidity,
            self.holder_count,
            self.tx_count,
            self.price_change_1m,
            self.price_change_5m,
            self.volatility,
            self.market_cap,
            self.created_timestamp,
            self.dev_activity,
        ]
    }

    pub fn to_ndarray(&self) -> Array1<f64> {
        Array1::from(self.to_array().to_vec())
    }

    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let values: [f64; NUM_FEATURES] = values.try_into().map_err(|_| {
            TradeError::input(format!(
                "expected {} features, got {}",
                NUM_FEATURES,
                values.len()
            ))
        })?;
        Ok(Self::from_array(values))
    }

    /// Build from a JSON object keyed by feature name.
    ///
    /// Missing keys default to 0 and unknown keys are ignored.
    pub fn from_json_map(map: &Map<String, Value>) -> Result<Self> {
        let mut values = [0.0; NUM_FEATURES];
        for (slot, key) in values.iter_mut().zip(FEATURE_COLUMNS) {
            if let Some(value) = map.get(key) {
                *slot = numeric_value(key, value)?;
            }
        }
        Ok(Self::from_array(values))
    }

    pub fn from_json_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_json_map(map),
            other => Err(TradeError::input(format!(
                "expected a JSON object of features, got {}",
                json_type(other)
            ))),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value = parse_json(raw)?;
        Self::from_json_value(&value)
    }
}

/// Features as submitted for prediction: one observation or a time series.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureInput {
    Single(FeatureVector),
    Series(Vec<FeatureVector>),
}

impl FeatureInput {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        match parse_json(raw)? {
            Value::Array(items) => {
                let series = items
                    .iter()
                    .map(FeatureVector::from_json_value)
                    .collect::<Result<Vec<_>>>()?;
                Ok(FeatureInput::Series(series))
            }
            value => FeatureVector::from_json_value(&value).map(FeatureInput::Single),
        }
    }
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| TradeError::input(format!("malformed JSON: {e}")))
}

fn numeric_value(key: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| TradeError::input(format!("feature '{key}' is not representable as f64"))),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(TradeError::input(format!(
            "feature '{key}' must be numeric, got {}",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Time-ordered rows of features for one token, `N x NUM_FEATURES`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    rows: Array2<f64>,
}

impl FeatureTable {
    pub fn from_array(rows: Array2<f64>) -> Result<Self> {
        if rows.ncols() != NUM_FEATURES {
            return Err(TradeError::input(format!(
                "expected {} feature columns, got {}",
                NUM_FEATURES,
                rows.ncols()
            )));
        }
        Ok(Self { rows })
    }

    pub fn from_vectors(vectors: &[FeatureVector]) -> Self {
        let mut rows = Array2::zeros((vectors.len(), NUM_FEATURES));
        for (mut row, vector) in rows.rows_mut().into_iter().zip(vectors) {
            row.assign(&Array1::from(vector.to_array().to_vec()));
        }
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.rows.view()
    }

    pub fn row(&self, index: usize) -> Option<FeatureVector> {
        if index >= self.len() {
            return None;
        }
        let row = self.rows.row(index);
        // Rows always hold NUM_FEATURES values.
        FeatureVector::from_slice(&row.to_vec()).ok()
    }

    /// Copy of the rows in `range`, clamped to the table length.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        Self {
            rows: self.rows.slice(s![start..end, ..]).to_owned(),
        }
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_missing_keys_default_to_zero() {
        let vector = FeatureVector::from_json_str(r#"{"volume": 1000, "tx_count": 5}"#).unwrap();
        assert_eq!(vector.volume, 1000.0);
        assert_eq!(vector.tx_count, 5.0);
        assert_eq!(vector.liquidity, 0.0);
        assert_eq!(vector.dev_activity, 0.0);
    }

    #[test]
    fn test_values_follow_column_order() {
        let mut map = Map::new();
        for (i, key) in FEATURE_COLUMNS.iter().enumerate() {
            map.insert(key.to_string(), json!(i));
        }
        let vector = FeatureVector::from_json_map(&map).unwrap();
        let expected: Vec<f64> = (0..NUM_FEATURES).map(|i| i as f64).collect();
        assert_eq!(vector.to_array().to_vec(), expected);
    }

    #[test]
    fn test_non_numeric_value_is_input_error() {
        let err = FeatureVector::from_json_str(r#"{"volume": "lots"}"#).unwrap_err();
        assert!(matches!(err, TradeError::Input(msg) if msg.contains("volume")));

        let err = FeatureVector::from_json_str(r#"{"liquidity": null}"#).unwrap_err();
        assert!(matches!(err, TradeError::Input(_)));
    }

    #[test]
    fn test_booleans_count_as_numeric() {
        let vector = FeatureVector::from_json_str(r#"{"dev_activity": true}"#).unwrap();
        assert_eq!(vector.dev_activity, 1.0);
    }

    #[test]
    fn test_rejects_malformed_and_non_object_json() {
        assert!(matches!(
            FeatureVector::from_json_str("{not json"),
            Err(TradeError::Input(_))
        ));
        assert!(matches!(
            FeatureVector::from_json_str("[1, 2, 3]"),
            Err(TradeError::Input(_))
        ));
    }

    #[test]
    fn test_feature_input_series() {
        let input = FeatureInput::from_json_str(r#"[{"volume": 1}, {"volume": 2}]"#).unwrap();
        match input {
            FeatureInput::Series(series) => {
                assert_eq!(series.len(), 2);
                assert_eq!(series[1].volume, 2.0);
            }
            other => panic!("expected series, got {other:?}"),
        }

        let input = FeatureInput::from_json_str(r#"{"volume": 1}"#).unwrap();
        assert!(matches!(input, FeatureInput::Single(_)));
    }

    #[test]
    fn test_from_slice_checks_feature_count() {
        assert!(FeatureVector::from_slice(&[1.0; 9]).is_err());
        assert!(FeatureVector::from_slice(&[1.0; NUM_FEATURES]).is_ok());
    }

    #[test]
    fn test_table_shape_and_rows() {
        let vectors: Vec<FeatureVector> = (0..4)
            .map(|i| FeatureVector {
                volume: i as f64,
                ..Default::default()
            })
            .collect();
        let table = FeatureTable::from_vectors(&vectors);
        assert_eq!(table.len(), 4);
        assert_eq!(table.row(2).unwrap().volume, 2.0);
        assert!(table.row(4).is_none());
        assert_eq!(table.slice(1..10).len(), 3);

        assert!(FeatureTable::from_array(Array2::zeros((3, 4))).is_err());
    }

    proptest! {
        #[test]
        fn prop_array_round_trip(values in prop::array::uniform10(-1.0e9f64..1.0e9)) {
            let vector = FeatureVector::from_array(values);
            prop_assert_eq!(vector.to_array(), values);
            prop_assert_eq!(FeatureVector::from_slice(&values).unwrap(), vector);
        }

        #[test]
        fn prop_absent_keys_read_as_zero(
            values in prop::array::uniform10(-1.0e6f64..1.0e6),
            present in prop::array::uniform10(any::<bool>()),
        ) {
            let mut map = Map::new();
            for ((key, value), keep) in FEATURE_COLUMNS.iter().zip(values).zip(present) {
                if keep {
                    map.insert(key.to_string(), json!(value));
                }
            }

            let vector = FeatureVector::from_json_map(&map).unwrap();
            for ((got, value), keep) in vector.to_array().into_iter().zip(values).zip(present) {
                prop_assert_eq!(got, if keep { value } else { 0.0 });
            }
        }
    }
}
