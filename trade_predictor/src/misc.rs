use market_data::Result;
use serde::{Deserialize, Serialize};

/// Model output mapped to a trading decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub profitable: bool,
    pub confidence: f64,
    pub probability: f64,
}

impl PredictionResult {
    /// `profitable` iff `p > 0.5`; confidence is the distance from 0.5 scaled to `[0, 1]`.
    pub fn from_probability(probability: f64) -> Self {
        Self {
            profitable: probability > 0.5,
            confidence: (probability - 0.5).abs() * 2.0,
            probability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPrediction {
    pub error: String,
    pub status: String,
}

impl FailedPrediction {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: "failed".to_string(),
        }
    }
}

/// What a prediction request reports back: the result or a failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionOutcome {
    Success(PredictionResult),
    Failed(FailedPrediction),
}

impl PredictionOutcome {
    pub fn failed(error: impl ToString) -> Self {
        PredictionOutcome::Failed(FailedPrediction::new(error.to_string()))
    }

    pub fn result(&self) -> Option<&PredictionResult> {
        match self {
            PredictionOutcome::Success(result) => Some(result),
            PredictionOutcome::Failed(_) => None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"error":"{}","status":"failed"}}"#, e.to_string().replace('"', "'"))
        })
    }
}

impl From<Result<PredictionResult>> for PredictionOutcome {
    fn from(result: Result<PredictionResult>) -> Self {
        match result {
            Ok(prediction) => PredictionOutcome::Success(prediction),
            Err(e) => PredictionOutcome::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_data::TradeError;
    use proptest::prelude::*;
    use serde_json::Value;

    #[test]
    fn test_boundaries() {
        let half = PredictionResult::from_probability(0.5);
        assert!(!half.profitable);
        assert_eq!(half.confidence, 0.0);

        assert_eq!(PredictionResult::from_probability(1.0).confidence, 1.0);
        assert_eq!(PredictionResult::from_probability(0.0).confidence, 1.0);
        assert!(!PredictionResult::from_probability(0.0).profitable);
    }

    #[test]
    fn test_success_json_shape() {
        let outcome = PredictionOutcome::Success(PredictionResult::from_probability(0.73));
        let json: Value = serde_json::from_str(&outcome.to_json()).unwrap();
        assert_eq!(json["profitable"], Value::Bool(true));
        assert!((json["confidence"].as_f64().unwrap() - 0.46).abs() < 1e-9);
        assert_eq!(json["probability"].as_f64(), Some(0.73));
        assert!(json.get("status").is_none());
    }

    #[test]
    fn test_failed_json_shape() {
        let outcome: PredictionOutcome = Err(TradeError::input("malformed JSON")).into();
        let json: Value = serde_json::from_str(&outcome.to_json()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "Invalid input: malformed JSON");
        assert!(outcome.result().is_none());
    }

    proptest! {
        #[test]
        fn prop_confidence_is_distance_from_half(p in 0.0f64..=1.0) {
            let result = PredictionResult::from_probability(p);
            prop_assert_eq!(result.confidence, (p - 0.5).abs() * 2.0);
            prop_assert!((0.0..=1.0).contains(&result.confidence));
            prop_assert_eq!(result.profitable, p > 0.5);
            prop_assert_eq!(result.probability, p);
        }
    }
}
