//! Trade suggestions derived from model predictions, with a small
//! accept / reject lifecycle and a capped history.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use market_data::{FeatureVector, Result, TradeError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::misc::PredictionOutcome;

/// File name of a persisted book inside the model directory.
pub const SUGGESTIONS_FILE: &str = "suggestions.json";

const FALLBACK_CONFIDENCE: f64 = 0.3;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    /// Predictions below this confidence produce no suggestion.
    pub min_confidence: f64,
    /// Base trade size; scaled by confidence and capped at 1.5x.
    pub sniper_amount: f64,
    pub ttl_secs: i64,
    pub max_history: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            sniper_amount: 0.1,
            ttl_secs: 300,
            max_history: 100,
        }
    }
}

impl SuggestionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(TradeError::input("min_confidence must be in [0, 1]"));
        }
        if !(self.sniper_amount.is_finite() && self.sniper_amount >= 0.0) {
            return Err(TradeError::input("sniper_amount must be non-negative"));
        }
        if self.ttl_secs <= 0 {
            return Err(TradeError::input("ttl_secs must be positive"));
        }
        if self.max_history == 0 {
            return Err(TradeError::input("max_history must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenIdentity {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
}

/// A token submitted for a suggestion: identity plus its market features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenInfo {
    pub identity: TokenIdentity,
    pub features: FeatureVector,
}

impl TokenInfo {
    /// Parse a token object. `holders` is accepted in place of `holder_count`.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| TradeError::input(format!("malformed JSON: {e}")))?;
        let Value::Object(mut map) = value else {
            return Err(TradeError::input("token must be a JSON object"));
        };

        if !map.contains_key("holder_count") {
            if let Some(holders) = map.get("holders").cloned() {
                map.insert("holder_count".to_string(), holders);
            }
        }

        let features = FeatureVector::from_json_map(&map)?;
        let identity = serde_json::from_value(Value::Object(map))
            .map_err(|e| TradeError::input(format!("invalid token identity: {e}")))?;
        Ok(Self { identity, features })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Accepted => "accepted",
            SuggestionStatus::Rejected => "rejected",
            SuggestionStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub volume: f64,
    pub liquidity: f64,
    pub holders: f64,
    pub volatility: f64,
}

impl From<&FeatureVector> for TokenMetrics {
    fn from(features: &FeatureVector) -> Self {
        Self {
            volume: features.volume,
            liquidity: features.liquidity,
            holders: features.holder_count,
            volatility: features.volatility,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSuggestion {
    pub id: String,
    pub token: TokenIdentity,
    pub action: TradeAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    pub reasoning: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TokenMetrics>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SuggestionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl TradeSuggestion {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SuggestionOutcome {
    Suggested {
        suggestion: TradeSuggestion,
    },
    LowConfidence {
        reason: String,
        confidence: f64,
    },
    /// Prediction failed; carries a conservative `HOLD` that is not stored.
    Fallback {
        error: String,
        suggestion: TradeSuggestion,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SuggestionError {
    #[error("Suggestion {0} not found")]
    NotFound(String),

    #[error("Suggestion already {0}")]
    AlreadyResolved(SuggestionStatus),

    #[error("Suggestion {0} has expired")]
    Expired(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestionStatistics {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub pending: usize,
    /// Percentage of all suggestions that were accepted.
    pub acceptance_rate: f64,
    pub average_confidence: f64,
}

/// In-memory store of generated suggestions, oldest first.
pub struct SuggestionBook {
    config: SuggestionConfig,
    suggestions: VecDeque<TradeSuggestion>,
}

impl SuggestionBook {
    pub fn new(config: SuggestionConfig) -> Self {
        Self {
            suggestions: VecDeque::with_capacity(config.max_history),
            config,
        }
    }

    /// Restore a book written by `save`. A missing file gives an empty book;
    /// only the newest `max_history` entries are kept.
    pub fn load(config: SuggestionConfig, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut book = Self::new(config);
        if !path.is_file() {
            return Ok(book);
        }

        let data = fs::read(path)?;
        let stored: Vec<TradeSuggestion> = serde_json::from_slice(&data)?;
        let skip = stored.len().saturating_sub(book.config.max_history);
        book.suggestions.extend(stored.into_iter().skip(skip));
        debug!(
            "Loaded {} suggestions from {}",
            book.suggestions.len(),
            path.display()
        );
        Ok(book)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&self.suggestions)?)?;
        debug!("Saved {} suggestions to {}", self.suggestions.len(), path.display());
        Ok(())
    }

    pub fn config(&self) -> &SuggestionConfig {
        &self.config
    }

    pub fn generate(
        &mut self,
        token: &TokenInfo,
        prediction: &PredictionOutcome,
        now: DateTime<Utc>,
    ) -> SuggestionOutcome {
        info!("Generating trade suggestion for {}", token.identity.symbol);

        let result = match prediction {
            PredictionOutcome::Success(result) => result,
            PredictionOutcome::Failed(failed) => {
                warn!(
                    "Prediction failed for {}, holding: {}",
                    token.identity.symbol, failed.error
                );
                return SuggestionOutcome::Fallback {
                    error: failed.error.clone(),
                    suggestion: self.conservative(token, now),
                };
            }
        };

        if result.confidence < self.config.min_confidence {
            debug!(
                "Low confidence for {}: {:.3}",
                token.identity.symbol, result.confidence
            );
            return SuggestionOutcome::LowConfidence {
                reason: "Low confidence prediction".to_string(),
                confidence: result.confidence,
            };
        }

        let base = self.config.sniper_amount;
        let suggestion = TradeSuggestion {
            id: suggestion_id(now),
            token: token.identity.clone(),
            action: TradeAction::Buy,
            amount: Some((base * result.confidence).min(base * 1.5)),
            confidence: result.confidence,
            probability: Some(result.probability),
            reasoning: reasoning(&token.features, result.probability),
            metrics: Some(TokenMetrics::from(&token.features)),
            created_at: now,
            expires_at: Some(now + Duration::seconds(self.config.ttl_secs)),
            status: SuggestionStatus::Pending,
            accepted_at: None,
            rejected_at: None,
            rejection_reason: None,
        };

        if self.suggestions.len() == self.config.max_history {
            self.suggestions.pop_front();
        }
        self.suggestions.push_back(suggestion.clone());

        info!(
            "Trade suggestion {} for {} at {:.2} confidence",
            suggestion.id, suggestion.token.symbol, suggestion.confidence
        );
        SuggestionOutcome::Suggested { suggestion }
    }

    fn conservative(&self, token: &TokenInfo, now: DateTime<Utc>) -> TradeSuggestion {
        TradeSuggestion {
            id: suggestion_id(now),
            token: token.identity.clone(),
            action: TradeAction::Hold,
            amount: None,
            confidence: FALLBACK_CONFIDENCE,
            probability: None,
            reasoning: vec!["ML model unavailable - conservative approach".to_string()],
            metrics: None,
            created_at: now,
            expires_at: None,
            status: SuggestionStatus::Pending,
            accepted_at: None,
            rejected_at: None,
            rejection_reason: None,
        }
    }

    pub fn accept(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<&TradeSuggestion, SuggestionError> {
        let suggestion = self
            .find_mut(id)
            .ok_or_else(|| SuggestionError::NotFound(id.to_string()))?;

        if suggestion.status != SuggestionStatus::Pending {
            return Err(SuggestionError::AlreadyResolved(suggestion.status));
        }
        if suggestion.is_expired(now) {
            suggestion.status = SuggestionStatus::Expired;
            return Err(SuggestionError::Expired(id.to_string()));
        }

        suggestion.status = SuggestionStatus::Accepted;
        suggestion.accepted_at = Some(now);
        info!(
            "Trade suggestion {} accepted: {} on {}",
            id,
            suggestion.amount.unwrap_or_default(),
            suggestion.token.symbol
        );
        Ok(suggestion)
    }

    pub fn reject(
        &mut self,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&TradeSuggestion, SuggestionError> {
        let suggestion = self
            .find_mut(id)
            .ok_or_else(|| SuggestionError::NotFound(id.to_string()))?;

        suggestion.status = SuggestionStatus::Rejected;
        suggestion.rejected_at = Some(now);
        suggestion.rejection_reason = reason;
        info!("Trade suggestion {} rejected", id);
        Ok(suggestion)
    }

    pub fn get(&self, id: &str) -> Option<&TradeSuggestion> {
        self.suggestions.iter().find(|s| s.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut TradeSuggestion> {
        self.suggestions.iter_mut().find(|s| s.id == id)
    }

    pub fn pending(&self, now: DateTime<Utc>) -> Vec<&TradeSuggestion> {
        self.suggestions
            .iter()
            .filter(|s| s.status == SuggestionStatus::Pending && !s.is_expired(now))
            .collect()
    }

    /// Most recent suggestions first.
    pub fn history(&self, limit: usize) -> Vec<&TradeSuggestion> {
        self.suggestions.iter().rev().take(limit).collect()
    }

    /// Mark pending suggestions past their expiry; returns how many changed.
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for suggestion in self.suggestions.iter_mut() {
            if suggestion.status == SuggestionStatus::Pending && suggestion.is_expired(now) {
                suggestion.status = SuggestionStatus::Expired;
                expired += 1;
            }
        }
        if expired > 0 {
            debug!("Expired {expired} suggestions");
        }
        expired
    }

    pub fn statistics(&self, now: DateTime<Utc>) -> SuggestionStatistics {
        let total = self.suggestions.len();
        let count = |status: SuggestionStatus| self.suggestions.iter().filter(|s| s.status == status).count();
        let accepted = count(SuggestionStatus::Accepted);
        let rejected = count(SuggestionStatus::Rejected);

        let (acceptance_rate, average_confidence) = if total > 0 {
            let confidence: f64 = self.suggestions.iter().map(|s| s.confidence).sum();
            (
                accepted as f64 / total as f64 * 100.0,
                confidence / total as f64,
            )
        } else {
            (0.0, 0.0)
        };

        SuggestionStatistics {
            total,
            accepted,
            rejected,
            pending: self.pending(now).len(),
            acceptance_rate,
            average_confidence,
        }
    }
}

fn reasoning(features: &FeatureVector, probability: f64) -> Vec<String> {
    let mut reasons = Vec::new();
    if probability > 0.7 {
        reasons.push("Strong buy signal from ML model");
    } else if probability > 0.6 {
        reasons.push("Moderate buy signal");
    }
    if features.volume > 100_000.0 {
        reasons.push("High trading volume detected");
    }
    if features.liquidity > 50_000.0 {
        reasons.push("Good liquidity available");
    }
    if features.holder_count > 100.0 {
        reasons.push("Healthy holder distribution");
    }
    reasons.into_iter().map(String::from).collect()
}

fn suggestion_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("sug_{}_{}", now.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::misc::PredictionResult;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn token() -> TokenInfo {
        TokenInfo::from_json_str(
            r#"{"symbol": "BONK", "address": "DezX", "name": "Bonk",
                "volume": 250000, "liquidity": 60000, "holders": 150, "volatility": 0.4}"#,
        )
        .unwrap()
    }

    fn success(p: f64) -> PredictionOutcome {
        PredictionOutcome::Success(PredictionResult::from_probability(p))
    }

    fn suggest(book: &mut SuggestionBook, p: f64, at: DateTime<Utc>) -> TradeSuggestion {
        match book.generate(&token(), &success(p), at) {
            SuggestionOutcome::Suggested { suggestion } => suggestion,
            other => panic!("expected a suggestion, got {other:?}"),
        }
    }

    #[test]
    fn test_token_parsing() {
        let token = token();
        assert_eq!(token.identity.symbol, "BONK");
        assert_eq!(token.features.holder_count, 150.0);
        assert_eq!(token.features.tx_count, 0.0);
        assert!(TokenInfo::from_json_str("[1, 2]").is_err());
        assert!(TokenInfo::from_json_str(r#"{"volume": "lots"}"#).is_err());
    }

    #[test]
    fn test_buy_suggestion() {
        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let suggestion = suggest(&mut book, 0.9, now());

        assert_eq!(suggestion.action, TradeAction::Buy);
        assert!((suggestion.confidence - 0.8).abs() < 1e-12);
        assert!((suggestion.amount.unwrap() - 0.08).abs() < 1e-12);
        assert_eq!(suggestion.expires_at, Some(now() + Duration::seconds(300)));
        assert_eq!(
            suggestion.reasoning,
            vec![
                "Strong buy signal from ML model",
                "High trading volume detected",
                "Good liquidity available",
                "Healthy holder distribution",
            ]
        );
        assert!(suggestion.id.starts_with(&format!("sug_{}_", now().timestamp_millis())));
        assert_eq!(suggestion.id.rsplit('_').next().map(str::len), Some(9));
        assert_eq!(book.get(&suggestion.id), Some(&suggestion));
    }

    #[test]
    fn test_low_confidence_is_not_stored() {
        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let outcome = book.generate(&token(), &success(0.7), now());
        assert!(matches!(outcome, SuggestionOutcome::LowConfidence { .. }));
        assert!(book.history(10).is_empty());
    }

    #[test]
    fn test_failed_prediction_holds() {
        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let outcome = book.generate(&token(), &PredictionOutcome::failed("no model"), now());
        match outcome {
            SuggestionOutcome::Fallback { error, suggestion } => {
                assert_eq!(error, "no model");
                assert_eq!(suggestion.action, TradeAction::Hold);
                assert_eq!(suggestion.confidence, 0.3);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(book.history(10).is_empty());
    }

    #[test]
    fn test_accept_lifecycle() {
        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let id = suggest(&mut book, 0.95, now()).id;

        assert_eq!(
            book.accept("missing", now()),
            Err(SuggestionError::NotFound("missing".to_string()))
        );

        let accepted = book.accept(&id, now() + Duration::seconds(10)).unwrap();
        assert_eq!(accepted.status, SuggestionStatus::Accepted);
        assert!(accepted.accepted_at.is_some());

        assert_eq!(
            book.accept(&id, now()),
            Err(SuggestionError::AlreadyResolved(SuggestionStatus::Accepted))
        );
    }

    #[test]
    fn test_accept_after_expiry() {
        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let id = suggest(&mut book, 0.95, now()).id;

        let late = now() + Duration::seconds(301);
        assert_eq!(book.accept(&id, late), Err(SuggestionError::Expired(id.clone())));
        assert_eq!(book.get(&id).unwrap().status, SuggestionStatus::Expired);
    }

    #[test]
    fn test_reject_records_reason() {
        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let id = suggest(&mut book, 0.95, now()).id;

        let rejected = book.reject(&id, Some("too risky".to_string()), now()).unwrap();
        assert_eq!(rejected.status, SuggestionStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("too risky"));
        assert!(book.reject("nope", None, now()).is_err());
    }

    #[test]
    fn test_history_is_capped_newest_first() {
        let config = SuggestionConfig {
            max_history: 3,
            ..SuggestionConfig::default()
        };
        let mut book = SuggestionBook::new(config);
        let ids: Vec<String> = (0..5)
            .map(|i| suggest(&mut book, 0.95, now() + Duration::seconds(i)).id)
            .collect();

        let history: Vec<&str> = book.history(10).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(history, vec![ids[4].as_str(), ids[3].as_str(), ids[2].as_str()]);
        assert_eq!(book.history(1).len(), 1);
    }

    #[test]
    fn test_cleanup_and_statistics() {
        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let first = suggest(&mut book, 0.95, now()).id;
        let second = suggest(&mut book, 0.85, now()).id;
        suggest(&mut book, 0.9, now() + Duration::seconds(200));

        book.accept(&first, now()).unwrap();
        book.reject(&second, None, now()).unwrap();

        let later = now() + Duration::seconds(400);
        assert_eq!(book.pending(later).len(), 1);
        let stats = book.statistics(later);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 1);
        assert!((stats.acceptance_rate - 100.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_confidence - 0.8).abs() < 1e-9);

        let much_later = now() + Duration::seconds(600);
        assert_eq!(book.cleanup_expired(much_later), 1);
        assert!(book.pending(much_later).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SUGGESTIONS_FILE);

        let empty = SuggestionBook::load(SuggestionConfig::default(), &path).unwrap();
        assert!(empty.history(10).is_empty());

        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let accepted = suggest(&mut book, 0.95, now()).id;
        let open = suggest(&mut book, 0.9, now()).id;
        book.accept(&accepted, now()).unwrap();
        book.save(&path).unwrap();

        let restored = SuggestionBook::load(SuggestionConfig::default(), &path).unwrap();
        let ids = |book: &SuggestionBook| -> Vec<String> {
            book.history(10).iter().map(|s| s.id.clone()).collect()
        };
        assert_eq!(ids(&restored), ids(&book));
        assert_eq!(restored.get(&accepted).unwrap().status, SuggestionStatus::Accepted);
        assert_eq!(restored.pending(now()).len(), 1);
        assert_eq!(restored.pending(now())[0].id, open);
    }

    #[test]
    fn test_load_keeps_newest_within_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SUGGESTIONS_FILE);

        let mut book = SuggestionBook::new(SuggestionConfig::default());
        let ids: Vec<String> = (0..4)
            .map(|i| suggest(&mut book, 0.95, now() + Duration::seconds(i)).id)
            .collect();
        book.save(&path).unwrap();

        let config = SuggestionConfig {
            max_history: 2,
            ..SuggestionConfig::default()
        };
        let restored = SuggestionBook::load(config, &path).unwrap();
        let kept: Vec<&str> = restored.history(10).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(kept, vec![ids[3].as_str(), ids[2].as_str()]);
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SUGGESTIONS_FILE);
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            SuggestionBook::load(SuggestionConfig::default(), &path),
            Err(TradeError::Json(_))
        ));
    }
}
