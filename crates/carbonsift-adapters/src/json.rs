//! Generic JSON adapter
//!
//! Scores on the presence of emission-vocabulary field synonyms and
//! deliberately caps its own score when a payload carries the canonical
//! field combination of a more specific JSON dialect, so the specialized
//! adapter wins the ranking deterministically.

use crate::adapter::FormatAdapter;
use async_trait::async_trait;
use carbonsift_core::{ConfidenceResult, Error, NormalizedData, RawInput, Result, ScoreTrail};
use serde_json::Value;

const EMISSION_KEYS: &[&str] = &["emissions", "emissions_kg", "co2", "co2e", "carbon"];
const DURATION_KEYS: &[&str] = &["duration", "duration_seconds", "elapsed", "runtime"];
const ENERGY_KEYS: &[&str] = &["energy", "energy_kwh", "power", "energy_per_token"];
const MODEL_KEYS: &[&str] = &["model", "model_name", "ai_model"];

/// Adapter for plain JSON emission data without a fixed schema
#[derive(Debug, Default)]
pub struct GenericJsonAdapter;

impl GenericJsonAdapter {
    /// Create a new generic JSON adapter
    pub fn new() -> Self {
        Self
    }

    /// Top-level keys of an object, or of the first element when the value
    /// is an array of objects
    fn top_level_keys(value: &Value) -> Vec<String> {
        match value {
            Value::Object(map) => map.keys().map(|k| k.to_lowercase()).collect(),
            Value::Array(items) => items
                .first()
                .and_then(|v| v.as_object())
                .map(|map| map.keys().map(|k| k.to_lowercase()).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn has_any(keys: &[String], synonyms: &[&str]) -> bool {
        keys.iter().any(|k| synonyms.contains(&k.as_str()))
    }

    /// Canonical field combination of the CodeCarbon dialect
    fn looks_like_codecarbon(keys: &[String]) -> bool {
        let has = |k: &str| keys.iter().any(|key| key == k);
        (has("duration_seconds") || has("duration"))
            && (has("emissions_kg") || has("emissions"))
            && (has("project_name") || has("codecarbon_version"))
    }

    /// Canonical field combination of the AI-usage dialect
    fn looks_like_ai_usage(keys: &[String]) -> bool {
        let has = |k: &str| keys.iter().any(|key| key == k);
        has("model") && (has("tokens") || has("total_tokens")) && has("energy_per_token")
    }
}

#[async_trait]
impl FormatAdapter for GenericJsonAdapter {
    fn name(&self) -> &str {
        "json"
    }

    fn detect(&self, input: &RawInput) -> bool {
        input
            .json()
            .map(|v| v.is_object() || v.is_array())
            .unwrap_or(false)
    }

    async fn detect_confidence(&self, data: &[u8]) -> Result<ConfidenceResult> {
        let mut trail = ScoreTrail::new();

        let text = match std::str::from_utf8(data) {
            Ok(t) => t,
            Err(_) => return Ok(ConfidenceResult::zero(self.name(), "not UTF-8 text")),
        };

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                // Surface heuristics only: malformed JSON keeps a small score.
                let trimmed = text.trim_start();
                if trimmed.starts_with('{') || trimmed.starts_with('[') {
                    trail.add(0.1, "JSON-like opening bracket");
                }
                if text.contains(':') && text.contains('"') {
                    trail.add(0.05, "contains quoted key/value punctuation");
                }
                trail.note(format!("parse failed: {e}"));
                return Ok(trail.finish(self.name()));
            }
        };

        if !value.is_object() && !value.is_array() {
            trail.add(0.05, "valid JSON but not an object or array");
            return Ok(trail.finish(self.name()));
        }

        trail.add(0.3, "parses as a JSON object/array");

        let keys = Self::top_level_keys(&value);
        let mut groups = 0;
        for (synonyms, label) in [
            (EMISSION_KEYS, "emission field"),
            (DURATION_KEYS, "duration field"),
            (ENERGY_KEYS, "energy field"),
            (MODEL_KEYS, "model field"),
        ] {
            if Self::has_any(&keys, synonyms) {
                trail.add(0.15, format!("{label} present"));
                groups += 1;
            }
        }
        if groups >= 2 {
            trail.add(0.1, "multiple emission-vocabulary fields");
        }

        if let Value::Array(items) = &value {
            if items.len() > 1 && items.iter().all(|v| v.as_object().is_some_and(|o| {
                items[0]
                    .as_object()
                    .is_some_and(|first| o.len() == first.len() && o.keys().all(|k| first.contains_key(k)))
            })) {
                trail.add(0.1, "array of consistently-keyed objects");
            }
        }

        // A payload carrying a sibling dialect's canonical fields belongs to
        // that dialect's adapter; cap so the specialized score ranks higher.
        if Self::looks_like_codecarbon(&keys) {
            trail.cap(0.4, "canonical codecarbon fields present, yielding to codecarbon adapter");
        }
        if Self::looks_like_ai_usage(&keys) {
            trail.cap(0.4, "canonical ai-usage fields present, yielding to ai-usage adapter");
        }

        Ok(trail.finish(self.name()))
    }

    fn ingest(&self, input: &RawInput) -> Result<NormalizedData> {
        let value = input
            .json()
            .ok_or_else(|| Error::parse("input is not valid JSON"))?;
        if !value.is_object() && !value.is_array() {
            return Err(Error::validation(
                "$",
                "JSON object or array",
                value.to_string(),
            ));
        }
        Ok(NormalizedData::Json(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scores_emission_vocabulary() {
        let adapter = GenericJsonAdapter::new();
        let result = adapter
            .detect_confidence(br#"{"emissions": 0.5, "duration": 12.0}"#)
            .await
            .unwrap();
        assert!(result.score > 0.5);
        assert!(result.evidence.contains("emission field"));
    }

    #[tokio::test]
    async fn malformed_json_scores_low_not_err() {
        let adapter = GenericJsonAdapter::new();
        let result = adapter
            .detect_confidence(br#"{"emissions": 0.5,"#)
            .await
            .unwrap();
        assert!(result.score > 0.0);
        assert!(result.score < 0.3);
        assert!(result.evidence.contains("parse failed"));
    }

    #[tokio::test]
    async fn caps_score_for_codecarbon_payloads() {
        let adapter = GenericJsonAdapter::new();
        let payload =
            br#"{"duration_seconds": 10, "emissions_kg": 0.2, "project_name": "demo", "codecarbon_version": "2.3"}"#;
        let result = adapter.detect_confidence(payload).await.unwrap();
        assert!(result.score <= 0.4);
        assert!(result.evidence.contains("yielding to codecarbon"));
    }

    #[test]
    fn ingest_rejects_scalars() {
        let adapter = GenericJsonAdapter::new();
        let err = adapter.ingest(&RawInput::from("42")).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn ingest_round_trips_objects() {
        let adapter = GenericJsonAdapter::new();
        let input = RawInput::from(r#"{"co2": 1.5}"#);
        assert!(adapter.detect(&input));
        let normalized = adapter.ingest(&input).unwrap();
        assert!(matches!(normalized, NormalizedData::Json(_)));
    }
}
