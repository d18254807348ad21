//! CodeCarbon dialect adapter
//!
//! Fixed-schema JSON emitted by the CodeCarbon measurement tool: a duration,
//! an emissions total, and tool-specific marker fields (project name,
//! version tag) that distinguish it from generic emission JSON.

use crate::adapter::{coerce_f64, is_numeric, FormatAdapter};
use async_trait::async_trait;
use carbonsift_core::{
    CodeCarbonRecord, ConfidenceResult, Error, NormalizedData, RawInput, Result, ScoreTrail,
};
use serde_json::Value;

/// Adapter for the CodeCarbon JSON dialect
#[derive(Debug, Default)]
pub struct CodeCarbonAdapter;

impl CodeCarbonAdapter {
    /// Create a new CodeCarbon adapter
    pub fn new() -> Self {
        Self
    }

    fn field<'v>(obj: &'v serde_json::Map<String, Value>, names: &[&str]) -> Option<&'v Value> {
        names.iter().find_map(|n| obj.get(*n))
    }

    fn require_number(
        obj: &serde_json::Map<String, Value>,
        names: &[&str],
        canonical: &str,
    ) -> Result<f64> {
        let value = Self::field(obj, names)
            .ok_or_else(|| Error::validation(canonical, "required numeric field", "absent"))?;
        let number = coerce_f64(value)
            .ok_or_else(|| Error::validation(canonical, "numeric value", value.to_string()))?;
        if number < 0.0 {
            return Err(Error::validation(canonical, "non-negative value", number));
        }
        Ok(number)
    }
}

#[async_trait]
impl FormatAdapter for CodeCarbonAdapter {
    fn name(&self) -> &str {
        "codecarbon"
    }

    fn detect(&self, input: &RawInput) -> bool {
        let Some(Value::Object(obj)) = input.json() else {
            return false;
        };
        let has = |names: &[&str]| names.iter().any(|n| obj.contains_key(*n));
        has(&["duration_seconds", "duration"])
            && has(&["emissions_kg", "emissions"])
            && has(&["project_name", "codecarbon_version"])
    }

    async fn detect_confidence(&self, data: &[u8]) -> Result<ConfidenceResult> {
        let mut trail = ScoreTrail::new();

        let Ok(text) = std::str::from_utf8(data) else {
            return Ok(ConfidenceResult::zero(self.name(), "not UTF-8 text"));
        };

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                if text.trim_start().starts_with('{') {
                    trail.add(0.05, "JSON-like opening brace");
                }
                trail.note(format!("parse failed: {e}"));
                return Ok(trail.finish(self.name()));
            }
        };

        let Value::Object(obj) = value else {
            trail.note("valid JSON but not an object");
            return Ok(trail.finish(self.name()));
        };

        let duration = Self::field(&obj, &["duration_seconds", "duration"]);
        let emissions = Self::field(&obj, &["emissions_kg", "emissions"]);

        match duration {
            Some(v) => {
                trail.add(0.25, "duration field present");
                if is_numeric(v) {
                    trail.add(0.05, "duration is numeric");
                }
            }
            None => trail.note("missing duration field"),
        }
        match emissions {
            Some(v) => {
                trail.add(0.25, "emissions field present");
                if is_numeric(v) {
                    trail.add(0.05, "emissions is numeric");
                }
            }
            None => trail.note("missing emissions field"),
        }

        if obj.contains_key("project_name") {
            trail.add(0.15, "project_name marker present");
        }
        if obj.contains_key("codecarbon_version") {
            trail.add(0.15, "codecarbon_version marker present");
        }
        if obj.contains_key("timestamp") {
            trail.add(0.05, "timestamp present");
        }

        Ok(trail.finish(self.name()))
    }

    fn ingest(&self, input: &RawInput) -> Result<NormalizedData> {
        let value = input
            .json()
            .ok_or_else(|| Error::parse("input is not valid JSON"))?;
        let Value::Object(obj) = value else {
            return Err(Error::validation("$", "JSON object", value.to_string()));
        };

        let duration_seconds =
            Self::require_number(&obj, &["duration_seconds", "duration"], "duration_seconds")?;
        let emissions_kg =
            Self::require_number(&obj, &["emissions_kg", "emissions"], "emissions_kg")?;

        let as_string = |key: &str| -> Option<String> {
            obj.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
        };

        Ok(NormalizedData::CodeCarbon(CodeCarbonRecord {
            duration_seconds,
            emissions_kg,
            project_name: as_string("project_name"),
            codecarbon_version: as_string("codecarbon_version"),
            timestamp: as_string("timestamp"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &[u8] = br#"{"duration_seconds": 120.5, "emissions_kg": 0.034, "project_name": "train-run", "codecarbon_version": "2.3.4", "timestamp": "2024-05-01T10:00:00Z"}"#;

    #[tokio::test]
    async fn full_record_scores_high() {
        let adapter = CodeCarbonAdapter::new();
        let result = adapter.detect_confidence(FULL).await.unwrap();
        assert!(result.score >= 0.9);
        assert!(result.score <= 1.0);
    }

    #[tokio::test]
    async fn bare_generic_json_scores_low() {
        let adapter = CodeCarbonAdapter::new();
        let result = adapter
            .detect_confidence(br#"{"name": "something else"}"#)
            .await
            .unwrap();
        assert!(result.score < 0.1);
    }

    #[test]
    fn ingest_produces_canonical_record() {
        let adapter = CodeCarbonAdapter::new();
        let input = RawInput::from(std::str::from_utf8(FULL).unwrap());
        assert!(adapter.detect(&input));
        let NormalizedData::CodeCarbon(record) = adapter.ingest(&input).unwrap() else {
            panic!("expected codecarbon record");
        };
        assert_eq!(record.duration_seconds, 120.5);
        assert_eq!(record.emissions_kg, 0.034);
        assert_eq!(record.project_name.as_deref(), Some("train-run"));
    }

    #[test]
    fn ingest_coerces_numeric_strings() {
        let adapter = CodeCarbonAdapter::new();
        let input = RawInput::from(r#"{"duration": "12.5", "emissions": "0.01"}"#);
        let NormalizedData::CodeCarbon(record) = adapter.ingest(&input).unwrap() else {
            panic!("expected codecarbon record");
        };
        assert_eq!(record.duration_seconds, 12.5);
    }

    #[test]
    fn ingest_rejects_negative_duration() {
        let adapter = CodeCarbonAdapter::new();
        let input = RawInput::from(r#"{"duration_seconds": -1, "emissions_kg": 0.1}"#);
        let err = adapter.ingest(&input).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("duration_seconds"));
        assert!(msg.contains("non-negative"));
    }

    #[test]
    fn ingest_names_missing_field() {
        let adapter = CodeCarbonAdapter::new();
        let input = RawInput::from(r#"{"duration_seconds": 5}"#);
        let err = adapter.ingest(&input).unwrap_err();
        assert!(err.to_string().contains("emissions_kg"));
    }
}
