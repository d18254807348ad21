//! AI-usage dialect adapter
//!
//! Fixed-schema JSON describing one LLM usage event: model, token counts,
//! per-token energy, and optionally precomputed emissions with an
//! uncertainty band. Missing derived fields are computed deterministically
//! from what is present, never defaulted to constants.

use crate::adapter::{coerce_f64, coerce_u64, FormatAdapter};
use async_trait::async_trait;
use carbonsift_core::{
    AiUsageRecord, ConfidenceBand, ConfidenceResult, Error, NormalizedData, RawInput, Result,
    ScoreTrail, TokenCounts,
};
use serde_json::Value;

/// Fraction used for the synthesized symmetric uncertainty band
const DEFAULT_BAND_FRACTION: f64 = 0.1;

/// Adapter for the AI-usage JSON dialect
#[derive(Debug, Default)]
pub struct AiUsageAdapter;

impl AiUsageAdapter {
    /// Create a new AI-usage adapter
    pub fn new() -> Self {
        Self
    }

    fn parse_tokens(obj: &serde_json::Map<String, Value>) -> Result<TokenCounts> {
        if let Some(tokens) = obj.get("tokens") {
            let Value::Object(t) = tokens else {
                return Err(Error::validation("tokens", "object", tokens.to_string()));
            };
            let count = |key: &str| -> Result<Option<u64>> {
                match t.get(key) {
                    None => Ok(None),
                    Some(v) => coerce_u64(v)
                        .map(Some)
                        .ok_or_else(|| {
                            Error::validation(
                                format!("tokens.{key}"),
                                "non-negative integer",
                                v.to_string(),
                            )
                        }),
                }
            };
            let prompt = count("prompt")?;
            let completion = count("completion")?;
            let sum = |p: u64, c: u64| -> Result<u64> {
                p.checked_add(c).ok_or_else(|| {
                    Error::validation(
                        "tokens",
                        "prompt + completion representable as u64",
                        format!("{p} + {c}"),
                    )
                })
            };
            // Consistency is checked whenever all three counts are present,
            // including explicit zeros.
            let total = match (prompt, completion, count("total")?) {
                (Some(p), Some(c), Some(t)) => {
                    if t != sum(p, c)? {
                        return Err(Error::validation(
                            "tokens.total",
                            "prompt + completion",
                            t,
                        ));
                    }
                    t
                }
                (_, _, Some(t)) => t,
                (p, c, None) => sum(p.unwrap_or(0), c.unwrap_or(0))?,
            };
            return Ok(TokenCounts {
                prompt: prompt.unwrap_or(0),
                completion: completion.unwrap_or(0),
                total,
            });
        }

        if let Some(v) = obj.get("total_tokens") {
            let total = coerce_u64(v).ok_or_else(|| {
                Error::validation("total_tokens", "non-negative integer", v.to_string())
            })?;
            return Ok(TokenCounts {
                prompt: 0,
                completion: 0,
                total,
            });
        }

        Err(Error::validation(
            "tokens",
            "`tokens` object or `total_tokens`",
            "absent",
        ))
    }

    fn parse_band(value: &Value) -> Result<ConfidenceBand> {
        let Value::Object(band) = value else {
            return Err(Error::validation("confidence", "object with low/high", value.to_string()));
        };
        let bound = |key: &str| -> Result<f64> {
            let v = band.get(key).ok_or_else(|| {
                Error::validation(format!("confidence.{key}"), "required numeric bound", "absent")
            })?;
            coerce_f64(v).ok_or_else(|| {
                Error::validation(format!("confidence.{key}"), "numeric value", v.to_string())
            })
        };
        let low = bound("low")?;
        let high = bound("high")?;
        if low > high {
            return Err(Error::validation(
                "confidence",
                "low <= high",
                format!("low={low}, high={high}"),
            ));
        }
        Ok(ConfidenceBand { low, high })
    }
}

#[async_trait]
impl FormatAdapter for AiUsageAdapter {
    fn name(&self) -> &str {
        "ai-usage"
    }

    fn detect(&self, input: &RawInput) -> bool {
        let Some(Value::Object(obj)) = input.json() else {
            return false;
        };
        obj.contains_key("model")
            && (obj.contains_key("tokens") || obj.contains_key("total_tokens"))
            && obj.contains_key("energy_per_token")
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

        if obj.get("model").is_some_and(|v| v.is_string()) {
            trail.add(0.25, "model field present");
        }

        match obj.get("tokens") {
            Some(Value::Object(t)) => {
                trail.add(0.2, "nested tokens object present");
                if ["prompt", "completion", "total"]
                    .iter()
                    .any(|k| t.contains_key(*k))
                {
                    trail.add(0.05, "token counts present");
                }
            }
            _ => {
                if obj.contains_key("total_tokens") {
                    trail.add(0.15, "flat total_tokens present");
                }
            }
        }

        if obj.get("energy_per_token").is_some_and(crate::adapter::is_numeric) {
            trail.add(0.2, "energy_per_token present");
        }

        if let Some(ts) = obj.get("timestamp").and_then(|v| v.as_str()) {
            trail.add(0.1, "timestamp present");
            if chrono::DateTime::parse_from_rfc3339(ts).is_ok() {
                trail.add(0.05, "timestamp parses as RFC 3339");
            }
        }

        if obj.contains_key("emissions") {
            trail.add(0.1, "precomputed emissions present");
        }
        if obj.contains_key("confidence") {
            trail.add(0.05, "confidence band present");
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

        let model = obj
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::validation("model", "required string", "absent or non-string"))?
            .to_string();

        let tokens = Self::parse_tokens(&obj)?;

        let energy_value = obj.get("energy_per_token").ok_or_else(|| {
            Error::validation("energy_per_token", "required numeric field", "absent")
        })?;
        let energy_per_token = coerce_f64(energy_value).ok_or_else(|| {
            Error::validation("energy_per_token", "numeric value", energy_value.to_string())
        })?;
        if energy_per_token < 0.0 {
            return Err(Error::validation(
                "energy_per_token",
                "non-negative value",
                energy_per_token,
            ));
        }

        // Derived, not defaulted: absent emissions are computed from tokens.
        let emissions = match obj.get("emissions") {
            Some(v) => {
                let e = coerce_f64(v)
                    .ok_or_else(|| Error::validation("emissions", "numeric value", v.to_string()))?;
                if e < 0.0 {
                    return Err(Error::validation("emissions", "non-negative value", e));
                }
                e
            }
            None => tokens.total as f64 * energy_per_token,
        };

        let confidence = match obj.get("confidence") {
            Some(v) => Self::parse_band(v)?,
            None => ConfidenceBand::symmetric(emissions, DEFAULT_BAND_FRACTION),
        };

        let timestamp = obj
            .get("timestamp")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(NormalizedData::AiUsage(AiUsageRecord {
            model,
            tokens,
            timestamp,
            energy_per_token,
            emissions,
            confidence,
        }))
    }
}
