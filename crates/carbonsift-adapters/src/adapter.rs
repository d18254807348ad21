//! Format adapter trait and shared helpers
//!
//! Every supported format implements the same three-operation contract:
//! a cheap synchronous `detect` for the legacy first-match path, an async
//! `detect_confidence` that scores the payload with an evidence trail, and
//! a validating `ingest` that produces the format's canonical record.

use async_trait::async_trait;
use carbonsift_core::{ConfidenceResult, NormalizedData, RawInput, Result};

/// Trait implemented by all format adapters
#[async_trait]
pub trait FormatAdapter: Send + Sync {
    /// Get the adapter name (unique within a registry)
    fn name(&self) -> &str;

    /// Cheap plausibility check for the legacy single-match path
    fn detect(&self, input: &RawInput) -> bool;

    /// Score the payload against this format.
    ///
    /// Malformed input is never an `Err` here: it yields a low score with
    /// evidence describing what was observed. An `Err` signals an internal
    /// fault, which the registry converts to a zero-score result.
    async fn detect_confidence(&self, data: &[u8]) -> Result<ConfidenceResult>;

    /// Fully validate and normalize the input.
    ///
    /// Fails with a descriptive error naming the offending field and
    /// constraint on any violation; never silently coerces bad data.
    fn ingest(&self, input: &RawInput) -> Result<NormalizedData>;
}

/// Coerce a JSON value to f64, accepting numbers and numeric strings
pub(crate) fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to a non-negative integer, accepting numbers and
/// numeric strings. Rejects negatives and non-integral values.
pub(crate) fn coerce_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether a JSON value reads as numeric (number or numeric string)
pub(crate) fn is_numeric(value: &serde_json::Value) -> bool {
    coerce_f64(value).is_some()
}
