//! Core types for carbonsift
//!
//! Detection results carry a bounded confidence score plus a human-readable
//! evidence trail; normalized records are the per-format canonical shapes
//! produced by ingestion. There is no universal record schema at this layer.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Confidence result from a single format adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceResult {
    /// Name of the adapter that produced this result
    pub adapter: String,

    /// Confidence score in [0.0, 1.0]
    pub score: f64,

    /// Semicolon-joined trail of the heuristics that fired.
    /// Diagnostic only; never parsed by callers.
    pub evidence: String,
}

impl ConfidenceResult {
    /// Create a zero-score result with an explanatory note
    pub fn zero(adapter: impl Into<String>, evidence: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            score: 0.0,
            evidence: evidence.into(),
        }
    }

    /// Clamp the score into [0.0, 1.0]. Adapters may use values slightly
    /// above 1.0 internally to break ties; those must never surface.
    pub fn clamped(mut self) -> Self {
        self.score = self.score.clamp(0.0, 1.0);
        self
    }
}

/// Accumulator for additive heuristic scoring with an evidence trail.
///
/// Heuristic checks add points with a note; structural damage scales the
/// accumulated score down rather than zeroing it. `finish` clamps the total
/// into [0.0, 1.0].
#[derive(Debug, Default)]
pub struct ScoreTrail {
    score: f64,
    notes: Vec<String>,
}

impl ScoreTrail {
    /// Create an empty trail
    pub fn new() -> Self {
        Self::default()
    }

    /// Add points for a heuristic that fired
    pub fn add(&mut self, points: f64, note: impl Into<String>) {
        self.score += points;
        self.notes.push(note.into());
    }

    /// Record a note without changing the score
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Apply a multiplicative penalty for structural damage
    pub fn scale(&mut self, factor: f64, note: impl Into<String>) {
        self.score *= factor;
        self.notes.push(note.into());
    }

    /// Cap the accumulated score, used when yielding to a more specialized adapter
    pub fn cap(&mut self, max: f64, note: impl Into<String>) {
        if self.score > max {
            self.score = max;
            self.notes.push(note.into());
        }
    }

    /// Current accumulated score (pre-clamp)
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Finalize into a clamped confidence result
    pub fn finish(self, adapter: impl Into<String>) -> ConfidenceResult {
        ConfidenceResult {
            adapter: adapter.into(),
            score: self.score.clamp(0.0, 1.0),
            evidence: self.notes.join("; "),
        }
    }
}

/// Outcome of a ranked multi-adapter detection call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Name of the best-scoring adapter, or `None` when nothing scored above zero
    pub best_match: Option<String>,

    /// All adapter results, sorted non-increasing by score
    pub confidences: Vec<ConfidenceResult>,

    /// Present iff `best_match` is `None`
    pub unrecognized_reason: Option<String>,
}

/// Input to detection and ingestion: already-decoded text or JSON, or raw bytes
#[derive(Debug, Clone)]
pub enum RawInput {
    /// Decoded UTF-8 text
    Text(String),
    /// Already-parsed JSON value
    Value(serde_json::Value),
    /// Raw bytes of unknown provenance
    Bytes(Bytes),
}

impl RawInput {
    /// View the input as text, if it is (or decodes as) valid UTF-8
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Text(s) => Some(Cow::Borrowed(s)),
            Self::Bytes(b) => std::str::from_utf8(b).ok().map(Cow::Borrowed),
            Self::Value(serde_json::Value::String(s)) => Some(Cow::Borrowed(s)),
            Self::Value(_) => None,
        }
    }

    /// View the input as raw bytes. JSON values have no byte representation here.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(s) => Some(s.as_bytes()),
            Self::Bytes(b) => Some(b),
            Self::Value(_) => None,
        }
    }

    /// Interpret the input as a JSON value, parsing text/bytes if needed
    pub fn json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Value(v) => Some(v.clone()),
            Self::Text(s) => serde_json::from_str(s).ok(),
            Self::Bytes(b) => serde_json::from_slice(b).ok(),
        }
    }
}

impl From<String> for RawInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for RawInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<serde_json::Value> for RawInput {
    fn from(v: serde_json::Value) -> Self {
        Self::Value(v)
    }
}

impl From<Bytes> for RawInput {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<u8>> for RawInput {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}

/// Canonical record for the CodeCarbon JSON dialect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCarbonRecord {
    /// Measured run duration in seconds
    pub duration_seconds: f64,

    /// Emissions in kilograms of CO2-equivalent
    pub emissions_kg: f64,

    /// Project identifier, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// CodeCarbon tool version tag, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codecarbon_version: Option<String>,

    /// Measurement timestamp, passed through as-is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Token counts for an AI usage record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    /// Prompt-side tokens
    pub prompt: u64,
    /// Completion-side tokens
    pub completion: u64,
    /// Total tokens
    pub total: u64,
}

/// A confidence interval attached to a computed emission value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    /// Lower bound
    pub low: f64,
    /// Upper bound; always `>= low` after validation
    pub high: f64,
}

impl ConfidenceBand {
    /// Symmetric band around a value, as a fraction of it
    pub fn symmetric(value: f64, fraction: f64) -> Self {
        Self {
            low: value * (1.0 - fraction),
            high: value * (1.0 + fraction),
        }
    }
}

/// Canonical record for the AI-usage JSON dialect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiUsageRecord {
    /// Model identifier
    pub model: String,

    /// Token counts
    pub tokens: TokenCounts,

    /// Usage timestamp, passed through as-is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Energy per token in kWh
    pub energy_per_token: f64,

    /// Emissions in kg CO2e. Computed as `tokens.total * energy_per_token`
    /// when absent from the input.
    pub emissions: f64,

    /// Uncertainty band around `emissions`. Synthesized as a symmetric ±10%
    /// band when absent from the input.
    pub confidence: ConfidenceBand,
}

/// One canonicalized CSV data row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCsvRow {
    /// Timestamp column, when mapped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Model column, when mapped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Duration column in seconds, when mapped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,

    /// Emissions column in kg, when mapped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emissions_kg: Option<f64>,
}

/// Normalized CSV content: canonical rows when at least one header mapped to
/// a canonical field, raw header→value rows otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CsvData {
    /// Rows mapped through the header alias table
    Canonical(Vec<CanonicalCsvRow>),
    /// Fallback: raw rows keyed by the original headers, in column order
    Raw(Vec<IndexMap<String, String>>),
}

/// Flat one-level view of an XML document. Nested child content degrades to
/// raw text; this is a placeholder structural parser, not a full XML reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlDocument {
    /// Root element name
    pub root: String,

    /// Whether an XML declaration was present
    pub declaration: bool,

    /// First-level child elements as key/value text, in document order
    pub fields: IndexMap<String, String>,
}

/// Kind of a framed record in a FIT-style binary payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitFrameKind {
    /// Definition message declaring the layout of subsequent data messages
    Definition,
    /// Data message
    Data,
    /// Compressed-timestamp data message
    CompressedTimestamp,
}

/// Boundary of one framed record in a FIT-style binary payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitFrame {
    /// Byte offset of the record header within the payload
    pub offset: usize,

    /// Local message type from the record header nibble
    pub local_type: u8,

    /// Record kind
    pub kind: FitFrameKind,

    /// Record body size in bytes
    pub size: usize,

    /// True when `size` came from the static fallback table rather than a
    /// preceding definition message
    pub estimated: bool,
}

/// Structural summary of a FIT-style binary payload. Record bodies are not
/// decoded; only boundaries and header metadata are reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    /// Protocol version byte from the header
    pub protocol_version: u8,

    /// Profile version from the header
    pub profile_version: u16,

    /// Payload size declared by the header
    pub declared_data_size: u32,

    /// Whether the trailing CRC-16 matched
    pub checksum_valid: bool,

    /// Framed record boundaries, in payload order
    pub records: Vec<FitFrame>,
}

/// Canonical output of ingestion: one variant per supported format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NormalizedData {
    /// Generic JSON key/value data
    Json(serde_json::Value),
    /// CodeCarbon dialect record
    CodeCarbon(CodeCarbonRecord),
    /// AI-usage dialect record
    AiUsage(AiUsageRecord),
    /// CSV rows, canonical or raw
    Csv(CsvData),
    /// Flat XML document
    Xml(XmlDocument),
    /// FIT-style binary structural summary
    Fit(FitSummary),
    /// JSON validated against a named schema
    Validated {
        /// Name of the matching schema
        schema: String,
        /// The validated value, unchanged
        value: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_trail_clamps_to_unit_interval() {
        let mut trail = ScoreTrail::new();
        trail.add(0.8, "first");
        trail.add(0.5, "second");
        let result = trail.finish("test");
        assert_eq!(result.score, 1.0);
        assert_eq!(result.evidence, "first; second");
    }

    #[test]
    fn score_trail_scale_penalizes_without_zeroing() {
        let mut trail = ScoreTrail::new();
        trail.add(0.6, "base");
        trail.scale(0.5, "damaged");
        let result = trail.finish("test");
        assert!((result.score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn score_trail_cap_only_lowers() {
        let mut trail = ScoreTrail::new();
        trail.add(0.3, "base");
        trail.cap(0.4, "should not fire");
        assert!((trail.score() - 0.3).abs() < 1e-9);
        trail.add(0.5, "more");
        trail.cap(0.4, "deferred");
        assert!((trail.score() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn raw_input_views() {
        let input = RawInput::from("{\"a\": 1}");
        assert!(input.text().is_some());
        assert!(input.json().unwrap().is_object());

        let binary = RawInput::from(vec![0xff, 0xfe, 0x00]);
        assert!(binary.text().is_none());
        assert_eq!(binary.bytes().unwrap().len(), 3);
    }

    #[test]
    fn symmetric_band_brackets_value() {
        let band = ConfidenceBand::symmetric(10.0, 0.1);
        assert!((band.low - 9.0).abs() < 1e-9);
        assert!((band.high - 11.0).abs() < 1e-9);
    }
}
