//! Schema-validating JSON adapter
//!
//! Holds a set of named schemas (a small internal representation: required
//! properties plus typed properties, with nested objects). An exact match
//! against any schema scores 1.0 and short-circuits; otherwise the best
//! partial-match score is `passed / total` checks, where a missing required
//! property earns no credit, a present-but-wrong-typed property earns half
//! credit, and nested path mismatches apply a proportional penalty.
//!
//! The best-match memo is an explicit value returned by `detect_with_memo`
//! and accepted by `ingest_with_memo`, so validation is not repeated across
//! a detect-then-ingest call pair and no hidden instance state is involved.

use crate::adapter::FormatAdapter;
use async_trait::async_trait;
use carbonsift_core::{
    ConfidenceResult, Error, NormalizedData, RawInput, Result, ScoreTrail,
};
use indexmap::IndexMap;
use serde_json::Value;

/// Internal tie-break score for an exact schema match; clamped to 1.0
/// before it ever surfaces.
const EXACT_MATCH_SCORE: f64 = 1.05;

/// Penalty applied per nested-path mismatch
const NESTED_MISMATCH_PENALTY: f64 = 0.05;

/// Expected type of a schema property
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaType {
    /// JSON string
    String,
    /// JSON number (integer or float)
    Number,
    /// JSON integer
    Integer,
    /// JSON boolean
    Boolean,
    /// JSON array
    Array,
    /// Nested object with its own typed properties
    Object(IndexMap<String, SchemaType>),
}

impl SchemaType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object(_) => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object(_) => "object",
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A named schema: required property names plus typed properties
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Properties that must be present
    pub required: Vec<String>,
    /// Expected types for known properties
    pub properties: IndexMap<String, SchemaType>,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a property as required
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Declare a property's expected type
    pub fn property(mut self, name: impl Into<String>, ty: SchemaType) -> Self {
        self.properties.insert(name.into(), ty);
        self
    }
}

/// Best-match memo threaded from `detect_with_memo` into `ingest_with_memo`.
/// Scoped to one logical detect-then-ingest call pair; never shared.
#[derive(Debug, Clone)]
pub struct SchemaMatch {
    /// Name of the best-scoring schema
    pub schema: String,
    /// Clamped partial-match score
    pub score: f64,
    /// Path-annotated validation issues
    pub issues: Vec<String>,
}

#[derive(Debug, Default)]
struct Evaluation {
    passed: f64,
    total: usize,
    issues: Vec<String>,
    nested_mismatches: usize,
}

impl Evaluation {
    fn score(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let base = self.passed / self.total as f64;
        (base - NESTED_MISMATCH_PENALTY * self.nested_mismatches as f64).max(0.0)
    }

    fn is_exact(&self) -> bool {
        self.issues.is_empty() && self.total > 0 && (self.passed - self.total as f64).abs() < 1e-9
    }
}

/// Adapter validating JSON payloads against named schemas
#[derive(Debug, Default)]
pub struct SchemaAdapter {
    schemas: IndexMap<String, Schema>,
    strict: bool,
}

impl SchemaAdapter {
    /// Create an adapter with no schemas
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter pre-loaded with the built-in emission schemas
    pub fn with_default_schemas() -> Self {
        Self::new()
            .with_schema(
                "emission_record",
                Schema::new()
                    .require("emissions")
                    .require("timestamp")
                    .property("emissions", SchemaType::Number)
                    .property("timestamp", SchemaType::String)
                    .property("source", SchemaType::String)
                    .property("duration", SchemaType::Number),
            )
            .with_schema(
                "energy_reading",
                Schema::new()
                    .require("energy_kwh")
                    .property("energy_kwh", SchemaType::Number)
                    .property("region", SchemaType::String)
                    .property("grid_intensity", SchemaType::Number),
            )
    }

    /// Register a named schema (overwrites silently on name reuse)
    pub fn with_schema(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.schemas.insert(name.into(), schema);
        self
    }

    /// Enable strict mode: ingest fails with the aggregated issue list
    /// whenever the match is not exact.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn check_properties(
        properties: &IndexMap<String, SchemaType>,
        obj: &serde_json::Map<String, Value>,
        path: &str,
        depth: usize,
        eval: &mut Evaluation,
    ) {
        for (prop, ty) in properties {
            let full_path = if path.is_empty() {
                format!("$.{prop}")
            } else {
                format!("{path}.{prop}")
            };
            let Some(value) = obj.get(prop) else {
                continue; // absence of an optional property is not a check
            };
            eval.total += 1;
            if ty.matches(value) {
                eval.passed += 1.0;
                if let (SchemaType::Object(nested), Value::Object(inner)) = (ty, value) {
                    Self::check_properties(nested, inner, &full_path, depth + 1, eval);
                }
            } else {
                eval.passed += 0.5;
                eval.issues.push(format!(
                    "{full_path}: expected {}, got {}",
                    ty.name(),
                    json_type_name(value)
                ));
                if depth > 0 {
                    eval.nested_mismatches += 1;
                }
            }
        }
    }

    fn evaluate(schema: &Schema, value: &Value) -> Evaluation {
        let mut eval = Evaluation::default();
        let Value::Object(obj) = value else {
            eval.total = 1;
            eval.issues.push("$: expected object".to_string());
            return eval;
        };

        for required in &schema.required {
            eval.total += 1;
            if obj.contains_key(required) {
                eval.passed += 1.0;
            } else {
                eval.issues
                    .push(format!("$.{required}: missing required property"));
            }
        }

        Self::check_properties(&schema.properties, obj, "", 0, &mut eval);
        eval
    }

    /// Validate against every schema, returning whether an exact match was
    /// found and the best-match memo. An exact match short-circuits the
    /// remaining schemas.
    pub fn detect_with_memo(&self, value: &Value) -> (bool, Option<SchemaMatch>) {
        let mut best: Option<SchemaMatch> = None;

        for (name, schema) in &self.schemas {
            let eval = Self::evaluate(schema, value);
            if eval.is_exact() {
                return (
                    true,
                    Some(SchemaMatch {
                        schema: name.clone(),
                        score: 1.0,
                        issues: Vec::new(),
                    }),
                );
            }
            let score = eval.score();
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(SchemaMatch {
                    schema: name.clone(),
                    score,
                    issues: eval.issues,
                });
            }
        }

        (false, best)
    }

    /// Ingest using a memo obtained from `detect_with_memo` on the same
    /// value, skipping re-validation.
    pub fn ingest_with_memo(&self, value: Value, memo: &SchemaMatch) -> Result<NormalizedData> {
        if self.strict && memo.score < 1.0 {
            return Err(Error::SchemaValidation {
                schema: memo.schema.clone(),
                issues: memo.issues.clone(),
            });
        }
        Ok(NormalizedData::Validated {
            schema: memo.schema.clone(),
            value,
        })
    }
}

#[async_trait]
impl FormatAdapter for SchemaAdapter {
    fn name(&self) -> &str {
        "schema"
    }

    fn detect(&self, input: &RawInput) -> bool {
        input
            .json()
            .map(|v| self.detect_with_memo(&v).0)
            .unwrap_or(false)
    }

    async fn detect_confidence(&self, data: &[u8]) -> Result<ConfidenceResult> {
        let mut trail = ScoreTrail::new();

        let Ok(text) = std::str::from_utf8(data) else {
            return Ok(ConfidenceResult::zero(self.name(), "not UTF-8 text"));
        };
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                return Ok(ConfidenceResult::zero(
                    self.name(),
                    format!("not valid JSON: {e}"),
                ))
            }
        };

        let (exact, best) = self.detect_with_memo(&value);
        match best {
            Some(memo) if exact => {
                trail.add(
                    EXACT_MATCH_SCORE,
                    format!("exact match against schema `{}`", memo.schema),
                );
            }
            Some(memo) => {
                trail.add(
                    memo.score,
                    format!(
                        "best partial match: schema `{}` ({} issue(s))",
                        memo.schema,
                        memo.issues.len()
                    ),
                );
            }
            None => trail.note("no schemas registered"),
        }

        Ok(trail.finish(self.name()))
    }

    fn ingest(&self, input: &RawInput) -> Result<NormalizedData> {
        let value = input
            .json()
            .ok_or_else(|| Error::parse("input is not valid JSON"))?;
        let (_, best) = self.detect_with_memo(&value);
        let memo = best.ok_or_else(|| Error::internal("no schemas registered"))?;
        self.ingest_with_memo(value, &memo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> SchemaAdapter {
        SchemaAdapter::with_default_schemas()
    }

    #[tokio::test]
    async fn exact_match_scores_exactly_one() {
        let payload = json!({"emissions": 0.5, "timestamp": "2024-05-01T10:00:00Z"});
        let result = adapter()
            .detect_confidence(payload.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(result.score, 1.0);
        assert!(result.evidence.contains("exact match"));
    }

    #[tokio::test]
    async fn partial_match_scores_between_zero_and_one() {
        // Missing required `timestamp`, wrong-typed `emissions`.
        let payload = json!({"emissions": "lots", "source": "meter"});
        let result = adapter()
            .detect_confidence(payload.to_string().as_bytes())
            .await
            .unwrap();
        // Checks: required emissions (1.0) + required timestamp (0.0)
        // + emissions type (0.5) + source type (1.0) = 2.5 / 4.
        assert!((result.score - 0.625).abs() < 1e-9);
    }

    #[test]
    fn nested_mismatches_are_penalized() {
        let schema = Schema::new().require("meta").property(
            "meta",
            SchemaType::Object(IndexMap::from([(
                "tool".to_string(),
                SchemaType::String,
            )])),
        );
        let adapter = SchemaAdapter::new().with_schema("nested", schema);
        let (_, best) = adapter.detect_with_memo(&json!({"meta": {"tool": 42}}));
        let memo = best.unwrap();
        // required (1.0) + meta type (1.0) + nested tool (0.5) = 2.5 / 3,
        // minus one nested-mismatch penalty.
        assert!((memo.score - (2.5 / 3.0 - 0.05)).abs() < 1e-9);
        assert!(memo.issues[0].contains("$.meta.tool"));
    }

    #[test]
    fn memo_threads_into_ingest() {
        let a = adapter();
        let value = json!({"emissions": 0.5, "timestamp": "t"});
        let (exact, best) = a.detect_with_memo(&value);
        assert!(exact);
        let memo = best.unwrap();
        let NormalizedData::Validated { schema, .. } =
            a.ingest_with_memo(value, &memo).unwrap()
        else {
            panic!("expected validated data");
        };
        assert_eq!(schema, "emission_record");
    }

    #[test]
    fn strict_mode_aggregates_issues() {
        let a = SchemaAdapter::with_default_schemas().strict();
        let input = RawInput::from(r#"{"emissions": "lots"}"#);
        let err = a.ingest(&input).unwrap_err();
        let Error::SchemaValidation { schema, issues } = err else {
            panic!("expected schema validation error");
        };
        assert_eq!(schema, "emission_record");
        assert!(issues.iter().any(|i| i.contains("timestamp")));
        assert!(issues.iter().any(|i| i.contains("$.emissions")));
    }

    #[test]
    fn non_strict_ingest_passes_partial_matches() {
        let a = adapter();
        let input = RawInput::from(r#"{"emissions": 0.5}"#);
        assert!(a.ingest(&input).is_ok());
    }
}
