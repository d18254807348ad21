//! Error types for carbonsift
//!
//! Detection-time problems are never errors: adapters express them as low
//! confidence scores with evidence. Everything in this module concerns the
//! ingestion path, where problems must surface as descriptive errors the
//! caller can act on.

/// Result type alias using carbonsift's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for carbonsift operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No registered adapter recognized the input
    #[error("unknown format: no registered adapter recognized the input")]
    UnknownFormat,

    /// Input is not well-formed for the attempted syntax
    #[error("parse error: {0}")]
    Parse(String),

    /// Well-formed input that violates a semantic constraint
    #[error("invalid field `{field}`: expected {constraint}, got {value}")]
    Validation {
        /// Name of the offending field (dotted path for nested fields)
        field: String,
        /// The constraint that was violated
        constraint: String,
        /// The observed value, rendered for diagnostics
        value: String,
    },

    /// Aggregated schema validation failures (strict mode)
    #[error("schema `{schema}` validation failed: {}", issues.join("; "))]
    SchemaValidation {
        /// Name of the schema that was validated against
        schema: String,
        /// Path-annotated list of individual failures
        issues: Vec<String>,
    },

    /// Binary payload failed an integrity check
    #[error("integrity error: {0}")]
    Integrity(String),

    /// IO errors (stream buffering)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new validation error naming the field and constraint
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.to_string(),
        }
    }

    /// Create a new integrity error
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
