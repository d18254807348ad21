//! Carbonsift Core
//!
//! Shared types and utilities for the carbonsift format-detection engine.
//!
//! This crate provides:
//! - Confidence and detection result types with bounded scoring
//! - The raw-input model (text, parsed JSON, or raw bytes)
//! - Per-format normalized record shapes
//! - Error taxonomy separating detection scores from ingestion errors
//! - The signature cache used by the optimized registry

pub mod cache;
pub mod error;
pub mod types;

pub use cache::{CacheConfig, CacheStats, SignatureCache};
pub use error::{Error, Result};
pub use types::{
    AiUsageRecord, CanonicalCsvRow, CodeCarbonRecord, ConfidenceBand, ConfidenceResult, CsvData,
    DetectionResult, FitFrame, FitFrameKind, FitSummary, NormalizedData, RawInput, ScoreTrail,
    TokenCounts, XmlDocument,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheStats, SignatureCache};
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        ConfidenceResult, DetectionResult, NormalizedData, RawInput, ScoreTrail,
    };
}
