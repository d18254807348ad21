//! CarbonSift Adapters
//!
//! Format adapters for emission and energy telemetry data, plus the
//! registry and scheduling layers that drive them.
//!
//! Each adapter answers two questions about a payload:
//! - detection: how confident are we this is my format? (a score, never
//!   an error)
//! - ingestion: parse it into normalized data, failing loudly on
//!   malformed or invalid input
//!
//! The [`registry`] module dispatches over adapters; [`optimized`] adds
//! caching, early exit, and time budgets on top; [`benchmark`] measures
//! the whole stack against synthetic workloads.

pub mod adapter;
pub mod ai_usage;
pub mod benchmark;
pub mod codecarbon;
pub mod csv;
pub mod fit;
pub mod json;
pub mod optimized;
pub mod registry;
pub mod schema;
pub mod xml;

pub use adapter::FormatAdapter;
pub use ai_usage::AiUsageAdapter;
pub use benchmark::{
    run_benchmark, BenchmarkConfig, BenchmarkReport, DatasetFormat, DatasetSpec,
};
pub use codecarbon::CodeCarbonAdapter;
pub use csv::CsvAdapter;
pub use fit::FitAdapter;
pub use json::GenericJsonAdapter;
pub use optimized::{
    AdapterTiming, BenchmarkStats, CacheStatus, OptimizationConfig, OptimizedDetectionResult,
    OptimizedRegistry, PerformanceMetrics,
};
pub use registry::{default_registry, AdapterRegistry};
pub use schema::{Schema, SchemaAdapter, SchemaMatch, SchemaType};
pub use xml::XmlAdapter;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::adapter::FormatAdapter;
    pub use crate::optimized::{OptimizationConfig, OptimizedRegistry};
    pub use crate::registry::{default_registry, AdapterRegistry};
    pub use carbonsift_core::prelude::*;
}
