//! Detection benchmark harness
//!
//! Generates synthetic payloads per format, runs them through an optimized
//! registry, and reports latency plus cache and early-exit rates. Used by
//! the criterion benches and available to downstream tooling for capacity
//! checks against representative traffic mixes.

use crate::fit;
use crate::optimized::OptimizedRegistry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Instant;
use tracing::info;

/// Payload format to synthesize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatasetFormat {
    /// Generic emission JSON object
    Json,
    /// CodeCarbon dialect record
    CodeCarbon,
    /// AI usage record with token counts
    AiUsage,
    /// Canonical-header CSV
    Csv,
    /// Emission report XML
    Xml,
    /// Binary telemetry buffer
    Fit,
    /// Text that matches no adapter
    Unknown,
}

/// One slice of a benchmark workload
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    /// Format to synthesize
    pub format: DatasetFormat,
    /// Number of payloads of this format
    pub count: usize,
}

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Workload mix
    pub datasets: Vec<DatasetSpec>,
    /// RNG seed so runs are reproducible
    pub seed: u64,
    /// Clear the cache every N detections (0 disables clearing)
    pub cache_clear_interval: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            datasets: vec![
                DatasetSpec { format: DatasetFormat::Json, count: 20 },
                DatasetSpec { format: DatasetFormat::CodeCarbon, count: 20 },
                DatasetSpec { format: DatasetFormat::AiUsage, count: 20 },
                DatasetSpec { format: DatasetFormat::Csv, count: 20 },
                DatasetSpec { format: DatasetFormat::Xml, count: 10 },
                DatasetSpec { format: DatasetFormat::Fit, count: 10 },
                DatasetSpec { format: DatasetFormat::Unknown, count: 10 },
            ],
            seed: 42,
            cache_clear_interval: 0,
        }
    }
}

/// Aggregate results of one benchmark run
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    /// Payloads classified
    pub total_detections: usize,
    /// Mean per-detection latency in milliseconds
    pub avg_ms: f64,
    /// Fastest detection in milliseconds
    pub min_ms: f64,
    /// Slowest detection in milliseconds
    pub max_ms: f64,
    /// Fraction of detections that stopped on the early-exit threshold
    pub early_exit_rate: f64,
    /// Cache hit rate at the end of the run
    pub cache_hit_rate: f64,
    /// Payloads whose best match was the expected adapter
    pub correct_matches: usize,
}

/// Generate one synthetic payload of the given format
pub fn generate_payload(format: DatasetFormat, rng: &mut StdRng) -> Vec<u8> {
    match format {
        DatasetFormat::Json => format!(
            r#"{{"emissions": {:.4}, "energy": {:.3}, "duration": {}}}"#,
            rng.gen_range(0.001..2.0),
            rng.gen_range(0.01..50.0),
            rng.gen_range(1..86400),
        )
        .into_bytes(),
        DatasetFormat::CodeCarbon => format!(
            r#"{{"duration_seconds": {:.1}, "emissions_kg": {:.5}, "project_name": "run-{}", "codecarbon_version": "2.3.4", "timestamp": "2024-05-01T10:00:00Z"}}"#,
            rng.gen_range(1.0..7200.0),
            rng.gen_range(0.0001..0.5),
            rng.gen_range(0..1000),
        )
        .into_bytes(),
        DatasetFormat::AiUsage => {
            let prompt: u64 = rng.gen_range(10..5000);
            let completion: u64 = rng.gen_range(10..5000);
            format!(
                r#"{{"model": "model-{}", "tokens": {{"prompt": {prompt}, "completion": {completion}, "total": {}}}, "energy_per_token": 0.000002}}"#,
                rng.gen_range(0..10),
                prompt + completion,
            )
            .into_bytes()
        }
        DatasetFormat::Csv => {
            let mut out = String::from("timestamp,model,duration,emissions\n");
            for i in 0..rng.gen_range(2..20) {
                out.push_str(&format!(
                    "2024-05-01T10:{i:02}:00Z,model-a,{:.1},{:.5}\n",
                    rng.gen_range(1.0..600.0),
                    rng.gen_range(0.0001..0.1),
                ));
            }
            out.into_bytes()
        }
        DatasetFormat::Xml => format!(
            "<?xml version=\"1.0\"?>\n<emission_report>\n  <co2_kg>{:.5}</co2_kg>\n  <duration>{}</duration>\n  <energy_kwh>{:.3}</energy_kwh>\n</emission_report>",
            rng.gen_range(0.0001..1.0),
            rng.gen_range(1..3600),
            rng.gen_range(0.01..10.0),
        )
        .into_bytes(),
        DatasetFormat::Fit => fit::build_test_buffer(),
        DatasetFormat::Unknown => {
            format!("opaque payload #{} with no structure", rng.gen_range(0..u32::MAX)).into_bytes()
        }
    }
}

fn expected_adapter(format: DatasetFormat) -> Option<&'static str> {
    match format {
        DatasetFormat::Json => Some("json"),
        DatasetFormat::CodeCarbon => Some("codecarbon"),
        DatasetFormat::AiUsage => Some("ai-usage"),
        DatasetFormat::Csv => Some("csv"),
        DatasetFormat::Xml => Some("xml"),
        DatasetFormat::Fit => Some("fit"),
        DatasetFormat::Unknown => None,
    }
}

/// Run the configured workload against the registry and report aggregates
pub async fn run_benchmark(
    registry: &OptimizedRegistry,
    config: &BenchmarkConfig,
) -> BenchmarkReport {
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut payloads = Vec::new();
    for spec in &config.datasets {
        for _ in 0..spec.count {
            payloads.push((spec.format, generate_payload(spec.format, &mut rng)));
        }
    }

    let mut times = Vec::with_capacity(payloads.len());
    let mut early_exits = 0usize;
    let mut correct_matches = 0usize;

    for (i, (format, payload)) in payloads.iter().enumerate() {
        if config.cache_clear_interval > 0 && i > 0 && i % config.cache_clear_interval == 0 {
            registry.clear_cache();
        }

        let start = Instant::now();
        let result = registry.detect_format_optimized(payload).await;
        times.push(start.elapsed().as_secs_f64() * 1000.0);

        if result.early_exited {
            early_exits += 1;
        }
        if result.detection.best_match.as_deref() == expected_adapter(*format) {
            correct_matches += 1;
        }
    }

    let total = times.len();
    let (mut min_ms, mut max_ms, mut sum) = (f64::INFINITY, 0.0f64, 0.0);
    for &t in &times {
        min_ms = min_ms.min(t);
        max_ms = max_ms.max(t);
        sum += t;
    }

    let report = BenchmarkReport {
        total_detections: total,
        avg_ms: if total == 0 { 0.0 } else { sum / total as f64 },
        min_ms: if total == 0 { 0.0 } else { min_ms },
        max_ms,
        early_exit_rate: if total == 0 { 0.0 } else { early_exits as f64 / total as f64 },
        cache_hit_rate: registry.get_cache_stats().hit_rate,
        correct_matches,
    };
    info!(
        detections = report.total_detections,
        avg_ms = report.avg_ms,
        early_exit_rate = report.early_exit_rate,
        "benchmark run complete"
    );
    report
}
