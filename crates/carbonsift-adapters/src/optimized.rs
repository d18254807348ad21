//! Optimized registry / detection scheduler
//!
//! Wraps the adapter registry with a signature cache, per-adapter timing,
//! an early-exit short-circuit, and a cooperative global time budget.
//!
//! Two execution modes are supported as configuration: the default
//! early-exit mode runs adapters sequentially and stops once a score meets
//! the threshold, saving work on easy inputs at the cost of a complete
//! ranking; parallel mode fans out every adapter for complete rankings but
//! cannot exit early. The time-budget check is cooperative, evaluated
//! between adapter invocations, never preemptive.

use crate::registry::{rank, AdapterRegistry};
use bytes::Bytes;
use carbonsift_core::{
    CacheConfig, CacheStats, ConfidenceResult, DetectionResult, SignatureCache,
};
use futures::future::join_all;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the optimized detection path
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// Run adapters sequentially and stop once a score meets the threshold.
    /// When false, all adapters run as a parallel fan-out instead.
    pub enable_early_exit: bool,

    /// Score at which remaining adapters are skipped (early-exit mode)
    pub early_exit_threshold: f64,

    /// Consult and populate the signature cache
    pub enable_caching: bool,

    /// Keep per-adapter timing entries in the result
    pub enable_detailed_timing: bool,

    /// Cooperative global detection budget in milliseconds
    pub max_detection_time_ms: u64,

    /// Signature cache configuration
    pub cache: CacheConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            enable_early_exit: true,
            early_exit_threshold: 0.95,
            enable_caching: true,
            enable_detailed_timing: true,
            max_detection_time_ms: 5000,
            cache: CacheConfig::default(),
        }
    }
}

/// Cache disposition for one adapter invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheStatus {
    /// Result came from the cache; the adapter was not invoked
    Hit,
    /// Adapter was invoked; the result may have been admitted to the cache
    Miss,
    /// Caching was disabled or bypassed for this payload
    Disabled,
}

/// Timing entry for one adapter within a detection call
#[derive(Debug, Clone, Serialize)]
pub struct AdapterTiming {
    /// Adapter name
    pub adapter: String,
    /// Wall-clock milliseconds spent (0.0 for cache hits)
    pub duration_ms: f64,
    /// Cache disposition
    pub cache_status: CacheStatus,
    /// Resulting score
    pub score: f64,
}

/// Detection result with scheduler diagnostics
#[derive(Debug, Clone)]
pub struct OptimizedDetectionResult {
    /// The ranked detection outcome
    pub detection: DetectionResult,
    /// Per-adapter timing, sorted by score descending
    pub timings: Vec<AdapterTiming>,
    /// Whether remaining adapters were skipped by the early-exit threshold
    pub early_exited: bool,
    /// Whether remaining adapters were skipped by the time budget
    pub timed_out: bool,
    /// Total detection wall-clock milliseconds
    pub total_ms: f64,
}

/// Aggregate performance counters exported for diagnostics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PerformanceMetrics {
    /// Detection calls served
    pub detections: u64,
    /// Calls that stopped on the early-exit threshold
    pub early_exits: u64,
    /// Calls that stopped on the time budget
    pub timeouts: u64,
    /// Cumulative detection time in milliseconds
    pub total_detection_ms: f64,
    /// Mean detection time in milliseconds
    pub avg_detection_ms: f64,
    /// Signature cache statistics
    pub cache: CacheStats,
}

/// Summary statistics from a repeated-detection micro-benchmark
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BenchmarkStats {
    /// Number of iterations measured
    pub iterations: usize,
    /// Mean detection time in milliseconds
    pub avg_ms: f64,
    /// Fastest iteration in milliseconds
    pub min_ms: f64,
    /// Slowest iteration in milliseconds
    pub max_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    detections: u64,
    early_exits: u64,
    timeouts: u64,
    total_detection_ms: f64,
}

/// Adapter registry wrapped with caching and scheduling optimizations
pub struct OptimizedRegistry {
    registry: AdapterRegistry,
    config: OptimizationConfig,
    cache: Mutex<SignatureCache>,
    counters: Mutex<Counters>,
}

impl OptimizedRegistry {
    /// Wrap a registry with the given optimization configuration
    pub fn new(registry: AdapterRegistry, config: OptimizationConfig) -> Self {
        let cache = Mutex::new(SignatureCache::new(config.cache.clone()));
        Self {
            registry,
            config,
            cache,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Wrap a registry with default optimizations
    pub fn with_defaults(registry: AdapterRegistry) -> Self {
        Self::new(registry, OptimizationConfig::default())
    }

    /// Access the wrapped registry
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Current optimization configuration
    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Replace the optimization configuration. Cached entries survive; the
    /// new cache limits apply from the next insert.
    pub fn update_optimization_config(&mut self, config: OptimizationConfig) {
        self.cache.lock().configure(config.cache.clone());
        self.config = config;
    }

    /// Run detection with caching, early exit, and the time budget applied
    pub async fn detect_format_optimized(&self, data: &[u8]) -> OptimizedDetectionResult {
        let start = Instant::now();
        let budget = Duration::from_millis(self.config.max_detection_time_ms);

        let mut result = if self.config.enable_early_exit {
            self.detect_sequential(data, start, budget).await
        } else {
            self.detect_parallel(data).await
        };

        let total_ms = start.elapsed().as_secs_f64() * 1000.0;
        result.total_ms = total_ms;
        result
            .timings
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if !self.config.enable_detailed_timing {
            result.timings.clear();
        }

        {
            let mut counters = self.counters.lock();
            counters.detections += 1;
            counters.total_detection_ms += total_ms;
            if result.early_exited {
                counters.early_exits += 1;
            }
            if result.timed_out {
                counters.timeouts += 1;
            }
        }
        counter!("carbonsift_detections_total").increment(1);
        histogram!("carbonsift_detection_duration_ms").record(total_ms);
        if result.early_exited {
            counter!("carbonsift_early_exits_total").increment(1);
        }

        result
    }

    /// Sequential early-exit mode
    async fn detect_sequential(
        &self,
        data: &[u8],
        start: Instant,
        budget: Duration,
    ) -> OptimizedDetectionResult {
        let mut confidences = Vec::new();
        let mut timings = Vec::new();
        let mut early_exited = false;
        let mut timed_out = false;

        let total = self.registry.len();
        for (idx, (name, adapter)) in self.registry.iter().enumerate() {
            let (result, timing) = self.run_one(name, adapter.clone(), data).await;
            let score = result.score;
            confidences.push(result);
            timings.push(timing);

            if score >= self.config.early_exit_threshold {
                debug!(adapter = name, score, "early exit threshold met");
                early_exited = true;
                break;
            }
            // A timeout only means something while adapters remain unskipped.
            if idx + 1 < total && start.elapsed() > budget {
                debug!(elapsed_ms = start.elapsed().as_millis() as u64, "detection budget exceeded");
                timed_out = true;
                break;
            }
        }

        OptimizedDetectionResult {
            detection: rank(confidences),
            timings,
            early_exited,
            timed_out,
            total_ms: 0.0,
        }
    }

    /// Parallel fan-out mode: complete rankings, no early exit. Cache hits
    /// are still skipped; only misses are invoked concurrently.
    async fn detect_parallel(&self, data: &[u8]) -> OptimizedDetectionResult {
        let mut confidences = Vec::new();
        let mut timings = Vec::new();
        let mut to_run = Vec::new();

        for (name, adapter) in self.registry.iter() {
            match self.cache_lookup(name, data) {
                Some(cached) => {
                    timings.push(AdapterTiming {
                        adapter: name.to_string(),
                        duration_ms: 0.0,
                        cache_status: CacheStatus::Hit,
                        score: cached.score,
                    });
                    confidences.push(cached);
                }
                None => to_run.push((name.to_string(), adapter.clone())),
            }
        }

        let futures: Vec<_> = to_run
            .into_iter()
            .map(|(name, adapter)| async move {
                let invoke_start = Instant::now();
                let result = match adapter.detect_confidence(data).await {
                    Ok(r) => r.clamped(),
                    Err(e) => ConfidenceResult::zero(&name, format!("adapter fault: {e}")),
                };
                let duration_ms = invoke_start.elapsed().as_secs_f64() * 1000.0;
                (name, result, duration_ms)
            })
            .collect();

        for (name, result, duration_ms) in join_all(futures).await {
            let cache_status = self.cache_admit(&name, data, &result);
            timings.push(AdapterTiming {
                adapter: name,
                duration_ms,
                cache_status,
                score: result.score,
            });
            confidences.push(result);
        }

        OptimizedDetectionResult {
            detection: rank(confidences),
            timings,
            early_exited: false,
            timed_out: false,
            total_ms: 0.0,
        }
    }

    /// Run one adapter with cache consultation and admission
    async fn run_one(
        &self,
        name: &str,
        adapter: Arc<dyn crate::adapter::FormatAdapter>,
        data: &[u8],
    ) -> (ConfidenceResult, AdapterTiming) {
        if let Some(cached) = self.cache_lookup(name, data) {
            let timing = AdapterTiming {
                adapter: name.to_string(),
                duration_ms: 0.0,
                cache_status: CacheStatus::Hit,
                score: cached.score,
            };
            return (cached, timing);
        }

        let invoke_start = Instant::now();
        let result = match adapter.detect_confidence(data).await {
            Ok(r) => r.clamped(),
            Err(e) => ConfidenceResult::zero(name, format!("adapter fault: {e}")),
        };
        let duration_ms = invoke_start.elapsed().as_secs_f64() * 1000.0;

        let cache_status = self.cache_admit(name, data, &result);
        let timing = AdapterTiming {
            adapter: name.to_string(),
            duration_ms,
            cache_status,
            score: result.score,
        };
        (result, timing)
    }

    fn cache_lookup(&self, name: &str, data: &[u8]) -> Option<ConfidenceResult> {
        if !self.config.enable_caching {
            return None;
        }
        self.cache.lock().get(name, data)
    }

    fn cache_admit(&self, name: &str, data: &[u8], result: &ConfidenceResult) -> CacheStatus {
        if !self.config.enable_caching {
            return CacheStatus::Disabled;
        }
        self.cache.lock().insert(name, data, result.clone());
        CacheStatus::Miss
    }

    /// Signature cache statistics
    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Drop all cached results
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Aggregate performance counters plus cache statistics
    pub fn export_performance_metrics(&self) -> PerformanceMetrics {
        let counters = self.counters.lock();
        PerformanceMetrics {
            detections: counters.detections,
            early_exits: counters.early_exits,
            timeouts: counters.timeouts,
            total_detection_ms: counters.total_detection_ms,
            avg_detection_ms: if counters.detections == 0 {
                0.0
            } else {
                counters.total_detection_ms / counters.detections as f64
            },
            cache: self.cache.lock().stats(),
        }
    }

    /// Pre-populate the cache by classifying representative samples
    pub async fn warmup_cache(&self, samples: &[Bytes]) {
        for sample in samples {
            let _ = self.detect_format_optimized(sample).await;
        }
    }

    /// Measure repeated detection of one payload
    pub async fn benchmark_detection(&self, data: &[u8], iterations: usize) -> BenchmarkStats {
        let mut times = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let start = Instant::now();
            let _ = self.detect_format_optimized(data).await;
            times.push(start.elapsed().as_secs_f64() * 1000.0);
        }

        let (mut min_ms, mut max_ms, mut sum) = (f64::INFINITY, 0.0f64, 0.0);
        for &t in &times {
            min_ms = min_ms.min(t);
            max_ms = max_ms.max(t);
            sum += t;
        }

        BenchmarkStats {
            iterations,
            avg_ms: if times.is_empty() { 0.0 } else { sum / times.len() as f64 },
            min_ms: if times.is_empty() { 0.0 } else { min_ms },
            max_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;
    use async_trait::async_trait;
    use carbonsift_core::{Error, NormalizedData, RawInput, Result};

    struct SlowAdapter(&'static str);

    #[async_trait]
    impl crate::adapter::FormatAdapter for SlowAdapter {
        fn name(&self) -> &str {
            self.0
        }
        fn detect(&self, _input: &RawInput) -> bool {
            false
        }
        async fn detect_confidence(&self, _data: &[u8]) -> Result<ConfidenceResult> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(ConfidenceResult {
                adapter: self.0.to_string(),
                score: 0.2,
                evidence: "deliberately slow".to_string(),
            })
        }
        fn ingest(&self, _input: &RawInput) -> Result<NormalizedData> {
            Err(Error::UnknownFormat)
        }
    }

    fn slow_registry(names: &[&'static str]) -> OptimizedRegistry {
        let mut registry = AdapterRegistry::new();
        for name in names {
            registry.register_adapter(*name, Arc::new(SlowAdapter(name)));
        }
        OptimizedRegistry::new(
            registry,
            OptimizationConfig {
                max_detection_time_ms: 1,
                ..OptimizationConfig::default()
            },
        )
    }

    const CODECARBON: &[u8] = br#"{"duration_seconds": 120.5, "emissions_kg": 0.034, "project_name": "train-run", "codecarbon_version": "2.3.4", "timestamp": "2024-05-01T10:00:00Z"}"#;

    fn optimized() -> OptimizedRegistry {
        OptimizedRegistry::with_defaults(default_registry().unwrap())
    }

    #[tokio::test]
    async fn early_exit_skips_remaining_adapters() {
        let registry = optimized();
        let result = registry.detect_format_optimized(CODECARBON).await;
        assert!(result.early_exited);
        // codecarbon registers first and clears the 0.95 threshold alone.
        assert!(result.timings.len() < registry.registry().len());
        assert_eq!(result.detection.best_match.as_deref(), Some("codecarbon"));
    }

    #[tokio::test]
    async fn exhausted_budget_skips_remaining_adapters() {
        let registry = slow_registry(&["slow-a", "slow-b", "slow-c"]);
        let result = registry.detect_format_optimized(b"payload").await;

        // Each adapter takes ~20x the 1ms budget, so only the first runs.
        assert!(result.timed_out);
        assert!(!result.early_exited);
        assert!(result.detection.confidences.len() < registry.registry().len());
    }

    #[tokio::test]
    async fn budget_exceeded_on_final_adapter_is_not_a_timeout() {
        let registry = slow_registry(&["slow-only"]);
        let result = registry.detect_format_optimized(b"payload").await;

        // Nothing was skipped, so the slow call does not count as a timeout.
        assert!(!result.timed_out);
        assert_eq!(result.detection.confidences.len(), 1);
    }

    #[tokio::test]
    async fn parallel_mode_ranks_every_adapter() {
        let mut registry = optimized();
        registry.update_optimization_config(OptimizationConfig {
            enable_early_exit: false,
            ..OptimizationConfig::default()
        });
        let result = registry.detect_format_optimized(CODECARBON).await;
        assert!(!result.early_exited);
        assert_eq!(result.detection.confidences.len(), registry.registry().len());
    }

    #[tokio::test]
    async fn second_call_hits_cache() {
        let registry = optimized();
        let first = registry.detect_format_optimized(CODECARBON).await;
        let second = registry.detect_format_optimized(CODECARBON).await;

        assert_eq!(first.detection.best_match, second.detection.best_match);
        assert!(second
            .timings
            .iter()
            .any(|t| t.cache_status == CacheStatus::Hit));
        assert!(registry.get_cache_stats().hits >= 1);
    }

    #[tokio::test]
    async fn timings_are_sorted_by_score() {
        let mut registry = optimized();
        registry.update_optimization_config(OptimizationConfig {
            enable_early_exit: false,
            ..OptimizationConfig::default()
        });
        let result = registry.detect_format_optimized(CODECARBON).await;
        for pair in result.timings.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn disabled_timing_clears_entries() {
        let mut registry = optimized();
        registry.update_optimization_config(OptimizationConfig {
            enable_detailed_timing: false,
            ..OptimizationConfig::default()
        });
        let result = registry.detect_format_optimized(CODECARBON).await;
        assert!(result.timings.is_empty());
    }

    #[tokio::test]
    async fn metrics_accumulate() {
        let registry = optimized();
        registry.detect_format_optimized(CODECARBON).await;
        registry.detect_format_optimized(b"garbage input").await;

        let metrics = registry.export_performance_metrics();
        assert_eq!(metrics.detections, 2);
        assert!(metrics.avg_detection_ms >= 0.0);
    }

    #[tokio::test]
    async fn warmup_populates_cache() {
        let registry = optimized();
        registry
            .warmup_cache(&[Bytes::from_static(CODECARBON)])
            .await;
        assert!(registry.get_cache_stats().size > 0);
    }

    #[tokio::test]
    async fn benchmark_reports_timing_envelope() {
        let registry = optimized();
        let stats = registry.benchmark_detection(CODECARBON, 5).await;
        assert_eq!(stats.iterations, 5);
        assert!(stats.min_ms <= stats.avg_ms);
        assert!(stats.avg_ms <= stats.max_ms);
    }
}
