//! End-to-end detection and ingestion tests over the default registry.

use carbonsift_adapters::fit;
use carbonsift_adapters::prelude::*;
use carbonsift_core::CsvData;

const CODECARBON: &str = r#"{"duration_seconds": 120.5, "emissions_kg": 0.034, "project_name": "train-run", "codecarbon_version": "2.3.4", "timestamp": "2024-05-01T10:00:00Z"}"#;
const AI_USAGE: &str = r#"{"model": "gpt-x", "tokens": {"prompt": 100, "completion": 50, "total": 150}, "energy_per_token": 0.000002}"#;
const GENERIC_JSON: &str = r#"{"emissions": 0.5, "energy": 1.2, "duration": 300}"#;
const CSV_SAMPLE: &str = "timestamp,model,duration,emissions\n2024-05-01T10:00:00Z,gpt-x,120.5,0.034\n2024-05-01T11:00:00Z,gpt-x,60.0,0.017\n";
const XML_SAMPLE: &str = "<?xml version=\"1.0\"?>\n<emission_report>\n  <co2_kg>0.034</co2_kg>\n  <duration>120</duration>\n</emission_report>";
const UNKNOWN: &str = "this is not a known format: 12345";

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

#[tokio::test]
async fn rankings_are_sorted_and_bounded() {
    init_tracing();
    let registry = default_registry().unwrap();
    let result = registry
        .detect_format_with_confidence(CODECARBON.as_bytes())
        .await;

    assert_eq!(result.confidences.len(), registry.len());
    for c in &result.confidences {
        assert!((0.0..=1.0).contains(&c.score), "{}: {}", c.adapter, c.score);
    }
    for pair in result.confidences.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn best_match_requires_positive_score() {
    let registry = default_registry().unwrap();

    let recognized = registry
        .detect_format_with_confidence(CODECARBON.as_bytes())
        .await;
    assert!(recognized.best_match.is_some());
    assert!(recognized.unrecognized_reason.is_none());

    let unrecognized = registry
        .detect_format_with_confidence(UNKNOWN.as_bytes())
        .await;
    assert!(unrecognized.best_match.is_none());
    assert!(unrecognized.unrecognized_reason.is_some());
    assert!(unrecognized.confidences.iter().all(|c| c.score == 0.0));
}

#[tokio::test]
async fn detection_is_deterministic() {
    let registry = default_registry().unwrap();
    let first = registry
        .detect_format_with_confidence(GENERIC_JSON.as_bytes())
        .await;
    let second = registry
        .detect_format_with_confidence(GENERIC_JSON.as_bytes())
        .await;

    assert_eq!(first.best_match, second.best_match);
    let scores = |r: &carbonsift_core::DetectionResult| {
        r.confidences
            .iter()
            .map(|c| (c.adapter.clone(), c.score))
            .collect::<Vec<_>>()
    };
    assert_eq!(scores(&first), scores(&second));
}

#[tokio::test]
async fn specialized_dialect_outranks_generic_json() {
    let registry = default_registry().unwrap();

    let result = registry
        .detect_format_with_confidence(CODECARBON.as_bytes())
        .await;
    assert_eq!(result.best_match.as_deref(), Some("codecarbon"));

    let result = registry
        .detect_format_with_confidence(AI_USAGE.as_bytes())
        .await;
    assert_eq!(result.best_match.as_deref(), Some("ai-usage"));

    // Without dialect markers the generic adapter wins instead.
    let result = registry
        .detect_format_with_confidence(GENERIC_JSON.as_bytes())
        .await;
    assert_eq!(result.best_match.as_deref(), Some("json"));
}

#[tokio::test]
async fn every_format_detects_then_ingests() {
    let registry = default_registry().unwrap();
    let fit_buffer = fit::build_test_buffer();
    let samples: Vec<(RawInput, &str)> = vec![
        (RawInput::from(CODECARBON), "codecarbon"),
        (RawInput::from(AI_USAGE), "ai-usage"),
        (RawInput::from(CSV_SAMPLE), "csv"),
        (RawInput::from(XML_SAMPLE), "xml"),
        (RawInput::from(fit_buffer), "fit"),
        (RawInput::from(GENERIC_JSON), "json"),
    ];

    for (input, expected) in samples {
        let detected = registry.detect_format(&input);
        assert_eq!(detected.as_deref(), Some(expected));
        registry
            .ingest(&input)
            .unwrap_or_else(|e| panic!("{expected} ingest failed: {e}"));
    }
}

#[tokio::test]
async fn csv_aliases_map_to_canonical_fields() {
    let registry = default_registry().unwrap();
    let sample = "time,ai_model,runtime,co2\n2024-05-01,gpt-x,120.5,0.034\n";

    let result = registry.detect_format_with_confidence(sample.as_bytes()).await;
    assert_eq!(result.best_match.as_deref(), Some("csv"));

    let NormalizedData::Csv(CsvData::Canonical(rows)) =
        registry.ingest(&RawInput::from(sample)).unwrap()
    else {
        panic!("expected canonical csv rows");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp.as_deref(), Some("2024-05-01"));
    assert_eq!(rows[0].model.as_deref(), Some("gpt-x"));
    assert_eq!(rows[0].duration_seconds, Some(120.5));
    assert_eq!(rows[0].emissions_kg, Some(0.034));
}

#[tokio::test]
async fn ai_usage_ingest_computes_emissions_and_band() {
    let registry = default_registry().unwrap();
    let NormalizedData::AiUsage(record) = registry.ingest(&RawInput::from(AI_USAGE)).unwrap()
    else {
        panic!("expected ai-usage record");
    };
    assert_eq!(record.tokens.total, 150);
    let expected = 150.0 * 0.000002;
    assert!((record.emissions - expected).abs() < 1e-12);
    assert!(record.confidence.low < record.emissions);
    assert!(record.confidence.high > record.emissions);
}

#[tokio::test]
async fn fit_ingest_reports_frame_boundaries() {
    let registry = default_registry().unwrap();
    let input = RawInput::from(fit::build_test_buffer());
    let NormalizedData::Fit(summary) = registry.ingest(&input).unwrap() else {
        panic!("expected fit summary");
    };
    assert!(summary.checksum_valid);
    assert_eq!(summary.records.len(), 2);
}

#[tokio::test]
async fn schema_validation_scores_exact_and_partial() {
    let registry = default_registry().unwrap();
    let schema = registry.get("schema").unwrap();

    let exact = r#"{"emissions": 0.5, "timestamp": "2024-05-01T10:00:00Z", "source": "grid", "duration": 120}"#;
    let result = schema.detect_confidence(exact.as_bytes()).await.unwrap();
    assert_eq!(result.score, 1.0);

    let partial = r#"{"emissions": "not-a-number", "timestamp": "2024-05-01T10:00:00Z"}"#;
    let result = schema.detect_confidence(partial.as_bytes()).await.unwrap();
    assert!(result.score > 0.0);
    assert!(result.score < 1.0);
}

#[tokio::test]
async fn cached_detection_matches_uncached() {
    let registry = OptimizedRegistry::with_defaults(default_registry().unwrap());

    let first = registry.detect_format_optimized(CSV_SAMPLE.as_bytes()).await;
    let second = registry.detect_format_optimized(CSV_SAMPLE.as_bytes()).await;

    assert_eq!(first.detection.best_match, second.detection.best_match);
    let top = |r: &carbonsift_adapters::OptimizedDetectionResult| {
        r.detection.confidences.first().map(|c| (c.adapter.clone(), c.score))
    };
    assert_eq!(top(&first), top(&second));

    let stats = registry.get_cache_stats();
    assert!(stats.hits >= 1, "second pass should hit the cache");
}

#[tokio::test]
async fn early_exit_preserves_best_match() {
    let baseline = default_registry().unwrap();
    let optimized = OptimizedRegistry::with_defaults(default_registry().unwrap());

    for sample in [CODECARBON, AI_USAGE, CSV_SAMPLE, XML_SAMPLE, GENERIC_JSON] {
        let full = baseline.detect_format_with_confidence(sample.as_bytes()).await;
        let fast = optimized.detect_format_optimized(sample.as_bytes()).await;
        assert_eq!(full.best_match, fast.detection.best_match, "sample: {sample}");
    }
}
