//! Adapter registry
//!
//! Owns the set of named format adapters and performs ingestion dispatch.
//! Two lookup paths are exposed: the legacy synchronous first-match path
//! over decoded input, and the enhanced ranked-confidence path that fans
//! out every adapter's scorer over a byte buffer and tolerates individual
//! adapter faults by converting them to zero-score results.

use crate::adapter::FormatAdapter;
use crate::ai_usage::AiUsageAdapter;
use crate::codecarbon::CodeCarbonAdapter;
use crate::csv::CsvAdapter;
use crate::fit::FitAdapter;
use crate::json::GenericJsonAdapter;
use crate::schema::SchemaAdapter;
use crate::xml::XmlAdapter;
use bytes::Bytes;
use carbonsift_core::{ConfidenceResult, DetectionResult, Error, NormalizedData, RawInput, Result};
use futures::future::join_all;
use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered registry of named format adapters
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: IndexMap<String, Arc<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under a name. Reusing a name silently replaces
    /// the previous adapter.
    pub fn register_adapter(&mut self, name: impl Into<String>, adapter: Arc<dyn FormatAdapter>) {
        let name = name.into();
        debug!(adapter = %name, "registering adapter");
        self.adapters.insert(name, adapter);
    }

    /// Get an adapter by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn FormatAdapter>> {
        self.adapters.get(name)
    }

    /// Registered adapter names, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Iterate over (name, adapter) pairs in registration order
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn FormatAdapter>)> {
        self.adapters.iter().map(|(n, a)| (n.as_str(), a))
    }

    /// Legacy single-match path: run each adapter's cheap `detect` in
    /// registration order and return the first match. Deliberately simple
    /// and order-sensitive.
    pub fn detect_format(&self, input: &RawInput) -> Option<String> {
        self.adapters
            .iter()
            .find(|(_, adapter)| adapter.detect(input))
            .map(|(name, _)| name.clone())
    }

    /// Enhanced path: score the buffer against every adapter concurrently
    /// and rank the results. Individual adapter faults become zero-score
    /// results; they never abort the call.
    pub async fn detect_format_with_confidence(&self, data: &[u8]) -> DetectionResult {
        let futures: Vec<_> = self
            .adapters
            .iter()
            .map(|(name, adapter)| {
                let name = name.clone();
                let adapter = Arc::clone(adapter);
                async move {
                    match adapter.detect_confidence(data).await {
                        Ok(result) => result.clamped(),
                        Err(e) => {
                            ConfidenceResult::zero(name, format!("adapter fault: {e}"))
                        }
                    }
                }
            })
            .collect();

        let confidences = join_all(futures).await;
        rank(confidences)
    }

    /// Buffer a byte stream fully, then classify it. No partial-buffer
    /// classification is attempted.
    pub async fn detect_stream<S>(&self, mut stream: S) -> Result<DetectionResult>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    {
        let mut buffer = Vec::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk.map_err(Error::Io)?);
        }
        Ok(self.detect_format_with_confidence(&buffer).await)
    }

    /// Resolve the format via the legacy path and delegate ingestion to the
    /// matching adapter.
    pub fn ingest(&self, input: &RawInput) -> Result<NormalizedData> {
        let name = self.detect_format(input).ok_or(Error::UnknownFormat)?;
        let adapter = self.adapters.get(&name).expect("name came from the map");
        adapter.ingest(input)
    }
}

/// Sort descending by score (ties broken by adapter name for determinism)
/// and derive the best match.
pub(crate) fn rank(mut confidences: Vec<ConfidenceResult>) -> DetectionResult {
    confidences.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.adapter.cmp(&b.adapter))
    });

    let best_match = confidences
        .first()
        .filter(|top| top.score > 0.0)
        .map(|top| top.adapter.clone());

    let unrecognized_reason = if best_match.is_none() {
        Some("no adapter scored above zero for this input".to_string())
    } else {
        None
    };

    DetectionResult {
        best_match,
        confidences,
        unrecognized_reason,
    }
}

/// Build a registry pre-populated with all built-in adapters.
///
/// Specialized JSON dialects register ahead of the generic JSON adapter so
/// the order-sensitive legacy path resolves them first. The returned value
/// is owned by the caller; there is no ambient global registry.
pub fn default_registry() -> Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    registry.register_adapter("codecarbon", Arc::new(CodeCarbonAdapter::new()));
    registry.register_adapter("ai-usage", Arc::new(AiUsageAdapter::new()));
    registry.register_adapter("schema", Arc::new(SchemaAdapter::with_default_schemas()));
    registry.register_adapter("csv", Arc::new(CsvAdapter::new()));
    registry.register_adapter("xml", Arc::new(XmlAdapter::new()?));
    registry.register_adapter("fit", Arc::new(FitAdapter::new()));
    registry.register_adapter("json", Arc::new(GenericJsonAdapter::new()));
    info!(adapters = registry.len(), "default registry initialized");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FailingAdapter;

    #[async_trait]
    impl FormatAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }
        fn detect(&self, _input: &RawInput) -> bool {
            false
        }
        async fn detect_confidence(&self, _data: &[u8]) -> Result<ConfidenceResult> {
            Err(Error::internal("synthetic fault"))
        }
        fn ingest(&self, _input: &RawInput) -> Result<NormalizedData> {
            Err(Error::UnknownFormat)
        }
    }

    #[test]
    fn registration_order_drives_legacy_detection() {
        let registry = default_registry().unwrap();
        // A CodeCarbon payload is also a JSON object; the specialized
        // adapter must win because it registered first.
        let input = RawInput::from(
            r#"{"duration_seconds": 10, "emissions_kg": 0.2, "project_name": "demo"}"#,
        );
        assert_eq!(registry.detect_format(&input).as_deref(), Some("codecarbon"));
    }

    #[test]
    fn reregistration_overwrites_silently() {
        let mut registry = AdapterRegistry::new();
        registry.register_adapter("a", Arc::new(GenericJsonAdapter::new()));
        registry.register_adapter("a", Arc::new(CsvAdapter::new()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_format_error_on_ingest() {
        let registry = default_registry().unwrap();
        let input = RawInput::from("this is not a known format: 12345");
        let err = registry.ingest(&input).unwrap_err();
        assert!(matches!(err, Error::UnknownFormat));
    }

    #[tokio::test]
    async fn adapter_fault_becomes_zero_score() {
        let mut registry = AdapterRegistry::new();
        registry.register_adapter("failing", Arc::new(FailingAdapter));
        registry.register_adapter("json", Arc::new(GenericJsonAdapter::new()));

        let result = registry
            .detect_format_with_confidence(br#"{"emissions": 1.0}"#)
            .await;
        assert_eq!(result.best_match.as_deref(), Some("json"));
        let failing = result
            .confidences
            .iter()
            .find(|c| c.adapter == "failing")
            .unwrap();
        assert_eq!(failing.score, 0.0);
        assert!(failing.evidence.contains("synthetic fault"));
    }

    #[tokio::test]
    async fn stream_input_is_fully_buffered() {
        let registry = default_registry().unwrap();
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"{\"emissions\": 0.5,")),
            Ok(Bytes::from_static(b" \"duration\": 2, \"energy\": 1.1}")),
        ];
        let stream = futures::stream::iter(chunks);
        let result = registry.detect_stream(stream).await.unwrap();
        assert_eq!(result.best_match.as_deref(), Some("json"));
    }
}
