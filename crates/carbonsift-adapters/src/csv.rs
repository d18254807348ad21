//! CSV adapter
//!
//! Maps many header spellings onto four canonical fields (timestamp, model,
//! duration, emissions) through a case-insensitive alias table. Detection
//! grades malformed input instead of failing on it: damaged rows scale the
//! score down by the damaged fraction, and a truncated final row halves it
//! outright. Ingestion parses through the `csv` crate in flexible mode.

use crate::adapter::FormatAdapter;
use async_trait::async_trait;
use carbonsift_core::{
    CanonicalCsvRow, ConfidenceResult, CsvData, Error, NormalizedData, RawInput, Result,
    ScoreTrail,
};
use indexmap::IndexMap;

/// Canonical fields a CSV column can map to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CanonicalField {
    Timestamp,
    Model,
    Duration,
    Emissions,
}

/// Case-insensitive header alias table
const ALIASES: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::Timestamp,
        &["timestamp", "time", "date", "datetime", "created_at", "created", "recorded_at"],
    ),
    (
        CanonicalField::Model,
        &["model", "model_name", "ai_model", "llm", "model_id"],
    ),
    (
        CanonicalField::Duration,
        &["duration", "duration_seconds", "runtime", "elapsed", "time_taken", "seconds"],
    ),
    (
        CanonicalField::Emissions,
        &["emissions", "emissions_kg", "co2", "co2e", "co2_kg", "carbon", "carbon_kg"],
    ),
];

fn canonical_for(header: &str) -> Option<CanonicalField> {
    let needle = header.trim().trim_matches('"').to_lowercase();
    ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&needle.as_str()))
        .map(|(field, _)| *field)
}

/// Split one CSV line on commas, honoring double quotes.
/// Returns the cells and whether a quote was left unterminated.
fn split_row(line: &str) -> (Vec<String>, bool) {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                cells.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    cells.push(current.trim().to_string());

    (cells, in_quotes)
}

/// Adapter for comma-separated emission data
#[derive(Debug, Default)]
pub struct CsvAdapter;

impl CsvAdapter {
    /// Create a new CSV adapter
    pub fn new() -> Self {
        Self
    }

    fn parse_number(cell: &str, field: &str, row: usize) -> Result<f64> {
        cell.trim().trim_matches('"').parse().map_err(|_| {
            Error::validation(format!("{field} (row {row})"), "numeric value", cell)
        })
    }
}

#[async_trait]
impl FormatAdapter for CsvAdapter {
    fn name(&self) -> &str {
        "csv"
    }

    fn detect(&self, input: &RawInput) -> bool {
        let Some(text) = input.text() else {
            return false;
        };
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with('<') {
            return false;
        }
        let Some(header) = trimmed.lines().next() else {
            return false;
        };
        let (cells, _) = split_row(header);
        cells.len() >= 2 && cells.iter().any(|c| canonical_for(c).is_some())
    }

    async fn detect_confidence(&self, data: &[u8]) -> Result<ConfidenceResult> {
        let mut trail = ScoreTrail::new();

        let Ok(text) = std::str::from_utf8(data) else {
            return Ok(ConfidenceResult::zero(self.name(), "not UTF-8 text"));
        };

        let lines: Vec<&str> = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .collect();
        let Some(header_line) = lines.first() else {
            return Ok(ConfidenceResult::zero(self.name(), "empty input"));
        };

        let trimmed = header_line.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Ok(ConfidenceResult::zero(self.name(), "looks like JSON"));
        }
        if trimmed.starts_with('<') {
            return Ok(ConfidenceResult::zero(self.name(), "looks like markup"));
        }
        if !header_line.contains(',') {
            return Ok(ConfidenceResult::zero(self.name(), "no delimiter in header"));
        }

        let (headers, header_damaged) = split_row(header_line);
        trail.add(0.2, format!("delimited header with {} columns", headers.len()));

        let canonical_hits = {
            let mut seen = Vec::new();
            for h in &headers {
                if let Some(field) = canonical_for(h) {
                    if !seen.contains(&field) {
                        seen.push(field);
                    }
                }
            }
            seen.len()
        };
        if canonical_hits > 0 {
            trail.add(
                0.15 * canonical_hits as f64,
                format!("{canonical_hits} canonical column(s) recognized"),
            );
        } else {
            trail.note("no canonical columns; raw-row fallback applies");
        }

        let data_rows = &lines[1..];
        let mut damaged = 0usize;
        let mut numeric_cells = false;
        let mut last_truncated = false;

        for (i, line) in data_rows.iter().enumerate() {
            let (cells, unterminated) = split_row(line);
            if unterminated || cells.len() > headers.len() {
                damaged += 1;
            } else if cells.len() < headers.len() {
                damaged += 1;
                if i == data_rows.len() - 1 {
                    last_truncated = true;
                }
            }
            if cells.iter().any(|c| c.trim().parse::<f64>().is_ok()) {
                numeric_cells = true;
            }
        }

        if !data_rows.is_empty() && damaged == 0 {
            trail.add(0.15, "all rows match header column count");
        }
        if numeric_cells {
            trail.add(0.1, "numeric data cells present");
        }

        if header_damaged {
            trail.scale(0.5, "unterminated quote in header");
        }
        if damaged > 0 {
            let fraction = damaged as f64 / data_rows.len() as f64;
            trail.scale(
                1.0 - 0.5 * fraction,
                format!("{damaged}/{} damaged row(s)", data_rows.len()),
            );
        }
        if last_truncated {
            trail.scale(0.5, "final row truncated relative to header");
        }

        Ok(trail.finish(self.name()))
    }

    fn ingest(&self, input: &RawInput) -> Result<NormalizedData> {
        let text = input
            .text()
            .ok_or_else(|| Error::parse("input is not UTF-8 text"))?;

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| Error::parse(format!("invalid CSV header: {e}")))?
            .iter()
            .map(|h| h.to_string())
            .collect();
        if headers.len() < 2 {
            return Err(Error::parse("CSV requires a delimited header line"));
        }

        let mapping: Vec<Option<CanonicalField>> =
            headers.iter().map(|h| canonical_for(h)).collect();
        let any_canonical = mapping.iter().any(|m| m.is_some());

        if any_canonical {
            let mut rows = Vec::new();
            for (row_idx, record) in reader.records().enumerate() {
                let record =
                    record.map_err(|e| Error::parse(format!("invalid CSV row {row_idx}: {e}")))?;
                let mut row = CanonicalCsvRow {
                    timestamp: None,
                    model: None,
                    duration_seconds: None,
                    emissions_kg: None,
                };
                for (col, cell) in record.iter().enumerate() {
                    match mapping.get(col).copied().flatten() {
                        Some(CanonicalField::Timestamp) => row.timestamp = Some(cell.to_string()),
                        Some(CanonicalField::Model) => row.model = Some(cell.to_string()),
                        Some(CanonicalField::Duration) => {
                            row.duration_seconds =
                                Some(Self::parse_number(cell, "duration_seconds", row_idx)?)
                        }
                        Some(CanonicalField::Emissions) => {
                            row.emissions_kg =
                                Some(Self::parse_number(cell, "emissions_kg", row_idx)?)
                        }
                        None => {}
                    }
                }
                rows.push(row);
            }
            Ok(NormalizedData::Csv(CsvData::Canonical(rows)))
        } else {
            // No canonical columns at all: fall back to raw header→value rows.
            let mut rows = Vec::new();
            for (row_idx, record) in reader.records().enumerate() {
                let record =
                    record.map_err(|e| Error::parse(format!("invalid CSV row {row_idx}: {e}")))?;
                let mut row = IndexMap::new();
                for (col, header) in headers.iter().enumerate() {
                    row.insert(
                        header.clone(),
                        record.get(col).unwrap_or_default().to_string(),
                    );
                }
                rows.push(row);
            }
            Ok(NormalizedData::Csv(CsvData::Raw(rows)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_table_is_case_insensitive() {
        assert_eq!(canonical_for("Created_At"), Some(CanonicalField::Timestamp));
        assert_eq!(canonical_for("AI_MODEL"), Some(CanonicalField::Model));
        assert_eq!(canonical_for("runtime"), Some(CanonicalField::Duration));
        assert_eq!(canonical_for("co2"), Some(CanonicalField::Emissions));
        assert_eq!(canonical_for("comment"), None);
    }

    #[test]
    fn ingest_resolves_aliases_to_canonical_keys() {
        let adapter = CsvAdapter::new();
        let input = RawInput::from("time,ai_model,runtime,co2\n2024-05-01,gpt-4,12.5,0.034\n");
        assert!(adapter.detect(&input));
        let NormalizedData::Csv(CsvData::Canonical(rows)) = adapter.ingest(&input).unwrap() else {
            panic!("expected canonical rows");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp.as_deref(), Some("2024-05-01"));
        assert_eq!(rows[0].model.as_deref(), Some("gpt-4"));
        assert_eq!(rows[0].duration_seconds, Some(12.5));
        assert_eq!(rows[0].emissions_kg, Some(0.034));
    }

    #[test]
    fn ingest_falls_back_to_raw_rows() {
        let adapter = CsvAdapter::new();
        let input = RawInput::from("foo,bar\n1,2\n");
        let NormalizedData::Csv(CsvData::Raw(rows)) = adapter.ingest(&input).unwrap() else {
            panic!("expected raw rows");
        };
        assert_eq!(rows[0].get("foo").map(String::as_str), Some("1"));
        assert_eq!(rows[0].get("bar").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn truncated_final_row_scores_strictly_lower() {
        let adapter = CsvAdapter::new();
        let complete = b"time,ai_model,runtime,co2\n2024-05-01,gpt-4,12.5,0.034\n2024-05-02,gpt-4,8.0,0.021\n";
        let truncated = b"time,ai_model,runtime,co2\n2024-05-01,gpt-4,12.5,0.034\n2024-05-02,gpt-4\n";

        let full = adapter.detect_confidence(complete).await.unwrap();
        let cut = adapter.detect_confidence(truncated).await.unwrap();
        assert!(cut.score < full.score);
        assert!(cut.score > 0.0);
        assert!(cut.evidence.contains("final row truncated"));
    }

    #[tokio::test]
    async fn unterminated_quote_counts_as_damage() {
        let adapter = CsvAdapter::new();
        let damaged = b"time,model\n\"2024-05-01,gpt-4\n";
        let result = adapter.detect_confidence(damaged).await.unwrap();
        assert!(result.evidence.contains("damaged row"));
    }

    #[tokio::test]
    async fn json_text_scores_zero() {
        let adapter = CsvAdapter::new();
        let result = adapter
            .detect_confidence(br#"{"a": 1, "b": 2}"#)
            .await
            .unwrap();
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn ingest_names_bad_numeric_cell() {
        let adapter = CsvAdapter::new();
        let input = RawInput::from("time,co2\n2024-05-01,not-a-number\n");
        let err = adapter.ingest(&input).unwrap_err();
        assert!(err.to_string().contains("emissions_kg"));
    }
}
