//! XML adapter
//!
//! A placeholder structural parser, not a full XML reader: it extracts a
//! single root element and one flat level of non-nested child elements as
//! key/value text. Nested structures degrade to raw text. Scoring rewards
//! declaration presence, tag balance, namespace hints, and
//! emission-vocabulary tag names; HTML-like markup and unterminated tags
//! apply multiplicative penalties.

use crate::adapter::FormatAdapter;
use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use carbonsift_core::{
    ConfidenceResult, Error, NormalizedData, RawInput, Result, ScoreTrail, XmlDocument,
};
use indexmap::IndexMap;
use regex::Regex;

/// Adapter for XML emission data
#[derive(Debug)]
pub struct XmlAdapter {
    open_tag: Regex,
    vocabulary: AhoCorasick,
}

impl XmlAdapter {
    /// Create a new XML adapter
    pub fn new() -> Result<Self> {
        let open_tag = Regex::new(r"<([A-Za-z_][A-Za-z0-9_.:-]*)(\s[^<>]*)?>")
            .map_err(|e| Error::internal(format!("failed to compile tag regex: {e}")))?;
        let vocabulary = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build([
                "emission", "co2", "carbon", "energy", "duration", "footprint", "kwh",
            ])
            .map_err(|e| Error::internal(format!("failed to build vocabulary matcher: {e}")))?;
        Ok(Self {
            open_tag,
            vocabulary,
        })
    }

    /// Extract the root element name. The declaration (`<?xml`) never
    /// matches the tag pattern, so the first match is the root.
    fn root_name<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.open_tag
            .captures(text)
            .map(|c| c.get(1).unwrap().as_str())
    }

    /// Parse one flat level of children inside the root element.
    /// Nested content stays as raw text in the value.
    fn parse_children(&self, inner: &str) -> IndexMap<String, String> {
        let mut fields = IndexMap::new();
        let mut rest = inner;

        while let Some(caps) = self.open_tag.captures(rest) {
            let whole = caps.get(0).unwrap();
            let name = caps.get(1).unwrap().as_str();
            let after = &rest[whole.end()..];

            let close = format!("</{name}>");
            match after.find(&close) {
                Some(pos) => {
                    fields.insert(name.to_string(), after[..pos].trim().to_string());
                    rest = &after[pos + close.len()..];
                }
                None => {
                    // Unclosed child: keep what we have and stop.
                    break;
                }
            }
        }

        fields
    }
}

#[async_trait]
impl FormatAdapter for XmlAdapter {
    fn name(&self) -> &str {
        "xml"
    }

    fn detect(&self, input: &RawInput) -> bool {
        let Some(text) = input.text() else {
            return false;
        };
        let trimmed = text.trim_start();
        trimmed.starts_with("<?xml") || (trimmed.starts_with('<') && text.contains("</"))
    }

    async fn detect_confidence(&self, data: &[u8]) -> Result<ConfidenceResult> {
        let mut trail = ScoreTrail::new();

        let Ok(text) = std::str::from_utf8(data) else {
            return Ok(ConfidenceResult::zero(self.name(), "not UTF-8 text"));
        };

        let trimmed = text.trim();
        if !trimmed.starts_with('<') {
            return Ok(ConfidenceResult::zero(self.name(), "no leading angle bracket"));
        }

        if trimmed.starts_with("<?xml") {
            trail.add(0.2, "XML declaration present");
        }

        if self.root_name(trimmed).is_some() {
            trail.add(0.2, "root element found");
        }

        let opens = self
            .open_tag
            .captures_iter(trimmed)
            .filter(|c| !c.get(0).unwrap().as_str().ends_with("/>"))
            .count();
        let closes = trimmed.matches("</").count();
        if opens > 0 && opens == closes {
            trail.add(0.3, format!("{opens} open tag(s) balanced by closing tags"));
        } else if opens > 0 {
            trail.note(format!("tag imbalance: {opens} open, {closes} closed"));
        }

        if trimmed.contains("xmlns") || trimmed.contains("xsi:") || trimmed.contains("schemaLocation")
        {
            trail.add(0.1, "namespace/schema hints present");
        }

        if self.vocabulary.find_iter(trimmed).count() > 0 {
            trail.add(0.2, "emission vocabulary in tag names");
        }

        let lower = trimmed.to_lowercase();
        if lower.contains("<!doctype html")
            || lower.contains("<html")
            || lower.contains("<body")
            || lower.contains("<div")
        {
            trail.scale(0.3, "HTML-like markup");
        }

        // A '<' after the final '>' means the last tag never terminated.
        let last_open = trimmed.rfind('<').unwrap_or(0);
        let last_close = trimmed.rfind('>').unwrap_or(0);
        if last_open > last_close {
            trail.scale(0.5, "unterminated trailing tag");
        }

        Ok(trail.finish(self.name()))
    }

    fn ingest(&self, input: &RawInput) -> Result<NormalizedData> {
        let text = input
            .text()
            .ok_or_else(|| Error::parse("input is not UTF-8 text"))?;
        let trimmed = text.trim();

        let declaration = trimmed.starts_with("<?xml");

        let caps = self
            .open_tag
            .captures(trimmed)
            .ok_or_else(|| Error::parse("no root element found"))?;

        let root = caps.get(1).unwrap().as_str().to_string();
        let body_start = caps.get(0).unwrap().end();
        let close = format!("</{root}>");
        let inner = match trimmed[body_start..].rfind(&close) {
            Some(pos) => &trimmed[body_start..body_start + pos],
            None => &trimmed[body_start..],
        };

        Ok(NormalizedData::Xml(XmlDocument {
            root,
            declaration,
            fields: self.parse_children(inner),
        }))
    }
}
