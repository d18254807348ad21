//! FIT-style binary telemetry adapter
//!
//! Structural support only: a fixed-size header (size, protocol/profile
//! versions, `.FIT` signature, declared payload length) is validated, the
//! trailing CRC-16 is verified, and the payload is walked as a sequence of
//! framed records. Definition frames are read structurally and register the
//! declared size for their local type; data frames without a preceding
//! definition fall back to a static size table and are marked estimated.
//! Record bodies are never decoded.

use crate::adapter::FormatAdapter;
use async_trait::async_trait;
use carbonsift_core::{
    ConfidenceResult, Error, FitFrame, FitFrameKind, FitSummary, NormalizedData, RawInput, Result,
    ScoreTrail,
};
use std::collections::HashMap;

/// Minimum legal header length
const MIN_HEADER_SIZE: usize = 12;

/// Embedded type signature at header offset 8
const FIT_SIGNATURE: &[u8; 4] = b".FIT";

/// Multiplier applied when the trailing checksum fails; header validity is
/// the stronger signal, so a bad checksum reduces rather than zeroes.
const CHECKSUM_PENALTY: f64 = 0.7;

/// Tolerance (bytes) when comparing declared and observed payload length
const LENGTH_TOLERANCE: usize = 2;

/// CRC-16 nibble lookup table used by the FIT checksum
const CRC_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
    0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
];

/// Compute the FIT CRC-16 over a byte slice
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        for nibble in [byte & 0x0F, byte >> 4] {
            let tmp = CRC_TABLE[(crc & 0x0F) as usize];
            crc = (crc >> 4) & 0x0FFF;
            crc = crc ^ tmp ^ CRC_TABLE[nibble as usize];
        }
    }
    crc
}

/// Estimated body size for a data frame whose local type has no preceding
/// definition. These are approximations drawn from common message layouts;
/// frames sized this way are flagged `estimated` in the summary.
fn estimated_body_size(local_type: u8) -> usize {
    match local_type {
        0 => 12, // file id
        1 => 9,  // device settings
        2 => 10, // session summary
        3 => 8,  // lap
        4 => 14, // record
        _ => 8,
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    header_size: usize,
    protocol_version: u8,
    profile_version: u16,
    data_size: u32,
    signature_ok: bool,
}

fn parse_header(data: &[u8]) -> Option<Header> {
    if data.len() < MIN_HEADER_SIZE {
        return None;
    }
    Some(Header {
        header_size: data[0] as usize,
        protocol_version: data[1],
        profile_version: u16::from_le_bytes([data[2], data[3]]),
        data_size: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        signature_ok: &data[8..12] == FIT_SIGNATURE,
    })
}

/// Walk the framed records between the header and the trailing checksum.
/// Returns the frames plus a truncation note when the walk overran.
fn walk_records(data: &[u8], header_size: usize, data_size: u32) -> (Vec<FitFrame>, Option<String>) {
    let mut frames = Vec::new();
    let mut defined_sizes: HashMap<u8, usize> = HashMap::new();

    let checksum_start = data.len().saturating_sub(2);
    let end = checksum_start.min(header_size.saturating_add(data_size as usize));
    let mut pos = header_size;

    while pos < end {
        let header_byte = data[pos];
        let offset = pos;

        if header_byte & 0x80 != 0 {
            // Compressed timestamp header: local type in bits 5-6.
            let local_type = (header_byte >> 5) & 0x03;
            let size = *defined_sizes
                .get(&local_type)
                .unwrap_or(&estimated_body_size(local_type));
            let estimated = !defined_sizes.contains_key(&local_type);
            if pos + 1 + size > end {
                return (frames, Some(format!("record at offset {offset} overruns payload")));
            }
            frames.push(FitFrame {
                offset,
                local_type,
                kind: FitFrameKind::CompressedTimestamp,
                size,
                estimated,
            });
            pos += 1 + size;
            continue;
        }

        let local_type = header_byte & 0x0F;
        if header_byte & 0x40 != 0 {
            // Definition message: 5 fixed bytes after the header byte, then
            // three bytes per field definition.
            if pos + 6 > end {
                return (frames, Some(format!("definition at offset {offset} overruns payload")));
            }
            let field_count = data[pos + 5] as usize;
            let mut frame_len = 6 + field_count * 3;
            if header_byte & 0x20 != 0 {
                // Developer fields: a count byte plus three bytes each.
                if pos + frame_len + 1 > end {
                    return (
                        frames,
                        Some(format!("definition at offset {offset} overruns payload")),
                    );
                }
                let dev_count = data[pos + frame_len] as usize;
                frame_len += 1 + dev_count * 3;
            }
            if pos + frame_len > end {
                return (frames, Some(format!("definition at offset {offset} overruns payload")));
            }

            let body_size = (0..field_count)
                .map(|i| data[pos + 6 + i * 3 + 1] as usize)
                .sum();
            defined_sizes.insert(local_type, body_size);

            frames.push(FitFrame {
                offset,
                local_type,
                kind: FitFrameKind::Definition,
                size: frame_len - 1,
                estimated: false,
            });
            pos += frame_len;
        } else {
            // Data message: body size from the matching definition, or the
            // static estimate when none was seen.
            let (size, estimated) = match defined_sizes.get(&local_type) {
                Some(&s) => (s, false),
                None => (estimated_body_size(local_type), true),
            };
            if pos + 1 + size > end {
                return (frames, Some(format!("record at offset {offset} overruns payload")));
            }
            frames.push(FitFrame {
                offset,
                local_type,
                kind: FitFrameKind::Data,
                size,
                estimated,
            });
            pos += 1 + size;
        }
    }

    (frames, None)
}

/// Adapter for the FIT-style binary telemetry protocol
#[derive(Debug, Default)]
pub struct FitAdapter;

impl FitAdapter {
    /// Create a new FIT adapter
    pub fn new() -> Self {
        Self
    }

    fn checksum_valid(data: &[u8]) -> bool {
        if data.len() < MIN_HEADER_SIZE + 2 {
            return false;
        }
        let stored = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        crc16(&data[..data.len() - 2]) == stored
    }
}

#[async_trait]
impl FormatAdapter for FitAdapter {
    fn name(&self) -> &str {
        "fit"
    }

    fn detect(&self, input: &RawInput) -> bool {
        input
            .bytes()
            .is_some_and(|data| data.len() >= MIN_HEADER_SIZE && &data[8..12] == FIT_SIGNATURE)
    }

    async fn detect_confidence(&self, data: &[u8]) -> Result<ConfidenceResult> {
        if data.len() < MIN_HEADER_SIZE {
            return Ok(ConfidenceResult::zero(
                self.name(),
                format!(
                    "insufficient length: {} bytes, minimum header is {MIN_HEADER_SIZE}",
                    data.len()
                ),
            ));
        }

        let mut trail = ScoreTrail::new();
        let header = parse_header(data).expect("length checked above");

        if header.header_size == 12 || header.header_size == 14 {
            trail.add(0.25, format!("valid header size {}", header.header_size));
        } else {
            trail.note(format!("implausible header size {}", header.header_size));
        }

        if header.signature_ok {
            trail.add(0.3, ".FIT type signature present");
        } else {
            trail.note("type signature missing");
        }

        let major = header.protocol_version >> 4;
        if (1..=2).contains(&major) {
            trail.add(0.1, format!("protocol version {major}.x in supported range"));
        } else {
            trail.note(format!("protocol major version {major} out of range"));
        }

        let expected = header.header_size + header.data_size as usize + 2;
        let observed = data.len();
        if observed == expected {
            trail.add(0.25, "declared payload length matches buffer");
        } else if observed.abs_diff(expected) <= LENGTH_TOLERANCE {
            trail.add(0.15, "declared payload length within tolerance");
        } else {
            trail.note(format!(
                "declared length {expected} vs observed {observed}"
            ));
        }

        if Self::checksum_valid(data) {
            trail.add(0.1, "trailing CRC-16 verified");
        } else {
            trail.scale(CHECKSUM_PENALTY, "trailing CRC-16 mismatch");
        }

        if header.signature_ok && (header.header_size == 12 || header.header_size == 14) {
            let (frames, overrun) = walk_records(data, header.header_size, header.data_size);
            trail.note(format!("{} framed record(s)", frames.len()));
            if let Some(warning) = overrun {
                trail.scale(0.9, warning);
            }
        }

        Ok(trail.finish(self.name()))
    }

    fn ingest(&self, input: &RawInput) -> Result<NormalizedData> {
        let data = input
            .bytes()
            .ok_or_else(|| Error::parse("binary input required"))?;

        if data.len() < MIN_HEADER_SIZE + 2 {
            return Err(Error::parse(format!(
                "buffer too short for a FIT payload: {} bytes",
                data.len()
            )));
        }

        let header = parse_header(data).expect("length checked above");
        if header.header_size != 12 && header.header_size != 14 {
            return Err(Error::validation(
                "header_size",
                "12 or 14",
                header.header_size,
            ));
        }
        if !header.signature_ok {
            return Err(Error::validation(
                "signature",
                "`.FIT` at offset 8",
                format!("{:?}", &data[8..12]),
            ));
        }

        // Detection tolerates a bad checksum with a penalty; ingestion does not.
        let stored = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        let computed = crc16(&data[..data.len() - 2]);
        if stored != computed {
            return Err(Error::integrity(format!(
                "checksum mismatch: stored {stored:#06x}, computed {computed:#06x}"
            )));
        }

        let (records, _) = walk_records(data, header.header_size, header.data_size);

        Ok(NormalizedData::Fit(FitSummary {
            protocol_version: header.protocol_version,
            profile_version: header.profile_version,
            declared_data_size: header.data_size,
            checksum_valid: true,
            records,
        }))
    }
}

/// Build a minimal valid FIT-style buffer for tests and benchmarks: a
/// 12-byte header, one definition + one data frame, and a trailing CRC.
pub fn build_test_buffer() -> Vec<u8> {
    // Definition for local type 0 with two one-byte fields, then one data frame.
    let records: Vec<u8> = vec![
        0x40, // definition, local type 0
        0x00, // reserved
        0x00, // little-endian
        0x00, 0x00, // global message number
        0x02, // field count
        0x00, 0x01, 0x02, // field 0: one byte
        0x01, 0x01, 0x02, // field 1: one byte
        0x00, // data, local type 0
        0xAA, 0xBB, // two field bytes
    ];

    let mut buf = Vec::new();
    buf.push(12); // header size
    buf.push(0x10); // protocol version 1.0
    buf.extend_from_slice(&21u16.to_le_bytes()); // profile version
    buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
    buf.extend_from_slice(FIT_SIGNATURE);
    buf.extend_from_slice(&records);
    let crc = crc16(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_of_empty_is_zero() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn crc16_detects_corruption() {
        let data = b"telemetry bytes";
        let good = crc16(data);
        let mut corrupted = data.to_vec();
        corrupted[0] ^= 0xFF;
        assert_ne!(good, crc16(&corrupted));
    }

    #[tokio::test]
    async fn short_buffer_scores_zero_with_length_evidence() {
        let adapter = FitAdapter::new();
        let result = adapter.detect_confidence(&[0x0C, 0x10, 0x00]).await.unwrap();
        assert_eq!(result.score, 0.0);
        assert!(result.evidence.contains("insufficient length"));
    }

    #[tokio::test]
    async fn valid_buffer_scores_high() {
        let adapter = FitAdapter::new();
        let buf = build_test_buffer();
        let result = adapter.detect_confidence(&buf).await.unwrap();
        assert!(result.score >= 0.9);
        assert!(result.evidence.contains("CRC-16 verified"));
    }

    #[tokio::test]
    async fn corrupted_checksum_reduces_but_does_not_zero() {
        let adapter = FitAdapter::new();
        let mut buf = build_test_buffer();
        let len = buf.len();
        buf[len - 1] ^= 0xFF;

        let good = adapter.detect_confidence(&build_test_buffer()).await.unwrap();
        let bad = adapter.detect_confidence(&buf).await.unwrap();
        assert!(bad.score > 0.0);
        assert!(bad.score < good.score);
        assert!(bad.evidence.contains("CRC-16 mismatch"));
    }

    #[test]
    fn ingest_walks_definition_and_data_frames() {
        let adapter = FitAdapter::new();
        let input = RawInput::from(build_test_buffer());
        assert!(adapter.detect(&input));
        let NormalizedData::Fit(summary) = adapter.ingest(&input).unwrap() else {
            panic!("expected fit summary");
        };
        assert!(summary.checksum_valid);
        assert_eq!(summary.records.len(), 2);
        assert_eq!(summary.records[0].kind, FitFrameKind::Definition);
        assert_eq!(summary.records[1].kind, FitFrameKind::Data);
        assert_eq!(summary.records[1].size, 2);
        assert!(!summary.records[1].estimated);
    }

    #[test]
    fn ingest_rejects_corrupted_checksum() {
        let adapter = FitAdapter::new();
        let mut buf = build_test_buffer();
        let len = buf.len();
        buf[len - 1] ^= 0xFF;
        let err = adapter.ingest(&RawInput::from(buf)).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn undefined_local_type_uses_estimated_size() {
        // Header + one data frame for local type 4 with no definition.
        let mut records = vec![0x04];
        records.extend_from_slice(&[0u8; 14]);

        let mut buf = Vec::new();
        buf.push(12);
        buf.push(0x10);
        buf.extend_from_slice(&21u16.to_le_bytes());
        buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
        buf.extend_from_slice(FIT_SIGNATURE);
        buf.extend_from_slice(&records);
        let crc = crc16(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        let adapter = FitAdapter::new();
        let NormalizedData::Fit(summary) = adapter.ingest(&RawInput::from(buf)).unwrap() else {
            panic!("expected fit summary");
        };
        assert_eq!(summary.records.len(), 1);
        assert!(summary.records[0].estimated);
        assert_eq!(summary.records[0].size, 14);
    }
}
