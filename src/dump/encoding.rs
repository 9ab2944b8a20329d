//! In-blob data model for per-dump documents and result chunks, plus the
//! codec. Blobs are gzip-compressed JSON; the format is pinned by
//! `ENCODING_VERSION` in the dump's meta table so it can migrate later.

use std::collections::HashMap;

use anyhow::Context;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const ENCODING_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonikerKind {
    Import,
    Export,
    Local,
}

/// A single range within a document. Identified by its index in the
/// document's `ranges` vector, which is sorted by start position. Result
/// ids are dump-wide dense integers; moniker and hover ids index the maps
/// on the containing document blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeData {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
    pub definition_result: Option<u64>,
    pub reference_result: Option<u64>,
    pub hover_result: Option<u64>,
    pub monikers: Vec<u64>,
}

impl RangeData {
    /// Containment is half-open on the end position.
    pub fn contains(&self, line: u32, character: u32) -> bool {
        (line, character) >= (self.start_line, self.start_character)
            && (line, character) < (self.end_line, self.end_character)
    }

    /// Comparable span size used for innermost-range selection.
    pub fn area(&self) -> u64 {
        let start = ((self.start_line as u64) << 32) | self.start_character as u64;
        let end = ((self.end_line as u64) << 32) | self.end_character as u64;
        end - start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonikerData {
    pub kind: Option<MonikerKind>,
    pub scheme: String,
    pub identifier: String,
    pub package: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageData {
    pub name: String,
    pub version: Option<String>,
}

/// Everything a query needs about one document: its ranges plus the hover,
/// moniker and package records those ranges point at, denormalized so that
/// hover and moniker resolution never loads a second blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBlob {
    pub ranges: Vec<RangeData>,
    pub hovers: HashMap<u64, String>,
    pub monikers: HashMap<u64, MonikerData>,
    pub packages: HashMap<u64, PackageData>,
}

impl DocumentBlob {
    /// Index of the innermost range containing the position: smallest area
    /// wins, ties break by earliest start.
    pub fn find_range(&self, line: u32, character: u32) -> Option<usize> {
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| r.contains(line, character))
            .min_by_key(|(_, r)| (r.area(), r.start_line, r.start_character))
            .map(|(index, _)| index)
    }

    pub fn estimated_size(&self) -> u64 {
        let ranges = self.ranges.len() as u64 * std::mem::size_of::<RangeData>() as u64;
        let hovers: u64 = self.hovers.values().map(|h| h.len() as u64 + 16).sum();
        let monikers: u64 = self
            .monikers
            .values()
            .map(|m| (m.scheme.len() + m.identifier.len()) as u64 + 32)
            .sum();
        let packages: u64 = self
            .packages
            .values()
            .map(|p| p.name.len() as u64 + 32)
            .sum();
        ranges + hovers + monikers + packages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMember {
    pub document: u64,
    pub range: u64,
}

/// One shard of the result-id -> members table. Document ids are local to
/// the dump and resolved through `paths`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultChunkBlob {
    pub paths: HashMap<u64, String>,
    pub results: HashMap<u64, Vec<ResultMember>>,
}

impl ResultChunkBlob {
    pub fn estimated_size(&self) -> u64 {
        let paths: u64 = self.paths.values().map(|p| p.len() as u64 + 16).sum();
        let members: u64 = self
            .results
            .values()
            .map(|m| m.len() as u64 * std::mem::size_of::<ResultMember>() as u64 + 16)
            .sum();
        paths + members
    }
}

/// Shard selection for a result id. blake3 is used because the assignment
/// must be identical between the process that wrote the dump and every
/// process that reads it.
pub fn shard_index(result_id: u64, num_result_chunks: i64) -> i64 {
    let digest = blake3::hash(&result_id.to_le_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(head) % num_result_chunks as u64) as i64
}

pub fn encode<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    use std::io::Write;
    let json = serde_json::to_vec(value).context("serializing blob")?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    use std::io::Read;
    let mut json = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    serde_json::from_slice(&json).context("deserializing blob")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: (u32, u32), end: (u32, u32)) -> RangeData {
        RangeData {
            start_line: start.0,
            start_character: start.1,
            end_line: end.0,
            end_character: end.1,
            definition_result: None,
            reference_result: None,
            hover_result: None,
            monikers: Vec::new(),
        }
    }

    #[test]
    fn containment_is_half_open() {
        let r = range((1, 4), (1, 7));
        assert!(r.contains(1, 4));
        assert!(r.contains(1, 6));
        assert!(!r.contains(1, 7));
        assert!(!r.contains(0, 5));
    }

    #[test]
    fn innermost_range_selection_prefers_least_area_then_earliest_start() {
        let blob = DocumentBlob {
            ranges: vec![
                range((0, 0), (10, 0)),
                range((2, 0), (2, 10)),
                range((2, 2), (2, 8)),
                range((2, 4), (2, 8)),
            ],
            ..DocumentBlob::default()
        };

        // innermost wins
        assert_eq!(blob.find_range(2, 5), Some(3));
        // equal-area overlap: earliest start wins
        let blob = DocumentBlob {
            ranges: vec![range((2, 2), (2, 8)), range((2, 4), (2, 10))],
            ..DocumentBlob::default()
        };
        assert_eq!(blob.find_range(2, 5), Some(0));
    }

    #[test]
    fn blob_round_trips_through_codec() {
        let blob = DocumentBlob {
            ranges: vec![range((0, 0), (0, 3))],
            hovers: [(0, "```ts\nlet x\n```".to_owned())].into(),
            ..DocumentBlob::default()
        };
        let bytes = encode(&blob).unwrap();
        let decoded: DocumentBlob = decode(&bytes).unwrap();
        assert_eq!(decoded, blob);
    }

    #[test]
    fn shard_index_is_stable_and_bounded() {
        for id in 0..100u64 {
            let shard = shard_index(id, 7);
            assert!((0..7).contains(&shard));
            assert_eq!(shard, shard_index(id, 7));
        }
        assert_eq!(shard_index(42, 1), 0);
    }
}
