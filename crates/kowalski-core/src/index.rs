//! Flat, in-memory similarity index.
//!
//! Vectors are stored contiguously and compared exhaustively against the
//! query. Each slot carries an encoded [`SectionId`] (`hash:ordinal`) that the
//! retrieval engine resolves back through the collection store; the index
//! owns no documents.
//!
//! # Lifecycle
//!
//! ```text
//! Empty ──append_document()*──seal()──▶ Built ──invalidate()──▶ Empty
//! ```
//!
//! Appending is only allowed while `Empty`; searching only once `Built`.
//! A built index is immutable, so concurrent searches need no locking.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, squared_l2};
use crate::error::{Error, Result};
use crate::models::Document;

/// Distance function used for ranking. Lower is always more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared euclidean distance.
    #[default]
    L2,
    /// `1 - cosine similarity`.
    Cosine,
}

impl Metric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => squared_l2(a, b),
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }
}

/// Identifier of an indexed section: document hash plus section ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionId {
    pub hash: String,
    pub ordinal: usize,
}

impl SectionId {
    pub fn new(hash: impl Into<String>, ordinal: usize) -> Self {
        Self {
            hash: hash.into(),
            ordinal,
        }
    }

    /// Parse `hash:ordinal`. Returns `None` for anything else.
    pub fn decode(encoded: &str) -> Option<Self> {
        let (hash, ordinal) = encoded.split_once(':')?;
        if hash.is_empty() || ordinal.contains(':') {
            return None;
        }
        Some(Self {
            hash: hash.to_string(),
            ordinal: ordinal.parse().ok()?,
        })
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.ordinal)
    }
}

/// Check that `hash` can be embedded in a [`SectionId`].
pub fn validate_hash(hash: &str) -> Result<()> {
    if hash.is_empty() || hash.contains(':') || hash.chars().any(char::is_whitespace) {
        return Err(Error::InvalidHash(hash.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Empty,
    Built,
}

/// One search hit: the slot it came from and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub slot: usize,
    pub distance: f32,
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dims: usize,
    metric: Metric,
    vectors: Vec<f32>,
    ids: Vec<String>,
    state: IndexState,
}

impl SimilarityIndex {
    pub fn new(dims: usize, metric: Metric) -> Self {
        Self {
            dims,
            metric,
            vectors: Vec::new(),
            ids: Vec::new(),
            state: IndexState::Empty,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn is_built(&self) -> bool {
        self.state == IndexState::Built
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append one vector under an encoded identifier. Returns its slot.
    pub fn append(&mut self, vector: &[f32], id: String) -> Result<usize> {
        if self.state == IndexState::Built {
            return Err(Error::IndexAlreadyBuilt);
        }
        if vector.is_empty() || vector.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        self.vectors.extend_from_slice(vector);
        self.ids.push(id);
        Ok(self.ids.len() - 1)
    }

    /// Append every embedded section of `doc` in section order.
    ///
    /// Sections without an embedding are skipped. Alias sections are
    /// registered under ordinal `0`. Returns the number of entries added.
    pub fn append_document(&mut self, doc: &Document) -> Result<usize> {
        let mut added = 0;
        for (ordinal, section) in doc.sections.iter().enumerate() {
            let Some(vector) = section.embedding.as_deref().filter(|v| !v.is_empty()) else {
                tracing::debug!(
                    document = %doc.hash,
                    section = %section.title,
                    "skipping section without embedding"
                );
                continue;
            };
            let ordinal = if section.is_alias { 0 } else { ordinal };
            self.append(vector, SectionId::new(&doc.hash, ordinal).to_string())?;
            added += 1;
        }
        Ok(added)
    }

    /// Finish construction: `Empty -> Built`.
    pub fn seal(&mut self) {
        self.state = IndexState::Built;
    }

    /// Drop all entries: `Built -> Empty`.
    pub fn invalidate(&mut self) {
        self.vectors.clear();
        self.ids.clear();
        self.state = IndexState::Empty;
    }

    pub fn identifier(&self, slot: usize) -> Option<&str> {
        self.ids.get(slot).map(String::as_str)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// The `k` nearest entries to `query`, ascending by distance.
    ///
    /// Equal distances keep insertion order. `k` larger than the index
    /// returns every entry.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.state != IndexState::Built {
            return Err(Error::IndexNotBuilt);
        }
        if query.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if k == 0 || self.dims == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Neighbor> = self
            .vectors
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(slot, vector)| Neighbor {
                slot,
                distance: self.metric.distance(query, vector),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.slot.cmp(&b.slot)));
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Line, Section};

    fn embedded(title: &str, v: &[f32]) -> Section {
        let mut s = Section::new(title).with_line(Line::text(title));
        s.embedding = Some(v.to_vec());
        s
    }

    fn built(entries: &[(&str, &[f32])]) -> SimilarityIndex {
        let mut index = SimilarityIndex::new(2, Metric::L2);
        for (id, v) in entries {
            index.append(v, id.to_string()).unwrap();
        }
        index.seal();
        index
    }

    #[test]
    fn test_section_id_roundtrip() {
        let id = SectionId::new("abc123", 4);
        assert_eq!(id.to_string(), "abc123:4");
        assert_eq!(SectionId::decode("abc123:4"), Some(id));
    }

    #[test]
    fn test_section_id_rejects_malformed() {
        for bad in ["abc", "abc:", ":1", "abc:x", "a:b:1", "abc:-1"] {
            assert!(SectionId::decode(bad).is_none(), "decoded {bad:?}");
        }
    }

    #[test]
    fn test_validate_hash() {
        assert!(validate_hash("deadbeef").is_ok());
        assert!(validate_hash("").is_err());
        assert!(validate_hash("a:b").is_err());
        assert!(validate_hash("a b").is_err());
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = built(&[("a:0", &[5.0, 5.0]), ("b:0", &[1.0, 0.0]), ("c:0", &[2.0, 2.0])]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let order: Vec<&str> = hits.iter().map(|h| index.identifier(h.slot).unwrap()).collect();
        assert_eq!(order, vec!["b:0", "c:0", "a:0"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(hits[0].distance, 1.0);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = built(&[("x:0", &[1.0, 0.0]), ("y:0", &[0.0, 1.0]), ("z:0", &[-1.0, 0.0])]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let slots: Vec<usize> = hits.iter().map(|h| h.slot).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn test_k_larger_than_index() {
        let index = built(&[("a:0", &[1.0, 1.0])]);
        assert_eq!(index.search(&[0.0, 0.0], 10).unwrap().len(), 1);
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_cosine_metric() {
        let mut index = SimilarityIndex::new(2, Metric::Cosine);
        index.append(&[10.0, 0.0], "far-but-aligned:0".into()).unwrap();
        index.append(&[0.1, 0.1], "near-but-diagonal:0".into()).unwrap();
        index.seal();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(index.identifier(hits[0].slot), Some("far-but-aligned:0"));
    }

    #[test]
    fn test_state_machine() {
        let mut index = SimilarityIndex::new(2, Metric::L2);
        assert!(matches!(index.search(&[0.0, 0.0], 1), Err(Error::IndexNotBuilt)));
        index.append(&[1.0, 1.0], "a:0".into()).unwrap();
        index.seal();
        assert!(matches!(
            index.append(&[1.0, 1.0], "b:0".into()),
            Err(Error::IndexAlreadyBuilt)
        ));
        index.invalidate();
        assert_eq!(index.state(), IndexState::Empty);
        assert!(index.is_empty());
    }

    #[test]
    fn test_dimension_checks() {
        let mut index = SimilarityIndex::new(3, Metric::L2);
        assert!(matches!(
            index.append(&[1.0, 1.0], "a:0".into()),
            Err(Error::DimensionMismatch { expected: 3, actual: 2 })
        ));
        index.seal();
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_append_document_skips_unembedded_and_maps_aliases() {
        let mut alias = Section::alias("install software");
        alias.embedding = Some(vec![0.0, 1.0]);
        let doc = crate::models::Document::new(
            "curated.yaml",
            vec![
                embedded("zypper", &[1.0, 0.0]),
                Section::new("no vector yet").with_line(Line::text("pending")),
                alias,
            ],
        );
        let mut index = SimilarityIndex::new(2, Metric::L2);
        assert_eq!(index.append_document(&doc).unwrap(), 2);
        let ids: Vec<&str> = index.identifiers().collect();
        assert_eq!(ids, vec![format!("{}:0", doc.hash), format!("{}:0", doc.hash)]);
    }
}
