//! Collection names and the embedding-space rule.
//!
//! A collection is named `label@embeddingmodel`. The part after `@` is the
//! embedding space: every document in the collection was embedded with that
//! model, and a query may only span collections that share it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of an embedding model, e.g. `nomic-embed-text`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingSpace(String);

impl EmbeddingSpace {
    pub fn new(model: impl Into<String>) -> Self {
        Self(model.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compound collection name: a human-readable label plus its embedding space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionName {
    label: String,
    space: EmbeddingSpace,
}

impl CollectionName {
    pub fn new(label: impl Into<String>, space: EmbeddingSpace) -> Result<Self> {
        let label = label.into();
        if !is_name_part(&label) || !is_name_part(space.as_str()) {
            return Err(Error::InvalidCollectionName(format!("{}@{}", label, space)));
        }
        Ok(Self { label, space })
    }

    pub fn parse(name: &str) -> Result<Self> {
        let mut parts = name.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(label), Some(model), None) if is_name_part(label) && is_name_part(model) => {
                Ok(Self {
                    label: label.to_string(),
                    space: EmbeddingSpace::new(model),
                })
            }
            _ => Err(Error::InvalidCollectionName(name.to_string())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }
}

/// A label or model must form a single file name inside the store root.
fn is_name_part(part: &str) -> bool {
    !part.is_empty()
        && !part.contains(|c| matches!(c, '@' | '/' | '\\' | '\0'))
        && !part.contains("..")
        && part != "."
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.label, self.space)
    }
}

impl FromStr for CollectionName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for CollectionName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CollectionName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Return the single embedding space shared by `collections`.
///
/// Fails with [`Error::IncompatibleEmbeddingSpace`] naming the first
/// mismatching pair. This is a pure check on the names and performs no I/O,
/// so callers run it before any store or provider access.
pub fn shared_embedding_space(collections: &[CollectionName]) -> Result<EmbeddingSpace> {
    let first = collections
        .first()
        .ok_or_else(|| Error::CollectionNotFound("no collections given".to_string()))?;
    for other in &collections[1..] {
        if other.space() != first.space() {
            return Err(Error::IncompatibleEmbeddingSpace {
                first: first.to_string(),
                first_space: first.space().to_string(),
                second: other.to_string(),
                second_space: other.space().to_string(),
            });
        }
    }
    Ok(first.space().clone())
}

/// Parse a list of raw names, failing on the first malformed one.
pub fn parse_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<CollectionName>> {
    names.iter().map(|n| CollectionName::parse(n.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let name = CollectionName::parse("docs@nomic-embed-text").unwrap();
        assert_eq!(name.label(), "docs");
        assert_eq!(name.space().as_str(), "nomic-embed-text");
        assert_eq!(name.to_string(), "docs@nomic-embed-text");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["docs", "docs@", "@m1", "a@b@c", ""] {
            assert!(
                matches!(CollectionName::parse(bad), Err(Error::InvalidCollectionName(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_rejects_names_outside_store_root() {
        for bad in ["../escaped@m1", "a/b@m1", "docs@../m1", "docs@m/1", ".@m1", "docs@..", "a\\b@m1"] {
            assert!(
                matches!(CollectionName::parse(bad), Err(Error::InvalidCollectionName(_))),
                "accepted {bad:?}"
            );
        }
        assert!(CollectionName::new("..", EmbeddingSpace::new("m1")).is_err());
        assert!(CollectionName::parse("sles-15.6@nomic-embed-text:v1.5").is_ok());
    }

    #[test]
    fn test_model_tag_with_colon_is_allowed() {
        let name = CollectionName::parse("sles@nomic-embed-text:latest").unwrap();
        assert_eq!(name.space().as_str(), "nomic-embed-text:latest");
    }

    #[test]
    fn test_shared_space_single_and_matching() {
        let names = parse_names(&["docs@m1", "curated@m1"]).unwrap();
        assert_eq!(shared_embedding_space(&names).unwrap().as_str(), "m1");
    }

    #[test]
    fn test_shared_space_mismatch() {
        let names = parse_names(&["docs@m1", "curated@m1", "man@m2"]).unwrap();
        match shared_embedding_space(&names) {
            Err(Error::IncompatibleEmbeddingSpace { first, second, .. }) => {
                assert_eq!(first, "docs@m1");
                assert_eq!(second, "man@m2");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_shared_space_empty() {
        assert!(shared_embedding_space(&[]).is_err());
    }
}
