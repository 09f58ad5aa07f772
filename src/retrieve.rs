//! Retrieval engine: question in, ranked sections out.
//!
//! A [`Retriever`] holds at most one built [`SimilarityIndex`], scoped to the
//! collection set it was built for. A query over the same set reuses it; a
//! different set rebuilds it. Mutating the store does not touch a built
//! index; callers invalidate it explicitly with [`Retriever::invalidate`].
//!
//! # Pipeline
//!
//! 1. Default to every collection when none are named.
//! 2. Reject collections from different embedding spaces (no I/O yet).
//! 3. Build the index for this collection set if needed.
//! 4. Embed the question.
//! 5. Search the index for the top `k` entries.
//! 6. Decode each `hash:ordinal` and resolve the document through the store,
//!    trying collections in order.
//! 7. Map the ordinal to its section; aliases resolve to canonical content.
//! 8. Return results in ascending distance.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use kowalski_core::collection::{parse_names, shared_embedding_space};
use kowalski_core::embedding::EmbeddingProvider;
use kowalski_core::{
    CollectionName, Document, EmbeddingSpace, Error, Metric, Result, RetrievedSection, SectionId,
    SimilarityIndex,
};

use crate::cancel::cancellable;
use crate::config::RetrievalConfig;
use crate::knowledge::Knowledge;

/// Scan `collections` in order and append every embedded section.
///
/// All collections must exist and share one embedding space; `dims` is that
/// space's vector size.
pub async fn build_index(
    knowledge: &Knowledge,
    collections: &[CollectionName],
    dims: usize,
    metric: Metric,
) -> Result<SimilarityIndex> {
    shared_embedding_space(collections)?;
    let mut index = SimilarityIndex::new(dims, metric);
    for name in collections {
        let backend = knowledge.collection(name).await?;
        let mut entries = 0;
        for doc in backend.documents().await? {
            entries += index.append_document(&doc).map_err(|e| match e {
                Error::DimensionMismatch { expected, actual } => Error::backend(
                    name.to_string(),
                    format!(
                        "document {} has {}-dimensional embeddings, index expects {}",
                        doc.hash, actual, expected
                    ),
                ),
                other => other,
            })?;
        }
        tracing::debug!(collection = %name, entries, "indexed collection");
    }
    index.seal();
    Ok(index)
}

/// A built index and the collection set it covers.
#[derive(Debug)]
pub struct ScopedIndex {
    pub collections: Vec<CollectionName>,
    pub space: EmbeddingSpace,
    pub index: SimilarityIndex,
}

pub struct Retriever {
    knowledge: Arc<Knowledge>,
    provider: Arc<dyn EmbeddingProvider>,
    metric: Metric,
    index: RwLock<Option<Arc<ScopedIndex>>>,
}

impl Retriever {
    pub fn new(
        knowledge: Arc<Knowledge>,
        provider: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            knowledge,
            provider,
            metric: config.metric,
            index: RwLock::new(None),
        }
    }

    pub fn knowledge(&self) -> &Arc<Knowledge> {
        &self.knowledge
    }

    /// Drop the built index; the next query rebuilds it.
    pub async fn invalidate(&self) {
        *self.index.write().await = None;
    }

    /// The currently built index, if any.
    pub async fn current_index(&self) -> Option<Arc<ScopedIndex>> {
        self.index.read().await.clone()
    }

    /// Resolve the `k` sections nearest to `question` across `collections`
    /// (all collections when empty).
    pub async fn get_sections(
        &self,
        question: &str,
        collections: &[String],
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedSection>> {
        let names = if collections.is_empty() {
            self.knowledge.collection_names().await?
        } else {
            parse_names(collections)?
        };
        let mut seen = HashSet::new();
        let names: Vec<CollectionName> = names.into_iter().filter(|n| seen.insert(n.clone())).collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let space = shared_embedding_space(&names)?;
        for name in &names {
            self.knowledge.collection(name).await?;
        }

        let scoped = self.ensure_index(&names, &space, cancel).await?;

        let operation = format!("embedding query '{}' for {}", question, space);
        let query = cancellable(
            cancel,
            &operation,
            self.provider.embed(&[question.to_string()], &space),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::provider(&operation, "provider returned no vector"))?;

        let neighbors = scoped.index.search(&query, k).map_err(|e| match e {
            Error::DimensionMismatch { expected, actual } => Error::provider(
                &operation,
                format!("query vector has {} dimensions, index has {}", actual, expected),
            ),
            other => other,
        })?;

        let mut resolved: HashMap<String, (Document, String)> = HashMap::new();
        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let Some(encoded) = scoped.index.identifier(neighbor.slot) else {
                tracing::warn!(slot = neighbor.slot, "search returned a slot outside the index");
                continue;
            };
            let fault = || Error::IndexConsistencyFault {
                id: encoded.to_string(),
                collections: names.iter().map(|n| n.to_string()).collect(),
            };
            let id = SectionId::decode(encoded).ok_or_else(fault)?;

            if !resolved.contains_key(&id.hash) {
                let (doc, collection) = self.resolve(&names, &id.hash).await?.ok_or_else(fault)?;
                resolved.insert(id.hash.clone(), (doc, collection));
            }
            let Some((doc, collection)) = resolved.get(&id.hash) else {
                return Err(fault());
            };
            let section = doc.resolve_section(id.ordinal).ok_or_else(fault)?;
            tracing::debug!(id = %encoded, distance = neighbor.distance, collection = %collection, "resolved section");
            results.push(RetrievedSection {
                section: section.clone(),
                distance: neighbor.distance,
                document_hash: doc.hash.clone(),
                collection: collection.clone(),
            });
        }
        Ok(results)
    }

    async fn resolve(&self, names: &[CollectionName], hash: &str) -> Result<Option<(Document, String)>> {
        for name in names {
            if let Some(doc) = self.knowledge.find_in(name, hash).await? {
                return Ok(Some((doc, name.to_string())));
            }
        }
        Ok(None)
    }

    async fn ensure_index(
        &self,
        names: &[CollectionName],
        space: &EmbeddingSpace,
        cancel: &CancellationToken,
    ) -> Result<Arc<ScopedIndex>> {
        if let Some(scoped) = self.index.read().await.as_ref() {
            if scoped.collections == names {
                return Ok(scoped.clone());
            }
        }

        let mut slot = self.index.write().await;
        if let Some(scoped) = slot.as_ref() {
            if scoped.collections == names {
                return Ok(scoped.clone());
            }
        }

        let operation = format!("dimension lookup for {}", space);
        let dims = cancellable(cancel, &operation, self.provider.dims(space)).await?;
        if dims == 0 {
            return Err(Error::provider(operation, "invalid embedding dimension 0"));
        }

        let index = build_index(&self.knowledge, names, dims, self.metric).await?;
        tracing::debug!(
            collections = names.len(),
            entries = index.len(),
            dims,
            "built similarity index"
        );
        let scoped = Arc::new(ScopedIndex {
            collections: names.to_vec(),
            space: space.clone(),
            index,
        });
        *slot = Some(scoped.clone());
        Ok(scoped)
    }
}
