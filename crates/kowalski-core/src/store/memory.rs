//! In-memory [`CollectionBackend`] implementation for testing.
//!
//! Uses a `Vec` behind `std::sync::RwLock`; insertion order is the scan order.
//! Native ids are sequence numbers starting at 1.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::collection::CollectionName;
use crate::error::{Error, Result};
use crate::models::{Document, DocumentSummary};

use super::CollectionBackend;

struct StoredDoc {
    id: u64,
    doc: Document,
    added_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    docs: Vec<StoredDoc>,
    next_id: u64,
}

/// In-memory collection for tests and ephemeral stores.
pub struct InMemoryCollection {
    name: CollectionName,
    read_only: bool,
    inner: RwLock<Inner>,
}

impl InMemoryCollection {
    pub fn new(name: CollectionName) -> Self {
        Self {
            name,
            read_only: false,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// A collection that rejects all mutations, pre-filled with `docs`.
    pub fn read_only(name: CollectionName, docs: Vec<Document>) -> Self {
        let now = Utc::now();
        let docs = docs
            .into_iter()
            .enumerate()
            .map(|(i, doc)| StoredDoc {
                id: i as u64 + 1,
                doc,
                added_at: now,
            })
            .collect::<Vec<_>>();
        let next_id = docs.len() as u64;
        Self {
            name,
            read_only: true,
            inner: RwLock::new(Inner { docs, next_id }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        if self.read_only {
            return Err(Error::ReadOnly(self.name.to_string()));
        }
        Ok(self.inner.write().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl CollectionBackend for InMemoryCollection {
    fn name(&self) -> &CollectionName {
        &self.name
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn contains(&self, hash: &str) -> Result<bool> {
        Ok(self.read().docs.iter().any(|s| s.doc.hash == hash))
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Document>> {
        Ok(self
            .read()
            .docs
            .iter()
            .find(|s| s.doc.hash == hash)
            .map(|s| s.doc.clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        let Ok(id) = id.parse::<u64>() else {
            return Ok(None);
        };
        Ok(self
            .read()
            .docs
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.doc.clone()))
    }

    async fn insert(&self, doc: &Document) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.docs.iter().any(|s| s.doc.hash == doc.hash) {
            return Ok(false);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.docs.push(StoredDoc {
            id,
            doc: doc.clone(),
            added_at: Utc::now(),
        });
        Ok(true)
    }

    async fn delete(&self, hash: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let before = inner.docs.len();
        inner.docs.retain(|s| s.doc.hash != hash);
        Ok(inner.docs.len() != before)
    }

    async fn list(&self) -> Result<Vec<DocumentSummary>> {
        Ok(self
            .read()
            .docs
            .iter()
            .map(|s| s.doc.summary(s.id.to_string(), s.added_at))
            .collect())
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        Ok(self.read().docs.iter().map(|s| s.doc.clone()).collect())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Line, Section};

    fn name() -> CollectionName {
        CollectionName::parse("docs@m1").unwrap()
    }

    fn doc(title: &str) -> Document {
        Document::new(
            format!("{title}.xml"),
            vec![Section::new(title).with_line(Line::text(title))],
        )
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_by_hash() {
        let store = InMemoryCollection::new(name());
        assert!(store.insert(&doc("a")).await.unwrap());
        assert!(!store.insert(&doc("a")).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_by_hash_and_id() {
        let store = InMemoryCollection::new(name());
        let a = doc("a");
        store.insert(&a).await.unwrap();
        store.insert(&doc("b")).await.unwrap();
        assert_eq!(store.find_by_hash(&a.hash).await.unwrap(), Some(a.clone()));
        assert_eq!(store.find_by_id("1").await.unwrap(), Some(a));
        assert!(store.find_by_id("3").await.unwrap().is_none());
        assert!(store.find_by_id("not-a-number").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_scan_order() {
        let store = InMemoryCollection::new(name());
        for t in ["a", "b", "c"] {
            store.insert(&doc(t)).await.unwrap();
        }
        assert!(store.delete(&doc("b").hash).await.unwrap());
        assert!(!store.delete(&doc("b").hash).await.unwrap());
        let sources: Vec<String> = store
            .documents()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.source)
            .collect();
        assert_eq!(sources, vec!["a.xml", "c.xml"]);
    }

    #[tokio::test]
    async fn test_read_only_rejects_mutation() {
        let store = InMemoryCollection::read_only(name(), vec![doc("a")]);
        assert!(store.is_read_only());
        assert!(matches!(store.insert(&doc("b")).await, Err(Error::ReadOnly(_))));
        assert!(matches!(store.delete(&doc("a").hash).await, Err(Error::ReadOnly(_))));
        assert!(store.contains(&doc("a").hash).await.unwrap());
    }
}
