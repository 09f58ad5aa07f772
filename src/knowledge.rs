//! The collection store: every collection under one root, opened together.
//!
//! [`Knowledge`] owns one [`CollectionBackend`] per collection, keyed by the
//! compound `label@model` name. Collections are discovered from the store
//! root when opened and created on first insert. Documents are addressed by
//! content hash; inserting content that is already stored is a no-op that
//! reports [`InsertOutcome::Found`].
//!
//! Embeddings are computed during [`Knowledge::insert`], before anything is
//! written, so a provider failure leaves the store untouched. A collection
//! that does not exist yet is only created once its first document is ready
//! to be persisted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use kowalski_core::embedding::EmbeddingProvider;
use kowalski_core::index::validate_hash;
use kowalski_core::store::memory::InMemoryCollection;
use kowalski_core::store::CollectionBackend;
use kowalski_core::{CollectionName, Document, DocumentSummary, Error, Result};

use crate::cancel::cancellable;
use crate::sqlite_store::{SqliteCollection, COLLECTION_SUFFIX};

/// Result of a successful insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The document was embedded and persisted.
    Inserted,
    /// A document with the same hash was already stored; nothing changed.
    Found,
}

type Backend = Arc<dyn CollectionBackend>;

pub struct Knowledge {
    /// `None` for a purely in-memory store.
    root: Option<PathBuf>,
    collections: RwLock<BTreeMap<String, Backend>>,
    closed: AtomicBool,
}

impl Knowledge {
    /// Open every collection file found directly under `root`.
    ///
    /// A missing root is an empty store; it is created on first insert.
    /// Unwritable files are opened read-only. A file that is not a valid
    /// collection database fails the whole open.
    pub async fn open(root: &Path) -> Result<Self> {
        let mut collections: BTreeMap<String, Backend> = BTreeMap::new();

        if root.is_dir() {
            for entry in WalkDir::new(root)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
            {
                let entry = entry.map_err(|e| Error::backend(root.display().to_string(), e))?;
                let path = entry.path();
                if !entry.file_type().is_file()
                    || path.extension().and_then(|e| e.to_str()) != Some(COLLECTION_SUFFIX)
                {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let name = match CollectionName::parse(stem) {
                    Ok(name) => name,
                    Err(_) => {
                        tracing::warn!(path = %path.display(), "skipping file without a collection name");
                        continue;
                    }
                };
                let backend = SqliteCollection::open(path, name.clone()).await?;
                tracing::debug!(collection = %name, read_only = backend.is_read_only(), "opened collection");
                collections.insert(name.to_string(), Arc::new(backend));
            }
        }

        Ok(Self {
            root: Some(root.to_path_buf()),
            collections: RwLock::new(collections),
            closed: AtomicBool::new(false),
        })
    }

    /// A store whose collections live only in memory.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            collections: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Register an already opened backend, replacing any collection with
    /// the same name.
    pub async fn attach(&self, backend: Backend) -> Result<()> {
        self.ensure_open()?;
        let name = backend.name().to_string();
        self.collections.write().await.insert(name, backend);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Names of all collections, sorted.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    /// Parsed names of all collections in store order.
    pub async fn collection_names(&self) -> Result<Vec<CollectionName>> {
        self.ensure_open()?;
        Ok(self
            .collections
            .read()
            .await
            .values()
            .map(|b| b.name().clone())
            .collect())
    }

    pub async fn collection(&self, name: &CollectionName) -> Result<Backend> {
        self.ensure_open()?;
        self.collections
            .read()
            .await
            .get(&name.to_string())
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    async fn backends(&self) -> Result<Vec<Backend>> {
        self.ensure_open()?;
        Ok(self.collections.read().await.values().cloned().collect())
    }

    async fn get_or_create(&self, name: &CollectionName) -> Result<Backend> {
        let key = name.to_string();
        if let Some(backend) = self.collections.read().await.get(&key) {
            return Ok(backend.clone());
        }

        let mut collections = self.collections.write().await;
        if let Some(backend) = collections.get(&key) {
            return Ok(backend.clone());
        }
        let backend: Backend = match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| Error::backend(&key, e))?;
                let path = SqliteCollection::file_path(root, name);
                Arc::new(SqliteCollection::create(&path, name.clone()).await?)
            }
            None => Arc::new(InMemoryCollection::new(name.clone())),
        };
        tracing::debug!(collection = %key, "created collection");
        collections.insert(key, backend.clone());
        Ok(backend)
    }

    /// Embed every section of `doc` and store it in `collection` unless a
    /// document with the same hash is already there.
    ///
    /// The hash is always recomputed from the content. Empty documents are
    /// rejected before the provider is called. Nothing is written when
    /// embedding fails or is cancelled.
    pub async fn insert(
        &self,
        collection: &str,
        mut doc: Document,
        provider: &dyn EmbeddingProvider,
        cancel: &CancellationToken,
    ) -> Result<InsertOutcome> {
        self.ensure_open()?;
        let name = CollectionName::parse(collection)?;
        if doc.is_empty() {
            return Err(Error::EmptyDocument(doc.source));
        }
        let computed = doc.compute_hash();
        if doc.hash != computed {
            if !doc.hash.is_empty() {
                tracing::debug!(source = %doc.source, stale = %doc.hash, hash = %computed, "recomputed document hash");
            }
            doc.hash = computed;
        }
        validate_hash(&doc.hash)?;

        let existing = self.collections.read().await.get(&name.to_string()).cloned();
        if let Some(backend) = &existing {
            if backend.is_read_only() {
                return Err(Error::ReadOnly(name.to_string()));
            }
            if backend.contains(&doc.hash).await? {
                tracing::info!(collection = %name, hash = %doc.hash, source = %doc.source, "document already stored");
                return Ok(InsertOutcome::Found);
            }
        }

        let operation = format!("embedding {} for {}", doc.source, name);
        let texts: Vec<String> = doc.sections.iter().map(|s| s.embedding_text()).collect();
        let vectors = cancellable(cancel, &operation, provider.embed(&texts, name.space())).await?;
        if vectors.len() != texts.len() {
            return Err(Error::provider(
                operation,
                format!(
                    "provider returned {} vectors for {} sections",
                    vectors.len(),
                    texts.len()
                ),
            ));
        }
        for (section, vector) in doc.sections.iter_mut().zip(vectors) {
            section.embedding = (!vector.is_empty()).then_some(vector);
        }

        let backend = match existing {
            Some(backend) => backend,
            None => self.get_or_create(&name).await?,
        };
        if !backend.insert(&doc).await? {
            return Ok(InsertOutcome::Found);
        }
        tracing::info!(
            collection = %name,
            hash = %doc.hash,
            source = %doc.source,
            sections = doc.sections.len(),
            "inserted document"
        );
        Ok(InsertOutcome::Inserted)
    }

    /// Fetch a document by content hash or store-native id.
    ///
    /// Hashes are tried across all collections first. Native ids are only
    /// unique within one collection, so an id lookup returns the match from
    /// the first collection in store order.
    pub async fn get(&self, id: &str) -> Result<Document> {
        let backends = self.backends().await?;
        for backend in &backends {
            if let Some(doc) = backend.find_by_hash(id).await? {
                return Ok(doc);
            }
        }
        for backend in &backends {
            if let Some(doc) = backend.find_by_id(id).await? {
                return Ok(doc);
            }
        }
        Err(Error::DocumentNotFound(id.to_string()))
    }

    /// Fetch a document by hash from a known collection.
    pub async fn find_in(&self, name: &CollectionName, hash: &str) -> Result<Option<Document>> {
        self.collection(name).await?.find_by_hash(hash).await
    }

    pub async fn list(&self, collection: &str) -> Result<Vec<DocumentSummary>> {
        let name = CollectionName::parse(collection)?;
        self.collection(&name).await?.list().await
    }

    /// Remove the document with `hash` from every collection holding it.
    ///
    /// Fails without removing anything if one of the holders is read-only.
    pub async fn drop_document(&self, hash: &str) -> Result<()> {
        let mut holders = Vec::new();
        for backend in self.backends().await? {
            if backend.contains(hash).await? {
                if backend.is_read_only() {
                    return Err(Error::ReadOnly(backend.name().to_string()));
                }
                holders.push(backend);
            }
        }
        if holders.is_empty() {
            return Err(Error::DocumentNotFound(hash.to_string()));
        }
        for backend in holders {
            if backend.delete(hash).await? {
                tracing::info!(collection = %backend.name(), hash = %hash, "deleted document");
            }
        }
        Ok(())
    }

    /// Release every backend. Later calls are no-ops; every other operation
    /// fails with [`Error::Closed`] afterwards.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let backends: Vec<Backend> = {
            let mut collections = self.collections.write().await;
            std::mem::take(&mut *collections).into_values().collect()
        };
        for backend in backends {
            backend.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kowalski_core::models::{Line, Section};
    use kowalski_core::EmbeddingSpace;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, texts: &[String], _space: &EmbeddingSpace) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        async fn dims(&self, _space: &EmbeddingSpace) -> anyhow::Result<usize> {
            Ok(2)
        }
    }

    fn doc(title: &str) -> Document {
        Document::new(
            format!("{title}.xml"),
            vec![Section::new(title).with_line(Line::text(format!("all about {title}")))],
        )
    }

    #[tokio::test]
    async fn test_insert_then_found() {
        let store = Knowledge::in_memory();
        let cancel = CancellationToken::new();
        let outcome = store.insert("docs@m1", doc("a"), &FixedEmbedder, &cancel).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
        let outcome = store.insert("docs@m1", doc("a"), &FixedEmbedder, &cancel).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Found);
        assert_eq!(store.list("docs@m1").await.unwrap().len(), 1);
        assert_eq!(store.list_collections().await.unwrap(), vec!["docs@m1"]);
    }

    #[tokio::test]
    async fn test_stored_sections_carry_embeddings() {
        let store = Knowledge::in_memory();
        let a = doc("a");
        store
            .insert("docs@m1", a.clone(), &FixedEmbedder, &CancellationToken::new())
            .await
            .unwrap();
        let stored = store.get(&a.hash).await.unwrap();
        assert!(stored.sections.iter().all(|s| s.has_embedding()));
        assert_eq!(store.get("1").await.unwrap().hash, a.hash);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let store = Knowledge::in_memory();
        let cancel = CancellationToken::new();
        let empty = Document::new("empty.xml", vec![]);
        assert!(matches!(
            store.insert("docs@m1", empty, &FixedEmbedder, &cancel).await,
            Err(Error::EmptyDocument(_))
        ));
        assert!(matches!(
            store.insert("docs", doc("a"), &FixedEmbedder, &cancel).await,
            Err(Error::InvalidCollectionName(_))
        ));
        let mut bad = doc("a");
        bad.hash = "abc:1".to_string();
        store.insert("docs@m1", bad, &FixedEmbedder, &cancel).await.unwrap();
        assert!(store.get("abc:1").await.unwrap_err().is_not_found());
        assert!(store.get(&doc("a").hash).await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_and_not_found() {
        let store = Knowledge::in_memory();
        let a = doc("a");
        store
            .insert("docs@m1", a.clone(), &FixedEmbedder, &CancellationToken::new())
            .await
            .unwrap();
        store.drop_document(&a.hash).await.unwrap();
        assert!(matches!(
            store.drop_document(&a.hash).await,
            Err(Error::DocumentNotFound(_))
        ));
        assert!(store.get(&a.hash).await.unwrap_err().is_not_found());
        assert!(matches!(
            store.list("other@m1").await,
            Err(Error::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = Knowledge::in_memory();
        store.close().await;
        store.close().await;
        assert!(store.is_closed());
        assert!(matches!(store.list_collections().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_open_discovers_collection_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        {
            let store = Knowledge::open(dir.path()).await.unwrap();
            for label in ["zypper@m1", "btrfs@m1"] {
                store
                    .insert(label, doc(label), &FixedEmbedder, &CancellationToken::new())
                    .await
                    .unwrap();
            }
            store.close().await;
        }
        let store = Knowledge::open(dir.path()).await.unwrap();
        assert_eq!(
            store.list_collections().await.unwrap(),
            vec!["btrfs@m1", "zypper@m1"]
        );
        assert_eq!(store.list("zypper@m1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_collection_name_cannot_leave_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let store = Knowledge::open(&root).await.unwrap();
        let result = store
            .insert("../escaped@m1", doc("a"), &FixedEmbedder, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::InvalidCollectionName(_))));
        assert!(!dir.path().join("escaped@m1.sqlite").exists());
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_hash_is_recomputed() {
        let store = Knowledge::in_memory();
        let cancel = CancellationToken::new();
        let mut edited = doc("a");
        edited
            .sections
            .push(Section::new("extra").with_line(Line::text("appended later")));
        let stale = edited.hash.clone();
        let fresh = Document::new("copy.xml", edited.sections.clone());
        assert_ne!(stale, fresh.hash);

        let first = store.insert("docs@m1", edited, &FixedEmbedder, &cancel).await.unwrap();
        let second = store.insert("docs@m1", fresh.clone(), &FixedEmbedder, &cancel).await.unwrap();
        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::Found);

        let listed = store.list("docs@m1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hash, fresh.hash);
        assert!(store.get(&stale).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Knowledge::open(&dir.path().join("absent")).await.unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());
    }
}
