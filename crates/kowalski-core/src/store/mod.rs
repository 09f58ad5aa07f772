//! Storage abstraction for a single collection.
//!
//! The [`CollectionBackend`] trait defines the per-collection operations the
//! knowledge store builds on, enabling pluggable backends (SQLite files,
//! in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes,
//! serialize their own writes, and reject every mutation with
//! [`Error::ReadOnly`](crate::Error::ReadOnly) when opened read-only.

pub mod memory;

use async_trait::async_trait;

use crate::collection::CollectionName;
use crate::error::Result;
use crate::models::{Document, DocumentSummary};

/// Content-addressed document storage for one collection.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`contains`](CollectionBackend::contains) | Hash lookup without materializing the document |
/// | [`find_by_hash`](CollectionBackend::find_by_hash) | Fetch a full document by content hash |
/// | [`find_by_id`](CollectionBackend::find_by_id) | Fetch a full document by store-native id |
/// | [`insert`](CollectionBackend::insert) | Persist a document atomically unless its hash exists |
/// | [`delete`](CollectionBackend::delete) | Remove a document by hash |
/// | [`list`](CollectionBackend::list) | Summaries without embeddings |
/// | [`documents`](CollectionBackend::documents) | All documents in insertion order |
#[async_trait]
pub trait CollectionBackend: Send + Sync {
    fn name(&self) -> &CollectionName;

    /// Whether the collection was degraded to read-only when opened.
    fn is_read_only(&self) -> bool;

    async fn contains(&self, hash: &str) -> Result<bool>;

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Document>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>>;

    /// Insert all sections of `doc` or nothing. Returns `false` without
    /// writing when a document with the same hash is already stored.
    async fn insert(&self, doc: &Document) -> Result<bool>;

    /// Returns `false` when no document with `hash` exists.
    async fn delete(&self, hash: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<DocumentSummary>>;

    /// Every document with embeddings, in insertion order.
    async fn documents(&self) -> Result<Vec<Document>>;

    /// Release the underlying handle. Safe to call more than once.
    async fn close(&self);
}
