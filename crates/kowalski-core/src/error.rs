//! Error taxonomy shared by the store, the index and the retrieval pipeline.
//!
//! Every variant carries enough context (collection, document, identifier or
//! operation) for the caller to tell which input caused the failure.
//! A collection opened read-only is not an error by itself; only a mutation
//! against it yields [`Error::ReadOnly`].

use thiserror::Error;

/// Boxed error source from a backend or collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("invalid collection name '{0}': must be 'label@embeddingmodel'")]
    InvalidCollectionName(String),

    #[error(
        "different embedding spaces in collections: {first} uses '{first_space}', {second} uses '{second_space}'"
    )]
    IncompatibleEmbeddingSpace {
        first: String,
        first_space: String,
        second: String,
        second_space: String,
    },

    #[error("index entry '{id}' could not be resolved in collections [{}]", .collections.join(", "))]
    IndexConsistencyFault { id: String, collections: Vec<String> },

    #[error("{operation} failed: {source}")]
    Provider {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("collection {0} is read-only")]
    ReadOnly(String),

    #[error("document '{0}' has no sections")]
    EmptyDocument(String),

    #[error("invalid document hash '{0}'")]
    InvalidHash(String),

    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("similarity index has not been built")]
    IndexNotBuilt,

    #[error("similarity index is already built; invalidate it before rebuilding")]
    IndexAlreadyBuilt,

    #[error("collection {collection}: {source}")]
    Backend {
        collection: String,
        #[source]
        source: BoxError,
    },

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("knowledge store is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a collaborator failure with the operation it interrupted.
    pub fn provider(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Provider {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Wrap a storage backend failure with the collection it happened in.
    pub fn backend(collection: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Backend {
            collection: collection.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::DocumentNotFound(_) | Error::CollectionNotFound(_)
        )
    }
}
