//! # Kowalski Core
//!
//! Shared, runtime-free logic for Kowalski: the document model, content
//! hashing, collection naming, the flat similarity index, section rendering,
//! the collection storage trait, and the traits of the external collaborators
//! (embedding provider, system info, file evidence).
//!
//! This crate contains no tokio, sqlx, network or filesystem I/O. Concrete
//! backends and providers live in the `kowalski` application crate.

pub mod collection;
pub mod embedding;
pub mod environment;
pub mod error;
pub mod index;
pub mod models;
pub mod render;
pub mod store;

pub use collection::{CollectionName, EmbeddingSpace};
pub use error::{Error, Result};
pub use index::{Metric, SectionId, SimilarityIndex};
pub use models::{Document, DocumentSummary, Line, LineType, RetrievedSection, Section};
