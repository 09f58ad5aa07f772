//! # Kowalski
//!
//! A retrieval-augmented assistant for Linux systems. Help documents are
//! converted into sections, embedded, and stored in per-collection SQLite
//! files. A question is answered by embedding it, searching a flat
//! similarity index over the chosen collections, and assembling the nearest
//! sections plus live evidence from the host into a size-bounded prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ Converters │──▶│  Knowledge   │──▶│ label@model.sqlite │
//! │ YAML / MD  │   │ insert+embed │   │  one per collection│
//! └────────────┘   └──────┬───────┘   └────────────────────┘
//!                         │
//!                  ┌──────▼───────┐   ┌──────────────────┐
//!                  │  Retriever   │──▶│ ContextAssembler │──▶ prompt
//!                  │ flat index   │   │ budget + evidence│
//!                  └──────────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kowalski add zypper@nomic-embed-text docs/zypper/*.yaml
//! kowalski list zypper@nomic-embed-text
//! kowalski context "how do I refresh my repositories?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Collection file connections |
//! | [`migrate`] | Collection schema |
//! | [`sqlite_store`] | SQLite collection backend |
//! | [`knowledge`] | Collection store: insert, get, list, drop |
//! | [`retrieve`] | Similarity index build and section retrieval |
//! | [`context`] | Prompt assembly under a budget |
//! | [`embedding`] | Ollama embedding provider |
//! | [`convert`] | Curated YAML and Markdown converters |
//! | [`ingest`] | Batch ingestion |
//! | [`evaluate`] | Batch prompt evaluation reports |
//! | [`file`] | File evidence providers |
//! | [`sysinfo`] | Host identity |
//! | [`cancel`] | Cancellable collaborator calls |
//! | [`commands`] | CLI command handlers |

pub mod cancel;
pub mod commands;
pub mod config;
pub mod context;
pub mod convert;
pub mod db;
pub mod embedding;
pub mod evaluate;
pub mod file;
pub mod ingest;
pub mod knowledge;
pub mod migrate;
pub mod retrieve;
pub mod sqlite_store;
pub mod sysinfo;
