//! CLI command handlers.
//!
//! Each handler takes the already opened store or engine, runs one
//! operation and prints the result. Errors propagate to `main`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;

use kowalski_core::embedding::EmbeddingProvider;
use kowalski_core::Document;

use crate::context::ContextAssembler;
use crate::evaluate::{load_evaluations, write_report, Evaluator};
use crate::ingest::{add_files, FileOutcome};
use crate::knowledge::Knowledge;
use crate::retrieve::Retriever;

/// Output format for `get` and `list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Rendered sections.
    #[default]
    Full,
    /// Source and section titles only.
    Titles,
    Json,
    Yaml,
}

fn without_embeddings(mut doc: Document) -> Document {
    for section in &mut doc.sections {
        section.embedding = None;
    }
    doc
}

pub async fn run_collections(knowledge: &Knowledge) -> Result<()> {
    let collections = knowledge.list_collections().await?;
    if collections.is_empty() {
        println!("No collections.");
        return Ok(());
    }
    for name in collections {
        let count = knowledge.list(&name).await?.len();
        println!("{}  ({} documents)", name, count);
    }
    Ok(())
}

pub async fn run_add(
    knowledge: &Knowledge,
    provider: &dyn EmbeddingProvider,
    collection: &str,
    files: &[PathBuf],
    cancel: &CancellationToken,
) -> Result<()> {
    let report = add_files(knowledge, collection, files, provider, cancel).await;
    for (path, outcome) in &report.files {
        match outcome {
            FileOutcome::Inserted { hash } => println!("added  {}  {}", hash, path.display()),
            FileOutcome::Found { hash } => println!("found  {}  {}", hash, path.display()),
            FileOutcome::Failed { error } => println!("failed {}: {}", path.display(), error),
        }
    }
    println!("add {}", collection);
    println!("  inserted: {}", report.inserted());
    println!("  already present: {}", report.found());
    println!("  failed: {}", report.failed());
    if report.cancelled {
        bail!("ingestion cancelled");
    }
    if report.failed() > 0 {
        bail!("{} of {} files failed", report.failed(), report.files.len());
    }
    println!("ok");
    Ok(())
}

pub async fn run_list(knowledge: &Knowledge, collection: &str, format: OutputFormat) -> Result<()> {
    print!("{}", format_list(knowledge, collection, format).await?);
    Ok(())
}

/// Listing text for `collection`. `Titles` loads each document to show its
/// section titles; the other formats only use the stored summaries.
pub async fn format_list(
    knowledge: &Knowledge,
    collection: &str,
    format: OutputFormat,
) -> Result<String> {
    let summaries = knowledge.list(collection).await?;
    let mut out = String::new();
    match format {
        OutputFormat::Json => out = serde_json::to_string_pretty(&summaries)? + "\n",
        OutputFormat::Yaml => out = serde_yaml::to_string(&summaries)?,
        OutputFormat::Titles => {
            for s in summaries {
                out.push_str(&knowledge.get(&s.hash).await?.render_titles());
            }
        }
        OutputFormat::Full => {
            for s in summaries {
                out.push_str(&format!(
                    "{:>5}  {}  {}  sections={} files={} commands={}  {}\n",
                    s.id,
                    s.hash,
                    s.source,
                    s.sections,
                    s.files,
                    s.commands,
                    s.added_at.format("%Y-%m-%d %H:%M")
                ));
            }
        }
    }
    if out.is_empty() {
        out.push_str("No documents.\n");
    }
    Ok(out)
}

pub async fn run_get(knowledge: &Knowledge, id: &str, format: OutputFormat) -> Result<()> {
    let doc = without_embeddings(knowledge.get(id).await?);
    match format {
        OutputFormat::Full => print!("{}", doc.render()),
        OutputFormat::Titles => print!("{}", doc.render_titles()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&doc)?),
    }
    Ok(())
}

pub async fn run_drop(knowledge: &Knowledge, hash: &str) -> Result<()> {
    knowledge.drop_document(hash).await?;
    println!("dropped {}", hash);
    Ok(())
}

pub async fn run_search(
    retriever: &Retriever,
    question: &str,
    collections: &[String],
    k: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let results = retriever.get_sections(question, collections, k, cancel).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({} in {})",
            i + 1,
            r.distance,
            r.section.title,
            r.document_hash,
            r.collection
        );
    }
    Ok(())
}

pub async fn run_context(
    assembler: &ContextAssembler,
    question: &str,
    collections: &[String],
    budget: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let prompt = assembler
        .build_context(question, collections, budget, cancel)
        .await?;
    println!("{}", prompt);
    Ok(())
}

pub async fn run_evaluate(
    evaluator: &Evaluator,
    files: &[PathBuf],
    collections: &[String],
    budget: usize,
    output_dir: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let evaluations = load_evaluations(files)?;
    if evaluations.is_empty() {
        bail!("no evaluations found in the given files");
    }
    let report = evaluator.run(evaluations, collections, budget, cancel).await?;
    let path = write_report(&report, output_dir)?;
    println!("evaluation {}", report.id);
    println!("  entries: {}", report.evaluations.len());
    println!("  report: {}", path.display());
    Ok(())
}
