//! Batch ingestion of source files into one collection.
//!
//! Each file is converted and inserted on its own. A file that fails to
//! convert or embed is reported and skipped; documents committed before it
//! stay committed. Cancellation stops the batch after the current file.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use kowalski_core::embedding::EmbeddingProvider;

use crate::convert::convert_file;
use crate::knowledge::{InsertOutcome, Knowledge};

/// What happened to one input file.
#[derive(Debug)]
pub enum FileOutcome {
    Inserted { hash: String },
    Found { hash: String },
    Failed { error: String },
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub files: Vec<(PathBuf, FileOutcome)>,
    /// The batch stopped early because it was cancelled.
    pub cancelled: bool,
}

impl IngestReport {
    pub fn inserted(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Inserted { .. }))
    }

    pub fn found(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Found { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|(_, o)| pred(o)).count()
    }
}

pub async fn add_files(
    knowledge: &Knowledge,
    collection: &str,
    paths: &[PathBuf],
    provider: &dyn EmbeddingProvider,
    cancel: &CancellationToken,
) -> IngestReport {
    let mut report = IngestReport::default();
    for path in paths {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let outcome = add_file(knowledge, collection, path, provider, cancel).await;
        if let FileOutcome::Failed { error } = &outcome {
            tracing::warn!(path = %path.display(), %error, "failed to add document");
        }
        report.files.push((path.clone(), outcome));
    }
    report.cancelled = cancel.is_cancelled();
    report
}

async fn add_file(
    knowledge: &Knowledge,
    collection: &str,
    path: &Path,
    provider: &dyn EmbeddingProvider,
    cancel: &CancellationToken,
) -> FileOutcome {
    let doc = match convert_file(path) {
        Ok(doc) => doc,
        Err(e) => {
            return FileOutcome::Failed {
                error: format!("{:#}", e),
            }
        }
    };
    let hash = doc.hash.clone();
    match knowledge.insert(collection, doc, provider, cancel).await {
        Ok(InsertOutcome::Inserted) => FileOutcome::Inserted { hash },
        Ok(InsertOutcome::Found) => FileOutcome::Found { hash },
        Err(e) => FileOutcome::Failed {
            error: format!("{}: {}", path.display(), e),
        },
    }
}
