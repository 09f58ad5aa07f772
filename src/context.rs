//! Prompt assembly under a size budget.
//!
//! The prompt starts with a preamble naming the host system, followed by
//! retrieved sections in ranked order, each with live evidence for the files
//! it mentions, and ends with the user's task.
//!
//! Sections are added greedily. Before each one the assembler estimates
//! `context + candidate + chars_per_token * preamble` in characters and stops
//! at the first candidate that would push the estimate past the budget.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kowalski_core::environment::{FileEvidence, HostInfo, SystemInfoProvider};
use kowalski_core::{Result, RetrievedSection};

use crate::cancel::cancellable;
use crate::config::Config;
use crate::retrieve::Retriever;

const SECTION_INTRO: &str = "This help document may be related to the problem:\n";
const FILES_INTRO: &str = "On the actual system we have following files and directories:\n";

pub fn render_preamble(host: &HostInfo) -> String {
    format!(
        "Your name is Kowalski and you are a helpful assistant for a {} {} system.\n",
        host.name, host.version
    )
}

pub fn render_prompt(preamble: &str, context: &str, task: &str) -> String {
    format!(
        "{preamble}Answer in short sentences.\n\
         If your answer contains a shell command start it with <command> and end it with </command>.\n\
         If your answer contains a new configuration start the changed file with <file id=filename> and end it with </file>.\n\
         {context}\n\
         The user wants help with following task:\n\
         {task}"
    )
}

/// The finished prompt and the sections that made it in.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub prompt: String,
    pub preamble: String,
    pub sections: Vec<RetrievedSection>,
}

pub struct ContextAssembler {
    retriever: Arc<Retriever>,
    system: Arc<dyn SystemInfoProvider>,
    files: Arc<dyn FileEvidence>,
    top_k: usize,
    chars_per_token: usize,
}

impl ContextAssembler {
    pub fn new(
        retriever: Arc<Retriever>,
        system: Arc<dyn SystemInfoProvider>,
        files: Arc<dyn FileEvidence>,
        config: &Config,
    ) -> Self {
        Self {
            retriever,
            system,
            files,
            top_k: config.retrieval.top_k,
            chars_per_token: config.context.chars_per_token,
        }
    }

    pub async fn build_context(
        &self,
        question: &str,
        collections: &[String],
        budget: usize,
        cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(self
            .assemble(question, collections, budget, cancel)
            .await?
            .prompt)
    }

    pub async fn assemble(
        &self,
        question: &str,
        collections: &[String],
        budget: usize,
        cancel: &CancellationToken,
    ) -> Result<Assembly> {
        let host = cancellable(cancel, "reading host info", self.system.host_info()).await?;
        let preamble = render_preamble(&host);
        let reserved = self.chars_per_token.saturating_mul(preamble.len());

        let candidates = self
            .retriever
            .get_sections(question, collections, self.top_k, cancel)
            .await?;

        let mut seen = HashSet::new();
        let mut context = String::new();
        let mut included = Vec::new();
        for candidate in candidates {
            if !seen.insert((candidate.document_hash.clone(), candidate.section.title.clone())) {
                continue;
            }
            let rendered = self.render_candidate(&candidate, cancel).await?;
            let estimate = context.len() + rendered.len() + reserved;
            if estimate > budget {
                tracing::debug!(
                    estimate,
                    budget,
                    included = included.len(),
                    "context budget reached"
                );
                break;
            }
            context.push_str(&rendered);
            included.push(candidate);
        }

        Ok(Assembly {
            prompt: render_prompt(&preamble, &context, question),
            preamble,
            sections: included,
        })
    }

    async fn render_candidate(
        &self,
        candidate: &RetrievedSection,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut out = String::from(SECTION_INTRO);
        out.push_str(&candidate.section.render());
        out.push('\n');
        if !candidate.section.files.is_empty() {
            out.push_str(FILES_INTRO);
            for path in &candidate.section.files {
                let operation = format!("describing {} for document {}", path, candidate.document_hash);
                out.push_str(&cancellable(cancel, &operation, self.files.describe(path)).await?);
            }
        }
        Ok(out)
    }
}
