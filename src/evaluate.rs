//! Batch evaluation: run named prompts through context assembly and record
//! the assembled prompt of each one in a YAML report.
//!
//! An evaluation file holds either a single entry or a list under
//! `evaluations`:
//!
//! ```yaml
//! evaluations:
//!   - name: refresh
//!     prompt: how do I refresh my repositories?
//!     OS: openSUSE Leap 15.6
//!     files:
//!       - path: /etc/zypp/repos.d/
//!         content: "* directory /etc/zypp/repos.d/ has following entries oss.repo\n"
//! ```
//!
//! `OS` and `files` replace the live host for that entry, so evaluations
//! describe the system they were written for rather than the one running
//! them. Generating an answer from the prompt is left to the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kowalski_core::environment::{FileEvidence, HostInfo, SystemInfoProvider};

use crate::config::Config;
use crate::context::ContextAssembler;
use crate::file::MockFiles;
use crate::retrieve::Retriever;
use crate::sysinfo::StaticHost;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub name: String,
    pub prompt: String,
    /// Host the prompt is meant for, as `name version`.
    #[serde(rename = "OS", default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<EvaluationFile>,
    /// Expected answers, carried through to the report.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<String>,
    /// Assembled prompt; filled in by the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Titles of the sections that made it into the prompt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFile {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EvaluationInput {
    List { evaluations: Vec<Evaluation> },
    Single(Evaluation),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub id: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<String>,
    pub budget: usize,
    pub evaluations: Vec<Evaluation>,
}

pub fn parse_evaluations(content: &str, source: &str) -> Result<Vec<Evaluation>> {
    let input: EvaluationInput = serde_yaml::from_str(content)
        .with_context(|| format!("Failed to parse evaluation file: {}", source))?;
    Ok(match input {
        EvaluationInput::List { evaluations } => evaluations,
        EvaluationInput::Single(evaluation) => vec![evaluation],
    })
}

/// Read every file in order. Missing files are skipped with a warning.
pub fn load_evaluations(paths: &[PathBuf]) -> Result<Vec<Evaluation>> {
    let mut evaluations = Vec::new();
    for path in paths {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "evaluation file doesn't exist");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        evaluations.extend(parse_evaluations(&content, &path.display().to_string())?);
    }
    Ok(evaluations)
}

fn host_from_os(os: &str) -> HostInfo {
    match os.trim().rsplit_once(' ') {
        Some((name, version)) => HostInfo {
            name: name.trim().to_string(),
            version: version.to_string(),
        },
        None => HostInfo {
            name: os.trim().to_string(),
            version: String::new(),
        },
    }
}

pub struct Evaluator {
    retriever: Arc<Retriever>,
    system: Arc<dyn SystemInfoProvider>,
    files: Arc<dyn FileEvidence>,
    config: Config,
}

impl Evaluator {
    /// `system` and `files` serve entries that don't describe their own host.
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
            config: config.clone(),
        }
    }

    fn assembler_for(&self, evaluation: &Evaluation) -> ContextAssembler {
        let system: Arc<dyn SystemInfoProvider> = match &evaluation.os {
            Some(os) => Arc::new(StaticHost(host_from_os(os))),
            None => self.system.clone(),
        };
        let files: Arc<dyn FileEvidence> = if evaluation.files.is_empty() {
            self.files.clone()
        } else {
            let content: HashMap<String, String> = evaluation
                .files
                .iter()
                .map(|f| (f.path.clone(), f.content.clone()))
                .collect();
            Arc::new(MockFiles::new(content))
        };
        ContextAssembler::new(self.retriever.clone(), system, files, &self.config)
    }

    /// Assemble the prompt of every evaluation. The first failure aborts the
    /// run, naming the evaluation it happened in.
    pub async fn run(
        &self,
        evaluations: Vec<Evaluation>,
        collections: &[String],
        budget: usize,
        cancel: &CancellationToken,
    ) -> Result<EvaluationReport> {
        let id = Uuid::new_v4().to_string();
        tracing::info!(%id, count = evaluations.len(), "starting evaluation");
        let started_at = Utc::now();

        let mut done = Vec::with_capacity(evaluations.len());
        for mut evaluation in evaluations {
            tracing::info!(name = %evaluation.name, "on evaluation");
            let assembly = self
                .assembler_for(&evaluation)
                .assemble(&evaluation.prompt, collections, budget, cancel)
                .await
                .with_context(|| format!("evaluation '{}' failed", evaluation.name))?;
            evaluation.sections = assembly
                .sections
                .iter()
                .map(|s| s.section.title.clone())
                .collect();
            evaluation.context = Some(assembly.prompt);
            done.push(evaluation);
        }

        Ok(EvaluationReport {
            id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            collections: collections.to_vec(),
            budget,
            evaluations: done,
        })
    }
}

/// Write `report` as `<id>.yaml` into `dir` and return the path.
pub fn write_report(report: &EvaluationReport, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!("{}.yaml", report.id));
    let yaml = serde_yaml::to_string(report)?;
    std::fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kowalski_core::embedding::EmbeddingProvider;
    use kowalski_core::{Document, EmbeddingSpace, Line, Section};

    use crate::config::RetrievalConfig;
    use crate::knowledge::Knowledge;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        async fn embed(&self, texts: &[String], _space: &EmbeddingSpace) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        async fn dims(&self, _space: &EmbeddingSpace) -> anyhow::Result<usize> {
            Ok(2)
        }
    }

    const LIST: &str = r#"
evaluations:
  - name: refresh
    prompt: how do I refresh my repositories?
    OS: openSUSE Leap 15.6
    files:
      - path: /etc/zypp/repos.d/
        content: "* directory /etc/zypp/repos.d/ has following entries oss.repo\n"
    answers:
      - zypper refresh
  - name: plain
    prompt: what is btrfs?
"#;

    async fn evaluator() -> Evaluator {
        let knowledge = Arc::new(Knowledge::in_memory());
        let doc = Document::new(
            "zypper.yaml",
            vec![Section::new("Refresh repositories")
                .with_line(Line::command("zypper refresh"))
                .with_files(["/etc/zypp/repos.d/"])],
        );
        knowledge
            .insert("zypper@m1", doc, &UnitEmbedder, &CancellationToken::new())
            .await
            .unwrap();
        let retriever = Arc::new(Retriever::new(
            knowledge,
            Arc::new(UnitEmbedder),
            &RetrievalConfig::default(),
        ));
        Evaluator::new(
            retriever,
            Arc::new(StaticHost(HostInfo {
                name: "Live".into(),
                version: "1".into(),
            })),
            Arc::new(MockFiles::default()),
            &Config::default(),
        )
    }

    #[test]
    fn test_parse_list_and_single() {
        let list = parse_evaluations(LIST, "list.yaml").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].os.as_deref(), Some("openSUSE Leap 15.6"));
        assert_eq!(list[0].files[0].path, "/etc/zypp/repos.d/");

        let single = parse_evaluations("name: one\nprompt: hi\n", "one.yaml").unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].name, "one");
        assert!(parse_evaluations("- 1\n- 2\n", "bad.yaml").is_err());
    }

    #[test]
    fn test_load_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("list.yaml");
        std::fs::write(&present, LIST).unwrap();
        let loaded = load_evaluations(&[dir.path().join("absent.yaml"), present]).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_host_from_os() {
        assert_eq!(
            host_from_os("openSUSE Leap 15.6"),
            HostInfo {
                name: "openSUSE Leap".into(),
                version: "15.6".into()
            }
        );
        assert_eq!(host_from_os("Tumbleweed").version, "");
    }

    #[tokio::test]
    async fn test_run_records_assembled_prompts() {
        let evaluator = evaluator().await;
        let evaluations = parse_evaluations(LIST, "list.yaml").unwrap();
        let report = evaluator
            .run(evaluations, &[], 8192, &CancellationToken::new())
            .await
            .unwrap();

        assert!(Uuid::parse_str(&report.id).is_ok());
        assert_eq!(report.evaluations.len(), 2);

        let refresh = &report.evaluations[0];
        let prompt = refresh.context.as_deref().unwrap();
        assert!(prompt.starts_with(
            "Your name is Kowalski and you are a helpful assistant for a openSUSE Leap 15.6 system.\n"
        ));
        assert!(prompt.contains("has following entries oss.repo"));
        assert_eq!(refresh.sections, vec!["Refresh repositories"]);
        assert_eq!(refresh.answers, vec!["zypper refresh"]);

        let plain = report.evaluations[1].context.as_deref().unwrap();
        assert!(plain.contains("assistant for a Live 1 system"));
        assert!(plain.ends_with("what is btrfs?"));
    }

    #[tokio::test]
    async fn test_report_written_as_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = evaluator().await;
        let evaluations = parse_evaluations("name: one\nprompt: hi\n", "one.yaml").unwrap();
        let report = evaluator
            .run(evaluations, &["zypper@m1".to_string()], 8192, &CancellationToken::new())
            .await
            .unwrap();
        let path = write_report(&report, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), format!("{}.yaml", report.id));

        let read: EvaluationReport =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read.id, report.id);
        assert_eq!(read.collections, vec!["zypper@m1"]);
        assert_eq!(read.evaluations, report.evaluations);
    }

    #[tokio::test]
    async fn test_unknown_collection_names_the_evaluation() {
        let evaluator = evaluator().await;
        let evaluations = parse_evaluations("name: lost\nprompt: hi\n", "one.yaml").unwrap();
        let err = evaluator
            .run(evaluations, &["other@m1".to_string()], 8192, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("evaluation 'lost' failed"));
    }
}
