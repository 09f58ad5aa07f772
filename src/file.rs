//! File evidence providers.
//!
//! [`LocalFiles`] inspects the running system (optionally below a chroot);
//! [`MockFiles`] serves canned descriptions for evaluation and tests.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use kowalski_core::environment::FileEvidence;

use crate::config::ContextConfig;

pub struct LocalFiles {
    chroot: Option<PathBuf>,
    max_dir_entries: usize,
    max_file_size: u64,
}

impl LocalFiles {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            chroot: None,
            max_dir_entries: config.max_dir_entries,
            max_file_size: config.max_file_size,
        }
    }

    /// Resolve every path below `root` instead of `/`.
    pub fn with_chroot(mut self, root: impl Into<PathBuf>) -> Self {
        self.chroot = Some(root.into());
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.chroot {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }

    async fn describe_dir(&self, shown: &str, path: &Path) -> Result<String> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("Failed to read directory: {}", path.display()))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            entries.push(entry.file_name().to_string_lossy().into_owned());
            if entries.len() >= self.max_dir_entries {
                return Ok(format!(
                    "* directory {} has more than {} entries\n",
                    shown, self.max_dir_entries
                ));
            }
        }
        entries.sort();
        if entries.is_empty() {
            return Ok(format!("* directory {} is empty\n", shown));
        }
        Ok(format!(
            "* directory {} has following entries {}\n",
            shown,
            entries.join(",")
        ))
    }

    async fn describe_file(&self, shown: &str, path: &Path, size: u64) -> Result<String> {
        if size >= self.max_file_size {
            return Ok(format!(
                "* path {} exists and larger than {} bytes\n",
                shown, self.max_file_size
            ));
        }
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        match String::from_utf8(bytes) {
            Ok(content) => Ok(format!(
                "* path {} has following content: ```\n{}\n```\n",
                shown,
                content.trim_end()
            )),
            Err(_) => Ok(format!("* path {} is a binary file\n", shown)),
        }
    }
}

#[async_trait]
impl FileEvidence for LocalFiles {
    async fn describe(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path);
        let meta = match tokio::fs::metadata(&resolved).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(if path.ends_with('/') {
                    format!("* directory {} doesn't exist on the system\n", path)
                } else {
                    format!("* path {} doesn't exist on the system\n", path)
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to inspect {}", resolved.display()))
            }
        };
        if meta.is_dir() {
            self.describe_dir(path, &resolved).await
        } else {
            self.describe_file(path, &resolved, meta.len()).await
        }
    }
}

/// Canned path descriptions. Unknown paths describe as empty text.
#[derive(Debug, Default, Clone)]
pub struct MockFiles {
    content: HashMap<String, String>,
}

impl MockFiles {
    pub fn new(content: HashMap<String, String>) -> Self {
        Self { content }
    }

    pub fn with(mut self, path: impl Into<String>, description: impl Into<String>) -> Self {
        self.content.insert(path.into(), description.into());
        self
    }
}

#[async_trait]
impl FileEvidence for MockFiles {
    async fn describe(&self, path: &str) -> Result<String> {
        match self.content.get(path) {
            Some(text) => Ok(text.clone()),
            None => {
                tracing::warn!(path, "no mock content for path");
                Ok(String::new())
            }
        }
    }
}
