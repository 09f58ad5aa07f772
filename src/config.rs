//! TOML configuration parsing and validation.
//!
//! Every section is optional; [`Config::default`] describes a local Ollama
//! instance and the system-wide store under `/var/lib/kowalski`. The parsed
//! sections are handed to the constructors that need them; nothing is kept
//! in global state.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kowalski_core::Metric;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Store root: the directory holding one file per collection.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/kowalski")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Known dimensionality per embedding space; skips the model lookup.
    #[serde(default)]
    pub dims: HashMap<String, usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: default_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            dims: HashMap::new(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub metric: Metric,
    /// Candidate sections fetched per prompt.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            metric: Metric::default(),
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Default prompt budget in model tokens.
    #[serde(default = "default_budget")]
    pub budget: usize,
    /// Conservative characters-per-token ratio.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    #[serde(default = "default_max_dir_entries")]
    pub max_dir_entries: usize,
    /// Files larger than this many bytes are described, not shown.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            chars_per_token: default_chars_per_token(),
            max_dir_entries: default_max_dir_entries(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_budget() -> usize {
    8192
}
fn default_chars_per_token() -> usize {
    4
}
fn default_max_dir_entries() -> usize {
    10
}
fn default_max_file_size() -> u64 {
    512
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// System-wide configuration, read when no `--config` is given.
pub const SYSTEM_CONFIG: &str = "/etc/kowalski.toml";

/// Load `path` if given, else the system config if present, else defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None if Path::new(SYSTEM_CONFIG).exists() => load_config(Path::new(SYSTEM_CONFIG)),
        None => Ok(Config::default()),
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.context.chars_per_token == 0 {
        bail!("context.chars_per_token must be >= 1");
    }
    if config.context.budget == 0 {
        bail!("context.budget must be >= 1");
    }
    if let Some((space, _)) = config.embedding.dims.iter().find(|(_, d)| **d == 0) {
        bail!("embedding.dims for '{}' must be > 0", space);
    }
    match config.embedding.provider.as_str() {
        "disabled" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }
    Ok(())
}
