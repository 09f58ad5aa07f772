//! Collaborators that describe the live system the prompt is built for.
//!
//! Both are read-only. Implementations (os-release parsing, local or mocked
//! file inspection) live in the `kowalski` app crate.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Operating system identity rendered into the prompt preamble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    pub version: String,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            name: "Unknown linux".to_string(),
            version: "0".to_string(),
        }
    }
}

#[async_trait]
pub trait SystemInfoProvider: Send + Sync {
    async fn host_info(&self) -> Result<HostInfo>;
}

/// Describes a path mentioned by a document as it exists on the target system.
///
/// A nonexistent path is not an error: implementations return text saying so.
/// Errors are reserved for failures to inspect a path that does exist.
#[async_trait]
pub trait FileEvidence: Send + Sync {
    async fn describe(&self, path: &str) -> Result<String>;
}
