//! Host identity from `/etc/os-release`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use kowalski_core::environment::{HostInfo, SystemInfoProvider};

pub struct OsRelease {
    path: PathBuf,
}

impl Default for OsRelease {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/os-release"),
        }
    }
}

impl OsRelease {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Extract `NAME` and `VERSION`; missing keys keep the defaults.
pub fn parse_os_release(content: &str) -> HostInfo {
    let mut info = HostInfo::default();
    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key {
            "NAME" => info.name = value.to_string(),
            "VERSION" => info.version = value.to_string(),
            _ => {}
        }
    }
    info
}

#[async_trait]
impl SystemInfoProvider for OsRelease {
    async fn host_info(&self) -> Result<HostInfo> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_os_release(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no os-release, using defaults");
                Ok(HostInfo::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }
}

/// Fixed host identity, for evaluation against a system other than this one.
pub struct StaticHost(pub HostInfo);

#[async_trait]
impl SystemInfoProvider for StaticHost {
    async fn host_info(&self) -> Result<HostInfo> {
        Ok(self.0.clone())
    }
}
