//! Per-run container configuration.
//!
//! `ContainerConfig` can only be obtained through [`ContainerConfigBuilder::build`]
//! (or deserialization, which goes through the same checks), so every value
//! the engine sees has already been range-checked.

use serde::{Deserialize, Serialize};
use std::fmt;

use codebox_core::config::parse_memory_limit;
use codebox_core::fs_policy::validate_image_name;

use crate::error::{Result, SandboxError};

pub const DEFAULT_TIMEOUT_SECONDS: u32 = 30;
pub const DEFAULT_MEMORY_LIMIT: &str = "256m";
pub const DEFAULT_CPU_QUOTA: i64 = 50_000; // 50% of one CPU
pub const DEFAULT_PIDS_LIMIT: i64 = 50;

/// Docker-style memory limit (`512k`, `256m`, `1g`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLimit {
    raw: String,
    bytes: i64,
}

impl MemoryLimit {
    pub fn parse(value: &str) -> Result<Self> {
        let bytes = parse_memory_limit(value).ok_or_else(|| {
            SandboxError::configuration(format!(
                "memory_limit must be in format like '256m' or '1g', got '{}'",
                value
            ))
        })?;
        Ok(Self {
            raw: value.to_string(),
            bytes,
        })
    }

    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Validated configuration for a single sandboxed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ContainerConfigBuilder", into = "ContainerConfigBuilder")]
pub struct ContainerConfig {
    image: String,
    command: Vec<String>,
    timeout_seconds: u32,
    memory_limit: MemoryLimit,
    cpu_quota: i64,
    network_enabled: bool,
    read_only: bool,
    pids_limit: i64,
}

impl ContainerConfig {
    /// Start building a configuration with the default limits.
    pub fn builder(image: impl Into<String>, command: Vec<String>) -> ContainerConfigBuilder {
        ContainerConfigBuilder::new(image, command)
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn timeout_seconds(&self) -> u32 {
        self.timeout_seconds
    }

    pub fn memory_limit(&self) -> &MemoryLimit {
        &self.memory_limit
    }

    pub fn cpu_quota(&self) -> i64 {
        self.cpu_quota
    }

    pub fn network_enabled(&self) -> bool {
        self.network_enabled
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn pids_limit(&self) -> i64 {
        self.pids_limit
    }
}

/// Unvalidated container configuration; also the camelCase wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfigBuilder {
    image: String,
    command: Vec<String>,
    #[serde(default = "default_timeout")]
    timeout_seconds: u32,
    #[serde(default = "default_memory")]
    memory_limit: String,
    #[serde(default = "default_cpu_quota")]
    cpu_quota: i64,
    #[serde(default)]
    network_enabled: bool,
    #[serde(default = "default_read_only")]
    read_only: bool,
    #[serde(default = "default_pids")]
    pids_limit: i64,
}

fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_memory() -> String {
    DEFAULT_MEMORY_LIMIT.to_string()
}

fn default_cpu_quota() -> i64 {
    DEFAULT_CPU_QUOTA
}

fn default_read_only() -> bool {
    true
}

fn default_pids() -> i64 {
    DEFAULT_PIDS_LIMIT
}

impl ContainerConfigBuilder {
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            timeout_seconds: default_timeout(),
            memory_limit: default_memory(),
            cpu_quota: default_cpu_quota(),
            network_enabled: false,
            read_only: default_read_only(),
            pids_limit: default_pids(),
        }
    }

    pub fn timeout_seconds(mut self, secs: u32) -> Self {
        self.timeout_seconds = secs;
        self
    }

    pub fn memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = limit.into();
        self
    }

    pub fn cpu_quota(mut self, quota: i64) -> Self {
        self.cpu_quota = quota;
        self
    }

    pub fn network_enabled(mut self, enabled: bool) -> Self {
        self.network_enabled = enabled;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn pids_limit(mut self, limit: i64) -> Self {
        self.pids_limit = limit;
        self
    }

    /// Validate every field and produce the configuration.
    pub fn build(self) -> Result<ContainerConfig> {
        validate_image_name(&self.image).map_err(|e| {
            SandboxError::configuration(format!("Invalid Docker image name: {}", e))
        })?;

        if self.command.is_empty() {
            return Err(SandboxError::configuration("command cannot be empty"));
        }
        if !(1..=300).contains(&self.timeout_seconds) {
            return Err(SandboxError::configuration(format!(
                "timeout_seconds must be between 1 and 300, got {}",
                self.timeout_seconds
            )));
        }
        if !(1_000..=1_000_000).contains(&self.cpu_quota) {
            return Err(SandboxError::configuration(format!(
                "cpu_quota must be between 1000 and 1000000, got {}",
                self.cpu_quota
            )));
        }
        if !(1..=1_000).contains(&self.pids_limit) {
            return Err(SandboxError::configuration(format!(
                "pids_limit must be between 1 and 1000, got {}",
                self.pids_limit
            )));
        }
        let memory_limit = MemoryLimit::parse(&self.memory_limit)?;

        Ok(ContainerConfig {
            image: self.image,
            command: self.command,
            timeout_seconds: self.timeout_seconds,
            memory_limit,
            cpu_quota: self.cpu_quota,
            network_enabled: self.network_enabled,
            read_only: self.read_only,
            pids_limit: self.pids_limit,
        })
    }
}

impl TryFrom<ContainerConfigBuilder> for ContainerConfig {
    type Error = SandboxError;

    fn try_from(builder: ContainerConfigBuilder) -> Result<Self> {
        builder.build()
    }
}

impl From<ContainerConfig> for ContainerConfigBuilder {
    fn from(config: ContainerConfig) -> Self {
        Self {
            image: config.image,
            command: config.command,
            timeout_seconds: config.timeout_seconds,
            memory_limit: config.memory_limit.raw,
            cpu_quota: config.cpu_quota,
            network_enabled: config.network_enabled,
            read_only: config.read_only,
            pids_limit: config.pids_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn python_cmd() -> Vec<String> {
        vec!["python".into(), "-c".into()]
    }

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::builder("python:3.12", python_cmd())
            .build()
            .unwrap();
        assert_eq!(config.timeout_seconds(), 30);
        assert_eq!(config.memory_limit().as_str(), "256m");
        assert_eq!(config.memory_limit().bytes(), 256 * 1024 * 1024);
        assert_eq!(config.cpu_quota(), 50_000);
        assert!(!config.network_enabled());
        assert!(config.read_only());
        assert_eq!(config.pids_limit(), 50);
    }

    #[test]
    fn test_memory_limit_formats() {
        for limit in ["256m", "1g", "512k", "1G"] {
            assert!(
                ContainerConfig::builder("python", python_cmd())
                    .memory_limit(limit)
                    .build()
                    .is_ok(),
                "{} should be accepted",
                limit
            );
        }

        let err = ContainerConfig::builder("python", python_cmd())
            .memory_limit("256mb")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("memory_limit must be in format"));
    }

    #[test]
    fn test_range_checks() {
        let base = || ContainerConfig::builder("python", python_cmd());

        assert!(base().timeout_seconds(0).build().is_err());
        assert!(base().timeout_seconds(301).build().is_err());
        assert!(base().timeout_seconds(1).build().is_ok());
        assert!(base().timeout_seconds(300).build().is_ok());

        assert!(base().cpu_quota(999).build().is_err());
        assert!(base().cpu_quota(1_000_001).build().is_err());
        assert!(base().cpu_quota(1_000).build().is_ok());

        assert!(base().pids_limit(0).build().is_err());
        assert!(base().pids_limit(1_001).build().is_err());
        assert!(base().pids_limit(1_000).build().is_ok());
    }

    #[test]
    fn test_image_validation() {
        let err = ContainerConfig::builder("bad@image", python_cmd())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Invalid Docker image name"));

        let err = ContainerConfig::builder("../../../etc/passwd", python_cmd())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Path traversal"));

        assert!(ContainerConfig::builder("python", vec![]).build().is_err());
    }

    #[test]
    fn test_wire_format_is_validated() {
        let config: ContainerConfig = serde_json::from_value(json!({
            "image": "codebox-python:latest",
            "command": ["python", "-c"],
            "timeoutSeconds": 5,
            "memoryLimit": "1g",
            "networkEnabled": true
        }))
        .unwrap();
        assert_eq!(config.timeout_seconds(), 5);
        assert!(config.network_enabled());
        assert_eq!(config.pids_limit(), 50);

        let bad = serde_json::from_value::<ContainerConfig>(json!({
            "image": "codebox-python:latest",
            "command": ["python", "-c"],
            "memoryLimit": "256mb"
        }));
        assert!(bad.is_err());

        let out = serde_json::to_value(&config).unwrap();
        assert_eq!(out["memoryLimit"], "1g");
        assert_eq!(out["cpuQuota"], 50_000);
    }
}
