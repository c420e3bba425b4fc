use config::{Config, Environment, File};
use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxSettings {
    pub enabled: bool,
    pub timeout_seconds: u32,
    pub memory_limit: String,
    pub cpu_quota: i64,
    pub network_enabled: bool,
    pub seccomp_profile_path: Option<String>,
    pub build_context: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TelemetrySettings {
    pub json_logs: bool,
    pub log_filter: Option<String>,
    pub metrics_listen: Option<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: 30,
            memory_limit: "256m".into(),
            cpu_quota: 50_000, // 50% of one CPU
            network_enabled: false,
            seccomp_profile_path: Some("docker/seccomp-profile.json".into()),
            build_context: "docker".into(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let env = std::env::var("CODEBOX_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map CODEBOX__SANDBOX__TIMEOUT_SECONDS=60 to sandbox.timeout_seconds
            .add_source(Environment::with_prefix("CODEBOX").separator("__"))
            .build()?;

        let cfg: Self = s.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.sandbox.validate()
    }
}

impl SandboxSettings {
    pub fn validate(&self) -> Result<()> {
        if !(1..=300).contains(&self.timeout_seconds) {
            return Err(Error::configuration(format!(
                "timeout_seconds must be between 1 and 300, got {}",
                self.timeout_seconds
            )));
        }
        if !(1_000..=1_000_000).contains(&self.cpu_quota) {
            return Err(Error::configuration(format!(
                "cpu_quota must be between 1000 and 1000000, got {}",
                self.cpu_quota
            )));
        }
        if parse_memory_limit(&self.memory_limit).is_none() {
            return Err(Error::configuration(format!(
                "memory_limit must be in format like '256m' or '1g', got '{}'",
                self.memory_limit
            )));
        }
        Ok(())
    }
}

/// Parse a Docker-style memory limit (`512k`, `256m`, `1g`, any case) into
/// bytes. Returns `None` for anything that does not match `^\d+[kmg]$`.
pub fn parse_memory_limit(value: &str) -> Option<i64> {
    let lower = value.to_ascii_lowercase();
    let unit = lower.chars().last()?;
    let digits = &lower[..lower.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let multiplier: i64 = match unit {
        'k' => 1024,
        'm' => 1024 * 1024,
        'g' => 1024 * 1024 * 1024,
        _ => return None,
    };
    digits.parse::<i64>().ok()?.checked_mul(multiplier)
}
