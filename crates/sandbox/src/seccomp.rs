//! Seccomp profile loading and validation.
//!
//! A profile is validated once, when the [`SandboxManager`](crate::SandboxManager)
//! is constructed. A document Docker would reject, or worse silently
//! misinterpret, must stop the manager from existing rather than surface
//! on the first run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ProfileError;

/// Kernel filter action understood by Docker's seccomp profile format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeccompAction {
    #[serde(rename = "SCMP_ACT_KILL")]
    Kill,
    #[serde(rename = "SCMP_ACT_KILL_PROCESS")]
    KillProcess,
    #[serde(rename = "SCMP_ACT_KILL_THREAD")]
    KillThread,
    #[serde(rename = "SCMP_ACT_TRAP")]
    Trap,
    #[serde(rename = "SCMP_ACT_ERRNO")]
    Errno,
    #[serde(rename = "SCMP_ACT_TRACE")]
    Trace,
    #[serde(rename = "SCMP_ACT_ALLOW")]
    Allow,
    #[serde(rename = "SCMP_ACT_LOG")]
    Log,
    #[serde(rename = "SCMP_ACT_NOTIFY")]
    Notify,
}

impl SeccompAction {
    pub const ALL: [SeccompAction; 9] = [
        Self::Kill,
        Self::KillProcess,
        Self::KillThread,
        Self::Trap,
        Self::Errno,
        Self::Trace,
        Self::Allow,
        Self::Log,
        Self::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kill => "SCMP_ACT_KILL",
            Self::KillProcess => "SCMP_ACT_KILL_PROCESS",
            Self::KillThread => "SCMP_ACT_KILL_THREAD",
            Self::Trap => "SCMP_ACT_TRAP",
            Self::Errno => "SCMP_ACT_ERRNO",
            Self::Trace => "SCMP_ACT_TRACE",
            Self::Allow => "SCMP_ACT_ALLOW",
            Self::Log => "SCMP_ACT_LOG",
            Self::Notify => "SCMP_ACT_NOTIFY",
        }
    }
}

impl fmt::Display for SeccompAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeccompAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action '{}'", s))
    }
}

/// One syscall rule of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallRule {
    pub names: Vec<String>,
    pub action: SeccompAction,
}

/// A validated seccomp profile.
#[derive(Debug, Clone)]
pub struct SeccompProfile {
    default_action: SeccompAction,
    architectures: Vec<String>,
    syscalls: Vec<SyscallRule>,
    path: PathBuf,
    /// Source document, forwarded to Docker as-is so keys this type does not
    /// model (`errnoRet`, `args`, `includes`) keep their meaning.
    raw: String,
}

impl SeccompProfile {
    /// Load and validate a profile from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ProfileError::NotFound(path.to_path_buf()))?;
        let doc: Value = serde_json::from_str(&raw).map_err(|source| ProfileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let (default_action, architectures, syscalls) = validate(&doc)?;

        tracing::info!(
            path = %path.display(),
            default_action = %default_action,
            rules = syscalls.len(),
            "Loaded seccomp profile"
        );

        Ok(Self {
            default_action,
            architectures,
            syscalls,
            path: path.to_path_buf(),
            raw,
        })
    }

    pub fn default_action(&self) -> SeccompAction {
        self.default_action
    }

    pub fn architectures(&self) -> &[String] {
        &self.architectures
    }

    pub fn syscalls(&self) -> &[SyscallRule] {
        &self.syscalls
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `security_opt` entry applying this profile, or `None` once the
    /// profile file has disappeared from disk.
    pub fn security_opt(&self) -> Option<String> {
        if self.path.exists() {
            Some(format!("seccomp={}", self.raw))
        } else {
            tracing::warn!(
                path = %self.path.display(),
                "Seccomp profile file no longer exists, running without it"
            );
            None
        }
    }
}

fn schema_error(field: &str, index: Option<usize>, reason: impl Into<String>) -> ProfileError {
    ProfileError::Schema {
        field: field.to_string(),
        index,
        reason: reason.into(),
    }
}

fn parse_action(value: Option<&Value>, field: &str, index: Option<usize>) -> Result<SeccompAction, ProfileError> {
    match value {
        None => Err(schema_error(field, index, "missing required action")),
        Some(Value::String(s)) => s.parse().map_err(|e: String| schema_error(field, index, e)),
        Some(other) => Err(schema_error(
            field,
            index,
            format!("expected an action string, got {}", other),
        )),
    }
}

fn string_list(value: &Value, field: &str, index: Option<usize>) -> Result<Vec<String>, ProfileError> {
    let items = value
        .as_array()
        .ok_or_else(|| schema_error(field, index, "must be a list"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| schema_error(field, index, "must contain only strings"))
        })
        .collect()
}

type Validated = (SeccompAction, Vec<String>, Vec<SyscallRule>);

fn validate(doc: &Value) -> Result<Validated, ProfileError> {
    let root = doc
        .as_object()
        .ok_or_else(|| schema_error("<root>", None, "profile must be a JSON object"))?;

    let default_action = parse_action(root.get("defaultAction"), "defaultAction", None)?;

    let architectures = match root.get("architectures") {
        None => Vec::new(),
        Some(v) => string_list(v, "architectures", None)?,
    };

    let syscalls = match root.get("syscalls") {
        None => Vec::new(),
        Some(v) => {
            let entries = v
                .as_array()
                .ok_or_else(|| schema_error("syscalls", None, "must be a list"))?;
            entries
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    let obj = entry
                        .as_object()
                        .ok_or_else(|| schema_error("syscalls", Some(i), "entry must be an object"))?;
                    let names = match obj.get("names") {
                        None => Vec::new(),
                        Some(n) => string_list(n, "syscalls.names", Some(i))?,
                    };
                    let action = parse_action(obj.get("action"), "syscalls.action", Some(i))?;
                    Ok(SyscallRule { names, action })
                })
                .collect::<Result<Vec<_>, ProfileError>>()?
        }
    };

    Ok((default_action, architectures, syscalls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn profile_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_profile() {
        let file = profile_file(
            r#"{
                "defaultAction": "SCMP_ACT_ERRNO",
                "architectures": ["SCMP_ARCH_X86_64", "SCMP_ARCH_AARCH64"],
                "syscalls": [
                    {"names": ["read", "write", "exit_group"], "action": "SCMP_ACT_ALLOW"},
                    {"names": ["ptrace"], "action": "SCMP_ACT_KILL", "errnoRet": 1}
                ]
            }"#,
        );

        let profile = SeccompProfile::load(file.path()).unwrap();
        assert_eq!(profile.default_action(), SeccompAction::Errno);
        assert_eq!(profile.architectures().len(), 2);
        assert_eq!(profile.syscalls().len(), 2);
        assert_eq!(profile.syscalls()[1].action, SeccompAction::Kill);

        let opt = profile.security_opt().unwrap();
        assert!(opt.starts_with("seccomp="));
        assert!(opt.contains("errnoRet"));
    }

    #[test]
    fn test_minimal_profile() {
        let file = profile_file(r#"{"defaultAction": "SCMP_ACT_ALLOW"}"#);
        let profile = SeccompProfile::load(file.path()).unwrap();
        assert!(profile.architectures().is_empty());
        assert!(profile.syscalls().is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = SeccompProfile::load("/nonexistent/seccomp.json").unwrap_err();
        assert!(matches!(err, ProfileError::NotFound(_)));
    }

    #[test]
    fn test_invalid_json() {
        let file = profile_file("{ not json");
        let err = SeccompProfile::load(file.path()).unwrap_err();
        assert!(matches!(err, ProfileError::Parse { .. }));
    }

    #[test]
    fn test_unknown_default_action() {
        let file = profile_file(r#"{"defaultAction": "SCMP_ACT_MAYBE"}"#);
        match SeccompProfile::load(file.path()).unwrap_err() {
            ProfileError::Schema { field, index, .. } => {
                assert_eq!(field, "defaultAction");
                assert_eq!(index, None);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_default_action() {
        let file = profile_file(r#"{"syscalls": []}"#);
        let err = SeccompProfile::load(file.path()).unwrap_err();
        assert!(matches!(err, ProfileError::Schema { ref field, .. } if field == "defaultAction"));
    }

    #[test]
    fn test_scalar_lists_rejected() {
        let file = profile_file(r#"{"defaultAction": "SCMP_ACT_ALLOW", "architectures": "SCMP_ARCH_X86_64"}"#);
        let err = SeccompProfile::load(file.path()).unwrap_err();
        assert!(matches!(err, ProfileError::Schema { ref field, .. } if field == "architectures"));

        let file = profile_file(r#"{"defaultAction": "SCMP_ACT_ALLOW", "syscalls": {"names": ["read"]}}"#);
        let err = SeccompProfile::load(file.path()).unwrap_err();
        assert!(matches!(err, ProfileError::Schema { ref field, .. } if field == "syscalls"));
    }

    #[test]
    fn test_per_syscall_action_reports_index() {
        let file = profile_file(
            r#"{
                "defaultAction": "SCMP_ACT_ERRNO",
                "syscalls": [
                    {"names": ["read"], "action": "SCMP_ACT_ALLOW"},
                    {"names": ["write"], "action": "ALLOW"}
                ]
            }"#,
        );
        match SeccompProfile::load(file.path()).unwrap_err() {
            ProfileError::Schema { field, index, reason } => {
                assert_eq!(field, "syscalls.action");
                assert_eq!(index, Some(1));
                assert!(reason.contains("ALLOW"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_security_opt_requires_file_on_disk() {
        let file = profile_file(r#"{"defaultAction": "SCMP_ACT_ALLOW"}"#);
        let profile = SeccompProfile::load(file.path()).unwrap();
        file.close().unwrap();
        assert!(profile.security_opt().is_none());
    }
}
