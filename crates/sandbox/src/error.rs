//! Error types for the sandbox engine.
//!
//! Only faults that prevent a sandbox attempt from starting are errors:
//! bad static configuration, a rejected seccomp profile, an unreachable
//! Docker daemon. A payload that fails, crashes or times out is reported
//! through [`ExecutionResult`](crate::ExecutionResult) instead.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for the sandbox engine.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors raised by the sandbox engine.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// A container or runtime configuration value is out of range.
    #[error("Invalid sandbox configuration: {0}")]
    Configuration(String),

    /// The seccomp profile could not be loaded.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// The Docker daemon cannot be reached.
    #[error("Docker daemon unavailable: {0}")]
    Daemon(String),
}

impl SandboxError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Errors raised while loading a seccomp profile.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Seccomp profile not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Seccomp profile {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid seccomp profile field `{}`: {reason}", field_label(.field, .index))]
    Schema {
        field: String,
        index: Option<usize>,
        reason: String,
    },
}

fn field_label(field: &str, index: &Option<usize>) -> String {
    match index {
        Some(i) => format!("{}[{}]", field, i),
        None => field.to_string(),
    }
}

impl From<SandboxError> for codebox_core::Error {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Daemon(msg) => codebox_core::Error::sandbox_unavailable(msg),
            other => codebox_core::Error::configuration(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_field_and_index() {
        let err = ProfileError::Schema {
            field: "syscalls.action".into(),
            index: Some(3),
            reason: "unknown action 'SCMP_ACT_MAYBE'".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("syscalls.action[3]"));
        assert!(msg.contains("SCMP_ACT_MAYBE"));
    }

    #[test]
    fn test_conversion_to_core_error() {
        let core: codebox_core::Error = SandboxError::Daemon("socket missing".into()).into();
        assert!(matches!(core, codebox_core::Error::SandboxUnavailable(_)));

        let core: codebox_core::Error = SandboxError::configuration("pids_limit").into();
        assert!(matches!(core, codebox_core::Error::Configuration(_)));
    }
}
