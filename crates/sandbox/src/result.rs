//! Execution results and outcome classification.

use serde::{Deserialize, Serialize};

pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

/// Structured outcome of one sandboxed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `true` only when the payload exited with code 0 within the timeout.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
    pub execution_time_ms: u64,
    /// Best-effort; 0.0 when the daemon reported no usage.
    pub memory_used_mb: f64,
    pub error_message: Option<String>,
}

/// Captured container output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// What happened to a run, decided once after the wait.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The payload exited within the bound.
    Completed {
        exit_code: i64,
        logs: ContainerLogs,
        memory_bytes: Option<u64>,
    },
    /// The daemon reported the container exiting with a structured error.
    ContainerError {
        exit_code: i64,
        logs: Option<ContainerLogs>,
        message: String,
    },
    /// The wait bound elapsed.
    TimedOut,
    /// The run could not be carried out or observed.
    Fault { message: String },
}

impl RunOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { exit_code: 0, .. } => "success",
            Self::Completed { .. } | Self::ContainerError { .. } => "failure",
            Self::TimedOut => "timeout",
            Self::Fault { .. } => "fault",
        }
    }

    /// Turn the outcome into the caller-facing result.
    pub fn into_result(self, execution_time_ms: u64) -> ExecutionResult {
        match self {
            Self::Completed {
                exit_code,
                logs,
                memory_bytes,
            } => ExecutionResult {
                success: exit_code == 0,
                stdout: logs.stdout,
                stderr: logs.stderr,
                exit_code,
                timed_out: false,
                execution_time_ms,
                memory_used_mb: memory_bytes
                    .map(|b| b as f64 / (1024.0 * 1024.0))
                    .unwrap_or(0.0),
                error_message: None,
            },
            Self::ContainerError {
                exit_code,
                logs,
                message,
            } => {
                let logs = logs.unwrap_or_default();
                ExecutionResult {
                    success: false,
                    stdout: logs.stdout,
                    stderr: if logs.stderr.is_empty() {
                        message.clone()
                    } else {
                        logs.stderr
                    },
                    exit_code,
                    timed_out: false,
                    execution_time_ms,
                    memory_used_mb: 0.0,
                    error_message: Some(message),
                }
            }
            Self::TimedOut => ExecutionResult {
                success: false,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: -1,
                timed_out: true,
                execution_time_ms,
                memory_used_mb: 0.0,
                error_message: Some(TIMEOUT_MESSAGE.to_string()),
            },
            Self::Fault { message } => ExecutionResult {
                success: false,
                stdout: String::new(),
                stderr: message.clone(),
                exit_code: -1,
                timed_out: false,
                execution_time_ms,
                memory_used_mb: 0.0,
                error_message: Some(message),
            },
        }
    }
}
