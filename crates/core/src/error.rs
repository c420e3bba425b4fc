//! Error types for Codebox.

use thiserror::Error;

/// Result type alias using Codebox's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Codebox.
///
/// Only manager- and environment-level faults travel through this type.
/// Whatever happens while the untrusted payload runs is reported as data
/// (an execution result), never as an `Error`.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    // =========================================================================
    // Environment Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    // =========================================================================
    // Tool Errors
    // =========================================================================
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a security violation error.
    pub fn security_violation(msg: impl Into<String>) -> Self {
        Self::SecurityViolation(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a sandbox-unavailable error.
    pub fn sandbox_unavailable(msg: impl Into<String>) -> Self {
        Self::SandboxUnavailable(msg.into())
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
