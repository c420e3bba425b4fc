//! Sandbox tools implementing the `Tool` trait.
//!
//! `execute_code` is the collaborator-facing entry point: it validates the
//! request, runs the language's syntax pre-check and then executes the code
//! through a [`LanguageRuntime`], rendering the result as a short report.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use codebox_core::{traits::Tool, types::ToolOutput, Result};

use crate::result::ExecutionResult;
use crate::runtimes::LanguageRuntime;

pub const MAX_CODE_CHARS: usize = 50_000;
pub const DEFAULT_TOOL_TIMEOUT: i64 = 30;
pub const MAX_TOOL_TIMEOUT: i64 = 300;

// =============================================================================
// Execute Code Tool
// =============================================================================

/// Tool for running a code snippet in the sandbox.
pub struct ExecuteCodeTool {
    runtime: Arc<dyn LanguageRuntime>,
}

impl ExecuteCodeTool {
    pub fn new(runtime: Arc<dyn LanguageRuntime>) -> Self {
        Self { runtime }
    }
}

/// Check the raw arguments. Returns the code and timeout, or the message to
/// hand back to the caller.
fn validate_args(args: &Value) -> std::result::Result<(&str, u32), String> {
    let code = args.get("code").and_then(Value::as_str).unwrap_or("");
    if code.trim().is_empty() {
        return Err("Error: No code provided to execute.".to_string());
    }

    let length = code.chars().count();
    if length > MAX_CODE_CHARS {
        return Err(format!(
            "Error: Code too long. Maximum: 50,000 characters (got {})",
            length
        ));
    }

    let timeout = match args.get("timeout") {
        None | Some(Value::Null) => DEFAULT_TOOL_TIMEOUT,
        Some(value) => value
            .as_i64()
            .ok_or_else(|| "Error: Timeout must be an integer".to_string())?,
    };
    if !(1..=MAX_TOOL_TIMEOUT).contains(&timeout) {
        return Err(format!(
            "Error: Timeout must be between 1 and 300 seconds (got {})",
            timeout
        ));
    }

    Ok((code, timeout as u32))
}

/// Render a result as the human-readable report.
pub fn format_report(result: &ExecutionResult, timeout_seconds: u32) -> String {
    let mut report = if result.timed_out {
        format!(
            "Execution timed out after {}s (exit code: {})",
            timeout_seconds, result.exit_code
        )
    } else if result.success {
        format!("Execution successful ({}ms)", result.execution_time_ms)
    } else {
        format!(
            "Execution failed (exit code: {}, {}ms)",
            result.exit_code, result.execution_time_ms
        )
    };

    if result.success {
        if result.stdout.is_empty() {
            report.push_str("\n\nNo output produced.");
        } else {
            report.push_str(&format!("\n\nOutput:\n{}", result.stdout.trim_end()));
        }
        if !result.stderr.is_empty() {
            report.push_str(&format!("\n\nStderr:\n{}", result.stderr.trim_end()));
        }
        if result.memory_used_mb > 0.0 {
            report.push_str(&format!("\n\nMemory used: {:.2} MB", result.memory_used_mb));
        }
        return report;
    }

    if !result.stderr.is_empty() {
        report.push_str(&format!("\n\nError output:\n{}", result.stderr.trim_end()));
    }
    if !result.stdout.is_empty() {
        report.push_str(&format!("\n\nOutput:\n{}", result.stdout.trim_end()));
    }
    if let Some(message) = &result.error_message {
        if !result.timed_out && !result.stderr.contains(message.as_str()) {
            report.push_str(&format!("\n\nError: {}", message));
        }
    }
    report
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Run Python code in a safe sandbox and return the output. \
         The sandbox has no network access and a read-only filesystem."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python code to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30, max: 300)",
                    "default": DEFAULT_TOOL_TIMEOUT
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let (code, timeout) = match validate_args(&args) {
            Ok(valid) => valid,
            Err(message) => return Ok(ToolOutput::error(message)),
        };

        if let Err(e) = self.runtime.check_syntax(code) {
            return Ok(ToolOutput::error(format!("Syntax error: {}", e)));
        }

        tracing::debug!(
            language = %self.runtime.language(),
            chars = code.len(),
            timeout,
            "Executing code"
        );

        let result = match self.runtime.run(code, Some(timeout)).await {
            Ok(result) => result,
            Err(e) => {
                let e = codebox_core::Error::from(e);
                tracing::error!(error = %e, "Sandbox run failed");
                return Ok(ToolOutput::error(format!("Runtime error: {}", e)));
            }
        };

        let report = format_report(&result, timeout);
        let data = serde_json::to_value(&result)?;
        let output = if result.success {
            ToolOutput::text(report)
        } else {
            ToolOutput::error(report)
        };
        Ok(output.with_data(data))
    }
}
