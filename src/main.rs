#![deny(unused)]
//! Codebox - sandboxed code execution.
//!
//! Runs a Python snippet (or a snippet plus its pytest tests) in a locked-down
//! Docker container and prints the report.

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use codebox_core::config::AppConfig;
use codebox_core::traits::Tool;
use codebox_sandbox::runtimes::python::{python_config, PYTHON_IMAGE};
use codebox_sandbox::{DockerEngine, ExecuteCodeTool, LanguageRuntime, PythonRuntime, SandboxManager};

#[derive(Parser)]
#[command(name = "codebox", version, about = "Run untrusted Python code in a Docker sandbox")]
struct Cli {
    /// Source file to execute; `-` or nothing reads stdin
    file: Option<PathBuf>,

    /// Timeout in seconds (1-300); defaults to sandbox.timeout_seconds
    #[arg(long)]
    timeout: Option<i64>,

    /// Run FILE against these pytest tests instead of executing it directly
    #[arg(long, value_name = "FILE")]
    tests: Option<PathBuf>,
}

fn read_source(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("Failed to read code from stdin")?;
            Ok(code)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    // Initialize tracing and metrics
    codebox_telemetry::configure_tracing(&config.telemetry)?;
    if let Some(listen) = &config.telemetry.metrics_listen {
        codebox_telemetry::setup_metrics_recorder(listen)?;
    }

    tracing::info!("Starting Codebox v{}", env!("CARGO_PKG_VERSION"));

    if !config.sandbox.enabled {
        anyhow::bail!("Sandbox is disabled (sandbox.enabled = false)");
    }
    if config.sandbox.network_enabled {
        tracing::warn!("sandbox.network_enabled is ignored: language runtimes always run without network");
    }

    let code = read_source(cli.file.as_deref())?;

    // =========================================================================
    // Initialize Sandbox
    // =========================================================================
    let engine = Arc::new(DockerEngine::connect().await?);
    let seccomp = config.sandbox.seccomp_profile_path.as_deref().map(Path::new);
    let manager = Arc::new(SandboxManager::new(engine, seccomp)?);

    let mut runtime_config = python_config();
    runtime_config.timeout_seconds = config.sandbox.timeout_seconds;
    runtime_config.memory_limit = config.sandbox.memory_limit.clone();
    runtime_config.cpu_quota = config.sandbox.cpu_quota;

    let runtime = Arc::new(
        PythonRuntime::with_config(runtime_config, manager.clone())
            .with_build_context(config.sandbox.build_context.clone()),
    );
    runtime.prepare().await;

    // =========================================================================
    // Execute
    // =========================================================================
    let success = match cli.tests {
        Some(tests) => {
            let test_code = std::fs::read_to_string(&tests)
                .with_context(|| format!("Failed to read {}", tests.display()))?;
            let result = runtime.run_tests(&code, &test_code).await?;
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            if let Some(message) = &result.error_message {
                eprintln!("{}", message);
            }
            result.success
        }
        None => {
            let tool = ExecuteCodeTool::new(runtime);
            let timeout = cli
                .timeout
                .unwrap_or_else(|| i64::from(config.sandbox.timeout_seconds));
            let output = tool
                .execute(json!({ "code": code, "timeout": timeout }))
                .await?;
            println!("{}", output.content);
            output.success
        }
    };

    let removed = manager
        .cleanup_stopped_containers(Some(PYTHON_IMAGE))
        .await;
    tracing::debug!(removed, "Post-run cleanup done");

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
