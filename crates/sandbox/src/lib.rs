#![deny(unused)]
//! Sandboxed execution engine for Codebox.
//!
//! Untrusted code snippets run in short-lived Docker containers with hard
//! resource limits, no network, a read-only root filesystem, every Linux
//! capability dropped and a seccomp filter. Each run produces an
//! [`ExecutionResult`]; the container is always removed afterwards.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Collaborator (agent, CLI)             │
//! │    ↓ calls execute_code                │
//! ├────────────────────────────────────────┤
//! │  ExecuteCodeTool                       │
//! │    ↓ validates, pre-checks syntax      │
//! ├────────────────────────────────────────┤
//! │  LanguageRuntime (PythonRuntime)       │
//! │    ↓ builds ContainerConfig            │
//! ├────────────────────────────────────────┤
//! │  SandboxManager                        │
//! │    ImageCache, SeccompProfile          │
//! │    ↓ ContainerEngine (DockerEngine)    │
//! ├────────────────────────────────────────┤
//! │  Docker Container (isolated)           │
//! │    /tmp (tmpfs, 10m), read-only root   │
//! │    No network, no caps, pids limit     │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use codebox_sandbox::{DockerEngine, ExecuteCodeTool, PythonRuntime, SandboxManager};
//!
//! let engine = Arc::new(DockerEngine::connect().await?);
//! let manager = Arc::new(SandboxManager::new(engine, Some(Path::new("docker/seccomp-profile.json")))?);
//!
//! let runtime = PythonRuntime::new(manager.clone());
//! runtime.prepare().await;
//!
//! let tool = ExecuteCodeTool::new(Arc::new(runtime));
//! let output = tool.execute(json!({"code": "print('hi')"})).await?;
//! ```

pub mod cache;
pub mod container;
pub mod engine;
pub mod error;
pub mod manager;
pub mod result;
pub mod runtimes;
pub mod seccomp;
pub mod tools;

pub use cache::ImageCache;
pub use container::{ContainerConfig, ContainerConfigBuilder, MemoryLimit};
pub use engine::{
    ContainerEngine, ContainerSpec, DaemonStats, DockerEngine, EngineError, MockEngine, MockRun,
};
pub use error::{ProfileError, Result, SandboxError};
pub use manager::{ImageRequest, SandboxManager};
pub use result::{ContainerLogs, ExecutionResult, RunOutcome};
pub use runtimes::{DockerRuntime, LanguageRuntime, PythonRuntime, RuntimeConfig, RuntimeRegistry, SyntaxError};
pub use seccomp::{SeccompAction, SeccompProfile};
pub use tools::ExecuteCodeTool;
