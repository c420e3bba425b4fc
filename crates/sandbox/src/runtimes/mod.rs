//! Language runtimes.
//!
//! A runtime binds a language to an image and a base command and turns
//! source code into sandboxed runs. [`DockerRuntime`] carries the shared
//! Docker-backed behaviour; language modules wrap it and override what
//! differs (test harness, syntax pre-check).

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::container::{
    ContainerConfig, DEFAULT_CPU_QUOTA, DEFAULT_MEMORY_LIMIT, DEFAULT_PIDS_LIMIT, DEFAULT_TIMEOUT_SECONDS,
};
use crate::error::Result;
use crate::manager::{ImageRequest, SandboxManager};
use crate::result::ExecutionResult;

pub mod python;

pub use python::PythonRuntime;

/// Directory holding the `Dockerfile.<language>` files.
pub const DEFAULT_BUILD_CONTEXT: &str = "docker";

// =============================================================================
// Runtime Types
// =============================================================================

/// Static description of one language runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub language: String,
    pub image: String,
    pub command: Vec<String>,
    pub file_extension: String,
    pub timeout_seconds: u32,
    pub memory_limit: String,
    pub cpu_quota: i64,
    pub pids_limit: i64,
    /// Packages baked into the image.
    pub packages: Vec<String>,
}

impl RuntimeConfig {
    /// Config with the default limits for `language`.
    pub fn new(language: impl Into<String>, image: impl Into<String>, command: Vec<String>) -> Self {
        let language = language.into();
        Self {
            file_extension: format!(".{}", language),
            language,
            image: image.into(),
            command,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            cpu_quota: DEFAULT_CPU_QUOTA,
            pids_limit: DEFAULT_PIDS_LIMIT,
            packages: Vec::new(),
        }
    }
}

/// Parse error found before any container is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}", self.message, self.line)
    }
}

impl std::error::Error for SyntaxError {}

// =============================================================================
// Language Runtime Trait
// =============================================================================

/// A language the sandbox can execute.
#[async_trait]
pub trait LanguageRuntime: Send + Sync {
    /// Language identifier, e.g. `python`.
    fn language(&self) -> &str;

    fn config(&self) -> &RuntimeConfig;

    /// Execute `code`, optionally overriding the default timeout.
    async fn run(&self, code: &str, timeout_seconds: Option<u32>) -> Result<ExecutionResult>;

    /// Execute `code` together with `test_code`.
    async fn run_tests(&self, code: &str, test_code: &str) -> Result<ExecutionResult>;

    /// Cheap pre-flight check. Runtimes without one accept everything.
    fn check_syntax(&self, _code: &str) -> std::result::Result<(), SyntaxError> {
        Ok(())
    }

    async fn is_available(&self) -> bool;
}

// =============================================================================
// Docker Runtime
// =============================================================================

/// Docker-backed runtime shared by all languages.
pub struct DockerRuntime {
    config: RuntimeConfig,
    manager: Arc<SandboxManager>,
    build_context: String,
}

impl DockerRuntime {
    pub fn new(config: RuntimeConfig, manager: Arc<SandboxManager>) -> Self {
        Self {
            config,
            manager,
            build_context: DEFAULT_BUILD_CONTEXT.to_string(),
        }
    }

    /// Look for `Dockerfile.<language>` in `build_context` instead of `docker/`.
    pub fn with_build_context(mut self, build_context: impl Into<String>) -> Self {
        self.build_context = build_context.into();
        self
    }

    pub fn manager(&self) -> &Arc<SandboxManager> {
        &self.manager
    }

    /// Make sure the runtime image exists, building it from
    /// `Dockerfile.<language>` if needed. A failure is logged; runs against
    /// a missing image report it in their result.
    pub async fn prepare(&self) -> bool {
        let request = ImageRequest::build(
            format!("Dockerfile.{}", self.config.language),
            self.build_context.clone(),
        );
        let ready = self.manager.ensure_image(&self.config.image, &request).await;
        if !ready {
            tracing::warn!(
                language = %self.config.language,
                image = %self.config.image,
                "Failed to ensure runtime image"
            );
        }
        ready
    }

    /// Container settings for one run: no network, read-only root.
    pub fn container_config(&self, timeout_seconds: Option<u32>) -> Result<ContainerConfig> {
        ContainerConfig::builder(self.config.image.clone(), self.config.command.clone())
            .timeout_seconds(timeout_seconds.unwrap_or(self.config.timeout_seconds))
            .memory_limit(self.config.memory_limit.clone())
            .cpu_quota(self.config.cpu_quota)
            .network_enabled(false)
            .read_only(true)
            .pids_limit(self.config.pids_limit)
            .build()
    }
}

#[async_trait]
impl LanguageRuntime for DockerRuntime {
    fn language(&self) -> &str {
        &self.config.language
    }

    fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    async fn run(&self, code: &str, timeout_seconds: Option<u32>) -> Result<ExecutionResult> {
        let config = self.container_config(timeout_seconds)?;
        self.manager.run_container(&config, code).await
    }

    async fn run_tests(&self, code: &str, test_code: &str) -> Result<ExecutionResult> {
        let combined = format!("{}\n\n{}", code, test_code);
        self.run(&combined, None).await
    }

    async fn is_available(&self) -> bool {
        self.manager.is_available().await
    }
}

// =============================================================================
// Runtime Registry
// =============================================================================

/// Runtimes by language.
#[derive(Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<String, Arc<dyn LanguageRuntime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runtime, replacing any previous one for the same language.
    pub fn register(&mut self, runtime: Arc<dyn LanguageRuntime>) {
        let language = runtime.language().to_string();
        if self.runtimes.insert(language.clone(), runtime).is_some() {
            tracing::debug!(language = %language, "Replaced runtime");
        }
    }

    pub fn get(&self, language: &str) -> codebox_core::Result<Arc<dyn LanguageRuntime>> {
        self.runtimes.get(language).cloned().ok_or_else(|| {
            codebox_core::Error::invalid_request(format!(
                "Unknown runtime: {}. Available: [{}]",
                language,
                self.languages().join(", ")
            ))
        })
    }

    /// Registered languages, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.runtimes.keys().cloned().collect();
        languages.sort();
        languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, MockRun};

    fn runtime(engine: Arc<MockEngine>) -> DockerRuntime {
        let manager = Arc::new(SandboxManager::new(engine, None).unwrap());
        let config = RuntimeConfig::new("sh", "alpine:3.20", vec!["sh".into(), "-c".into()]);
        DockerRuntime::new(config, manager)
    }

    #[tokio::test]
    async fn test_run_uses_runtime_limits() {
        let engine = Arc::new(MockEngine::new(vec![MockRun::stdout("hi\n")]));
        let rt = runtime(engine.clone());

        let result = rt.run("echo hi", Some(5)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "hi\n");

        let specs = engine.created_specs().await;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].cmd, vec!["sh", "-c", "echo hi"]);
        assert_eq!(specs[0].network_mode, "none");
        assert!(specs[0].read_only);
        assert_eq!(specs[0].pids_limit, 50);
        assert_eq!(specs[0].memory_bytes, 256 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_invalid_timeout_override_is_configuration_error() {
        let engine = Arc::new(MockEngine::default());
        let rt = runtime(engine.clone());
        assert!(rt.run("true", Some(0)).await.is_err());
        assert!(engine.created_specs().await.is_empty());
    }

    #[tokio::test]
    async fn test_default_run_tests_concatenates() {
        let engine = Arc::new(MockEngine::default());
        let rt = runtime(engine.clone());
        rt.run_tests("a=1", "test $a = 1").await.unwrap();
        assert_eq!(engine.created_specs().await[0].cmd[2], "a=1\n\ntest $a = 1");
    }

    #[tokio::test]
    async fn test_prepare_builds_from_language_dockerfile() {
        let ctx = tempfile::tempdir().unwrap();
        std::fs::write(ctx.path().join("Dockerfile.sh"), "FROM alpine:3.20\n").unwrap();

        let engine = Arc::new(MockEngine::default());
        let rt = runtime(engine.clone()).with_build_context(ctx.path().to_string_lossy());
        assert!(rt.prepare().await);
        assert_eq!(engine.builds().await, 1);

        let missing = runtime(Arc::new(MockEngine::default()))
            .with_build_context("/nonexistent/codebox-context");
        assert!(!missing.prepare().await);
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = RuntimeRegistry::new();
        registry.register(Arc::new(runtime(Arc::new(MockEngine::default()))));

        assert_eq!(registry.languages(), vec!["sh"]);
        assert!(registry.get("sh").is_ok());

        let err = registry.get("cobol").err().unwrap();
        assert!(err.to_string().contains("Unknown runtime: cobol"));
        assert!(err.to_string().contains("sh"));
    }
}
