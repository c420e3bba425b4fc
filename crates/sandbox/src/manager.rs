//! Sandbox manager: image preparation and container lifecycle.
//!
//! The manager owns the engine handle, the image cache and the seccomp
//! profile. It is meant to be constructed once and shared behind an `Arc`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use codebox_core::fs_policy::{validate_build_context, validate_dockerfile_path, validate_image_name};

use crate::cache::ImageCache;
use crate::container::ContainerConfig;
use crate::engine::{ContainerEngine, ContainerSpec, DaemonStats, EngineError};
use crate::error::{Result, SandboxError};
use crate::result::{ExecutionResult, RunOutcome};
use crate::seccomp::SeccompProfile;

/// Label attached to every container the manager creates.
pub const MANAGED_BY_LABEL: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "codebox";

const CPU_PERIOD: i64 = 100_000;
const TMPFS_OPTIONS: &str = "size=10m,mode=1777";

// =============================================================================
// Image Requests
// =============================================================================

/// Optional arguments of [`SandboxManager::ensure_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Dockerfile path relative to `build_context`. Without one, a missing
    /// image cannot be built.
    pub dockerfile: Option<String>,
    pub build_context: String,
    /// Skip the readiness cache.
    pub force_rebuild: bool,
}

impl Default for ImageRequest {
    fn default() -> Self {
        Self {
            dockerfile: None,
            build_context: ".".to_string(),
            force_rebuild: false,
        }
    }
}

impl ImageRequest {
    /// Request that only checks for an existing image.
    pub fn lookup() -> Self {
        Self::default()
    }

    /// Request that builds `dockerfile` from `build_context` when the image is missing.
    pub fn build(dockerfile: impl Into<String>, build_context: impl Into<String>) -> Self {
        Self {
            dockerfile: Some(dockerfile.into()),
            build_context: build_context.into(),
            force_rebuild: false,
        }
    }

    pub fn force_rebuild(mut self) -> Self {
        self.force_rebuild = true;
        self
    }
}

// =============================================================================
// Sandbox Manager
// =============================================================================

/// Runs untrusted payloads in short-lived, locked-down containers.
pub struct SandboxManager {
    engine: Arc<dyn ContainerEngine>,
    cache: ImageCache,
    seccomp: Option<SeccompProfile>,
}

impl SandboxManager {
    /// Create a manager. A seccomp profile that fails to load or validate
    /// prevents construction.
    pub fn new(engine: Arc<dyn ContainerEngine>, seccomp_path: Option<&Path>) -> Result<Self> {
        let seccomp = seccomp_path.map(SeccompProfile::load).transpose()?;
        if seccomp.is_none() {
            tracing::warn!("No seccomp profile configured, containers use the daemon's default filter");
        }

        Ok(Self {
            engine,
            cache: ImageCache::new(),
            seccomp,
        })
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn seccomp_profile(&self) -> Option<&SeccompProfile> {
        self.seccomp.as_ref()
    }

    /// Check if the Docker daemon answers.
    pub async fn is_available(&self) -> bool {
        self.engine.ping().await.is_ok()
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Make sure `image` exists locally, building it when a Dockerfile is
    /// given. Every failure is logged and reported as `false`.
    pub async fn ensure_image(&self, image: &str, request: &ImageRequest) -> bool {
        if let Err(e) = validate_image_name(image) {
            tracing::warn!(image = %image, error = %e, "Refusing invalid image name");
            return false;
        }

        if !request.force_rebuild && self.cache.is_ready(image) {
            return true;
        }

        let mut ready = self.cache.lock(image).await;
        // Another caller may have finished while we waited for the lock
        if !request.force_rebuild && *ready {
            return true;
        }

        match self.engine.image_exists(image).await {
            Ok(true) => {
                tracing::debug!(image = %image, "Image present");
                *ready = true;
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(image = %image, error = %e, "Failed to inspect image");
                return false;
            }
        }

        let Some(dockerfile) = request.dockerfile.as_deref() else {
            tracing::info!(image = %image, "Image not found and no Dockerfile provided");
            return false;
        };

        let context = match validate_dockerfile_path(dockerfile, &request.build_context)
            .and_then(|_| validate_build_context(&request.build_context))
        {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(image = %image, dockerfile = %dockerfile, error = %e, "Rejected image build");
                metrics::counter!("codebox_image_builds_total", "result" => "rejected").increment(1);
                return false;
            }
        };

        tracing::info!(
            image = %image,
            dockerfile = %dockerfile,
            context = %context.display(),
            "Building image"
        );
        let started = Instant::now();
        match self.engine.build_image(image, dockerfile, &context).await {
            Ok(()) => {
                tracing::info!(
                    image = %image,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Image built"
                );
                metrics::counter!("codebox_image_builds_total", "result" => "success").increment(1);
                *ready = true;
                true
            }
            Err(e) => {
                tracing::error!(image = %image, error = %e, "Image build failed");
                metrics::counter!("codebox_image_builds_total", "result" => "failure").increment(1);
                false
            }
        }
    }

    /// Remove an image from the daemon and forget it in the cache.
    pub async fn remove_image(&self, image: &str, force: bool) -> bool {
        if let Err(e) = validate_image_name(image) {
            tracing::warn!(image = %image, error = %e, "Refusing invalid image name");
            return false;
        }

        match self.engine.remove_image(image, force).await {
            Ok(()) => {
                self.cache.invalidate(image).await;
                tracing::info!(image = %image, "Removed image");
                true
            }
            Err(EngineError::NotFound(_)) => {
                self.cache.invalidate(image).await;
                tracing::debug!(image = %image, "Image already gone");
                false
            }
            Err(e) => {
                tracing::warn!(image = %image, error = %e, "Failed to remove image");
                false
            }
        }
    }

    /// Local image tags, optionally only those containing `filter`.
    pub async fn list_images(&self, filter: Option<&str>) -> Vec<String> {
        match self.engine.list_images().await {
            Ok(tags) => tags
                .into_iter()
                .filter(|tag| filter.map_or(true, |f| tag.contains(f)))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list images");
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// The full container specification for one run of `payload`.
    pub fn container_spec(&self, config: &ContainerConfig, payload: &str) -> ContainerSpec {
        let mut cmd = config.command().to_vec();
        cmd.push(payload.to_string());

        let mut security_opt = vec!["no-new-privileges".to_string()];
        if let Some(opt) = self.seccomp.as_ref().and_then(SeccompProfile::security_opt) {
            security_opt.push(opt);
        }

        ContainerSpec {
            name: format!("codebox-{}", uuid::Uuid::new_v4()),
            image: config.image().to_string(),
            cmd,
            memory_bytes: config.memory_limit().bytes(),
            cpu_quota: config.cpu_quota(),
            cpu_period: CPU_PERIOD,
            network_mode: if config.network_enabled() { "bridge" } else { "none" }.to_string(),
            read_only: config.read_only(),
            pids_limit: config.pids_limit(),
            cap_drop: vec!["ALL".to_string()],
            security_opt,
            tmpfs: HashMap::from([("/tmp".to_string(), TMPFS_OPTIONS.to_string())]),
            labels: HashMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )]),
        }
    }

    /// Run `payload` once under `config` and report what happened.
    ///
    /// Only an unreachable daemon at creation time is an `Err`. Anything the
    /// payload does (fail, crash, hang) comes back as an [`ExecutionResult`].
    /// The container is removed before this returns.
    pub async fn run_container(&self, config: &ContainerConfig, payload: &str) -> Result<ExecutionResult> {
        let spec = self.container_spec(config, payload);

        let id = match self.engine.create_container(&spec).await {
            Ok(id) => id,
            Err(EngineError::Unreachable(msg)) => return Err(SandboxError::Daemon(msg)),
            Err(e) => {
                tracing::warn!(image = %config.image(), error = %e, "Failed to create container");
                let outcome = RunOutcome::Fault {
                    message: format!("Failed to create container: {}", e),
                };
                record_run(&outcome, 0);
                return Ok(outcome.into_result(0));
            }
        };

        let mut guard = ContainerGuard::new(self.engine.clone(), id.clone());
        tracing::debug!(container_id = %id, image = %config.image(), "Container created");

        let started = Instant::now();
        let outcome = self.drive(&id, config).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.release(&id, &outcome).await;
        guard.disarm();

        match &outcome {
            RunOutcome::Completed { exit_code, .. } | RunOutcome::ContainerError { exit_code, .. } => {
                tracing::info!(container_id = %id, exit_code, elapsed_ms, "Container finished");
            }
            RunOutcome::TimedOut => {
                tracing::warn!(
                    container_id = %id,
                    timeout_seconds = config.timeout_seconds(),
                    elapsed_ms,
                    "Container timed out"
                );
            }
            RunOutcome::Fault { message } => {
                tracing::error!(container_id = %id, error = %message, elapsed_ms, "Container run failed");
            }
        }

        record_run(&outcome, elapsed_ms);
        Ok(outcome.into_result(elapsed_ms))
    }

    /// Start the container, wait within the bound and collect its output.
    async fn drive(&self, id: &str, config: &ContainerConfig) -> RunOutcome {
        if let Err(e) = self.engine.start_container(id).await {
            return RunOutcome::Fault {
                message: format!("Failed to start container: {}", e),
            };
        }

        let bound = Duration::from_secs(u64::from(config.timeout_seconds()));
        match tokio::time::timeout(bound, self.engine.wait_container(id)).await {
            Err(_) => RunOutcome::TimedOut,
            Ok(Ok(exit_code)) => {
                let logs = match self.engine.container_logs(id).await {
                    Ok(logs) => logs,
                    Err(e) => {
                        return RunOutcome::Fault {
                            message: format!("Failed to read container logs: {}", e),
                        }
                    }
                };
                let memory_bytes = self.engine.memory_usage(id).await.unwrap_or_else(|e| {
                    tracing::debug!(container_id = %id, error = %e, "Memory stats unavailable");
                    None
                });
                RunOutcome::Completed {
                    exit_code,
                    logs,
                    memory_bytes,
                }
            }
            Ok(Err(EngineError::ContainerExited { exit_code, message })) => {
                let logs = self.engine.container_logs(id).await.ok();
                let message = if message.is_empty() {
                    format!("Container exited with code {}", exit_code)
                } else {
                    message
                };
                RunOutcome::ContainerError {
                    exit_code,
                    logs,
                    message,
                }
            }
            Ok(Err(e)) => RunOutcome::Fault {
                message: format!("Failed to wait for container: {}", e),
            },
        }
    }

    /// Kill (after a timeout) and force-remove a container.
    async fn release(&self, id: &str, outcome: &RunOutcome) {
        if matches!(outcome, RunOutcome::TimedOut) {
            match self.engine.kill_container(id).await {
                Ok(()) => tracing::debug!(container_id = %id, "Killed timed-out container"),
                Err(e) => tracing::warn!(container_id = %id, error = %e, "Failed to kill container"),
            }
        }

        match self.engine.remove_container(id, true).await {
            Ok(()) | Err(EngineError::NotFound(_)) => {}
            Err(e) => tracing::warn!(container_id = %id, error = %e, "Failed to remove container"),
        }
    }

    /// Remove exited containers, optionally only those created from
    /// `image_filter`. Returns how many were removed.
    pub async fn cleanup_stopped_containers(&self, image_filter: Option<&str>) -> usize {
        let ids = match self.engine.list_exited_containers(image_filter).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list stopped containers");
                return 0;
            }
        };

        let mut removed = 0;
        for id in ids {
            match self.engine.remove_container(&id, true).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!(container_id = %id, error = %e, "Failed to remove stopped container"),
            }
        }

        metrics::counter!("codebox_containers_cleaned_total").increment(removed as u64);
        tracing::info!(removed, "Cleaned up stopped containers");
        removed
    }

    /// Daemon-wide counters; empty stats when the daemon cannot be queried.
    pub async fn get_stats(&self) -> DaemonStats {
        self.engine.daemon_stats().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to query daemon stats");
            DaemonStats::default()
        })
    }
}

fn record_run(outcome: &RunOutcome, elapsed_ms: u64) {
    metrics::counter!("codebox_sandbox_runs_total", "outcome" => outcome.label()).increment(1);
    metrics::histogram!("codebox_sandbox_run_duration_ms").record(elapsed_ms as f64);
}

// =============================================================================
// Container Guard
// =============================================================================

/// Schedules a forced removal if a run is abandoned before its own cleanup,
/// e.g. when the caller drops the `run_container` future.
struct ContainerGuard {
    engine: Arc<dyn ContainerEngine>,
    id: Option<String>,
}

impl ContainerGuard {
    fn new(engine: Arc<dyn ContainerEngine>, id: String) -> Self {
        Self { engine, id: Some(id) }
    }

    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let engine = self.engine.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match engine.remove_container(&id, true).await {
                        Ok(()) | Err(EngineError::NotFound(_)) => {
                            tracing::debug!(container_id = %id, "Removed abandoned container");
                        }
                        Err(e) => {
                            tracing::warn!(container_id = %id, error = %e, "Failed to remove abandoned container");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(container_id = %id, "No runtime to remove abandoned container");
            }
        }
    }
}
