//! Container engine abstraction.
//!
//! This module provides the `ContainerEngine` trait, the narrow set of daemon
//! operations the [`SandboxManager`](crate::SandboxManager) needs, together
//! with a Docker implementation using the `bollard` crate and an in-memory
//! mock for tests. Errors coming out of `bollard` are classified exactly once,
//! here, into [`EngineError`].

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::error::{Result, SandboxError};
use crate::result::ContainerLogs;

// =============================================================================
// Engine Types
// =============================================================================

/// Classified daemon error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Docker daemon unreachable: {0}")]
    Unreachable(String),

    /// The container ran and the daemon reported a nonzero exit.
    #[error("Container exited with code {exit_code}: {message}")]
    ContainerExited { exit_code: i64, message: String },

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Docker API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as E;
        match err {
            E::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            E::DockerResponseServerError {
                status_code,
                message,
            } => Self::Api {
                status: status_code,
                message,
            },
            E::DockerContainerWaitError { error, code } => Self::ContainerExited {
                exit_code: code,
                message: error,
            },
            E::IOError { .. }
            | E::SocketNotFoundError { .. }
            | E::RequestTimeoutError { .. }
            | E::HyperResponseError { .. }
            | E::HyperLegacyError { .. } => Self::Unreachable(err.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

/// Per-stream cap on collected container output.
pub const LOG_LIMIT_BYTES: usize = 1024 * 1024;

pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Output collector that keeps at most `limit` bytes and drops the rest.
#[derive(Debug)]
struct CappedBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl CappedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.truncated {
            return;
        }
        let chunk = String::from_utf8_lossy(chunk);
        let room = self.limit - self.text.len();
        if chunk.len() <= room {
            self.text.push_str(&chunk);
            return;
        }
        let mut cut = room;
        while !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&chunk[..cut]);
        self.truncated = true;
    }

    fn finish(mut self) -> String {
        if self.truncated {
            self.text.push_str(TRUNCATION_MARKER);
        }
        self.text
    }
}

/// Fully merged container settings handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub network_mode: String,
    pub read_only: bool,
    pub pids_limit: i64,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub tmpfs: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

/// Daemon-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DaemonStats {
    pub containers_running: i64,
    pub containers_stopped: i64,
    pub images: i64,
    pub memory_total: i64,
    pub cpus: i64,
}

// =============================================================================
// Container Engine Trait
// =============================================================================

/// Daemon operations used by the sandbox manager.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the daemon answers.
    async fn ping(&self) -> EngineResult<()>;

    /// Whether an image with this reference exists locally.
    async fn image_exists(&self, image: &str) -> EngineResult<bool>;

    /// Build `image` from `dockerfile` (relative to `context`).
    async fn build_image(&self, image: &str, dockerfile: &str, context: &Path) -> EngineResult<()>;

    async fn remove_image(&self, image: &str, force: bool) -> EngineResult<()>;

    /// Tags of all local images.
    async fn list_images(&self) -> EngineResult<Vec<String>>;

    /// Create (but do not start) a container. Returns its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String>;

    async fn start_container(&self, id: &str) -> EngineResult<()>;

    /// Wait for the container to exit and return its exit code.
    async fn wait_container(&self, id: &str) -> EngineResult<i64>;

    async fn container_logs(&self, id: &str) -> EngineResult<ContainerLogs>;

    /// Memory usage in bytes, when the daemon reports it.
    async fn memory_usage(&self, id: &str) -> EngineResult<Option<u64>>;

    /// Send SIGKILL.
    async fn kill_container(&self, id: &str) -> EngineResult<()>;

    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()>;

    /// IDs of exited containers, optionally only those created from `ancestor`.
    async fn list_exited_containers(&self, ancestor: Option<&str>) -> EngineResult<Vec<String>>;

    async fn daemon_stats(&self) -> EngineResult<DaemonStats>;
}

// =============================================================================
// Docker Engine Implementation
// =============================================================================

/// Docker-backed engine using the `bollard` crate.
pub struct DockerEngine {
    docker: bollard::Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::Daemon(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Connect and verify the daemon answers a ping.
    pub async fn connect() -> Result<Self> {
        let engine = Self::new()?;
        engine
            .ping()
            .await
            .map_err(|e| SandboxError::Daemon(e.to_string()))?;
        Ok(engine)
    }

    /// Create from an existing bollard Docker client.
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }
}

/// Pack a build context into an uncompressed tar archive. Symlinks are
/// archived as links, never followed, so the daemon only sees files that
/// physically live under the context.
fn pack_context(context: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", context)?;
    builder.into_inner()
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> EngineResult<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> EngineResult<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match EngineError::from(e) {
                EngineError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn build_image(&self, image: &str, dockerfile: &str, context: &Path) -> EngineResult<()> {
        use bollard::image::BuildImageOptions;

        let context: PathBuf = context.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || pack_context(&context))
            .await
            .map_err(|e| EngineError::Build(format!("build context task failed: {}", e)))?
            .map_err(|e| EngineError::Build(format!("failed to pack build context: {}", e)))?;

        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: image.to_string(),
            rm: true,      // remove intermediate containers on success
            forcerm: true, // ...and on failure
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(archive.into()));
        while let Some(item) = stream.next().await {
            let info = item?;
            if let Some(error) = info.error {
                return Err(EngineError::Build(error));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(image = %image, "{}", line);
                }
            }
        }
        Ok(())
    }

    async fn remove_image(&self, image: &str, force: bool) -> EngineResult<()> {
        use bollard::image::RemoveImageOptions;

        self.docker
            .remove_image(
                image,
                Some(RemoveImageOptions {
                    force,
                    ..Default::default()
                }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn list_images(&self) -> EngineResult<Vec<String>> {
        use bollard::image::ListImagesOptions;

        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;
        Ok(images.into_iter().flat_map(|image| image.repo_tags).collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::HostConfig;

        let host_config = HostConfig {
            memory: Some(spec.memory_bytes),
            // Same as memory: no swap on top of the limit
            memory_swap: Some(spec.memory_bytes),
            cpu_quota: Some(spec.cpu_quota),
            cpu_period: Some(spec.cpu_period),
            network_mode: Some(spec.network_mode.clone()),
            readonly_rootfs: Some(spec.read_only),
            pids_limit: Some(spec.pids_limit),
            cap_drop: Some(spec.cap_drop.clone()),
            security_opt: Some(spec.security_opt.clone()),
            tmpfs: Some(spec.tmpfs.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            host_config: Some(host_config),
            labels: Some(spec.labels.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        self.docker.start_container::<String>(id, None).await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> EngineResult<i64> {
        use bollard::container::WaitContainerOptions;

        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(e)) => Err(e.into()),
            None => Err(EngineError::Other(
                "wait stream ended without an exit status".to_string(),
            )),
        }
    }

    async fn container_logs(&self, id: &str) -> EngineResult<ContainerLogs> {
        use bollard::container::{LogOutput, LogsOptions};

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stdout = CappedBuffer::new(LOG_LIMIT_BYTES);
        let mut stderr = CappedBuffer::new(LOG_LIMIT_BYTES);
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(msg) = stream.next().await {
            match msg? {
                LogOutput::StdOut { message } => stdout.push(&message),
                LogOutput::StdErr { message } => stderr.push(&message),
                _ => {} // stdin/console frames
            }
            if stdout.truncated && stderr.truncated {
                break;
            }
        }
        if stdout.truncated || stderr.truncated {
            tracing::warn!(container_id = %id, limit = LOG_LIMIT_BYTES, "Container output truncated");
        }
        Ok(ContainerLogs {
            stdout: stdout.finish(),
            stderr: stderr.finish(),
        })
    }

    async fn memory_usage(&self, id: &str) -> EngineResult<Option<u64>> {
        use bollard::container::StatsOptions;

        let mut stream = self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        match stream.next().await {
            Some(Ok(stats)) => {
                let memory = &stats.memory_stats;
                Ok(memory.max_usage.or(memory.usage).filter(|bytes| *bytes > 0))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn kill_container(&self, id: &str) -> EngineResult<()> {
        use bollard::container::KillContainerOptions;

        self.docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()> {
        use bollard::container::RemoveContainerOptions;

        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn list_exited_containers(&self, ancestor: Option<&str>) -> EngineResult<Vec<String>> {
        use bollard::container::ListContainersOptions;

        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["exited".to_string()]);
        if let Some(image) = ancestor {
            filters.insert("ancestor".to_string(), vec![image.to_string()]);
        }

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn daemon_stats(&self) -> EngineResult<DaemonStats> {
        let info = self.docker.info().await?;
        Ok(DaemonStats {
            containers_running: info.containers_running.unwrap_or(0),
            containers_stopped: info.containers_stopped.unwrap_or(0),
            images: info.images.unwrap_or(0),
            memory_total: info.mem_total.unwrap_or(0),
            cpus: info.ncpu.unwrap_or(0),
        })
    }
}

// =============================================================================
// Mock Engine (for testing without Docker)
// =============================================================================

/// Scripted behaviour of one mock container.
#[derive(Debug, Clone)]
pub enum MockRun {
    /// Exit immediately with this code and output.
    Exit {
        exit_code: i64,
        stdout: String,
        stderr: String,
        memory_bytes: Option<u64>,
    },
    /// Run for `duration`, then exit with `exit_code`.
    Sleep { duration: Duration, exit_code: i64 },
    /// The daemon reports a structured wait error.
    WaitError { exit_code: i64, message: String },
}

impl MockRun {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Exit {
            exit_code: 0,
            stdout: text.into(),
            stderr: String::new(),
            memory_bytes: None,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self::Exit {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            memory_bytes: None,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    images: HashSet<String>,
    runs: VecDeque<MockRun>,
    containers: HashMap<String, MockRun>,
    specs: Vec<ContainerSpec>,
    killed: Vec<String>,
    removed: Vec<String>,
    image_lookups: usize,
    builds: usize,
    next_id: usize,
}

/// In-memory engine for unit testing.
///
/// Containers follow scripted [`MockRun`]s, consumed in order; once the
/// script is exhausted every container prints `[mock] command executed`.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: tokio::sync::Mutex<MockState>,
    unreachable: bool,
    fail_logs: bool,
    fail_builds: bool,
    fail_stats: bool,
    fail_kill: bool,
    fail_remove: bool,
    build_delay: Option<Duration>,
    exited: Vec<String>,
}

impl MockEngine {
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            state: tokio::sync::Mutex::new(MockState {
                runs: runs.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Pretend these images are already present in the daemon.
    pub fn with_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .get_mut()
            .images
            .extend(images.into_iter().map(Into::into));
        self
    }

    /// Every call fails as if the daemon socket were gone.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Log retrieval fails after the container exits.
    pub fn failing_logs(mut self) -> Self {
        self.fail_logs = true;
        self
    }

    /// Image builds fail.
    pub fn failing_builds(mut self) -> Self {
        self.fail_builds = true;
        self
    }

    /// Memory stats are unavailable.
    pub fn failing_stats(mut self) -> Self {
        self.fail_stats = true;
        self
    }

    /// SIGKILL is rejected by the daemon.
    pub fn failing_kill(mut self) -> Self {
        self.fail_kill = true;
        self
    }

    /// Container removal fails with a server error; containers stay live.
    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    /// Image builds take this long.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Exited containers left behind by earlier runs.
    pub fn with_exited_containers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exited = ids.into_iter().map(Into::into).collect();
        self
    }

    pub async fn image_lookups(&self) -> usize {
        self.state.lock().await.image_lookups
    }

    pub async fn builds(&self) -> usize {
        self.state.lock().await.builds
    }

    /// Specs of every container created so far.
    pub async fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().await.specs.clone()
    }

    /// IDs of containers that were created and not yet removed.
    pub async fn live_containers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().await.containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn killed(&self) -> Vec<String> {
        self.state.lock().await.killed.clone()
    }

    pub async fn removed(&self) -> Vec<String> {
        self.state.lock().await.removed.clone()
    }

    fn check_reachable(&self) -> EngineResult<()> {
        if self.unreachable {
            return Err(EngineError::Unreachable(
                "Socket not found: /var/run/docker.sock".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> EngineResult<()> {
        self.check_reachable()
    }

    async fn image_exists(&self, image: &str) -> EngineResult<bool> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        state.image_lookups += 1;
        Ok(state.images.contains(image))
    }

    async fn build_image(&self, image: &str, _dockerfile: &str, _context: &Path) -> EngineResult<()> {
        self.check_reachable()?;
        self.state.lock().await.builds += 1;
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_builds {
            return Err(EngineError::Build("mock build failure".to_string()));
        }
        self.state.lock().await.images.insert(image.to_string());
        Ok(())
    }

    async fn remove_image(&self, image: &str, _force: bool) -> EngineResult<()> {
        self.check_reachable()?;
        if self.state.lock().await.images.remove(image) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("No such image: {}", image)))
        }
    }

    async fn list_images(&self) -> EngineResult<Vec<String>> {
        self.check_reachable()?;
        let mut images: Vec<String> = self.state.lock().await.images.iter().cloned().collect();
        images.sort();
        Ok(images)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("mock-container-{}", state.next_id);
        let run = state
            .runs
            .pop_front()
            .unwrap_or_else(|| MockRun::stdout("[mock] command executed"));
        state.containers.insert(id.clone(), run);
        state.specs.push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        self.check_reachable()?;
        if self.state.lock().await.containers.contains_key(id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("No such container: {}", id)))
        }
    }

    async fn wait_container(&self, id: &str) -> EngineResult<i64> {
        let run = self
            .state
            .lock()
            .await
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", id)))?;
        match run {
            MockRun::Exit { exit_code, .. } => Ok(exit_code),
            MockRun::Sleep {
                duration,
                exit_code,
            } => {
                tokio::time::sleep(duration).await;
                Ok(exit_code)
            }
            MockRun::WaitError { exit_code, message } => {
                Err(EngineError::ContainerExited { exit_code, message })
            }
        }
    }

    async fn container_logs(&self, id: &str) -> EngineResult<ContainerLogs> {
        if self.fail_logs {
            return Err(EngineError::Other("mock log stream broke".to_string()));
        }
        match self.state.lock().await.containers.get(id) {
            Some(MockRun::Exit { stdout, stderr, .. }) => Ok(ContainerLogs {
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            }),
            Some(MockRun::WaitError { message, .. }) => Ok(ContainerLogs {
                stdout: String::new(),
                stderr: message.clone(),
            }),
            Some(MockRun::Sleep { .. }) => Ok(ContainerLogs::default()),
            None => Err(EngineError::NotFound(format!("No such container: {}", id))),
        }
    }

    async fn memory_usage(&self, id: &str) -> EngineResult<Option<u64>> {
        if self.fail_stats {
            return Err(EngineError::Other("mock stats stream broke".to_string()));
        }
        match self.state.lock().await.containers.get(id) {
            Some(MockRun::Exit { memory_bytes, .. }) => Ok(*memory_bytes),
            _ => Ok(None),
        }
    }

    async fn kill_container(&self, id: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        if !state.containers.contains_key(id) {
            return Err(EngineError::NotFound(format!("No such container: {}", id)));
        }
        if self.fail_kill {
            return Err(EngineError::Api {
                status: 500,
                message: format!("Cannot kill container {}: mock kill failure", id),
            });
        }
        state.killed.push(id.to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> EngineResult<()> {
        if self.fail_remove {
            return Err(EngineError::Api {
                status: 500,
                message: format!("Could not remove container {}: device or resource busy", id),
            });
        }
        let mut state = self.state.lock().await;
        if state.containers.remove(id).is_none() && !self.exited.iter().any(|e| e == id) {
            return Err(EngineError::NotFound(format!("No such container: {}", id)));
        }
        state.removed.push(id.to_string());
        Ok(())
    }

    async fn list_exited_containers(&self, _ancestor: Option<&str>) -> EngineResult<Vec<String>> {
        self.check_reachable()?;
        let removed = self.state.lock().await.removed.clone();
        Ok(self
            .exited
            .iter()
            .filter(|id| !removed.contains(id))
            .cloned()
            .collect())
    }

    async fn daemon_stats(&self) -> EngineResult<DaemonStats> {
        self.check_reachable()?;
        let state = self.state.lock().await;
        Ok(DaemonStats {
            containers_running: state.containers.len() as i64,
            containers_stopped: self.exited.len() as i64,
            images: state.images.len() as i64,
            memory_total: 8 * 1024 * 1024 * 1024,
            cpus: 4,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bollard_error_classification() {
        let not_found = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such image: ghost:latest".into(),
        };
        assert!(matches!(EngineError::from(not_found), EngineError::NotFound(_)));

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "container is not running".into(),
        };
        assert!(matches!(
            EngineError::from(conflict),
            EngineError::Api { status: 409, .. }
        ));

        let wait = bollard::errors::Error::DockerContainerWaitError {
            error: String::new(),
            code: 3,
        };
        assert_eq!(
            EngineError::from(wait),
            EngineError::ContainerExited {
                exit_code: 3,
                message: String::new()
            }
        );

        let io = bollard::errors::Error::IOError {
            err: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
        };
        assert!(matches!(EngineError::from(io), EngineError::Unreachable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dead_socket_is_unreachable() {
        // a socket file with nobody listening behind it
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());

        let docker = bollard::Docker::connect_with_unix(
            socket.to_str().unwrap(),
            5,
            bollard::API_DEFAULT_VERSION,
        )
        .unwrap();
        let engine = DockerEngine::from_client(docker);

        let err = engine.ping().await.unwrap_err();
        assert!(matches!(err, EngineError::Unreachable(_)), "got {:?}", err);
    }

    #[test]
    fn test_capped_buffer_truncates_at_limit() {
        let mut buf = CappedBuffer::new(8);
        buf.push(b"hello");
        assert!(!buf.truncated);
        buf.push(b" world");
        assert!(buf.truncated);
        buf.push(b"dropped");
        assert_eq!(buf.finish(), format!("hello wo{}", TRUNCATION_MARKER));

        let mut buf = CappedBuffer::new(8);
        buf.push(b"exactly8");
        assert_eq!(buf.finish(), "exactly8");
    }

    #[test]
    fn test_capped_buffer_cuts_on_char_boundary() {
        let mut buf = CappedBuffer::new(4);
        buf.push("aé€".as_bytes()); // 1 + 2 + 3 bytes
        assert_eq!(buf.finish(), format!("aé{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_pack_context_keeps_symlinks_as_links() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "top secret").unwrap();

        let ctx = tempfile::tempdir().unwrap();
        std::fs::write(ctx.path().join("Dockerfile.python"), "FROM python:3.12-slim\n").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path().join("secret"), ctx.path().join("link")).unwrap();

        let archive = pack_context(ctx.path()).unwrap();
        let text = String::from_utf8_lossy(&archive);
        assert!(text.contains("Dockerfile.python"));
        assert!(!text.contains("top secret"));
    }

    #[tokio::test]
    async fn test_mock_engine_lifecycle() {
        let mock = MockEngine::new(vec![MockRun::stdout("Hello Sandbox")]).with_images(["python:3.12"]);

        assert!(mock.image_exists("python:3.12").await.unwrap());
        assert!(!mock.image_exists("ghost").await.unwrap());
        assert_eq!(mock.image_lookups().await, 2);

        let spec = ContainerSpec {
            name: "codebox-test".into(),
            image: "python:3.12".into(),
            cmd: vec!["python".into(), "-c".into(), "print(1)".into()],
            memory_bytes: 1024,
            cpu_quota: 50_000,
            cpu_period: 100_000,
            network_mode: "none".into(),
            read_only: true,
            pids_limit: 50,
            cap_drop: vec!["ALL".into()],
            security_opt: vec![],
            tmpfs: HashMap::new(),
            labels: HashMap::new(),
        };
        let id = mock.create_container(&spec).await.unwrap();
        mock.start_container(&id).await.unwrap();
        assert_eq!(mock.wait_container(&id).await.unwrap(), 0);
        assert_eq!(mock.container_logs(&id).await.unwrap().stdout, "Hello Sandbox");

        mock.remove_container(&id, true).await.unwrap();
        assert!(mock.live_containers().await.is_empty());
        assert!(matches!(
            mock.remove_container(&id, true).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_engine_unreachable() {
        let mock = MockEngine::default().unreachable();
        assert!(matches!(mock.ping().await, Err(EngineError::Unreachable(_))));
    }
}
