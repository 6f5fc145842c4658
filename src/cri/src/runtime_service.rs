//! Container lifecycle on top of an execution backend.
//!
//! The shim keeps configuration and timestamps; the backend is asked for
//! state on every read since a container may exit without the shim noticing.
//! A container the backend no longer knows is reported as exited.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use ctrshim_core::api::{
    Container, ContainerConfig, ContainerFilter, ContainerManager, ContainerState,
    ContainerStatus, PodSandboxConfig,
};
use ctrshim_core::config::{HostStdio, ShimConfig};
use ctrshim_core::error::{Result, ShimError};
use ctrshim_runtime::backend::{BackendContainer, CreateRequest, ExecutionBackend, RootfsMount, TypedSpec};
use ctrshim_runtime::oci::ImageResolver;
use ctrshim_runtime::spec::{process_args, RuntimeSpec};
use ctrshim_runtime::stdio::{self, StdioPaths};
use ctrshim_runtime::{mount, BACKEND_RUNTIME};

use crate::container::{ContainerRecord, ContainerStore};
use crate::naming;

/// Container lifecycle service.
pub struct RuntimeService {
    root_dir: PathBuf,
    host_stdio: HostStdio,
    stop_poll_interval: Duration,
    backend: Arc<dyn ExecutionBackend>,
    images: ImageResolver,
    containers: ContainerStore,
}

impl RuntimeService {
    /// Create a new RuntimeService sharing `images` with the image service.
    pub fn new(config: &ShimConfig, backend: Arc<dyn ExecutionBackend>, images: ImageResolver) -> Self {
        Self {
            root_dir: config.root_dir.clone(),
            host_stdio: config.host_stdio,
            stop_poll_interval: config.stop_poll_interval(),
            backend,
            images,
            containers: ContainerStore::new(),
        }
    }

    /// Working directory of container `id`.
    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.root_dir.join(id)
    }

    pub fn containers(&self) -> &ContainerStore {
        &self.containers
    }

    /// Live state of `id`; exited when the backend does not know it.
    async fn backend_state(&self, id: &str) -> Result<ContainerState> {
        Ok(self
            .backend
            .info(id)
            .await?
            .map(|c| c.status.to_container_state())
            .unwrap_or(ContainerState::Exited))
    }

    /// Poll until `id` stops running or `grace` elapses. Returns what the
    /// backend last reported.
    async fn wait_for_exit(&self, id: &str, grace: Duration) -> Result<Option<BackendContainer>> {
        // A grace period past the clock's range never expires.
        let deadline = Instant::now().checked_add(grace);
        loop {
            tokio::time::sleep(self.stop_poll_interval).await;
            let info = self.backend.info(id).await?;
            match info {
                Some(ref c) if c.status.to_container_state() == ContainerState::Running => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        tracing::warn!(
                            container_id = %id,
                            grace_secs = grace.as_secs(),
                            "Container did not exit within grace period, forcing stop"
                        );
                        return Ok(info);
                    }
                }
                _ => return Ok(info),
            }
        }
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Container log path, relative to the sandbox log directory when it has one.
fn resolve_log_path(sandbox: &PodSandboxConfig, config: &ContainerConfig) -> String {
    if sandbox.log_directory.is_empty() || config.log_path.is_empty() {
        return config.log_path.clone();
    }
    Path::new(&sandbox.log_directory)
        .join(&config.log_path)
        .to_string_lossy()
        .into_owned()
}

#[async_trait]
impl ContainerManager for RuntimeService {
    async fn create_container(
        &self,
        pod_sandbox_id: &str,
        config: Option<&ContainerConfig>,
        sandbox_config: Option<&PodSandboxConfig>,
    ) -> Result<String> {
        if pod_sandbox_id.is_empty() {
            return Err(ShimError::InvalidArgument("pod sandbox id is empty".to_string()));
        }
        let config = config
            .ok_or_else(|| ShimError::InvalidArgument("container config required".to_string()))?;
        let sandbox_config = sandbox_config
            .ok_or_else(|| ShimError::InvalidArgument("sandbox config required".to_string()))?;
        let metadata = config.metadata.clone().unwrap_or_default();
        if metadata.name.is_empty() {
            return Err(ShimError::InvalidArgument("container name is empty".to_string()));
        }

        let id = naming::encode(pod_sandbox_id, &metadata);
        tracing::info!(
            container_id = %id,
            sandbox_id = %pod_sandbox_id,
            name = %metadata.name,
            attempt = metadata.attempt,
            image = %config.image_ref(),
            "CRI CreateContainer"
        );

        if self.containers.contains(&id).await {
            return Err(ShimError::AlreadyExists(format!("container {}", id)));
        }

        let dir = self.container_dir(&id);
        tokio::fs::create_dir_all(&dir).await?;

        let rootfs = dir.join("rootfs");
        let image = self.images.materialize_rootfs(config.image_ref(), &rootfs).await?;

        let spec = RuntimeSpec::build(
            &id,
            process_args(&config.command, &config.args),
            &rootfs,
            config.tty,
        );
        let paths = StdioPaths::in_dir(&dir);
        let stdio = stdio::setup(&paths, config.tty, self.host_stdio)?;

        let request = CreateRequest {
            id: id.clone(),
            spec: TypedSpec::encode(&spec)?,
            rootfs: vec![RootfsMount::bind(&rootfs)],
            runtime: BACKEND_RUNTIME.to_string(),
            terminal: config.tty,
            stdin: paths.stdin,
            stdout: paths.stdout,
            stderr: paths.stderr,
        };
        if let Err(e) = self.backend.create(request).await {
            stdio.shutdown().await;
            return Err(e);
        }

        let record = ContainerRecord {
            id: id.clone(),
            pod_sandbox_id: pod_sandbox_id.to_string(),
            metadata,
            config: config.clone(),
            image_ref: image.digest,
            log_path: resolve_log_path(sandbox_config, config),
            dir,
            created_at: now_nanos(),
            started_at: 0,
            finished_at: 0,
        };
        if let Err((e, stdio)) = self.containers.insert(record, Some(stdio)).await {
            if let Some(stdio) = stdio {
                stdio.shutdown().await;
            }
            return Err(e);
        }

        tracing::debug!(container_id = %id, "Container created");
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let record = self.containers.require(container_id).await?;

        tracing::info!(
            container_id = %container_id,
            sandbox_id = %record.pod_sandbox_id,
            "CRI StartContainer"
        );

        self.backend.start(container_id).await?;
        if !self.containers.mark_started(container_id, now_nanos()).await {
            tracing::debug!(container_id = %container_id, "Container removed before start was recorded");
        }
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, timeout: i64) -> Result<()> {
        self.containers.require(container_id).await?;

        tracing::info!(container_id = %container_id, timeout, "CRI StopContainer");

        let mut present = self.backend.info(container_id).await?;
        let running = present
            .as_ref()
            .map(|c| c.status.to_container_state() == ContainerState::Running)
            .unwrap_or(false);

        if timeout > 0 && running {
            match self.backend.kill(container_id, libc::SIGTERM).await {
                Ok(()) => {
                    let grace = Duration::from_secs(timeout as u64);
                    present = self.wait_for_exit(container_id, grace).await?;
                }
                Err(e) => {
                    tracing::warn!(
                        container_id = %container_id,
                        error = %e,
                        "SIGTERM delivery failed, forcing stop"
                    );
                }
            }
        }

        if present.is_some() {
            self.backend.delete(container_id).await?;
        }
        if !self.containers.mark_finished(container_id, now_nanos()).await {
            tracing::debug!(container_id = %container_id, "Container removed before stop was recorded");
        }
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let record = self.containers.require(container_id).await?;

        tracing::info!(container_id = %container_id, "CRI RemoveContainer");

        // The record stays until the backend has let go of the container.
        if self.backend.info(container_id).await?.is_some() {
            self.backend.delete(container_id).await?;
        }

        if let Some(stdio) = self.containers.take_stdio(container_id).await {
            stdio.shutdown().await;
        }

        let rootfs = record.rootfs();
        if mount::is_mount_point(&rootfs) {
            mount::unmount(&rootfs).map_err(|e| ShimError::rootfs(&rootfs, e))?;
        }

        match tokio::fs::remove_dir_all(&record.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ShimError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to remove {}: {}", record.dir.display(), e),
                )))
            }
        }

        self.containers.remove(container_id).await;
        Ok(())
    }

    async fn container_status(&self, container_id: &str) -> Result<ContainerStatus> {
        let record = self.containers.require(container_id).await?;
        let state = self.backend_state(container_id).await?;
        Ok(record.to_status(state))
    }

    async fn list_containers(&self, filter: Option<&ContainerFilter>) -> Result<Vec<Container>> {
        let records = self.containers.list().await;
        let live: HashMap<String, ContainerState> = self
            .backend
            .list()
            .await?
            .into_iter()
            .map(|c| (c.id, c.status.to_container_state()))
            .collect();

        let wanted = filter.and_then(|f| f.state);
        Ok(records
            .iter()
            .map(|r| {
                let state = live.get(&r.id).copied().unwrap_or(ContainerState::Exited);
                r.to_container(state)
            })
            .filter(|c| wanted.map(|s| c.state == s).unwrap_or(true))
            .collect())
    }
}
