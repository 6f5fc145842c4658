//! In-memory backends for driving the shim without a daemon or registry.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ctrshim_core::api::{AuthConfig, ContainerConfig, ContainerMetadata, ImageSpec, PodSandboxConfig};
use ctrshim_core::config::{HostStdio, ShimConfig};
use ctrshim_core::error::{Result, ShimError};
use ctrshim_cri::CriService;
use ctrshim_runtime::backend::{BackendContainer, BackendStatus, CreateRequest, ExecutionBackend};
use ctrshim_runtime::oci::{ImageBackend, ImageReference, LayerDescriptor};
use tempfile::TempDir;

pub const SANDBOX_ID: &str = "fake_pod";
pub const IMAGE: &str = "docker.io/library/redis";

pub const MANIFEST: &str = r#"{
    "schemaVersion": 2,
    "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
    "config": {
        "mediaType": "application/vnd.docker.container.image.v1+json",
        "size": 7000,
        "digest": "sha256:7614ae9453d1d87e740a2056257a6de7135c84037c367e1fffa92ae922784631"
    },
    "layers": [
        {
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": 22500000,
            "digest": "sha256:bb79b6b2107fea8e8a47133a660b78e3a546998fcf0427be39ac9a0af4a97e90"
        },
        {
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": 1700,
            "digest": "sha256:1ed3521a5dcbd05214eb7f35b952ecf018d5a6610c32ba4e315028c556f45e94"
        },
        {
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": 1400000,
            "digest": "sha256:5999b99cee8f2875d391d64df20b6296b63f23951a7d41749f028375e887cd05"
        }
    ]
}"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn is_fifo(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

/// Execution backend keeping containers in a map.
#[derive(Default)]
pub struct FakeBackend {
    containers: Mutex<HashMap<String, BackendStatus>>,
    signals: Mutex<Vec<(String, i32)>>,
    created: Mutex<Vec<CreateRequest>>,
    conduits_ready: Mutex<Vec<bool>>,
    ignore_sigterm: Mutex<bool>,
    fail_create: Mutex<bool>,
    fail_delete: Mutex<bool>,
}

impl FakeBackend {
    /// The container's process exits on its own.
    pub fn exit(&self, id: &str) {
        if let Some(status) = self.containers.lock().unwrap().get_mut(id) {
            *status = BackendStatus::Stopped;
        }
    }

    /// The backend forgets the container entirely.
    pub fn forget(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    pub fn set_ignore_sigterm(&self, ignore: bool) {
        *self.ignore_sigterm.lock().unwrap() = ignore;
    }

    pub fn set_fail_create(&self, fail: bool) {
        *self.fail_create.lock().unwrap() = fail;
    }

    pub fn set_fail_delete(&self, fail: bool) {
        *self.fail_delete.lock().unwrap() = fail;
    }

    pub fn signals(&self) -> Vec<(String, i32)> {
        self.signals.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<CreateRequest> {
        self.created.lock().unwrap().clone()
    }

    /// Whether every create call found its stdio FIFOs in place.
    pub fn conduits_were_ready(&self) -> bool {
        self.conduits_ready.lock().unwrap().iter().all(|r| *r)
    }

    pub fn knows(&self, id: &str) -> bool {
        self.containers.lock().unwrap().contains_key(id)
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    async fn list(&self) -> Result<Vec<BackendContainer>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, status)| BackendContainer {
                id: id.clone(),
                status: *status,
            })
            .collect())
    }

    async fn create(&self, request: CreateRequest) -> Result<BackendContainer> {
        if *self.fail_create.lock().unwrap() {
            return Err(ShimError::backend("create", &request.id, "runtime exploded"));
        }
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&request.id) {
            return Err(ShimError::backend("create", &request.id, "already exists"));
        }
        self.conduits_ready.lock().unwrap().push(
            is_fifo(&request.stdin) && is_fifo(&request.stdout) && is_fifo(&request.stderr),
        );
        containers.insert(request.id.clone(), BackendStatus::Created);
        let created = BackendContainer {
            id: request.id.clone(),
            status: BackendStatus::Created,
        };
        self.created.lock().unwrap().push(request);
        Ok(created)
    }

    async fn start(&self, id: &str) -> Result<()> {
        match self.containers.lock().unwrap().get_mut(id) {
            Some(status) => {
                *status = BackendStatus::Running;
                Ok(())
            }
            None => Err(ShimError::backend("start", id, "no such container")),
        }
    }

    async fn kill(&self, id: &str, signal: i32) -> Result<()> {
        self.signals.lock().unwrap().push((id.to_string(), signal));
        if *self.ignore_sigterm.lock().unwrap() {
            return Ok(());
        }
        match self.containers.lock().unwrap().get_mut(id) {
            Some(status) => {
                *status = BackendStatus::Stopped;
                Ok(())
            }
            None => Err(ShimError::backend("kill", id, "no such container")),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if *self.fail_delete.lock().unwrap() {
            return Err(ShimError::backend("delete", id, "connection reset"));
        }
        match self.containers.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(ShimError::backend("delete", id, "no such container")),
        }
    }

    async fn info(&self, id: &str) -> Result<Option<BackendContainer>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(id)
            .map(|status| BackendContainer {
                id: id.to_string(),
                status: *status,
            }))
    }
}

/// Image backend serving one manifest and counting ingests.
#[derive(Default)]
pub struct FakeImageBackend {
    content: Mutex<HashSet<String>>,
    ingests: Mutex<usize>,
    manifest_fetches: Mutex<usize>,
}

impl FakeImageBackend {
    pub fn ingests(&self) -> usize {
        *self.ingests.lock().unwrap()
    }

    pub fn stored_layers(&self) -> usize {
        self.content.lock().unwrap().len()
    }

    pub fn manifest_fetches(&self) -> usize {
        *self.manifest_fetches.lock().unwrap()
    }
}

#[async_trait]
impl ImageBackend for FakeImageBackend {
    async fn fetch_manifest(
        &self,
        _image: &ImageReference,
        _auth: Option<&AuthConfig>,
    ) -> Result<Vec<u8>> {
        *self.manifest_fetches.lock().unwrap() += 1;
        Ok(MANIFEST.as_bytes().to_vec())
    }

    async fn has_layer(&self, digest: &str) -> Result<bool> {
        Ok(self.content.lock().unwrap().contains(digest))
    }

    async fn fetch_layer(&self, _image: &ImageReference, layer: &LayerDescriptor) -> Result<()> {
        *self.ingests.lock().unwrap() += 1;
        self.content.lock().unwrap().insert(layer.digest.clone());
        Ok(())
    }

    async fn apply_layer(&self, digest: &str, dest: &Path) -> Result<()> {
        let name = digest.trim_start_matches("sha256:");
        std::fs::write(dest.join(name), digest)?;
        Ok(())
    }
}

pub struct Harness {
    pub service: CriService,
    pub backend: Arc<FakeBackend>,
    pub images: Arc<FakeImageBackend>,
    pub root_dir: PathBuf,
    _tmp: TempDir,
}

pub fn harness() -> Harness {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let root_dir = tmp.path().join("containers");
    let config = ShimConfig {
        root_dir: root_dir.clone(),
        host_stdio: HostStdio::Discard,
        stop_poll_interval_ms: 10,
        ..Default::default()
    };
    let backend = Arc::new(FakeBackend::default());
    let images = Arc::new(FakeImageBackend::default());
    let service = CriService::new(&config, backend.clone(), images.clone());
    Harness {
        service,
        backend,
        images,
        root_dir,
        _tmp: tmp,
    }
}

pub fn container_config(name: &str, attempt: u32) -> ContainerConfig {
    ContainerConfig {
        metadata: Some(ContainerMetadata {
            name: name.to_string(),
            attempt,
        }),
        image: Some(ImageSpec::new(IMAGE)),
        command: vec!["redis-server".to_string()],
        args: vec!["--port".to_string(), "6379".to_string()],
        log_path: format!("{}/{}.log", name, attempt),
        labels: HashMap::from([("app".to_string(), name.to_string())]),
        ..Default::default()
    }
}

pub fn sandbox_config() -> PodSandboxConfig {
    PodSandboxConfig {
        log_directory: "/var/log/pods/fake_pod".to_string(),
        ..Default::default()
    }
}
