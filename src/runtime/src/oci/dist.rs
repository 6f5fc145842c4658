//! `dist` command-line backend.
//!
//! Drives the `dist` tool as subprocesses:
//!
//! - `dist fetch <repo> <object> mediatype:<type>` prints the manifest
//! - `dist fetch <repo> <digest> | dist ingest ...` stores a layer
//! - `dist path -q <digest>` locates an ingested blob
//! - `dist apply <dir> < blob` unpacks a layer

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use ctrshim_core::api::AuthConfig;
use ctrshim_core::config::DistConfig;
use ctrshim_core::error::{Result, ShimError};
use tokio::process::Command;

use super::fetcher::{ImageBackend, LayerDescriptor};
use super::reference::ImageReference;

/// Image backend built on the `dist` tool.
#[derive(Debug, Clone)]
pub struct DistBackend {
    binary: PathBuf,
    root: Option<PathBuf>,
    manifest_media_type: String,
}

impl DistBackend {
    pub fn new(config: &DistConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            root: config.root.clone(),
            manifest_media_type: config.manifest_media_type.clone(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(ref root) = self.root {
            cmd.arg("--root").arg(root);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run `cmd` to completion and return its stdout.
    async fn run(&self, mut cmd: Command) -> std::result::Result<Vec<u8>, String> {
        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", self.binary.display(), e))?;
        if !output.status.success() {
            return Err(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output.stdout)
    }

    /// Content store path of an ingested blob.
    async fn blob_path(&self, digest: &str) -> Option<PathBuf> {
        let mut cmd = self.command();
        cmd.arg("path").arg("-q").arg(digest);
        let stdout = self.run(cmd).await.ok()?;
        let path = String::from_utf8_lossy(&stdout).trim().to_string();
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

#[async_trait]
impl ImageBackend for DistBackend {
    async fn fetch_manifest(
        &self,
        image: &ImageReference,
        auth: Option<&AuthConfig>,
    ) -> Result<Vec<u8>> {
        if auth.map(|a| !a.is_empty()).unwrap_or(false) {
            tracing::warn!(
                image = %image,
                "Registry credentials are not forwarded to dist; pulling anonymously"
            );
        }

        let mut cmd = self.command();
        cmd.arg("fetch")
            .arg(image.locator())
            .arg(image.object())
            .arg(format!("mediatype:{}", self.manifest_media_type));
        self.run(cmd).await.map_err(|message| ShimError::ImagePull {
            reference: image.to_string(),
            message,
        })
    }

    async fn has_layer(&self, digest: &str) -> Result<bool> {
        Ok(self.blob_path(digest).await.is_some())
    }

    async fn fetch_layer(&self, image: &ImageReference, layer: &LayerDescriptor) -> Result<()> {
        let locator = image.locator();
        let pull_err = |message: String| ShimError::ImagePull {
            reference: image.to_string(),
            message: format!("layer {}: {}", layer.digest, message),
        };

        let mut fetch = self.command();
        fetch
            .arg("fetch")
            .arg(&locator)
            .arg(&layer.digest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut fetch = fetch
            .spawn()
            .map_err(|e| pull_err(format!("failed to spawn fetch: {}", e)))?;

        let mut ingest = self.command();
        ingest
            .arg("ingest")
            .arg("--expected-digest")
            .arg(&layer.digest)
            .arg("--expected-size")
            .arg(layer.size.to_string())
            .arg(format!("{}@{}", locator, layer.digest))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut ingest = ingest
            .spawn()
            .map_err(|e| pull_err(format!("failed to spawn ingest: {}", e)))?;

        let (Some(mut blob), Some(mut sink)) = (fetch.stdout.take(), ingest.stdin.take()) else {
            return Err(pull_err("subprocess pipes unavailable".to_string()));
        };
        let copied = tokio::io::copy(&mut blob, &mut sink).await;
        drop(sink);

        let fetched = fetch
            .wait_with_output()
            .await
            .map_err(|e| pull_err(e.to_string()))?;
        let ingested = ingest
            .wait_with_output()
            .await
            .map_err(|e| pull_err(e.to_string()))?;

        if !fetched.status.success() {
            return Err(pull_err(format!(
                "fetch exited with {}: {}",
                fetched.status,
                String::from_utf8_lossy(&fetched.stderr).trim()
            )));
        }
        if !ingested.status.success() {
            return Err(pull_err(format!(
                "ingest exited with {}: {}",
                ingested.status,
                String::from_utf8_lossy(&ingested.stderr).trim()
            )));
        }
        let copied = copied.map_err(|e| pull_err(format!("copy failed: {}", e)))?;
        tracing::debug!(digest = %layer.digest, bytes = copied, "Ingested layer");
        Ok(())
    }

    async fn apply_layer(&self, digest: &str, dest: &Path) -> Result<()> {
        let blob = self
            .blob_path(digest)
            .await
            .ok_or_else(|| ShimError::rootfs(dest, format!("layer {} is not ingested", digest)))?;
        let file = std::fs::File::open(&blob).map_err(|e| {
            ShimError::rootfs(dest, format!("failed to open {}: {}", blob.display(), e))
        })?;

        let mut cmd = self.command();
        cmd.arg("apply").arg(dest);
        let output = cmd
            .stdin(Stdio::from(file))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ShimError::rootfs(dest, format!("failed to run apply: {}", e)))?;
        if !output.status.success() {
            return Err(ShimError::rootfs(
                dest,
                format!(
                    "applying {} exited with {}: {}",
                    digest,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}
