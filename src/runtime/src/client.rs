//! Backend execution client over Unix socket.
//!
//! Speaks HTTP/1.1 with JSON bodies to the execution daemon:
//!
//! | Call     | Request                          |
//! |----------|----------------------------------|
//! | `list`   | `GET /containers`                |
//! | `create` | `POST /containers`               |
//! | `start`  | `POST /containers/<id>/start`    |
//! | `kill`   | `POST /containers/<id>/kill`     |
//! | `delete` | `DELETE /containers/<id>`        |
//! | `info`   | `GET /containers/<id>`           |

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ctrshim_core::error::{Result, ShimError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::backend::{BackendContainer, CreateRequest, ExecutionBackend};

/// Largest response body accepted from the backend.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ListResponse {
    containers: Vec<BackendContainer>,
}

#[derive(Debug, Serialize)]
struct KillRequest {
    signal: i32,
}

/// Parsed HTTP response.
#[derive(Debug)]
struct HttpResponse {
    status: u16,
    body: String,
}

impl HttpResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client for the execution backend.
#[derive(Debug, Clone)]
pub struct ExecutionClient {
    socket_path: PathBuf,
    dial_timeout: Duration,
}

impl ExecutionClient {
    /// Connect to the backend via Unix socket.
    ///
    /// Verifies the socket is connectable within `dial_timeout`.
    pub async fn connect(socket_path: &Path, dial_timeout: Duration) -> Result<Self> {
        let client = Self {
            socket_path: socket_path.to_path_buf(),
            dial_timeout,
        };
        let _stream = client.dial().await?;
        tracing::debug!(socket = %socket_path.display(), "Connected to execution backend");
        Ok(client)
    }

    /// Get the socket path this client is connected to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn dial(&self) -> Result<UnixStream> {
        match tokio::time::timeout(self.dial_timeout, UnixStream::connect(&self.socket_path)).await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ShimError::backend(
                "dial",
                &self.socket_path.display().to_string(),
                e,
            )),
            Err(_) => Err(ShimError::Timeout(format!(
                "connecting to backend at {} took longer than {:?}",
                self.socket_path.display(),
                self.dial_timeout
            ))),
        }
    }

    async fn request(
        &self,
        op: &str,
        id: &str,
        method: &str,
        path: &str,
        body: Option<String>,
    ) -> Result<HttpResponse> {
        let body = body.unwrap_or_default();
        let http_request = format!(
            "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            method,
            path,
            body.len(),
            body,
        );

        let mut stream = self.dial().await?;
        stream
            .write_all(http_request.as_bytes())
            .await
            .map_err(|e| ShimError::backend(op, id, format!("request write failed: {}", e)))?;

        let mut response = Vec::with_capacity(4096);
        let mut buf = vec![0u8; 8192];
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| ShimError::backend(op, id, format!("response read failed: {}", e)))?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if response.len() > MAX_RESPONSE_BYTES {
                return Err(ShimError::backend(op, id, "response too large"));
            }
        }

        parse_response(&response).map_err(|msg| ShimError::backend(op, id, msg))
    }

    /// Turn a non-2xx response into a backend error.
    fn check(op: &str, id: &str, response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ShimError::backend(
                op,
                id,
                format!("status {}: {}", response.status, response.body.trim()),
            ))
        }
    }
}

fn parse_response(raw: &[u8]) -> std::result::Result<HttpResponse, String> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| "malformed response: no HTTP body".to_string())?;
    let status_line = head.lines().next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| format!("malformed status line: {:?}", status_line))?;
    Ok(HttpResponse {
        status,
        body: body.to_string(),
    })
}

#[async_trait]
impl ExecutionBackend for ExecutionClient {
    async fn list(&self) -> Result<Vec<BackendContainer>> {
        let response = self.request("list", "*", "GET", "/containers", None).await?;
        let response = Self::check("list", "*", response)?;
        let parsed: ListResponse = serde_json::from_str(&response.body)
            .map_err(|e| ShimError::backend("list", "*", format!("bad response: {}", e)))?;
        Ok(parsed.containers)
    }

    async fn create(&self, request: CreateRequest) -> Result<BackendContainer> {
        let id = request.id.clone();
        let body = serde_json::to_string(&request)?;
        let response = self
            .request("create", &id, "POST", "/containers", Some(body))
            .await?;
        let response = Self::check("create", &id, response)?;
        serde_json::from_str(&response.body)
            .map_err(|e| ShimError::backend("create", &id, format!("bad response: {}", e)))
    }

    async fn start(&self, id: &str) -> Result<()> {
        let path = format!("/containers/{}/start", id);
        let response = self.request("start", id, "POST", &path, None).await?;
        Self::check("start", id, response).map(|_| ())
    }

    async fn kill(&self, id: &str, signal: i32) -> Result<()> {
        let path = format!("/containers/{}/kill", id);
        let body = serde_json::to_string(&KillRequest { signal })?;
        let response = self.request("kill", id, "POST", &path, Some(body)).await?;
        Self::check("kill", id, response).map(|_| ())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = format!("/containers/{}", id);
        let response = self.request("delete", id, "DELETE", &path, None).await?;
        Self::check("delete", id, response).map(|_| ())
    }

    async fn info(&self, id: &str) -> Result<Option<BackendContainer>> {
        let path = format!("/containers/{}", id);
        let response = self.request("info", id, "GET", &path, None).await?;
        if response.status == 404 {
            return Ok(None);
        }
        let response = Self::check("info", id, response)?;
        serde_json::from_str(&response.body)
            .map(Some)
            .map_err(|e| ShimError::backend("info", id, format!("bad response: {}", e)))
    }
}
