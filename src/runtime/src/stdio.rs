//! Named-pipe stdio for containers.
//!
//! Each container gets `stdin`, `stdout` and `stderr` FIFOs in its working
//! directory. The backend opens the container side; the shim opens the host
//! side and runs one copy task per stream. The tasks belong to a
//! [`StdioHandle`] that is shut down when the container is removed.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use ctrshim_core::config::HostStdio;
use ctrshim_core::error::{Result, ShimError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Conduit locations inside a container directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioPaths {
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl StdioPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            stdin: dir.join("stdin"),
            stdout: dir.join("stdout"),
            stderr: dir.join("stderr"),
        }
    }
}

/// Running copy tasks of one container.
#[derive(Debug, Default)]
pub struct StdioHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl StdioHandle {
    /// Number of copy tasks owned by this handle.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// True once every copy task has ended.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }

    /// Abort the copy tasks and wait for them to release their conduits.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Create a FIFO at `path`. An existing file is reused.
pub fn create_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o700) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(err);
        }
    }
    Ok(())
}

fn conduit_error(path: &Path, err: io::Error) -> ShimError {
    ShimError::Io(io::Error::new(
        err.kind(),
        format!("stdio conduit {}: {}", path.display(), err),
    ))
}

/// Create the FIFOs and start copying between them and the host.
///
/// Conduits are opened read-write so opening never blocks on the backend.
/// If any conduit fails to open, the ones opened before it are closed and
/// no task is started. In TTY mode stderr is merged into stdout by the
/// terminal, so its FIFO is created but not read.
///
/// Must be called from within a Tokio runtime.
pub fn setup(paths: &StdioPaths, tty: bool, host: HostStdio) -> Result<StdioHandle> {
    for path in [&paths.stdin, &paths.stdout, &paths.stderr] {
        create_fifo(path).map_err(|e| conduit_error(path, e))?;
    }

    let stdin = pipe::OpenOptions::new()
        .read_write(true)
        .open_sender(&paths.stdin)
        .map_err(|e| conduit_error(&paths.stdin, e))?;
    let stdout = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(&paths.stdout)
        .map_err(|e| conduit_error(&paths.stdout, e))?;
    let stderr = if tty {
        None
    } else {
        Some(
            pipe::OpenOptions::new()
                .read_write(true)
                .open_receiver(&paths.stderr)
                .map_err(|e| conduit_error(&paths.stderr, e))?,
        )
    };

    let (host_in, host_out, host_err): (BoxedReader, BoxedWriter, BoxedWriter) = match host {
        HostStdio::Inherit => (
            Box::new(tokio::io::stdin()),
            Box::new(tokio::io::stdout()),
            Box::new(tokio::io::stderr()),
        ),
        HostStdio::Discard => (
            Box::new(tokio::io::empty()),
            Box::new(tokio::io::sink()),
            Box::new(tokio::io::sink()),
        ),
    };

    let mut tasks = vec![
        spawn_copy("stdin", host_in, Box::new(stdin)),
        spawn_copy("stdout", Box::new(stdout), host_out),
    ];
    if let Some(stderr) = stderr {
        tasks.push(spawn_copy("stderr", Box::new(stderr), host_err));
    }

    Ok(StdioHandle { tasks })
}

fn spawn_copy(stream: &'static str, mut src: BoxedReader, mut dst: BoxedWriter) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::io::copy(&mut src, &mut dst).await {
            Ok(bytes) => tracing::debug!(stream, bytes, "Stdio copy finished"),
            Err(e) => tracing::debug!(stream, error = %e, "Stdio copy ended"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;
    use tokio::io::AsyncWriteExt;

    fn is_fifo(path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| m.file_type().is_fifo())
            .unwrap_or(false)
    }

    #[test]
    fn test_paths_in_dir() {
        let paths = StdioPaths::in_dir(Path::new("/var/lib/ctrshim/c1"));
        assert_eq!(paths.stdin, PathBuf::from("/var/lib/ctrshim/c1/stdin"));
        assert_eq!(paths.stdout, PathBuf::from("/var/lib/ctrshim/c1/stdout"));
        assert_eq!(paths.stderr, PathBuf::from("/var/lib/ctrshim/c1/stderr"));
    }

    #[test]
    fn test_create_fifo_is_reentrant() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stdout");
        create_fifo(&path).unwrap();
        create_fifo(&path).unwrap();
        assert!(is_fifo(&path));
    }

    #[tokio::test]
    async fn test_setup_creates_conduits_and_drains_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = StdioPaths::in_dir(tmp.path());
        let handle = setup(&paths, false, HostStdio::Discard).unwrap();

        assert!(is_fifo(&paths.stdin));
        assert!(is_fifo(&paths.stdout));
        assert!(is_fifo(&paths.stderr));
        assert_eq!(handle.task_count(), 3);

        // Container side writes; the host side drains into the sink.
        let mut writer = pipe::OpenOptions::new()
            .open_sender(&paths.stdout)
            .unwrap();
        writer.write_all(b"hello from redis\n").await.unwrap();
        drop(writer);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_tty_does_not_read_stderr() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = StdioPaths::in_dir(tmp.path());
        let handle = setup(&paths, true, HostStdio::Discard).unwrap();
        assert!(is_fifo(&paths.stderr));
        assert_eq!(handle.task_count(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_conduit_starts_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = StdioPaths::in_dir(tmp.path());
        std::fs::create_dir(&paths.stderr).unwrap();

        let err = setup(&paths, false, HostStdio::Discard).unwrap_err();
        assert!(matches!(err, ShimError::Io(_)));
        assert!(err.to_string().contains("stderr"));
    }

    #[tokio::test]
    async fn test_shutdown_ends_all_tasks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = StdioPaths::in_dir(tmp.path());
        let handle = setup(&paths, false, HostStdio::Discard).unwrap();
        handle.shutdown().await;
        assert!(StdioHandle::default().is_finished());
    }
}
