//! Concrete `Transport` for a spawned language server: its stdin/stdout
//! pipes joined into one `AsyncRead + AsyncWrite` duplex, and the
//! `LanguageServerSpawner` that builds a `Connection` on top of it for
//! each new session (spec §9's "external collaborator" for process
//! transport).
//!
//! The child is spawned with `kill_on_drop` so a dropped session's
//! language server doesn't outlive it, in the teacher's process-spawning
//! style (`codex/src/process.rs::spawn_with_retry`). The stdin/stdout
//! join itself is grounded in the pack's `pin-project-lite` usage for
//! this exact shape of wrapper (Alb-O-xeno's `rpc`/`lsp` crates).

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use lsp_proxy_core::error::SessionError;
use lsp_proxy_core::supervisor::LanguageServerSpawner;
use lsp_proxy_core::Connection;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::warn;

pin_project! {
    /// Joins a child process's stdout (read half) and stdin (write half)
    /// into a single duplex stream so it can be handed to
    /// `Connection::spawn` like any other `Transport`.
    pub struct ChildProcessTransport {
        #[pin]
        stdout: ChildStdout,
        #[pin]
        stdin: ChildStdin,
    }
}

impl AsyncRead for ChildProcessTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.project().stdout.poll_read(cx, buf)
    }
}

impl AsyncWrite for ChildProcessTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().stdin.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().stdin.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().stdin.poll_shutdown(cx)
    }
}

/// Spawns `command` (argv\[0\] the executable, the rest its arguments)
/// rooted at `cache_dir` for each session, joins its stdio, and wraps it
/// in a `Connection`.
pub struct ChildProcessSpawner {
    command: Vec<String>,
    trace: bool,
}

impl ChildProcessSpawner {
    pub fn new(command: Vec<String>, trace: bool) -> Self {
        ChildProcessSpawner { command, trace }
    }
}

#[async_trait]
impl LanguageServerSpawner for ChildProcessSpawner {
    async fn spawn(&self, cache_dir: &Path) -> Result<Arc<Connection>, SessionError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| session_spawn_error("language server command is empty"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cache_dir)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = spawn_with_retry(command, program).await?;

        let stdin = child.stdin.take().ok_or_else(|| session_spawn_error("missing child stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| session_spawn_error("missing child stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr, program.clone()));
        }

        // The child is kept alive only by the reader/writer tasks holding
        // its stdio; once those exit (the session tearing down), drop it.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(Connection::spawn_traced(
            ChildProcessTransport { stdout, stdin },
            self.trace,
            "server",
        ))
    }
}

async fn drain_stderr(mut stderr: tokio::process::ChildStderr, program: String) {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    if stderr.read_to_end(&mut buf).await.is_ok() && !buf.is_empty() {
        warn!(program = %program, stderr = %String::from_utf8_lossy(&buf), "language server wrote to stderr");
    }
}

async fn spawn_with_retry(mut command: Command, binary: &str) -> Result<tokio::process::Child, SessionError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(session_spawn_error(&format!(
                    "failed to spawn `{binary}`: {source}"
                )));
            }
        }
    }
    unreachable!("spawn_with_retry should return before exhausting retries")
}

fn session_spawn_error(message: &str) -> SessionError {
    SessionError::LanguageServerSpawn(message.to_string())
}
