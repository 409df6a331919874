//! Accepts client connections, spawns a session for each, and tracks them
//! so shutdown can wait for in-flight sessions to tear down cleanly (spec
//! §4.6).
//!
//! Grounded in the teacher's `spawn_with_retry` backoff loop
//! (`codex/src/process.rs`), generalized from process-spawn retries to
//! `TcpListener::accept` retries: a transient accept error (the process
//! hit its file-descriptor limit, an interrupted syscall) backs off and
//! retries, while a fatal one ends the accept loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::connection::Connection;
use crate::error::SessionError;
use crate::provisioner::{HookRunner, WorkspaceProvisioner};
use crate::session::Session;

/// Produces the server-facing `Connection` for a newly accepted client,
/// rooted at the session's cache directory. The concrete implementation
/// (spawning a language server child process over stdio) lives outside
/// the core, alongside the other external collaborators (spec §9).
#[async_trait]
pub trait LanguageServerSpawner: Send + Sync {
    async fn spawn(&self, cache_dir: &std::path::Path) -> Result<Arc<Connection>, SessionError>;
}

const MAX_ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

/// Owns the listening socket and the set of sessions it has spawned.
pub struct Supervisor {
    config: ProxyConfig,
    provisioner: Arc<dyn WorkspaceProvisioner>,
    hook_runner: Arc<dyn HookRunner>,
    server_spawner: Arc<dyn LanguageServerSpawner>,
    sessions: Mutex<Vec<JoinHandle<()>>>,
    live_sessions: Arc<AtomicUsize>,
}

impl Supervisor {
    pub fn new(
        config: ProxyConfig,
        provisioner: Arc<dyn WorkspaceProvisioner>,
        hook_runner: Arc<dyn HookRunner>,
        server_spawner: Arc<dyn LanguageServerSpawner>,
    ) -> Arc<Supervisor> {
        Arc::new(Supervisor {
            config,
            provisioner,
            hook_runner,
            server_spawner,
            sessions: Mutex::new(Vec::new()),
            live_sessions: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of sessions currently accepted and not yet torn down. Read
    /// by the diagnostic server stub (spec §2 item 10).
    pub fn live_session_count(&self) -> usize {
        self.live_sessions.load(Ordering::Relaxed)
    }

    /// Binds `proxy_address` and accepts connections until `shutdown`
    /// resolves, then waits up to `shutdown_grace` for in-flight sessions
    /// to tear down before returning.
    pub async fn run(self: Arc<Self>, shutdown: impl std::future::Future<Output = ()>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.proxy_address).await?;
        info!(address = %self.config.proxy_address, "proxy listening");

        tokio::pin!(shutdown);
        let mut backoff = Duration::from_millis(10);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            backoff = Duration::from_millis(10);
                            let supervisor = self.clone();
                            tokio::spawn(async move { supervisor.accept_one(stream, peer).await; });
                        }
                        Err(err) if is_transient(&err) => {
                            warn!(error = %err, backoff_ms = backoff.as_millis(), "transient accept error; retrying");
                            tokio::time::sleep(backoff).await;
                            backoff = std::cmp::min(backoff * 2, MAX_ACCEPT_BACKOFF);
                        }
                        Err(err) => {
                            error!(error = %err, "fatal accept error; stopping supervisor");
                            return Err(err);
                        }
                    }
                }
            }
        }

        self.join_all().await;
        Ok(())
    }

    async fn accept_one(self: Arc<Self>, stream: TcpStream, peer: std::net::SocketAddr) {
        let session_id = Uuid::new_v4().to_string();
        let cache_dir: PathBuf = self.config.session.cache_root.join(&session_id);

        if let Err(err) = tokio::fs::create_dir_all(&cache_dir).await {
            error!(session = %session_id, %peer, error = %err, "failed to create cache directory; rejecting connection");
            return;
        }

        let server_conn = match self.server_spawner.spawn(&cache_dir).await {
            Ok(conn) => conn,
            Err(err) => {
                error!(session = %session_id, %peer, error = %err, "failed to start language server; rejecting connection");
                let _ = tokio::fs::remove_dir_all(&cache_dir).await;
                return;
            }
        };

        let client_conn = Connection::spawn_traced(stream, self.config.session.trace, "client");
        let session = Session::new(
            cache_dir,
            client_conn,
            server_conn,
            self.config.session.clone(),
            self.provisioner.clone(),
            self.hook_runner.clone(),
        );

        info!(session = %session.id, %peer, "session started");
        self.live_sessions.fetch_add(1, Ordering::Relaxed);
        let live_sessions = self.live_sessions.clone();
        let handle = tokio::spawn(async move {
            session.run().await;
            live_sessions.fetch_sub(1, Ordering::Relaxed);
        });
        self.sessions.lock().await.push(handle);
        self.reap_finished().await;
    }

    /// Drops join handles for sessions that have already finished, so the
    /// tracking vec doesn't grow unbounded over a long-lived process.
    async fn reap_finished(&self) {
        let mut guard = self.sessions.lock().await;
        guard.retain(|h| !h.is_finished());
    }

    async fn join_all(&self) {
        let handles: Vec<_> = self.sessions.lock().await.drain(..).collect();
        let grace = self.config.shutdown_grace;
        let joined = tokio::time::timeout(grace, futures_join_all(handles)).await;
        if joined.is_err() {
            warn!(grace_ms = %grace.as_millis(), "not all sessions finished tearing down within the shutdown grace period");
        }
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionAborted
    )
}
