//! Binds one client connection to a freshly spawned language server
//! connection, a workspace cache directory, and the state spec §4.5
//! describes: `NEW -> PROVISIONING -> READY -> CLOSED`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::connection::{Connection, Inbound};
use crate::provisioner::{HookRunner, WorkspaceProvisioner};
use crate::roundtrip::{forward_notification, forward_request, round_trip};
use crate::uri::{client_to_server, rewrite_uris, server_to_client};

const METHOD_INITIALIZE: &str = "initialize";
const METHOD_DID_CHANGE_WORKSPACE_FOLDERS: &str = "workspace/didChangeWorkspaceFolders";
const METHOD_DID_OPEN: &str = "textDocument/didOpen";

/// One bound client↔server pair, per spec §3.
pub struct Session {
    pub id: String,
    pub cache_dir: PathBuf,
    cache_dir_str: String,
    client_conn: Arc<Connection>,
    server_conn: Arc<Connection>,
    config: SessionConfig,
    provisioner: Arc<dyn WorkspaceProvisioner>,
    hook_runner: Arc<dyn HookRunner>,
    next_id: AtomicI64,
    did_open_sent: Mutex<HashSet<PathBuf>>,
    client_root: Mutex<Option<String>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    ready_signaled: std::sync::atomic::AtomicBool,
}

impl Session {
    pub fn new(
        cache_dir: PathBuf,
        client_conn: Arc<Connection>,
        server_conn: Arc<Connection>,
        config: SessionConfig,
        provisioner: Arc<dyn WorkspaceProvisioner>,
        hook_runner: Arc<dyn HookRunner>,
    ) -> Arc<Session> {
        let (ready_tx, ready_rx) = watch::channel(false);
        let cache_dir_str = cache_dir.to_string_lossy().into_owned();
        Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            cache_dir,
            cache_dir_str,
            client_conn,
            server_conn,
            config,
            provisioner,
            hook_runner,
            next_id: AtomicI64::new(0),
            did_open_sent: Mutex::new(HashSet::new()),
            client_root: Mutex::new(None),
            ready_tx,
            ready_rx,
            ready_signaled: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Drives the session until either connection disconnects, then tears
    /// it down. Spawns one task per inbound message on each side, per
    /// spec §5's "no ordering guarantee between concurrent handlers."
    pub async fn run(self: Arc<Self>) {
        let mut client_inbound = self.client_conn.take_inbound().await;
        let mut server_inbound = self.server_conn.take_inbound().await;

        let client_loop = {
            let session = self.clone();
            tokio::spawn(async move {
                while let Some(msg) = client_inbound.recv().await {
                    let session = session.clone();
                    tokio::spawn(async move { session.handle_client_message(msg).await });
                }
            })
        };

        let server_loop = {
            let session = self.clone();
            tokio::spawn(async move {
                while let Some(msg) = server_inbound.recv().await {
                    let session = session.clone();
                    tokio::spawn(async move { session.handle_server_message(msg).await });
                }
            })
        };

        tokio::select! {
            _ = self.client_conn.closed() => {}
            _ = self.server_conn.closed() => {}
        }

        client_loop.abort();
        server_loop.abort();
        self.teardown().await;
    }

    async fn teardown(&self) {
        self.client_conn.close().await;
        self.server_conn.close().await;
        if let Err(err) = tokio::fs::remove_dir_all(&self.cache_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(session = %self.id, error = %err, "failed to remove cache directory");
            }
        }
        info!(session = %self.id, "session closed");
    }

    /// The readiness barrier (spec §4.5): every handler except the
    /// `initialize` handler itself blocks here before forwarding.
    async fn wait_ready(&self) {
        let mut rx = self.ready_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Signals the barrier at most once (spec §8 invariant).
    fn signal_ready(&self) {
        if !self.ready_signaled.swap(true, std::sync::atomic::Ordering::SeqCst) {
            let _ = self.ready_tx.send(true);
        }
    }

    async fn current_client_root(&self) -> String {
        self.client_root.lock().await.clone().unwrap_or_default()
    }

    fn translate_to_server(&self, root: &str, uri: &str) -> String {
        client_to_server(uri, root, &self.cache_dir_str)
    }

    fn translate_to_client(&self, root: &str, uri: &str) -> String {
        server_to_client(uri, root, &self.cache_dir_str)
    }

    async fn handle_client_message(self: Arc<Self>, msg: Inbound) {
        if msg.method() == METHOD_INITIALIZE {
            self.handle_initialize(msg).await;
            return;
        }

        self.wait_ready().await;

        if msg.method() == METHOD_DID_CHANGE_WORKSPACE_FOLDERS {
            self.handle_workspace_folders_change(msg).await;
            return;
        }

        self.forward_client_to_server(msg).await;
    }

    async fn handle_server_message(self: Arc<Self>, msg: Inbound) {
        self.wait_ready().await;
        let root = self.current_client_root().await;
        let out = |uri: &str| self.translate_to_client(&root, uri);
        let inn = |uri: &str| self.translate_to_server(&root, uri);
        if let Err(err) = round_trip(
            msg,
            &self.server_conn,
            &self.client_conn,
            &out,
            &inn,
            self.config.id_rewrite,
            &self.next_id,
        )
        .await
        {
            warn!(session = %self.id, error = %err, "server->client round trip failed");
        }
    }

    /// Translates the outbound URIs, fires any synthetic `didOpen`
    /// notifications the translation surfaces, then forwards (spec §4.4
    /// step 1 plus §4.5).
    async fn forward_client_to_server(self: &Arc<Self>, msg: Inbound) {
        let root = self.current_client_root().await;
        let collected = RefCell::new(Vec::new());
        let out_translate = |uri: &str| {
            let server_uri = self.translate_to_server(&root, uri);
            if server_uri != uri {
                collected.borrow_mut().push(server_uri.clone());
            }
            server_uri
        };
        let in_translate = |uri: &str| self.translate_to_client(&root, uri);

        match msg {
            Inbound::Notification { method, mut params } => {
                rewrite_uris(&mut params, &out_translate);
                drop(out_translate);
                self.emit_synthetic_did_opens(collected.into_inner()).await;
                if let Err(err) = forward_notification(&self.server_conn, &method, params) {
                    warn!(session = %self.id, error = %err, "failed to forward notification");
                }
            }
            Inbound::Request { id, method, mut params } => {
                rewrite_uris(&mut params, &out_translate);
                drop(out_translate);
                self.emit_synthetic_did_opens(collected.into_inner()).await;
                if let Err(err) = forward_request(
                    &self.client_conn,
                    &self.server_conn,
                    id,
                    &method,
                    params,
                    &in_translate,
                    self.config.id_rewrite,
                    &self.next_id,
                )
                .await
                {
                    warn!(session = %self.id, error = %err, "client->server round trip failed");
                }
            }
        }
    }

    async fn handle_initialize(self: &Arc<Self>, msg: Inbound) {
        let Inbound::Request { id, method, params } = msg else {
            warn!(session = %self.id, "initialize arrived as a notification; ignoring");
            return;
        };

        if let Some(root) = extract_workspace_root(&params) {
            *self.client_root.lock().await = Some(root);
        }

        if let Err(err) = self
            .provisioner
            .clone(&self.cache_dir, self.config.glob_filters())
            .await
        {
            error!(
                session = %self.id,
                error = %err,
                "workspace provisioning failed for initialize; session will not become ready"
            );
            return;
        }

        if let Some(hook) = &self.config.before_initialize_hook {
            if let Err(err) = self.hook_runner.run(hook, &self.cache_dir).await {
                warn!(session = %self.id, error = %err, "beforeInitializeHook failed; continuing");
            }
        }

        self.signal_ready();
        self.forward_client_to_server(Inbound::Request { id, method, params })
            .await;
    }

    async fn handle_workspace_folders_change(self: &Arc<Self>, msg: Inbound) {
        let params = match &msg {
            Inbound::Request { params, .. } => params,
            Inbound::Notification { params, .. } => params,
        };

        match parse_workspace_folders_event(params) {
            Some(event) => {
                for name in &event.removed {
                    if let Err(err) = self.provisioner.remove(&self.cache_dir, name).await {
                        warn!(
                            session = %self.id,
                            folder = %name,
                            error = %err,
                            "failed to remove workspace folder; forwarding proceeds"
                        );
                    }
                }
                if !event.added.is_empty() {
                    if let Err(err) = self
                        .provisioner
                        .clone(&self.cache_dir, self.config.glob_filters())
                        .await
                    {
                        warn!(
                            session = %self.id,
                            error = %err,
                            "failed to re-provision workspace after folder addition; forwarding proceeds"
                        );
                    }
                }
            }
            None => {
                warn!(
                    session = %self.id,
                    "malformed workspace/didChangeWorkspaceFolders event; forwarding without folder mutation"
                );
            }
        }

        self.forward_client_to_server(msg).await;
    }

    /// Spec §4.5: for each client→server URI translated during this
    /// forwarded message, if it's a local file not yet recorded, mark it
    /// sent and dispatch a synthetic `didOpen` ahead of the triggering
    /// request. No-op unless `didOpenLanguage` is configured.
    async fn emit_synthetic_did_opens(&self, server_uris: Vec<String>) {
        let Some(language) = self.config.did_open_language.as_deref() else {
            return;
        };

        for server_uri in server_uris {
            let Some(path) = file_uri_to_path(&server_uri) else {
                continue;
            };

            // `rootUri`/`workspaceFolders` translate through the same
            // table as document URIs but name a directory, not a file
            // `didOpen` could ever apply to; skip those before the read.
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                _ => continue,
            }

            {
                let mut sent = self.did_open_sent.lock().await;
                if sent.contains(&path) {
                    continue;
                }
                sent.insert(path.clone());
            }

            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    let params = serde_json::json!({
                        "textDocument": {
                            "uri": server_uri,
                            "languageId": language,
                            "version": 1,
                            "text": text,
                        }
                    });
                    if let Err(err) = self.server_conn.notify(METHOD_DID_OPEN, params) {
                        warn!(session = %self.id, path = %path.display(), error = %err, "failed to send synthetic didOpen");
                    }
                }
                Err(err) => {
                    warn!(session = %self.id, path = %path.display(), error = %err, "failed to read file for synthetic didOpen");
                }
            }
        }
    }
}

struct WorkspaceFoldersEvent {
    added: Vec<String>,
    removed: Vec<String>,
}

fn parse_workspace_folders_event(params: &Value) -> Option<WorkspaceFoldersEvent> {
    let event = params.get("event")?;
    let names = |key: &str| -> Vec<String> {
        event
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|f| f.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    Some(WorkspaceFoldersEvent {
        added: names("added"),
        removed: names("removed"),
    })
}

fn extract_workspace_root(params: &Value) -> Option<String> {
    params
        .get("rootUri")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            params
                .get("workspaceFolders")
                .and_then(Value::as_array)
                .and_then(|folders| folders.first())
                .and_then(|f| f.get("uri"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}

fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    uri.strip_prefix("file://").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_root_uri() {
        let params = serde_json::json!({"rootUri": "file:///ws"});
        assert_eq!(extract_workspace_root(&params).unwrap(), "file:///ws");
    }

    #[test]
    fn falls_back_to_first_workspace_folder() {
        let params = serde_json::json!({"workspaceFolders": [{"uri": "file:///ws", "name": "ws"}]});
        assert_eq!(extract_workspace_root(&params).unwrap(), "file:///ws");
    }

    #[test]
    fn parses_workspace_folders_event() {
        let params = serde_json::json!({
            "event": {
                "added": [{"uri": "file:///ws/b", "name": "b"}],
                "removed": [{"uri": "file:///ws/a", "name": "a"}],
            }
        });
        let event = parse_workspace_folders_event(&params).unwrap();
        assert_eq!(event.added, vec!["b".to_string()]);
        assert_eq!(event.removed, vec!["a".to_string()]);
    }

    #[test]
    fn malformed_event_yields_none() {
        let params = serde_json::json!({});
        assert!(parse_workspace_folders_event(&params).is_none());
    }

    #[test]
    fn file_uri_strips_scheme() {
        assert_eq!(
            file_uri_to_path("file:///tmp/c/SID/a.py"),
            Some(PathBuf::from("/tmp/c/SID/a.py"))
        );
    }
}
