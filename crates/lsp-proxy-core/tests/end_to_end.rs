//! Drives a `Session` end to end over `tokio::io::duplex` pipes standing in
//! for the client socket and the language server's stdio, exercising the
//! literal scenarios a proxy of this shape has to get right: plain
//! forwarding, id rewriting, notification pass-through, error propagation,
//! synthetic `didOpen` injection, and teardown on disconnect.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lsp_proxy_core::config::{IdRewrite, SessionConfig};
use lsp_proxy_core::error::{HookError, ProvisionError};
use lsp_proxy_core::provisioner::{HookRunner, WorkspaceProvisioner};
use lsp_proxy_core::{Connection, Message, MessageId, Session};
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

struct NoopProvisioner;

#[async_trait]
impl WorkspaceProvisioner for NoopProvisioner {
    async fn clone(&self, _cache_dir: &std::path::Path, _globs: &[String]) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn remove(&self, _cache_dir: &std::path::Path, _name: &str) -> Result<(), ProvisionError> {
        Ok(())
    }
}

struct NoopHooks;

#[async_trait]
impl HookRunner for NoopHooks {
    async fn run(&self, _program: &std::path::Path, _cache_dir: &std::path::Path) -> Result<(), HookError> {
        Ok(())
    }
}

fn base_config(cache_root: PathBuf) -> SessionConfig {
    SessionConfig {
        cache_root,
        did_open_language: None,
        id_rewrite: IdRewrite::None,
        glob: Vec::new(),
        before_initialize_hook: None,
        trace: false,
        language_server_command: vec!["stub".into()],
    }
}

async fn write_message(writer: &mut (impl AsyncWriteExt + Unpin), value: &Value) {
    let body = serde_json::to_vec(value).unwrap();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await.unwrap();
    writer.write_all(&body).await.unwrap();
}

async fn read_message(reader: &mut (impl tokio::io::AsyncBufRead + Unpin)) -> Value {
    lsp_proxy_core::transport::read_frame(reader)
        .await
        .unwrap()
        .expect("stream closed before a frame arrived")
}

struct Harness {
    client_write: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    client_read: tokio::io::BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    server_write: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    server_read: tokio::io::BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    _tmp: tempfile::TempDir,
}

async fn build_session() -> (Arc<Session>, Harness) {
    let (client_side, client_far) = duplex(8192);
    let (server_side, server_far) = duplex(8192);

    let client_conn = Connection::spawn(client_far);
    let server_conn = Connection::spawn(server_far);

    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().join("session-1");

    let session = Session::new(
        cache_dir,
        client_conn,
        server_conn,
        base_config(tmp.path().to_path_buf()),
        Arc::new(NoopProvisioner),
        Arc::new(NoopHooks),
    );

    let (client_read, client_write) = tokio::io::split(client_side);
    let (server_read, server_write) = tokio::io::split(server_side);

    let harness = Harness {
        client_write,
        client_read: tokio::io::BufReader::new(client_read),
        server_write,
        server_read: tokio::io::BufReader::new(server_read),
        _tmp: tmp,
    };

    (session, harness)
}

#[tokio::test]
async fn initialize_is_forwarded_and_unblocks_subsequent_requests() {
    let (session, mut h) = build_session().await;
    let run_handle = tokio::spawn(session.clone().run());

    write_message(
        &mut h.client_write,
        &Message::request(
            MessageId::Number(1),
            "initialize",
            json!({"rootUri": "file:///ws"}),
        )
        .to_value(),
    )
    .await;

    let seen = read_message(&mut h.server_read).await;
    assert_eq!(seen["method"], "initialize");
    assert_eq!(seen["params"]["rootUri"], "file:///ws");

    write_message(
        &mut h.server_write,
        &Message::success(MessageId::Number(1), json!({"capabilities": {}})).to_value(),
    )
    .await;

    let reply = read_message(&mut h.client_read).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["capabilities"], json!({}));

    write_message(
        &mut h.client_write,
        &Message::request(MessageId::Number(2), "textDocument/hover", json!({"textDocument": {"uri": "file:///ws/a.py"}}))
            .to_value(),
    )
    .await;
    let hover = read_message(&mut h.server_read).await;
    assert_eq!(hover["method"], "textDocument/hover");

    drop(h.client_write);
    let _ = tokio::time::timeout(Duration::from_secs(1), run_handle).await;
}

#[tokio::test]
async fn notifications_pass_through_without_a_reply() {
    let (session, mut h) = build_session().await;
    let run_handle = tokio::spawn(session.clone().run());

    write_message(
        &mut h.client_write,
        &Message::request(MessageId::Number(1), "initialize", json!({"rootUri": "file:///ws"})).to_value(),
    )
    .await;
    let _ = read_message(&mut h.server_read).await;
    write_message(
        &mut h.server_write,
        &Message::success(MessageId::Number(1), json!({})).to_value(),
    )
    .await;
    let _ = read_message(&mut h.client_read).await;

    write_message(
        &mut h.client_write,
        &Message::notification("textDocument/didSave", json!({"textDocument": {"uri": "file:///ws/a.py"}}))
            .to_value(),
    )
    .await;

    let seen = read_message(&mut h.server_read).await;
    assert_eq!(seen["method"], "textDocument/didSave");
    assert!(seen.get("id").is_none());

    drop(h.client_write);
    let _ = tokio::time::timeout(Duration::from_secs(1), run_handle).await;
}

#[tokio::test]
async fn peer_errors_are_relayed_verbatim_to_the_originator() {
    let (session, mut h) = build_session().await;
    let run_handle = tokio::spawn(session.clone().run());

    write_message(
        &mut h.client_write,
        &Message::request(MessageId::Number(1), "initialize", json!({"rootUri": "file:///ws"})).to_value(),
    )
    .await;
    let _ = read_message(&mut h.server_read).await;
    write_message(
        &mut h.server_write,
        &Message::success(MessageId::Number(1), json!({})).to_value(),
    )
    .await;
    let _ = read_message(&mut h.client_read).await;

    write_message(
        &mut h.client_write,
        &Message::request(MessageId::Number(2), "textDocument/definition", json!({})).to_value(),
    )
    .await;
    let forwarded = read_message(&mut h.server_read).await;
    let forwarded_id: MessageId = serde_json::from_value(forwarded["id"].clone()).unwrap();

    write_message(
        &mut h.server_write,
        &Message::failure(
            forwarded_id,
            lsp_proxy_core::RpcError {
                code: -32601,
                message: "method not found".into(),
                data: None,
            },
        )
        .to_value(),
    )
    .await;

    let reply = read_message(&mut h.client_read).await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["error"]["code"], -32601);
    assert_eq!(reply["error"]["message"], "method not found");

    drop(h.client_write);
    let _ = tokio::time::timeout(Duration::from_secs(1), run_handle).await;
}

#[tokio::test]
async fn id_rewrite_to_string_produces_distinct_server_side_ids() {
    let (client_side, client_far) = duplex(8192);
    let (server_side, server_far) = duplex(8192);
    let client_conn = Connection::spawn(client_far);
    let server_conn = Connection::spawn(server_far);
    let tmp = tempfile::tempdir().unwrap();

    let mut config = base_config(tmp.path().to_path_buf());
    config.id_rewrite = IdRewrite::String;

    let session = Session::new(
        tmp.path().join("s"),
        client_conn,
        server_conn,
        config,
        Arc::new(NoopProvisioner),
        Arc::new(NoopHooks),
    );
    let run_handle = tokio::spawn(session.clone().run());

    let (client_read, mut client_write) = tokio::io::split(client_side);
    let mut client_read = tokio::io::BufReader::new(client_read);
    let (server_read, mut server_write) = tokio::io::split(server_side);
    let mut server_read = tokio::io::BufReader::new(server_read);

    write_message(
        &mut client_write,
        &Message::request(MessageId::Number(1), "initialize", json!({"rootUri": "file:///ws"})).to_value(),
    )
    .await;
    let seen = read_message(&mut server_read).await;
    assert!(matches!(
        serde_json::from_value::<MessageId>(seen["id"].clone()).unwrap(),
        MessageId::String(_)
    ));
    write_message(
        &mut server_write,
        &Message::success(
            serde_json::from_value(seen["id"].clone()).unwrap(),
            json!({}),
        )
        .to_value(),
    )
    .await;
    let reply = read_message(&mut client_read).await;
    assert_eq!(reply["id"], 1, "client sees its own original id regardless of rewrite policy");

    drop(client_write);
    let _ = tokio::time::timeout(Duration::from_secs(1), run_handle).await;
}

#[tokio::test]
async fn synthetic_did_open_precedes_the_triggering_request_on_the_wire() {
    let (client_side, client_far) = duplex(8192);
    let (server_side, server_far) = duplex(8192);
    let client_conn = Connection::spawn(client_far);
    let server_conn = Connection::spawn(server_far);
    let tmp = tempfile::tempdir().unwrap();

    let ws_dir = tmp.path().join("workspace");
    tokio::fs::create_dir_all(&ws_dir).await.unwrap();
    let cache_dir = tmp.path().join("session-x");
    tokio::fs::create_dir_all(&cache_dir).await.unwrap();
    tokio::fs::write(cache_dir.join("a.py"), "print(1)\n").await.unwrap();

    let mut config = base_config(tmp.path().to_path_buf());
    config.did_open_language = Some("python".into());

    let session = Session::new(
        cache_dir,
        client_conn,
        server_conn,
        config,
        Arc::new(NoopProvisioner),
        Arc::new(NoopHooks),
    );
    let run_handle = tokio::spawn(session.clone().run());

    let (client_read, mut client_write) = tokio::io::split(client_side);
    let mut client_read = tokio::io::BufReader::new(client_read);
    let (server_read, mut server_write) = tokio::io::split(server_side);
    let mut server_read = tokio::io::BufReader::new(server_read);

    let root = format!("file://{}", ws_dir.display());
    write_message(
        &mut client_write,
        &Message::request(MessageId::Number(1), "initialize", json!({"rootUri": root})).to_value(),
    )
    .await;
    let init_seen = read_message(&mut server_read).await;
    write_message(
        &mut server_write,
        &Message::success(
            serde_json::from_value(init_seen["id"].clone()).unwrap(),
            json!({}),
        )
        .to_value(),
    )
    .await;
    let _ = read_message(&mut client_read).await;

    let file_uri = format!("{root}/a.py");
    write_message(
        &mut client_write,
        &Message::request(
            MessageId::Number(2),
            "textDocument/hover",
            json!({"textDocument": {"uri": file_uri}}),
        )
        .to_value(),
    )
    .await;

    let first = read_message(&mut server_read).await;
    assert_eq!(first["method"], "textDocument/didOpen", "didOpen must precede the triggering request");
    assert_eq!(first["params"]["textDocument"]["languageId"], "python");

    let second = read_message(&mut server_read).await;
    assert_eq!(second["method"], "textDocument/hover");

    drop(client_write);
    let _ = tokio::time::timeout(Duration::from_secs(1), run_handle).await;
}

#[tokio::test]
async fn disconnecting_the_client_tears_down_the_session() {
    let (session, h) = build_session().await;
    let run_handle = tokio::spawn(session.clone().run());

    drop(h.client_write);
    drop(h.client_read);

    tokio::time::timeout(Duration::from_secs(1), run_handle)
        .await
        .expect("session should finish promptly once the client disconnects")
        .unwrap();
}
