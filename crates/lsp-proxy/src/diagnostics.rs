//! Stub diagnostic server (spec §2 item 10): a minimal HTTP endpoint that
//! reports how many sessions are currently live. Out of scope per spec §1
//! beyond this placeholder — no metrics schema, no historical data.

use std::sync::Arc;

use lsp_proxy_core::supervisor::Supervisor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub async fn run(address: String, supervisor: Arc<Supervisor>, shutdown: impl std::future::Future<Output = ()>) {
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(%address, error = %err, "diagnostic server failed to bind; continuing without it");
            return;
        }
    };
    info!(%address, "diagnostic server listening");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                let supervisor = supervisor.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, &supervisor).await {
                        warn!(error = %err, "diagnostic server connection failed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(mut stream: tokio::net::TcpStream, supervisor: &Supervisor) -> std::io::Result<()> {
    // Drain the request without parsing it; this endpoint takes no input.
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf).await?;

    let body = format!("{{\"live_sessions\":{}}}\n", supervisor.live_session_count());
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
