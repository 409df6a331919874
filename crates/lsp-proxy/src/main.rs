//! Process bootstrap: parses configuration, wires the concrete external
//! collaborators into the core's `Supervisor`, and runs until a shutdown
//! signal arrives (spec §9's CLI/process-bootstrap ambient stack).

mod cli;
mod diagnostics;
mod hook;
mod logging;
mod provisioner;
mod transport;

use std::sync::Arc;

use clap::Parser;
use lsp_proxy_core::provisioner::NoopHookRunner;
use lsp_proxy_core::Supervisor;
use tracing::info;

use cli::Cli;
use hook::ProcessHookRunner;
use provisioner::GlobWorkspaceProvisioner;
use transport::ChildProcessSpawner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format);

    let mut config = cli.to_proxy_config()?;
    tokio::fs::create_dir_all(&config.session.cache_root).await?;
    config.session.cache_root = tokio::fs::canonicalize(&config.session.cache_root).await?;

    let workspace_provisioner = Arc::new(GlobWorkspaceProvisioner::new(cli.workspace_source.clone()));
    let hook_runner: Arc<dyn lsp_proxy_core::HookRunner> = if config.session.before_initialize_hook.is_some() {
        Arc::new(ProcessHookRunner)
    } else {
        Arc::new(NoopHookRunner)
    };
    let server_spawner = Arc::new(ChildProcessSpawner::new(
        config.session.language_server_command.clone(),
        config.session.trace,
    ));

    let cache_root = config.session.cache_root.clone();
    let supervisor = Supervisor::new(config, workspace_provisioner, hook_runner, server_spawner);

    let diagnostics_handle = cli.diagnostics_address.clone().map(|address| {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            diagnostics::run(address, supervisor, shutdown_signal()).await;
        })
    });

    supervisor.run(shutdown_signal()).await?;

    if let Some(handle) = diagnostics_handle {
        let _ = handle.await;
    }

    if let Err(err) = tokio::fs::remove_dir_all(&cache_root).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %cache_root.display(), error = %err, "failed to remove cache root on shutdown");
        }
    }
    info!("proxy shut down cleanly");

    Ok(())
}

/// Resolves on `SIGINT` or, on unix, `SIGHUP`, whichever arrives first.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sighup.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
