//! Command-line configuration, in the corpus's `clap::Parser` derive style
//! (`xtask`'s per-subcommand `Args` structs): one struct, doc comments
//! double as `--help` text, environment-variable fallbacks via `#[arg(env)]`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use lsp_proxy_core::config::{IdRewrite, ProxyConfig, SessionConfig};
use lsp_proxy_core::error::ConfigError;

#[derive(Debug, Parser)]
#[command(name = "lsp-proxy")]
#[command(about = "Transparent proxy between an LSP client and a per-session language server")]
pub struct Cli {
    /// Address the proxy listens on for client connections.
    #[arg(long, env = "LSP_PROXY_ADDRESS", default_value = "127.0.0.1:7658")]
    pub proxy_address: String,

    /// Root directory under which per-session cache directories are created.
    #[arg(long, env = "LSP_PROXY_CACHE_ROOT")]
    pub cache_root: PathBuf,

    /// Directory the default workspace provisioner copies into each
    /// session's cache directory.
    #[arg(long, env = "LSP_PROXY_WORKSPACE_SOURCE")]
    pub workspace_source: PathBuf,

    /// Command used to spawn the language server for each session, e.g.
    /// `pyright-langserver --stdio`.
    #[arg(long, env = "LSP_PROXY_LANGUAGE_SERVER", num_args = 1.., required = true)]
    pub language_server: Vec<String>,

    /// Language id stamped on synthetic `textDocument/didOpen` notifications.
    /// Omit to disable synthetic didOpen injection.
    #[arg(long, env = "LSP_PROXY_DID_OPEN_LANGUAGE")]
    pub did_open_language: Option<String>,

    /// `jsonrpc2IDRewrite` policy applied to client->server request ids.
    #[arg(long, env = "LSP_PROXY_ID_REWRITE", default_value = "none")]
    pub id_rewrite: String,

    /// Basename globs filtering which files the workspace provisioner
    /// copies into a session's cache directory. Repeatable; empty means no
    /// filter.
    #[arg(long = "glob", env = "LSP_PROXY_GLOB", value_delimiter = ':')]
    pub glob: Vec<String>,

    /// Program run after provisioning, before `initialize` is forwarded.
    #[arg(long, env = "LSP_PROXY_BEFORE_INITIALIZE_HOOK")]
    pub before_initialize_hook: Option<PathBuf>,

    /// Logs every JSON-RPC frame crossing either side of the proxy.
    #[arg(long, env = "LSP_PROXY_TRACE")]
    pub trace: bool,

    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or
    /// `lsp_proxy=debug`.
    #[arg(long, env = "LSP_PROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "LSP_PROXY_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Bind address for the stub diagnostic server. Omit to disable it.
    #[arg(long, env = "LSP_PROXY_DIAGNOSTICS_ADDRESS")]
    pub diagnostics_address: Option<String>,

    /// How long to wait for in-flight sessions to finish tearing down on
    /// shutdown before abandoning the join, in milliseconds.
    #[arg(long, env = "LSP_PROXY_SHUTDOWN_GRACE_MS", default_value_t = 5000)]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

impl Cli {
    pub fn to_proxy_config(&self) -> Result<ProxyConfig, ConfigError> {
        let id_rewrite = IdRewrite::parse(&self.id_rewrite)?;
        Ok(ProxyConfig {
            proxy_address: self.proxy_address.clone(),
            session: SessionConfig {
                cache_root: self.cache_root.clone(),
                did_open_language: self.did_open_language.clone(),
                id_rewrite,
                glob: self.glob.clone(),
                before_initialize_hook: self.before_initialize_hook.clone(),
                trace: self.trace,
                language_server_command: self.language_server.clone(),
            },
            shutdown_grace: std::time::Duration::from_millis(self.shutdown_grace_ms),
        })
    }
}
