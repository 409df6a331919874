use std::io;

use thiserror::Error;

use crate::message::{MessageId, RpcError};

/// Errors surfaced by the framed transport and message dispatcher.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed frame header: {0}")]
    Header(String),
    #[error("frame body was not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("frame body was not valid JSON-RPC: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("peer closed the connection")]
    Closed,
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by `Connection::call`/`notify`/`reply`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request {0:?} was cancelled")]
    Cancelled(MessageId),
    #[error("duplicate in-flight request id {0:?}")]
    DuplicateId(MessageId),
    #[error("connection closed while awaiting a reply")]
    ChannelClosed,
    #[error("peer returned JSON-RPC error {code}: {message}", code = .0.code, message = .0.message)]
    Rpc(RpcError),
}

/// Errors surfaced during workspace provisioning (`Clone`/`Remove`).
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to provision workspace at {path}: {source}")]
    Clone {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove workspace folder `{name}`: {source}")]
    Remove {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced by the `beforeInitializeHook` runner.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook `{program}` could not be spawned: {source}")]
    Spawn {
        program: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("hook `{program}` exited with {status}")]
    NonZeroExit {
        program: std::path::PathBuf,
        status: std::process::ExitStatus,
    },
}

/// Errors that end a session outright (as opposed to one request within it).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("workspace provisioning failed during `{method}`: {source}")]
    Provisioning {
        method: &'static str,
        #[source]
        source: ProvisionError,
    },
    #[error("session cancelled")]
    Cancelled,
    #[error("failed to start language server: {0}")]
    LanguageServerSpawn(String),
}

/// Fatal errors that abort process startup before any session is accepted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid jsonrpc2IDRewrite value `{0}`, expected one of none/string/number")]
    InvalidIdRewrite(String),
    #[error("cache directory `{path}` could not be created or resolved: {source}")]
    CacheDirectory {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}
