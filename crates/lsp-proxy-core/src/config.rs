//! Configuration consumed by the core (spec §6), deliberately free of any
//! CLI-parsing concerns — those live in the `lsp-proxy` binary crate, in
//! the teacher's style of keeping wrapper config structs (`StdioServerConfig`)
//! separate from whatever builds them.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// `jsonrpc2IDRewrite` policy (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IdRewrite {
    #[default]
    None,
    String,
    Number,
}

impl IdRewrite {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "none" => Ok(IdRewrite::None),
            "string" => Ok(IdRewrite::String),
            "number" => Ok(IdRewrite::Number),
            other => Err(ConfigError::InvalidIdRewrite(other.to_string())),
        }
    }
}

/// Options that shape every session's behavior, constructed once at
/// process start and shared (read-only) across sessions.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Root directory under which per-session cache directories are
    /// created; symlinks resolved at process start.
    pub cache_root: PathBuf,
    /// Empty disables synthetic `didOpen`; non-empty is the language id to
    /// stamp on the manufactured notification.
    pub did_open_language: Option<String>,
    pub id_rewrite: IdRewrite,
    /// Colon-separated basename globs used by the workspace provisioner.
    /// Empty means "no filter" (spec §9 open question (b)).
    pub glob: Vec<String>,
    /// Program invoked after provisioning, before forwarding `initialize`.
    pub before_initialize_hook: Option<PathBuf>,
    /// Enables on-wire message logging.
    pub trace: bool,
    /// Command + args used to spawn the language server child for each
    /// session.
    pub language_server_command: Vec<String>,
}

impl SessionConfig {
    pub fn glob_filters(&self) -> &[String] {
        &self.glob
    }
}

/// Process-wide settings consumed by the supervisor (spec §6).
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub proxy_address: String,
    pub session: SessionConfig,
    /// No built-in request timeout exists (spec §5); this only bounds how
    /// long the supervisor waits for graceful session teardown on
    /// shutdown before abandoning the join.
    pub shutdown_grace: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_id_rewrite_values() {
        assert_eq!(IdRewrite::parse("none").unwrap(), IdRewrite::None);
        assert_eq!(IdRewrite::parse("string").unwrap(), IdRewrite::String);
        assert_eq!(IdRewrite::parse("number").unwrap(), IdRewrite::Number);
    }

    #[test]
    fn rejects_unknown_id_rewrite_value() {
        assert!(IdRewrite::parse("bogus").is_err());
    }
}
