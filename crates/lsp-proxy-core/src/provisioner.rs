//! External collaborator interfaces (spec §1, §6, §9). The core depends
//! only on these traits; the concrete mechanism — how a workspace is
//! actually populated, how a hook is actually run — lives outside the
//! core, in the `lsp-proxy` binary crate.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{HookError, ProvisionError};

/// Populates and prunes a session's on-disk workspace cache directory.
/// The core treats this as an opaque capability; it never inspects how
/// `clone`/`remove` are implemented (spec §9: "Workspace provisioning as
/// an interface").
#[async_trait]
pub trait WorkspaceProvisioner: Send + Sync {
    /// Materializes files into `cache_dir`, optionally filtered by
    /// basename glob. An empty `globs` means no filter (spec §9 open
    /// question (b)).
    async fn clone(&self, cache_dir: &Path, globs: &[String]) -> Result<(), ProvisionError>;

    /// Removes a previously-added workspace folder by name from
    /// `cache_dir`.
    async fn remove(&self, cache_dir: &Path, workspace_name: &str) -> Result<(), ProvisionError>;
}

/// Runs `beforeInitializeHook` after provisioning completes, before the
/// client's `initialize` is forwarded to the language server.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, program: &Path, cache_dir: &Path) -> Result<(), HookError>;
}

/// A `HookRunner` that does nothing, for sessions configured without a
/// `beforeInitializeHook`.
pub struct NoopHookRunner;

#[async_trait]
impl HookRunner for NoopHookRunner {
    async fn run(&self, _program: &Path, _cache_dir: &Path) -> Result<(), HookError> {
        Ok(())
    }
}
