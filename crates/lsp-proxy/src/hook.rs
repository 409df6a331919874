//! Default `HookRunner`: spawns `beforeInitializeHook` as a child process
//! with the session's cache directory as its working directory and sole
//! argument, in the teacher's `tokio::process::Command` + `kill_on_drop`
//! style (`claude_code/src/process.rs`, `codex/src/process.rs`).

use std::path::Path;

use async_trait::async_trait;
use lsp_proxy_core::error::HookError;
use lsp_proxy_core::provisioner::HookRunner;
use tokio::process::Command;

pub struct ProcessHookRunner;

#[async_trait]
impl HookRunner for ProcessHookRunner {
    async fn run(&self, program: &Path, cache_dir: &Path) -> Result<(), HookError> {
        let mut command = Command::new(program);
        command
            .arg(cache_dir)
            .current_dir(cache_dir)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn().map_err(|source| HookError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

        let status = child.wait().await.map_err(|source| HookError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

        if !status.success() {
            return Err(HookError::NonZeroExit {
                program: program.to_path_buf(),
                status,
            });
        }

        Ok(())
    }
}
