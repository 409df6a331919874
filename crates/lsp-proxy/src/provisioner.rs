//! Default `WorkspaceProvisioner`: copies files from a fixed source
//! directory into each session's cache directory, filtered by basename
//! glob (spec §9's "workspace provisioning as an interface", with this as
//! the one reference implementation the transformation ships).
//!
//! Grounded in the corpus's use of the `glob` crate for basename-relative
//! matching; the copy walk itself follows the teacher's plain
//! `std::fs`-via-`tokio::task::spawn_blocking` style for filesystem work
//! that doesn't need to be on the async reactor.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::Pattern;
use lsp_proxy_core::error::ProvisionError;
use lsp_proxy_core::provisioner::WorkspaceProvisioner;

pub struct GlobWorkspaceProvisioner {
    source_root: PathBuf,
}

impl GlobWorkspaceProvisioner {
    pub fn new(source_root: PathBuf) -> Self {
        GlobWorkspaceProvisioner { source_root }
    }
}

#[async_trait]
impl WorkspaceProvisioner for GlobWorkspaceProvisioner {
    async fn clone(&self, cache_dir: &Path, globs: &[String]) -> Result<(), ProvisionError> {
        let source = self.source_root.clone();
        let dest = cache_dir.to_path_buf();
        let dest_for_panic = dest.clone();
        let globs = globs.to_vec();

        tokio::task::spawn_blocking(move || copy_filtered(&source, &dest, &globs))
            .await
            .map_err(|_| ProvisionError::Clone {
                path: dest_for_panic,
                source: std::io::Error::new(std::io::ErrorKind::Other, "provisioning task panicked"),
            })?
    }

    async fn remove(&self, cache_dir: &Path, workspace_name: &str) -> Result<(), ProvisionError> {
        let target = cache_dir.join(workspace_name);
        match std::fs::remove_dir_all(&target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ProvisionError::Remove {
                name: workspace_name.to_string(),
                source,
            }),
        }
    }
}

/// Recursively copies `source` into `dest`, skipping files whose basename
/// doesn't match any pattern in `globs` (empty `globs` copies everything).
fn copy_filtered(source: &Path, dest: &Path, globs: &[String]) -> Result<(), ProvisionError> {
    let patterns: Vec<Pattern> = globs.iter().filter_map(|g| Pattern::new(g).ok()).collect();

    std::fs::create_dir_all(dest).map_err(|source_err| ProvisionError::Clone {
        path: dest.to_path_buf(),
        source: source_err,
    })?;

    copy_dir_recursive(source, dest, &patterns).map_err(|source_err| ProvisionError::Clone {
        path: dest.to_path_buf(),
        source: source_err,
    })
}

fn copy_dir_recursive(source: &Path, dest: &Path, patterns: &[Pattern]) -> std::io::Result<()> {
    if !source.exists() {
        return Ok(());
    }

    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let src_path = entry.path();
        let dest_path = dest.join(&name);

        if file_type.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
            copy_dir_recursive(&src_path, &dest_path, patterns)?;
        } else if file_type.is_file() {
            if patterns.is_empty() || matches_any(&name.to_string_lossy(), patterns) {
                std::fs::copy(&src_path, &dest_path)?;
            }
        }
    }

    Ok(())
}

fn matches_any(name: &str, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|p| p.matches(name))
}
