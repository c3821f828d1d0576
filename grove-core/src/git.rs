//! Clone and pull through the `git` binary.

use crate::error::AcquireError;
use std::path::Path;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

/// Runs the version-control tool that fills and refreshes a checkout.
#[derive(Debug, Clone)]
pub struct Acquirer {
    binary: String,
    depth: Option<u32>,
}

impl Default for Acquirer {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Acquirer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            depth: None,
        }
    }

    /// Clone only the last `depth` commits.
    pub fn with_depth(mut self, depth: Option<u32>) -> Self {
        self.depth = depth;
        self
    }

    /// Clone `url` into a fresh temporary directory.
    ///
    /// The directory is deleted when the returned `TempDir` is dropped, and on
    /// every failure path before this returns.
    pub async fn clone_repo(&self, url: &str) -> Result<TempDir, AcquireError> {
        let dir = tempfile::Builder::new()
            .prefix("grove-")
            .tempdir()
            .map_err(AcquireError::TempDir)?;

        let mut args = vec!["clone".to_string(), "--quiet".to_string()];
        if let Some(depth) = self.depth {
            args.push("--depth".to_string());
            args.push(depth.to_string());
        }
        args.push("--".to_string());
        args.push(url.to_string());
        args.push(dir.path().display().to_string());

        self.run(&args, None).await?;
        tracing::info!(url, path = %dir.path().display(), "clone complete");
        Ok(dir)
    }

    /// Fast-forward the checkout at `path` to its upstream.
    ///
    /// On failure the working tree is whatever git left behind, which for a
    /// failed fetch is the previous state.
    pub async fn pull(&self, path: &Path) -> Result<(), AcquireError> {
        let args = ["pull", "--ff-only", "--quiet"].map(String::from);
        self.run(&args, Some(path)).await
    }

    async fn run(&self, args: &[String], cwd: Option<&Path>) -> Result<(), AcquireError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        tracing::debug!(%command, "running git");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().await.map_err(|source| AcquireError::Spawn {
            command: command.clone(),
            source,
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(AcquireError::Exit {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Get the HEAD commit SHA for a checkout, or None if not a git repo / git unavailable.
    pub async fn head_commit_sha(&self, repo_root: &Path) -> Option<String> {
        Command::new(&self.binary)
            .args(["rev-parse", "HEAD"])
            .current_dir(repo_root)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()
            .and_then(|o| {
                if o.status.success() {
                    Some(String::from_utf8_lossy(&o.stdout).trim().to_string())
                } else {
                    None
                }
            })
    }
}
