//! Error types for grove operations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

/// Structured error payload shared by the MCP server and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }
}

impl From<&GroveError> for ErrorEnvelope {
    fn from(err: &GroveError) -> Self {
        let (code, hint) = match err {
            GroveError::Acquisition(_) => (
                "acquisition_failed",
                "Check the repository URL and that git can reach it",
            ),
            GroveError::Search(_) => (
                "search_failed",
                "Check the pattern syntax and that rg is installed",
            ),
            GroveError::Io(_) => ("io_error", "Check the path relative to the repository root"),
            GroveError::Config(_) => ("config_error", "Check the grove config file"),
        };
        Self::new(code, err.to_string(), hint)
    }
}

/// Failure of the version-control tool while cloning or pulling.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("Failed to create checkout directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Clone task ended without a result")]
    Abandoned,
}

/// Failure of the line-search tool or of decoding its output.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Failed to run search tool `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Search tool exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },

    #[error("Failed to read search output: {0}")]
    Read(#[source] std::io::Error),

    #[error("Malformed search output line {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reading or enumerating files in the checkout.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] globset::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] ignore::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl FsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// The single error shape reported at the service boundary.
#[derive(Debug, thiserror::Error)]
pub enum GroveError {
    /// Clone failures are shared by every waiter, so the cause sits behind an `Arc`.
    #[error("Acquisition error: {0}")]
    Acquisition(#[source] Arc<AcquireError>),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("IO error: {0}")]
    Io(#[from] FsError),

    #[error("Config parse error: {0}")]
    Config(String),
}

impl From<AcquireError> for GroveError {
    fn from(err: AcquireError) -> Self {
        Self::Acquisition(Arc::new(err))
    }
}

impl From<Arc<AcquireError>> for GroveError {
    fn from(err: Arc<AcquireError>) -> Self {
        Self::Acquisition(err)
    }
}
