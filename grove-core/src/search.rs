//! Streaming search through an external line-search tool.

use crate::error::SearchError;
use crate::protocol::{MatchDecoder, MatchRecord};
use std::any::Any;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Default lines of context requested around each match
pub const DEFAULT_CONTEXT_LINES: usize = 2;

/// Exit code ripgrep uses for "ran fine, matched nothing".
const EXIT_NO_MATCH: i32 = 1;

/// A single search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub pattern: String,
    /// Working directory of the search, normally the checkout root
    pub directory: PathBuf,
    pub glob: Option<String>,
    /// Cap on matching lines per file
    pub max_per_file: Option<usize>,
}

impl SearchQuery {
    pub fn new(pattern: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            directory: directory.into(),
            glob: None,
            max_per_file: None,
        }
    }

    pub fn with_glob(mut self, glob: Option<String>) -> Self {
        self.glob = glob;
        self
    }

    pub fn with_max_per_file(mut self, max: Option<usize>) -> Self {
        self.max_per_file = max;
        self
    }
}

/// Spawns the search tool and hands back a lazy stream of matches.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    binary: String,
    context_lines: usize,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new("rg", DEFAULT_CONTEXT_LINES)
    }
}

impl SearchEngine {
    pub fn new(binary: impl Into<String>, context_lines: usize) -> Self {
        Self {
            binary: binary.into(),
            context_lines,
        }
    }

    /// Command-line arguments for `query`. The pattern is always last.
    pub fn args(&self, query: &SearchQuery) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--json".into(),
            "--context".into(),
            self.context_lines.to_string().into(),
        ];
        if let Some(glob) = &query.glob {
            args.push("--glob".into());
            args.push(glob.into());
        }
        if let Some(max) = query.max_per_file {
            args.push("--max-count".into());
            args.push(max.to_string().into());
        }
        args.push("--".into());
        args.push(query.pattern.clone().into());
        args
    }

    /// Start a search. Nothing is read until the stream is pulled.
    pub fn search(&self, query: &SearchQuery) -> Result<SearchStream, SearchError> {
        let mut child = Command::new(&self.binary)
            .args(self.args(query))
            .current_dir(&query.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SearchError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        tracing::debug!(pattern = %query.pattern, pid = ?child.id(), "search started");

        let stdout = child.stdout.take().ok_or_else(|| {
            SearchError::Read(std::io::Error::other("failed to capture stdout"))
        })?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        Ok(SearchStream {
            child,
            decoder: MatchDecoder::new(BufReader::new(stdout)),
            stderr_task,
            done: false,
            _guard: None,
        })
    }
}

/// Lazily decoded matches from one running search process.
///
/// Dropping the stream kills the process. Use [`SearchStream::close`] to kill
/// and also wait for it to exit.
pub struct SearchStream {
    child: Child,
    decoder: MatchDecoder<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<String>>,
    done: bool,
    _guard: Option<Box<dyn Any + Send + Sync>>,
}

impl SearchStream {
    /// Keep `guard` alive for as long as the stream lives.
    pub(crate) fn hold<T: Any + Send + Sync>(mut self, guard: T) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// OS process id of the search tool, `None` once it has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next match, or `None` once the output is exhausted.
    ///
    /// Errors are reported once; the stream is finished afterwards.
    pub async fn next(&mut self) -> Option<Result<MatchRecord, SearchError>> {
        if self.done {
            return None;
        }
        match self.decoder.next_match().await {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                self.finish().await.err().map(Err)
            }
            Err(err) => {
                self.done = true;
                let _ = self.child.kill().await;
                Some(Err(err))
            }
        }
    }

    /// Pull up to `limit` matches, then stop the process.
    pub async fn take(mut self, limit: usize) -> Result<Vec<MatchRecord>, SearchError> {
        let mut records = Vec::new();
        while records.len() < limit {
            match self.next().await {
                Some(record) => records.push(record?),
                None => break,
            }
        }
        self.close().await?;
        Ok(records)
    }

    /// Stop the search early, killing the process and waiting for it to exit.
    pub async fn close(mut self) -> Result<(), SearchError> {
        if !self.done {
            self.done = true;
            // start_kill fails only if the child was already reaped
            let _ = self.child.start_kill();
        }
        self.child.wait().await.map_err(SearchError::Read)?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SearchError> {
        let status = self.child.wait().await.map_err(SearchError::Read)?;
        if status.success() || status.code() == Some(EXIT_NO_MATCH) {
            return Ok(());
        }
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(SearchError::Exit {
            status,
            stderr: stderr.trim().to_string(),
        })
    }
}
