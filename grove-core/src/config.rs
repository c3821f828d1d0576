//! Configuration for grove

use crate::GroveError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Grove Configuration

[repository]
# Repository to mirror (may also be given with --repo / GROVE_REPO_URL)
url = ""
# File served as assistant context, relative to the repository root
context_file = "README.md"
# Shallow clone depth (0 clones full history)
clone_depth = 0

[refresh]
# Time between pulls (e.g., "15m", "1h")
interval = "15m"
# First retry delay after a failed pull, doubled per consecutive failure
retry_initial = "30s"
# Upper bound for the retry delay
retry_max = "15m"

[search]
# Line-search tool, must speak ripgrep's --json protocol
binary = "rg"
# Lines of context requested around each match
context_lines = 2
# Default cap on matches returned by a search call
max_results = 50

[git]
binary = "git"
"#;

/// Grove configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_context_file")]
    pub context_file: String,
    #[serde(default)]
    pub clone_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_retry_initial")]
    pub retry_initial: String,
    #[serde(default = "default_interval")]
    pub retry_max: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_binary")]
    pub binary: String,
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

// Default value functions
fn default_context_file() -> String {
    "README.md".to_string()
}
fn default_interval() -> String {
    "15m".to_string()
}
fn default_retry_initial() -> String {
    "30s".to_string()
}
fn default_search_binary() -> String {
    "rg".to_string()
}
fn default_context_lines() -> usize {
    2
}
fn default_max_results() -> usize {
    50
}
fn default_git_binary() -> String {
    "git".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            context_file: default_context_file(),
            clone_depth: 0,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            retry_initial: default_retry_initial(),
            retry_max: default_interval(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            binary: default_search_binary(),
            context_lines: default_context_lines(),
            max_results: default_max_results(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
        }
    }
}

/// Resolved timings for the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub interval: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl RefreshPolicy {
    /// Delay before the retry following `failures` consecutive failed pulls.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.retry_initial
            .saturating_mul(1u32 << exp)
            .min(self.retry_max)
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            retry_initial: Duration::from_secs(30),
            retry_max: Duration::from_secs(15 * 60),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GroveError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| GroveError::Config(e.to_string()))
    }

    /// Resolve the refresh durations, rejecting malformed values.
    pub fn refresh_policy(&self) -> crate::Result<RefreshPolicy> {
        let field = |name: &str, value: &str| {
            parse_duration(value)
                .ok_or_else(|| GroveError::Config(format!("invalid duration for {name}: {value:?}")))
        };
        Ok(RefreshPolicy {
            interval: field("refresh.interval", &self.refresh.interval)?,
            retry_initial: field("refresh.retry_initial", &self.refresh.retry_initial)?,
            retry_max: field("refresh.retry_max", &self.refresh.retry_max)?,
        })
    }

    /// Clone depth, `None` for a full clone
    pub fn clone_depth(&self) -> Option<u32> {
        (self.repository.clone_depth > 0).then_some(self.repository.clone_depth)
    }
}

/// Parse duration string (e.g., "1h", "30m", "1d")
///
/// Unknown units and values too large for a `Duration` yield `None`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (idx, unit) = s.char_indices().last()?;
    let num: u64 = s[..idx].parse().ok()?;

    let scale: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return None,
    };
    num.checked_mul(scale).map(Duration::from_secs)
}
