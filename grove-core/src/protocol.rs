//! Decoding of ripgrep's `--json` line protocol.
//!
//! Every output line is one JSON object tagged by `type`. Only `match`
//! lines carry results; `begin`, `context`, `end` and `summary` delimit
//! match regions and are dropped after being recognized.

use crate::error::SearchError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// One occurrence of a search pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub path: String,
    /// 1-based
    pub line_number: u64,
    pub line_text: String,
}

/// A decoded protocol line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolLine {
    Begin {},
    Match { data: MatchData },
    Context {},
    End {},
    Summary {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchData {
    pub path: ArbitraryData,
    pub line_number: u64,
    pub lines: ArbitraryData,
}

/// Text fields are `{"text": ..}`, or `{"bytes": <base64>}` when not valid UTF-8.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArbitraryData {
    Text { text: String },
    Bytes { bytes: String },
}

impl ArbitraryData {
    fn text(self) -> Option<String> {
        match self {
            Self::Text { text } => Some(text),
            Self::Bytes { .. } => None,
        }
    }
}

impl ProtocolLine {
    /// Decode a single output line.
    pub fn decode(line: &str) -> Result<Self, SearchError> {
        serde_json::from_str(line).map_err(|source| SearchError::Decode {
            line: line.to_string(),
            source,
        })
    }

    /// Project a `match` line into a record; every other tag yields `None`.
    pub fn into_match(self) -> Option<MatchRecord> {
        let ProtocolLine::Match { data } = self else {
            return None;
        };
        let line_number = data.line_number;
        match (data.path.text(), data.lines.text()) {
            (Some(path), Some(text)) => Some(MatchRecord {
                path,
                line_number,
                line_text: text.trim_end().to_string(),
            }),
            _ => {
                tracing::debug!(line_number, "skipping match with non-UTF-8 path or text");
                None
            }
        }
    }
}

/// Incremental decoder over any buffered reader of protocol output.
pub struct MatchDecoder<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> MatchDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Read until the next match record. `Ok(None)` means end of output.
    pub async fn next_match(&mut self) -> Result<Option<MatchRecord>, SearchError> {
        loop {
            let Some(line) = self.lines.next_line().await.map_err(SearchError::Read)? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Some(record) = ProtocolLine::decode(&line)?.into_match() {
                return Ok(Some(record));
            }
        }
    }
}
