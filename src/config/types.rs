//! Configuration type definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::FormatKind;

/// One native format in the format table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatEntry {
    /// Numeric format identifier
    pub id: u64,

    /// Native name (e.g. "CF_UNICODETEXT", "text/uri-list;charset=utf-8")
    pub name: String,

    /// Payload structure
    #[serde(default)]
    pub kind: FormatKind,

    /// Charset is supplied by the data source rather than the format
    #[serde(default)]
    pub locale_dependent: bool,

    /// Flavors mapped to this format, most preferred first
    #[serde(default)]
    pub flavors: Vec<String>,

    /// Text metadata; present only for text formats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextEntry>,
}

/// Text metadata of a native format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntry {
    /// Charset of the native bytes (default charset when omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,

    /// End-of-line marker (e.g. "\r\n")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eoln: Option<String>,

    /// Trailing zero bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminators: Option<TerminatorCount>,
}

/// Terminator count as written in the table, either `2` or `"2"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TerminatorCount {
    /// Integer value
    Count(i64),
    /// String value, parsed on validation
    Text(String),
}

impl TerminatorCount {
    /// Number of terminator bytes; zero and empty mean none
    pub fn resolve(&self) -> Result<usize, InvalidTerminators> {
        let count = match self {
            Self::Count(n) => *n,
            Self::Text(s) if s.trim().is_empty() => 0,
            Self::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| InvalidTerminators(s.clone()))?,
        };
        usize::try_from(count).map_err(|_| InvalidTerminators(count.to_string()))
    }
}

/// Terminator count that is negative or not a number
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid terminator count: {0:?}")]
pub struct InvalidTerminators(pub String);
