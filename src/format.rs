//! Native Format Model
//!
//! Native formats are opaque numeric identifiers owned by the platform
//! clipboard. Text formats carry their charset, end-of-line marker and
//! terminator count, fixed once at table load time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flavor::MimeType;

/// Well-known Windows clipboard format identifiers
pub mod format_id {
    /// Text format (ANSI)
    pub const CF_TEXT: u64 = 1;
    /// OEM text format
    pub const CF_OEMTEXT: u64 = 7;
    /// Device-independent bitmap
    pub const CF_DIB: u64 = 8;
    /// Unicode text format
    pub const CF_UNICODETEXT: u64 = 13;
    /// File drop format
    pub const CF_HDROP: u64 = 15;
    /// Locale identifier
    pub const CF_LOCALE: u64 = 16;
    /// HTML format
    pub const CF_HTML: u64 = 0xD010;
    /// PNG format
    pub const CF_PNG: u64 = 0xD011;
    /// Rich text format
    pub const CF_RTF: u64 = 0xD012;
    /// URI list (registered format)
    pub const CF_URI_LIST: u64 = 0xD015;
}

/// Native format identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Format(pub u64);

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Format {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// How a native format's payload is structured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    /// Opaque or text bytes
    #[default]
    Plain,
    /// Platform file list (DROPFILES)
    FileList,
    /// `text/uri-list` lines
    UriList,
    /// Platform image bytes
    Image,
}

/// Per-format text metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFormatProperties {
    /// Charset of the native bytes
    pub charset: String,
    /// End-of-line marker, `None` means no normalization
    pub eoln: Option<String>,
    /// Number of trailing zero bytes
    pub terminators: usize,
}

impl TextFormatProperties {
    /// Build properties, applying the registration rules.
    ///
    /// An empty or missing charset falls back to `default_charset`. An EOLN
    /// marker of `"\n"` is the in-process convention already, so it is not
    /// stored. A terminator count of zero means no terminators.
    pub fn register(
        charset: Option<&str>,
        eoln: Option<&str>,
        terminators: usize,
        default_charset: &str,
    ) -> Self {
        let charset = match charset {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => default_charset.to_string(),
        };
        let eoln = eoln
            .filter(|e| !e.is_empty() && *e != "\n")
            .map(str::to_string);

        Self {
            charset,
            eoln,
            terminators,
        }
    }
}

/// A registered native format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFormat {
    /// Numeric identifier
    pub id: Format,
    /// Native name, e.g. `CF_UNICODETEXT` or `text/uri-list;charset=utf-8`
    pub name: String,
    /// Payload structure
    pub kind: FormatKind,
    /// Whether the real charset travels out of band with the data
    pub locale_dependent: bool,
    /// Text metadata, present for text formats only
    pub text: Option<TextFormatProperties>,
}

impl NativeFormat {
    /// Create a non-text native format
    pub fn new(id: impl Into<Format>, name: impl Into<String>, kind: FormatKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            locale_dependent: false,
            text: None,
        }
    }

    /// Attach text metadata
    pub fn with_text(mut self, text: TextFormatProperties) -> Self {
        self.text = Some(text);
        self
    }

    /// Mark as locale dependent
    pub fn locale_dependent(mut self, locale_dependent: bool) -> Self {
        self.locale_dependent = locale_dependent;
        self
    }

    /// Whether text metadata was registered
    pub fn is_text(&self) -> bool {
        self.text.is_some()
    }

    /// `charset` parameter of the native name, when the name is a MIME type
    pub fn name_charset(&self) -> Option<String> {
        MimeType::parse(&self.name)
            .ok()
            .and_then(|mime| mime.param("charset").map(str::to_string))
    }
}
