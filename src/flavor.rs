//! Flavor Model
//!
//! A [`Flavor`] describes in-process data: a MIME type plus the
//! [`Representation`] the value takes. Flavors are written as MIME strings
//! with the representation in a `class` parameter:
//!
//! ```text
//! text/plain; charset=UTF-16LE; class=byte-array
//! application/x-java-file-list; class=file-list
//! ```
//!
//! A missing `class` parameter means [`Representation::InputStream`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use tracing::trace;

use crate::charset;
use crate::error::{DataTransferError, Result};

/// MIME type of the Java-style string flavor
pub const SERIALIZED_OBJECT_MIME: &str = "application/x-java-serialized-object";
/// MIME type of the file list flavor
pub const FILE_LIST_MIME: &str = "application/x-java-file-list";
/// MIME type of the in-process image flavor
pub const IMAGE_MIME: &str = "image/x-java-image";
/// MIME type carrying the charset of locale-dependent formats
pub const TEXT_ENCODING_MIME: &str = "application/x-java-text-encoding";
/// MIME type of URI lists
pub const URI_LIST_MIME: &str = "text/uri-list";

const CLASS_PARAM: &str = "class";
const CHARSET_PARAM: &str = "charset";

// =============================================================================
// MIME type
// =============================================================================

/// Parsed MIME type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MimeType {
    /// Primary type, lower-case
    pub primary: String,
    /// Subtype, lower-case
    pub subtype: String,
    /// Parameters, names lower-case
    pub params: BTreeMap<String, String>,
}

impl MimeType {
    /// Parse `primary/subtype; name=value; ...`
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = split_params(s).into_iter();
        let base = parts.next().unwrap_or_default();
        let (primary, subtype) = base
            .split_once('/')
            .map(|(p, s)| (p.trim().to_ascii_lowercase(), s.trim().to_ascii_lowercase()))
            .ok_or_else(|| DataTransferError::InvalidFlavor(s.to_string()))?;

        if primary.is_empty() || subtype.is_empty() || !is_token(&primary) || !is_token(&subtype) {
            return Err(DataTransferError::InvalidFlavor(s.to_string()));
        }

        let mut params = BTreeMap::new();
        for part in parts {
            if part.trim().is_empty() {
                continue;
            }
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| DataTransferError::InvalidFlavor(s.to_string()))?;
            let name = name.trim().to_ascii_lowercase();
            if name.is_empty() {
                return Err(DataTransferError::InvalidFlavor(s.to_string()));
            }
            params.insert(name, unquote(value.trim()));
        }

        Ok(Self {
            primary,
            subtype,
            params,
        })
    }

    /// `primary/subtype`
    pub fn base_type(&self) -> String {
        format!("{}/{}", self.primary, self.subtype)
    }

    /// Parameter value
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.primary, self.subtype)?;
        for (name, value) in &self.params {
            if !value.is_empty() && value.chars().all(is_token_char) {
                write!(f, "; {name}={value}")?;
            } else {
                write!(f, "; {name}=\"{value}\"")?;
            }
        }
        Ok(())
    }
}

impl FromStr for MimeType {
    type Err = DataTransferError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?=".contains(c)
}

fn is_token(s: &str) -> bool {
    s.chars().all(is_token_char)
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map(|v| v.replace("\\\"", "\""))
        .unwrap_or_else(|| value.to_string())
}

/// Split on `;` outside quoted strings
fn split_params(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;

    for c in s.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                quoted = !quoted;
            }
            ';' if !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

// =============================================================================
// Representation
// =============================================================================

/// In-process shape of a flavor's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Representation {
    /// Sequence of characters
    CharArray,
    /// Owned string
    String,
    /// Character buffer
    CharBuffer,
    /// Character stream
    Reader,
    /// Byte vector
    ByteArray,
    /// Shared byte buffer
    ByteBuffer,
    /// Byte stream
    InputStream,
    /// List of filesystem paths
    FileList,
    /// Decoded image
    Image,
    /// Serializable object graph
    Serializable,
    /// Remote object reference
    Remote,
}

impl Representation {
    /// Value of the `class` flavor parameter
    pub fn name(self) -> &'static str {
        match self {
            Self::CharArray => "char-array",
            Self::String => "string",
            Self::CharBuffer => "char-buffer",
            Self::Reader => "reader",
            Self::ByteArray => "byte-array",
            Self::ByteBuffer => "byte-buffer",
            Self::InputStream => "stream",
            Self::FileList => "file-list",
            Self::Image => "image",
            Self::Serializable => "serializable",
            Self::Remote => "remote",
        }
    }

    /// Parse a `class` parameter value
    pub fn from_name(name: &str) -> Option<Self> {
        let rep = match name.trim().to_ascii_lowercase().as_str() {
            "char-array" | "chars" => Self::CharArray,
            "string" => Self::String,
            "char-buffer" => Self::CharBuffer,
            "reader" => Self::Reader,
            "byte-array" | "bytes" => Self::ByteArray,
            "byte-buffer" => Self::ByteBuffer,
            "stream" | "input-stream" => Self::InputStream,
            "file-list" => Self::FileList,
            "image" => Self::Image,
            "serializable" => Self::Serializable,
            "remote" => Self::Remote,
            _ => return None,
        };
        Some(rep)
    }

    /// Character-valued representations
    pub fn is_decoded_text(self) -> bool {
        matches!(self, Self::CharArray | Self::String | Self::CharBuffer | Self::Reader)
    }

    /// Byte-valued representations
    pub fn is_encoded_text(self) -> bool {
        matches!(self, Self::ByteArray | Self::ByteBuffer | Self::InputStream)
    }

    /// Representations that can be written by the object serializer
    pub fn is_serializable(self) -> bool {
        matches!(
            self,
            Self::String | Self::CharArray | Self::ByteArray | Self::FileList | Self::Serializable
        )
    }
}

// =============================================================================
// Flavor
// =============================================================================

/// Data flavor: MIME type plus representation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Flavor {
    mime: MimeType,
    representation: Representation,
}

impl Flavor {
    /// Build a flavor. Any `class` parameter is dropped from `mime` and the
    /// charset parameter is canonicalized.
    pub fn new(mut mime: MimeType, representation: Representation) -> Self {
        mime.params.remove(CLASS_PARAM);
        if let Some(cs) = mime.params.get_mut(CHARSET_PARAM) {
            *cs = charset::canonical_name(cs);
        }
        Self {
            mime,
            representation,
        }
    }

    /// Parse a flavor string
    pub fn parse(s: &str) -> Result<Self> {
        let mime = MimeType::parse(s)?;
        let representation = match mime.param(CLASS_PARAM) {
            Some(class) => Representation::from_name(class)
                .ok_or_else(|| DataTransferError::InvalidFlavor(s.to_string()))?,
            None => Representation::InputStream,
        };
        Ok(Self::new(mime, representation))
    }

    /// MIME type without the `class` parameter
    pub fn mime(&self) -> &MimeType {
        &self.mime
    }

    /// Primary type
    pub fn primary_type(&self) -> &str {
        &self.mime.primary
    }

    /// Subtype
    pub fn subtype(&self) -> &str {
        &self.mime.subtype
    }

    /// Representation of values in this flavor
    pub fn representation(&self) -> Representation {
        self.representation
    }

    /// Parameter value
    pub fn param(&self, name: &str) -> Option<&str> {
        self.mime.param(name)
    }

    /// `charset` parameter
    pub fn charset(&self) -> Option<&str> {
        self.param(CHARSET_PARAM)
    }

    /// Whether the MIME base type equals `base` (e.g. `text/uri-list`)
    pub fn is_mime_type_equal(&self, base: &str) -> bool {
        base.split_once('/').is_some_and(|(p, s)| {
            p.trim().eq_ignore_ascii_case(&self.mime.primary)
                && s.trim().eq_ignore_ascii_case(&self.mime.subtype)
        })
    }

    /// Same flavor with another representation
    pub fn with_representation(&self, representation: Representation) -> Self {
        Self {
            mime: self.mime.clone(),
            representation,
        }
    }

    /// Full MIME string including the `class` parameter
    pub fn mime_string(&self) -> String {
        self.to_string()
    }

    /// Whether this is the file list flavor
    pub fn is_file_list(&self) -> bool {
        self.representation == Representation::FileList && self.is_mime_type_equal(FILE_LIST_MIME)
    }

    /// Whether this flavor carries an image value
    pub fn is_image(&self) -> bool {
        self.representation == Representation::Image
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; {}={}", self.mime, CLASS_PARAM, self.representation.name())
    }
}

impl FromStr for Flavor {
    type Err = DataTransferError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn well_known(primary: &str, subtype: &str, params: &[(&str, &str)], rep: Representation) -> Flavor {
    let mime = MimeType {
        primary: primary.to_string(),
        subtype: subtype.to_string(),
        params: params
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    };
    Flavor::new(mime, rep)
}

/// `application/x-java-serialized-object; class=string`
pub fn string_flavor() -> Flavor {
    well_known("application", "x-java-serialized-object", &[], Representation::String)
}

/// `text/plain; charset=unicode; class=stream`
pub fn plain_text_flavor() -> Flavor {
    well_known("text", "plain", &[(CHARSET_PARAM, "unicode")], Representation::InputStream)
}

/// `application/x-java-file-list; class=file-list`
pub fn file_list_flavor() -> Flavor {
    well_known("application", "x-java-file-list", &[], Representation::FileList)
}

/// `image/x-java-image; class=image`
pub fn image_flavor() -> Flavor {
    well_known("image", "x-java-image", &[], Representation::Image)
}

/// `application/x-java-text-encoding; class=byte-array`
pub fn text_encoding_flavor() -> Flavor {
    well_known("application", "x-java-text-encoding", &[], Representation::ByteArray)
}

/// Standard text flavors a single text native expands to
pub fn text_flavors_for(subtype: &str, charset: Option<&str>) -> Vec<Flavor> {
    let params: Vec<(&str, &str)> = charset.map(|c| vec![(CHARSET_PARAM, c)]).unwrap_or_default();
    [
        Representation::String,
        Representation::Reader,
        Representation::CharBuffer,
        Representation::CharArray,
        Representation::InputStream,
        Representation::ByteBuffer,
        Representation::ByteArray,
    ]
    .into_iter()
    .map(|rep| {
        if rep.is_decoded_text() {
            well_known("text", subtype, &[], rep)
        } else {
            well_known("text", subtype, &params, rep)
        }
    })
    .collect()
}

/// Byte-valued text flavors of `subtype` in `charset`
pub fn encoded_text_flavors(subtype: &str, charset: &str) -> Vec<Flavor> {
    [
        Representation::InputStream,
        Representation::ByteBuffer,
        Representation::ByteArray,
    ]
    .into_iter()
    .map(|rep| well_known("text", subtype, &[(CHARSET_PARAM, charset)], rep))
    .collect()
}

// =============================================================================
// Text classification
// =============================================================================

/// Classifies flavors as text and resolves their charsets.
///
/// Holds the subtype charset-support memo. Unknown text subtypes are
/// recorded on first sight according to whether that flavor carried a
/// charset parameter; later lookups reuse the answer.
#[derive(Debug)]
pub struct TextClassifier {
    charset_support: RwLock<HashMap<String, bool>>,
    default_charset: String,
}

impl TextClassifier {
    /// Create a classifier with the seeded subtype table
    pub fn new(default_charset: impl Into<String>) -> Self {
        let seed = [
            ("sgml", true),
            ("xml", true),
            ("html", true),
            ("enriched", true),
            ("richtext", true),
            ("uri-list", true),
            ("directory", true),
            ("css", true),
            ("calendar", true),
            ("plain", true),
            ("rtf", false),
            ("tab-separated-values", false),
            ("t140", false),
            ("rfc822-headers", false),
            ("parityfec", false),
        ];

        Self {
            charset_support: RwLock::new(
                seed.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            ),
            default_charset: default_charset.into(),
        }
    }

    /// Charset used when a text flavor names none
    pub fn default_charset(&self) -> &str {
        &self.default_charset
    }

    /// Whether the flavor's subtype takes a charset parameter
    pub fn subtype_supports_charset(&self, flavor: &Flavor) -> bool {
        self.subtype_supports_charset_raw(flavor.subtype(), flavor.charset().is_some())
    }

    /// Memo lookup by subtype name
    pub fn subtype_supports_charset_raw(&self, subtype: &str, has_charset: bool) -> bool {
        if let Some(&support) = self.charset_support.read().get(subtype) {
            return support;
        }

        let mut memo = self.charset_support.write();
        *memo.entry(subtype.to_string()).or_insert_with(|| {
            trace!(subtype, has_charset, "Memoizing charset support for text subtype");
            has_charset
        })
    }

    /// Text flavor whose bytes are interpreted through a charset
    pub fn is_charset_text_type(&self, flavor: &Flavor) -> bool {
        if *flavor == string_flavor() {
            return true;
        }
        if flavor.primary_type() != "text" || !self.subtype_supports_charset(flavor) {
            return false;
        }

        let rep = flavor.representation();
        if rep.is_decoded_text() {
            return true;
        }
        if !rep.is_encoded_text() {
            return false;
        }

        // Absent charset means the default, which is always usable
        flavor.charset().map_or(true, charset::is_encoding_supported)
    }

    /// Text flavor whose bytes carry no charset semantics
    pub fn is_noncharset_text_type(&self, flavor: &Flavor) -> bool {
        if flavor.primary_type() != "text" || self.subtype_supports_charset(flavor) {
            return false;
        }
        flavor.representation().is_encoded_text()
    }

    /// Either kind of text flavor
    pub fn is_text_type(&self, flavor: &Flavor) -> bool {
        self.is_charset_text_type(flavor) || self.is_noncharset_text_type(flavor)
    }

    /// Charset of a charset text flavor, `None` for anything else
    pub fn text_charset(&self, flavor: &Flavor) -> Option<String> {
        if !self.is_charset_text_type(flavor) {
            return None;
        }
        Some(
            flavor
                .charset()
                .map(str::to_string)
                .unwrap_or_else(|| self.default_charset.clone()),
        )
    }
}

impl Default for TextClassifier {
    fn default() -> Self {
        Self::new(charset::DEFAULT_CHARSET)
    }
}
