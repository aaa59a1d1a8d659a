//! Payload translation.
//!
//! [`DataTransferer`] converts values offered by a [`Transferable`] into
//! native bytes, and native bytes or streams back into values. Dispatch is
//! on the flavor's [`Representation`]; the value itself is a
//! [`TransferValue`] whose variant must agree with that representation.
//!
//! A data source with nothing to offer yields `Ok(None)`.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use serde_json::Value;
use tracing::{debug, trace};

use crate::charset::{self, Charset};
use crate::error::{DataTransferError, Result};
use crate::files::{
    self, DropFilesCodec, FileListCodec, ReadPermission, UntrustedCacheDirs,
};
use crate::flavor::{self, Flavor, Representation, TextClassifier, URI_LIST_MIME};
use crate::flavor_map::FlavorFormatMap;
use crate::format::{Format, TextFormatProperties};
use crate::image::{ImageCodec, StandardImageCodec};
use crate::index::{FormatFlavorIndex, RankedFormats};
use crate::object::{JsonObjectSerializer, MarshalledObject, ObjectSerializer};
use crate::ranking::RankTables;
use crate::text::{self, ReencodingReader};

/// A value in one of the in-process representations
pub enum TransferValue {
    /// Characters
    CharArray(Vec<char>),
    /// String
    Text(String),
    /// Character buffer
    CharBuffer(String),
    /// Character stream, yielding UTF-8
    Reader(Box<dyn Read + Send>),
    /// Bytes
    ByteArray(Vec<u8>),
    /// Shared bytes
    ByteBuffer(Bytes),
    /// Byte stream
    InputStream(Box<dyn Read + Send>),
    /// Paths
    FileList(Vec<PathBuf>),
    /// Decoded image
    Image(DynamicImage),
    /// Object graph
    Serializable(Value),
    /// Remote object reference
    Remote(MarshalledObject),
}

impl TransferValue {
    /// Representation this value carries
    pub fn representation(&self) -> Representation {
        match self {
            Self::CharArray(_) => Representation::CharArray,
            Self::Text(_) => Representation::String,
            Self::CharBuffer(_) => Representation::CharBuffer,
            Self::Reader(_) => Representation::Reader,
            Self::ByteArray(_) => Representation::ByteArray,
            Self::ByteBuffer(_) => Representation::ByteBuffer,
            Self::InputStream(_) => Representation::InputStream,
            Self::FileList(_) => Representation::FileList,
            Self::Image(_) => Representation::Image,
            Self::Serializable(_) => Representation::Serializable,
            Self::Remote(_) => Representation::Remote,
        }
    }

    /// Whether this is a byte stream
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::InputStream(_))
    }

    /// Materialize a character-valued value
    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(s) | Self::CharBuffer(s) => Ok(s),
            Self::CharArray(chars) => Ok(chars.into_iter().collect()),
            Self::Reader(mut reader) => {
                let mut s = String::new();
                reader.read_to_string(&mut s)?;
                Ok(s)
            }
            other => Err(DataTransferError::unsupported(format!(
                "{} value is not text",
                other.representation().name()
            ))),
        }
    }

    /// Materialize a byte-valued value
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::ByteArray(bytes) => Ok(bytes),
            Self::ByteBuffer(bytes) => Ok(bytes.to_vec()),
            Self::InputStream(mut stream) => read_all(&mut stream),
            other => Err(DataTransferError::unsupported(format!(
                "{} value is not bytes",
                other.representation().name()
            ))),
        }
    }
}

impl fmt::Debug for TransferValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CharArray(chars) => f.debug_tuple("CharArray").field(&chars.len()).finish(),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::CharBuffer(s) => f.debug_tuple("CharBuffer").field(s).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::ByteArray(b) => f.debug_tuple("ByteArray").field(&b.len()).finish(),
            Self::ByteBuffer(b) => f.debug_tuple("ByteBuffer").field(&b.len()).finish(),
            Self::InputStream(_) => f.write_str("InputStream(..)"),
            Self::FileList(paths) => f.debug_tuple("FileList").field(paths).finish(),
            Self::Image(img) => write!(f, "Image({}x{})", img.width(), img.height()),
            Self::Serializable(v) => f.debug_tuple("Serializable").field(v).finish(),
            Self::Remote(obj) => f.debug_tuple("Remote").field(&obj.type_name).finish(),
        }
    }
}

/// A data source offering values in one or more flavors
pub trait Transferable: Send + Sync {
    /// Offered flavors, most preferred first
    fn transfer_flavors(&self) -> Vec<Flavor>;

    /// Whether `flavor` is offered
    fn is_flavor_supported(&self, flavor: &Flavor) -> bool {
        self.transfer_flavors().contains(flavor)
    }

    /// Value in `flavor`; `None` when the source has no data
    fn transfer_data(&self, flavor: &Flavor) -> Result<Option<TransferValue>>;

    /// Read permission the source's own context is limited to
    fn read_permission(&self) -> Option<&dyn ReadPermission> {
        None
    }
}

/// Plain string source
///
/// Offers the string flavor and the plain text flavor. Like the classic
/// string selection it answers the plain text flavor with a reader rather
/// than a byte stream.
#[derive(Debug, Clone)]
pub struct TextTransferable {
    text: String,
}

impl TextTransferable {
    /// Wrap a string
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Transferable for TextTransferable {
    fn transfer_flavors(&self) -> Vec<Flavor> {
        vec![flavor::string_flavor(), flavor::plain_text_flavor()]
    }

    fn transfer_data(&self, flavor: &Flavor) -> Result<Option<TransferValue>> {
        if *flavor == flavor::string_flavor() {
            Ok(Some(TransferValue::Text(self.text.clone())))
        } else if *flavor == flavor::plain_text_flavor() {
            Ok(Some(TransferValue::Reader(Box::new(Cursor::new(
                self.text.clone().into_bytes(),
            )))))
        } else {
            Err(DataTransferError::unsupported(format!("flavor not offered: {flavor}")))
        }
    }
}

fn read_all<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}

// =============================================================================
// Engine
// =============================================================================

/// Translation engine over an immutable format table
#[derive(Clone)]
pub struct DataTransferer {
    map: Arc<FlavorFormatMap>,
    classifier: Arc<TextClassifier>,
    tables: Arc<RankTables>,
    index: FormatFlavorIndex,
    file_codec: Arc<dyn FileListCodec>,
    image_codec: Arc<dyn ImageCodec>,
    serializer: Arc<dyn ObjectSerializer>,
    permission: Option<Arc<dyn ReadPermission>>,
    cache_dirs: Arc<UntrustedCacheDirs>,
}

impl fmt::Debug for DataTransferer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTransferer")
            .field("formats", &self.map.natives().count())
            .field("default_charset", &self.classifier.default_charset())
            .field("restricted", &self.permission.is_some())
            .finish_non_exhaustive()
    }
}

impl DataTransferer {
    /// Create an engine with the standard codecs and no read restrictions
    pub fn new(map: FlavorFormatMap, default_charset: &str) -> Self {
        let map = Arc::new(map);
        let default_charset = charset::canonical_name(default_charset);
        let classifier = Arc::new(TextClassifier::new(default_charset.clone()));
        let tables = Arc::new(RankTables::new(&default_charset));
        let index = FormatFlavorIndex::new(Arc::clone(&map), Arc::clone(&classifier), Arc::clone(&tables));

        Self {
            map,
            classifier,
            tables,
            index,
            file_codec: Arc::new(DropFilesCodec),
            image_codec: Arc::new(StandardImageCodec),
            serializer: Arc::new(JsonObjectSerializer),
            permission: None,
            cache_dirs: Arc::new(UntrustedCacheDirs::default()),
        }
    }

    /// Use another file list codec
    pub fn with_file_list_codec(mut self, codec: Arc<dyn FileListCodec>) -> Self {
        self.file_codec = codec;
        self
    }

    /// Use another image codec
    pub fn with_image_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.image_codec = codec;
        self
    }

    /// Use another object serializer
    pub fn with_object_serializer(mut self, serializer: Arc<dyn ObjectSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Restrict exported files to those `permission` allows
    pub fn with_read_permission(mut self, permission: Arc<dyn ReadPermission>) -> Self {
        self.permission = Some(permission);
        self
    }

    /// Untrusted cache directories
    pub fn with_cache_dirs(mut self, cache_dirs: UntrustedCacheDirs) -> Self {
        self.cache_dirs = Arc::new(cache_dirs);
        self
    }

    /// Format table
    pub fn map(&self) -> &FlavorFormatMap {
        &self.map
    }

    /// Negotiation index
    pub fn index(&self) -> &FormatFlavorIndex {
        &self.index
    }

    /// Text classifier
    pub fn classifier(&self) -> &TextClassifier {
        &self.classifier
    }

    /// Rank tables
    pub fn rank_tables(&self) -> &Arc<RankTables> {
        &self.tables
    }

    /// Formats a data source can be exported as
    pub fn formats_for_transferable(&self, contents: &dyn Transferable) -> RankedFormats {
        self.index.formats_for_transferable(contents)
    }

    fn read_policy<'a>(&'a self, contents: Option<&'a dyn Transferable>) -> Option<&'a dyn ReadPermission> {
        contents
            .and_then(|c| c.read_permission())
            .or(self.permission.as_deref())
    }

    fn text_props(&self, format: Format) -> TextFormatProperties {
        self.map.text_properties(format).cloned().unwrap_or_else(|| {
            TextFormatProperties::register(None, None, 0, self.classifier.default_charset())
        })
    }

    fn is_charset_text(&self, flavor: &Flavor, format: Format) -> bool {
        self.classifier.is_charset_text_type(flavor) && self.map.is_text_format(format)
    }

    fn flavor_charset(&self, flavor: &Flavor) -> String {
        self.classifier
            .text_charset(flavor)
            .unwrap_or_else(|| self.classifier.default_charset().to_string())
    }

    /// Charset to decode `format` with.
    ///
    /// A locale-dependent format takes the charset the source supplies under
    /// the text-encoding flavor; otherwise the format's own charset applies.
    pub fn best_charset_for_format(
        &self,
        format: Format,
        locale_source: Option<&dyn Transferable>,
    ) -> Result<String> {
        let encoding_flavor = flavor::text_encoding_flavor();

        let charset = match locale_source {
            Some(source)
                if self.map.is_locale_dependent(format) && source.is_flavor_supported(&encoding_flavor) =>
            {
                match source.transfer_data(&encoding_flavor)? {
                    Some(TransferValue::ByteArray(name)) => Some(String::from_utf8_lossy(&name).into_owned()),
                    Some(other) => {
                        return Err(DataTransferError::InvalidData(format!(
                            "text encoding supplied as {}",
                            other.representation().name()
                        )))
                    }
                    None => None,
                }
            }
            _ => self.map.text_properties(format).map(|p| p.charset.clone()),
        };

        Ok(charset.unwrap_or_else(|| self.classifier.default_charset().to_string()))
    }

    fn translate_string(&self, text: &str, format: Format) -> Result<Vec<u8>> {
        text::encode_text(text, &self.text_props(format))
    }

    fn bytes_to_string(&self, bytes: &[u8], format: Format, locale: Option<&dyn Transferable>) -> Result<String> {
        let charset = self.best_charset_for_format(format, locale)?;
        text::decode_text(bytes, &self.text_props(format), Some(&charset))
    }

    fn remove_suspected_data(&self, flavor: &Flavor, contents: &dyn Transferable, text: String) -> String {
        match self.read_policy(Some(contents)) {
            Some(policy) if flavor.is_mime_type_equal(URI_LIST_MIME) => {
                files::remove_suspected_data(&text, policy, &self.cache_dirs)
            }
            _ => text,
        }
    }

    // =========================================================================
    // Value -> native bytes
    // =========================================================================

    /// Translate the value `contents` offers in `flavor` into bytes of
    /// `format`
    pub fn translate_transferable(
        &self,
        contents: &dyn Transferable,
        flavor: &Flavor,
        format: Format,
    ) -> Result<Option<Vec<u8>>> {
        let Some(mut value) = contents.transfer_data(flavor)? else {
            return Ok(None);
        };

        // Sources that answer the plain text flavor with something other
        // than a stream are re-read as a string
        let mut string_fallback = false;
        if *flavor == flavor::plain_text_flavor() && !value.is_stream() {
            let Some(text) = contents.transfer_data(&flavor::string_flavor())? else {
                return Ok(None);
            };
            value = text;
            string_fallback = true;
        }

        let expected = if string_fallback {
            Representation::String
        } else {
            flavor.representation()
        };
        if value.representation() != expected {
            return Err(DataTransferError::unsupported(format!(
                "{} value offered for flavor {flavor}",
                value.representation().name()
            )));
        }

        let charset_text = self.is_charset_text(flavor, format);
        trace!(flavor = %flavor, format = %format, charset_text, "Translating transferable");

        let value = match value {
            TransferValue::Text(s) if string_fallback || charset_text => {
                let s = self.remove_suspected_data(flavor, contents, s);
                return self.translate_string(&s, format).map(Some);
            }
            TransferValue::Reader(mut reader) => {
                if !charset_text {
                    return Err(DataTransferError::unsupported("cannot transfer non-text data as Reader"));
                }
                let mut s = String::new();
                reader.read_to_string(&mut s)?;
                return self.translate_string(&s, format).map(Some);
            }
            TransferValue::CharBuffer(s) => {
                if !charset_text {
                    return Err(DataTransferError::unsupported("cannot transfer non-text data as CharBuffer"));
                }
                return self.translate_string(&s, format).map(Some);
            }
            TransferValue::CharArray(chars) => {
                if !charset_text {
                    return Err(DataTransferError::unsupported("cannot transfer non-text data as char array"));
                }
                let s: String = chars.into_iter().collect();
                return self.translate_string(&s, format).map(Some);
            }
            TransferValue::ByteBuffer(bytes) => return self.reencode_or_pass(flavor, format, bytes.to_vec()).map(Some),
            TransferValue::ByteArray(bytes) => return self.reencode_or_pass(flavor, format, bytes).map(Some),
            TransferValue::Image(image) => {
                if !self.map.is_image_format(format) {
                    return Err(DataTransferError::unsupported("not an image format"));
                }
                let native = self.map.require_native(format)?;
                return self.image_codec.encode(&image, native).map(Some);
            }
            other => other,
        };

        if self.map.is_file_format(format) {
            let paths = self.exportable_paths(contents, flavor, value)?;
            return self.file_codec.encode(&paths).map(Some);
        }

        if self.map.is_uri_list_format(format) {
            let native = self.map.require_native(format)?;
            let charset = Charset::lookup(&native.name_charset().unwrap_or_else(|| "UTF-8".to_string()))?;
            let paths = self.exportable_paths(contents, flavor, value)?;
            return Ok(Some(files::encode_uri_list(&paths, charset)));
        }

        match value {
            TransferValue::InputStream(mut stream) => {
                let bytes = read_all(&mut stream)?;
                self.reencode_or_pass(flavor, format, bytes).map(Some)
            }
            TransferValue::Remote(object) => object.marshal(self.serializer.as_ref()).map(Some),
            TransferValue::Text(s) => self.serializer.serialize(&Value::String(s)).map(Some),
            TransferValue::FileList(paths) => {
                let names = paths
                    .iter()
                    .map(|p| Value::String(p.to_string_lossy().into_owned()))
                    .collect();
                self.serializer.serialize(&Value::Array(names)).map(Some)
            }
            TransferValue::Serializable(object) => self.serializer.serialize(&object).map(Some),
            _ => Err(DataTransferError::unsupported("data translation failed")),
        }
    }

    /// Text flavors are decoded with their charset and re-encoded for the
    /// format; anything else passes through unchanged
    fn reencode_or_pass(&self, flavor: &Flavor, format: Format, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if !self.is_charset_text(flavor, format) {
            return Ok(bytes);
        }
        let source = charset::decode_with(&self.flavor_charset(flavor), &bytes)?;
        self.translate_string(&source, format)
    }

    fn exportable_paths(&self, contents: &dyn Transferable, flavor: &Flavor, value: TransferValue) -> Result<Vec<String>> {
        let TransferValue::FileList(paths) = value else {
            return Err(DataTransferError::unsupported("data translation failed"));
        };
        if !flavor.is_file_list() {
            return Err(DataTransferError::unsupported("data translation failed"));
        }

        let exported = files::filter_exportable(&paths, self.read_policy(Some(contents)), &self.cache_dirs);
        if exported.len() != paths.len() {
            debug!(offered = paths.len(), exported = exported.len(), "Dropped files from export");
        }
        Ok(exported)
    }

    // =========================================================================
    // Native bytes -> value
    // =========================================================================

    /// Translate bytes of `format` into a value of `flavor`
    pub fn translate_bytes(
        &self,
        bytes: &[u8],
        flavor: &Flavor,
        format: Format,
        locale: Option<&dyn Transferable>,
    ) -> Result<Option<TransferValue>> {
        if self.map.is_file_format(format) {
            if !flavor.is_file_list() {
                return Err(DataTransferError::unsupported("data translation failed"));
            }
            return Ok(self
                .file_codec
                .decode(bytes)?
                .map(|names| TransferValue::FileList(names.into_iter().map(PathBuf::from).collect())));
        }

        if self.map.is_uri_list_format(format) && flavor.is_file_list() {
            return self.read_uri_list(bytes, format).map(Some);
        }

        let charset_text = self.is_charset_text(flavor, format);
        let value = match flavor.representation() {
            Representation::String if charset_text => TransferValue::Text(self.bytes_to_string(bytes, format, locale)?),
            Representation::Reader | Representation::InputStream => {
                return self.translate_stream(Box::new(Cursor::new(bytes.to_vec())), flavor, format, locale)
            }
            Representation::CharBuffer => {
                if !charset_text {
                    return Err(DataTransferError::unsupported("cannot transfer non-text data as CharBuffer"));
                }
                TransferValue::CharBuffer(self.bytes_to_string(bytes, format, locale)?)
            }
            Representation::CharArray => {
                if !charset_text {
                    return Err(DataTransferError::unsupported("cannot transfer non-text data as char array"));
                }
                TransferValue::CharArray(self.bytes_to_string(bytes, format, locale)?.chars().collect())
            }
            Representation::ByteBuffer => {
                TransferValue::ByteBuffer(Bytes::from(self.native_to_flavor_bytes(bytes, flavor, format, locale)?))
            }
            Representation::ByteArray => {
                TransferValue::ByteArray(self.native_to_flavor_bytes(bytes, flavor, format, locale)?)
            }
            Representation::Remote => TransferValue::Remote(MarshalledObject::unmarshal(bytes, self.serializer.as_ref())?),
            Representation::String | Representation::FileList | Representation::Serializable => {
                self.object_value(flavor, self.serializer.deserialize(bytes)?)?
            }
            Representation::Image => {
                if !self.map.is_image_format(format) {
                    return Err(DataTransferError::unsupported("data translation failed"));
                }
                let native = self.map.require_native(format)?;
                TransferValue::Image(self.image_codec.decode(bytes, native)?)
            }
        };

        Ok(Some(value))
    }

    /// Translate a stream of `format` into a value of `flavor`.
    ///
    /// Byte-stream and reader flavors stay lazy: text is re-encoded as it is
    /// read.
    pub fn translate_stream(
        &self,
        mut stream: Box<dyn Read + Send>,
        flavor: &Flavor,
        format: Format,
        locale: Option<&dyn Transferable>,
    ) -> Result<Option<TransferValue>> {
        if self.map.is_uri_list_format(format) && flavor.is_file_list() {
            return self.read_uri_list(&read_all(&mut stream)?, format).map(Some);
        }

        let charset_text = self.is_charset_text(flavor, format);
        let value = match flavor.representation() {
            Representation::String if charset_text => {
                TransferValue::Text(self.bytes_to_string(&read_all(&mut stream)?, format, locale)?)
            }
            Representation::InputStream => {
                if charset_text {
                    let target = Charset::lookup(&self.flavor_charset(flavor))?;
                    TransferValue::InputStream(self.reencoding_stream(stream, format, target, locale)?)
                } else {
                    TransferValue::InputStream(stream)
                }
            }
            Representation::Reader => {
                if !charset_text {
                    return Err(DataTransferError::unsupported("cannot transfer non-text data as Reader"));
                }
                TransferValue::Reader(self.reencoding_stream(stream, format, Charset::Utf8, locale)?)
            }
            Representation::ByteArray => {
                TransferValue::ByteArray(self.native_to_flavor_bytes(&read_all(&mut stream)?, flavor, format, locale)?)
            }
            Representation::Remote => {
                TransferValue::Remote(MarshalledObject::unmarshal(&read_all(&mut stream)?, self.serializer.as_ref())?)
            }
            Representation::String | Representation::FileList | Representation::Serializable => {
                self.object_value(flavor, self.serializer.deserialize(&read_all(&mut stream)?)?)?
            }
            Representation::Image => {
                if !self.map.is_image_format(format) {
                    return Err(DataTransferError::unsupported("data translation failed"));
                }
                let native = self.map.require_native(format)?;
                TransferValue::Image(self.image_codec.decode(&read_all(&mut stream)?, native)?)
            }
            Representation::CharArray | Representation::CharBuffer | Representation::ByteBuffer => {
                return self.translate_bytes(&read_all(&mut stream)?, flavor, format, locale);
            }
        };

        Ok(Some(value))
    }

    fn reencoding_stream(
        &self,
        stream: Box<dyn Read + Send>,
        format: Format,
        target: Charset,
        locale: Option<&dyn Transferable>,
    ) -> Result<Box<dyn Read + Send>> {
        let source = Charset::lookup(&self.best_charset_for_format(format, locale)?)?;
        Ok(Box::new(ReencodingReader::new(stream, source, target, &self.text_props(format))))
    }

    /// Native text bytes re-encoded in the flavor's charset; raw bytes for
    /// anything but charset text
    fn native_to_flavor_bytes(
        &self,
        bytes: &[u8],
        flavor: &Flavor,
        format: Format,
        locale: Option<&dyn Transferable>,
    ) -> Result<Vec<u8>> {
        if !self.is_charset_text(flavor, format) {
            return Ok(bytes.to_vec());
        }
        let text = self.bytes_to_string(bytes, format, locale)?;
        charset::encode_with(&self.flavor_charset(flavor), &text)
    }

    fn read_uri_list(&self, bytes: &[u8], format: Format) -> Result<TransferValue> {
        let native = self.map.require_native(format)?;
        let charset = native.name_charset().unwrap_or_else(|| "UTF-8".to_string());
        let text = charset::decode_with(&charset, bytes)?;
        Ok(TransferValue::FileList(files::parse_uri_list(&text)))
    }

    fn object_value(&self, flavor: &Flavor, value: Value) -> Result<TransferValue> {
        match (flavor.representation(), value) {
            (Representation::String, Value::String(s)) => Ok(TransferValue::Text(s)),
            (Representation::FileList, Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(PathBuf::from(s)),
                    other => Err(DataTransferError::InvalidData(format!("not a path: {other}"))),
                })
                .collect::<Result<Vec<_>>>()
                .map(TransferValue::FileList),
            (Representation::Serializable, value) => Ok(TransferValue::Serializable(value)),
            (rep, _) => Err(DataTransferError::InvalidData(format!(
                "serialized object does not fit a {} flavor",
                rep.name()
            ))),
        }
    }
}
