//! Flavor/format mapping table.
//!
//! A many-to-many relation kept in both directions, each side ordered by
//! preference. The two directions are independent: a flavor may list a
//! format that does not list the flavor back.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::error::{DataTransferError, Result};
use crate::flavor::{self, Flavor};
use crate::format::{Format, FormatKind, NativeFormat, TextFormatProperties};

/// Registered natives plus the flavor/format relation
#[derive(Debug, Clone, Default)]
pub struct FlavorFormatMap {
    natives: BTreeMap<Format, NativeFormat>,
    by_name: HashMap<String, Format>,
    formats_by_flavor: HashMap<Flavor, Vec<Format>>,
    flavors_by_format: HashMap<Format, Vec<Flavor>>,
}

impl FlavorFormatMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native format.
    ///
    /// Re-registering an id replaces the native and drops every mapping
    /// made for the old one, since its flavors were derived from metadata
    /// that no longer holds.
    pub fn register_format(&mut self, native: NativeFormat) -> Result<()> {
        if let Some(&existing) = self.by_name.get(&native.name) {
            if existing != native.id {
                return Err(DataTransferError::InvalidData(format!(
                    "native name {} already registered as format {existing}",
                    native.name
                )));
            }
        }
        if let Some(old) = self.natives.remove(&native.id) {
            warn!(format = %native.id, old = %old.name, new = %native.name, "Replacing native format");
            self.by_name.remove(&old.name);
            self.remove_mappings(native.id);
        }

        debug!(format = %native.id, name = %native.name, kind = ?native.kind, "Registered native format");
        self.by_name.insert(native.name.clone(), native.id);
        self.natives.insert(native.id, native);
        Ok(())
    }

    fn remove_mappings(&mut self, format: Format) {
        self.flavors_by_format.remove(&format);
        self.formats_by_flavor.retain(|_, formats| {
            formats.retain(|&f| f != format);
            !formats.is_empty()
        });
    }

    /// Map `flavor` to `format` in both directions
    pub fn add_mapping(&mut self, flavor: Flavor, format: Format) {
        self.add_format_for_flavor(flavor.clone(), format);
        self.add_flavor_for_format(format, flavor);
    }

    /// One-way mapping: `flavor` can be exported as `format`
    pub fn add_format_for_flavor(&mut self, flavor: Flavor, format: Format) {
        let formats = self.formats_by_flavor.entry(flavor).or_default();
        if !formats.contains(&format) {
            formats.push(format);
        }
    }

    /// One-way mapping: `format` can be imported as `flavor`
    pub fn add_flavor_for_format(&mut self, format: Format, flavor: Flavor) {
        let flavors = self.flavors_by_format.entry(format).or_default();
        if !flavors.contains(&flavor) {
            flavors.push(flavor);
        }
    }

    /// Map the standard text flavors of `subtype` to a text format.
    ///
    /// Byte flavors in the format's own charset come first, followed by
    /// byte flavors in each of `encodings`.
    pub fn add_text_mappings(&mut self, format: Format, subtype: &str, encodings: &[String]) {
        let charset = self
            .text_properties(format)
            .map(|props| props.charset.clone());
        for flavor in flavor::text_flavors_for(subtype, charset.as_deref()) {
            self.add_mapping(flavor, format);
        }
        for encoding in encodings {
            for flavor in flavor::encoded_text_flavors(subtype, encoding) {
                self.add_mapping(flavor, format);
            }
        }
    }

    /// Formats for a flavor, most preferred first
    pub fn formats_for_flavor(&self, flavor: &Flavor) -> &[Format] {
        self.formats_by_flavor
            .get(flavor)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Flavors for a format, most preferred first
    pub fn flavors_for_format(&self, format: Format) -> &[Flavor] {
        self.flavors_by_format
            .get(&format)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Registered native
    pub fn native(&self, format: Format) -> Option<&NativeFormat> {
        self.natives.get(&format)
    }

    /// Registered native, failing for unknown ids
    pub fn require_native(&self, format: Format) -> Result<&NativeFormat> {
        self.native(format)
            .ok_or(DataTransferError::UnknownFormat(format))
    }

    /// Format registered under a native name
    pub fn format_for_name(&self, name: &str) -> Option<Format> {
        self.by_name.get(name).copied()
    }

    /// All registered natives ordered by id
    pub fn natives(&self) -> impl Iterator<Item = &NativeFormat> {
        self.natives.values()
    }

    /// Text metadata of a format
    pub fn text_properties(&self, format: Format) -> Option<&TextFormatProperties> {
        self.native(format).and_then(|n| n.text.as_ref())
    }

    /// Whether text metadata was registered for the format
    pub fn is_text_format(&self, format: Format) -> bool {
        self.text_properties(format).is_some()
    }

    /// Whether the format is a platform file list
    pub fn is_file_format(&self, format: Format) -> bool {
        self.kind(format) == Some(FormatKind::FileList)
    }

    /// Whether the format is a URI list
    pub fn is_uri_list_format(&self, format: Format) -> bool {
        self.kind(format) == Some(FormatKind::UriList)
    }

    /// Whether the format is an image format
    pub fn is_image_format(&self, format: Format) -> bool {
        self.kind(format) == Some(FormatKind::Image)
    }

    /// Whether the format's charset travels with the data
    pub fn is_locale_dependent(&self, format: Format) -> bool {
        self.native(format).is_some_and(|n| n.locale_dependent)
    }

    fn kind(&self, format: Format) -> Option<FormatKind> {
        self.native(format).map(|n| n.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format_id;

    fn unicode_text() -> NativeFormat {
        NativeFormat::new(format_id::CF_UNICODETEXT, "CF_UNICODETEXT", FormatKind::Plain)
            .with_text(TextFormatProperties::register(Some("UTF-16LE"), Some("\r\n"), 2, "UTF-8"))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut map = FlavorFormatMap::new();
        map.register_format(unicode_text()).unwrap();

        let format = Format(format_id::CF_UNICODETEXT);
        assert_eq!(map.format_for_name("CF_UNICODETEXT"), Some(format));
        assert!(map.is_text_format(format));
        assert!(!map.is_file_format(format));
        assert_eq!(map.text_properties(format).unwrap().charset, "UTF-16LE");
        assert!(map.require_native(Format(999)).is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut map = FlavorFormatMap::new();
        map.register_format(unicode_text()).unwrap();
        let clash = NativeFormat::new(99u64, "CF_UNICODETEXT", FormatKind::Plain);
        assert!(map.register_format(clash).is_err());
    }

    #[test]
    fn test_mapping_order_and_dedup() {
        let mut map = FlavorFormatMap::new();
        let flavor = Flavor::parse("text/plain; class=string").unwrap();
        map.add_mapping(flavor.clone(), Format(13));
        map.add_mapping(flavor.clone(), Format(1));
        map.add_mapping(flavor.clone(), Format(13));

        assert_eq!(map.formats_for_flavor(&flavor), &[Format(13), Format(1)]);
        assert_eq!(map.flavors_for_format(Format(1)), &[flavor]);
        assert!(map.flavors_for_format(Format(7)).is_empty());
    }

    #[test]
    fn test_one_way_mapping() {
        let mut map = FlavorFormatMap::new();
        let flavor = Flavor::parse("image/png").unwrap();
        map.add_format_for_flavor(flavor.clone(), Format(5));
        assert_eq!(map.formats_for_flavor(&flavor), &[Format(5)]);
        assert!(map.flavors_for_format(Format(5)).is_empty());
    }

    #[test]
    fn test_text_mappings_carry_charset() {
        let mut map = FlavorFormatMap::new();
        map.register_format(unicode_text()).unwrap();
        map.add_text_mappings(Format(format_id::CF_UNICODETEXT), "plain", &[]);

        let flavors = map.flavors_for_format(Format(format_id::CF_UNICODETEXT));
        assert_eq!(flavors.len(), 7);
        assert!(flavors
            .iter()
            .filter(|f| f.representation().is_encoded_text())
            .all(|f| f.charset() == Some("UTF-16LE")));
    }

    #[test]
    fn test_text_mappings_cover_encodings() {
        let mut map = FlavorFormatMap::new();
        map.register_format(unicode_text()).unwrap();
        let encodings = vec!["UTF-8".to_string(), "UTF-16LE".to_string()];
        map.add_text_mappings(Format(format_id::CF_UNICODETEXT), "plain", &encodings);

        // UTF-16LE byte flavors are not mapped twice
        assert_eq!(map.flavors_for_format(Format(format_id::CF_UNICODETEXT)).len(), 10);

        let utf8 = Flavor::parse("text/plain; charset=utf-8; class=byte-array").unwrap();
        assert_eq!(map.formats_for_flavor(&utf8), &[Format(format_id::CF_UNICODETEXT)]);
    }

    #[test]
    fn test_replacing_format_drops_old_mappings() {
        let mut map = FlavorFormatMap::new();
        map.register_format(unicode_text()).unwrap();
        map.add_text_mappings(Format(format_id::CF_UNICODETEXT), "plain", &[]);
        let shared = Flavor::parse("text/plain; class=string").unwrap();
        map.add_mapping(shared.clone(), Format(format_id::CF_TEXT));

        let replacement = NativeFormat::new(format_id::CF_UNICODETEXT, "UTF8_STRING", FormatKind::Plain)
            .with_text(TextFormatProperties::register(Some("UTF-8"), None, 1, "UTF-8"));
        map.register_format(replacement).unwrap();

        let format = Format(format_id::CF_UNICODETEXT);
        assert!(map.flavors_for_format(format).is_empty());
        assert_eq!(map.formats_for_flavor(&shared), &[Format(format_id::CF_TEXT)]);
        let stale = Flavor::parse("text/plain; charset=UTF-16LE; class=byte-array").unwrap();
        assert!(map.formats_for_flavor(&stale).is_empty());
        assert_eq!(map.format_for_name("CF_UNICODETEXT"), None);
        assert_eq!(map.format_for_name("UTF8_STRING"), Some(format));

        // New mappings carry the new charset
        map.add_text_mappings(format, "plain", &[]);
        let utf8 = Flavor::parse("text/plain; charset=UTF-8; class=byte-array").unwrap();
        assert_eq!(map.formats_for_flavor(&utf8), &[format]);
    }
}
