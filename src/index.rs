//! Format/flavor negotiation.
//!
//! Given the flavors a data source offers, [`FormatFlavorIndex`] computes
//! which native formats can be exported and from which flavor each should be
//! produced; given the formats a native source offers, it computes which
//! flavors can be imported and from which format.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::flavor::{self, Flavor, Representation, TextClassifier};
use crate::flavor_map::FlavorFormatMap;
use crate::format::Format;
use crate::ranking::{FlavorRanker, IndexOrder, RankTables, Selection};
use crate::translate::Transferable;

/// Formats mapped to the flavor each should be produced from, most
/// preferred format first
#[derive(Debug, Clone, Default)]
pub struct RankedFormats {
    entries: Vec<(Format, Flavor)>,
    indices: HashMap<Format, i64>,
}

impl RankedFormats {
    /// Formats in preference order
    pub fn formats(&self) -> Vec<Format> {
        self.entries.iter().map(|(format, _)| *format).collect()
    }

    /// Flavor to request for `format`
    pub fn get(&self, format: Format) -> Option<&Flavor> {
        self.entries
            .iter()
            .find(|(f, _)| *f == format)
            .map(|(_, flavor)| flavor)
    }

    /// Preference index of `format`
    pub fn index_of(&self, format: Format) -> Option<i64> {
        self.indices.get(&format).copied()
    }

    /// Entries in preference order
    pub fn iter(&self) -> impl Iterator<Item = &(Format, Flavor)> {
        self.entries.iter()
    }

    /// Number of formats
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no format is reachable
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Negotiates between flavors and native formats over a mapping table
#[derive(Debug, Clone)]
pub struct FormatFlavorIndex {
    map: Arc<FlavorFormatMap>,
    classifier: Arc<TextClassifier>,
    tables: Arc<RankTables>,
}

impl FormatFlavorIndex {
    /// Create an index
    pub fn new(map: Arc<FlavorFormatMap>, classifier: Arc<TextClassifier>, tables: Arc<RankTables>) -> Self {
        Self {
            map,
            classifier,
            tables,
        }
    }

    /// Mapping table
    pub fn map(&self) -> &FlavorFormatMap {
        &self.map
    }

    /// Whether the translation layer can handle values of this flavor
    pub fn is_convertible(&self, flavor: &Flavor) -> bool {
        let rep = flavor.representation();
        self.classifier.is_text_type(flavor)
            || flavor.is_file_list()
            || flavor.is_image()
            || rep.is_serializable()
            || rep == Representation::InputStream
            || rep == Representation::Remote
    }

    /// Formats reachable from `flavors`.
    ///
    /// `flavors` is ordered by the source's preference, most preferred
    /// first. When several flavors map to one format the most preferred
    /// flavor wins, except that text/plain and string flavors always win
    /// the formats they map to.
    pub fn formats_for_flavors(&self, flavors: &[Flavor]) -> RankedFormats {
        let mut format_map: HashMap<Format, Flavor> = HashMap::with_capacity(flavors.len());
        let mut index_map: HashMap<Format, i64> = HashMap::with_capacity(flavors.len());
        let mut text_plain_map: HashMap<Format, Flavor> = HashMap::new();
        let mut text_plain_index_map: HashMap<Format, i64> = HashMap::new();

        let string_flavor = flavor::string_flavor();
        let mut current_index: i64 = 0;

        // Least preferred first, so preferred flavors overwrite
        for flavor in flavors.iter().rev() {
            if !self.is_convertible(flavor) {
                trace!(flavor = %flavor, "Skipping flavor with no translation");
                continue;
            }

            let natives = self.map.formats_for_flavor(flavor);
            let span = natives.len() as i64;
            current_index += span;

            let text_plain = (flavor.primary_type() == "text" && flavor.subtype() == "plain")
                || *flavor == string_flavor;

            for &format in natives {
                let index = current_index;
                current_index -= 1;

                format_map.insert(format, flavor.clone());
                index_map.insert(format, index);

                if text_plain {
                    text_plain_map.insert(format, flavor.clone());
                    text_plain_index_map.insert(format, index);
                }
            }

            current_index += span;
        }

        format_map.extend(text_plain_map);
        index_map.extend(text_plain_index_map);

        let order = IndexOrder::new(index_map.clone(), Selection::Best);
        let mut entries: Vec<(Format, Flavor)> = format_map.into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| order.compare(*a, *b));

        debug!(flavors = flavors.len(), formats = entries.len(), "Computed formats for flavors");
        RankedFormats {
            entries,
            indices: index_map,
        }
    }

    /// Formats reachable from a data source's flavors
    pub fn formats_for_transferable(&self, contents: &dyn Transferable) -> RankedFormats {
        self.formats_for_flavors(&contents.transfer_flavors())
    }

    fn convertible_flavors(&self, format: Format) -> impl Iterator<Item = &Flavor> + '_ {
        let flavors = self.map.flavors_for_format(format);
        if flavors.is_empty() && self.map.native(format).is_none() {
            debug!(format = %format, "Offered format is not registered");
        }
        flavors.iter().filter(move |f| self.is_convertible(f))
    }

    /// Flavors importable from `formats`, each mapped to the format it
    /// should be read from.
    ///
    /// The chosen format is the first one in the flavor's own preference
    /// list that was offered and maps back to the flavor.
    pub fn flavors_for_formats(&self, formats: &[Format]) -> HashMap<Flavor, Format> {
        let mut flavor_map: HashMap<Flavor, Format> = HashMap::with_capacity(formats.len());
        let mut mapping_set: HashSet<(Format, &Flavor)> = HashSet::with_capacity(formats.len());
        let mut flavor_set: Vec<&Flavor> = Vec::new();

        for &format in formats {
            for flavor in self.convertible_flavors(format) {
                flavor_map.insert(flavor.clone(), format);
                mapping_set.insert((format, flavor));
                if !flavor_set.contains(&flavor) {
                    flavor_set.push(flavor);
                }
            }
        }

        for flavor in flavor_set {
            let best = self
                .map
                .formats_for_flavor(flavor)
                .iter()
                .find(|&&format| mapping_set.contains(&(format, flavor)));
            if let Some(&format) = best {
                flavor_map.insert(flavor.clone(), format);
            }
        }

        flavor_map
    }

    /// Set of flavors importable from `formats`
    pub fn flavors_for_formats_as_set(&self, formats: &[Format]) -> HashSet<Flavor> {
        formats
            .iter()
            .flat_map(|&format| self.convertible_flavors(format))
            .cloned()
            .collect()
    }

    /// Flavors importable from `formats`, best first
    pub fn flavors_for_formats_sorted(&self, formats: &[Format]) -> Vec<Flavor> {
        let mut flavors: Vec<Flavor> = self.flavors_for_formats_as_set(formats).into_iter().collect();
        self.ranker(Selection::Best).sort(&mut flavors);
        flavors
    }

    /// Flavor ranker sharing this index's tables
    pub fn ranker(&self, selection: Selection) -> FlavorRanker {
        FlavorRanker::new(Arc::clone(&self.tables), Arc::clone(&self.classifier), selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatKind, NativeFormat, TextFormatProperties};

    fn flavor(s: &str) -> Flavor {
        Flavor::parse(s).unwrap()
    }

    fn index(map: FlavorFormatMap) -> FormatFlavorIndex {
        FormatFlavorIndex::new(
            Arc::new(map),
            Arc::new(TextClassifier::default()),
            Arc::new(RankTables::default()),
        )
    }

    #[test]
    fn test_most_preferred_flavor_wins() {
        let f1 = flavor("application/x-one; class=stream");
        let f2 = flavor("application/x-two; class=stream");
        let f3 = flavor("application/x-three; class=stream");

        let mut map = FlavorFormatMap::new();
        for f in [&f1, &f2, &f3] {
            map.add_mapping(f.clone(), Format(42));
        }

        // Most preferred first
        let ranked = index(map).formats_for_flavors(&[f3.clone(), f2, f1]);
        assert_eq!(ranked.get(Format(42)), Some(&f3));
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_format_order_follows_flavor_preference() {
        let html = flavor("text/html; class=string");
        let custom = flavor("application/x-custom; class=stream");

        let mut map = FlavorFormatMap::new();
        map.add_mapping(html.clone(), Format(0xD010));
        map.add_mapping(html.clone(), Format(1));
        map.add_mapping(custom.clone(), Format(0xC001));

        let ranked = index(map).formats_for_flavors(&[custom.clone(), html.clone()]);
        assert_eq!(ranked.formats(), vec![Format(0xC001), Format(0xD010), Format(1)]);
        assert!(ranked.index_of(Format(0xC001)) > ranked.index_of(Format(0xD010)));
    }

    #[test]
    fn test_text_plain_promotion() {
        let html = flavor("text/html; class=string");
        let plain = flavor("text/plain; class=string");

        let mut map = FlavorFormatMap::new();
        map.add_mapping(html.clone(), Format(1));
        map.add_mapping(plain.clone(), Format(1));

        // html is preferred, but text/plain still supplies the plain format
        let ranked = index(map).formats_for_flavors(&[html, plain.clone()]);
        assert_eq!(ranked.get(Format(1)), Some(&plain));
    }

    #[test]
    fn test_unconvertible_flavors_skipped() {
        let odd = flavor("application/x-odd; class=char-buffer");
        let mut map = FlavorFormatMap::new();
        map.add_mapping(odd.clone(), Format(9));

        let ranked = index(map).formats_for_flavors(&[odd]);
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_flavors_for_formats_prefers_flavor_order() {
        let text = flavor("text/plain; class=string");
        let mut map = FlavorFormatMap::new();
        map.register_format(
            NativeFormat::new(13u64, "CF_UNICODETEXT", FormatKind::Plain)
                .with_text(TextFormatProperties::register(Some("UTF-16LE"), Some("\r\n"), 2, "UTF-8")),
        )
        .unwrap();
        map.register_format(
            NativeFormat::new(1u64, "CF_TEXT", FormatKind::Plain)
                .with_text(TextFormatProperties::register(Some("windows-1252"), Some("\r\n"), 1, "UTF-8")),
        )
        .unwrap();
        map.add_mapping(text.clone(), Format(13));
        map.add_mapping(text.clone(), Format(1));

        let idx = index(map);
        // Offered order does not matter: the flavor's own preference does
        let flavors = idx.flavors_for_formats(&[Format(1), Format(13)]);
        assert_eq!(flavors.get(&text), Some(&Format(13)));

        let flavors = idx.flavors_for_formats(&[Format(1)]);
        assert_eq!(flavors.get(&text), Some(&Format(1)));
    }

    #[test]
    fn test_one_way_mapping_not_chosen() {
        let text = flavor("text/plain; class=string");
        let mut map = FlavorFormatMap::new();
        // The flavor prefers 5, but 5 never maps back to the flavor
        map.add_format_for_flavor(text.clone(), Format(5));
        map.add_mapping(text.clone(), Format(6));

        let flavors = index(map).flavors_for_formats(&[Format(5), Format(6)]);
        assert_eq!(flavors.get(&text), Some(&Format(6)));
    }

    #[test]
    fn test_flavors_sorted_best_first() {
        let mut map = FlavorFormatMap::new();
        let reader = flavor("text/plain; class=reader");
        let chars = flavor("text/plain; class=char-array");
        let html = flavor("text/html; class=string");
        for f in [&chars, &html, &reader] {
            map.add_mapping(f.clone(), Format(13));
        }

        let idx = index(map);
        assert_eq!(idx.flavors_for_formats_as_set(&[Format(13)]).len(), 3);
        assert_eq!(idx.flavors_for_formats_sorted(&[Format(13)]), vec![reader, chars, html]);
    }
}
