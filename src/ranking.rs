//! Flavor and charset ranking.
//!
//! All rank tables are built once by [`RankTables::new`] and shared by
//! reference. Rankers compare two items and, depending on [`Selection`],
//! sort either the best or the worst item first.
//!
//! Internally every comparison is first computed as a *score* ordering,
//! where `Greater` means "left is better", and then oriented.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::charset;
use crate::flavor::{Flavor, Representation, TextClassifier, SERIALIZED_OBJECT_MIME};
use crate::format::Format;

/// Bucket shared by every unsupported charset
pub const UNSUPPORTED_CHARSET: &str = "UNSUPPORTED";

const DEFAULT_CHARSET_INDEX: i32 = 2;
const OTHER_CHARSET_INDEX: i32 = 1;
const WORST_CHARSET_INDEX: i32 = 0;
const UNSUPPORTED_CHARSET_INDEX: i32 = i32::MIN;

const UNKNOWN_OBJECT_LOSES: i32 = i32::MIN;
const UNKNOWN_OBJECT_WINS: i32 = i32::MAX;

/// Sort orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selection {
    /// Best element first
    Best,
    /// Worst element first
    Worst,
}

impl Selection {
    /// Turn a score ordering (`Greater` = left is better) into a sort ordering
    pub fn orient(self, score: Ordering) -> Ordering {
        match self {
            Self::Best => score.reverse(),
            Self::Worst => score,
        }
    }
}

fn compare_indices<K, Q>(map: &HashMap<K, i32>, a: &Q, b: &Q, fallback: i32) -> Ordering
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    let ia = map.get(a).copied().unwrap_or(fallback);
    let ib = map.get(b).copied().unwrap_or(fallback);
    ia.cmp(&ib)
}

// =============================================================================
// Tables
// =============================================================================

/// Immutable rank tables
#[derive(Debug, Clone)]
pub struct RankTables {
    charsets: HashMap<String, i32>,
    default_charset: String,
    text_types: HashMap<&'static str, i32>,
    decoded_text: HashMap<Representation, i32>,
    encoded_text: HashMap<Representation, i32>,
    primary_types: HashMap<&'static str, i32>,
    exact_types: HashMap<&'static str, i32>,
    non_text: HashMap<Representation, i32>,
}

impl RankTables {
    /// Build every table. `default_charset` takes the place of the
    /// platform default charset.
    pub fn new(default_charset: &str) -> Self {
        let default_charset = charset::canonical_name(default_charset);

        let mut charsets: HashMap<String, i32> = [
            ("UTF-16LE", 4),
            ("UTF-16BE", 5),
            ("UTF-8", 6),
            ("UTF-16", 7),
            ("US-ASCII", WORST_CHARSET_INDEX),
        ]
        .into_iter()
        .map(|(name, rank)| (charset::canonical_name(name), rank))
        .collect();
        charsets
            .entry(default_charset.clone())
            .or_insert(DEFAULT_CHARSET_INDEX);
        charsets.insert(UNSUPPORTED_CHARSET.to_string(), UNSUPPORTED_CHARSET_INDEX);

        // text/plain ranks highest, stringFlavor's type lowest
        let text_types = [
            SERIALIZED_OBJECT_MIME,
            "text/calendar",
            "text/css",
            "text/directory",
            "text/parityfec",
            "text/rfc822-headers",
            "text/t140",
            "text/tab-separated-values",
            "text/uri-list",
            "text/richtext",
            "text/enriched",
            "text/rtf",
            "text/html",
            "text/xml",
            "text/sgml",
            "text/plain",
        ]
        .into_iter()
        .zip(0..)
        .collect();

        let decoded_text = [
            (Representation::CharArray, 0),
            (Representation::CharBuffer, 1),
            (Representation::String, 2),
            (Representation::Reader, 3),
        ]
        .into_iter()
        .collect();

        let encoded_text = [
            (Representation::ByteArray, 0),
            (Representation::ByteBuffer, 1),
            (Representation::InputStream, 2),
        ]
        .into_iter()
        .collect();

        let primary_types = [("application", 0)].into_iter().collect();

        let exact_types = [
            ("application/x-java-file-list", 0),
            (SERIALIZED_OBJECT_MIME, 1),
            ("application/x-java-jvm-local-objectref", 2),
            ("application/x-java-remote-object", 3),
        ]
        .into_iter()
        .collect();

        let non_text = [
            (Representation::InputStream, 0),
            (Representation::Serializable, 1),
            (Representation::Remote, 2),
        ]
        .into_iter()
        .collect();

        Self {
            charsets,
            default_charset,
            text_types,
            decoded_text,
            encoded_text,
            primary_types,
            exact_types,
            non_text,
        }
    }

    /// Canonical default charset
    pub fn default_charset(&self) -> &str {
        &self.default_charset
    }

    /// Ranking key of a charset name.
    ///
    /// Unsupported names collapse to [`UNSUPPORTED_CHARSET`]. Supported names
    /// are canonicalized only when the canonical form has its own rank, so
    /// other charsets keep their spelling for the alphabetical tie-break.
    pub fn encoding_key(&self, name: &str) -> String {
        if !charset::is_encoding_supported(name) {
            return UNSUPPORTED_CHARSET.to_string();
        }
        let canonical = charset::canonical_name(name);
        if self.charsets.contains_key(&canonical) {
            canonical
        } else {
            name.to_string()
        }
    }

    /// Score ordering of two charset names
    pub fn charset_score(&self, a: &str, b: &str) -> Ordering {
        let a = self.encoding_key(a);
        let b = self.encoding_key(b);

        match compare_indices(&self.charsets, a.as_str(), b.as_str(), OTHER_CHARSET_INDEX) {
            // Lexicographically smaller ranks better
            Ordering::Equal => b.cmp(&a),
            other => other,
        }
    }
}

impl Default for RankTables {
    fn default() -> Self {
        Self::new(charset::DEFAULT_CHARSET)
    }
}

// =============================================================================
// Rankers
// =============================================================================

/// Charset comparator
#[derive(Debug, Clone)]
pub struct CharsetRanker {
    tables: Arc<RankTables>,
    selection: Selection,
}

impl CharsetRanker {
    /// Create a ranker
    pub fn new(tables: Arc<RankTables>, selection: Selection) -> Self {
        Self { tables, selection }
    }

    /// Compare two charset names
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.selection.orient(self.tables.charset_score(a, b))
    }

    /// Sort charset names in place
    pub fn sort<S: AsRef<str>>(&self, names: &mut [S]) {
        names.sort_by(|a, b| self.compare(a.as_ref(), b.as_ref()));
    }
}

/// Flavor comparator
#[derive(Debug, Clone)]
pub struct FlavorRanker {
    tables: Arc<RankTables>,
    classifier: Arc<TextClassifier>,
    selection: Selection,
}

impl FlavorRanker {
    /// Create a ranker
    pub fn new(tables: Arc<RankTables>, classifier: Arc<TextClassifier>, selection: Selection) -> Self {
        Self {
            tables,
            classifier,
            selection,
        }
    }

    /// Compare two flavors
    pub fn compare(&self, a: &Flavor, b: &Flavor) -> Ordering {
        self.selection.orient(self.score(a, b))
    }

    /// Sort flavors in place
    pub fn sort(&self, flavors: &mut [Flavor]) {
        flavors.sort_by(|a, b| self.compare(a, b));
    }

    /// Best flavor of a set
    pub fn best<'a>(&self, flavors: impl IntoIterator<Item = &'a Flavor>) -> Option<&'a Flavor> {
        flavors.into_iter().max_by(|a, b| self.score(a, b))
    }

    fn score(&self, a: &Flavor, b: &Flavor) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }

        let t = &self.tables;
        let mime_a = a.mime().base_type();
        let mime_b = b.mime().base_type();
        let rep_a = a.representation();
        let rep_b = b.representation();

        let keyed = if self.classifier.is_text_type(a) && self.classifier.is_text_type(b) {
            compare_indices(&t.text_types, mime_a.as_str(), mime_b.as_str(), UNKNOWN_OBJECT_LOSES)
                .then_with(|| {
                    // Both sides share a MIME type here, so checking one suffices
                    if !self.classifier.subtype_supports_charset(a) {
                        return Ordering::Equal;
                    }
                    compare_indices(&t.decoded_text, &rep_a, &rep_b, UNKNOWN_OBJECT_LOSES).then_with(
                        || match (self.classifier.text_charset(a), self.classifier.text_charset(b)) {
                            (Some(ca), Some(cb)) => t.charset_score(&ca, &cb),
                            _ => Ordering::Equal,
                        },
                    )
                })
                .then_with(|| {
                    compare_indices(&t.encoded_text, &rep_a, &rep_b, UNKNOWN_OBJECT_LOSES)
                })
        } else {
            // Mixed pairs land here too: "application" beats "text"
            compare_indices(
                &t.primary_types,
                a.primary_type(),
                b.primary_type(),
                UNKNOWN_OBJECT_LOSES,
            )
            .then_with(|| {
                // Custom MIME types are the most descriptive, so unknown wins
                compare_indices(&t.exact_types, mime_a.as_str(), mime_b.as_str(), UNKNOWN_OBJECT_WINS)
            })
            .then_with(|| compare_indices(&t.non_text, &rep_a, &rep_b, UNKNOWN_OBJECT_LOSES))
        };

        keyed.then_with(|| a.mime_string().cmp(&b.mime_string()))
    }
}

/// Orders formats by their preference index
#[derive(Debug, Clone)]
pub struct IndexOrder {
    indices: HashMap<Format, i64>,
    selection: Selection,
}

impl IndexOrder {
    /// Create an order over `indices`; formats without an index rank lowest
    pub fn new(indices: HashMap<Format, i64>, selection: Selection) -> Self {
        Self { indices, selection }
    }

    /// Preference index of a format
    pub fn index_of(&self, format: Format) -> i64 {
        self.indices.get(&format).copied().unwrap_or(i64::MIN)
    }

    /// Compare two formats
    pub fn compare(&self, a: Format, b: Format) -> Ordering {
        self.selection
            .orient(self.index_of(a).cmp(&self.index_of(b)))
            .then_with(|| a.cmp(&b))
    }
}

/// Charsets every text flavor is offered in, best first
pub fn standard_encodings(tables: &Arc<RankTables>) -> Vec<String> {
    let ranker = CharsetRanker::new(Arc::clone(tables), Selection::Best);
    let mut names: Vec<String> = [
        "US-ASCII",
        "ISO-8859-1",
        "UTF-8",
        "UTF-16BE",
        "UTF-16LE",
        "UTF-16",
        tables.default_charset(),
    ]
    .into_iter()
    .map(str::to_string)
    .collect();

    ranker.sort(&mut names);
    names.dedup_by(|a, b| ranker.compare(a, b) == Ordering::Equal);
    names
}
