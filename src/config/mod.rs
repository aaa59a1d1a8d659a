//! Configuration management
//!
//! The format table is loaded from TOML. Each entry registers one native
//! format, its text metadata and the flavors mapped to it:
//!
//! ```toml
//! default_charset = "UTF-8"
//!
//! [[formats]]
//! id = 13
//! name = "CF_UNICODETEXT"
//! flavors = ["text/plain"]
//! text = { charset = "UTF-16LE", eoln = "\r\n", terminators = 2 }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::charset;
use crate::files::UntrustedCacheDirs;
use crate::flavor::{self, Flavor, TextClassifier};
use crate::flavor_map::FlavorFormatMap;
use crate::format::{format_id, Format, FormatKind, NativeFormat, TextFormatProperties};
use crate::ranking::{standard_encodings, RankTables};
use crate::translate::DataTransferer;

pub mod types;

pub use types::{FormatEntry, InvalidTerminators, TerminatorCount, TextEntry};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransferConfig {
    /// Charset used where neither flavor nor format names one
    #[serde(default = "default_charset")]
    pub default_charset: String,

    /// Map every standard text flavor of a text format's subtypes
    #[serde(default = "default_true")]
    pub expand_text_flavors: bool,

    /// Properties consulted for untrusted cache directories
    #[serde(default)]
    pub properties: HashMap<String, String>,

    /// Native format table, in preference order
    #[serde(default)]
    pub formats: Vec<FormatEntry>,
}

fn default_charset() -> String {
    charset::DEFAULT_CHARSET.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DataTransferConfig {
    fn default() -> Self {
        Self {
            default_charset: default_charset(),
            expand_text_flavors: true,
            properties: HashMap::new(),
            formats: Vec::new(),
        }
    }
}

impl DataTransferConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !charset::is_encoding_supported(&self.default_charset) {
            anyhow::bail!("Unsupported default charset: {}", self.default_charset);
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for entry in &self.formats {
            if !ids.insert(entry.id) {
                anyhow::bail!("Duplicate format id: {}", entry.id);
            }
            if entry.name.is_empty() {
                anyhow::bail!("Format {} has an empty name", entry.id);
            }
            if !names.insert(entry.name.as_str()) {
                anyhow::bail!("Duplicate format name: {}", entry.name);
            }

            for flavor in &entry.flavors {
                Flavor::parse(flavor)
                    .with_context(|| format!("Invalid flavor for format {}: {}", entry.name, flavor))?;
            }

            if let Some(text) = &entry.text {
                if let Some(cs) = text.charset.as_deref().filter(|c| !c.is_empty()) {
                    if !charset::is_encoding_supported(cs) {
                        anyhow::bail!("Unsupported charset for format {}: {}", entry.name, cs);
                    }
                }
                if let Some(terminators) = &text.terminators {
                    terminators
                        .resolve()
                        .with_context(|| format!("Format {}", entry.name))?;
                }
            }
        }

        Ok(())
    }

    /// Table for the common Windows clipboard formats
    pub fn windows_defaults() -> Self {
        let text = |charset: &str, terminators: i64| TextEntry {
            charset: Some(charset.to_string()),
            eoln: Some("\r\n".to_string()),
            terminators: Some(TerminatorCount::Count(terminators)),
        };
        let entry = |id: u64, name: &str, kind: FormatKind, flavors: &[&str]| FormatEntry {
            id,
            name: name.to_string(),
            kind,
            locale_dependent: false,
            flavors: flavors.iter().map(|f| (*f).to_string()).collect(),
            text: None,
        };

        let file_list = flavor::file_list_flavor().to_string();
        let image = flavor::image_flavor().to_string();

        let formats = vec![
            FormatEntry {
                text: Some(text("UTF-16LE", 2)),
                ..entry(format_id::CF_UNICODETEXT, "CF_UNICODETEXT", FormatKind::Plain, &["text/plain"])
            },
            FormatEntry {
                locale_dependent: true,
                text: Some(text("windows-1252", 1)),
                ..entry(format_id::CF_TEXT, "CF_TEXT", FormatKind::Plain, &["text/plain"])
            },
            FormatEntry {
                locale_dependent: true,
                text: Some(text("IBM437", 1)),
                ..entry(format_id::CF_OEMTEXT, "CF_OEMTEXT", FormatKind::Plain, &["text/plain"])
            },
            FormatEntry {
                text: Some(text("UTF-8", 1)),
                ..entry(format_id::CF_HTML, "HTML Format", FormatKind::Plain, &["text/html"])
            },
            FormatEntry {
                text: Some(text("US-ASCII", 1)),
                ..entry(format_id::CF_RTF, "Rich Text Format", FormatKind::Plain, &["text/rtf"])
            },
            entry(format_id::CF_LOCALE, "CF_LOCALE", FormatKind::Plain, &[]),
            entry(format_id::CF_HDROP, "CF_HDROP", FormatKind::FileList, &[&file_list]),
            entry(format_id::CF_URI_LIST, "text/uri-list;charset=utf-8", FormatKind::UriList, &[&file_list]),
            entry(format_id::CF_PNG, "PNG", FormatKind::Image, &[&image]),
            entry(format_id::CF_DIB, "CF_DIB", FormatKind::Image, &[&image]),
        ];

        Self {
            formats,
            ..Self::default()
        }
    }

    /// Build the flavor/format table
    pub fn build_map(&self) -> Result<FlavorFormatMap> {
        let default_charset = charset::canonical_name(&self.default_charset);
        let encodings = standard_encodings(&Arc::new(RankTables::new(&default_charset)));
        let classifier = TextClassifier::new(default_charset.clone());
        let mut map = FlavorFormatMap::new();

        for entry in &self.formats {
            let mut native = NativeFormat::new(entry.id, entry.name.clone(), entry.kind)
                .locale_dependent(entry.locale_dependent);

            if let Some(text) = &entry.text {
                let terminators = match &text.terminators {
                    Some(t) => t.resolve()?,
                    None => 0,
                };
                native = native.with_text(TextFormatProperties::register(
                    text.charset.as_deref(),
                    text.eoln.as_deref(),
                    terminators,
                    &default_charset,
                ));
            }

            map.register_format(native)
                .with_context(|| format!("Failed to register format {}", entry.name))?;

            let format = Format(entry.id);
            for flavor in &entry.flavors {
                let flavor = Flavor::parse(flavor)?;

                if self.expand_text_flavors && entry.text.is_some() && flavor.primary_type() == "text" {
                    if flavor.subtype() == "plain" {
                        map.add_mapping(flavor::string_flavor(), format);
                    }
                    // Subtypes without a charset parameter have a single byte form
                    let encodings = if classifier.subtype_supports_charset(&flavor) {
                        encodings.as_slice()
                    } else {
                        &[]
                    };
                    map.add_text_mappings(format, flavor.subtype(), encodings);
                }
                map.add_mapping(flavor, format);
            }
        }

        debug!(formats = self.formats.len(), "Built format table");
        Ok(map)
    }

    /// Build a translation engine over this table
    pub fn build_transferer(&self) -> Result<DataTransferer> {
        let map = self.build_map()?;
        Ok(DataTransferer::new(map, &self.default_charset)
            .with_cache_dirs(UntrustedCacheDirs::new(self.properties.clone())))
    }
}
