//! # lamco-datatransfer
//!
//! Clipboard and drag-and-drop data transfer engine.
//!
//! Converts payloads between platform **native formats** (numeric
//! identifiers such as `CF_UNICODETEXT = 13`) and in-process **flavors**
//! (MIME types paired with a representation kind).
//!
//! # Architecture
//!
//! ```text
//! lamco-datatransfer
//!   ├─> FlavorFormatMap   (ordered flavor ↔ format relation, native registry)
//!   ├─> FormatFlavorIndex (which formats / flavors are reachable, and from what)
//!   ├─> FlavorRanker      (total order over flavors and charsets)
//!   ├─> Text transcoding  (charsets, EOLN, NUL terminators, streaming)
//!   ├─> DataTransferer    (value ↔ native bytes per representation kind)
//!   └─> Hand-off          (run conversions on the data source's owning thread)
//! ```
//!
//! # Data Flow
//!
//! **Export:** Transferable → formats_for_transferable → translate_transferable → native bytes
//!
//! **Import:** native formats → flavors_for_formats → translate_bytes / translate_stream → value
//!
//! # Example
//!
//! ```no_run
//! use lamco_datatransfer::prelude::*;
//!
//! let engine = DataTransferConfig::windows_defaults().build_transferer()?;
//! let source = TextTransferable::new("hello\n");
//!
//! let ranked = engine.formats_for_transferable(&source);
//! for (format, flavor) in ranked.iter() {
//!     let bytes = engine.translate_transferable(&source, flavor, *format)?;
//!     println!("{format}: {:?}", bytes.map(|b| b.len()));
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// Data model
// =============================================================================

/// Flavors, MIME types and text classification
pub mod flavor;

/// Native format identifiers and per-format text metadata
pub mod format;

/// Flavor/format mapping table
pub mod flavor_map;

// =============================================================================
// Negotiation
// =============================================================================

/// Format/flavor negotiation
///
/// Computes which formats a data source can be exported as, and which
/// flavors an offered set of formats can be imported as.
pub mod index;

/// Flavor and charset ranking
pub mod ranking;

// =============================================================================
// Translation
// =============================================================================

/// Charset registry and incremental coders
pub mod charset;

/// Native text encoding: EOLN, NUL terminators, streaming re-encoding
pub mod text;

/// File list payloads and export filtering
pub mod files;

/// Image payloads
pub mod image;

/// Serializable and remote object payloads
pub mod object;

/// Payload translation entry points
pub mod translate;

/// Owner-thread conversion hand-off
pub mod handoff;

// =============================================================================
// Ambient
// =============================================================================

/// Format table configuration
pub mod config;

/// Error types
pub mod error;

pub use error::{DataTransferError, Result};

/// Common imports
pub mod prelude {
    pub use crate::config::DataTransferConfig;
    pub use crate::error::{DataTransferError, Result};
    pub use crate::flavor::{Flavor, MimeType, Representation};
    pub use crate::flavor_map::FlavorFormatMap;
    pub use crate::format::{Format, FormatKind, NativeFormat, TextFormatProperties};
    pub use crate::handoff::{ChannelDispatcher, EventDispatcher};
    pub use crate::index::{FormatFlavorIndex, RankedFormats};
    pub use crate::ranking::{FlavorRanker, Selection};
    pub use crate::translate::{DataTransferer, TextTransferable, TransferValue, Transferable};
}
