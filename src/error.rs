//! Data Transfer Error Types
//!
//! Error handling for flavor negotiation and payload translation.
//!
//! A missing payload is not an error: translation entry points return
//! `Ok(None)` when the data source has nothing to offer.

use thiserror::Error;

use crate::format::Format;

/// Result type for data transfer operations
pub type Result<T> = std::result::Result<T, DataTransferError>;

/// Data transfer error types
#[derive(Error, Debug)]
pub enum DataTransferError {
    /// The (representation, format) pairing has no conversion
    #[error("data translation failed: {0}")]
    UnsupportedConversion(String),

    /// Stream read/write or filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Charset name not recognized
    #[error("unsupported encoding: {0}")]
    EncodingUnsupported(String),

    /// Format is not registered in the flavor/format map
    #[error("unknown format: {0}")]
    UnknownFormat(Format),

    /// Flavor string could not be parsed
    #[error("invalid flavor: {0}")]
    InvalidFlavor(String),

    /// Payload structure is malformed
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Image decode error
    #[error("image decode error: {0}")]
    ImageDecode(String),

    /// Image encode error
    #[error("image encode error: {0}")]
    ImageEncode(String),

    /// Object graph (de)serialization failed
    #[error("object serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The owning thread dropped a hand-off job without answering
    #[error("hand-off job dropped before completion")]
    HandoffDisconnected,
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Conversion between representation and format is not possible
    Conversion,
    /// Payload or charset problems
    DataValidation,
    /// I/O and filesystem errors
    Io,
    /// Cross-thread communication errors
    Communication,
}

/// Classify error
pub fn classify_error(error: &DataTransferError) -> ErrorKind {
    match error {
        DataTransferError::UnsupportedConversion(_)
        | DataTransferError::UnknownFormat(_)
        | DataTransferError::ImageDecode(_)
        | DataTransferError::ImageEncode(_) => ErrorKind::Conversion,

        DataTransferError::EncodingUnsupported(_)
        | DataTransferError::InvalidFlavor(_)
        | DataTransferError::InvalidData(_)
        | DataTransferError::Serialization(_) => ErrorKind::DataValidation,

        DataTransferError::Io(_) => ErrorKind::Io,

        DataTransferError::HandoffDisconnected => ErrorKind::Communication,
    }
}

impl DataTransferError {
    /// Shorthand for an unsupported conversion
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedConversion(msg.into())
    }

    /// Returns true if retrying with another flavor/format pair may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            classify_error(self),
            ErrorKind::Conversion | ErrorKind::Communication
        )
    }

    /// Returns true if this error indicates a format issue
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedConversion(_)
                | Self::UnknownFormat(_)
                | Self::EncodingUnsupported(_)
                | Self::ImageDecode(_)
                | Self::ImageEncode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DataTransferError::unsupported("not an image format");
        assert_eq!(err.to_string(), "data translation failed: not an image format");

        let err = DataTransferError::UnknownFormat(Format(13));
        assert_eq!(err.to_string(), "unknown format: 13");
    }

    #[test]
    fn test_error_classification() {
        let err = DataTransferError::unsupported("x");
        assert_eq!(classify_error(&err), ErrorKind::Conversion);

        let err = DataTransferError::EncodingUnsupported("X-FOO".to_string());
        assert_eq!(classify_error(&err), ErrorKind::DataValidation);

        let err = DataTransferError::Io(std::io::Error::other("boom"));
        assert_eq!(classify_error(&err), ErrorKind::Io);

        assert_eq!(
            classify_error(&DataTransferError::HandoffDisconnected),
            ErrorKind::Communication
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(DataTransferError::unsupported("x").is_recoverable());
        assert!(DataTransferError::HandoffDisconnected.is_recoverable());
        assert!(!DataTransferError::InvalidData("x".into()).is_recoverable());
    }

    #[test]
    fn test_is_format_error() {
        assert!(DataTransferError::EncodingUnsupported("x".into()).is_format_error());
        assert!(DataTransferError::UnknownFormat(Format(1)).is_format_error());
        assert!(!DataTransferError::HandoffDisconnected.is_format_error());
    }
}
