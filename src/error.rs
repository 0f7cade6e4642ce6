//! Error types and handling for the stitch library

use thiserror::Error;

/// Result type alias for stitch operations
pub type Result<T> = std::result::Result<T, StitchError>;

/// Main error type for the stitch library
///
/// Runtime outcomes of an ingest (out-of-range sequence numbers, spans that
/// are not completable yet) are values in `AcceptResult`, not errors. The
/// variants here cover construction and descriptor validation only.
#[derive(Error, Debug)]
pub enum StitchError {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Delimiter offsets that do not fit the buffer they describe
    #[error("Invalid delimiter offset {offset} for buffer of {size} bytes")]
    InvalidDelimiterOffset {
        /// The offending byte offset
        offset: u32,
        /// Size of the described buffer in bytes
        size: usize,
    },
}

impl StitchError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new delimiter offset error
    pub fn invalid_offset(offset: u32, size: usize) -> Self {
        Self::InvalidDelimiterOffset { offset, size }
    }

    /// Check if this error is recoverable
    ///
    /// Offset errors are per-buffer and the caller can drop the buffer and
    /// continue; configuration errors are not recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidDelimiterOffset { .. })
    }
}
