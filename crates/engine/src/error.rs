use folio_source::SourceError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the reader engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReaderError {
    /// The document could not be opened. Terminal for this open; the user
    /// may retry.
    #[error("document unavailable: {0}")]
    SourceUnavailable(String),

    /// One page failed to decode. The rest of the document stays usable.
    #[error("page {index} failed to decode: {reason}")]
    DecodeFailed { index: u32, reason: String },

    /// The page count was not established in time.
    #[error("document did not load within {0:?}")]
    LoadTimeout(Duration),

    #[error("operation cancelled")]
    Cancelled,
}

impl ReaderError {
    /// True for failures that end the document session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::LoadTimeout(_))
    }
}

impl From<SourceError> for ReaderError {
    fn from(err: SourceError) -> Self {
        if !err.is_page_level() {
            return Self::SourceUnavailable(err.to_string());
        }
        match err {
            SourceError::DecodeFailed { index, reason } => Self::DecodeFailed { index, reason },
            SourceError::PageOutOfRange { page, page_count } => Self::DecodeFailed {
                index: page,
                reason: format!("out of range (page_count={page_count})"),
            },
            other => Self::SourceUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
