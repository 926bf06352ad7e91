//! Error type shared by every fallible operation.
//!
//! Every failure has the same `{code, message}` shape. Code `0` is reserved
//! for checks made before the codec is reached (empty input, an unknown
//! format name). Nonzero codes come from the codec and are stable: callers
//! may match on them.

use thiserror::Error as ThisError;

/// Result type for exiv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable numeric codes raised by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
#[non_exhaustive]
pub enum ErrorCode {
    InvalidDataset = 4,
    InvalidRecord = 5,
    InvalidKey = 6,
    InvalidTag = 7,
    DataSourceOpenFailed = 9,
    FileContainsUnknownImageType = 11,
    MemoryContainsUnknownImageType = 12,
    FailedToReadImageData = 14,
    ValueTooLarge = 24,
    InvalidSettingForImage = 32,
    NoNamespaceInfoForXmpPrefix = 35,
    TooLargeJpegSegment = 37,
    InvalidTypeValue = 56,
    CorruptedMetadata = 58,
}

impl ErrorCode {
    /// The numeric value of the code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Errors returned by images and metadata stores.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// A local check failed before the codec was involved. Always code `0`.
    #[error("{0}")]
    Precondition(String),

    /// The codec rejected the input or the operation.
    #[error("{message}")]
    Codec { code: ErrorCode, message: String },

    /// A well-formed key has no value in the store.
    #[error("key not found")]
    KeyNotFound,
}

impl Error {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub(crate) fn codec(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Codec {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_key(key: &str) -> Self {
        Self::codec(ErrorCode::InvalidKey, format!("Invalid key `{key}'"))
    }

    pub(crate) fn corrupted(message: impl Into<String>) -> Self {
        Self::codec(ErrorCode::CorruptedMetadata, message)
    }

    /// Numeric code: `0` for local failures, the codec's code otherwise.
    pub fn code(&self) -> i32 {
        match self {
            Self::Precondition(_) | Self::KeyNotFound => 0,
            Self::Codec { code, .. } => code.as_i32(),
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether this is the "key not found" outcome of a string getter.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound)
    }
}
