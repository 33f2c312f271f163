//! Error types for the AiDb table engine.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// The result type used throughout the table engine.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for table and file-reclamation operations.
///
/// Errors are `Clone` so that a builder's terminal status and a lazily
/// loaded index or filter failure can be handed to every later caller.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    /// Data corruption was detected (checksum, decompression or format mismatch).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The requested key or file was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation or encoding is not supported by this build.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A multi-call protocol has more work to do.
    #[error("Incomplete: {0}")]
    Incomplete(String),

    /// A memory budget (for example a strict cache capacity) was exceeded.
    #[error("Memory limit: {0}")]
    MemoryLimit(String),

    /// The component is in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A configuration document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new not supported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Error::NotSupported(msg.into())
    }

    /// Creates a new memory limit error.
    pub fn memory_limit(msg: impl Into<String>) -> Self {
        Error::MemoryLimit(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns true for `Corruption`.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Returns true for `NotFound`, including an I/O error of kind `NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns true only for an I/O error of kind `NotFound`.
    pub fn is_io_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
