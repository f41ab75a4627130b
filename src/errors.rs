use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// Error categories for Ferrite operations.
///
/// Each kind describes one failure class, so callers can match on the
/// category without parsing messages.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// Malformed filter or update document, unknown filter operator,
    /// non-string key, bad sort/index direction, or an invalid `_id` type.
    InvalidArgument,
    /// Insert with an `_id` already present in the collection.
    DuplicateKey,
    /// Operation not valid in the current state: cursor reconfigured after
    /// iteration started or used after close, dropping a missing index,
    /// using a closed client.
    InvalidOperation,
    /// Update that cannot apply: `$inc` on a non-numeric value, `$push` on a
    /// non-array value, `$set` through a non-container intermediate.
    InvalidUpdate,
    /// Storage backend I/O failure or undecodable stored bytes.
    StorageIo,
    /// Operator or parameter that Ferrite recognises but does not support.
    NotImplemented,
    /// Internal error; usually indicates a bug.
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "Invalid argument"),
            ErrorKind::DuplicateKey => write!(f, "Duplicate key"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::InvalidUpdate => write!(f, "Invalid update"),
            ErrorKind::StorageIo => write!(f, "Storage IO error"),
            ErrorKind::NotImplemented => write!(f, "Not implemented"),
            ErrorKind::Internal => write!(f, "Internal error"),
        }
    }
}

/// Error type for all fallible Ferrite operations.
///
/// Carries a message, an [ErrorKind], and an optional cause error, enabling
/// error chaining through [`Error::source`].
///
/// # Examples
///
/// ```rust,ignore
/// use ferrite::errors::{ErrorKind, FerriteError, FerriteResult};
///
/// fn forbidden() -> FerriteResult<()> {
///     Err(FerriteError::new("cursor already closed", ErrorKind::InvalidOperation))
/// }
/// ```
#[derive(Clone)]
pub struct FerriteError {
    message: String,
    kind: ErrorKind,
    cause: Option<Box<FerriteError>>,
}

impl FerriteError {
    /// Creates a new error with the given message and kind.
    pub fn new(message: &str, kind: ErrorKind) -> Self {
        FerriteError {
            message: message.to_string(),
            kind,
            cause: None,
        }
    }

    /// Creates a new error chained on top of a cause error.
    pub fn with_cause(message: &str, kind: ErrorKind, cause: FerriteError) -> Self {
        FerriteError {
            message: message.to_string(),
            kind,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn cause(&self) -> Option<&FerriteError> {
        self.cause.as_deref()
    }
}

impl Display for FerriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for FerriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} [{}]\nCaused by: {:?}", self.message, self.kind, cause),
            None => write!(f, "{} [{}]", self.message, self.kind),
        }
    }
}

impl Error for FerriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type FerriteResult<T> = Result<T, FerriteError>;

impl From<std::io::Error> for FerriteError {
    fn from(err: std::io::Error) -> Self {
        FerriteError::new(&format!("IO error: {}", err), ErrorKind::StorageIo)
    }
}

impl From<serde_json::Error> for FerriteError {
    fn from(err: serde_json::Error) -> Self {
        FerriteError::new(&format!("Codec error: {}", err), ErrorKind::StorageIo)
    }
}

impl From<std::string::FromUtf8Error> for FerriteError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        FerriteError::new(&format!("UTF-8 error: {}", err), ErrorKind::StorageIo)
    }
}
