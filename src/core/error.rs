//! Unified error surface
//!
//! Every operation in the store reports failures through a single
//! `Error { kind, message, xpath }` shape. Single-item operations return
//! the first error only; `validate` and `commit` collect all errors with
//! their paths.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type used across the store.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced uniformly by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid argument supplied by the caller
    InvalidArgument,
    /// Memory allocation failure
    OutOfMemory,
    /// Requested item was not found
    NotFound,
    /// Unexpected internal failure
    Internal,
    /// Initialization failed
    InitFailed,
    /// Input/output error
    Io,
    /// Peer disconnected
    Disconnect,
    /// Message cannot be parsed
    MalformedMessage,
    /// Operation is not supported on this session or datastore
    Unsupported,
    /// Referenced schema module is not known
    UnknownModel,
    /// Referenced schema element is not known
    BadElement,
    /// Data tree failed schema validation
    ValidationFailed,
    /// Operation could not be performed
    OperationFailed,
    /// Item already exists
    DataExists,
    /// Item does not exist
    DataMissing,
    /// Caller is not authorized
    Unauthorized,
    /// Requested resource is locked by another session
    Locked,
    /// Operation timed out
    Timeout,
}

impl ErrorKind {
    /// Returns the stable string code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::OutOfMemory => "OUT_OF_MEMORY",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::InitFailed => "INIT_FAILED",
            ErrorKind::Io => "IO",
            ErrorKind::Disconnect => "DISCONNECT",
            ErrorKind::MalformedMessage => "MALFORMED_MESSAGE",
            ErrorKind::Unsupported => "UNSUPPORTED",
            ErrorKind::UnknownModel => "UNKNOWN_MODEL",
            ErrorKind::BadElement => "BAD_ELEMENT",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::OperationFailed => "OPERATION_FAILED",
            ErrorKind::DataExists => "DATA_EXISTS",
            ErrorKind::DataMissing => "DATA_MISSING",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Locked => "LOCKED",
            ErrorKind::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An error with kind, message and the xpath it relates to, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Error {
    /// Error kind
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Instance identifier the error relates to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
}

impl Error {
    /// Create an error without an associated path.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            xpath: None,
        }
    }

    /// Create an error carrying the xpath it relates to.
    pub fn with_xpath(kind: ErrorKind, message: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            xpath: Some(xpath.into()),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    /// Create an I/O error
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    /// Create an unknown model error
    pub fn unknown_model(module: &str) -> Self {
        Self::new(ErrorKind::UnknownModel, format!("Module '{}' is not known", module))
    }

    /// Create a bad element error
    pub fn bad_element(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadElement, msg)
    }

    /// Create a validation error anchored at a path
    pub fn validation(msg: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self::with_xpath(ErrorKind::ValidationFailed, msg, xpath)
    }

    /// Create an operation failed error
    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationFailed, msg)
    }

    /// Create a data exists error
    pub fn data_exists(xpath: impl Into<String>) -> Self {
        let xpath = xpath.into();
        Self::with_xpath(ErrorKind::DataExists, format!("Item '{}' already exists", xpath), xpath)
    }

    /// Create a data missing error
    pub fn data_missing(xpath: impl Into<String>) -> Self {
        let xpath = xpath.into();
        Self::with_xpath(ErrorKind::DataMissing, format!("Item '{}' does not exist", xpath), xpath)
    }

    /// Create an unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, msg)
    }

    /// Create a locked error
    pub fn locked(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Locked, msg)
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    /// Create an unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, msg)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)?;
        if let Some(xpath) = &self.xpath {
            write!(f, " (at {})", xpath)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => Self::new(ErrorKind::Unauthorized, e.to_string()),
            std::io::ErrorKind::NotFound => Self::new(ErrorKind::NotFound, e.to_string()),
            _ => Self::new(ErrorKind::Io, e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::MalformedMessage, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorKind::NotFound.code(), "NOT_FOUND");
        assert_eq!(ErrorKind::ValidationFailed.code(), "VALIDATION_FAILED");
        assert_eq!(ErrorKind::Locked.code(), "LOCKED");
        assert_eq!(ErrorKind::Unauthorized.code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_error_display_includes_path() {
        let err = Error::validation("leaf 'x' is mandatory", "/m:c/x");
        let text = format!("{}", err);
        assert!(text.contains("VALIDATION_FAILED"));
        assert!(text.contains("/m:c/x"));
    }

    #[test]
    fn test_io_error_mapping() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err: Error = denied.into();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }
}
