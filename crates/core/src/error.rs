//! Error taxonomy shared by every layer.

use thiserror::Error;

/// Coarse error classification handed to the transport layer.
///
/// Every service error maps onto exactly one kind; the transport maps kinds to
/// protocol status codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input, rejected before any store access.
    Validation,
    /// Missing/expired/malformed token, bad signature, or bad credentials.
    Authentication,
    /// Valid identity without the required permission.
    Authorization,
    /// Identity, role, permission or refresh token absent.
    NotFound,
    /// Duplicate email, role name or permission pair.
    Conflict,
    /// Persistence or IO failure.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Authorization => "authorization_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by persistence collaborators.
///
/// Backends classify their native failures into these three cases. A lookup
/// miss (`NotFound`) is always distinguishable from a storage failure (`Backend`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint violation.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_) => ErrorKind::Conflict,
            StoreError::Backend(_) => ErrorKind::Internal,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
