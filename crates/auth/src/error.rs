use thiserror::Error;

use sso_core::{ErrorKind, SnowflakeError, StoreError};

use crate::password::PasswordError;
use crate::token::TokenError;
use crate::PermissionKey;

/// Error returned by the credential and access-control services.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Input rejected before any store access.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown email and wrong password are deliberately indistinguishable.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(PermissionKey),

    #[error("identity already exists")]
    IdentityAlreadyExists,

    #[error("role '{0}' already exists")]
    RoleAlreadyExists(String),

    #[error("permission '{0}' already exists")]
    PermissionAlreadyExists(PermissionKey),

    #[error("{0} not found")]
    NotFound(String),

    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AuthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::InvalidCredentials => ErrorKind::Authentication,
            AuthError::Token(e) => e.kind(),
            AuthError::Forbidden(_) => ErrorKind::Authorization,
            AuthError::IdentityAlreadyExists
            | AuthError::RoleAlreadyExists(_)
            | AuthError::PermissionAlreadyExists(_) => ErrorKind::Conflict,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Store failure with no more specific mapping at the call site.
    pub(crate) fn store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Internal(Box::new(other)),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(value: PasswordError) -> Self {
        Self::Internal(Box::new(value))
    }
}

impl From<SnowflakeError> for AuthError {
    fn from(value: SnowflakeError) -> Self {
        Self::Internal(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_a_kind() {
        assert_eq!(AuthError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(AuthError::InvalidCredentials.kind(), ErrorKind::Authentication);
        assert_eq!(AuthError::Token(TokenError::Expired).kind(), ErrorKind::Authentication);
        assert_eq!(
            AuthError::Token(TokenError::RefreshTokenNotFound).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AuthError::Forbidden(crate::permissions::ROLE_CREATE).kind(),
            ErrorKind::Authorization
        );
        assert_eq!(AuthError::IdentityAlreadyExists.kind(), ErrorKind::Conflict);
        assert_eq!(AuthError::store(StoreError::not_found("role")).kind(), ErrorKind::NotFound);
        assert_eq!(AuthError::store(StoreError::backend("io")).kind(), ErrorKind::Internal);
    }

    #[test]
    fn internal_errors_do_not_leak_details_in_display() {
        let err = AuthError::store(StoreError::backend("connection refused at 10.0.0.5"));
        assert_eq!(err.to_string(), "internal error");
    }
}
