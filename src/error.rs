use std::fmt;

use thiserror::Error;

use crate::auth::fallback::FallbackError;
use crate::auth::identity::AssuranceLevel;
use crate::auth::jwks::KeySetFetchError;
use crate::auth::token::TokenEncodingError;
use crate::auth::verify::{ClaimsError, KeyError};

/// Marks errors that may be safely shown to a client.
/// This trait can be seen as a specialized version of [`ToString`].
///
/// NOTE: This trait should not be implemented for [`anyhow::Error`], since it
/// is way too convenient and tends to proliferate all across the codebase,
/// ultimately leading to accidental leaks of sensitive data.
pub trait UserFacingError: ToString {
    /// Format the error for the client, stripping all sensitive info.
    fn to_string_client(&self) -> String {
        self.to_string()
    }
}

/// Broad failure classes, for consumers that log or count rejections.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Caused by the credential the client presented.
    User,
    /// Caused by the identity provider (unreachable, bad key material).
    Upstream,
    /// Caused by this service.
    Service,
}

pub trait ReportableError: fmt::Display + Send + 'static {
    fn get_error_kind(&self) -> ErrorKind;
}

/// Why a request failed to authenticate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    #[error("no authorization credential supplied")]
    NoCredential,

    #[error("provided authentication token is not a valid JWT encoding")]
    Malformed(#[from] TokenEncodingError),

    #[error("signing key not found in the provider key set")]
    UnknownSigningKey,

    #[error("signature error: {0}")]
    Signature(#[from] signature::Error),

    #[error("invalid signing key material: {0}")]
    InvalidKey(#[from] KeyError),

    #[error(transparent)]
    InvalidClaims(#[from] ClaimsError),

    #[error("token assurance level {actual} does not meet required {required}")]
    InsufficientAssurance {
        required: AssuranceLevel,
        actual: AssuranceLevel,
    },

    #[error("identity provider unavailable: {0}")]
    Upstream(#[from] UpstreamError),
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error(transparent)]
    KeySetFetch(#[from] KeySetFetchError),

    #[error(transparent)]
    Fallback(#[from] FallbackError),
}

impl ReportableError for AuthError {
    fn get_error_kind(&self) -> ErrorKind {
        match self {
            AuthError::NoCredential
            | AuthError::Malformed(_)
            | AuthError::UnknownSigningKey
            | AuthError::Signature(_)
            | AuthError::InvalidClaims(_)
            | AuthError::InsufficientAssurance { .. } => ErrorKind::User,
            AuthError::InvalidKey(_) | AuthError::Upstream(_) => ErrorKind::Upstream,
        }
    }
}

impl UserFacingError for AuthError {
    fn to_string_client(&self) -> String {
        // the error kind and any provider diagnostics stay internal;
        // every rejection looks the same from the outside
        "authentication failed".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_string_is_generic() {
        let errors = [
            AuthError::NoCredential,
            AuthError::UnknownSigningKey,
            AuthError::InvalidClaims(ClaimsError::Expired),
        ];
        for err in errors {
            assert_eq!(err.to_string_client(), "authentication failed");
        }
    }

    #[test]
    fn kinds() {
        assert_eq!(
            AuthError::UnknownSigningKey.get_error_kind(),
            ErrorKind::User
        );
        assert_eq!(
            AuthError::InvalidClaims(ClaimsError::Expired).get_error_kind(),
            ErrorKind::User
        );
        assert_eq!(
            AuthError::InvalidKey(KeyError::UnsupportedKeyType).get_error_kind(),
            ErrorKind::Upstream
        );
    }
}
