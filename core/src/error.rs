//! Error types and HTTP status mapping

use serde::Serialize;
use thiserror::Error;

/// Result type alias for relying-party operations
pub type Result<T> = std::result::Result<T, OidcError>;

/// The ID-token check that rejected a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationCheck {
    /// Token is not a well-formed JWT, or no usable key exists for it
    Malformed,
    Signature,
    Issuer,
    Audience,
    Nonce,
    Expired,
    /// `state` returned on the callback does not match the stored one
    State,
}

impl VerificationCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Signature => "signature",
            Self::Issuer => "issuer",
            Self::Audience => "audience",
            Self::Nonce => "nonce",
            Self::Expired => "expired",
            Self::State => "state",
        }
    }
}

impl std::fmt::Display for VerificationCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relying-party error taxonomy
#[derive(Error, Debug)]
pub enum OidcError {
    /// Discovery or JWKS fetch failed; retry the whole attempt later
    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    /// Code or refresh-token exchange rejected; the user must restart the flow
    #[error("token exchange failed: {message}")]
    TokenExchange { message: String },

    /// Signature/issuer/audience/nonce mismatch; never degrade to "unauthenticated"
    #[error("token verification failed ({check}): {message}")]
    Verification {
        check: VerificationCheck,
        message: String,
    },

    /// Attempt to decode a token that was never stored
    #[error("missing token: {token}")]
    MissingToken { token: &'static str },

    #[error("invalid flow state: {message}")]
    InvalidState { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl OidcError {
    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            message: message.into(),
        }
    }

    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchange {
            message: message.into(),
        }
    }

    pub fn verification(check: VerificationCheck, message: impl Into<String>) -> Self {
        Self::Verification {
            check,
            message: message.into(),
        }
    }

    pub fn missing_token(token: &'static str) -> Self {
        Self::MissingToken { token }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The failed check, if this is a verification error
    pub fn verification_check(&self) -> Option<VerificationCheck> {
        match self {
            Self::Verification { check, .. } => Some(*check),
            _ => None,
        }
    }

    /// Get the HTTP status code a host should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ProviderUnavailable { .. } => 503,
            Self::TokenExchange { .. } => 401,
            Self::Verification { .. } => 401,
            Self::MissingToken { .. } => 500,
            Self::InvalidState { .. } => 400,
            Self::Config { .. } => 500,
            Self::Internal { .. } => 500,
        }
    }

    /// Get the error key for this error
    pub fn error_key(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::TokenExchange { .. } => "token_exchange_failed",
            Self::Verification { .. } => "token_verification_failed",
            Self::MissingToken { .. } => "missing_token",
            Self::InvalidState { .. } => "invalid_state",
            Self::Config { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&OidcError> for ErrorResponse {
    fn from(err: &OidcError) -> Self {
        Self {
            error: err.error_key().to_string(),
            message: err.to_string(),
        }
    }
}
