//! Error types for the JWKS lifecycle.
//!
//! Generation and persistence failures are always surfaced to the caller.
//! Only "not found" conditions are expressed as `Option::None` by the stores.

use thiserror::Error;

/// Errors raised by key generation, storage, rotation and token validation.
#[derive(Error, Debug)]
pub enum JwksError {
    /// Algorithm, curve or key type is not in the catalog.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The cryptographic primitive failed to produce key material.
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// The persistence backend failed.
    #[error("Key store unavailable: {0}")]
    StoreUnavailable(String),

    /// A token references a key id that is not among the retained keys.
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// Key id declared by the token
        kid: String,
    },

    /// Required settings are missing or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An administrative operation referenced a key id the store does not hold.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The token was signed by a key that has since been revoked.
    #[error("Signing key revoked: {kid}")]
    KeyRevoked {
        /// Key id declared by the token
        kid: String,
    },

    /// The token is malformed or its header is inconsistent with the key.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The signature does not match the resolved key.
    #[error("Signature mismatch for key {kid}")]
    SignatureMismatch {
        /// Key id used for verification
        kid: String,
    },

    /// The token `exp` (or `nbf`) claim is outside the accepted window.
    #[error("Token expired or not yet valid")]
    TokenExpired,

    /// Key material could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for JWKS operations.
pub type Result<T> = std::result::Result<T, JwksError>;

impl JwksError {
    /// Check if this error is retryable.
    ///
    /// Only backend I/O failures are transient. Everything else is a
    /// configuration, cryptographic or validation outcome.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Create an unsupported algorithm error.
    #[must_use]
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(what.into())
    }

    /// Create a key generation error.
    #[must_use]
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::KeyGenerationFailed(msg.into())
    }

    /// Create a store unavailable error.
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an invalid token error.
    #[must_use]
    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Self::InvalidToken(msg.into())
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Stable label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::KeyGenerationFailed(_) => "key_generation_failed",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::UnknownSigningKey { .. } => "unknown_signing_key",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::KeyNotFound(_) => "key_not_found",
            Self::KeyRevoked { .. } => "key_revoked",
            Self::InvalidToken(_) => "invalid_token",
            Self::SignatureMismatch { .. } => "signature_mismatch",
            Self::TokenExpired => "token_expired",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for JwksError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for JwksError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<sqlx::Error> for JwksError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for JwksError {
    fn from(err: reqwest::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
