//! Algorithm catalog, key generation and the raw signature primitives.

pub mod algorithm;
pub mod factory;
pub mod signature;

pub use algorithm::{
    Algorithm, ContentEncryption, Curve, HashAlgorithm, KeyType, KeyUse, validate_catalog,
};
pub use factory::{KeyFactory, MIN_RSA_KEY_SIZE};

use crate::error::{JwksError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Encode bytes as unpadded base64url.
pub(crate) fn b64_encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a required base64url JWK member.
pub(crate) fn b64_member(value: Option<&String>, member: &str) -> Result<Vec<u8>> {
    let value = value.ok_or_else(|| JwksError::serialization(format!("missing JWK member {member}")))?;
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| JwksError::serialization(format!("invalid JWK member {member}: {e}")))
}
