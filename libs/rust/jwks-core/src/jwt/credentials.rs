//! Credentials handed out by the service for the current key of a slot.

use crate::crypto::signature::{can_sign, rsa_private_key, sign};
use crate::crypto::{Algorithm, ContentEncryption, KeyUse, b64_member};
use crate::error::{JwksError, Result};
use crate::jwks::{KeyMaterial, PublicJwk};
use jsonwebtoken::EncodingKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use zeroize::Zeroizing;

macro_rules! ec_encoding_key {
    ($curve:ident, $jwk:expr) => {{
        use $curve::pkcs8::EncodePrivateKey;
        let d = Zeroizing::new(b64_member($jwk.d.as_ref(), "d")?);
        let secret = $curve::SecretKey::from_slice(&d)
            .map_err(|e| JwksError::serialization(format!("invalid EC private key: {e}")))?;
        let der = secret
            .to_pkcs8_der()
            .map_err(|e| JwksError::serialization(e.to_string()))?;
        EncodingKey::from_ec_der(der.as_bytes())
    }};
}

/// Private key and algorithm for signing new tokens.
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    key: KeyMaterial,
}

impl SigningCredentials {
    /// Wrap a signing key.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` if the key cannot produce signatures.
    pub fn new(key: KeyMaterial) -> Result<Self> {
        if key.key_use() != KeyUse::Signature || !can_sign(key.algorithm(), key.key_type()) {
            return Err(JwksError::unsupported(format!(
                "{} key {} cannot sign",
                key.algorithm(),
                key.id()
            )));
        }
        Ok(Self { key })
    }

    /// Underlying key.
    #[must_use]
    pub const fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// Key id to place in the token header.
    #[must_use]
    pub fn key_id(&self) -> &str {
        self.key.id()
    }

    /// Signing algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.key.algorithm()
    }

    /// Sign raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the stored parameters are unusable.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        sign(&self.key, message)
    }

    /// `jsonwebtoken` algorithm for this key.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for ES512.
    pub fn jsonwebtoken_algorithm(&self) -> Result<jsonwebtoken::Algorithm> {
        self.key.algorithm().jsonwebtoken()
    }

    /// `jsonwebtoken` encoding key for this key.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for ES512 and `Serialization` if the
    /// stored parameters are unusable.
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        let jwk = self.key.parameters();
        let key = match self.key.algorithm() {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => {
                let der = rsa_private_key(jwk)?
                    .to_pkcs1_der()
                    .map_err(|e| JwksError::serialization(e.to_string()))?;
                EncodingKey::from_rsa_der(der.as_bytes())
            }
            Algorithm::ES256 => ec_encoding_key!(p256, jwk),
            Algorithm::ES384 => ec_encoding_key!(p384, jwk),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                EncodingKey::from_secret(&Zeroizing::new(b64_member(jwk.k.as_ref(), "k")?))
            }
            other => {
                return Err(JwksError::unsupported(format!(
                    "jsonwebtoken cannot sign with {other}"
                )));
            }
        };
        Ok(key)
    }
}

/// Key management key and content encryption for encrypting tokens.
#[derive(Debug, Clone)]
pub struct EncryptingCredentials {
    key: KeyMaterial,
    content_encryption: ContentEncryption,
}

impl EncryptingCredentials {
    /// Wrap an encryption key.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` if the key is not a key management key.
    pub fn new(key: KeyMaterial, content_encryption: ContentEncryption) -> Result<Self> {
        if key.key_use() != KeyUse::Encryption {
            return Err(JwksError::unsupported(format!(
                "{} key {} is not a key management key",
                key.algorithm(),
                key.id()
            )));
        }
        Ok(Self {
            key,
            content_encryption,
        })
    }

    /// Underlying key.
    #[must_use]
    pub const fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// Key id to place in the JWE header.
    #[must_use]
    pub fn key_id(&self) -> &str {
        self.key.id()
    }

    /// Key management algorithm (`alg`).
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.key.algorithm()
    }

    /// Content encryption (`enc`).
    #[must_use]
    pub const fn content_encryption(&self) -> ContentEncryption {
        self.content_encryption
    }

    /// Public half for RSA keys; `None` for symmetric key wrap.
    #[must_use]
    pub fn public_jwk(&self) -> Option<PublicJwk> {
        self.key.public_jwk()
    }
}
