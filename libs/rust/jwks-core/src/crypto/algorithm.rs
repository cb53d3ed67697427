//! Closed catalog of JOSE algorithms and their key classification.
//!
//! Every algorithm maps to exactly one key type and one key use. ECDSA
//! algorithms additionally map to exactly one NIST curve.

use crate::error::{JwksError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JWK key type (`kty`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// RSA key pair
    #[serde(rename = "RSA")]
    Rsa,
    /// Elliptic curve key pair
    #[serde(rename = "EC")]
    EllipticCurve,
    /// Symmetric secret
    #[serde(rename = "oct")]
    Octet,
}

impl KeyType {
    /// JOSE name for the `kty` member.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::EllipticCurve => "EC",
            Self::Octet => "oct",
        }
    }

    /// Whether the key has a public half that may be published.
    #[must_use]
    pub const fn is_asymmetric(&self) -> bool {
        matches!(self, Self::Rsa | Self::EllipticCurve)
    }
}

impl FromStr for KeyType {
    type Err = JwksError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RSA" => Ok(Self::Rsa),
            "EC" => Ok(Self::EllipticCurve),
            "oct" => Ok(Self::Octet),
            other => Err(JwksError::unsupported(format!("key type {other}"))),
        }
    }
}

/// JWK public key use (`use`), which is also the logical key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUse {
    /// Token signing (JWS)
    #[serde(rename = "sig")]
    Signature,
    /// Token encryption (JWE)
    #[serde(rename = "enc")]
    Encryption,
}

impl KeyUse {
    /// JOSE name for the `use` member.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "sig",
            Self::Encryption => "enc",
        }
    }

    /// `key_ops` advertised for the public half of a key with this use.
    #[must_use]
    pub fn public_key_ops(&self) -> Vec<String> {
        match self {
            Self::Signature => vec!["verify".to_string()],
            Self::Encryption => vec!["encrypt".to_string(), "wrapKey".to_string()],
        }
    }
}

impl FromStr for KeyUse {
    type Err = JwksError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sig" => Ok(Self::Signature),
            "enc" => Ok(Self::Encryption),
            other => Err(JwksError::unsupported(format!("key use {other}"))),
        }
    }
}

impl fmt::Display for KeyUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NIST curves available to ECDSA algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Curve {
    /// NIST P-256
    #[serde(rename = "P-256")]
    P256,
    /// NIST P-384
    #[serde(rename = "P-384")]
    P384,
    /// NIST P-521
    #[serde(rename = "P-521")]
    P521,
}

impl Curve {
    /// JOSE name for the `crv` member.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }

    /// Size in bytes of one affine coordinate (and of the private scalar).
    #[must_use]
    pub const fn coordinate_size(&self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }
}

impl FromStr for Curve {
    type Err = JwksError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "P-256" => Ok(Self::P256),
            "P-384" => Ok(Self::P384),
            "P-521" => Ok(Self::P521),
            other => Err(JwksError::unsupported(format!("curve {other}"))),
        }
    }
}

/// Hash function paired with RSA, ECDSA and HMAC algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Digest output size in bytes.
    #[must_use]
    pub const fn output_size(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

/// JOSE algorithm from the closed catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    /// RSASSA-PKCS1-v1_5 using SHA-256
    RS256,
    /// RSASSA-PKCS1-v1_5 using SHA-384
    RS384,
    /// RSASSA-PKCS1-v1_5 using SHA-512
    RS512,
    /// RSASSA-PSS using SHA-256
    PS256,
    /// RSASSA-PSS using SHA-384
    PS384,
    /// RSASSA-PSS using SHA-512
    PS512,
    /// ECDSA using P-256 and SHA-256
    ES256,
    /// ECDSA using P-384 and SHA-384
    ES384,
    /// ECDSA using P-521 and SHA-512
    ES512,
    /// HMAC using SHA-256
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
    /// RSAES OAEP using default parameters
    RsaOaep,
    /// RSAES OAEP using SHA-256 and MGF1 with SHA-256
    RsaOaep256,
    /// AES Key Wrap with a 128-bit key
    A128KW,
    /// AES Key Wrap with a 256-bit key
    A256KW,
}

const CATALOG: [Algorithm; 16] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::ES512,
    Algorithm::HS256,
    Algorithm::HS384,
    Algorithm::HS512,
    Algorithm::RsaOaep,
    Algorithm::RsaOaep256,
    Algorithm::A128KW,
    Algorithm::A256KW,
];

impl Algorithm {
    /// Every algorithm in the catalog.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &CATALOG
    }

    /// Default catalog algorithm for a key type and use.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` when the catalog has no algorithm for
    /// the combination (elliptic curve encryption).
    pub fn create(key_type: KeyType, key_use: KeyUse) -> Result<Self> {
        match (key_type, key_use) {
            (KeyType::Rsa, KeyUse::Signature) => Ok(Self::RS256),
            (KeyType::EllipticCurve, KeyUse::Signature) => Ok(Self::ES256),
            (KeyType::Octet, KeyUse::Signature) => Ok(Self::HS256),
            (KeyType::Rsa, KeyUse::Encryption) => Ok(Self::RsaOaep),
            (KeyType::Octet, KeyUse::Encryption) => Ok(Self::A128KW),
            (KeyType::EllipticCurve, KeyUse::Encryption) => Err(JwksError::unsupported(
                "no elliptic curve key management algorithm in catalog",
            )),
        }
    }

    /// Parse a JOSE algorithm name. Names are case-sensitive.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for names outside the catalog.
    pub fn from_name(name: &str) -> Result<Self> {
        CATALOG
            .iter()
            .copied()
            .find(|alg| alg.name() == name)
            .ok_or_else(|| JwksError::unsupported(name.to_string()))
    }

    /// JOSE name for the `alg` member.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RsaOaep => "RSA-OAEP",
            Self::RsaOaep256 => "RSA-OAEP-256",
            Self::A128KW => "A128KW",
            Self::A256KW => "A256KW",
        }
    }

    /// Key type required by this algorithm.
    #[must_use]
    pub const fn kty(&self) -> KeyType {
        match self {
            Self::RS256
            | Self::RS384
            | Self::RS512
            | Self::PS256
            | Self::PS384
            | Self::PS512
            | Self::RsaOaep
            | Self::RsaOaep256 => KeyType::Rsa,
            Self::ES256 | Self::ES384 | Self::ES512 => KeyType::EllipticCurve,
            Self::HS256 | Self::HS384 | Self::HS512 | Self::A128KW | Self::A256KW => {
                KeyType::Octet
            }
        }
    }

    /// Use this algorithm belongs to.
    #[must_use]
    pub const fn key_use(&self) -> KeyUse {
        match self {
            Self::RsaOaep | Self::RsaOaep256 | Self::A128KW | Self::A256KW => KeyUse::Encryption,
            _ => KeyUse::Signature,
        }
    }

    /// Curve of an ECDSA algorithm.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for algorithms without a registered curve.
    pub fn curve(&self) -> Result<Curve> {
        match self {
            Self::ES256 => Ok(Curve::P256),
            Self::ES384 => Ok(Curve::P384),
            Self::ES512 => Ok(Curve::P521),
            other => Err(JwksError::unsupported(format!(
                "no curve registered for {}",
                other.name()
            ))),
        }
    }

    /// Hash paired with a signing algorithm.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for key management algorithms.
    pub fn hash(&self) -> Result<HashAlgorithm> {
        match self {
            Self::RS256 | Self::PS256 | Self::ES256 | Self::HS256 => Ok(HashAlgorithm::Sha256),
            Self::RS384 | Self::PS384 | Self::ES384 | Self::HS384 => Ok(HashAlgorithm::Sha384),
            Self::RS512 | Self::PS512 | Self::ES512 | Self::HS512 => Ok(HashAlgorithm::Sha512),
            other => Err(JwksError::unsupported(format!(
                "{} is not a signing algorithm",
                other.name()
            ))),
        }
    }

    /// Digest size in bytes of the paired hash, which is also the HMAC
    /// secret size.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for key management algorithms.
    pub fn hash_size(&self) -> Result<usize> {
        Ok(self.hash()?.output_size())
    }

    /// AES key wrap key size encoded in the algorithm name.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for anything but `A128KW`/`A256KW`.
    pub fn key_size_bits(&self) -> Result<usize> {
        match self {
            Self::A128KW => Ok(128),
            Self::A256KW => Ok(256),
            other => Err(JwksError::unsupported(format!(
                "{} is not an AES key wrap algorithm",
                other.name()
            ))),
        }
    }

    /// Length in bytes of a freshly generated symmetric key.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for asymmetric algorithms.
    pub fn symmetric_key_len(&self) -> Result<usize> {
        match self {
            Self::HS256 | Self::HS384 | Self::HS512 => self.hash_size(),
            Self::A128KW | Self::A256KW => Ok(self.key_size_bits()? / 8),
            other => Err(JwksError::unsupported(format!(
                "{} does not use a symmetric key",
                other.name()
            ))),
        }
    }

    /// Matching `jsonwebtoken` algorithm, when that crate supports it.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for ES512 and key management algorithms.
    pub fn jsonwebtoken(&self) -> Result<jsonwebtoken::Algorithm> {
        use jsonwebtoken::Algorithm as Jwt;
        match self {
            Self::RS256 => Ok(Jwt::RS256),
            Self::RS384 => Ok(Jwt::RS384),
            Self::RS512 => Ok(Jwt::RS512),
            Self::PS256 => Ok(Jwt::PS256),
            Self::PS384 => Ok(Jwt::PS384),
            Self::PS512 => Ok(Jwt::PS512),
            Self::ES256 => Ok(Jwt::ES256),
            Self::ES384 => Ok(Jwt::ES384),
            Self::HS256 => Ok(Jwt::HS256),
            Self::HS384 => Ok(Jwt::HS384),
            Self::HS512 => Ok(Jwt::HS512),
            other => Err(JwksError::unsupported(format!(
                "{} is not supported by jsonwebtoken",
                other.name()
            ))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = JwksError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl TryFrom<String> for Algorithm {
    type Error = JwksError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_name(&value)
    }
}

impl From<Algorithm> for String {
    fn from(alg: Algorithm) -> Self {
        alg.name().to_string()
    }
}

/// JWE content encryption algorithm (`enc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncryption {
    /// AES-128-CBC with HMAC SHA-256
    A128CbcHs256,
    /// AES-192-CBC with HMAC SHA-384
    A192CbcHs384,
    /// AES-256-CBC with HMAC SHA-512
    A256CbcHs512,
    /// AES-128-GCM
    A128Gcm,
    /// AES-192-GCM
    A192Gcm,
    /// AES-256-GCM
    A256Gcm,
}

impl ContentEncryption {
    /// JOSE name for the `enc` header.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A192CbcHs384 => "A192CBC-HS384",
            Self::A256CbcHs512 => "A256CBC-HS512",
            Self::A128Gcm => "A128GCM",
            Self::A192Gcm => "A192GCM",
            Self::A256Gcm => "A256GCM",
        }
    }
}

impl FromStr for ContentEncryption {
    type Err = JwksError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A128CBC-HS256" => Ok(Self::A128CbcHs256),
            "A192CBC-HS384" => Ok(Self::A192CbcHs384),
            "A256CBC-HS512" => Ok(Self::A256CbcHs512),
            "A128GCM" => Ok(Self::A128Gcm),
            "A192GCM" => Ok(Self::A192Gcm),
            "A256GCM" => Ok(Self::A256Gcm),
            _ => Err(JwksError::unsupported(format!("content encryption {s}"))),
        }
    }
}

impl fmt::Display for ContentEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check the whole catalog for internal consistency.
///
/// Run once at startup so that a broken table fails before any key is issued.
///
/// # Errors
///
/// Returns `InvalidConfiguration` naming the first inconsistent entry.
pub fn validate_catalog() -> Result<()> {
    for alg in Algorithm::all() {
        if Algorithm::from_name(alg.name())? != *alg {
            return Err(JwksError::config(format!("{alg} does not round-trip by name")));
        }
        match (alg.kty(), alg.curve()) {
            (KeyType::EllipticCurve, Err(_)) => {
                return Err(JwksError::config(format!("{alg} has no curve")));
            }
            (KeyType::Rsa | KeyType::Octet, Ok(_)) => {
                return Err(JwksError::config(format!("{alg} has an unexpected curve")));
            }
            _ => {}
        }
        if alg.key_use() == KeyUse::Signature && alg.hash().is_err() {
            return Err(JwksError::config(format!("{alg} has no hash")));
        }
        if alg.kty() == KeyType::Octet && alg.symmetric_key_len().is_err() {
            return Err(JwksError::config(format!("{alg} has no key length")));
        }
    }
    Ok(())
}
