//! Key material envelope and its lifecycle metadata.
//!
//! A `KeyMaterial` carries the private JSON Web Key produced by the factory.
//! The private parameters never leave this type except through the store
//! backends; the public JWKS only ever sees [`KeyMaterial::public_jwk`].

use crate::crypto::{Algorithm, Curve, KeyType, KeyUse};
use crate::jwks::publisher::PublicJwk;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Private JSON Web Key parameters (RFC 7517/7518), base64url encoded.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct JsonWebKey {
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// RSA private exponent or EC private scalar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// RSA first prime factor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// RSA second prime factor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// RSA first factor CRT exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    /// RSA second factor CRT exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    /// RSA first CRT coefficient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    /// EC curve name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Symmetric key value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl JsonWebKey {
    /// Symmetric key holding only `k`.
    #[must_use]
    pub fn symmetric(k: impl Into<String>) -> Self {
        let mut jwk = Self::default();
        jwk.k = Some(k.into());
        jwk
    }

    /// Elliptic curve key. `d` is omitted for public-only keys.
    #[must_use]
    pub fn elliptic_curve(
        crv: impl Into<String>,
        x: impl Into<String>,
        y: impl Into<String>,
        d: Option<String>,
    ) -> Self {
        let mut jwk = Self::default();
        jwk.crv = Some(crv.into());
        jwk.x = Some(x.into());
        jwk.y = Some(y.into());
        jwk.d = d;
        jwk
    }

    /// Whether a private (or secret) component is present.
    #[must_use]
    pub const fn has_private_part(&self) -> bool {
        self.d.is_some() || self.k.is_some()
    }
}

impl fmt::Debug for JsonWebKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonWebKey")
            .field("crv", &self.crv)
            .field("has_private_part", &self.has_private_part())
            .finish_non_exhaustive()
    }
}

/// One generated key and its lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    id: String,
    #[serde(rename = "type")]
    key_type: KeyType,
    #[serde(rename = "use")]
    key_use: KeyUse,
    algorithm: Algorithm,
    parameters: JsonWebKey,
    created_at: DateTime<Utc>,
    #[serde(default)]
    revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    revoked_reason: Option<String>,
}

impl KeyMaterial {
    /// Wrap freshly generated parameters.
    ///
    /// Key type and use are derived from the algorithm.
    #[must_use]
    pub fn new(id: impl Into<String>, algorithm: Algorithm, parameters: JsonWebKey) -> Self {
        Self {
            id: id.into(),
            key_type: algorithm.kty(),
            key_use: algorithm.key_use(),
            algorithm,
            parameters,
            created_at: now(),
            revoked_at: None,
            revoked_reason: None,
        }
    }

    /// Override the creation time (used when restoring or backdating keys).
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.trunc_subsecs(6);
        self
    }

    /// Restore a revocation recorded by a store backend.
    #[must_use]
    pub fn with_revocation(
        mut self,
        revoked_at: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Self {
        self.revoked_at = revoked_at.map(|at| at.trunc_subsecs(6));
        self.revoked_reason = reason;
        self
    }

    /// Key identifier (`kid`).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key type copied from the generating algorithm.
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Logical slot this key belongs to.
    #[must_use]
    pub const fn key_use(&self) -> KeyUse {
        self.key_use
    }

    /// Algorithm used to generate this key.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Private key parameters.
    #[must_use]
    pub const fn parameters(&self) -> &JsonWebKey {
        &self.parameters
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Revocation time, if revoked.
    #[must_use]
    pub const fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    /// Revocation reason, if one was given.
    #[must_use]
    pub fn revoked_reason(&self) -> Option<&str> {
        self.revoked_reason.as_deref()
    }

    /// True when the key was revoked.
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// True when the key is older than `days_until_expire` days.
    #[must_use]
    pub fn is_expired(&self, days_until_expire: u32) -> bool {
        self.is_expired_at(days_until_expire, Utc::now())
    }

    /// Expiry check against an explicit clock.
    #[must_use]
    pub fn is_expired_at(&self, days_until_expire: u32, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::days(i64::from(days_until_expire))
    }

    /// Mark the key revoked.
    ///
    /// Returns `false` and leaves the record untouched if it was already
    /// revoked.
    pub fn revoke(&mut self, reason: Option<&str>) -> bool {
        if self.is_revoked() {
            return false;
        }
        self.revoked_at = Some(now());
        self.revoked_reason = reason.map(ToString::to_string);
        true
    }

    /// Curve of an elliptic curve key.
    #[must_use]
    pub fn curve(&self) -> Option<Curve> {
        self.algorithm.curve().ok()
    }

    /// Public-only projection for the JWKS document.
    ///
    /// Symmetric keys have no public half and yield `None`.
    #[must_use]
    pub fn public_jwk(&self) -> Option<PublicJwk> {
        let params = &self.parameters;
        match self.key_type {
            KeyType::Octet => None,
            KeyType::Rsa => Some(PublicJwk {
                kty: KeyType::Rsa.as_str().to_string(),
                key_use: self.key_use.as_str().to_string(),
                key_ops: self.key_use.public_key_ops(),
                alg: self.algorithm.name().to_string(),
                kid: self.id.clone(),
                n: params.n.clone(),
                e: params.e.clone(),
                crv: None,
                x: None,
                y: None,
            }),
            KeyType::EllipticCurve => Some(PublicJwk {
                kty: KeyType::EllipticCurve.as_str().to_string(),
                key_use: self.key_use.as_str().to_string(),
                key_ops: self.key_use.public_key_ops(),
                alg: self.algorithm.name().to_string(),
                kid: self.id.clone(),
                n: None,
                e: None,
                crv: params.crv.clone(),
                x: params.x.clone(),
                y: params.y.clone(),
            }),
        }
    }

    /// RFC 7638 thumbprint of the public key.
    #[must_use]
    pub fn thumbprint(&self) -> Option<String> {
        self.public_jwk().map(|jwk| jwk.thumbprint())
    }
}

/// Timestamps are kept at microsecond precision, the finest every backend
/// stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
