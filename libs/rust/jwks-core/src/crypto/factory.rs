//! Key generation for every algorithm in the catalog.
//!
//! Generation is CPU bound (an RSA-3072 key takes a noticeable fraction of a
//! second), so async callers should run it on the blocking pool.

use super::algorithm::{Algorithm, Curve, KeyType};
use super::b64_encode;
use crate::error::{JwksError, Result};
use crate::jwks::{JsonWebKey, KeyMaterial};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};

/// Smallest RSA modulus the factory will produce.
pub const MIN_RSA_KEY_SIZE: usize = 3072;

/// Random bytes behind every key id.
const KEY_ID_BYTES: usize = 16;

macro_rules! generate_ec_key {
    ($curve:ident) => {{
        let signing_key = $curve::ecdsa::SigningKey::random(&mut OsRng);
        let point = $curve::ecdsa::VerifyingKey::from(&signing_key).to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| JwksError::generation("public point has no x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| JwksError::generation("public point has no y coordinate"))?;
        (b64_encode(x), b64_encode(y), b64_encode(signing_key.to_bytes()))
    }};
}

/// Generates key material and unique key identifiers.
#[derive(Debug, Clone)]
pub struct KeyFactory {
    key_prefix: String,
    rsa_key_size: usize,
}

impl KeyFactory {
    /// Create a factory issuing key ids that start with `key_prefix`.
    #[must_use]
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            rsa_key_size: MIN_RSA_KEY_SIZE,
        }
    }

    /// Use a larger RSA modulus.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when `bits` is below [`MIN_RSA_KEY_SIZE`].
    pub fn with_rsa_key_size(mut self, bits: usize) -> Result<Self> {
        if bits < MIN_RSA_KEY_SIZE {
            return Err(JwksError::config(format!(
                "RSA key size {bits} is below the {MIN_RSA_KEY_SIZE} bit minimum"
            )));
        }
        self.rsa_key_size = bits;
        Ok(self)
    }

    /// Configured RSA modulus size in bits.
    #[must_use]
    pub const fn rsa_key_size(&self) -> usize {
        self.rsa_key_size
    }

    /// Fresh key id: the prefix plus 16 random bytes, base64url without padding.
    #[must_use]
    pub fn generate_key_id(&self) -> String {
        let mut bytes = [0u8; KEY_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        format!("{}{}", self.key_prefix, b64_encode(bytes))
    }

    /// Generate a key for any catalog algorithm.
    ///
    /// # Errors
    ///
    /// Returns `KeyGenerationFailed` if the primitive fails.
    pub fn create(&self, algorithm: Algorithm) -> Result<KeyMaterial> {
        match algorithm.kty() {
            KeyType::Rsa | KeyType::EllipticCurve => self.create_asymmetric_key(algorithm),
            KeyType::Octet => self.create_symmetric_key(algorithm),
        }
    }

    /// Generate an RSA or elliptic curve key pair.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for symmetric algorithms and
    /// `KeyGenerationFailed` if the primitive fails.
    pub fn create_asymmetric_key(&self, algorithm: Algorithm) -> Result<KeyMaterial> {
        let parameters = match algorithm.kty() {
            KeyType::Rsa => self.generate_rsa()?,
            KeyType::EllipticCurve => generate_ec(algorithm.curve()?)?,
            KeyType::Octet => {
                return Err(JwksError::unsupported(format!(
                    "{algorithm} is not an asymmetric algorithm"
                )));
            }
        };
        Ok(KeyMaterial::new(self.generate_key_id(), algorithm, parameters))
    }

    /// Generate an HMAC secret or AES key wrap key.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for asymmetric algorithms.
    pub fn create_symmetric_key(&self, algorithm: Algorithm) -> Result<KeyMaterial> {
        let mut secret = vec![0u8; algorithm.symmetric_key_len()?];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| JwksError::generation(e.to_string()))?;
        let parameters = JsonWebKey::symmetric(b64_encode(&secret));
        zeroize::Zeroize::zeroize(&mut secret);
        Ok(KeyMaterial::new(self.generate_key_id(), algorithm, parameters))
    }

    fn generate_rsa(&self) -> Result<JsonWebKey> {
        let key = RsaPrivateKey::new(&mut OsRng, self.rsa_key_size)
            .map_err(|e| JwksError::generation(e.to_string()))?;
        rsa_private_jwk(&key)
    }
}

/// Private JWK members of an RSA key, CRT values included.
pub(crate) fn rsa_private_jwk(key: &RsaPrivateKey) -> Result<JsonWebKey> {
    let [p, q] = key.primes() else {
        return Err(JwksError::generation("RSA key must have exactly two primes"));
    };
    let one = BigUint::from(1u32);
    let two = BigUint::from(2u32);
    let d = key.d();
    let dp = d % &(p - &one);
    let dq = d % &(q - &one);
    // p is prime, so q^(p-2) mod p is the inverse of q.
    let qi = q.modpow(&(p - &two), p);

    let mut jwk = JsonWebKey::default();
    jwk.n = Some(b64_encode(key.n().to_bytes_be()));
    jwk.e = Some(b64_encode(key.e().to_bytes_be()));
    jwk.d = Some(b64_encode(d.to_bytes_be()));
    jwk.p = Some(b64_encode(p.to_bytes_be()));
    jwk.q = Some(b64_encode(q.to_bytes_be()));
    jwk.dp = Some(b64_encode(dp.to_bytes_be()));
    jwk.dq = Some(b64_encode(dq.to_bytes_be()));
    jwk.qi = Some(b64_encode(qi.to_bytes_be()));
    Ok(jwk)
}

fn generate_ec(curve: Curve) -> Result<JsonWebKey> {
    let (x, y, d) = match curve {
        Curve::P256 => generate_ec_key!(p256),
        Curve::P384 => generate_ec_key!(p384),
        Curve::P521 => generate_ec_key!(p521),
    };
    Ok(JsonWebKey::elliptic_curve(curve.as_str(), x, y, Some(d)))
}
