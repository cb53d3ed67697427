//! JWS signature primitives over serialized key parameters.
//!
//! Keys are rebuilt from their JWK members on every call, which exercises the
//! same path a key restored from any store backend takes.

use super::algorithm::{Algorithm, HashAlgorithm, KeyType};
use super::b64_member;
use crate::error::{JwksError, Result};
use crate::jwks::{JsonWebKey, KeyMaterial};
use rand::rngs::OsRng;
use ring::hmac;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};

macro_rules! ec_sign {
    ($curve:ident, $jwk:expr, $message:expr) => {{
        use $curve::ecdsa::signature::Signer;
        let d = b64_member($jwk.d.as_ref(), "d")?;
        let key = $curve::ecdsa::SigningKey::from_slice(&d)
            .map_err(|e| JwksError::serialization(format!("invalid EC private key: {e}")))?;
        let signature: $curve::ecdsa::Signature = key.sign($message);
        signature.to_bytes().to_vec()
    }};
}

macro_rules! ec_verify {
    ($curve:ident, $jwk:expr, $message:expr, $signature:expr) => {{
        use $curve::ecdsa::signature::Verifier;
        let key = $curve::ecdsa::VerifyingKey::from_sec1_bytes(&sec1_point($jwk)?)
            .map_err(|e| JwksError::serialization(format!("invalid EC public key: {e}")))?;
        match $curve::ecdsa::Signature::from_slice($signature) {
            Ok(signature) => key.verify($message, &signature).is_ok(),
            Err(_) => false,
        }
    }};
}

macro_rules! rsa_sign {
    ($scheme:ident, $key:expr, $digest:ty, $message:expr) => {{
        use rsa::signature::{RandomizedSigner, SignatureEncoding};
        let signer = rsa::$scheme::SigningKey::<$digest>::new($key);
        signer.sign_with_rng(&mut OsRng, $message).to_vec()
    }};
}

macro_rules! rsa_verify {
    ($scheme:ident, $key:expr, $digest:ty, $message:expr, $signature:expr) => {{
        use rsa::signature::Verifier;
        let verifier = rsa::$scheme::VerifyingKey::<$digest>::new($key);
        match rsa::$scheme::Signature::try_from($signature) {
            Ok(signature) => verifier.verify($message, &signature).is_ok(),
            Err(_) => false,
        }
    }};
}

/// Sign `message` with the private half of `key`.
///
/// # Errors
///
/// Returns `UnsupportedAlgorithm` for key management algorithms and
/// `Serialization` when the stored parameters do not form a valid key.
pub fn sign(key: &KeyMaterial, message: &[u8]) -> Result<Vec<u8>> {
    let algorithm = key.algorithm();
    let hash = algorithm.hash()?;
    let jwk = key.parameters();
    let signature = match algorithm {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
            let private = rsa_private_key(jwk)?;
            match hash {
                HashAlgorithm::Sha256 => rsa_sign!(pkcs1v15, private, Sha256, message),
                HashAlgorithm::Sha384 => rsa_sign!(pkcs1v15, private, Sha384, message),
                HashAlgorithm::Sha512 => rsa_sign!(pkcs1v15, private, Sha512, message),
            }
        }
        Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512 => {
            let private = rsa_private_key(jwk)?;
            match hash {
                HashAlgorithm::Sha256 => rsa_sign!(pss, private, Sha256, message),
                HashAlgorithm::Sha384 => rsa_sign!(pss, private, Sha384, message),
                HashAlgorithm::Sha512 => rsa_sign!(pss, private, Sha512, message),
            }
        }
        Algorithm::ES256 => ec_sign!(p256, jwk, message),
        Algorithm::ES384 => ec_sign!(p384, jwk, message),
        Algorithm::ES512 => ec_sign!(p521, jwk, message),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            let secret = hmac_key(jwk, hash)?;
            hmac::sign(&secret, message).as_ref().to_vec()
        }
        other => {
            return Err(JwksError::unsupported(format!("{other} cannot sign")));
        }
    };
    Ok(signature)
}

/// Verify a signature produced by [`sign`].
///
/// A malformed or mismatching signature yields `Ok(false)`; only unusable key
/// parameters are errors.
///
/// # Errors
///
/// Returns `UnsupportedAlgorithm` for key management algorithms and
/// `Serialization` when the stored parameters do not form a valid key.
pub fn verify(key: &KeyMaterial, message: &[u8], signature: &[u8]) -> Result<bool> {
    let algorithm = key.algorithm();
    let hash = algorithm.hash()?;
    let jwk = key.parameters();
    let valid = match algorithm {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
            let public = rsa_public_key(jwk)?;
            match hash {
                HashAlgorithm::Sha256 => rsa_verify!(pkcs1v15, public, Sha256, message, signature),
                HashAlgorithm::Sha384 => rsa_verify!(pkcs1v15, public, Sha384, message, signature),
                HashAlgorithm::Sha512 => rsa_verify!(pkcs1v15, public, Sha512, message, signature),
            }
        }
        Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512 => {
            let public = rsa_public_key(jwk)?;
            match hash {
                HashAlgorithm::Sha256 => rsa_verify!(pss, public, Sha256, message, signature),
                HashAlgorithm::Sha384 => rsa_verify!(pss, public, Sha384, message, signature),
                HashAlgorithm::Sha512 => rsa_verify!(pss, public, Sha512, message, signature),
            }
        }
        Algorithm::ES256 => ec_verify!(p256, jwk, message, signature),
        Algorithm::ES384 => ec_verify!(p384, jwk, message, signature),
        Algorithm::ES512 => ec_verify!(p521, jwk, message, signature),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            let secret = hmac_key(jwk, hash)?;
            hmac::verify(&secret, message, signature).is_ok()
        }
        other => {
            return Err(JwksError::unsupported(format!("{other} cannot verify")));
        }
    };
    Ok(valid)
}

/// Rebuild the RSA private key from its JWK members.
pub(crate) fn rsa_private_key(jwk: &JsonWebKey) -> Result<RsaPrivateKey> {
    let member = |value: &Option<String>, name: &str| {
        b64_member(value.as_ref(), name).map(|bytes| BigUint::from_bytes_be(&bytes))
    };
    let primes = vec![member(&jwk.p, "p")?, member(&jwk.q, "q")?];
    RsaPrivateKey::from_components(member(&jwk.n, "n")?, member(&jwk.e, "e")?, member(&jwk.d, "d")?, primes)
        .map_err(|e| JwksError::serialization(format!("invalid RSA private key: {e}")))
}

/// Rebuild the RSA public key from `n` and `e`.
pub(crate) fn rsa_public_key(jwk: &JsonWebKey) -> Result<RsaPublicKey> {
    let n = BigUint::from_bytes_be(&b64_member(jwk.n.as_ref(), "n")?);
    let e = BigUint::from_bytes_be(&b64_member(jwk.e.as_ref(), "e")?);
    RsaPublicKey::new(n, e).map_err(|e| JwksError::serialization(format!("invalid RSA public key: {e}")))
}

/// Uncompressed SEC1 encoding of the public point.
fn sec1_point(jwk: &JsonWebKey) -> Result<Vec<u8>> {
    let x = b64_member(jwk.x.as_ref(), "x")?;
    let y = b64_member(jwk.y.as_ref(), "y")?;
    let mut point = Vec::with_capacity(1 + x.len() + y.len());
    point.push(0x04);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);
    Ok(point)
}

fn hmac_key(jwk: &JsonWebKey, hash: HashAlgorithm) -> Result<hmac::Key> {
    let secret = b64_member(jwk.k.as_ref(), "k")?;
    let algorithm = match hash {
        HashAlgorithm::Sha256 => hmac::HMAC_SHA256,
        HashAlgorithm::Sha384 => hmac::HMAC_SHA384,
        HashAlgorithm::Sha512 => hmac::HMAC_SHA512,
    };
    Ok(hmac::Key::new(algorithm, &secret))
}

/// Whether `algorithm` can produce JWS signatures with a key of `key_type`.
#[must_use]
pub fn can_sign(algorithm: Algorithm, key_type: KeyType) -> bool {
    algorithm.hash().is_ok() && algorithm.kty() == key_type
}
