//! Public JWKS document and its time-bounded cache.

use crate::crypto::KeyType;
use crate::error::{JwksError, Result};
use crate::jwks::KeyMaterial;
use arc_swap::ArcSwapOption;
use base64::Engine;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Public-only JSON Web Key as served in the JWKS document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    /// Key type (RSA, EC)
    pub kty: String,
    /// Key use (sig, enc)
    #[serde(rename = "use")]
    pub key_use: String,
    /// Permitted operations
    pub key_ops: Vec<String>,
    /// Algorithm
    pub alg: String,
    /// Key ID
    pub kid: String,
    /// RSA modulus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl PublicJwk {
    /// RFC 7638 SHA-256 thumbprint, base64url without padding.
    ///
    /// Only the required members take part, in lexicographic order.
    #[must_use]
    pub fn thumbprint(&self) -> String {
        let canonical = match self.kty.as_str() {
            "EC" => format!(
                r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                self.crv.as_deref().unwrap_or_default(),
                self.x.as_deref().unwrap_or_default(),
                self.y.as_deref().unwrap_or_default()
            ),
            _ => format!(
                r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
                self.e.as_deref().unwrap_or_default(),
                self.n.as_deref().unwrap_or_default()
            ),
        };
        let hash = Sha256::digest(canonical.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
    }

    /// `jsonwebtoken` decoding key built from the public members.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when members are missing or malformed.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        let missing = |member: &str| JwksError::serialization(format!("missing JWK member {member}"));
        let key = match self.kty.parse::<KeyType>()? {
            KeyType::Rsa => DecodingKey::from_rsa_components(
                self.n.as_deref().ok_or_else(|| missing("n"))?,
                self.e.as_deref().ok_or_else(|| missing("e"))?,
            ),
            KeyType::EllipticCurve => DecodingKey::from_ec_components(
                self.x.as_deref().ok_or_else(|| missing("x"))?,
                self.y.as_deref().ok_or_else(|| missing("y"))?,
            ),
            KeyType::Octet => {
                return Err(JwksError::serialization("symmetric keys are never published"));
            }
        };
        key.map_err(|e| JwksError::serialization(e.to_string()))
    }
}

/// JSON Web Key Set document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Published keys
    pub keys: Vec<PublicJwk>,
}

impl JsonWebKeySet {
    /// Project key material into a public document.
    ///
    /// Symmetric keys are skipped.
    #[must_use]
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a KeyMaterial>) -> Self {
        Self {
            keys: keys.into_iter().filter_map(KeyMaterial::public_jwk).collect(),
        }
    }

    /// Look up a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&PublicJwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Serialize the document.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

struct CachedJwks {
    jwks: Arc<JsonWebKeySet>,
    fetched_at: Instant,
    epoch: u64,
}

/// Time-bounded cache of the public JWKS document.
///
/// Reads are lock-free; rotation and revocation call [`JwksCache::invalidate`].
/// A document built from a store read that started before the latest
/// invalidation is never served: builders take [`JwksCache::epoch`] before
/// reading keys and hand it back to [`JwksCache::put`].
pub struct JwksCache {
    entry: ArcSwapOption<CachedJwks>,
    epoch: AtomicU64,
    ttl: Duration,
}

impl JwksCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: ArcSwapOption::const_empty(),
            epoch: AtomicU64::new(0),
            ttl,
        }
    }

    /// Current invalidation epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Cached document, if present, younger than the TTL and built in the
    /// current epoch.
    #[must_use]
    pub fn get(&self) -> Option<Arc<JsonWebKeySet>> {
        let epoch = self.epoch();
        let entry = self.entry.load();
        entry
            .as_deref()
            .filter(|entry| entry.epoch == epoch && entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.jwks))
    }

    /// Cache a document built from keys read during `epoch`.
    ///
    /// The document is returned either way; it is only kept when no
    /// invalidation happened since `epoch` was taken.
    pub fn put(&self, epoch: u64, jwks: JsonWebKeySet) -> Arc<JsonWebKeySet> {
        let jwks = Arc::new(jwks);
        if epoch == self.epoch() {
            self.entry.store(Some(Arc::new(CachedJwks {
                jwks: Arc::clone(&jwks),
                fetched_at: Instant::now(),
                epoch,
            })));
        }
        jwks
    }

    /// Drop the cached document and start a new epoch.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entry.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Algorithm, KeyFactory};

    #[test]
    fn test_rfc7638_example_thumbprint() {
        // RFC 7638 section 3.1
        let jwk = PublicJwk {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            key_ops: vec!["verify".to_string()],
            alg: "RS256".to_string(),
            kid: "2011-04-29".to_string(),
            n: Some("0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".to_string()),
            e: Some("AQAB".to_string()),
            crv: None,
            x: None,
            y: None,
        };
        assert_eq!(jwk.thumbprint(), "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs");
    }

    #[test]
    fn test_key_set_skips_symmetric_keys() {
        let factory = KeyFactory::new("t_");
        let hmac = factory.create(Algorithm::HS512).unwrap();
        let ec = factory.create(Algorithm::ES384).unwrap();
        let jwks = JsonWebKeySet::from_keys([&hmac, &ec]);

        assert_eq!(jwks.keys.len(), 1);
        assert!(jwks.find(ec.id()).is_some());
        assert!(jwks.find(hmac.id()).is_none());

        let json = jwks.to_json().unwrap();
        let secret = hmac.parameters().k.clone().unwrap();
        assert!(!json.contains(&secret));
        assert!(!json.contains("\"k\""));
        assert!(!json.contains("\"d\""));
    }

    #[test]
    fn test_ec_decoding_key() {
        let key = KeyFactory::new("t_").create(Algorithm::ES256).unwrap();
        assert!(key.public_jwk().unwrap().decoding_key().is_ok());
    }

    #[test]
    fn test_cache_expiry_and_invalidation() {
        let cache = JwksCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());
        cache.put(cache.epoch(), JsonWebKeySet::default());
        assert!(cache.get().is_some());
        cache.invalidate();
        assert!(cache.get().is_none());

        let expired = JwksCache::new(Duration::ZERO);
        expired.put(expired.epoch(), JsonWebKeySet::default());
        assert!(expired.get().is_none());
    }

    #[test]
    fn test_build_overlapping_invalidation_is_not_cached() {
        let cache = JwksCache::new(Duration::from_secs(60));
        let epoch = cache.epoch();
        cache.invalidate();
        let jwks = cache.put(epoch, JsonWebKeySet::default());
        assert!(jwks.keys.is_empty());
        assert!(cache.get().is_none());

        cache.put(cache.epoch(), JsonWebKeySet::default());
        assert!(cache.get().is_some());
    }
}
