//! Rotation policy over a key store.
//!
//! Each key use is a slot with one current key. On every credentials request
//! the slot is classified:
//!
//! - missing: nothing current, generate one;
//! - fresh: usable as-is;
//! - stale: expired (or revoked), revoke it and install a replacement;
//! - mismatched: generated under another algorithm, install a replacement
//!   but leave the old key valid for verification;
//! - superseded: the newest key of the slot is revoked and the store fell
//!   back to an older one, install a replacement instead of reusing it.
//!
//! Replacements go through [`KeyStore::replace_current`], so concurrent
//! rotations (in this process or another) agree on a single winner.

use crate::config::{JwksOptions, StoreConfig};
use crate::crypto::{Algorithm, KeyFactory, KeyUse, validate_catalog};
use crate::error::{JwksError, Result};
use crate::jwks::{JsonWebKeySet, JwksCache, KeyMaterial};
use crate::jwt::{EncryptingCredentials, SigningCredentials};
use crate::metrics;
use crate::storage::{KeyStore, build_store};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Attempts at installing a new current key before giving up.
const MAX_ROTATION_ATTEMPTS: usize = 3;

/// Revocation reason recorded on administrative rotation.
const FORCED_ROTATION_REASON: &str = "rotated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Missing,
    Expired,
    Revoked,
    AlgorithmChanged,
    Superseded,
    Forced,
}

impl Trigger {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::AlgorithmChanged => "algorithm_changed",
            Self::Superseded => "superseded",
            Self::Forced => "forced",
        }
    }
}

enum SlotState {
    Fresh(KeyMaterial),
    Missing,
    Stale { current: KeyMaterial, trigger: Trigger },
    Mismatched(KeyMaterial),
    Superseded(KeyMaterial),
}

/// Key lifecycle service: rotation, revocation and publication.
pub struct JwksService {
    options: JwksOptions,
    store: Arc<dyn KeyStore>,
    factory: KeyFactory,
    rotation_lock: Mutex<()>,
    cache: JwksCache,
}

impl std::fmt::Debug for JwksService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksService")
            .field("options", &self.options)
            .field("backend", &self.store.backend())
            .finish_non_exhaustive()
    }
}

impl JwksService {
    /// Create a service over `store`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the options are inconsistent or the
    /// algorithm catalog fails its startup check.
    pub fn new(options: JwksOptions, store: Arc<dyn KeyStore>) -> Result<Self> {
        options.validate()?;
        validate_catalog()?;
        let factory =
            KeyFactory::new(options.key_prefix.clone()).with_rsa_key_size(options.rsa_key_size)?;
        let cache = JwksCache::new(options.cache_duration);
        info!(
            backend = store.backend(),
            signing_algorithm = %options.signing_algorithm,
            encryption_algorithm = %options.encryption_algorithm,
            days_until_expire = options.days_until_expire,
            "JWKS service initialized"
        );
        Ok(Self {
            options,
            store,
            factory,
            rotation_lock: Mutex::new(()),
            cache,
        })
    }

    /// Build the service and its store from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for bad settings and
    /// `StoreUnavailable` if the store cannot be opened.
    pub async fn from_env() -> Result<Self> {
        let options = JwksOptions::from_env()?;
        let store = build_store(&StoreConfig::from_env()?).await?;
        Self::new(options, store)
    }

    /// Active options.
    #[must_use]
    pub const fn options(&self) -> &JwksOptions {
        &self.options
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Current signing key, rotated first if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` or `KeyGenerationFailed`; no credentials
    /// are ever returned from a stale or revoked key.
    pub async fn current_signing_credentials(&self) -> Result<SigningCredentials> {
        let key = self.ensure_current(KeyUse::Signature).await?;
        SigningCredentials::new(key)
    }

    /// Current encryption key, rotated first if needed, with the configured
    /// content encryption.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` or `KeyGenerationFailed`.
    pub async fn current_encrypting_credentials(&self) -> Result<EncryptingCredentials> {
        let key = self.ensure_current(KeyUse::Encryption).await?;
        EncryptingCredentials::new(key, self.options.content_encryption)
    }

    /// Up to `quantity` keys, newest first, revoked keys included.
    ///
    /// The page never exceeds `algorithms_to_keep`; read the store directly
    /// to inspect older generations.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store fails.
    pub async fn get_last_keys(
        &self,
        quantity: usize,
        key_use: Option<KeyUse>,
    ) -> Result<Vec<KeyMaterial>> {
        let quantity = quantity.min(self.options.algorithms_to_keep);
        let result = self.store.get_last_keys(quantity, key_use).await;
        self.observe("get_last_keys", result)
    }

    /// Signing keys offered to token validation: the last
    /// `algorithms_to_keep` generations.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store fails.
    pub async fn verification_keys(&self) -> Result<Vec<KeyMaterial>> {
        self.get_last_keys(self.options.algorithms_to_keep, Some(KeyUse::Signature))
            .await
    }

    /// Revoke a key by id. Revoking twice is harmless.
    ///
    /// No replacement is generated here; the next credentials request does
    /// that.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` for an unknown id and `StoreUnavailable` if the
    /// store fails.
    #[instrument(skip(self))]
    pub async fn revoke_key(&self, key_id: &str, reason: Option<&str>) -> Result<KeyMaterial> {
        let existing = self.observe("get", self.store.get(key_id).await)?;
        match existing {
            None => return Err(JwksError::KeyNotFound(key_id.to_string())),
            Some(key) if key.is_revoked() => {
                debug!("Key already revoked");
                return Ok(key);
            }
            Some(_) => {}
        }

        let revoked = self
            .observe("revoke", self.store.revoke(key_id, reason).await)?
            .ok_or_else(|| JwksError::KeyNotFound(key_id.to_string()))?;
        self.cache.invalidate();
        metrics::record_key_revoked(reason.unwrap_or("unspecified"));
        warn!(key_use = %revoked.key_use(), "Key revoked");
        Ok(revoked)
    }

    /// Force a rotation of a slot: revoke the current key (if any) and
    /// install a new one.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` or `KeyGenerationFailed`.
    #[instrument(skip(self))]
    pub async fn generate_new_key(&self, key_use: KeyUse) -> Result<KeyMaterial> {
        let _guard = self.rotation_lock.lock().await;
        for attempt in 1..=MAX_ROTATION_ATTEMPTS {
            let current = self.observe("get_current", self.store.get_current(key_use).await)?;
            let expected = current.as_ref().map(KeyMaterial::id);
            let key = self.generate(self.options.algorithm_for(key_use)).await?;
            let installed = self
                .store
                .replace_current(expected, &key, Some(FORCED_ROTATION_REASON))
                .await;
            if self.observe("replace_current", installed)? {
                self.rotated(&key, Trigger::Forced);
                return Ok(key);
            }
            debug!(attempt, "Current key changed during forced rotation, retrying");
        }
        Err(contended(key_use))
    }

    /// Public key set built from the last `algorithms_to_keep` keys of each
    /// use. Symmetric keys never appear.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store fails.
    pub async fn public_jwks(&self) -> Result<Arc<JsonWebKeySet>> {
        if let Some(jwks) = self.cache.get() {
            return Ok(jwks);
        }
        let epoch = self.cache.epoch();
        let mut keys = Vec::new();
        for key_use in [KeyUse::Signature, KeyUse::Encryption] {
            keys.extend(
                self.get_last_keys(self.options.algorithms_to_keep, Some(key_use))
                    .await?,
            );
        }
        let jwks = self.cache.put(epoch, JsonWebKeySet::from_keys(&keys));
        debug!(keys = jwks.keys.len(), "Public JWKS rebuilt");
        Ok(jwks)
    }

    /// Remove every key. Not for production use.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.rotation_lock.lock().await;
        self.observe("clear", self.store.clear().await)?;
        self.cache.invalidate();
        warn!("All keys removed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_current(&self, key_use: KeyUse) -> Result<KeyMaterial> {
        // A non-revoked newest key is also the current one.
        let newest = self.newest(key_use).await?.filter(|k| !k.is_revoked());
        if let SlotState::Fresh(key) = self.classify(newest, None, key_use) {
            return Ok(key);
        }

        let _guard = self.rotation_lock.lock().await;
        for attempt in 1..=MAX_ROTATION_ATTEMPTS {
            let newest = self.newest(key_use).await?;
            let current = self.observe("get_current", self.store.get_current(key_use).await)?;
            let state = self.classify(current, newest.as_ref(), key_use);
            let (expected, revoke_reason, trigger) = match state {
                SlotState::Fresh(key) => return Ok(key),
                SlotState::Missing => (None, None, Trigger::Missing),
                SlotState::Stale { current, trigger } => {
                    (Some(current), Some(trigger.as_str()), trigger)
                }
                SlotState::Mismatched(current) => (Some(current), None, Trigger::AlgorithmChanged),
                SlotState::Superseded(current) => (Some(current), None, Trigger::Superseded),
            };

            let key = self.generate(self.options.algorithm_for(key_use)).await?;
            let installed = self
                .store
                .replace_current(expected.as_ref().map(KeyMaterial::id), &key, revoke_reason)
                .await;
            if self.observe("replace_current", installed)? {
                if let Some(previous) = &expected {
                    info!(previous_key_id = %previous.id(), "Replaced current key");
                }
                self.rotated(&key, trigger);
                // Re-read so callers see whatever the store now calls current.
                if let Some(current) =
                    self.observe("get_current", self.store.get_current(key_use).await)?
                {
                    return Ok(current);
                }
            }
            debug!(attempt, "Current key changed during rotation, re-reading");
        }
        Err(contended(key_use))
    }

    /// Newest key of a slot, revoked or not.
    async fn newest(&self, key_use: KeyUse) -> Result<Option<KeyMaterial>> {
        let result = self.store.get_last_keys(1, Some(key_use)).await;
        Ok(self.observe("get_last_keys", result)?.into_iter().next())
    }

    /// Classify the store's current key. `newest` is the newest key of the
    /// slot when known; a current key older than it is a fallback left
    /// behind by a revocation and is never reused.
    fn classify(
        &self,
        current: Option<KeyMaterial>,
        newest: Option<&KeyMaterial>,
        key_use: KeyUse,
    ) -> SlotState {
        let Some(current) = current else {
            return SlotState::Missing;
        };
        if current.is_revoked() {
            return SlotState::Stale {
                current,
                trigger: Trigger::Revoked,
            };
        }
        if current.is_expired(self.options.days_until_expire) {
            return SlotState::Stale {
                current,
                trigger: Trigger::Expired,
            };
        }
        if newest.is_some_and(|newest| newest.created_at() > current.created_at()) {
            return SlotState::Superseded(current);
        }
        if current.algorithm() != self.options.algorithm_for(key_use) {
            return SlotState::Mismatched(current);
        }
        SlotState::Fresh(current)
    }

    async fn generate(&self, algorithm: Algorithm) -> Result<KeyMaterial> {
        let factory = self.factory.clone();
        let started = Instant::now();
        let key = tokio::task::spawn_blocking(move || factory.create(algorithm))
            .await
            .map_err(|e| JwksError::generation(format!("key generation task failed: {e}")))??;
        metrics::record_key_generated(
            algorithm.name(),
            algorithm.key_use().as_str(),
            started.elapsed().as_secs_f64(),
        );
        debug!(key_id = %key.id(), %algorithm, "Generated key");
        Ok(key)
    }

    fn rotated(&self, key: &KeyMaterial, trigger: Trigger) {
        self.cache.invalidate();
        metrics::record_rotation(key.key_use().as_str(), trigger.as_str());
        info!(
            key_id = %key.id(),
            algorithm = %key.algorithm(),
            trigger = trigger.as_str(),
            "Installed new current key"
        );
    }

    fn observe<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_store_operation(self.store.backend(), operation, status);
        if let Err(e) = &result {
            warn!(backend = self.store.backend(), operation, error = %e, "Key store operation failed");
        }
        result
    }
}

fn contended(key_use: KeyUse) -> JwksError {
    JwksError::store(format!(
        "current {key_use} key kept changing after {MAX_ROTATION_ATTEMPTS} rotation attempts"
    ))
}
