//! Key persistence.
//!
//! Every backend implements the same [`KeyStore`] contract:
//!
//! - the current key of a slot is the newest non-revoked key with that use;
//! - `get_last_keys` is newest first and includes revoked keys;
//! - `revoke` is idempotent and never deletes;
//! - `replace_current` is a compare-and-swap on the current slot, so two
//!   concurrent rotations cannot both install a new current key.

pub mod database;
pub mod file;
pub mod memory;
pub mod vault;

pub use database::DatabaseKeyStore;
pub use file::FileKeyStore;
pub use memory::MemoryKeyStore;
pub use vault::VaultKeyStore;

use crate::config::StoreConfig;
use crate::crypto::KeyUse;
use crate::error::Result;
use crate::jwks::KeyMaterial;
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence contract shared by all backends.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Short backend name for logs and metrics.
    fn backend(&self) -> &'static str;

    /// Persist a new key. Durable when this returns.
    async fn store(&self, material: &KeyMaterial) -> Result<()>;

    /// Newest non-revoked key of a slot, `None` when the slot is empty.
    async fn get_current(&self, key_use: KeyUse) -> Result<Option<KeyMaterial>>;

    /// Key by id, `None` when absent.
    async fn get(&self, key_id: &str) -> Result<Option<KeyMaterial>>;

    /// Up to `quantity` keys, newest first, optionally restricted to one use.
    async fn get_last_keys(
        &self,
        quantity: usize,
        key_use: Option<KeyUse>,
    ) -> Result<Vec<KeyMaterial>>;

    /// Mark a key revoked. Revoking an already revoked key changes nothing.
    ///
    /// Returns the stored record, or `None` when the id is unknown.
    async fn revoke(&self, key_id: &str, reason: Option<&str>) -> Result<Option<KeyMaterial>>;

    /// Install `material` as the current key of its slot if the current key
    /// is still `expected_current`, optionally revoking the replaced key.
    ///
    /// Returns `false`, storing nothing, when another writer got there first.
    async fn replace_current(
        &self,
        expected_current: Option<&str>,
        material: &KeyMaterial,
        revoke_reason: Option<&str>,
    ) -> Result<bool>;

    /// Remove everything. Not for production use.
    async fn clear(&self) -> Result<()>;
}

/// Build the backend selected by configuration.
///
/// # Errors
///
/// Returns `InvalidConfiguration` for invalid settings and
/// `StoreUnavailable` when the backend cannot be reached or initialised.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn KeyStore>> {
    config.validate()?;
    let store: Arc<dyn KeyStore> = match config {
        StoreConfig::Memory => Arc::new(MemoryKeyStore::new()),
        StoreConfig::File { directory } => Arc::new(FileKeyStore::open(directory).await?),
        StoreConfig::Database {
            url,
            max_connections,
        } => Arc::new(DatabaseKeyStore::connect(url, *max_connections).await?),
        StoreConfig::Vault(vault) => Arc::new(VaultKeyStore::new(vault)?),
    };
    tracing::info!(backend = store.backend(), "Key store ready");
    Ok(store)
}

const MAX_KEY_ID_LEN: usize = 200;

/// Key ids end up in file names and Vault paths: no separators, no leading dot.
pub(crate) fn is_valid_key_id(key_id: &str) -> bool {
    !key_id.is_empty()
        && key_id.len() <= MAX_KEY_ID_LEN
        && !key_id.starts_with('.')
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Newest first. `keys` arrive in storage order; ties on the creation time
/// keep the later-stored key first.
pub(crate) fn sort_newest_first(keys: &mut [KeyMaterial]) {
    keys.reverse();
    keys.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

/// Newest non-revoked key of a slot among `keys`.
pub(crate) fn select_current<'a>(
    keys: impl IntoIterator<Item = &'a KeyMaterial>,
    key_use: KeyUse,
) -> Option<&'a KeyMaterial> {
    keys.into_iter()
        .filter(|k| k.key_use() == key_use && !k.is_revoked())
        .fold(None, |best: Option<&'a KeyMaterial>, k| match best {
            Some(b) if b.created_at() > k.created_at() => Some(b),
            _ => Some(k),
        })
}

/// Newest-first page of `keys` for `get_last_keys`.
pub(crate) fn last_keys(
    mut keys: Vec<KeyMaterial>,
    quantity: usize,
    key_use: Option<KeyUse>,
) -> Vec<KeyMaterial> {
    keys.retain(|k| key_use.is_none_or(|u| k.key_use() == u));
    sort_newest_first(&mut keys);
    keys.truncate(quantity);
    keys
}
