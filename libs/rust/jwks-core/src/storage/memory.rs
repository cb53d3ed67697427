//! Process-local key store. Nothing survives a restart.

use super::{KeyStore, last_keys, select_current};
use crate::crypto::KeyUse;
use crate::error::Result;
use crate::jwks::KeyMaterial;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// In-memory store backed by a vector in insertion order.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<Vec<KeyMaterial>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, revoked ones included.
    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn store(&self, material: &KeyMaterial) -> Result<()> {
        self.keys.write().await.push(material.clone());
        Ok(())
    }

    async fn get_current(&self, key_use: KeyUse) -> Result<Option<KeyMaterial>> {
        let keys = self.keys.read().await;
        Ok(select_current(keys.iter(), key_use).cloned())
    }

    async fn get(&self, key_id: &str) -> Result<Option<KeyMaterial>> {
        let keys = self.keys.read().await;
        Ok(keys.iter().find(|k| k.id() == key_id).cloned())
    }

    async fn get_last_keys(
        &self,
        quantity: usize,
        key_use: Option<KeyUse>,
    ) -> Result<Vec<KeyMaterial>> {
        let keys = self.keys.read().await.clone();
        Ok(last_keys(keys, quantity, key_use))
    }

    async fn revoke(&self, key_id: &str, reason: Option<&str>) -> Result<Option<KeyMaterial>> {
        let mut keys = self.keys.write().await;
        Ok(keys.iter_mut().find(|k| k.id() == key_id).map(|key| {
            key.revoke(reason);
            key.clone()
        }))
    }

    async fn replace_current(
        &self,
        expected_current: Option<&str>,
        material: &KeyMaterial,
        revoke_reason: Option<&str>,
    ) -> Result<bool> {
        let mut keys = self.keys.write().await;
        let current = select_current(keys.iter(), material.key_use()).map(|k| k.id().to_string());
        if current.as_deref() != expected_current {
            return Ok(false);
        }
        if let (Some(expected), Some(reason)) = (expected_current, revoke_reason) {
            if let Some(key) = keys.iter_mut().find(|k| k.id() == expected) {
                key.revoke(Some(reason));
            }
        }
        keys.push(material.clone());
        Ok(true)
    }

    async fn clear(&self) -> Result<()> {
        self.keys.write().await.clear();
        Ok(())
    }
}
