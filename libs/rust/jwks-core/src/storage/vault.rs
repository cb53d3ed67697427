//! HashiCorp Vault KV v2 key store.
//!
//! Keys live at `<mount>/data/<prefix>/keys/<kid>` and the current pointers
//! at `<mount>/data/<prefix>/current/<use>`. Pointer updates use KV v2
//! check-and-set, so rotations racing from different processes cannot both
//! win. Encryption at rest is left to Vault.

use super::{KeyStore, is_valid_key_id, last_keys, select_current};
use crate::config::VaultStoreConfig;
use crate::crypto::KeyUse;
use crate::error::{JwksError, Result};
use crate::jwks::KeyMaterial;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct KvReadResponse<T> {
    data: KvData<T>,
}

#[derive(Debug, Deserialize)]
struct KvData<T> {
    data: T,
    metadata: KvMetadata,
}

#[derive(Debug, Deserialize)]
struct KvMetadata {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct KvListResponse {
    data: KvKeys,
}

#[derive(Debug, Deserialize)]
struct KvKeys {
    keys: Vec<String>,
}

#[derive(Serialize)]
struct KvWriteRequest<'a, T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<KvWriteOptions>,
    data: &'a T,
}

#[derive(Serialize)]
struct KvWriteOptions {
    cas: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CurrentPointer {
    id: String,
}

/// Key store backed by Vault KV v2.
pub struct VaultKeyStore {
    http: Client,
    addr: String,
    token: SecretString,
    mount: String,
    prefix: String,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for VaultKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeyStore")
            .field("addr", &self.addr)
            .field("mount", &self.mount)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl VaultKeyStore {
    /// Create a store for the given Vault settings.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the HTTP client cannot be built.
    pub fn new(config: &VaultStoreConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            addr: config.addr.trim_end_matches('/').to_string(),
            token: SecretString::from(config.token.expose_secret().to_string()),
            mount: config.mount.trim_matches('/').to_string(),
            prefix: config.prefix.trim_matches('/').to_string(),
            write_lock: Mutex::new(()),
        })
    }

    fn data_url(&self, path: &str) -> String {
        format!("{}/v1/{}/data/{}/{path}", self.addr, self.mount, self.prefix)
    }

    fn metadata_url(&self, path: &str) -> String {
        format!("{}/v1/{}/metadata/{}/{path}", self.addr, self.mount, self.prefix)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("X-Vault-Token", self.token.expose_secret())
    }

    /// Read a secret and its version, `None` on 404.
    async fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<(T, u64)>> {
        let response = self.request(Method::GET, &self.data_url(path)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: KvReadResponse<T> = response.json().await?;
                Ok(Some((body.data.data, body.data.metadata.version)))
            }
            status => Err(unavailable(status, response).await),
        }
    }

    /// Write a secret. With `cas`, returns `false` when the version moved.
    async fn write<T: Serialize + Sync>(
        &self,
        path: &str,
        data: &T,
        cas: Option<u64>,
    ) -> Result<bool> {
        let body = KvWriteRequest {
            options: cas.map(|cas| KvWriteOptions { cas }),
            data,
        };
        let response = self
            .request(Method::POST, &self.data_url(path))
            .json(&body)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::BAD_REQUEST if cas.is_some() => {
                let text = response.text().await.unwrap_or_default();
                if text.contains("check-and-set") {
                    Ok(false)
                } else {
                    Err(JwksError::store(format!("Status 400: {text}")))
                }
            }
            status => Err(unavailable(status, response).await),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let response = self
            .request(Method::GET, &self.metadata_url(path))
            .query(&[("list", "true")])
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let body: KvListResponse = response.json().await?;
                Ok(body.data.keys)
            }
            status => Err(unavailable(status, response).await),
        }
    }

    /// Remove every version of a secret.
    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &self.metadata_url(path))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => Err(unavailable(status, response).await),
        }
    }

    async fn read_key(&self, key_id: &str) -> Result<Option<KeyMaterial>> {
        if !is_valid_key_id(key_id) {
            return Ok(None);
        }
        Ok(self
            .read::<KeyMaterial>(&format!("keys/{key_id}"))
            .await?
            .map(|(key, _)| key))
    }

    async fn write_key(&self, material: &KeyMaterial) -> Result<()> {
        if !is_valid_key_id(material.id()) {
            return Err(JwksError::config(format!(
                "key id {:?} is not a valid Vault path segment",
                material.id()
            )));
        }
        self.write(&format!("keys/{}", material.id()), material, None)
            .await
            .map(|_| ())
    }

    async fn read_all(&self) -> Result<Vec<KeyMaterial>> {
        let mut keys = Vec::new();
        for name in self.list("keys").await? {
            if let Some(key) = self.read_key(name.trim_end_matches('/')).await? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn pointer_path(key_use: KeyUse) -> String {
        format!("current/{}", key_use.as_str())
    }

    async fn refresh_pointer(&self, key_use: KeyUse) -> Result<()> {
        let keys = self.read_all().await?;
        match select_current(&keys, key_use) {
            Some(current) => {
                let pointer = CurrentPointer {
                    id: current.id().to_string(),
                };
                self.write(&Self::pointer_path(key_use), &pointer, None)
                    .await
                    .map(|_| ())
            }
            None => self.delete(&Self::pointer_path(key_use)).await,
        }
    }
}

async fn unavailable(status: StatusCode, response: reqwest::Response) -> JwksError {
    let text = response.text().await.unwrap_or_default();
    JwksError::store(format!("Status {status}: {text}"))
}

#[async_trait]
impl KeyStore for VaultKeyStore {
    fn backend(&self) -> &'static str {
        "vault"
    }

    #[instrument(skip(self, material), fields(key_id = %material.id()))]
    async fn store(&self, material: &KeyMaterial) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_key(material).await?;
        self.refresh_pointer(material.key_use()).await
    }

    #[instrument(skip(self))]
    async fn get_current(&self, key_use: KeyUse) -> Result<Option<KeyMaterial>> {
        if let Some((pointer, _)) = self
            .read::<CurrentPointer>(&Self::pointer_path(key_use))
            .await?
        {
            if let Some(key) = self.read_key(&pointer.id).await? {
                if key.key_use() == key_use && !key.is_revoked() {
                    return Ok(Some(key));
                }
            }
            warn!(key_id = %pointer.id, "Stale current pointer, scanning keys");
        }
        let keys = self.read_all().await?;
        Ok(select_current(&keys, key_use).cloned())
    }

    async fn get(&self, key_id: &str) -> Result<Option<KeyMaterial>> {
        self.read_key(key_id).await
    }

    async fn get_last_keys(
        &self,
        quantity: usize,
        key_use: Option<KeyUse>,
    ) -> Result<Vec<KeyMaterial>> {
        Ok(last_keys(self.read_all().await?, quantity, key_use))
    }

    #[instrument(skip(self))]
    async fn revoke(&self, key_id: &str, reason: Option<&str>) -> Result<Option<KeyMaterial>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut key) = self.read_key(key_id).await? else {
            return Ok(None);
        };
        if key.revoke(reason) {
            self.write_key(&key).await?;
            self.refresh_pointer(key.key_use()).await?;
        }
        Ok(Some(key))
    }

    #[instrument(skip(self, material), fields(key_id = %material.id()))]
    async fn replace_current(
        &self,
        expected_current: Option<&str>,
        material: &KeyMaterial,
        revoke_reason: Option<&str>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let pointer_path = Self::pointer_path(material.key_use());
        let version = self
            .read::<CurrentPointer>(&pointer_path)
            .await?
            .map_or(0, |(_, version)| version);

        let keys = self.read_all().await?;
        let current = select_current(&keys, material.key_use());
        if current.map(KeyMaterial::id) != expected_current {
            return Ok(false);
        }

        self.write_key(material).await?;
        let pointer = CurrentPointer {
            id: material.id().to_string(),
        };
        if !self.write(&pointer_path, &pointer, Some(version)).await? {
            debug!("Current pointer moved concurrently, discarding new key");
            self.delete(&format!("keys/{}", material.id())).await?;
            return Ok(false);
        }

        if let (Some(current), Some(reason)) = (current, revoke_reason) {
            let mut replaced = current.clone();
            replaced.revoke(Some(reason));
            self.write_key(&replaced).await?;
        }
        Ok(true)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for name in self.list("keys").await? {
            self.delete(&format!("keys/{}", name.trim_end_matches('/'))).await?;
        }
        for key_use in [KeyUse::Signature, KeyUse::Encryption] {
            self.delete(&Self::pointer_path(key_use)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(addr: &str) -> VaultKeyStore {
        VaultKeyStore::new(
            &VaultStoreConfig::new(addr, "s.test")
                .with_mount("/kv/")
                .with_prefix("auth/jwks"),
        )
        .unwrap()
    }

    #[test]
    fn test_paths() {
        let store = store("http://vault:8200/");
        assert_eq!(
            store.data_url("keys/abc"),
            "http://vault:8200/v1/kv/data/auth/jwks/keys/abc"
        );
        assert_eq!(
            store.metadata_url("keys"),
            "http://vault:8200/v1/kv/metadata/auth/jwks/keys"
        );
        assert_eq!(VaultKeyStore::pointer_path(KeyUse::Encryption), "current/enc");
    }

    #[test]
    fn test_debug_hides_token() {
        let debug = format!("{:?}", store("http://vault:8200"));
        assert!(!debug.contains("s.test"));
    }
}
