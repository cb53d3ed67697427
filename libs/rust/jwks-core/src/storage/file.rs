//! File-system key store.
//!
//! Layout under the store directory:
//!
//! ```text
//! <kid>.key      one JSON document per key
//! sig.current    id of the current signing key
//! enc.current    id of the current encryption key
//! ```
//!
//! Files are written to a temporary name, flushed and renamed into place, so
//! readers never observe a partial key. Mutations hold an exclusive advisory
//! lock on `.lock`, so stores opened on the same directory by several
//! processes still agree on a single current key.

use super::{KeyStore, is_valid_key_id, last_keys, select_current};
use crate::crypto::KeyUse;
use crate::error::{JwksError, Result};
use crate::jwks::KeyMaterial;
use async_trait::async_trait;
use fs4::fs_std::FileExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const KEY_EXTENSION: &str = "key";
const CURRENT_EXTENSION: &str = "current";
const LOCK_FILE: &str = ".lock";

/// Exclusive lock on a store directory, released when dropped.
struct DirectoryLock {
    _file: std::fs::File,
}

/// Key store keeping one file per key in a directory.
#[derive(Debug)]
pub struct FileKeyStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKeyStore {
    /// Open (and create if needed) a store directory.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the directory cannot be created.
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).await?;
        debug!(directory = %directory.display(), "Opened file key store");
        Ok(Self {
            directory,
            write_lock: Mutex::new(()),
        })
    }

    /// Store directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.directory.join(format!("{key_id}.{KEY_EXTENSION}"))
    }

    fn pointer_path(&self, key_use: KeyUse) -> PathBuf {
        self.directory
            .join(format!("{}.{CURRENT_EXTENSION}", key_use.as_str()))
    }

    async fn read_key(&self, key_id: &str) -> Result<Option<KeyMaterial>> {
        if !is_valid_key_id(key_id) {
            return Ok(None);
        }
        match fs::read(self.key_path(key_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_key(&self, material: &KeyMaterial) -> Result<()> {
        if !is_valid_key_id(material.id()) {
            return Err(JwksError::config(format!(
                "key id {:?} is not a valid file name",
                material.id()
            )));
        }
        let bytes = serde_json::to_vec_pretty(material)?;
        write_atomic(&self.key_path(material.id()), &bytes).await
    }

    async fn read_pointer(&self, key_use: KeyUse) -> Result<Option<String>> {
        match fs::read_to_string(self.pointer_path(key_use)).await {
            Ok(id) => Ok(Some(id.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Point the slot marker at the newest non-revoked key, or remove it.
    async fn refresh_pointer(&self, keys: &[KeyMaterial], key_use: KeyUse) -> Result<()> {
        let path = self.pointer_path(key_use);
        match select_current(keys, key_use) {
            Some(current) => write_atomic(&path, current.id().as_bytes()).await,
            None => match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Every readable key in the directory. Files removed while scanning
    /// and files that do not parse are skipped.
    async fn read_all(&self) -> Result<Vec<KeyMaterial>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<KeyMaterial>(&bytes) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable key file"),
            }
        }
        Ok(keys)
    }

    /// Take the cross-process lock on the store directory.
    async fn lock_directory(&self) -> Result<DirectoryLock> {
        let path = self.directory.join(LOCK_FILE);
        tokio::task::spawn_blocking(move || -> Result<DirectoryLock> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(DirectoryLock { _file: file })
        })
        .await
        .map_err(|e| JwksError::store(format!("directory lock task failed: {e}")))?
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn store(&self, material: &KeyMaterial) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock_directory().await?;
        self.write_key(material).await?;
        let keys = self.read_all().await?;
        self.refresh_pointer(&keys, material.key_use()).await
    }

    async fn get_current(&self, key_use: KeyUse) -> Result<Option<KeyMaterial>> {
        if let Some(id) = self.read_pointer(key_use).await? {
            if let Some(key) = self.read_key(&id).await? {
                if key.key_use() == key_use && !key.is_revoked() {
                    return Ok(Some(key));
                }
            }
            warn!(key_id = %id, key_use = %key_use, "Stale current pointer, scanning keys");
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

    async fn revoke(&self, key_id: &str, reason: Option<&str>) -> Result<Option<KeyMaterial>> {
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock_directory().await?;
        let Some(mut key) = self.read_key(key_id).await? else {
            return Ok(None);
        };
        if key.revoke(reason) {
            self.write_key(&key).await?;
            let keys = self.read_all().await?;
            self.refresh_pointer(&keys, key.key_use()).await?;
        }
        Ok(Some(key))
    }

    async fn replace_current(
        &self,
        expected_current: Option<&str>,
        material: &KeyMaterial,
        revoke_reason: Option<&str>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock_directory().await?;
        let keys = self.read_all().await?;
        let current = select_current(&keys, material.key_use());
        if current.map(KeyMaterial::id) != expected_current {
            return Ok(false);
        }
        if let (Some(current), Some(reason)) = (current, revoke_reason) {
            let mut replaced = current.clone();
            replaced.revoke(Some(reason));
            self.write_key(&replaced).await?;
        }
        self.write_key(material).await?;
        write_atomic(&self.pointer_path(material.key_use()), material.id().as_bytes()).await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock_directory().await?;
        let mut entries = fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext == Some(KEY_EXTENSION) || ext == Some(CURRENT_EXTENSION) {
                fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| JwksError::store(format!("invalid path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let result = async {
        let mut file = options.open(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Some(parent) = path.parent() {
        sync_directory(parent).await?;
    }
    Ok(())
}

/// Flush a directory entry so a completed rename survives a crash.
#[cfg(unix)]
async fn sync_directory(directory: &Path) -> Result<()> {
    fs::File::open(directory).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn sync_directory(_directory: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Algorithm, KeyFactory};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_layout_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::open(dir.path()).await.unwrap();
        let key = KeyFactory::new("f_").create(Algorithm::ES256).unwrap();
        store.store(&key).await.unwrap();

        assert!(dir.path().join(format!("{}.key", key.id())).exists());
        let pointer = std::fs::read_to_string(dir.path().join("sig.current")).unwrap();
        assert_eq!(pointer, key.id());

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_path_traversal_lookup_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::open(dir.path()).await.unwrap();
        assert!(store.get("../../secret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoking_current_moves_pointer() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::open(dir.path()).await.unwrap();
        let factory = KeyFactory::new("f_");
        let older = factory
            .create(Algorithm::HS256)
            .unwrap()
            .with_created_at(chrono::Utc::now() - chrono::Duration::hours(1));
        let newer = factory.create(Algorithm::HS256).unwrap();
        store.store(&older).await.unwrap();
        store.store(&newer).await.unwrap();

        store.revoke(newer.id(), Some("compromised")).await.unwrap();
        let current = store.get_current(KeyUse::Signature).await.unwrap().unwrap();
        assert_eq!(current.id(), older.id());

        store.revoke(older.id(), None).await.unwrap();
        assert!(store.get_current(KeyUse::Signature).await.unwrap().is_none());
        assert!(!dir.path().join("sig.current").exists());
    }

    #[tokio::test]
    async fn test_unreadable_key_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::open(dir.path()).await.unwrap();
        let key = KeyFactory::new("f_").create(Algorithm::ES256).unwrap();
        store.store(&key).await.unwrap();
        std::fs::write(dir.path().join("f_broken.key"), b"{ not json").unwrap();

        let last = store.get_last_keys(10, None).await.unwrap();
        assert_eq!(last, vec![key.clone()]);
        std::fs::remove_file(dir.path().join("sig.current")).unwrap();
        let current = store.get_current(KeyUse::Signature).await.unwrap();
        assert_eq!(current, Some(key));
    }

    #[tokio::test]
    async fn test_lock_file_is_not_a_key() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::open(dir.path()).await.unwrap();
        let key = KeyFactory::new("f_").create(Algorithm::HS256).unwrap();
        store.store(&key).await.unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());

        store.clear().await.unwrap();
        assert!(store.get_last_keys(10, None).await.unwrap().is_empty());
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_directory_lock_excludes_other_stores() {
        let dir = TempDir::new().unwrap();
        let first = FileKeyStore::open(dir.path()).await.unwrap();
        let second = FileKeyStore::open(dir.path()).await.unwrap();

        let held = first.lock_directory().await.unwrap();
        let waiting = tokio::spawn(async move { second.lock_directory().await.map(drop) });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!waiting.is_finished());

        drop(held);
        waiting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_directory_sync() {
        let dir = TempDir::new().unwrap();
        assert!(sync_directory(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let key = KeyFactory::new("f_").create(Algorithm::HS384).unwrap();
        {
            let store = FileKeyStore::open(dir.path()).await.unwrap();
            store.store(&key).await.unwrap();
        }
        let reopened = FileKeyStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(key.id()).await.unwrap(), Some(key));
    }
}
