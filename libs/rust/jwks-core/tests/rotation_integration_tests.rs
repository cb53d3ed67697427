//! Rotation policy against every local backend.

mod common;

use chrono::{Duration, Utc};
use common::{local_backends, options, service, service_with};
use async_trait::async_trait;
use jwks_core::crypto::KeyFactory;
use jwks_core::storage::{FileKeyStore, KeyStore, MemoryKeyStore};
use jwks_core::{Algorithm, JwksError, JwksService, KeyMaterial, KeyUse};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

#[tokio::test]
async fn test_empty_store_yields_single_key_of_configured_algorithm() {
    for backend in local_backends().await {
        let service = service(&backend.store);
        let creds = service.current_signing_credentials().await.unwrap();

        assert_eq!(creds.algorithm(), Algorithm::ES256, "{}", backend.name);
        let stored = backend.store.get_last_keys(10, None).await.unwrap();
        assert_eq!(stored.len(), 1, "{}", backend.name);
        assert_eq!(stored[0].id(), creds.key_id(), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_expired_key_is_revoked_and_replaced() {
    for backend in local_backends().await {
        let stale = KeyFactory::new("it_")
            .create(Algorithm::ES256)
            .unwrap()
            .with_created_at(Utc::now() - Duration::days(91));
        backend.store.store(&stale).await.unwrap();

        let service = service(&backend.store);
        let creds = service.current_signing_credentials().await.unwrap();
        assert_ne!(creds.key_id(), stale.id(), "{}", backend.name);
        assert!(Utc::now() - creds.key().created_at() < Duration::minutes(1));

        let old = backend.store.get(stale.id()).await.unwrap().unwrap();
        assert!(old.is_revoked(), "{}", backend.name);
        assert_eq!(old.revoked_reason(), Some("expired"));

        let last: Vec<_> = service
            .get_last_keys(2, Some(KeyUse::Signature))
            .await
            .unwrap()
            .iter()
            .map(|k| k.id().to_string())
            .collect();
        assert_eq!(last, vec![creds.key_id().to_string(), stale.id().to_string()]);
    }
}

#[tokio::test]
async fn test_retention_returns_newest_first() {
    for backend in local_backends().await {
        let service = service_with(&backend.store, options().with_algorithms_to_keep(2));
        let mut generated = Vec::new();
        for _ in 0..5 {
            generated.push(service.generate_new_key(KeyUse::Signature).await.unwrap());
        }

        let last = service.verification_keys().await.unwrap();
        let ids: Vec<_> = last.iter().map(|k| k.id()).collect();
        assert_eq!(ids, vec![generated[4].id(), generated[3].id()], "{}", backend.name);
    }
}

#[tokio::test]
async fn test_revoked_key_is_never_current_again() {
    for backend in local_backends().await {
        let service = service(&backend.store);
        let first = service.current_signing_credentials().await.unwrap();
        let id = first.key_id().to_string();

        let revoked = service.revoke_key(&id, Some("compromised")).await.unwrap();
        assert!(revoked.is_revoked());
        let again = service.revoke_key(&id, Some("other")).await.unwrap();
        assert_eq!(again, revoked, "{}", backend.name);

        let stored = backend.store.get(&id).await.unwrap().unwrap();
        assert!(stored.is_revoked());
        assert_eq!(stored.revoked_reason(), Some("compromised"));

        let next = service.current_signing_credentials().await.unwrap();
        assert_ne!(next.key_id(), id, "{}", backend.name);
    }
}

#[tokio::test]
async fn test_concurrent_callers_agree_on_one_key() {
    for backend in local_backends().await {
        let service = Arc::new(service(&backend.store));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .current_signing_credentials()
                        .await
                        .map(|c| c.key_id().to_string())
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 1, "{}", backend.name);
        assert_eq!(backend.store.get_last_keys(100, None).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_instances_sharing_a_store_agree_on_one_key() {
    for backend in local_backends().await {
        let instances = [
            Arc::new(service(&backend.store)),
            Arc::new(service(&backend.store)),
        ];
        let tasks: Vec<_> = (0..8)
            .flat_map(|_| instances.iter().cloned())
            .map(|service| {
                tokio::spawn(async move {
                    service
                        .current_signing_credentials()
                        .await
                        .map(|c| c.key_id().to_string())
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 1, "{}", backend.name);
        let current = backend.store.get_current(KeyUse::Signature).await.unwrap();
        assert_eq!(current.map(|k| k.id().to_string()), ids.into_iter().next());
    }
}

#[tokio::test]
async fn test_algorithm_change_generates_without_revoking() {
    for backend in local_backends().await {
        let before = service(&backend.store);
        let old = before.current_signing_credentials().await.unwrap();

        let after = service_with(
            &backend.store,
            options().with_signing_algorithm(Algorithm::ES384),
        );
        let new = after.current_signing_credentials().await.unwrap();
        assert_eq!(new.algorithm(), Algorithm::ES384);
        assert_ne!(new.key_id(), old.key_id());

        let old = backend.store.get(old.key_id()).await.unwrap().unwrap();
        assert!(!old.is_revoked(), "{}", backend.name);
        let retained = after.verification_keys().await.unwrap();
        assert!(retained.iter().any(|k| k.id() == old.id()));
    }
}

#[tokio::test]
async fn test_public_jwks_never_contains_secrets() {
    for backend in local_backends().await {
        let service = service_with(
            &backend.store,
            options().with_signing_algorithm(Algorithm::HS256),
        );
        let creds = service.current_signing_credentials().await.unwrap();
        service.current_encrypting_credentials().await.unwrap();

        let jwks = service.public_jwks().await.unwrap();
        assert!(jwks.keys.is_empty(), "{}", backend.name);

        let json = jwks.to_json().unwrap();
        let secret = creds.key().parameters().k.clone().unwrap();
        assert!(!json.contains(&secret));
    }
}

#[tokio::test]
async fn test_public_jwks_lists_both_slots() {
    for backend in local_backends().await {
        let service = service_with(
            &backend.store,
            options().with_encryption_algorithm(Algorithm::RsaOaep256),
        );
        let signing = service.current_signing_credentials().await.unwrap();
        let encrypting = service.current_encrypting_credentials().await.unwrap();

        let jwks = service.public_jwks().await.unwrap();
        let sig = jwks.find(signing.key_id()).unwrap();
        assert_eq!(sig.key_use, "sig");
        assert_eq!(sig.kty, "EC");
        let enc = jwks.find(encrypting.key_id()).unwrap();
        assert_eq!(enc.key_use, "enc");
        assert_eq!(enc.key_ops, vec!["encrypt", "wrapKey"]);
        assert!(enc.n.is_some());
    }
}

#[tokio::test]
async fn test_clear_and_unknown_revocation() {
    for backend in local_backends().await {
        let service = service(&backend.store);
        service.current_signing_credentials().await.unwrap();
        service.clear().await.unwrap();

        assert!(backend.store.get_last_keys(10, None).await.unwrap().is_empty());
        assert!(matches!(
            service.revoke_key("it_missing", None).await,
            Err(JwksError::KeyNotFound(_))
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_stores_on_one_directory_agree_on_one_key() {
    for _ in 0..10 {
        let dir = TempDir::new().unwrap();
        let mut instances = Vec::new();
        for _ in 0..4 {
            let store: Arc<dyn KeyStore> = Arc::new(FileKeyStore::open(dir.path()).await.unwrap());
            instances.push(Arc::new(service(&store)));
        }

        let tasks: Vec<_> = instances
            .iter()
            .cloned()
            .map(|service| {
                tokio::spawn(async move {
                    service
                        .current_signing_credentials()
                        .await
                        .map(|c| c.key_id().to_string())
                })
            })
            .collect();
        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 1);

        let reader = FileKeyStore::open(dir.path()).await.unwrap();
        let live: Vec<_> = reader
            .get_last_keys(100, Some(KeyUse::Signature))
            .await
            .unwrap()
            .into_iter()
            .filter(|k| !k.is_revoked())
            .collect();
        assert_eq!(live.len(), 1);
        assert!(ids.contains(live[0].id()));
    }
}

/// Memory store whose `get_last_keys` stalls after reading, while enabled.
struct SlowListingStore {
    inner: MemoryKeyStore,
    slow: AtomicBool,
}

#[async_trait]
impl KeyStore for SlowListingStore {
    fn backend(&self) -> &'static str {
        "slow-memory"
    }

    async fn store(&self, material: &KeyMaterial) -> jwks_core::Result<()> {
        self.inner.store(material).await
    }

    async fn get_current(&self, key_use: KeyUse) -> jwks_core::Result<Option<KeyMaterial>> {
        self.inner.get_current(key_use).await
    }

    async fn get(&self, key_id: &str) -> jwks_core::Result<Option<KeyMaterial>> {
        self.inner.get(key_id).await
    }

    async fn get_last_keys(
        &self,
        quantity: usize,
        key_use: Option<KeyUse>,
    ) -> jwks_core::Result<Vec<KeyMaterial>> {
        let keys = self.inner.get_last_keys(quantity, key_use).await;
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        keys
    }

    async fn revoke(
        &self,
        key_id: &str,
        reason: Option<&str>,
    ) -> jwks_core::Result<Option<KeyMaterial>> {
        self.inner.revoke(key_id, reason).await
    }

    async fn replace_current(
        &self,
        expected_current: Option<&str>,
        material: &KeyMaterial,
        revoke_reason: Option<&str>,
    ) -> jwks_core::Result<bool> {
        self.inner
            .replace_current(expected_current, material, revoke_reason)
            .await
    }

    async fn clear(&self) -> jwks_core::Result<()> {
        self.inner.clear().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jwks_built_during_rotation_is_not_cached() {
    let store = Arc::new(SlowListingStore {
        inner: MemoryKeyStore::new(),
        slow: AtomicBool::new(false),
    });
    let dyn_store: Arc<dyn KeyStore> = store.clone();
    let service = Arc::new(JwksService::new(options(), dyn_store).unwrap());
    let first = service.current_signing_credentials().await.unwrap();

    store.slow.store(true, Ordering::SeqCst);
    let building = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.public_jwks().await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let rotated = service.generate_new_key(KeyUse::Signature).await.unwrap();

    let overlapping = building.await.unwrap().unwrap();
    assert!(overlapping.find(first.key_id()).is_some());
    store.slow.store(false, Ordering::SeqCst);

    let jwks = service.public_jwks().await.unwrap();
    assert!(jwks.find(rotated.id()).is_some());
    assert!(jwks.find(first.key_id()).is_some());
}
