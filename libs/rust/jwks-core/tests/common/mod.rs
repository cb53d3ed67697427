//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use jwks_core::storage::{DatabaseKeyStore, FileKeyStore, KeyStore, MemoryKeyStore};
use jwks_core::{Algorithm, JwksOptions, JwksService};
use std::sync::Arc;
use tempfile::TempDir;

/// A store under test. The temp directory must outlive the store.
pub struct Backend {
    pub name: &'static str,
    pub store: Arc<dyn KeyStore>,
    _dir: Option<TempDir>,
}

/// Options using fast algorithms so tests do not wait on RSA generation.
pub fn options() -> JwksOptions {
    JwksOptions::default()
        .with_signing_algorithm(Algorithm::ES256)
        .with_encryption_algorithm(Algorithm::A128KW)
        .with_key_prefix("it_")
}

/// Every backend that runs without external services.
pub async fn local_backends() -> Vec<Backend> {
    let dir = TempDir::new().unwrap();
    let file = FileKeyStore::open(dir.path().join("keys")).await.unwrap();
    let database = DatabaseKeyStore::connect("sqlite::memory:", 1).await.unwrap();
    vec![
        Backend {
            name: "memory",
            store: Arc::new(MemoryKeyStore::new()),
            _dir: None,
        },
        Backend {
            name: "file",
            store: Arc::new(file),
            _dir: Some(dir),
        },
        Backend {
            name: "database",
            store: Arc::new(database),
            _dir: None,
        },
    ]
}

/// Service over `store` with [`options`].
pub fn service(store: &Arc<dyn KeyStore>) -> JwksService {
    JwksService::new(options(), Arc::clone(store)).unwrap()
}

/// Service over `store` with custom options.
pub fn service_with(store: &Arc<dyn KeyStore>, options: JwksOptions) -> JwksService {
    JwksService::new(options, Arc::clone(store)).unwrap()
}
