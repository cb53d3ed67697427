//! JWKS lifecycle library.
//!
//! Generates signing and encryption keys, persists them in a pluggable key
//! store, rotates them on expiry, revocation or algorithm change, and serves
//! the public key set used to validate issued tokens.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod jwks;
pub mod jwt;
pub mod metrics;
pub mod observability;
pub mod storage;

// Re-exports for convenience
pub use config::{JwksOptions, StoreConfig, VaultStoreConfig};
pub use crypto::{Algorithm, ContentEncryption, KeyFactory, KeyType, KeyUse};
pub use error::{JwksError, Result};
pub use jwks::{JsonWebKeySet, JwksService, KeyMaterial, PublicJwk};
pub use jwt::{EncryptingCredentials, JwtSerializer, SigningCredentials, TokenValidator};
pub use storage::{KeyStore, build_store};
