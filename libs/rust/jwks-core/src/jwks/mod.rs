//! Key material, the public key set and the rotation service.

pub mod key_material;
pub mod publisher;
pub mod service;

pub use key_material::{JsonWebKey, KeyMaterial};
pub use publisher::{JsonWebKeySet, JwksCache, PublicJwk};
pub use service::JwksService;
