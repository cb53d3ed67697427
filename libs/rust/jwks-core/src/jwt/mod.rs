//! Token issuance and validation on top of the managed keys.

pub mod claims;
pub mod credentials;
pub mod serializer;
pub mod validator;

pub use claims::Claims;
pub use credentials::{EncryptingCredentials, SigningCredentials};
pub use serializer::{JwsHeader, JwtSerializer};
pub use validator::{TokenValidator, ValidationOptions};
