//! Configuration for the key lifecycle and the store backends.
//!
//! Everything is loaded from environment variables and validated before the
//! service is built. Loading goes through a lookup function so callers (and
//! tests) can supply variables without touching the process environment.

use crate::crypto::{Algorithm, ContentEncryption, KeyUse, MIN_RSA_KEY_SIZE};
use crate::error::{JwksError, Result};
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default key lifetime in days.
pub const DEFAULT_DAYS_UNTIL_EXPIRE: u32 = 90;
/// Default number of key generations kept for verification.
pub const DEFAULT_ALGORITHMS_TO_KEEP: usize = 2;
/// Default lifetime of the cached public JWKS.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(15 * 60);

/// Key lifecycle options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwksOptions {
    /// Algorithm for the signing slot
    pub signing_algorithm: Algorithm,
    /// Key management algorithm for the encryption slot
    pub encryption_algorithm: Algorithm,
    /// Content encryption paired with encrypting credentials
    pub content_encryption: ContentEncryption,
    /// Key age, in days, after which the current key is rotated
    pub days_until_expire: u32,
    /// Number of most recent keys offered for verification
    pub algorithms_to_keep: usize,
    /// Prefix for generated key ids
    pub key_prefix: String,
    /// Lifetime of the cached public JWKS
    pub cache_duration: Duration,
    /// RSA modulus size in bits
    pub rsa_key_size: usize,
}

impl Default for JwksOptions {
    fn default() -> Self {
        Self {
            signing_algorithm: Algorithm::RS256,
            encryption_algorithm: Algorithm::RsaOaep,
            content_encryption: ContentEncryption::A128CbcHs256,
            days_until_expire: DEFAULT_DAYS_UNTIL_EXPIRE,
            algorithms_to_keep: DEFAULT_ALGORITHMS_TO_KEEP,
            key_prefix: default_key_prefix(|name| env::var(name).ok()),
            cache_duration: DEFAULT_CACHE_DURATION,
            rsa_key_size: MIN_RSA_KEY_SIZE,
        }
    }
}

impl JwksOptions {
    /// Load options from the process environment (and `.env`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if a variable is malformed or the
    /// resulting options are inconsistent.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load options through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if a variable is malformed or the
    /// resulting options are inconsistent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let options = Self {
            signing_algorithm: parse_var(&lookup, "JWKS_SIGNING_ALGORITHM", defaults.signing_algorithm)?,
            encryption_algorithm: parse_var(
                &lookup,
                "JWKS_ENCRYPTION_ALGORITHM",
                defaults.encryption_algorithm,
            )?,
            content_encryption: parse_var(
                &lookup,
                "JWKS_CONTENT_ENCRYPTION",
                defaults.content_encryption,
            )?,
            days_until_expire: parse_var(&lookup, "JWKS_DAYS_UNTIL_EXPIRE", defaults.days_until_expire)?,
            algorithms_to_keep: parse_var(
                &lookup,
                "JWKS_ALGORITHMS_TO_KEEP",
                defaults.algorithms_to_keep,
            )?,
            key_prefix: lookup("JWKS_KEY_PREFIX").unwrap_or_else(|| default_key_prefix(&lookup)),
            cache_duration: Duration::from_secs(parse_var(
                &lookup,
                "JWKS_CACHE_DURATION_SECS",
                defaults.cache_duration.as_secs(),
            )?),
            rsa_key_size: parse_var(&lookup, "JWKS_RSA_KEY_SIZE", defaults.rsa_key_size)?,
        };
        options.validate()?;
        Ok(options)
    }

    /// Check the options for consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.signing_algorithm.key_use() != KeyUse::Signature {
            return Err(JwksError::config(format!(
                "{} is not a signing algorithm",
                self.signing_algorithm
            )));
        }
        if self.encryption_algorithm.key_use() != KeyUse::Encryption {
            return Err(JwksError::config(format!(
                "{} is not a key management algorithm",
                self.encryption_algorithm
            )));
        }
        if self.days_until_expire == 0 {
            return Err(JwksError::config("days_until_expire must be at least 1"));
        }
        if self.algorithms_to_keep == 0 {
            return Err(JwksError::config("algorithms_to_keep must be at least 1"));
        }
        if self.rsa_key_size < MIN_RSA_KEY_SIZE {
            return Err(JwksError::config(format!(
                "RSA key size must be at least {MIN_RSA_KEY_SIZE} bits"
            )));
        }
        Ok(())
    }

    /// Algorithm configured for a slot.
    #[must_use]
    pub const fn algorithm_for(&self, key_use: KeyUse) -> Algorithm {
        match key_use {
            KeyUse::Signature => self.signing_algorithm,
            KeyUse::Encryption => self.encryption_algorithm,
        }
    }

    /// Set the signing algorithm.
    #[must_use]
    pub const fn with_signing_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.signing_algorithm = algorithm;
        self
    }

    /// Set the encryption algorithm.
    #[must_use]
    pub const fn with_encryption_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.encryption_algorithm = algorithm;
        self
    }

    /// Set the content encryption algorithm.
    #[must_use]
    pub const fn with_content_encryption(mut self, enc: ContentEncryption) -> Self {
        self.content_encryption = enc;
        self
    }

    /// Set the key lifetime in days.
    #[must_use]
    pub const fn with_days_until_expire(mut self, days: u32) -> Self {
        self.days_until_expire = days;
        self
    }

    /// Set the retention count.
    #[must_use]
    pub const fn with_algorithms_to_keep(mut self, keep: usize) -> Self {
        self.algorithms_to_keep = keep;
        self
    }

    /// Set the key id prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the public JWKS cache lifetime.
    #[must_use]
    pub const fn with_cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = duration;
        self
    }

    /// Set the RSA modulus size.
    #[must_use]
    pub const fn with_rsa_key_size(mut self, bits: usize) -> Self {
        self.rsa_key_size = bits;
        self
    }
}

/// Vault KV v2 backend settings.
#[derive(Debug)]
pub struct VaultStoreConfig {
    /// Vault server address
    pub addr: String,
    /// Vault token
    pub token: SecretString,
    /// KV v2 mount point
    pub mount: String,
    /// Path prefix under the mount
    pub prefix: String,
    /// Request timeout
    pub timeout: Duration,
}

impl VaultStoreConfig {
    /// Create settings with the default mount (`secret`) and prefix (`jwks`).
    #[must_use]
    pub fn new(addr: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            token: SecretString::from(token.into()),
            mount: "secret".to_string(),
            prefix: "jwks".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the KV mount point.
    #[must_use]
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    /// Set the path prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Key store backend selection.
#[derive(Debug)]
pub enum StoreConfig {
    /// Process-local store
    Memory,
    /// One file per key under a directory
    File {
        /// Key directory
        directory: PathBuf,
    },
    /// SQLite database
    Database {
        /// Connection URL, e.g. `sqlite://keys.db?mode=rwc`
        url: String,
        /// Pool size
        max_connections: u32,
    },
    /// HashiCorp Vault KV v2
    Vault(VaultStoreConfig),
}

impl StoreConfig {
    /// Load the backend selection from the process environment (and `.env`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the backend is unknown or its
    /// settings are missing.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load the backend selection through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the backend is unknown or its
    /// settings are missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = lookup("JWKS_STORE").unwrap_or_else(|| "memory".to_string());
        let config = match backend.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "file" => Self::File {
                directory: lookup("JWKS_STORE_PATH")
                    .map(PathBuf::from)
                    .ok_or_else(|| JwksError::config("JWKS_STORE_PATH is required for the file store"))?,
            },
            "database" | "sqlite" => Self::Database {
                url: lookup("JWKS_DATABASE_URL").ok_or_else(|| {
                    JwksError::config("JWKS_DATABASE_URL is required for the database store")
                })?,
                max_connections: parse_var(&lookup, "JWKS_DATABASE_MAX_CONNECTIONS", 5)?,
            },
            "vault" => {
                let addr = lookup("VAULT_ADDR")
                    .ok_or_else(|| JwksError::config("VAULT_ADDR is required for the vault store"))?;
                let token = lookup("VAULT_TOKEN")
                    .ok_or_else(|| JwksError::config("VAULT_TOKEN is required for the vault store"))?;
                let mut vault = VaultStoreConfig::new(addr, token).with_timeout(Duration::from_secs(
                    parse_var(&lookup, "VAULT_TIMEOUT_SECS", 30)?,
                ));
                if let Some(mount) = lookup("VAULT_KV_MOUNT") {
                    vault = vault.with_mount(mount);
                }
                if let Some(prefix) = lookup("VAULT_KEY_PREFIX") {
                    vault = vault.with_prefix(prefix);
                }
                Self::Vault(vault)
            }
            other => return Err(JwksError::config(format!("Unknown key store backend: {other}"))),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check backend settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::File { directory } if directory.as_os_str().is_empty() => {
                Err(JwksError::config("file store directory is empty"))
            }
            Self::File { .. } => Ok(()),
            Self::Database { url, .. } if url.is_empty() => {
                Err(JwksError::config("database URL is empty"))
            }
            Self::Database { max_connections, .. } if *max_connections == 0 => {
                Err(JwksError::config("database pool needs at least one connection"))
            }
            Self::Database { .. } => Ok(()),
            Self::Vault(vault) => {
                url::Url::parse(&vault.addr)
                    .map_err(|e| JwksError::config(format!("Invalid VAULT_ADDR: {e}")))?;
                if vault.token.expose_secret().is_empty() {
                    return Err(JwksError::config("Vault token is empty"));
                }
                if vault.mount.is_empty() || vault.prefix.is_empty() {
                    return Err(JwksError::config("Vault mount and prefix must be set"));
                }
                Ok(())
            }
        }
    }

    /// Short backend name for logs.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
            Self::Database { .. } => "database",
            Self::Vault(_) => "vault",
        }
    }
}

/// `<hostname>_`, so key ids reveal which instance generated them.
fn default_key_prefix(lookup: impl Fn(&str) -> Option<String>) -> String {
    let host = lookup("HOSTNAME")
        .or_else(|| lookup("COMPUTERNAME"))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{host}_")
}

/// Parse a variable with a default value.
fn parse_var<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| JwksError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let options = JwksOptions::from_lookup(vars(&[("HOSTNAME", "node-1")])).unwrap();
        assert_eq!(options.signing_algorithm, Algorithm::RS256);
        assert_eq!(options.encryption_algorithm, Algorithm::RsaOaep);
        assert_eq!(options.days_until_expire, 90);
        assert_eq!(options.algorithms_to_keep, 2);
        assert_eq!(options.cache_duration, Duration::from_secs(900));
        assert_eq!(options.rsa_key_size, 3072);
        assert_eq!(options.key_prefix, "node-1_");
    }

    #[test]
    fn test_prefix_falls_back_to_localhost() {
        let options = JwksOptions::from_lookup(vars(&[])).unwrap();
        assert_eq!(options.key_prefix, "localhost_");
    }

    #[test]
    fn test_overrides() {
        let options = JwksOptions::from_lookup(vars(&[
            ("JWKS_SIGNING_ALGORITHM", "ES384"),
            ("JWKS_ENCRYPTION_ALGORITHM", "A256KW"),
            ("JWKS_CONTENT_ENCRYPTION", "A256GCM"),
            ("JWKS_DAYS_UNTIL_EXPIRE", "30"),
            ("JWKS_ALGORITHMS_TO_KEEP", "3"),
            ("JWKS_KEY_PREFIX", "svc-"),
            ("JWKS_CACHE_DURATION_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(options.signing_algorithm, Algorithm::ES384);
        assert_eq!(options.encryption_algorithm, Algorithm::A256KW);
        assert_eq!(options.content_encryption, ContentEncryption::A256Gcm);
        assert_eq!(options.days_until_expire, 30);
        assert_eq!(options.algorithms_to_keep, 3);
        assert_eq!(options.key_prefix, "svc-");
        assert_eq!(options.cache_duration, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_inconsistent_options() {
        assert!(matches!(
            JwksOptions::from_lookup(vars(&[("JWKS_SIGNING_ALGORITHM", "A128KW")])),
            Err(JwksError::InvalidConfiguration(_))
        ));
        assert!(JwksOptions::from_lookup(vars(&[("JWKS_ENCRYPTION_ALGORITHM", "HS256")])).is_err());
        assert!(JwksOptions::from_lookup(vars(&[("JWKS_ALGORITHMS_TO_KEEP", "0")])).is_err());
        assert!(JwksOptions::from_lookup(vars(&[("JWKS_RSA_KEY_SIZE", "2048")])).is_err());
        assert!(JwksOptions::from_lookup(vars(&[("JWKS_DAYS_UNTIL_EXPIRE", "soon")])).is_err());
    }

    #[test]
    fn test_builder() {
        let options = JwksOptions::default()
            .with_signing_algorithm(Algorithm::HS512)
            .with_algorithms_to_keep(5)
            .with_key_prefix("t_");
        assert!(options.validate().is_ok());
        assert_eq!(options.algorithm_for(KeyUse::Signature), Algorithm::HS512);
        assert_eq!(options.algorithm_for(KeyUse::Encryption), Algorithm::RsaOaep);
    }

    #[test]
    fn test_store_selection() {
        assert!(matches!(
            StoreConfig::from_lookup(vars(&[])).unwrap(),
            StoreConfig::Memory
        ));

        let file = StoreConfig::from_lookup(vars(&[
            ("JWKS_STORE", "file"),
            ("JWKS_STORE_PATH", "/var/lib/jwks"),
        ]))
        .unwrap();
        assert_eq!(file.backend_name(), "file");

        assert!(StoreConfig::from_lookup(vars(&[("JWKS_STORE", "file")])).is_err());
        assert!(StoreConfig::from_lookup(vars(&[("JWKS_STORE", "redis")])).is_err());
    }

    #[test]
    fn test_vault_store_config() {
        let config = StoreConfig::from_lookup(vars(&[
            ("JWKS_STORE", "vault"),
            ("VAULT_ADDR", "http://127.0.0.1:8200"),
            ("VAULT_TOKEN", "s.token"),
            ("VAULT_KV_MOUNT", "kv"),
        ]))
        .unwrap();
        let StoreConfig::Vault(vault) = config else {
            panic!("expected vault backend");
        };
        assert_eq!(vault.mount, "kv");
        assert_eq!(vault.prefix, "jwks");
        assert!(!format!("{vault:?}").contains("s.token"));

        assert!(StoreConfig::from_lookup(vars(&[
            ("JWKS_STORE", "vault"),
            ("VAULT_ADDR", "not a url"),
            ("VAULT_TOKEN", "s.token"),
        ]))
        .is_err());
    }
}
