//! SQLite key store.
//!
//! One row per key in `security_keys`. Every mutation runs in a transaction;
//! `replace_current` writes first so that SQLite takes the write lock before
//! the current slot is read.

use super::KeyStore;
use crate::crypto::{Algorithm, KeyUse};
use crate::error::{JwksError, Result};
use crate::jwks::{JsonWebKey, KeyMaterial};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// Upper bound on the serialized parameters column.
pub const MAX_PARAMETERS_LEN: usize = 8000;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS security_keys (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    key_type TEXT NOT NULL,
    key_use TEXT NOT NULL,
    algorithm TEXT NOT NULL,
    parameters TEXT NOT NULL CHECK (length(parameters) <= 8000),
    created_at INTEGER NOT NULL,
    revoked_at INTEGER,
    revoked_reason TEXT
)";

const CREATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_security_keys_use_created
    ON security_keys (key_use, created_at DESC)";

const COLUMNS: &str = "id, algorithm, parameters, created_at, revoked_at, revoked_reason";

/// Key store over an SQLite connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseKeyStore {
    pool: Pool<Sqlite>,
}

impl DatabaseKeyStore {
    /// Connect, creating the database file and table if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a malformed URL and
    /// `StoreUnavailable` when the database cannot be opened.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| JwksError::config(format!("Invalid database URL: {e}")))?
            .busy_timeout(Duration::from_secs(30))
            .create_if_missing(true)
            .disable_statement_logging();

        // In-memory databases live as long as their connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool, creating the table if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the schema cannot be created.
    pub async fn with_pool(pool: Pool<Sqlite>) -> Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;
        debug!("security_keys table ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl KeyStore for DatabaseKeyStore {
    fn backend(&self) -> &'static str {
        "database"
    }

    async fn store(&self, material: &KeyMaterial) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_key(&mut tx, material).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_current(&self, key_use: KeyUse) -> Result<Option<KeyMaterial>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM security_keys
             WHERE key_use = ? AND revoked_at IS NULL
             ORDER BY created_at DESC, seq DESC LIMIT 1"
        ))
        .bind(key_use.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_key).transpose()
    }

    async fn get(&self, key_id: &str) -> Result<Option<KeyMaterial>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM security_keys WHERE id = ?"))
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_key).transpose()
    }

    async fn get_last_keys(
        &self,
        quantity: usize,
        key_use: Option<KeyUse>,
    ) -> Result<Vec<KeyMaterial>> {
        let limit = i64::try_from(quantity).unwrap_or(i64::MAX);
        let rows = match key_use {
            Some(key_use) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM security_keys WHERE key_use = ?
                     ORDER BY created_at DESC, seq DESC LIMIT ?"
                ))
                .bind(key_use.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM security_keys ORDER BY created_at DESC, seq DESC LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_key).collect()
    }

    async fn revoke(&self, key_id: &str, reason: Option<&str>) -> Result<Option<KeyMaterial>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM security_keys WHERE id = ?"))
            .bind(key_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(mut key) = row.as_ref().map(row_to_key).transpose()? else {
            return Ok(None);
        };
        if key.revoke(reason) {
            mark_revoked(&mut tx, &key).await?;
        }
        tx.commit().await?;
        Ok(Some(key))
    }

    async fn replace_current(
        &self,
        expected_current: Option<&str>,
        material: &KeyMaterial,
        revoke_reason: Option<&str>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        insert_key(&mut tx, material).await?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT id FROM security_keys
             WHERE key_use = ? AND revoked_at IS NULL AND id <> ?
             ORDER BY created_at DESC, seq DESC LIMIT 1",
        )
        .bind(material.key_use().as_str())
        .bind(material.id())
        .fetch_optional(&mut *tx)
        .await?;

        if current.as_deref() != expected_current {
            trace!(key_id = %material.id(), "Current key changed concurrently, rolling back");
            tx.rollback().await?;
            return Ok(false);
        }

        if let (Some(expected), Some(reason)) = (expected_current, revoke_reason) {
            sqlx::query(
                "UPDATE security_keys SET revoked_at = ?, revoked_reason = ?
                 WHERE id = ? AND revoked_at IS NULL",
            )
            .bind(Utc::now().timestamp_micros())
            .bind(reason)
            .bind(expected)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM security_keys")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn insert_key(conn: &mut SqliteConnection, material: &KeyMaterial) -> Result<()> {
    let parameters = Zeroizing::new(serde_json::to_string(material.parameters())?);
    if parameters.len() > MAX_PARAMETERS_LEN {
        return Err(JwksError::serialization(format!(
            "key parameters are {} characters, the column holds at most {MAX_PARAMETERS_LEN}",
            parameters.len()
        )));
    }
    sqlx::query(
        "INSERT INTO security_keys
         (id, key_type, key_use, algorithm, parameters, created_at, revoked_at, revoked_reason)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(material.id())
    .bind(material.key_type().as_str())
    .bind(material.key_use().as_str())
    .bind(material.algorithm().name())
    .bind(parameters.as_str())
    .bind(material.created_at().timestamp_micros())
    .bind(material.revoked_at().map(|at| at.timestamp_micros()))
    .bind(material.revoked_reason())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn mark_revoked(conn: &mut SqliteConnection, key: &KeyMaterial) -> Result<()> {
    sqlx::query("UPDATE security_keys SET revoked_at = ?, revoked_reason = ? WHERE id = ?")
        .bind(key.revoked_at().map(|at| at.timestamp_micros()))
        .bind(key.revoked_reason())
        .bind(key.id())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn row_to_key(row: &SqliteRow) -> Result<KeyMaterial> {
    let id: String = row.try_get("id")?;
    let algorithm = Algorithm::from_name(&row.try_get::<String, _>("algorithm")?)?;
    let parameters = Zeroizing::new(row.try_get::<String, _>("parameters")?);
    let parameters: JsonWebKey = serde_json::from_str(&parameters)?;
    let created_at = from_micros(row.try_get("created_at")?)?;
    let revoked_at = row
        .try_get::<Option<i64>, _>("revoked_at")?
        .map(from_micros)
        .transpose()?;
    let revoked_reason: Option<String> = row.try_get("revoked_reason")?;

    Ok(KeyMaterial::new(id, algorithm, parameters)
        .with_created_at(created_at)
        .with_revocation(revoked_at, revoked_reason))
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| JwksError::serialization(format!("timestamp {micros} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyFactory;

    async fn memory_store() -> DatabaseKeyStore {
        DatabaseKeyStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_record() {
        let store = memory_store().await;
        let key = KeyFactory::new("db_").create(Algorithm::ES384).unwrap();
        store.store(&key).await.unwrap();
        assert_eq!(store.get(key.id()).await.unwrap(), Some(key));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let store = memory_store().await;
        let key = KeyFactory::new("db_").create(Algorithm::HS256).unwrap();
        store.store(&key).await.unwrap();
        assert!(matches!(
            store.store(&key).await,
            Err(JwksError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_parameters_rejected_before_insert() {
        let store = memory_store().await;
        let key = KeyMaterial::new(
            "db_big",
            Algorithm::HS256,
            JsonWebKey::symmetric("A".repeat(MAX_PARAMETERS_LEN)),
        );
        assert!(matches!(
            store.store(&key).await,
            Err(JwksError::Serialization(_))
        ));
        assert!(store.get("db_big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lost_race_rolls_back() {
        let store = memory_store().await;
        let factory = KeyFactory::new("db_");
        let winner = factory.create(Algorithm::HS256).unwrap();
        let loser = factory.create(Algorithm::HS256).unwrap();

        assert!(store.replace_current(None, &winner, None).await.unwrap());
        assert!(!store.replace_current(None, &loser, None).await.unwrap());
        assert!(store.get(loser.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_and_current() {
        let store = memory_store().await;
        let key = KeyFactory::new("db_").create(Algorithm::HS512).unwrap();
        store.store(&key).await.unwrap();

        let revoked = store.revoke(key.id(), Some("compromised")).await.unwrap().unwrap();
        assert!(revoked.is_revoked());
        let again = store.revoke(key.id(), Some("other")).await.unwrap().unwrap();
        assert_eq!(again, revoked);
        assert!(store.get_current(KeyUse::Signature).await.unwrap().is_none());
        assert_eq!(store.get_last_keys(10, None).await.unwrap().len(), 1);
    }
}
