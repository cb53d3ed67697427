//! Token validation against the retained signing keys.
//!
//! Candidates are the last `algorithms_to_keep` signing keys rather than only
//! the current one, so a token signed just before a rotation (possibly by
//! another instance) still validates.

use crate::crypto::Algorithm;
use crate::crypto::signature::verify;
use crate::error::{JwksError, Result};
use crate::jwks::JwksService;
use crate::jwt::serializer::JwsParts;
use crate::metrics;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Validation knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Clock skew tolerated on `exp` and `nbf`
    pub leeway: Duration,
    /// Reject tokens whose signing key has been revoked
    pub reject_revoked_keys: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            leeway: Duration::from_secs(60),
            reject_revoked_keys: false,
        }
    }
}

#[derive(Deserialize)]
struct TimeClaims {
    exp: Option<i64>,
    nbf: Option<i64>,
}

/// Validates compact JWS tokens issued with the service's keys.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    service: Arc<JwksService>,
    options: ValidationOptions,
}

impl TokenValidator {
    /// Validator with default options.
    #[must_use]
    pub fn new(service: Arc<JwksService>) -> Self {
        Self {
            service,
            options: ValidationOptions::default(),
        }
    }

    /// Replace the validation options.
    #[must_use]
    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` for malformed tokens or an `alg` that does not match the key
    /// - `UnknownSigningKey` when the `kid` is not among the retained keys
    /// - `KeyRevoked` when the key is revoked and revoked keys are rejected
    /// - `SignatureMismatch` when the signature does not verify
    /// - `TokenExpired` when `exp`/`nbf` are outside the leeway
    /// - `StoreUnavailable` if the candidate keys cannot be loaded
    #[instrument(skip_all)]
    pub async fn validate<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let result = self.check(token).await;
        match &result {
            Ok(_) => metrics::record_token_validation("success", "none"),
            Err(e) => {
                debug!(error = %e, "Token rejected");
                metrics::record_token_validation("failure", e.kind());
            }
        }
        result
    }

    async fn check<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let parts = JwsParts::parse(token)?;
        let kid = parts
            .header
            .kid
            .as_deref()
            .ok_or_else(|| JwksError::invalid_token("header has no kid"))?;

        let candidates = self.service.verification_keys().await?;
        let key = candidates
            .iter()
            .find(|k| k.id() == kid)
            .ok_or_else(|| JwksError::UnknownSigningKey {
                kid: kid.to_string(),
            })?;

        if key.is_revoked() && self.options.reject_revoked_keys {
            return Err(JwksError::KeyRevoked {
                kid: kid.to_string(),
            });
        }

        let algorithm = Algorithm::from_name(&parts.header.alg)
            .map_err(|_| JwksError::invalid_token(format!("unknown alg {}", parts.header.alg)))?;
        if algorithm != key.algorithm() {
            return Err(JwksError::invalid_token(format!(
                "alg {algorithm} does not match key algorithm {}",
                key.algorithm()
            )));
        }

        if !verify(key, parts.signing_input.as_bytes(), &parts.signature)? {
            return Err(JwksError::SignatureMismatch {
                kid: kid.to_string(),
            });
        }

        let times: TimeClaims = serde_json::from_slice(&parts.payload)
            .map_err(|e| JwksError::invalid_token(format!("payload is not a claims object: {e}")))?;
        self.check_times(&times)?;

        serde_json::from_slice(&parts.payload)
            .map_err(|e| JwksError::invalid_token(format!("unexpected claims: {e}")))
    }

    fn check_times(&self, times: &TimeClaims) -> Result<()> {
        let now = Utc::now().timestamp();
        let leeway = i64::try_from(self.options.leeway.as_secs()).unwrap_or(i64::MAX);
        if times.exp.is_some_and(|exp| now > exp.saturating_add(leeway)) {
            return Err(JwksError::TokenExpired);
        }
        if times.nbf.is_some_and(|nbf| now.saturating_add(leeway) < nbf) {
            return Err(JwksError::TokenExpired);
        }
        Ok(())
    }
}
