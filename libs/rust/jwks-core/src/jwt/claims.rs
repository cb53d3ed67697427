//! Registered JWT claims issued with the current signing key.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registered JWT claims plus free-form extras.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Issuer
    pub iss: String,
    /// Subject
    pub sub: String,
    /// Audience
    pub aud: Vec<String>,
    /// Expiry (seconds since the epoch)
    pub exp: i64,
    /// Issued at
    pub iat: i64,
    /// Not before
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Token id
    pub jti: String,
    /// Any other claims
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Claims valid from now for `ttl_seconds`.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: Vec<String>,
        ttl_seconds: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            aud: audience,
            exp: now + ttl_seconds,
            iat: now,
            nbf: Some(now),
            jti: uuid::Uuid::new_v4().to_string(),
            custom: HashMap::new(),
        }
    }

    /// Add a custom claim.
    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom.insert(name.into(), value);
        self
    }
}
