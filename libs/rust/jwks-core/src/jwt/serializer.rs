//! Compact JWS encoding.

use crate::crypto::b64_encode;
use crate::error::{JwksError, Result};
use crate::jwt::SigningCredentials;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Protected header of a compact JWS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    /// Signature algorithm
    pub alg: String,
    /// Signing key id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Token type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// The three segments of a compact JWS, decoded.
pub(crate) struct JwsParts<'a> {
    pub header: JwsHeader,
    pub signing_input: &'a str,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl<'a> JwsParts<'a> {
    pub(crate) fn parse(token: &'a str) -> Result<Self> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(JwksError::invalid_token("expected three dot-separated segments"));
        };

        let header: JwsHeader = decode_json(header, "header")?;
        let signing_input = &token[..token.len() - signature.len() - 1];
        Ok(Self {
            header,
            signing_input,
            payload: decode_segment(payload, "payload")?,
            signature: decode_segment(signature, "signature")?,
        })
    }
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JwksError::invalid_token(format!("{name} is not base64url: {e}")))
}

fn decode_json<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T> {
    serde_json::from_slice(&decode_segment(segment, name)?)
        .map_err(|e| JwksError::invalid_token(format!("{name} is not valid JSON: {e}")))
}

/// Issues compact JWS tokens signed with the service's current key.
#[derive(Debug, Clone)]
pub struct JwtSerializer {
    token_type: String,
}

impl Default for JwtSerializer {
    fn default() -> Self {
        Self {
            token_type: "JWT".to_string(),
        }
    }
}

impl JwtSerializer {
    /// Serializer emitting `typ: JWT`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the `typ` header (e.g. `at+jwt`).
    #[must_use]
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Sign `claims` with `credentials`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the claims cannot be encoded or the key
    /// parameters are unusable.
    pub fn serialize<T: Serialize>(
        &self,
        claims: &T,
        credentials: &SigningCredentials,
    ) -> Result<String> {
        let header = JwsHeader {
            alg: credentials.algorithm().name().to_string(),
            kid: Some(credentials.key_id().to_string()),
            typ: Some(self.token_type.clone()),
        };
        let signing_input = format!(
            "{}.{}",
            b64_encode(serde_json::to_vec(&header)?),
            b64_encode(serde_json::to_vec(claims)?)
        );
        let signature = credentials.sign(signing_input.as_bytes())?;
        Ok(format!("{signing_input}.{}", b64_encode(signature)))
    }

    /// Header of a token, without any verification.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the token is malformed.
    pub fn decode_header(token: &str) -> Result<JwsHeader> {
        Ok(JwsParts::parse(token)?.header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Algorithm, KeyFactory};
    use crate::jwt::Claims;

    #[test]
    fn test_header_carries_kid_and_alg() {
        let key = KeyFactory::new("s_").create(Algorithm::ES384).unwrap();
        let creds = SigningCredentials::new(key).unwrap();
        let claims = Claims::new("issuer", "user-1", vec!["api".to_string()], 60);

        let token = JwtSerializer::new().serialize(&claims, &creds).unwrap();
        let header = JwtSerializer::decode_header(&token).unwrap();
        assert_eq!(header.alg, "ES384");
        assert_eq!(header.kid.as_deref(), Some(creds.key_id()));
        assert_eq!(header.typ.as_deref(), Some("JWT"));
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        for token in ["", "a.b", "a.b.c.d", "!!.e30.AA"] {
            assert!(matches!(
                JwsParts::parse(token),
                Err(JwksError::InvalidToken(_))
            ), "{token}");
        }
    }

    #[test]
    fn test_jsonwebtoken_accepts_our_tokens() {
        let key = KeyFactory::new("s_").create(Algorithm::HS256).unwrap();
        let secret = crate::crypto::b64_member(key.parameters().k.as_ref(), "k").unwrap();
        let creds = SigningCredentials::new(key).unwrap();
        let claims = Claims::new("issuer", "user-1", vec!["api".to_string()], 60);
        let token = JwtSerializer::new().serialize(&claims, &creds).unwrap();

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_audience(&["api"]);
        let decoded = jsonwebtoken::decode::<Claims>(
            &token,
            &jsonwebtoken::DecodingKey::from_secret(&secret),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims, claims);
    }
}
