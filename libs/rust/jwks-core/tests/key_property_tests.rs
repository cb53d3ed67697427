//! Property-based tests for the algorithm catalog and key material.

use jwks_core::crypto::signature::{sign, verify};
use jwks_core::crypto::{Algorithm, KeyFactory, KeyType, KeyUse};
use jwks_core::KeyMaterial;
use proptest::prelude::*;
use std::collections::HashSet;

/// Any catalog algorithm.
fn arb_algorithm() -> impl Strategy<Value = Algorithm> {
    proptest::sample::select(Algorithm::all().to_vec())
}

/// Signing algorithms that generate quickly (no RSA).
fn arb_fast_signing_algorithm() -> impl Strategy<Value = Algorithm> {
    prop_oneof![
        Just(Algorithm::ES256),
        Just(Algorithm::ES384),
        Just(Algorithm::ES512),
        Just(Algorithm::HS256),
        Just(Algorithm::HS384),
        Just(Algorithm::HS512),
    ]
}

fn arb_prefix() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{0,16}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Key type lookups are stable and agree with the JOSE names.
    #[test]
    fn prop_kty_is_deterministic(alg in arb_algorithm()) {
        let first = alg.kty();
        prop_assert_eq!(first, alg.kty());
        prop_assert_eq!(Algorithm::from_name(alg.name()).unwrap().kty(), first);
        let expected_curve = first == KeyType::EllipticCurve;
        prop_assert_eq!(alg.curve().is_ok(), expected_curve);
    }

    /// Names parse back to the same catalog entry; JOSE names are case-sensitive.
    #[test]
    fn prop_names_parse_back(alg in arb_algorithm()) {
        prop_assert_eq!(Algorithm::from_name(alg.name()).unwrap(), alg);
        prop_assert!(Algorithm::from_name(&alg.name().to_lowercase()).is_err());
    }

    /// Generated key ids never collide and always carry the prefix.
    #[test]
    fn prop_key_ids_are_unique(prefix in arb_prefix(), count in 2usize..64) {
        let factory = KeyFactory::new(prefix.clone());
        let ids: HashSet<String> = (0..count).map(|_| factory.generate_key_id()).collect();
        prop_assert_eq!(ids.len(), count);
        prop_assert!(ids.iter().all(|id| id.starts_with(&prefix)));
        // 16 random bytes encode to 22 base64url characters.
        prop_assert!(ids.iter().all(|id| id.len() == prefix.len() + 22));
    }

    /// A key restored from its serialized form signs and verifies like the original.
    #[test]
    fn prop_serialized_key_still_signs(
        alg in arb_fast_signing_algorithm(),
        message in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let key = KeyFactory::new("p_").create(alg).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let restored: KeyMaterial = serde_json::from_str(&json).unwrap();

        prop_assert_eq!(&restored, &key);
        let signature = sign(&restored, &message).unwrap();
        prop_assert!(verify(&key, &message, &signature).unwrap());
    }

    /// Revoking twice is observably the same as revoking once.
    #[test]
    fn prop_revoke_is_idempotent(
        alg in arb_fast_signing_algorithm(),
        first in proptest::option::of("[a-z]{1,12}"),
        second in proptest::option::of("[a-z]{1,12}"),
    ) {
        let mut key = KeyFactory::new("p_").create(alg).unwrap();
        prop_assert!(key.revoke(first.as_deref()));
        let once = key.clone();
        prop_assert!(!key.revoke(second.as_deref()));
        prop_assert_eq!(key, once);
    }

    /// Symmetric keys never get a public projection; asymmetric ones never leak `d`.
    #[test]
    fn prop_public_projection_has_no_private_members(alg in arb_fast_signing_algorithm()) {
        let key = KeyFactory::new("p_").create(alg).unwrap();
        match key.public_jwk() {
            None => prop_assert_eq!(key.key_type(), KeyType::Octet),
            Some(jwk) => {
                let json = serde_json::to_value(&jwk).unwrap();
                prop_assert!(json.get("d").is_none());
                prop_assert!(json.get("k").is_none());
                prop_assert_eq!(json["kid"].as_str(), Some(key.id()));
            }
        }
    }
}

#[test]
fn test_create_covers_every_slot_default() {
    assert_eq!(Algorithm::create(KeyType::Rsa, KeyUse::Signature).unwrap(), Algorithm::RS256);
    assert_eq!(
        Algorithm::create(KeyType::EllipticCurve, KeyUse::Signature).unwrap(),
        Algorithm::ES256
    );
    assert_eq!(Algorithm::create(KeyType::Octet, KeyUse::Signature).unwrap(), Algorithm::HS256);
    assert_eq!(Algorithm::create(KeyType::Rsa, KeyUse::Encryption).unwrap(), Algorithm::RsaOaep);
    assert_eq!(Algorithm::create(KeyType::Octet, KeyUse::Encryption).unwrap(), Algorithm::A128KW);
    assert!(Algorithm::create(KeyType::EllipticCurve, KeyUse::Encryption).is_err());
}
