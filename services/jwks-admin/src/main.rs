//! Operator command line for the JWKS key lifecycle.
//!
//! The store and key options come from the same `JWKS_*` / `VAULT_*`
//! environment variables the services use.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use jwks_core::jwt::{Claims, JwtSerializer, TokenValidator};
use jwks_core::observability::{TracingConfig, init_tracing};
use jwks_core::{JwksService, KeyMaterial, KeyUse};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jwks-admin")]
#[command(about = "Rotate, revoke and inspect JWKS keys")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current key id of a slot, generating one if needed
    Current {
        /// Key use (sig or enc)
        #[arg(long = "use", default_value = "sig")]
        key_use: KeyUse,
    },
    /// Revoke the current key and install a new one
    Rotate {
        /// Key use (sig or enc)
        #[arg(long = "use", default_value = "sig")]
        key_use: KeyUse,
    },
    /// Revoke a key by id
    Revoke {
        /// Key id
        key_id: String,
        /// Reason recorded with the revocation
        #[arg(long)]
        reason: Option<String>,
    },
    /// List the most recent keys, newest first
    List {
        /// Number of keys
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
        /// Restrict to one key use (sig or enc)
        #[arg(long = "use")]
        key_use: Option<KeyUse>,
    },
    /// Print the public JWKS document
    Jwks,
    /// Issue a test token with the current signing key
    Issue {
        /// Subject claim
        #[arg(long)]
        subject: String,
        /// Issuer claim
        #[arg(long, default_value = "jwks-admin")]
        issuer: String,
        /// Audience claim (repeatable)
        #[arg(long)]
        audience: Vec<String>,
        /// Lifetime in seconds
        #[arg(long, default_value = "300")]
        ttl: i64,
    },
    /// Validate a token against the retained signing keys
    Verify {
        /// Compact JWS token
        token: String,
        /// Reject tokens signed by revoked keys
        #[arg(long)]
        reject_revoked: bool,
    },
    /// Delete every key (not for production)
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(
        &TracingConfig::from_lookup(|name| std::env::var(name).ok()).with_service_name("jwks-admin"),
    );

    let args = Args::parse();
    let service = Arc::new(
        JwksService::from_env()
            .await
            .context("failed to initialize the JWKS service")?,
    );
    info!(backend = service.store().backend(), "Connected to key store");

    match args.command {
        Command::Current { key_use } => {
            let key_id = match key_use {
                KeyUse::Signature => service
                    .current_signing_credentials()
                    .await?
                    .key_id()
                    .to_string(),
                KeyUse::Encryption => service
                    .current_encrypting_credentials()
                    .await?
                    .key_id()
                    .to_string(),
            };
            println!("{key_id}");
        }
        Command::Rotate { key_use } => {
            let key = service.generate_new_key(key_use).await?;
            println!("{}", key.id());
        }
        Command::Revoke { key_id, reason } => {
            let key = service.revoke_key(&key_id, reason.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&summary(&key))?);
        }
        Command::List { count, key_use } => {
            let keys = service.store().get_last_keys(count, key_use).await?;
            let keys: Vec<_> = keys.iter().map(summary).collect();
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
        Command::Jwks => {
            let jwks = service.public_jwks().await?;
            println!("{}", serde_json::to_string_pretty(jwks.as_ref())?);
        }
        Command::Issue {
            subject,
            issuer,
            audience,
            ttl,
        } => {
            let credentials = service.current_signing_credentials().await?;
            let claims = Claims::new(issuer, subject, audience, ttl);
            println!("{}", JwtSerializer::new().serialize(&claims, &credentials)?);
        }
        Command::Verify {
            token,
            reject_revoked,
        } => {
            let options = jwks_core::jwt::ValidationOptions {
                reject_revoked_keys: reject_revoked,
                ..Default::default()
            };
            let validator = TokenValidator::new(Arc::clone(&service)).with_options(options);
            let claims: serde_json::Value = validator.validate(&token).await?;
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to delete every key without --yes");
            }
            service.clear().await?;
            println!("cleared");
        }
    }

    Ok(())
}

/// Key metadata without any key parameters.
fn summary(key: &KeyMaterial) -> serde_json::Value {
    json!({
        "id": key.id(),
        "type": key.key_type().as_str(),
        "use": key.key_use().as_str(),
        "algorithm": key.algorithm().name(),
        "created_at": key.created_at(),
        "revoked_at": key.revoked_at(),
        "revoked_reason": key.revoked_reason(),
        "thumbprint": key.thumbprint(),
    })
}
