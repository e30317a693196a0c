//! Server Configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Server configuration.
///
/// Gateway settings are read separately by `GatewayConfig::from_env`, so a
/// missing merchant account only disables payments.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Listen address
    pub bind_addr: String,

    /// Externally visible origin used for gateway return/cancel URLs
    pub public_base_url: String,

    /// Lifetime of a login session
    pub session_ttl: Duration,

    /// HMAC key for return URLs; random per process when unset
    pub callback_secret: Option<Vec<u8>>,

    pub ledger_path: PathBuf,

    pub reconciliation_log_path: PathBuf,

    /// Enables the static identity provider for local development
    pub dev_identity_username: Option<String>,
}

impl AppConfig {
    /// Creates a new `AppConfig` from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let session_ttl_secs: u64 = var("SESSION_TTL_SECS")
            .unwrap_or_else(|| "600".to_string())
            .parse()
            .context("Invalid SESSION_TTL_SECS")?;
        if session_ttl_secs == 0 {
            anyhow::bail!("SESSION_TTL_SECS must be greater than zero");
        }

        let callback_secret = var("CALLBACK_SECRET")
            .map(|hex_secret| {
                hex::decode(hex_secret.trim())
                    .context("CALLBACK_SECRET must be valid hexadecimal (generate with: openssl rand -hex 32)")
            })
            .transpose()?;

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            public_base_url: var("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            session_ttl: Duration::from_secs(session_ttl_secs),
            callback_secret,
            ledger_path: var("LEDGER_PATH")
                .unwrap_or_else(|| "data/purchases.json".to_string())
                .into(),
            reconciliation_log_path: var("RECONCILIATION_LOG_PATH")
                .unwrap_or_else(|| "data/reconciliation.jsonl".to_string())
                .into(),
            dev_identity_username: var("DEV_IDENTITY_USERNAME"),
        })
    }
}
