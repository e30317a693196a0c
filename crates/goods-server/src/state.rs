//! Application State

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use goods_checkout::{
    CallbackSigner, Catalog, CheckoutError, CheckoutOrchestrator, ExpressCheckoutClient,
    GatewayConfig, JsonFilePurchaseStore, JsonLinesReconciliationLog, MemorySessionCache, PurchaseLedger,
    SessionCache,
};

use crate::config::AppConfig;
use crate::identity::{IdentityProvider, StaticIdentityProvider};
use crate::views::{HtmlViews, ViewRenderer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,

    pub sessions: Arc<dyn SessionCache>,

    pub ledger: PurchaseLedger,

    /// Checkout orchestrator (optional - None if the gateway is not configured)
    pub checkout: Option<Arc<CheckoutOrchestrator>>,

    /// Identity provider (optional - None disables sign-in)
    pub identity: Option<Arc<dyn IdentityProvider>>,

    pub views: Arc<dyn ViewRenderer>,

    pub session_ttl: Duration,

    /// Origin the login callback returns to
    pub public_base_url: String,
}

impl AppState {
    /// Wire up stores, gateway and providers from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::with_gateway_config(config, GatewayConfig::from_env())
    }

    /// Payments are disabled only when the gateway reports `NotConfigured`
    pub fn with_gateway_config(
        config: &AppConfig,
        gateway: goods_checkout::Result<GatewayConfig>,
    ) -> Result<Self> {
        let catalog = Arc::new(Catalog::default());
        let sessions: Arc<dyn SessionCache> = Arc::new(MemorySessionCache::new());

        let store = JsonFilePurchaseStore::open(&config.ledger_path)
            .with_context(|| format!("Failed to open ledger at {}", config.ledger_path.display()))?;
        let ledger = PurchaseLedger::new(Arc::new(store));

        let signer = match &config.callback_secret {
            Some(secret) => CallbackSigner::new(secret.clone()).context("Invalid CALLBACK_SECRET")?,
            None => {
                tracing::warn!("⚠ CALLBACK_SECRET not set - using a random key");
                tracing::warn!("  Checkouts in flight will fail after a restart");
                CallbackSigner::random()
            }
        };

        let checkout = match gateway {
            Ok(gateway) => {
                let client =
                    ExpressCheckoutClient::new(gateway).context("Failed to build gateway client")?;
                tracing::info!(endpoint = %client.config().endpoint, "✓ Gateway configured");
                let orchestrator = CheckoutOrchestrator::new(
                    sessions.clone(),
                    catalog.clone(),
                    Arc::new(client),
                    ledger.clone(),
                    Arc::new(JsonLinesReconciliationLog::new(&config.reconciliation_log_path)),
                    signer,
                    &config.public_base_url,
                )
                .context("Failed to build checkout")?;
                Some(Arc::new(orchestrator))
            }
            Err(CheckoutError::NotConfigured(reason)) => {
                tracing::warn!("⚠ Gateway not configured - payments disabled");
                tracing::warn!("  {}", reason);
                None
            }
            Err(e) => return Err(e).context("Invalid gateway configuration"),
        };

        let identity: Option<Arc<dyn IdentityProvider>> = match &config.dev_identity_username {
            Some(username) => {
                tracing::warn!(username = %username, "⚠ Using static identity provider");
                Some(Arc::new(StaticIdentityProvider::new(username.clone())))
            }
            None => {
                tracing::warn!("⚠ No identity provider configured - sign-in disabled");
                None
            }
        };

        Ok(Self {
            catalog,
            sessions,
            ledger,
            checkout,
            identity,
            views: Arc::new(HtmlViews),
            session_ttl: config.session_ttl,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        })
    }
}
