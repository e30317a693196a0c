//! Checkout Orchestration
//!
//! Drives one purchase from intent to a credited ledger entry:
//!
//! ```text
//!  INIT ──begin──▶ AWAITING_GATEWAY_APPROVAL ──finalize──▶ COMPLETED
//!   │                      │        │
//!   │ no session           │ cancel │ gateway rejects
//!   ▼                      ▼        ▼
//!  SESSION_EXPIRED     CANCELLED   GATEWAY_FAILED
//! ```
//!
//! Only COMPLETED touches the ledger. The pending checkout is not stored;
//! it travels in the signed return URL.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::callback::CallbackSigner;
use crate::catalog::{Catalog, Product};
use crate::error::{CheckoutError, Result};
use crate::gateway::{CheckoutToken, DigitalGoodsOrder, PaymentConfirmation, PaymentGateway};
use crate::ledger::{PurchaseLedger, PurchaseRecord};
use crate::reconciliation::{ReconciliationEntry, ReconciliationLog};
use crate::session::{Session, SessionCache, SessionId};

/// Checkout state machine states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutState {
    Init,
    AwaitingGatewayApproval,
    Completed,
    Cancelled,
    SessionExpired,
    GatewayFailed,
}

impl CheckoutState {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Init | Self::AwaitingGatewayApproval)
    }
}

/// Backoff schedule for ledger writes after a captured payment
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

/// A checkout waiting for the user to approve at the gateway
#[derive(Clone, Debug, Serialize)]
pub struct PendingCheckout {
    pub token: CheckoutToken,
    pub session_id: SessionId,
    pub item_id: String,
    pub amount: String,
    /// Where to send the user next
    pub redirect_url: String,
    pub state: CheckoutState,
}

/// Parameters the gateway sends the user back with
#[derive(Clone, Debug, Deserialize)]
pub struct FinalizeRequest {
    pub session_id: SessionId,
    pub item_id: String,
    pub amount: String,
    pub signature: String,
    pub token: CheckoutToken,
    pub payer_id: String,
}

/// A paid and credited purchase
#[derive(Clone, Debug, Serialize)]
pub struct CompletedPurchase {
    pub session_id: SessionId,
    pub identity: String,
    pub product: Product,
    pub token: CheckoutToken,
    pub transaction_id: Option<String>,
    pub record: PurchaseRecord,
    pub state: CheckoutState,
}

/// Checkout orchestrator
pub struct CheckoutOrchestrator {
    sessions: Arc<dyn SessionCache>,
    catalog: Arc<Catalog>,
    gateway: Arc<dyn PaymentGateway>,
    ledger: PurchaseLedger,
    reconciliation: Arc<dyn ReconciliationLog>,
    signer: CallbackSigner,
    base_url: Url,
    retry: RetryPolicy,
}

impl CheckoutOrchestrator {
    /// `base_url` is the public address the gateway sends users back to
    pub fn new(
        sessions: Arc<dyn SessionCache>,
        catalog: Arc<Catalog>,
        gateway: Arc<dyn PaymentGateway>,
        ledger: PurchaseLedger,
        reconciliation: Arc<dyn ReconciliationLog>,
        signer: CallbackSigner,
        base_url: &str,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| CheckoutError::Config(format!("invalid base URL {base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            sessions,
            catalog,
            gateway,
            ledger,
            reconciliation,
            signer,
            base_url,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub const fn ledger(&self) -> &PurchaseLedger {
        &self.ledger
    }

    /// Resolve a session id, treating absence and expiry alike
    pub fn resolve_session(&self, session_id: &SessionId) -> Result<Session> {
        self.sessions.get(session_id).ok_or_else(|| {
            tracing::warn!(session = %session_id.redacted(), "Invalid or expired session");
            CheckoutError::SessionExpired
        })
    }

    /// INIT → AWAITING_GATEWAY_APPROVAL
    pub async fn begin(&self, session_id: &SessionId, item_id: &str) -> Result<PendingCheckout> {
        let session = self.resolve_session(session_id)?;
        let product = self.catalog.get(item_id)?;
        let order = DigitalGoodsOrder::new(product, self.gateway.currency());

        let return_url = self.return_url(session_id, item_id, &order.amount);
        let cancel_url = self.cancel_url(session_id);

        let token = self
            .gateway
            .begin_digital_goods_checkout(&order, &return_url, &cancel_url)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    session = %session_id.redacted(),
                    item_id = %item_id,
                    error = %e,
                    "Failure for SetExpressCheckout"
                );
            })?;

        let redirect_url = self.gateway.redirect_url(&token);
        tracing::info!(
            identity = %session.identity.username,
            item_id = %item_id,
            amount = %order.amount,
            token = %token.redacted(),
            "Checkout started, redirecting to gateway"
        );

        Ok(PendingCheckout {
            token,
            session_id: session_id.clone(),
            item_id: item_id.to_string(),
            amount: order.amount,
            redirect_url,
            state: CheckoutState::AwaitingGatewayApproval,
        })
    }

    /// AWAITING_GATEWAY_APPROVAL → COMPLETED
    ///
    /// Every precondition is checked before the gateway is contacted; a
    /// payment is only captured when the buyer can also be credited.
    pub async fn finalize(&self, callback: &FinalizeRequest) -> Result<CompletedPurchase> {
        if !self.signer.verify(
            callback.session_id.as_str(),
            &callback.item_id,
            &callback.amount,
            &callback.signature,
        ) {
            tracing::warn!(
                session = %callback.session_id.redacted(),
                item_id = %callback.item_id,
                token = %callback.token.redacted(),
                "Callback signature mismatch"
            );
            return Err(CheckoutError::TamperedCallback);
        }

        let session = self.resolve_session(&callback.session_id)?;
        let product = self.catalog.get(&callback.item_id)?;
        let order = DigitalGoodsOrder::new(product, self.gateway.currency());

        if order.amount != callback.amount {
            tracing::warn!(
                item_id = %product.id,
                quoted = %callback.amount,
                current = %order.amount,
                "Catalog price changed during checkout"
            );
            return Err(CheckoutError::PriceChanged {
                item_id: product.id.clone(),
                quoted: Decimal::from_str(&callback.amount).unwrap_or_default(),
                current: product.price,
            });
        }

        let confirmation = self
            .gateway
            .finalize_digital_goods_checkout(&callback.token, &callback.payer_id, &order)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    token = %callback.token.redacted(),
                    item_id = %product.id,
                    error = %e,
                    "Failure for DoExpressCheckoutPayment"
                );
            })?;

        let identity = session.identity.username;
        let record = self
            .record_with_retry(&identity, callback, &order, &confirmation)
            .await?;

        tracing::info!(
            identity = %identity,
            item_id = %product.id,
            token = %callback.token.redacted(),
            transaction_id = ?confirmation.transaction_id,
            "Purchase completed"
        );

        Ok(CompletedPurchase {
            session_id: callback.session_id.clone(),
            identity,
            product: product.clone(),
            token: callback.token.clone(),
            transaction_id: confirmation.transaction_id,
            record,
            state: CheckoutState::Completed,
        })
    }

    /// AWAITING_GATEWAY_APPROVAL → CANCELLED. Informational only.
    pub fn cancel(&self, session_id: &SessionId) -> CheckoutState {
        tracing::info!(session = %session_id.redacted(), "Checkout cancelled at gateway");
        CheckoutState::Cancelled
    }

    /// Credit a captured payment, backing off on storage failures and
    /// escalating to the reconciliation log when they persist.
    async fn record_with_retry(
        &self,
        identity: &str,
        callback: &FinalizeRequest,
        order: &DigitalGoodsOrder,
        confirmation: &PaymentConfirmation,
    ) -> Result<PurchaseRecord> {
        let mut attempt = 1;
        loop {
            match self.record_purchase_blocking(identity, &callback.item_id).await {
                Ok(record) => return Ok(record),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        identity = %identity,
                        item_id = %callback.item_id,
                        attempt,
                        delay = ?delay,
                        error = %e,
                        "Ledger write failed after payment, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    let entry = ReconciliationEntry {
                        identity: identity.to_string(),
                        item_id: callback.item_id.clone(),
                        token: callback.token.to_string(),
                        payer_id: callback.payer_id.clone(),
                        amount: order.amount.clone(),
                        currency: order.currency.clone(),
                        transaction_id: confirmation.transaction_id.clone(),
                        reason: e.to_string(),
                        recorded_at: Utc::now(),
                    };
                    if let Err(log_err) = self.append_reconciliation_blocking(&entry).await {
                        tracing::error!(
                            identity = %entry.identity,
                            item_id = %entry.item_id,
                            token = %callback.token.redacted(),
                            transaction_id = ?entry.transaction_id,
                            error = %log_err,
                            "Could not write reconciliation entry"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Ledger stores do synchronous file IO; keep it off the async workers
    async fn record_purchase_blocking(&self, identity: &str, item_id: &str) -> Result<PurchaseRecord> {
        let ledger = self.ledger.clone();
        let (identity, item_id) = (identity.to_string(), item_id.to_string());
        tokio::task::spawn_blocking(move || ledger.record_purchase(&identity, &item_id))
            .await
            .unwrap_or_else(|e| Err(CheckoutError::Persistence(format!("ledger task failed: {e}"))))
    }

    async fn append_reconciliation_blocking(&self, entry: &ReconciliationEntry) -> Result<()> {
        let log = Arc::clone(&self.reconciliation);
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || log.append(&entry))
            .await
            .unwrap_or_else(|e| {
                Err(CheckoutError::Persistence(format!("reconciliation task failed: {e}")))
            })
    }

    fn return_url(&self, session_id: &SessionId, item_id: &str, amount: &str) -> String {
        let signature = self.signer.sign(session_id.as_str(), item_id, amount);
        let mut url = self.endpoint("do_ec_payment");
        url.query_pairs_mut()
            .append_pair("sid", session_id.as_str())
            .append_pair("item_id", item_id)
            .append_pair("amt", amount)
            .append_pair("sig", &signature);
        url.into()
    }

    fn cancel_url(&self, session_id: &SessionId) -> String {
        let mut url = self.endpoint("cancel_ec");
        url.query_pairs_mut().append_pair("sid", session_id.as_str());
        url.into()
    }

    fn endpoint(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }
}
