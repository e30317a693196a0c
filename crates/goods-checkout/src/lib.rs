//! # goods-checkout
//!
//! Digital goods purchasing over a redirect-based Express Checkout gateway.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐  begin   ┌─────────────────┐  approve  ┌─────────────┐
//! │  Storefront │─────────▶│  Gateway hosted │──────────▶│  Storefront │
//! │  (/set_ec)  │  TOKEN   │  checkout page  │ token +   │ (/do_ec_    │
//! └─────────────┘          └─────────────────┘ PayerID   │  payment)   │
//!                                                        └──────┬──────┘
//!                                       finalize + ledger write │
//!                                                               ▼
//!                                                     ┌──────────────────┐
//!                                                     │  PurchaseLedger  │
//!                                                     └──────────────────┘
//! ```
//!
//! The session id, item id and quoted amount ride through the gateway in a
//! signed return URL, so nothing about a pending checkout is stored here.
//! A payment the ledger cannot record is written to the reconciliation log.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use goods_checkout::*;
//!
//! let orchestrator = CheckoutOrchestrator::new(
//!     Arc::new(MemorySessionCache::new()),
//!     Arc::new(Catalog::default()),
//!     Arc::new(ExpressCheckoutClient::from_env()?),
//!     PurchaseLedger::new(Arc::new(JsonFilePurchaseStore::open("data/purchases.json")?)),
//!     Arc::new(JsonLinesReconciliationLog::new("data/reconciliation.jsonl")),
//!     CallbackSigner::random(),
//!     "https://shop.example",
//! )?;
//!
//! let pending = orchestrator.begin(&session_id, "invoice_template1").await?;
//! // Redirect user to: pending.redirect_url
//! ```

mod callback;
mod catalog;
mod error;
mod gateway;
mod ledger;
mod nvp;
mod orchestrator;
mod reconciliation;
mod session;

pub use callback::CallbackSigner;
pub use catalog::{Catalog, Product, format_amount};
pub use error::{CheckoutError, GatewayError, Result};
pub use gateway::{
    CheckoutToken, DigitalGoodsOrder, ExpressCheckoutClient, GatewayAuth, GatewayConfig,
    HttpTransport, NvpTransport, PaymentConfirmation, PaymentGateway,
};
pub use ledger::{
    JsonFilePurchaseStore, MemoryPurchaseStore, PurchaseLedger, PurchaseRecord, PurchaseStore,
};
pub use nvp::{NvpRequest, NvpResponse};
pub use orchestrator::{
    CheckoutOrchestrator, CheckoutState, CompletedPurchase, FinalizeRequest, PendingCheckout,
    RetryPolicy,
};
pub use reconciliation::{
    JsonLinesReconciliationLog, MemoryReconciliationLog, ReconciliationEntry, ReconciliationLog,
};
pub use session::{
    DEFAULT_SESSION_TTL, Identity, MemorySessionCache, Session, SessionCache, SessionId,
};
