//! Express Checkout Gateway Client
//!
//! Implements the digital-goods variant of the redirect checkout flow:
//!
//! ```text
//! ┌─────────────┐  SetExpressCheckout   ┌─────────────┐
//! │  Storefront │──────────────────────▶│   Gateway   │
//! │             │◀──────── TOKEN ───────│  NVP API    │
//! │             │                       └─────────────┘
//! │             │  302 ─▶ hosted checkout ─▶ return URL (token, PayerID)
//! │             │  DoExpressCheckoutPayment (same order fields)
//! └─────────────┘
//! ```
//!
//! Calls are never retried here: a retried finalize can charge twice.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::Product;
use crate::error::{CheckoutError, GatewayError, Result};
use crate::nvp::{NvpRequest, NvpResponse};
use crate::session::truncated;

pub const SET_EXPRESS_CHECKOUT: &str = "SetExpressCheckout";
pub const DO_EXPRESS_CHECKOUT_PAYMENT: &str = "DoExpressCheckoutPayment";

const DEFAULT_ENDPOINT: &str = "https://api-3t.sandbox.paypal.com/nvp";
const DEFAULT_CHECKOUT_URL: &str = "https://www.sandbox.paypal.com/incontext";
const DEFAULT_API_VERSION: &str = "65.1";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How requests authenticate against the gateway
#[derive(Clone)]
pub enum GatewayAuth {
    /// API username, password and signature ("3-token")
    Signature {
        username: String,
        password: String,
        signature: String,
    },
    /// Act on behalf of a merchant account ("unipay")
    Subject(String),
}

impl std::fmt::Debug for GatewayAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signature { username, .. } => f
                .debug_struct("Signature")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Subject(subject) => f.debug_tuple("Subject").field(subject).finish(),
        }
    }
}

impl GatewayAuth {
    fn apply(&self, request: &mut NvpRequest) {
        match self {
            Self::Signature {
                username,
                password,
                signature,
            } => {
                request
                    .set("USER", username.as_str())
                    .set("PWD", password.as_str())
                    .set("SIGNATURE", signature.as_str());
            }
            Self::Subject(subject) => {
                request.set("SUBJECT", subject.as_str());
            }
        }
    }
}

/// Gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// NVP endpoint
    pub endpoint: String,

    /// Hosted in-context checkout entry point
    pub checkout_url: String,

    /// `VERSION` sent with every call
    pub api_version: String,

    /// The single currency every order is priced in
    pub currency: String,

    pub auth: GatewayAuth,

    /// HTTP timeout for each call
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Sandbox defaults with the given credentials
    pub fn sandbox(auth: GatewayAuth) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            checkout_url: DEFAULT_CHECKOUT_URL.into(),
            api_version: DEFAULT_API_VERSION.into(),
            currency: DEFAULT_CURRENCY.into(),
            auth,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// Missing credentials are `NotConfigured`; present but invalid values
    /// are `Config`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        // Invalid values are errors even when payments would be off anyway.
        let timeout_secs: u64 = match var("GATEWAY_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| CheckoutError::Config(format!("Invalid GATEWAY_TIMEOUT_SECS: {raw}")))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let endpoint = var("GATEWAY_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.into());
        let checkout_url = var("GATEWAY_CHECKOUT_URL").unwrap_or_else(|| DEFAULT_CHECKOUT_URL.into());
        for (name, value) in [("GATEWAY_ENDPOINT", &endpoint), ("GATEWAY_CHECKOUT_URL", &checkout_url)] {
            url::Url::parse(value)
                .map_err(|e| CheckoutError::Config(format!("Invalid {name} {value}: {e}")))?;
        }

        let auth = match (
            var("GATEWAY_USERNAME"),
            var("GATEWAY_PASSWORD"),
            var("GATEWAY_SIGNATURE"),
        ) {
            (Some(username), Some(password), Some(signature)) => GatewayAuth::Signature {
                username,
                password,
                signature,
            },
            _ => GatewayAuth::Subject(var("GATEWAY_SUBJECT").ok_or_else(|| {
                CheckoutError::NotConfigured(
                    "GATEWAY_USERNAME/GATEWAY_PASSWORD/GATEWAY_SIGNATURE or GATEWAY_SUBJECT not set"
                        .into(),
                )
            })?),
        };

        Ok(Self {
            endpoint,
            checkout_url,
            api_version: var("GATEWAY_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.into()),
            currency: var("GATEWAY_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.into()),
            auth,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Amount and line-item fields of a single-item digital order.
///
/// Begin and finalize must send exactly these fields; the gateway rejects a
/// finalize whose totals differ from what it quoted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalGoodsOrder {
    pub item_id: String,
    pub name: String,
    pub amount: String,
    pub currency: String,
}

impl DigitalGoodsOrder {
    pub fn new(product: &Product, currency: &str) -> Self {
        Self {
            item_id: product.id.clone(),
            name: product.description.clone(),
            amount: product.amount(),
            currency: currency.to_string(),
        }
    }

    /// NVP fields shared by both calls
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PAYMENTREQUEST_0_CURRENCYCODE", self.currency.clone()),
            ("PAYMENTREQUEST_0_AMT", self.amount.clone()),
            ("PAYMENTREQUEST_0_ITEMAMT", self.amount.clone()),
            ("PAYMENTREQUEST_0_PAYMENTACTION", "Sale".into()),
            ("L_PAYMENTREQUEST_0_NAME0", self.name.clone()),
            ("L_PAYMENTREQUEST_0_AMT0", self.amount.clone()),
            ("L_PAYMENTREQUEST_0_QTY0", "1".into()),
            ("L_PAYMENTREQUEST_0_ITEMCATEGORY0", "Digital".into()),
        ]
    }
}

/// Gateway-issued checkout token
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckoutToken(String);

impl CheckoutToken {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    pub fn redacted(&self) -> &str {
        truncated(&self.0)
    }
}

impl std::fmt::Display for CheckoutToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a successful finalize
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub token: CheckoutToken,
    pub ack: String,
    pub transaction_id: Option<String>,
    pub payment_status: Option<String>,
}

/// Moves an encoded NVP body to the endpoint and returns the response body
#[async_trait]
pub trait NvpTransport: Send + Sync {
    async fn post(&self, endpoint: &str, body: String) -> std::result::Result<String, String>;
}

/// HTTPS transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CheckoutError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NvpTransport for HttpTransport {
    async fn post(&self, endpoint: &str, body: String) -> std::result::Result<String, String> {
        let response = self
            .client
            .post(endpoint)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(format!("HTTP {status}: {text}"));
        }
        Ok(text)
    }
}

/// Payment gateway trait (Strategy pattern)
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Quote the order and obtain a checkout token
    async fn begin_digital_goods_checkout(
        &self,
        order: &DigitalGoodsOrder,
        return_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutToken>;

    /// Capture the payment the user approved at the gateway
    async fn finalize_digital_goods_checkout(
        &self,
        token: &CheckoutToken,
        payer_id: &str,
        order: &DigitalGoodsOrder,
    ) -> Result<PaymentConfirmation>;

    /// Hosted checkout URL for a token. No network call.
    fn redirect_url(&self, token: &CheckoutToken) -> String;

    /// The currency orders are priced in
    fn currency(&self) -> &str;
}

/// NVP Express Checkout client
pub struct ExpressCheckoutClient<T: NvpTransport = HttpTransport> {
    config: GatewayConfig,
    transport: T,
}

impl ExpressCheckoutClient<HttpTransport> {
    /// Create a client talking HTTPS to the configured endpoint
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self { config, transport })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GatewayConfig::from_env()?)
    }
}

impl<T: NvpTransport> ExpressCheckoutClient<T> {
    pub const fn with_transport(config: GatewayConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Execute one NVP call, failing on anything but a successful ACK
    async fn call(&self, mut request: NvpRequest) -> Result<NvpResponse> {
        self.config.auth.apply(&mut request);
        let operation = request.method().to_string();

        tracing::debug!(
            endpoint = %self.config.endpoint,
            pairs = %request.redacted(),
            "Sending NVP request"
        );

        let body = self
            .transport
            .post(&self.config.endpoint, request.encode())
            .await
            .map_err(|e| GatewayError::transport(&operation, e))?;

        let response = NvpResponse::decode(&body);
        if !response.is_success() {
            tracing::warn!(
                operation = %operation,
                ack = ?response.ack(),
                error_code = ?response.error_code(),
                "Gateway call rejected"
            );
            return Err(GatewayError {
                operation,
                ack: response.ack().map(str::to_string),
                error_code: response.error_code().map(str::to_string),
                message: response
                    .long_message()
                    .unwrap_or("unsuccessful ACK")
                    .to_string(),
                raw: Some(response.raw().to_string()),
            }
            .into());
        }

        tracing::debug!(operation = %operation, ack = ?response.ack(), "Gateway call succeeded");
        Ok(response)
    }

    fn request(&self, method: &str) -> NvpRequest {
        NvpRequest::new(method, &self.config.api_version)
    }
}

#[async_trait]
impl<T: NvpTransport> PaymentGateway for ExpressCheckoutClient<T> {
    async fn begin_digital_goods_checkout(
        &self,
        order: &DigitalGoodsOrder,
        return_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutToken> {
        let mut request = self.request(SET_EXPRESS_CHECKOUT);
        request
            .extend(order.fields())
            .set("RETURNURL", return_url)
            .set("CANCELURL", cancel_url)
            .set("REQCONFIRMSHIPPING", "0")
            .set("NOSHIPPING", "1");

        let response = self.call(request).await?;
        let token = response.get("TOKEN").filter(|t| !t.is_empty()).ok_or_else(|| GatewayError {
            operation: SET_EXPRESS_CHECKOUT.into(),
            ack: response.ack().map(str::to_string),
            error_code: None,
            message: "response carried no TOKEN".into(),
            raw: Some(response.raw().to_string()),
        })?;

        Ok(CheckoutToken::from_string(token))
    }

    async fn finalize_digital_goods_checkout(
        &self,
        token: &CheckoutToken,
        payer_id: &str,
        order: &DigitalGoodsOrder,
    ) -> Result<PaymentConfirmation> {
        let mut request = self.request(DO_EXPRESS_CHECKOUT_PAYMENT);
        request
            .set("TOKEN", token.as_str())
            .set("PAYERID", payer_id)
            .extend(order.fields());

        let response = self.call(request).await?;
        Ok(PaymentConfirmation {
            token: token.clone(),
            ack: response.ack().unwrap_or_default().to_string(),
            transaction_id: response.get("PAYMENTINFO_0_TRANSACTIONID").map(str::to_string),
            payment_status: response.get("PAYMENTINFO_0_PAYMENTSTATUS").map(str::to_string),
        })
    }

    fn redirect_url(&self, token: &CheckoutToken) -> String {
        match url::Url::parse_with_params(
            &self.config.checkout_url,
            &[("token", token.as_str()), ("useraction", "commit")],
        ) {
            Ok(url) => url.into(),
            Err(_) => format!(
                "{}?token={}&useraction=commit",
                self.config.checkout_url, token
            ),
        }
    }

    fn currency(&self) -> &str {
        &self.config.currency
    }
}
