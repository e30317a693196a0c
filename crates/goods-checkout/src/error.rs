//! Checkout Error Types

use rust_decimal::Decimal;
use thiserror::Error;

use crate::orchestrator::CheckoutState;

/// Result type alias
pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Checkout-related errors
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// Session id absent or past its TTL
    #[error("Session expired or unknown")]
    SessionExpired,

    /// Item id not in the catalog
    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    /// Payment gateway rejected the call or could not be reached
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Ledger storage failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Callback parameters do not match their signature
    #[error("Callback parameters failed signature verification")]
    TamperedCallback,

    /// Catalog price moved between begin and finalize
    #[error("Price of {item_id} changed from {quoted} to {current}")]
    PriceChanged {
        item_id: String,
        quoted: Decimal,
        current: Decimal,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Optional settings are absent, so the feature is off
    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl CheckoutError {
    /// Terminal checkout state this error leaves the flow in.
    ///
    /// `None` for requests rejected before the gateway was involved and for
    /// paid-but-unrecorded purchases, which are escalated instead.
    pub const fn state(&self) -> Option<CheckoutState> {
        match self {
            Self::SessionExpired => Some(CheckoutState::SessionExpired),
            Self::Gateway(_) => Some(CheckoutState::GatewayFailed),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Gateway calls move money and are never retried blindly.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::SessionExpired => "Your session has expired. Please sign in and try again.",
            Self::UnknownProduct(_) => "That item is not available.",
            Self::Gateway(_) => "Payment processing failed. Please try again.",
            Self::Persistence(_) => {
                "Your payment was received but could not be recorded yet. It will be credited shortly."
            }
            Self::TamperedCallback | Self::PriceChanged { .. } => {
                "The checkout could not be verified. Please start again."
            }
            Self::Config(_) => "Service configuration error.",
            Self::NotConfigured(_) => "This feature is not configured.",
        }
    }
}

/// Failure reported by, or while talking to, the payment gateway
#[derive(Error, Debug, Clone)]
#[error("{operation} failed: {}", self.describe())]
pub struct GatewayError {
    /// NVP method that failed, e.g. `SetExpressCheckout`
    pub operation: String,

    /// `ACK` value if a response was decoded
    pub ack: Option<String>,

    /// First `L_ERRORCODE0`
    pub error_code: Option<String>,

    /// First `L_LONGMESSAGE0`, or the transport error text
    pub message: String,

    /// Raw response body for diagnostics
    pub raw: Option<String>,
}

impl GatewayError {
    /// Error raised before a response could be decoded
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ack: None,
            error_code: None,
            message: message.into(),
            raw: None,
        }
    }

    fn describe(&self) -> String {
        match (&self.ack, &self.error_code) {
            (Some(ack), Some(code)) => format!("ACK={ack} [{code}] {}", self.message),
            (Some(ack), None) => format!("ACK={ack} {}", self.message),
            _ => self.message.clone(),
        }
    }
}
