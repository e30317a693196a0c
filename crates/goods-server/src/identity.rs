//! Identity Provider Boundary
//!
//! Users sign in with a third-party account; the storefront only needs the
//! username that comes back from the handshake.

use async_trait::async_trait;
use thiserror::Error;
use url::form_urlencoded;

use goods_checkout::Identity;

/// Identity provider errors
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The provider refused the token/verifier pair
    #[error("Login rejected: {0}")]
    Rejected(String),
}

/// Identity provider trait (Strategy pattern)
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the user to start a login that returns to `callback_url`
    fn authorization_url(&self, callback_url: &str) -> String;

    /// Exchange the token and verifier from the login callback for an identity
    async fn resolve_identity(
        &self,
        auth_token: &str,
        verifier: &str,
    ) -> Result<Identity, IdentityError>;

    /// Provider name
    fn name(&self) -> &str;
}

/// Signs everyone in as one configured user (for local development)
pub struct StaticIdentityProvider {
    username: String,
}

impl StaticIdentityProvider {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn authorization_url(&self, callback_url: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("oauth_token", "dev")
            .append_pair("oauth_verifier", "dev")
            .finish();
        format!("{callback_url}?{query}")
    }

    async fn resolve_identity(
        &self,
        auth_token: &str,
        verifier: &str,
    ) -> Result<Identity, IdentityError> {
        if auth_token.is_empty() || verifier.is_empty() {
            return Err(IdentityError::Rejected("missing token or verifier".into()));
        }
        Ok(Identity::new(self.username.clone()))
    }

    fn name(&self) -> &str {
        "static"
    }
}
