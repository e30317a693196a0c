//! Return-URL signing.
//!
//! The pending checkout lives only in the query string the gateway sends the
//! user back with. An HMAC over those values lets finalize reject a callback
//! whose session, item or quoted amount was edited in transit.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::error::{CheckoutError, Result};

type HmacSha256 = Hmac<Sha256>;

const MIN_SECRET_BYTES: usize = 16;

/// Signs and verifies callback parameters
#[derive(Clone)]
pub struct CallbackSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for CallbackSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSigner").finish_non_exhaustive()
    }
}

impl CallbackSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_BYTES {
            return Err(CheckoutError::Config(format!(
                "callback secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        Ok(Self { secret })
    }

    /// Process-local random secret. Callbacks do not survive a restart.
    pub fn random() -> Self {
        let mut secret = vec![0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self { secret }
    }

    fn mac(&self, session_id: &str, item_id: &str, amount: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        // Length-prefixed so ("ab", "c") and ("a", "bc") differ.
        for part in [session_id, item_id, amount] {
            mac.update(&(part.len() as u64).to_be_bytes());
            mac.update(part.as_bytes());
        }
        mac
    }

    /// Hex signature over the round-tripped values
    pub fn sign(&self, session_id: &str, item_id: &str, amount: &str) -> String {
        hex::encode(self.mac(session_id, item_id, amount).finalize().into_bytes())
    }

    /// Constant-time check of a signature produced by [`sign`](Self::sign)
    pub fn verify(&self, session_id: &str, item_id: &str, amount: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        self.mac(session_id, item_id, amount)
            .verify_slice(&expected)
            .is_ok()
    }
}
