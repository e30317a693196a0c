//! Name/value-pair wire encoding.
//!
//! Requests and responses are `application/x-www-form-urlencoded` bodies
//! with uppercase keys. Values are always UTF-8.

use std::collections::BTreeMap;

use url::form_urlencoded;

use crate::session::truncated;

/// Keys whose values never reach the logs
const SECRET_KEYS: &[&str] = &["PWD", "SIGNATURE"];

/// Keys logged in shortened form
const TRUNCATED_KEYS: &[&str] = &["TOKEN", "PAYERID"];

/// Outgoing NVP request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvpRequest {
    pairs: BTreeMap<String, String>,
}

impl NvpRequest {
    /// Start a request for `method` at API `version`
    pub fn new(method: &str, version: &str) -> Self {
        let mut request = Self::default();
        request.set("METHOD", method);
        request.set("VERSION", version);
        request
    }

    /// Set a field; keys are uppercased
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.pairs.insert(key.to_ascii_uppercase(), value.into());
        self
    }

    pub fn extend<K, V>(&mut self, fields: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in fields {
            self.set(key.as_ref(), value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn method(&self) -> &str {
        self.get("METHOD").unwrap_or_default()
    }

    /// URL-encoded body
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }

    /// Pairs formatted for debug logs.
    ///
    /// Credentials are masked, tokens shortened, and URLs lose their query
    /// string (it carries the session id and callback signature).
    pub fn redacted(&self) -> String {
        self.pairs
            .iter()
            .map(|(key, value)| {
                let key = key.as_str();
                if SECRET_KEYS.contains(&key) {
                    format!("{key}=***")
                } else if TRUNCATED_KEYS.contains(&key) {
                    format!("{key}={}...", truncated(value))
                } else if key.ends_with("URL") {
                    match value.split_once('?') {
                        Some((base, _)) => format!("{key}={base}?***"),
                        None => format!("{key}={value}"),
                    }
                } else {
                    format!("{key}={value}")
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Decoded NVP response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvpResponse {
    pairs: BTreeMap<String, String>,
    raw: String,
}

impl NvpResponse {
    /// Decode a response body. Keys are normalised to uppercase.
    pub fn decode(body: &str) -> Self {
        let pairs = form_urlencoded::parse(body.trim().as_bytes())
            .map(|(key, value)| (key.to_ascii_uppercase(), value.into_owned()))
            .collect();
        Self {
            pairs,
            raw: body.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn ack(&self) -> Option<&str> {
        self.get("ACK")
    }

    /// `Success` and `SuccessWithWarning` are the only successful ACKs
    pub fn is_success(&self) -> bool {
        matches!(self.ack(), Some("Success" | "SuccessWithWarning"))
    }

    pub fn error_code(&self) -> Option<&str> {
        self.get("L_ERRORCODE0")
    }

    pub fn long_message(&self) -> Option<&str> {
        self.get("L_LONGMESSAGE0").or_else(|| self.get("L_SHORTMESSAGE0"))
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}
