//! Session Cache
//!
//! Short-lived mapping from an unguessable session id to the identity that
//! logged in. Entries disappear once their TTL elapses.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Default session lifetime (10 minutes)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

const SESSION_ID_BYTES: usize = 32;

/// Characters of an id or token kept in log lines
const LOGGED_PREFIX_CHARS: usize = 8;

/// Shorten a secret-bearing value for log lines
pub(crate) fn truncated(value: &str) -> &str {
    value.get(..LOGGED_PREFIX_CHARS).unwrap_or(value)
}

/// Opaque session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new id from the operating system CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

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

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity claims from the identity provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// A logged-in session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session with a freshly generated id
    pub fn new(identity: Identity) -> Self {
        Self::with_id(SessionId::generate(), identity)
    }

    pub fn with_id(id: SessionId, identity: Identity) -> Self {
        Self {
            id,
            identity,
            created_at: Utc::now(),
        }
    }
}

/// Session cache trait.
///
/// `get` returns `None` both for ids that never existed and for expired ones;
/// callers treat the two identically.
pub trait SessionCache: Send + Sync {
    /// Store a session for `ttl`
    fn put(&self, session: Session, ttl: Duration);

    /// Look up a live session
    fn get(&self, id: &SessionId) -> Option<Session>;

    /// Drop a session before its TTL
    fn remove(&self, id: &SessionId);
}

struct CacheEntry {
    session: Session,
    expires_at: Instant,
}

/// In-memory session cache
pub struct MemorySessionCache {
    entries: RwLock<HashMap<SessionId, CacheEntry>>,
    capacity: Option<usize>,
}

impl Default for MemorySessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: None,
        }
    }

    /// Bound the number of live sessions; the soonest-to-expire entry is
    /// evicted when full.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SessionCache for MemorySessionCache {
    fn put(&self, session: Session, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();

        entries.retain(|_, entry| entry.expires_at > now);

        if let Some(capacity) = self.capacity {
            if entries.len() >= capacity && !entries.contains_key(&session.id) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(id, _)| id.clone());
                if let Some(id) = oldest {
                    tracing::debug!(session = %id.redacted(), "Evicting session, cache full");
                    entries.remove(&id);
                }
            }
        }

        entries.insert(
            session.id.clone(),
            CacheEntry {
                session,
                expires_at: now + ttl,
            },
        );
    }

    fn get(&self, id: &SessionId) -> Option<Session> {
        let entries = self.entries.read();
        entries
            .get(id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.session.clone())
    }

    fn remove(&self, id: &SessionId) {
        self.entries.write().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice(id: &str) -> Session {
        Session::with_id(SessionId::from_string(id), Identity::new("alice"))
    }

    #[test]
    fn test_session_id_generation() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(a.redacted().len(), 8);
    }

    #[test]
    fn test_put_and_get() {
        let cache = MemorySessionCache::new();
        cache.put(alice("abc123"), DEFAULT_SESSION_TTL);

        let found = cache.get(&SessionId::from_string("abc123")).unwrap();
        assert_eq!(found.identity.username, "alice");
        assert!(cache.get(&SessionId::from_string("xyz999")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = MemorySessionCache::new();
        let id = SessionId::from_string("abc123");
        cache.put(alice("abc123"), Duration::from_secs(600));

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(cache.get(&id).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_purged_on_put() {
        let cache = MemorySessionCache::new();
        cache.put(alice("old"), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(11)).await;

        cache.put(alice("new"), Duration::from_secs(10));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_soonest_expiry() {
        let cache = MemorySessionCache::with_capacity(2);
        cache.put(alice("short"), Duration::from_secs(60));
        cache.put(alice("long"), Duration::from_secs(600));
        cache.put(alice("third"), Duration::from_secs(600));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&SessionId::from_string("short")).is_none());
        assert!(cache.get(&SessionId::from_string("long")).is_some());
        assert!(cache.get(&SessionId::from_string("third")).is_some());
    }

    #[test]
    fn test_remove() {
        let cache = MemorySessionCache::new();
        cache.put(alice("abc123"), DEFAULT_SESSION_TTL);
        cache.remove(&SessionId::from_string("abc123"));
        assert!(cache.is_empty());
    }
}
