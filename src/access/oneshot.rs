//! Single-use token registry for requests that cannot carry headers.
//!
//! A oneshot token is 20 random bytes, base32-encoded, valid for five seconds
//! and consumable exactly once. Consumption removes the entry from the map in
//! one step under the mutex, so two concurrent consumers race to exactly one
//! winner. Expired entries are evicted lazily on lookup and by the server's
//! periodic sweep.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::identity::Identity;

pub const ONESHOT_TTL: Duration = Duration::from_secs(5);

struct OneshotEntry {
    identity: Identity,
    expires_at: Instant,
}

pub struct OneshotRegistry {
    ttl: Duration,
    tokens: Mutex<HashMap<String, OneshotEntry>>,
}

impl Default for OneshotRegistry {
    fn default() -> Self { Self::new(ONESHOT_TTL) }
}

impl OneshotRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, tokens: Mutex::new(HashMap::new()) }
    }

    /// Mint and register a token bound to the caller's resolved identity.
    pub fn issue(&self, identity: Identity) -> String {
        let mut bytes = [0u8; 20];
        let _ = getrandom::getrandom(&mut bytes);
        let token = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bytes);
        let entry = OneshotEntry { identity, expires_at: Instant::now() + self.ttl };
        self.tokens.lock().insert(token.clone(), entry);
        token
    }

    /// Atomically look up and consume. Consumed, unknown and expired tokens
    /// are indistinguishable to the caller.
    pub fn consume(&self, token: &str) -> Option<Identity> {
        let entry = self.tokens.lock().remove(token)?;
        if Instant::now() >= entry.expires_at {
            debug!("oneshot token consumed past deadline");
            return None;
        }
        Some(entry.identity)
    }

    /// Evict expired entries. Returns number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.tokens.lock();
        let before = map.len();
        map.retain(|_, entry| entry.expires_at > now);
        before - map.len()
    }

    pub fn len(&self) -> usize { self.tokens.lock().len() }

    pub fn is_empty(&self) -> bool { self.tokens.lock().is_empty() }
}
