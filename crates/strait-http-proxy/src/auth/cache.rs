//! TTL cache over Basic-Auth validation results.
//!
//! Keys are the raw, undecoded `Proxy-Authorization` values, so a hammering
//! client with a malformed token costs one decode, not one per request.
//! Invalid results are cached alongside valid ones for the same reason.

use super::basic::{parse_basic_auth, Credentials};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct AuthEntry {
    valid: bool,
    username: String,
    password: String,
    expires_at: Instant,
}

/// Cache of validation results keyed by raw credential token.
///
/// Owned by the proxy instance; tests construct independent caches without
/// cross-test interference. Read-mostly, guarded by a shared/exclusive lock.
pub struct AuthCache {
    entries: RwLock<HashMap<String, AuthEntry>>,
    ttl: Duration,
}

impl Default for AuthCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl AuthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Validate a raw `Proxy-Authorization` value.
    ///
    /// Returns the decoded identity on success, `None` for an absent,
    /// malformed, or known-invalid token. Results (valid or not) are cached
    /// until the TTL elapses; an expired entry is never served as a hit.
    pub fn validate(&self, token: &str) -> Option<Credentials> {
        if token.is_empty() {
            return None;
        }

        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(token) {
                if Instant::now() < entry.expires_at {
                    if entry.valid {
                        return Some(Credentials {
                            username: entry.username.clone(),
                            password: entry.password.clone(),
                        });
                    }
                    return None;
                }
            }
        }

        let parsed = parse_basic_auth(token);
        let entry = match &parsed {
            Some(creds) => AuthEntry {
                valid: true,
                username: creds.username.clone(),
                password: creds.password.clone(),
                expires_at: Instant::now() + self.ttl,
            },
            None => AuthEntry {
                valid: false,
                username: String::new(),
                password: String::new(),
                expires_at: Instant::now() + self.ttl,
            },
        };

        self.entries.write().insert(token.to_string(), entry);
        parsed
    }

    /// Delete all expired entries. Called by the sweeper; exposed so tests
    /// can drive expiry deterministically.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("auth cache sweep removed {} expired entries", removed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Spawn the background sweeper. The task holds only a weak reference,
    /// so dropping the cache (and its handle) ends the task.
    pub fn start_sweeper(self: &Arc<Self>, period: Option<Duration>) -> SweeperHandle {
        let period = period.unwrap_or(DEFAULT_SWEEP_PERIOD);
        let cache: Weak<AuthCache> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => cache.sweep(),
                    None => break,
                }
            }
        });
        SweeperHandle { task }
    }
}

/// Stop handle for the sweep task; aborts the task on drop so the sweeper
/// never outlives its proxy.
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
