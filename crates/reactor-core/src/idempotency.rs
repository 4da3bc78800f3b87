//! `IdempotencyKey` dedup tokens (§3, §4.1 [FULL]). Modeled as one
//! `IdempotencyStore` trait with two implementations: an in-memory TTL map
//! (default, always present) and a pass-through no-op used when no durable
//! KV backend is configured. Grounded in the source's degraded-mode
//! fallback when its Redis-backed idempotence service is unreachable: the
//! crate must keep functioning — conservatively, never silently dropping
//! dedup — with only the in-process layer present.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Set-if-not-exists with a TTL. Returns `true` if this call performed
    /// the insert (i.e. the key was not already present and unexpired).
    async fn set_if_not_exists(&self, key: &str, ttl: Duration) -> bool;
}

/// In-process TTL map, sufficient on its own per §4.1 [FULL]; this is the
/// store used for both the `update:{event_id}` distributed-dedup key and the
/// per-`(task, text_hash)` reactivation-repeat cache.
pub struct InMemoryTtlStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryTtlStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn sweep(map: &mut HashMap<String, Instant>, now: Instant) {
        map.retain(|_, expires_at| *expires_at > now);
    }
}

impl Default for InMemoryTtlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryTtlStore {
    async fn set_if_not_exists(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut guard = self.entries.lock().await;
        Self::sweep(&mut guard, now);
        if let Some(expires_at) = guard.get(key) {
            if *expires_at > now {
                return false;
            }
        }
        guard.insert(key.to_string(), now + ttl);
        true
    }
}

/// Pass-through implementation used when a caller explicitly disables
/// distributed dedup; every call succeeds as a fresh insert. The in-process
/// layer upstream of this store still catches same-process duplicates, so
/// disabling this one only widens the dedup window across process
/// restarts/instances, never causes an incorrect action (§5 "the key-value
/// store is best-effort").
pub struct NoopIdempotencyStore;

#[async_trait]
impl IdempotencyStore for NoopIdempotencyStore {
    async fn set_if_not_exists(&self, _key: &str, _ttl: Duration) -> bool {
        true
    }
}

pub const UPDATE_TTL: Duration = Duration::from_secs(3600);
pub const WEBHOOK_TTL: Duration = Duration::from_secs(3600);

pub fn update_key(update_id: &str) -> String {
    format!("update:{update_id}")
}

pub fn webhook_key(item_id: &str, event_type: &str, payload_hash: &str) -> String {
    format!("webhook:{item_id}:{event_type}:{payload_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_insert_succeeds_second_is_duplicate() {
        let store = InMemoryTtlStore::new();
        assert!(store.set_if_not_exists("update:1", Duration::from_secs(60)).await);
        assert!(!store.set_if_not_exists("update:1", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn expired_entry_can_be_reinserted() {
        let store = InMemoryTtlStore::new();
        assert!(store.set_if_not_exists("k", Duration::from_millis(1)).await);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.set_if_not_exists("k", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn noop_store_never_deduplicates() {
        let store = NoopIdempotencyStore;
        assert!(store.set_if_not_exists("k", Duration::from_secs(60)).await);
        assert!(store.set_if_not_exists("k", Duration::from_secs(60)).await);
    }
}
