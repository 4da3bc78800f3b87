//! Per-Run cancellation tokens plus worker heartbeats (§5). A worker honours
//! a cooperative cancel flag checked between steps and on every `await`; the
//! currently-running external call is allowed to finish or fail on its own
//! deadline, then the worker exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reactor_types::RunId;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct CancellationRegistry {
    tokens: Arc<RwLock<HashMap<RunId, CancellationToken>>>,
    heartbeats: Arc<RwLock<HashMap<RunId, (String, Instant)>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
            heartbeats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn token_for(&self, run_id: RunId) -> CancellationToken {
        let mut guard = self.tokens.write().await;
        guard.entry(run_id).or_insert_with(CancellationToken::new).clone()
    }

    /// Revoke a Run's worker: cancels the token and clears any heartbeat.
    /// Matches §4.4's "a revoke signal is sent to each worker id".
    pub async fn cancel(&self, run_id: RunId) {
        if let Some(token) = self.tokens.write().await.remove(&run_id) {
            token.cancel();
        }
        self.heartbeats.write().await.remove(&run_id);
    }

    pub async fn heartbeat(&self, run_id: RunId, worker_id: &str) {
        self.heartbeats
            .write()
            .await
            .insert(run_id, (worker_id.to_string(), Instant::now()));
    }

    /// A worker whose heartbeat is older than `lock_max_age` is considered
    /// dead; its Run is reclaimable (§5).
    pub async fn dead_runs(&self, lock_max_age: Duration) -> Vec<RunId> {
        let now = Instant::now();
        self.heartbeats
            .read()
            .await
            .iter()
            .filter(|(_, (_, last))| now.duration_since(*last) > lock_max_age)
            .map(|(run_id, _)| *run_id)
            .collect()
    }

    pub async fn forget(&self, run_id: RunId) {
        self.tokens.write().await.remove(&run_id);
        self.heartbeats.write().await.remove(&run_id);
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_trips_the_token() {
        let registry = CancellationRegistry::new();
        let run_id = RunId(1);
        let token = registry.token_for(run_id).await;
        assert!(!token.is_cancelled());
        registry.cancel(run_id).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn stale_heartbeat_is_reported_dead() {
        let registry = CancellationRegistry::new();
        let run_id = RunId(2);
        registry.heartbeat(run_id, "worker-1").await;
        let dead = registry.dead_runs(Duration::from_millis(0)).await;
        assert_eq!(dead, vec![run_id]);
    }
}
