//! Staleness-bounded cache of simulation snapshots keyed by (vault, user)

use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::state::SimulationState;

/// Default staleness window for a snapshot
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedState {
    state: Arc<SimulationState>,
    fetched_at: Instant,
}

/// Injectable snapshot cache. Entries older than the TTL are never served.
#[derive(Debug)]
pub struct StateCache {
    ttl: Duration,
    entries: RwLock<HashMap<(Address, Address), CachedState>>,
}

impl StateCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub async fn get_fresh(&self, vault: Address, user: Address) -> Option<Arc<SimulationState>> {
        let entries = self.entries.read().await;
        entries
            .get(&(vault, user))
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.state.clone())
    }

    /// Store a snapshot, dropping every entry that has outlived the TTL
    pub async fn insert(&self, vault: Address, user: Address, state: Arc<SimulationState>) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.fetched_at.elapsed() < self.ttl);
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(pruned, "Pruned expired simulation snapshots");
        }
        entries.insert((vault, user), CachedState { state, fetched_at: Instant::now() });
    }

    /// Drop the snapshot for one pair; returns whether anything was cached
    pub async fn invalidate(&self, vault: Address, user: Address) -> bool {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(&(vault, user)).is_some();
        if removed {
            debug!(vault = ?vault, user = ?user, "Invalidated simulation snapshot");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL)
    }
}
