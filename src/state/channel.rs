use crate::{
    config::ServiceConfig,
    ledger::{InMemoryLedger, Ledger},
    types::{AccountId, AuthError, Balance},
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::debug;

use super::manager::ChannelManager;

/// Shared handle used by the HTTP surface. Each channel operation runs under the
/// manager's write lock, which makes it atomic with respect to every other request.
#[derive(Clone)]
pub struct ChannelState {
    pub(crate) manager: Arc<RwLock<ChannelManager<InMemoryLedger>>>,
    seen_requests: Arc<RwLock<HashMap<Vec<u8>, u64>>>,
    request_ttl: u64,
}

impl ChannelState {
    pub fn new(ledger: InMemoryLedger, request_ttl: u64) -> Self {
        Self {
            manager: Arc::new(RwLock::new(ChannelManager::new(ledger))),
            seen_requests: Arc::new(RwLock::new(HashMap::new())),
            request_ttl,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        let ledger = InMemoryLedger::with_balances(
            config
                .genesis
                .iter()
                .map(|account| (account.account, Balance::from(account.balance))),
        );
        Self::new(ledger, config.request_ttl_secs)
    }

    pub fn manager(&self) -> Arc<RwLock<ChannelManager<InMemoryLedger>>> {
        self.manager.clone()
    }

    pub fn request_ttl(&self) -> u64 {
        self.request_ttl
    }

    pub(crate) fn request_window_millis(&self) -> u64 {
        self.request_ttl.saturating_mul(1_000)
    }

    pub async fn free_balance(&self, account: &AccountId) -> Balance {
        self.manager.read().await.ledger().free_balance(account)
    }

    /// Rejects a request signature that was already accepted inside the TTL window
    /// (unix milliseconds). Entries older than the window are dropped; the timestamp
    /// check rejects those requests anyway.
    pub(crate) async fn check_replay(
        &self,
        signature: &[u8],
        timestamp: u64,
        now: u64,
    ) -> Result<(), AuthError> {
        let mut seen = self.seen_requests.write().await;
        let horizon = now.saturating_sub(self.request_window_millis());
        seen.retain(|_, stamp| *stamp >= horizon);

        if seen.contains_key(signature) {
            return Err(AuthError::Replayed);
        }
        seen.insert(signature.to_vec(), timestamp);
        Ok(())
    }
}

/// Drives the in-memory ledger's block height. Expiry is only ever judged against
/// this height, never against wall-clock time.
pub fn spawn_block_clock(state: ChannelState, block_time: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(block_time);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let height = state.manager.write().await.ledger_mut().advance(1);
            debug!(height, "new block");
        }
    })
}
