use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use dedup_common::store::{DedupStore, StoreError};

/// Claims identifiers for the current aggregation window in the shared store.
///
/// Every instance of the service runs its own `Deduplicator` over the same store;
/// the store's atomic set-if-absent is the only coordination between them.
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn DedupStore + Send + Sync>,
    key_prefix: String,
    window: Duration,
}

impl Deduplicator {
    /// `window` is both the aggregation interval and the expiry of each claim,
    /// so claims vanish on their own if drains stop running.
    pub fn new(
        store: Arc<dyn DedupStore + Send + Sync>,
        key_prefix: &str,
        window: Duration,
    ) -> Self {
        Self {
            store,
            key_prefix: key_prefix.to_owned(),
            window,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn store(&self) -> &Arc<dyn DedupStore + Send + Sync> {
        &self.store
    }

    fn claim_key(&self, id: u64) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// Returns true if this call is the first to see `id` in the current window.
    ///
    /// Fails closed: if the store cannot answer, the id is reported as already
    /// claimed rather than risk telling a client it was uniquely accepted.
    pub async fn claim(&self, id: u64) -> bool {
        match self.try_claim(id).await {
            Ok(true) => {
                metrics::counter!("dedup_claims_total", "outcome" => "unique").increment(1);
                true
            }
            Ok(false) => {
                metrics::counter!("dedup_claims_total", "outcome" => "duplicate").increment(1);
                false
            }
            Err(e) => {
                error!("failed to claim id {} in store: {}", id, e);
                metrics::counter!("dedup_store_errors_total", "op" => "claim").increment(1);
                metrics::counter!("dedup_claims_total", "outcome" => "error").increment(1);
                false
            }
        }
    }

    pub async fn try_claim(&self, id: u64) -> Result<bool, StoreError> {
        self.store
            .set_if_absent(self.claim_key(id), self.window)
            .await
    }

    /// Number of ids currently claimed in the window, across all instances.
    pub async fn window_size(&self) -> Result<u64, StoreError> {
        let keys = self.store.scan_prefix(&self.key_prefix).await?;
        Ok(keys.len() as u64)
    }
}
