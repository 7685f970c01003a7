//! In-memory chain implementation for testing

use super::{async_trait, BlockCounter, RelayChain};
use crate::{Error, RelayEntry, Result};
use dashmap::DashMap;
use num_bigint::BigUint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Block counter advanced by hand or by a miner task
#[derive(Clone)]
pub struct LocalBlockCounter {
    height: Arc<watch::Sender<u64>>,
}

impl LocalBlockCounter {
    /// Create a counter at block height 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(height: u64) -> Self {
        let (height, _) = watch::channel(height);
        Self {
            height: Arc::new(height),
        }
    }

    /// Produce one block and return the new height
    pub fn mine_block(&self) -> u64 {
        self.height.send_modify(|height| *height += 1);
        let height = *self.height.borrow();
        debug!(height, "Block mined");
        height
    }

    /// Mine a block every `interval` until the handle is aborted
    pub fn spawn_miner(&self, interval: Duration) -> JoinHandle<()> {
        let counter = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                counter.mine_block();
            }
        })
    }
}

impl Default for LocalBlockCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockCounter for LocalBlockCounter {
    async fn wait_for_block_height(&self, height: u64) -> Result<()> {
        let mut blocks = self.height.subscribe();
        blocks
            .wait_for(|current| *current >= height)
            .await
            .map(|_| ())
            .map_err(|e| Error::Chain(format!("Block counter stopped: {}", e)))
    }

    fn current_block_height(&self) -> Result<u64> {
        Ok(*self.height.borrow())
    }
}

/// Relay chain recording submitted entries.
///
/// Every member of a successful group submits the same entry, so an
/// identical resubmission is accepted without being recorded twice. A
/// different entry for an already answered request is rejected.
#[derive(Clone, Default)]
pub struct LocalChain {
    /// Request ID -> accepted entry
    entries: Arc<DashMap<BigUint, RelayEntry>>,
    /// Submissions received, accepted or not
    attempts: Arc<AtomicUsize>,
}

impl LocalChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted entry for a request
    pub fn entry(&self, request_id: &BigUint) -> Option<RelayEntry> {
        self.entries.get(request_id).map(|entry| entry.value().clone())
    }

    /// Number of requests answered so far
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of submissions received, including rejected ones
    pub fn submission_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayChain for LocalChain {
    async fn submit_relay_entry(&self, entry: RelayEntry) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        match self.entries.entry(entry.request_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if existing.get() != &entry {
                    warn!(request_id = %entry.request_id, "Conflicting relay entry rejected");
                    return Err(Error::Submission(format!(
                        "request {} already has a different entry",
                        entry.request_id
                    )));
                }
                debug!(request_id = %entry.request_id, "Relay entry already submitted");
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(
                    request_id = %entry.request_id,
                    value = %hex::encode(&entry.value),
                    "Relay entry accepted"
                );
                slot.insert(entry);
            }
        }

        Ok(())
    }
}
