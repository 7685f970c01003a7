//! Chain collaborators of a signing round

use crate::{RelayEntry, Result};

pub use ::async_trait::async_trait;

/// Source of block heights. Block height is the only clock a round uses.
#[async_trait]
pub trait BlockCounter: Send + Sync {
    /// Resolve once the chain has reached `height`.
    /// Returns immediately if it already has.
    async fn wait_for_block_height(&self, height: u64) -> Result<()>;

    /// Latest observed block height
    fn current_block_height(&self) -> Result<u64>;
}

/// Relay chain the group submits new beacon entries to
#[async_trait]
pub trait RelayChain: Send + Sync {
    /// Submit a new relay entry for its request
    async fn submit_relay_entry(&self, entry: RelayEntry) -> Result<()>;
}

/// In-memory chain for local groups and testing
pub mod local;

pub use local::{LocalBlockCounter, LocalChain};
