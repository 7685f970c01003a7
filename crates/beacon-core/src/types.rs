//! Core types for relay beacon rounds

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::state::{MESSAGING_STATE_ACTIVE_BLOCKS, MESSAGING_STATE_DELAY_BLOCKS};

/// Position of a member within its group, starting at 0
pub type MemberIndex = usize;

/// Inputs of one signing round, fixed for its whole lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInputs {
    /// Identifies the round
    pub request_id: BigUint,
    /// Previous beacon entry
    pub previous_entry: BigUint,
    /// Seed supplied with the request
    pub seed: BigUint,
    /// Minimum number of valid shares to reconstruct the group signature
    pub threshold: usize,
    /// Block height the round starts at
    pub start_block_height: u64,
}

/// Block timing of a signing round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Blocks to wait before broadcasting, so every member is listening
    pub setup_blocks: u64,
    /// Blocks during which shares are collected after the broadcast
    pub signature_blocks: u64,
}

impl RoundConfig {
    /// Number of blocks between the round start and finalization
    pub fn window_blocks(&self) -> u64 {
        self.setup_blocks.saturating_add(self.signature_blocks)
    }

    /// Height a round started at `start_block_height` finalizes at, `None`
    /// if it is past `u64::MAX`
    pub fn final_block_height(&self, start_block_height: u64) -> Option<u64> {
        self.setup_blocks
            .checked_add(self.signature_blocks)
            .and_then(|window| start_block_height.checked_add(window))
    }
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            setup_blocks: MESSAGING_STATE_DELAY_BLOCKS,
            signature_blocks: MESSAGING_STATE_ACTIVE_BLOCKS,
        }
    }
}

/// New beacon entry submitted to the relay chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEntry {
    /// Request the entry answers
    pub request_id: BigUint,
    /// Group signature over the combined previous entry and seed
    #[serde(with = "hex::serde")]
    pub value: Vec<u8>,
    /// Public key of the signing group
    #[serde(with = "hex::serde")]
    pub group_public_key: Vec<u8>,
    pub previous_entry: BigUint,
    pub seed: BigUint,
}

impl RelayEntry {
    /// The entry as a beacon integer, usable as the next round's previous entry
    pub fn value_as_integer(&self) -> BigUint {
        BigUint::from_bytes_be(&self.value)
    }
}
