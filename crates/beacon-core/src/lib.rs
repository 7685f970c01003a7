//! # Beacon Core
//!
//! Threshold signature round of the relay random beacon.
//!
//! A group of members, each holding a share of the group signing key,
//! signs a message derived from the previous beacon entry and the request
//! seed. Shares are exchanged over a broadcast channel during a window
//! bounded by block height; once the window closes the group signature is
//! reconstructed, verified and submitted to the relay chain as the new
//! beacon entry.
//!
//! This crate provides:
//! - the block-driven state [`state::Machine`] that runs protocol states
//! - the signing round itself ([`thresholdsignature`])
//! - chain collaborators ([`chain`]) with local in-memory implementations
//! - a BLS12-381 [`signer::ThresholdSigner`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use beacon_core::thresholdsignature;
//!
//! thresholdsignature::execute(
//!     block_counter,
//!     channel,
//!     relay_chain,
//!     request_id,
//!     previous_entry,
//!     seed,
//!     threshold,
//!     signer,
//!     start_block_height,
//! )
//! .await?;
//! ```

pub mod chain;
pub mod error;
pub mod signer;
pub mod state;
pub mod thresholdsignature;
pub mod types;

pub use error::{Error, Result};
pub use types::{MemberIndex, RelayEntry, RoundConfig, RoundInputs};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
