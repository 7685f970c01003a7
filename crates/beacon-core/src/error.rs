//! Error types for relay beacon rounds

use crate::MemberIndex;
use beacon_net::NetError;
use thiserror::Error;

/// Result type alias for beacon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a signing round
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid round configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A received share failed sender or signature verification.
    /// Never terminates a round.
    #[error("Invalid share from member {sender}: {reason}")]
    InvalidShare { sender: MemberIndex, reason: String },

    /// Fewer valid shares than the threshold when the window closed
    #[error("Insufficient signature shares: required {required}, got {actual}")]
    InsufficientSignatureShares { required: usize, actual: usize },

    /// Threshold-many valid shares combined into an invalid group signature
    #[error("Reconstructed group signature is invalid: {0}")]
    ReconstructionInvalid(String),

    /// Relay chain refused or failed to accept the entry
    #[error("Relay entry submission failed: {0}")]
    Submission(String),

    /// Block counter or other chain query failure
    #[error("Chain error: {0}")]
    Chain(String),

    /// Broadcast channel failure
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}
