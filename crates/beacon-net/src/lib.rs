//! Beacon Network Library
//!
//! Broadcast channels used by relay beacon group members to exchange
//! protocol messages. Messages are tagged with a fixed type identifier and
//! decoded through a per-channel registry of unmarshalers, so a channel can
//! carry several protocols at once.
//!
//! Rounds are isolated by channel name: two rounds that must not see each
//! other's messages have to use differently named channels.

use thiserror::Error;

pub mod channel;
pub mod local;
pub mod message;

pub use channel::{async_trait, BroadcastChannel, Subscription};
pub use local::{LocalChannel, LocalProvider};
pub use message::{Envelope, Message, TaggedMessage, TransportId, Unmarshalers};

/// Network error types
#[derive(Debug, Error)]
pub enum NetError {
    /// Payload does not match the shape of the registered message type
    #[error("Failed to decode {message_type} message: {reason}")]
    Decode { message_type: String, reason: String },
    /// No unmarshaler registered for the frame's type tag
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
