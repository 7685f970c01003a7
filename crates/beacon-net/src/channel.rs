//! Broadcast channel abstraction

use crate::{Message, Result, TaggedMessage, Unmarshalers};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

pub use ::async_trait::async_trait;

/// Broadcast channel shared by the members of a group
#[async_trait]
pub trait BroadcastChannel: Send + Sync + 'static {
    /// Channel name, which scopes the messages it carries
    fn name(&self) -> &str;

    /// Make messages of type `T` decodable on this channel.
    ///
    /// Safe to call repeatedly, including from several rounds that reuse
    /// the channel.
    fn register_unmarshaler<T: TaggedMessage>(&self);

    /// Broadcast a message to every subscriber of the channel
    async fn send<T: TaggedMessage>(&self, message: &T) -> Result<()>;

    /// Start receiving decoded messages. Only messages sent after the call
    /// are delivered.
    fn subscribe(&self) -> Subscription;
}

/// Stream of decoded messages from one channel
pub struct Subscription {
    frames: broadcast::Receiver<Arc<Vec<u8>>>,
    unmarshalers: Unmarshalers,
    channel: String,
}

impl Subscription {
    pub fn new(
        frames: broadcast::Receiver<Arc<Vec<u8>>>,
        unmarshalers: Unmarshalers,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            frames,
            unmarshalers,
            channel: channel.into(),
        }
    }

    /// Wait for the next decodable message.
    ///
    /// Frames that fail to decode are logged and skipped. Returns `None`
    /// once the channel is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.frames.recv().await {
                Ok(frame) => match self.unmarshalers.decode(&frame) {
                    Ok(message) => return Some(message),
                    Err(err) => {
                        warn!(channel = %self.channel, error = %err, "Dropping undecodable message");
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged behind");
                }
                Err(RecvError::Closed) => {
                    debug!(channel = %self.channel, "Channel closed");
                    return None;
                }
            }
        }
    }
}
