//! In-memory broadcast channels for local groups and testing

use crate::channel::{async_trait, BroadcastChannel, Subscription};
use crate::{Envelope, Result, TaggedMessage, TransportId, Unmarshalers};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of frames buffered per channel
pub const DEFAULT_CAPACITY: usize = 1024;

/// Hands out in-memory channels. Handles obtained for the same name share
/// one broadcast bus.
#[derive(Clone)]
pub struct LocalProvider {
    /// Channel name -> frame bus
    channels: Arc<DashMap<String, broadcast::Sender<Arc<Vec<u8>>>>>,
    capacity: usize,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Get `member`'s handle on the channel called `name`
    pub fn channel_for(&self, name: &str, member: TransportId) -> Arc<LocalChannel> {
        self.channel_with_key(name, member, Vec::new())
    }

    /// Like [`channel_for`](Self::channel_for), stamping `public_key` on
    /// every frame the handle sends
    pub fn channel_with_key(
        &self,
        name: &str,
        member: TransportId,
        public_key: Vec<u8>,
    ) -> Arc<LocalChannel> {
        let frames = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();

        Arc::new(LocalChannel {
            name: name.to_string(),
            member,
            public_key,
            frames,
            unmarshalers: Unmarshalers::new(),
            seqno: AtomicU64::new(0),
        })
    }

    /// Forget the channel called `name`.
    ///
    /// Handles already given out keep their bus until they are dropped; a
    /// later `channel_for` with the same name starts a fresh one. Returns
    /// whether the channel existed.
    pub fn close(&self, name: &str) -> bool {
        let removed = self.channels.remove(name).is_some();
        if removed {
            debug!(channel = name, "Channel closed");
        }
        removed
    }

    /// Number of open channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// One member's handle on an in-memory channel.
///
/// Every subscriber receives each broadcast, the sender's own subscription
/// included.
pub struct LocalChannel {
    name: String,
    member: TransportId,
    public_key: Vec<u8>,
    frames: broadcast::Sender<Arc<Vec<u8>>>,
    unmarshalers: Unmarshalers,
    seqno: AtomicU64,
}

impl LocalChannel {
    pub fn member(&self) -> &TransportId {
        &self.member
    }
}

#[async_trait]
impl BroadcastChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_unmarshaler<T: TaggedMessage>(&self) {
        self.unmarshalers.register::<T>();
    }

    async fn send<T: TaggedMessage>(&self, message: &T) -> Result<()> {
        let seqno = self.seqno.fetch_add(1, Ordering::Relaxed);
        let frame = Envelope::seal(self.member.clone(), seqno, message)?
            .with_sender_public_key(self.public_key.clone())
            .to_bytes()?;

        // No live subscribers is not an error, nobody is listening yet.
        let delivered = self.frames.send(Arc::new(frame)).unwrap_or(0);

        debug!(
            channel = %self.name,
            sender = %self.member,
            message_type = T::TYPE,
            seqno,
            delivered,
            "Message broadcast"
        );
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(
            self.frames.subscribe(),
            self.unmarshalers.clone(),
            self.name.clone(),
        )
    }
}
