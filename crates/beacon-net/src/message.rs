//! Wire frames, decoded messages and the unmarshaler registry

use crate::{NetError, Result};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Transport-level identity of a message sender
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransportId(pub String);

impl TransportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A protocol message carrying a fixed type tag.
///
/// The tag is what the receiving side uses to pick a decoder, so it must be
/// unique among the message types registered on one channel.
pub trait TaggedMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type identifier written into every frame
    const TYPE: &'static str;
}

/// Frame exchanged on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag
    #[serde(rename = "type")]
    pub message_type: String,
    /// Sender transport identity
    pub sender: TransportId,
    /// Public key the sender is known by on the network, empty if unset
    #[serde(default, with = "hex::serde")]
    pub sender_public_key: Vec<u8>,
    /// Per-sender sequence number
    pub seqno: u64,
    /// Encoded message body
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Wrap a tagged message into a frame
    pub fn seal<T: TaggedMessage>(sender: TransportId, seqno: u64, message: &T) -> Result<Self> {
        let payload =
            serde_json::to_value(message).map_err(|e| NetError::Serialization(e.to_string()))?;

        Ok(Self {
            message_type: T::TYPE.to_string(),
            sender,
            sender_public_key: Vec::new(),
            seqno,
            payload,
        })
    }

    pub fn with_sender_public_key(mut self, public_key: Vec<u8>) -> Self {
        self.sender_public_key = public_key;
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| NetError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| NetError::InvalidFrame(e.to_string()))
    }
}

/// A decoded message as delivered to subscribers
#[derive(Clone)]
pub struct Message {
    sender: TransportId,
    sender_public_key: Vec<u8>,
    message_type: String,
    seqno: u64,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Message {
    /// Create a message from an already decoded payload
    pub fn new<T: TaggedMessage>(sender: TransportId, seqno: u64, payload: T) -> Self {
        Self {
            sender,
            sender_public_key: Vec::new(),
            message_type: T::TYPE.to_string(),
            seqno,
            payload: Arc::new(payload),
        }
    }

    pub fn sender(&self) -> &TransportId {
        &self.sender
    }

    pub fn sender_public_key(&self) -> &[u8] {
        &self.sender_public_key
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// Typed view of the payload, `None` if the message is of another type
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("sender", &self.sender)
            .field("message_type", &self.message_type)
            .field("seqno", &self.seqno)
            .finish_non_exhaustive()
    }
}

type Decoder = fn(serde_json::Value) -> Result<Arc<dyn Any + Send + Sync>>;

fn decode_as<T: TaggedMessage>(payload: serde_json::Value) -> Result<Arc<dyn Any + Send + Sync>> {
    let message: T = serde_json::from_value(payload).map_err(|e| NetError::Decode {
        message_type: T::TYPE.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Arc::new(message))
}

/// Registry of decoders keyed by message type tag.
///
/// Clones share the same registry.
#[derive(Clone, Default)]
pub struct Unmarshalers {
    decoders: Arc<DashMap<&'static str, Decoder>>,
}

impl Unmarshalers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the decoder for `T`. Registering the same type again is a no-op.
    pub fn register<T: TaggedMessage>(&self) {
        self.decoders.insert(T::TYPE, decode_as::<T> as Decoder);
    }

    pub fn is_registered(&self, message_type: &str) -> bool {
        self.decoders.contains_key(message_type)
    }

    /// Decode a raw frame into a message
    pub fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let envelope = Envelope::from_bytes(bytes)?;

        let decoder = self
            .decoders
            .get(envelope.message_type.as_str())
            .map(|entry| *entry.value())
            .ok_or_else(|| NetError::UnknownType(envelope.message_type.clone()))?;

        let payload = decoder(envelope.payload)?;

        Ok(Message {
            sender: envelope.sender,
            sender_public_key: envelope.sender_public_key,
            message_type: envelope.message_type,
            seqno: envelope.seqno,
            payload,
        })
    }
}
