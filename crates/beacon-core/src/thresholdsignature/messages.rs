//! Signing round message types

use crate::MemberIndex;
use beacon_net::TaggedMessage;
use serde::{Deserialize, Serialize};

/// A member's signature share over the combined entry.
///
/// Carries no round identifier: the channel it is sent on scopes it to a
/// round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureShareMessage {
    /// Index of the member that produced the share
    pub sender_index: MemberIndex,
    /// Partial signature bytes
    #[serde(with = "hex::serde")]
    pub share_bytes: Vec<u8>,
}

impl TaggedMessage for SignatureShareMessage {
    const TYPE: &'static str = "beacon/relay/signature_share_message";
}
