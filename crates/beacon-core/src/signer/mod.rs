//! Threshold signing capability consumed by a round
//!
//! Shares are produced by the group's key generation, which happens outside
//! the signing round. The round only holds a reference to its member's
//! signer for as long as it runs.

use crate::{MemberIndex, Result};

mod bls;

pub use bls::{deal, BlsThresholdSigner, NAMESPACE};

/// One member's share of a group signing key
pub trait ThresholdSigner: Send + Sync {
    /// Index of the member holding this share
    fn member_index(&self) -> MemberIndex;

    /// Number of members in the group
    fn group_size(&self) -> usize;

    /// Encoded group public key
    fn group_public_key(&self) -> Vec<u8>;

    /// Partial signature of this member over `message`
    fn sign(&self, message: &[u8]) -> Vec<u8>;

    /// Check `share` against the public key share of `sender`
    fn verify_share(&self, sender: MemberIndex, share: &[u8], message: &[u8]) -> bool;

    /// Interpolate the group signature from shares keyed by sender index
    fn combine(&self, shares: &[(MemberIndex, &[u8])]) -> Result<Vec<u8>>;

    /// Check a group signature against the group public key
    fn verify_group_signature(&self, signature: &[u8], message: &[u8]) -> bool;
}
