//! BLS12-381 threshold signatures
//!
//! Signatures live in G1 (48 bytes) and public keys in G2, which keeps the
//! shares broadcast during a round small. Signatures are unique, so every
//! honest member reconstructs the same group signature whichever shares it
//! interpolates from.

use super::ThresholdSigner;
use crate::{Error, MemberIndex, Result};
use commonware_codec::{DecodeExt, Encode};
use commonware_cryptography::bls12381::{
    dkg::ops::generate_shares,
    primitives::{
        group::{Share, G1},
        ops,
        poly::{self, Eval},
        variant::MinSig,
    },
};
use rand_core::CryptoRngCore;

/// Namespace mixed into every signed beacon message
pub const NAMESPACE: &[u8] = b"_RELAY_BEACON_ENTRY";

/// Threshold signer backed by a BLS12-381 key share
#[derive(Clone)]
pub struct BlsThresholdSigner {
    share: Share,
    public: poly::Public<MinSig>,
    group_size: usize,
    threshold: u32,
}

impl BlsThresholdSigner {
    /// Create a signer from a share and the group's public polynomial
    pub fn new(
        share: Share,
        public: poly::Public<MinSig>,
        group_size: usize,
        threshold: usize,
    ) -> Result<Self> {
        if threshold == 0 || threshold > group_size {
            return Err(Error::InvalidConfig(format!(
                "threshold {} out of range for group of {}",
                threshold, group_size
            )));
        }
        if share.index as usize >= group_size {
            return Err(Error::InvalidConfig(format!(
                "share index {} outside group of {}",
                share.index, group_size
            )));
        }

        Ok(Self {
            share,
            public,
            group_size,
            threshold: threshold as u32,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold as usize
    }
}

fn decode_signature(bytes: &[u8]) -> Option<G1> {
    G1::decode(bytes).ok()
}

impl ThresholdSigner for BlsThresholdSigner {
    fn member_index(&self) -> MemberIndex {
        self.share.index as MemberIndex
    }

    fn group_size(&self) -> usize {
        self.group_size
    }

    fn group_public_key(&self) -> Vec<u8> {
        self.public.constant().encode().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let partial = ops::partial_sign_message::<MinSig>(&self.share, Some(NAMESPACE), message);
        partial.value.encode().to_vec()
    }

    fn verify_share(&self, sender: MemberIndex, share: &[u8], message: &[u8]) -> bool {
        if sender >= self.group_size {
            return false;
        }
        let Some(value) = decode_signature(share) else {
            return false;
        };

        let partial = Eval {
            index: sender as u32,
            value,
        };
        ops::partial_verify_message::<MinSig>(&self.public, Some(NAMESPACE), message, &partial)
            .is_ok()
    }

    fn combine(&self, shares: &[(MemberIndex, &[u8])]) -> Result<Vec<u8>> {
        let partials = shares
            .iter()
            .map(|(sender, bytes)| {
                let value = decode_signature(bytes).ok_or_else(|| {
                    Error::Crypto(format!("share of member {} is not a G1 point", sender))
                })?;
                Ok(Eval {
                    index: *sender as u32,
                    value,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let signature = ops::threshold_signature_recover::<MinSig, _>(self.threshold, &partials)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        Ok(signature.encode().to_vec())
    }

    fn verify_group_signature(&self, signature: &[u8], message: &[u8]) -> bool {
        let Some(signature) = decode_signature(signature) else {
            return false;
        };

        ops::verify_message::<MinSig>(
            self.public.constant(),
            Some(NAMESPACE),
            message,
            &signature,
        )
        .is_ok()
    }
}

/// Split a fresh group key into `group_size` signers with a trusted dealer.
///
/// Stands in for distributed key generation in local groups and tests.
pub fn deal<R: CryptoRngCore>(
    rng: &mut R,
    group_size: usize,
    threshold: usize,
) -> Result<Vec<BlsThresholdSigner>> {
    if threshold == 0 || threshold > group_size {
        return Err(Error::InvalidConfig(format!(
            "threshold {} out of range for group of {}",
            threshold, group_size
        )));
    }

    let (public, shares) =
        generate_shares::<_, MinSig>(rng, None, group_size as u32, threshold as u32);

    shares
        .into_iter()
        .map(|share| BlsThresholdSigner::new(share, public.clone(), group_size, threshold))
        .collect()
}
