//! States of the threshold signature round

use super::{SignatureShareMessage, ShareSet};
use crate::chain::RelayChain;
use crate::signer::ThresholdSigner;
use crate::state::State;
use crate::{Error, MemberIndex, RelayEntry, Result, RoundConfig, RoundInputs};
use async_trait::async_trait;
use beacon_net::{BroadcastChannel, Message};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Data shared by every state of a round
pub(crate) struct SigningStateBase<C, R: ?Sized> {
    channel: Arc<C>,
    relay_chain: Arc<R>,
    signer: Arc<dyn ThresholdSigner>,
    inputs: RoundInputs,
    config: RoundConfig,
    /// Combined previous entry and seed
    entry_to_sign: Vec<u8>,
}

impl<C, R: ?Sized> SigningStateBase<C, R> {
    pub(crate) fn new(
        channel: Arc<C>,
        relay_chain: Arc<R>,
        signer: Arc<dyn ThresholdSigner>,
        inputs: RoundInputs,
        config: RoundConfig,
    ) -> Self {
        let entry_to_sign = super::combine_entry_to_sign(&inputs.previous_entry, &inputs.seed);
        Self {
            channel,
            relay_chain,
            signer,
            inputs,
            config,
            entry_to_sign,
        }
    }

    fn member_index(&self) -> MemberIndex {
        self.signer.member_index()
    }
}

/// Signs the combined entry, broadcasts the share once the setup blocks
/// have passed and collects the shares of the other members until the
/// signature window closes.
pub struct SignatureShareState<C, R: ?Sized> {
    base: SigningStateBase<C, R>,
    shares: ShareSet,
}

impl<C, R: ?Sized> SignatureShareState<C, R> {
    pub(crate) fn new(base: SigningStateBase<C, R>) -> Self {
        let shares = ShareSet::new(base.signer.group_size());
        Self { base, shares }
    }

    pub fn shares(&self) -> &ShareSet {
        &self.shares
    }

    /// This member's share, signed and stored on first use
    fn own_share(&mut self) -> Result<Vec<u8>> {
        let member = self.base.member_index();
        if let Some(share) = self.shares.get(member) {
            return Ok(share.to_vec());
        }

        let share = self.base.signer.sign(&self.base.entry_to_sign);
        self.shares.insert(member, share.clone())?;
        Ok(share)
    }
}

#[async_trait]
impl<C, R> State for SignatureShareState<C, R>
where
    C: BroadcastChannel,
    R: RelayChain + ?Sized + 'static,
{
    fn delay_blocks(&self) -> u64 {
        self.base.config.setup_blocks
    }

    fn active_blocks(&self) -> u64 {
        self.base.config.signature_blocks
    }

    fn enter(&mut self) -> Result<()> {
        self.own_share()?;
        debug!(member = self.base.member_index(), "Signature share computed");
        Ok(())
    }

    async fn initiate(&mut self) -> Result<()> {
        let message = SignatureShareMessage {
            sender_index: self.base.member_index(),
            share_bytes: self.own_share()?,
        };
        self.base.channel.send(&message).await?;

        info!(member = message.sender_index, "Signature share broadcast");
        Ok(())
    }

    fn receive(&mut self, message: &Message) -> Result<()> {
        let Some(share) = message.payload::<SignatureShareMessage>() else {
            return Ok(());
        };
        let sender = share.sender_index;

        if sender >= self.shares.group_size() {
            return Err(Error::InvalidShare {
                sender,
                reason: "unknown group member".into(),
            });
        }

        // Own echoes land here as well.
        if self.shares.contains(sender) {
            debug!(member = self.base.member_index(), sender, "Duplicate share ignored");
            return Ok(());
        }

        if !self
            .base
            .signer
            .verify_share(sender, &share.share_bytes, &self.base.entry_to_sign)
        {
            return Err(Error::InvalidShare {
                sender,
                reason: "share does not verify against the member's public key share".into(),
            });
        }

        self.shares.insert(sender, share.share_bytes.clone())?;
        debug!(
            member = self.base.member_index(),
            sender,
            accepted = self.shares.len(),
            "Signature share accepted"
        );
        Ok(())
    }

    fn next(self: Box<Self>) -> Box<dyn State> {
        Box::new(SignatureCompleteState {
            base: self.base,
            shares: self.shares,
        })
    }

    fn member_index(&self) -> MemberIndex {
        self.base.member_index()
    }

    fn name(&self) -> &'static str {
        "signature_share"
    }
}

/// Reconstructs the group signature from the collected shares and submits
/// it as the new relay entry.
pub struct SignatureCompleteState<C, R: ?Sized> {
    base: SigningStateBase<C, R>,
    shares: ShareSet,
}

impl<C, R: ?Sized> SignatureCompleteState<C, R> {
    pub fn shares(&self) -> &ShareSet {
        &self.shares
    }

    /// Combine the first `threshold` shares by sender index and check the
    /// result against the group key
    fn reconstruct(&self) -> Result<Vec<u8>> {
        let threshold = self.base.inputs.threshold;
        if self.shares.len() < threshold {
            return Err(Error::InsufficientSignatureShares {
                required: threshold,
                actual: self.shares.len(),
            });
        }

        let selected = self.shares.select(threshold);
        debug!(
            member = self.base.member_index(),
            senders = ?selected.iter().map(|(sender, _)| *sender).collect::<Vec<_>>(),
            "Combining signature shares"
        );

        let signature = self
            .base
            .signer
            .combine(&selected)
            .map_err(|e| Error::ReconstructionInvalid(e.to_string()))?;

        if !self
            .base
            .signer
            .verify_group_signature(&signature, &self.base.entry_to_sign)
        {
            return Err(Error::ReconstructionInvalid(
                "group signature does not verify against the group public key".into(),
            ));
        }

        Ok(signature)
    }
}

#[async_trait]
impl<C, R> State for SignatureCompleteState<C, R>
where
    C: BroadcastChannel,
    R: RelayChain + ?Sized + 'static,
{
    fn delay_blocks(&self) -> u64 {
        0
    }

    fn active_blocks(&self) -> u64 {
        0
    }

    async fn initiate(&mut self) -> Result<()> {
        let member = self.base.member_index();

        let signature = match self.reconstruct() {
            Ok(signature) => signature,
            Err(err @ Error::ReconstructionInvalid(_)) => {
                error!(member, error = %err, "Signature reconstruction failed");
                return Err(err);
            }
            Err(err) => {
                warn!(member, error = %err, "Group signature not produced");
                return Err(err);
            }
        };

        let entry = RelayEntry {
            request_id: self.base.inputs.request_id.clone(),
            value: signature,
            group_public_key: self.base.signer.group_public_key(),
            previous_entry: self.base.inputs.previous_entry.clone(),
            seed: self.base.inputs.seed.clone(),
        };

        self.base
            .relay_chain
            .submit_relay_entry(entry)
            .await
            .map_err(|e| match e {
                Error::Submission(_) => e,
                other => Error::Submission(other.to_string()),
            })?;

        info!(member, "Relay entry submitted");
        Ok(())
    }

    /// Shares are no longer collected.
    fn receive(&mut self, _message: &Message) -> Result<()> {
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn next(self: Box<Self>) -> Box<dyn State> {
        self
    }

    fn member_index(&self) -> MemberIndex {
        self.base.member_index()
    }

    fn name(&self) -> &'static str {
        "signature_complete"
    }
}
