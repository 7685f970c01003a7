//! Threshold signature round
//!
//! Every member signs the combination of the previous relay entry and the
//! request seed with its key share, broadcasts the share and collects the
//! shares of the other members. When the signature window closes the
//! group signature is reconstructed from `threshold` valid shares and
//! submitted as the new relay entry.
//!
//! The round always runs its full window, even when enough shares arrive
//! early, so slow members still get heard.

mod entry;
mod messages;
mod shares;
mod states;

pub use entry::combine_entry_to_sign;
pub use messages::SignatureShareMessage;
pub use shares::ShareSet;
pub use states::{SignatureCompleteState, SignatureShareState};

use crate::chain::{BlockCounter, RelayChain};
use crate::signer::ThresholdSigner;
use crate::state::{Machine, MESSAGING_STATE_ACTIVE_BLOCKS, MESSAGING_STATE_DELAY_BLOCKS};
use crate::{Error, Result, RoundConfig, RoundInputs};
use beacon_net::BroadcastChannel;
use num_bigint::BigUint;
use states::SigningStateBase;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Blocks between the round start and the share broadcast
pub const SETUP_BLOCKS: u64 = MESSAGING_STATE_DELAY_BLOCKS;

/// Blocks shares are collected for after the broadcast
pub const SIGNATURE_BLOCKS: u64 = MESSAGING_STATE_ACTIVE_BLOCKS;

/// Make signature shares decodable on `channel`
pub fn initialize_channel<C: BroadcastChannel>(channel: &C) {
    channel.register_unmarshaler::<SignatureShareMessage>();
}

/// Run the threshold signature round for a relay request with the default
/// block timing.
///
/// Resolves once the round has submitted the new entry or failed. The
/// channel must be dedicated to this request: messages carry no round
/// identifier.
#[allow(clippy::too_many_arguments)]
pub async fn execute<B, C, R>(
    block_counter: Arc<B>,
    channel: Arc<C>,
    relay_chain: Arc<R>,
    request_id: BigUint,
    previous_entry: BigUint,
    seed: BigUint,
    threshold: usize,
    signer: Arc<dyn ThresholdSigner>,
    start_block_height: u64,
) -> Result<()>
where
    B: BlockCounter + ?Sized,
    C: BroadcastChannel,
    R: RelayChain + ?Sized + 'static,
{
    let inputs = RoundInputs {
        request_id,
        previous_entry,
        seed,
        threshold,
        start_block_height,
    };

    execute_round(
        RoundConfig::default(),
        inputs,
        block_counter,
        channel,
        relay_chain,
        signer,
    )
    .await
}

/// Run the threshold signature round with explicit block timing
#[instrument(
    skip_all,
    fields(request_id = %inputs.request_id, member = signer.member_index())
)]
pub async fn execute_round<B, C, R>(
    config: RoundConfig,
    inputs: RoundInputs,
    block_counter: Arc<B>,
    channel: Arc<C>,
    relay_chain: Arc<R>,
    signer: Arc<dyn ThresholdSigner>,
) -> Result<()>
where
    B: BlockCounter + ?Sized,
    C: BroadcastChannel,
    R: RelayChain + ?Sized + 'static,
{
    let final_block_height = validate(&config, &inputs, signer.as_ref())?;
    initialize_channel(channel.as_ref());

    let start_block_height = inputs.start_block_height;
    info!(
        threshold = inputs.threshold,
        group_size = signer.group_size(),
        start_block_height,
        final_block_height,
        "Starting threshold signature round"
    );

    let initial_state = SignatureShareState::new(SigningStateBase::new(
        channel.clone(),
        relay_chain,
        signer,
        inputs,
        config,
    ));
    let machine = Machine::new(channel, block_counter, Box::new(initial_state));

    match machine.execute(start_block_height).await {
        Ok((_, end_block_height)) => {
            info!(end_block_height, "Threshold signature round completed");
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "Threshold signature round failed");
            Err(err)
        }
    }
}

/// Check the round can run, returning the height it finalizes at
fn validate(
    config: &RoundConfig,
    inputs: &RoundInputs,
    signer: &dyn ThresholdSigner,
) -> Result<u64> {
    let group_size = signer.group_size();

    if inputs.threshold == 0 || inputs.threshold > group_size {
        return Err(Error::InvalidConfig(format!(
            "threshold {} out of range for group of {}",
            inputs.threshold, group_size
        )));
    }
    if signer.member_index() >= group_size {
        return Err(Error::InvalidConfig(format!(
            "member index {} outside group of {}",
            signer.member_index(),
            group_size
        )));
    }
    if config.signature_blocks == 0 {
        return Err(Error::InvalidConfig(
            "signature window must last at least one block".into(),
        ));
    }

    config
        .final_block_height(inputs.start_block_height)
        .ok_or_else(|| {
            Error::InvalidConfig(format!(
                "round starting at block {} ends past the last block height",
                inputs.start_block_height
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{LocalBlockCounter, LocalChain};
    use crate::signer::deal;
    use crate::RelayEntry;
    use beacon_net::{LocalProvider, TransportId};
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const BLOCK_TIME: Duration = Duration::from_millis(500);
    const START: u64 = 1;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    fn int(value: u64) -> BigUint {
        BigUint::from(value)
    }

    /// Local group of `n` members with threshold `t` sharing one chain
    struct Group {
        provider: LocalProvider,
        counter: Arc<LocalBlockCounter>,
        chain: Arc<LocalChain>,
        signers: Vec<Arc<dyn ThresholdSigner>>,
        threshold: usize,
    }

    impl Group {
        fn new(n: usize, t: usize) -> Self {
            let signers = deal(&mut StdRng::seed_from_u64(42), n, t)
                .unwrap()
                .into_iter()
                .map(|signer| Arc::new(signer) as Arc<dyn ThresholdSigner>)
                .collect();

            Self {
                provider: LocalProvider::new(),
                counter: Arc::new(LocalBlockCounter::new()),
                chain: Arc::new(LocalChain::new()),
                signers,
                threshold: t,
            }
        }

        fn spawn_member(
            &self,
            member: usize,
            request_id: u64,
            previous_entry: u64,
            seed: u64,
        ) -> JoinHandle<Result<()>> {
            let channel = self.provider.channel_for(
                &format!("relay-request-{}", request_id),
                TransportId::new(format!("member-{}", member)),
            );

            tokio::spawn(execute(
                self.counter.clone(),
                channel,
                self.chain.clone(),
                int(request_id),
                int(previous_entry),
                int(seed),
                self.threshold,
                self.signers[member].clone(),
                START,
            ))
        }

        /// Run `members` on request 1 with previous entry 12345 and seed 67
        fn spawn_members(&self, members: &[usize]) -> Vec<JoinHandle<Result<()>>> {
            members
                .iter()
                .map(|&member| self.spawn_member(member, 1, 12345, 67))
                .collect()
        }

        /// Broadcast `message` on request 1 as `member` once the setup
        /// blocks have passed
        fn spawn_faulty(&self, member: usize, message: SignatureShareMessage) -> JoinHandle<()> {
            let channel = self
                .provider
                .channel_for("relay-request-1", TransportId::new(format!("member-{}", member)));
            let counter = self.counter.clone();

            tokio::spawn(async move {
                counter
                    .wait_for_block_height(START + SETUP_BLOCKS)
                    .await
                    .unwrap();
                channel.send(&message).await.unwrap();
            })
        }

        async fn finish(&self, runs: Vec<JoinHandle<Result<()>>>) -> Vec<Result<()>> {
            let miner = self.counter.spawn_miner(BLOCK_TIME);
            let mut results = Vec::with_capacity(runs.len());
            for run in runs {
                results.push(run.await.unwrap());
            }
            miner.abort();
            results
        }

        fn entry(&self, request_id: u64) -> Option<RelayEntry> {
            self.chain.entry(&int(request_id))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_succeeds_with_four_of_five() {
        init_tracing();
        let group = Group::new(5, 3);

        let runs = group.spawn_members(&[0, 1, 2, 3]);
        for result in group.finish(runs).await {
            result.unwrap();
        }

        let entry = group.entry(1).unwrap();
        let message = combine_entry_to_sign(&int(12345), &int(67));
        assert!(group.signers[4].verify_group_signature(&entry.value, &message));
        assert_eq!(entry.group_public_key, group.signers[4].group_public_key());
        assert_eq!(group.chain.entry_count(), 1);
        assert_eq!(group.chain.submission_attempts(), 4);
        assert_eq!(
            group.counter.current_block_height().unwrap(),
            START + SETUP_BLOCKS + SIGNATURE_BLOCKS
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_fails_with_two_of_five() {
        init_tracing();
        let group = Group::new(5, 3);

        let runs = group.spawn_members(&[1, 3]);
        for result in group.finish(runs).await {
            assert!(matches!(
                result,
                Err(Error::InsufficientSignatureShares {
                    required: 3,
                    actual: 2
                })
            ));
        }

        assert!(group.entry(1).is_none());
        assert_eq!(group.chain.submission_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_tolerates_invalid_shares() {
        init_tracing();
        let group = Group::new(5, 3);
        let message = combine_entry_to_sign(&int(12345), &int(67));

        let runs = group.spawn_members(&[0, 1, 2]);
        let faulty = vec![
            // not a signature
            group.spawn_faulty(
                3,
                SignatureShareMessage {
                    sender_index: 3,
                    share_bytes: vec![1, 2, 3],
                },
            ),
            // signature over another message
            group.spawn_faulty(
                4,
                SignatureShareMessage {
                    sender_index: 4,
                    share_bytes: group.signers[4].sign(b"another message"),
                },
            ),
            // valid share replayed under another member's index
            group.spawn_faulty(
                4,
                SignatureShareMessage {
                    sender_index: 3,
                    share_bytes: group.signers[4].sign(&message),
                },
            ),
        ];

        for result in group.finish(runs).await {
            result.unwrap();
        }
        for task in faulty {
            task.await.unwrap();
        }

        let entry = group.entry(1).unwrap();
        assert!(group.signers[0].verify_group_signature(&entry.value, &message));
        assert_eq!(group.chain.submission_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_shares_do_not_count() {
        init_tracing();
        let group = Group::new(5, 3);

        let runs = group.spawn_members(&[0, 1]);
        let faulty = group.spawn_faulty(
            2,
            SignatureShareMessage {
                sender_index: 2,
                share_bytes: group.signers[2].sign(b"another message"),
            },
        );

        for result in group.finish(runs).await {
            assert!(matches!(
                result,
                Err(Error::InsufficientSignatureShares { actual: 2, .. })
            ));
        }
        faulty.await.unwrap();
        assert_eq!(group.chain.submission_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_rounds_are_independent() {
        init_tracing();
        let group = Group::new(3, 2);

        let mut runs = Vec::new();
        for member in 0..3 {
            runs.push(group.spawn_member(member, 1, 12345, 67));
            runs.push(group.spawn_member(member, 2, 12345, 68));
        }
        for result in group.finish(runs).await {
            result.unwrap();
        }

        let first = group.entry(1).unwrap();
        let second = group.entry(2).unwrap();
        assert_ne!(first.value, second.value);
        assert!(group.signers[0]
            .verify_group_signature(&second.value, &combine_entry_to_sign(&int(12345), &int(68))));
        assert_eq!(group.chain.entry_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rounds_chain_entries() {
        init_tracing();
        let group = Group::new(3, 2);

        let runs = (0..3).map(|m| group.spawn_member(m, 1, 12345, 67)).collect();
        for result in group.finish(runs).await {
            result.unwrap();
        }
        let first = group.entry(1).unwrap();

        // next request signs over the previous entry
        let previous = first.value_as_integer();
        let channel = |member: usize| {
            group
                .provider
                .channel_for("relay-request-2", TransportId::new(format!("member-{}", member)))
        };
        let start = group.counter.current_block_height().unwrap() + 1;
        let runs = (0..3)
            .map(|member| {
                tokio::spawn(execute(
                    group.counter.clone(),
                    channel(member),
                    group.chain.clone(),
                    int(2),
                    previous.clone(),
                    int(5),
                    2,
                    group.signers[member].clone(),
                    start,
                ))
            })
            .collect();
        for result in group.finish(runs).await {
            result.unwrap();
        }

        let second = group.entry(2).unwrap();
        assert_eq!(second.previous_entry, previous);
        assert!(group.signers[1]
            .verify_group_signature(&second.value, &combine_entry_to_sign(&previous, &int(5))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_error_is_returned() {
        init_tracing();
        let group = Group::new(3, 2);
        group
            .chain
            .submit_relay_entry(RelayEntry {
                request_id: int(1),
                value: vec![0xff],
                group_public_key: vec![],
                previous_entry: int(0),
                seed: int(0),
            })
            .await
            .unwrap();

        let runs = group.spawn_members(&[0, 1, 2]);
        for result in group.finish(runs).await {
            assert!(matches!(result, Err(Error::Submission(_))));
        }
        assert_eq!(group.entry(1).unwrap().value, vec![0xff]);
    }

    #[tokio::test]
    async fn test_invalid_threshold_is_rejected() {
        let group = Group::new(3, 2);

        for threshold in [0, 4] {
            let channel = group
                .provider
                .channel_for("relay-request-1", TransportId::new("member-0"));
            let result = execute(
                group.counter.clone(),
                channel,
                group.chain.clone(),
                int(1),
                int(12345),
                int(67),
                threshold,
                group.signers[0].clone(),
                START,
            )
            .await;
            assert!(matches!(result, Err(Error::InvalidConfig(_))));
        }
    }

    #[tokio::test]
    async fn test_empty_signature_window_is_rejected() {
        let group = Group::new(3, 2);
        let channel = group
            .provider
            .channel_for("relay-request-1", TransportId::new("member-0"));
        let config = RoundConfig {
            setup_blocks: 1,
            signature_blocks: 0,
        };
        let inputs = RoundInputs {
            request_id: int(1),
            previous_entry: int(12345),
            seed: int(67),
            threshold: 2,
            start_block_height: START,
        };

        let result = execute_round(
            config,
            inputs,
            group.counter.clone(),
            channel,
            group.chain.clone(),
            group.signers[0].clone(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_round_past_last_block_height_is_rejected() {
        let group = Group::new(1, 1);
        let counter = Arc::new(LocalBlockCounter::starting_at(u64::MAX));
        let channel = group
            .provider
            .channel_for("relay-request-1", TransportId::new("member-0"));

        let run = tokio::spawn(execute(
            counter,
            channel,
            group.chain.clone(),
            int(1),
            int(12345),
            int(67),
            1,
            group.signers[0].clone(),
            u64::MAX - 1,
        ));
        assert!(matches!(run.await.unwrap(), Err(Error::InvalidConfig(_))));

        let channel = group
            .provider
            .channel_for("relay-request-2", TransportId::new("member-0"));
        let config = RoundConfig {
            setup_blocks: u64::MAX,
            signature_blocks: 1,
        };
        let inputs = RoundInputs {
            request_id: int(2),
            previous_entry: int(12345),
            seed: int(67),
            threshold: 1,
            start_block_height: START,
        };
        let result = execute_round(
            config,
            inputs,
            group.counter.clone(),
            channel,
            group.chain.clone(),
            group.signers[0].clone(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert_eq!(group.chain.submission_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_round_timing() {
        init_tracing();
        let group = Group::new(3, 3);
        let config = RoundConfig {
            setup_blocks: 2,
            signature_blocks: 5,
        };

        let runs = (0..3)
            .map(|member| {
                let channel = group
                    .provider
                    .channel_for("relay-request-1", TransportId::new(format!("member-{}", member)));
                let inputs = RoundInputs {
                    request_id: int(1),
                    previous_entry: int(12345),
                    seed: int(67),
                    threshold: 3,
                    start_block_height: START,
                };
                tokio::spawn(execute_round(
                    config,
                    inputs,
                    group.counter.clone(),
                    channel,
                    group.chain.clone(),
                    group.signers[member].clone(),
                ))
            })
            .collect();

        for result in group.finish(runs).await {
            result.unwrap();
        }
        assert!(group.entry(1).is_some());
        assert_eq!(group.counter.current_block_height().unwrap(), START + 7);
    }
}
