//! Block-driven state machine for group protocols
//!
//! A protocol is a chain of [`State`]s. Each state waits
//! [`State::delay_blocks`] after it is entered, is initiated, then keeps
//! receiving messages for [`State::active_blocks`] more blocks before the
//! machine moves on. Heights are derived from the start height alone, so
//! every member moves through the states at the same blocks.

use crate::chain::{async_trait, BlockCounter};
use crate::{Error, MemberIndex, Result};
use beacon_net::{BroadcastChannel, Message, Subscription};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Blocks a messaging state waits before it broadcasts
pub const MESSAGING_STATE_DELAY_BLOCKS: u64 = 1;

/// Blocks a messaging state listens after it broadcasts
pub const MESSAGING_STATE_ACTIVE_BLOCKS: u64 = 3;

/// One step of a protocol run by the [`Machine`].
///
/// The machine delivers events to the state one at a time, so
/// implementations need no internal synchronization.
#[async_trait]
pub trait State: Send {
    /// Blocks between entering the state and initiating it
    fn delay_blocks(&self) -> u64;

    /// Blocks the state stays active after being initiated
    fn active_blocks(&self) -> u64;

    /// Called once at the first block of the state
    fn enter(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the delay has elapsed
    async fn initiate(&mut self) -> Result<()>;

    /// Handle a message received while the state is active.
    ///
    /// Errors are logged by the machine and do not stop the protocol.
    fn receive(&mut self, message: &Message) -> Result<()>;

    /// Whether the protocol ends with this state
    fn is_terminal(&self) -> bool {
        false
    }

    /// State following this one. Never called on a terminal state.
    fn next(self: Box<Self>) -> Box<dyn State>;

    /// Index of the member running the state
    fn member_index(&self) -> MemberIndex;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Runs a chain of states against block height and a broadcast channel
pub struct Machine<C, B: ?Sized> {
    channel: Arc<C>,
    block_counter: Arc<B>,
    initial_state: Box<dyn State>,
}

impl<C, B> Machine<C, B>
where
    C: BroadcastChannel,
    B: BlockCounter + ?Sized,
{
    pub fn new(channel: Arc<C>, block_counter: Arc<B>, initial_state: Box<dyn State>) -> Self {
        Self {
            channel,
            block_counter,
            initial_state,
        }
    }

    /// Run from `start_block_height` until a terminal state completes.
    ///
    /// Returns the terminal state and the block height it ended at, or the
    /// first error raised while entering or initiating a state.
    #[instrument(skip(self), fields(channel = self.channel.name()))]
    pub async fn execute(self, start_block_height: u64) -> Result<(Box<dyn State>, u64)> {
        let Self {
            channel,
            block_counter,
            initial_state,
        } = self;
        let mut messages = channel.subscribe();

        block_counter
            .wait_for_block_height(start_block_height)
            .await?;

        let mut state = initial_state;
        let mut height = start_block_height;

        loop {
            let member = state.member_index();
            debug!(member, state = state.name(), height, "Entering state");
            state.enter()?;

            let initiate_height = advance(height, state.delay_blocks())?;
            listen(&*block_counter, &mut *state, &mut messages, initiate_height).await?;

            debug!(member, state = state.name(), height = initiate_height, "Initiating state");
            state.initiate().await?;

            let end_height = advance(initiate_height, state.active_blocks())?;
            listen(&*block_counter, &mut *state, &mut messages, end_height).await?;
            height = end_height;

            if state.is_terminal() {
                info!(member, state = state.name(), height, "Reached final state");
                return Ok((state, height));
            }
            state = state.next();
        }
    }
}

fn advance(height: u64, blocks: u64) -> Result<u64> {
    height.checked_add(blocks).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "block height {} overflows {} blocks later",
            height, blocks
        ))
    })
}

/// Deliver messages to `state` until the chain reaches `until`
async fn listen<B: BlockCounter + ?Sized>(
    block_counter: &B,
    state: &mut dyn State,
    messages: &mut Subscription,
    until: u64,
) -> Result<()> {
    let deadline = block_counter.wait_for_block_height(until);
    tokio::pin!(deadline);
    let mut open = true;

    loop {
        tokio::select! {
            biased;
            result = &mut deadline => return result,
            message = messages.recv(), if open => match message {
                Some(message) => {
                    if let Err(err) = state.receive(&message) {
                        warn!(
                            member = state.member_index(),
                            state = state.name(),
                            sender = %message.sender(),
                            error = %err,
                            "Message rejected"
                        );
                    }
                }
                None => open = false,
            },
        }
    }
}
