//! Beacon Party CLI
//!
//! Command-line interface for relay beacon groups:
//! - Combining a previous entry and a seed into the message a group signs
//! - Simulating threshold signature rounds of a local group

use anyhow::{anyhow, bail, Result};
use beacon_core::chain::{BlockCounter, LocalBlockCounter, LocalChain};
use beacon_core::signer::{deal, ThresholdSigner};
use beacon_core::thresholdsignature::{self, combine_entry_to_sign, SignatureShareMessage};
use beacon_core::{RelayEntry, RoundConfig, RoundInputs};
use beacon_net::{BroadcastChannel, LocalProvider, TransportId};
use clap::{Args, Parser, Subcommand};
use futures_util::future::join_all;
use num_bigint::BigUint;
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

/// Beacon Party - relay beacon group member
#[derive(Parser)]
#[command(name = "beacon-party")]
#[command(about = "Relay beacon threshold signing party")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the message a group signs for a previous entry and seed
    Combine {
        /// Previous relay entry (decimal)
        #[arg(short, long, env = "PREVIOUS_ENTRY")]
        previous_entry: BigUint,

        /// Request seed (decimal)
        #[arg(short, long, env = "SEED")]
        seed: BigUint,
    },

    /// Run threshold signature rounds with a local group
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct SimulateArgs {
    /// Number of group members
    #[arg(short = 'n', long, env = "GROUP_SIZE", default_value_t = 5)]
    group_size: usize,

    /// Threshold (t-of-n)
    #[arg(short, long, env = "THRESHOLD", default_value_t = 3)]
    threshold: usize,

    /// Request ID of the first round
    #[arg(long, env = "REQUEST_ID", default_value = "1")]
    request_id: BigUint,

    /// Previous relay entry of the first round (decimal)
    #[arg(long, env = "PREVIOUS_ENTRY", default_value = "0")]
    previous_entry: BigUint,

    /// Seed used by every round (decimal)
    #[arg(long, env = "SEED", default_value = "0")]
    seed: BigUint,

    /// Number of chained rounds
    #[arg(short, long, env = "ROUNDS", default_value_t = 1)]
    rounds: usize,

    /// Blocks before members broadcast their shares
    #[arg(long, env = "SETUP_BLOCKS", default_value_t = thresholdsignature::SETUP_BLOCKS)]
    setup_blocks: u64,

    /// Blocks during which shares are collected
    #[arg(long, env = "SIGNATURE_BLOCKS", default_value_t = thresholdsignature::SIGNATURE_BLOCKS)]
    signature_blocks: u64,

    /// Block time of the local chain in milliseconds
    #[arg(long, env = "BLOCK_TIME_MS", default_value_t = 200)]
    block_time_ms: u64,

    /// Members that never respond
    #[arg(long, env = "OFFLINE", default_value_t = 0)]
    offline: usize,

    /// Members that broadcast invalid shares
    #[arg(long, env = "FAULTY", default_value_t = 0)]
    faulty: usize,

    /// Print entries as JSON
    #[arg(long, env = "JSON_OUTPUT")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Combine {
            ref previous_entry,
            ref seed,
        } => {
            println!("{}", hex::encode(combine_entry_to_sign(previous_entry, seed)));
        }
        Commands::Simulate(ref args) => {
            run_simulation(args).await?;
        }
    }

    Ok(())
}

/// Part a member plays in a simulated round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Honest,
    Faulty,
    Offline,
}

/// Honest members first, then faulty, then offline
fn assign_roles(group_size: usize, faulty: usize, offline: usize) -> Result<Vec<Role>> {
    if faulty + offline > group_size {
        bail!(
            "{} faulty and {} offline members do not fit in a group of {}",
            faulty,
            offline,
            group_size
        );
    }

    let honest = group_size - faulty - offline;
    Ok(std::iter::repeat(Role::Honest)
        .take(honest)
        .chain(std::iter::repeat(Role::Faulty).take(faulty))
        .chain(std::iter::repeat(Role::Offline).take(offline))
        .collect())
}

/// Local group sharing one chain and transport
struct LocalGroup {
    provider: LocalProvider,
    counter: Arc<LocalBlockCounter>,
    chain: Arc<LocalChain>,
    signers: Vec<Arc<dyn ThresholdSigner>>,
    roles: Vec<Role>,
    config: RoundConfig,
}

/// Run the requested rounds, returning the group once they are done
async fn run_simulation(args: &SimulateArgs) -> Result<LocalGroup> {
    let roles = assign_roles(args.group_size, args.faulty, args.offline)?;
    let config = RoundConfig {
        setup_blocks: args.setup_blocks,
        signature_blocks: args.signature_blocks,
    };

    info!(
        group_size = args.group_size,
        threshold = args.threshold,
        faulty = args.faulty,
        offline = args.offline,
        rounds = args.rounds,
        "Dealing group key"
    );

    let signers = deal(&mut OsRng, args.group_size, args.threshold)?
        .into_iter()
        .map(|signer| Arc::new(signer) as Arc<dyn ThresholdSigner>)
        .collect();

    let group = LocalGroup {
        provider: LocalProvider::new(),
        counter: Arc::new(LocalBlockCounter::new()),
        chain: Arc::new(LocalChain::new()),
        signers,
        roles,
        config,
    };

    let miner = group
        .counter
        .spawn_miner(Duration::from_millis(args.block_time_ms));

    let mut request_id = args.request_id.clone();
    let mut previous_entry = args.previous_entry.clone();
    let mut outcome = Ok(());

    for _ in 0..args.rounds {
        let inputs = RoundInputs {
            request_id: request_id.clone(),
            previous_entry: previous_entry.clone(),
            seed: args.seed.clone(),
            threshold: args.threshold,
            start_block_height: group.counter.current_block_height()?.saturating_add(1),
        };

        let result = run_round(&group, inputs).await;
        group.provider.close(&round_channel(&request_id));
        if let Err(err) = result {
            outcome = Err(err);
            break;
        }

        let entry = group
            .chain
            .entry(&request_id)
            .ok_or_else(|| anyhow!("no entry submitted for request {}", request_id))?;
        print_entry(&entry, args.json)?;

        previous_entry = entry.value_as_integer();
        request_id += 1u32;
    }

    miner.abort();
    outcome.map(|()| group)
}

/// Channel dedicated to the round answering `request_id`
fn round_channel(request_id: &BigUint) -> String {
    format!("relay-request-{}", request_id)
}

/// Run one round with every member of the group and wait for all of them
async fn run_round(group: &LocalGroup, inputs: RoundInputs) -> Result<()> {
    let channel_name = round_channel(&inputs.request_id);
    info!(
        request_id = %inputs.request_id,
        start_block_height = inputs.start_block_height,
        "Starting round"
    );

    let mut members = Vec::new();
    let mut faulty = Vec::new();

    for (index, role) in group.roles.iter().enumerate() {
        let channel = group
            .provider
            .channel_for(&channel_name, TransportId::new(format!("member-{}", index)));

        match role {
            Role::Honest => {
                members.push(tokio::spawn(thresholdsignature::execute_round(
                    group.config,
                    inputs.clone(),
                    group.counter.clone(),
                    channel,
                    group.chain.clone(),
                    group.signers[index].clone(),
                )));
            }
            Role::Faulty => {
                let counter = group.counter.clone();
                let broadcast_at = inputs
                    .start_block_height
                    .saturating_add(group.config.setup_blocks);
                faulty.push(tokio::spawn(async move {
                    counter.wait_for_block_height(broadcast_at).await?;

                    let mut share_bytes = vec![0u8; 48];
                    OsRng.fill_bytes(&mut share_bytes);
                    channel
                        .send(&SignatureShareMessage {
                            sender_index: index,
                            share_bytes,
                        })
                        .await?;

                    warn!(member = index, "Faulty member broadcast a random share");
                    Ok::<_, beacon_core::Error>(())
                }));
            }
            Role::Offline => {
                info!(member = index, "Member offline");
            }
        }
    }

    for result in join_all(faulty).await {
        result??;
    }

    let mut submitted = 0;
    let mut first_error = None;
    for (index, result) in join_all(members).await.into_iter().enumerate() {
        match result? {
            Ok(()) => submitted += 1,
            Err(err) => {
                warn!(member = index, error = %err, "Member failed the round");
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        None => {
            info!(submitted, "Round completed");
            Ok(())
        }
        Some(err) if submitted == 0 => Err(err.into()),
        Some(_) => {
            info!(submitted, "Round completed with member failures");
            Ok(())
        }
    }
}

fn print_entry(entry: &RelayEntry, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entry)?);
        return Ok(());
    }

    println!("Relay Entry:");
    println!("  Request ID: {}", entry.request_id);
    println!("  Previous Entry: {}", entry.previous_entry);
    println!("  Seed: {}", entry.seed);
    println!("  Value: {}", hex::encode(&entry.value));
    println!("  As Integer: {}", entry.value_as_integer());
    println!("  Group Public Key: {}", hex::encode(&entry.group_public_key));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_roles() {
        let roles = assign_roles(5, 1, 2).unwrap();
        assert_eq!(
            roles,
            vec![
                Role::Honest,
                Role::Honest,
                Role::Faulty,
                Role::Offline,
                Role::Offline
            ]
        );
        assert_eq!(assign_roles(3, 0, 0).unwrap(), vec![Role::Honest; 3]);
        assert!(assign_roles(3, 2, 2).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_closes_round_channels() {
        let cli = Cli::try_parse_from([
            "beacon-party",
            "simulate",
            "-n",
            "3",
            "--threshold",
            "2",
            "--rounds",
            "3",
            "--offline",
            "1",
        ])
        .unwrap();
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };

        let group = run_simulation(&args).await.unwrap();
        assert_eq!(group.chain.entry_count(), 3);
        assert_eq!(group.provider.channel_count(), 0);
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "beacon-party",
            "simulate",
            "-n",
            "7",
            "--threshold",
            "4",
            "--previous-entry",
            "12345",
            "--seed",
            "67",
            "--offline",
            "2",
        ])
        .unwrap();

        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.group_size, 7);
        assert_eq!(args.threshold, 4);
        assert_eq!(args.previous_entry, BigUint::from(12345u32));
        assert_eq!(args.seed, BigUint::from(67u32));
        assert_eq!(args.offline, 2);
        assert_eq!(args.faulty, 0);
        assert_eq!(args.request_id, BigUint::from(1u32));
        assert_eq!(args.setup_blocks, thresholdsignature::SETUP_BLOCKS);
    }
}
