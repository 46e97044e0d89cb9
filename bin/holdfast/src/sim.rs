//! Deterministic local simulation of the finality pipeline
//!
//! Stands in for the external collaborators on a machine with no Bitcoin
//! chain, rollup or relay: a static SPV oracle vouches for synthetic stake
//! transactions, and scripted facts drive blocks through proposal,
//! signatures, attestation and finalization. With `--equivocate` one
//! provider double-signs a height and the resulting evidence is submitted
//! as a slashing proof at the end.

use std::sync::Arc;

use alloy_primitives::{keccak256, B256};
use clap::Args;
use holdfast_chainspec::HoldfastChainSpec;
use holdfast_finality::BlockSignature;
use holdfast_node::{fact_channel, ExternalFact, FactWorker, FinalityNode};
use holdfast_slashing::SlashingProof;
use holdfast_stake::{address_from_key, CompressedPubkey, StakeProof, StaticOracle};
use k256::ecdsa::SigningKey;
use tracing::info;

/// Simulation parameters
#[derive(Debug, Args)]
pub(crate) struct SimArgs {
    /// Number of finality providers
    #[arg(long, default_value = "4")]
    providers: u8,

    /// Number of blocks to drive to finality
    #[arg(long, default_value = "5")]
    blocks: u64,

    /// Have the first provider double-sign one height
    #[arg(long)]
    equivocate: bool,
}

/// Deterministic provider keys; byte 0 is not a valid scalar seed here,
/// so keys start at 1.
fn provider_keys(count: u8) -> Vec<SigningKey> {
    (1..=count)
        .map(|byte| SigningKey::from_slice(&[byte; 32]).expect("nonzero scalar"))
        .collect()
}

/// Synthetic but collision-free block hash per height
fn block_hash(height: u64) -> B256 {
    keccak256(height.to_be_bytes())
}

pub(crate) fn run(spec: &HoldfastChainSpec, args: SimArgs) -> eyre::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run_inner(spec, args))
}

async fn run_inner(spec: &HoldfastChainSpec, args: SimArgs) -> eyre::Result<()> {
    if args.providers < 2 {
        eyre::bail!("the simulation needs at least 2 providers");
    }
    let params = spec.params.clone();
    info!(
        target: "holdfast::sim",
        chain = %spec.name,
        providers = args.providers,
        blocks = args.blocks,
        "Starting finality simulation"
    );

    let keys = provider_keys(args.providers);
    let stake_amount = params.min_stake * 2;
    let start = 1_000_000u64;

    let mut oracle = StaticOracle::new();
    for i in 0..keys.len() {
        oracle.insert(stake_txid(i));
    }

    let node = Arc::new(FinalityNode::new(params.clone()));
    let (facts, fact_rx) = fact_channel(64);
    let worker = tokio::spawn(FactWorker::new(Arc::clone(&node), oracle, fact_rx).run());

    // Every provider locks twice the minimum, covering the whole run.
    for (i, key) in keys.iter().enumerate() {
        facts
            .send(ExternalFact::StakeProof {
                proof: StakeProof {
                    btc_txid: stake_txid(i),
                    amount: stake_amount,
                    confirmations: params.finality_blocks,
                    provider_key: CompressedPubkey::from_slice(
                        &key.verifying_key().to_sec1_bytes(),
                    ),
                    lock_start: 0,
                    lock_duration: params.max_stake_duration,
                },
            })
            .await?;
    }

    for height in 1..=args.blocks {
        let hash = block_hash(height);
        let proposed = start + height * params.block_time;

        facts
            .send(ExternalFact::BlockProposed { height, hash, timestamp: proposed })
            .await?;
        facts
            .send(ExternalFact::Attestation { height, hash, received_at: proposed })
            .await?;

        for (i, key) in keys.iter().enumerate() {
            let signature = BlockSignature::sign(key, height, hash, proposed)?;
            facts
                .send(ExternalFact::Signature { signature, received_at: proposed + 1 })
                .await?;

            // The first provider betrays height 2: a second signature for a
            // fork of the same height.
            if args.equivocate && i == 0 && height == 2 {
                let fork = keccak256(hash);
                let conflicting = BlockSignature::sign(key, height, fork, proposed)?;
                facts
                    .send(ExternalFact::Signature {
                        signature: conflicting,
                        received_at: proposed + 1,
                    })
                    .await?;
            }
        }
    }

    drop(facts);
    worker.await?;

    for height in 1..=args.blocks {
        let hash = block_hash(height);
        let quorum = node.signature_quorum(height, &hash);
        info!(
            target: "holdfast::sim",
            height,
            %hash,
            power = quorum.power,
            threshold = quorum.threshold,
            finalized = node.finalized_hash(height) == Some(hash),
            "Block result"
        );
    }
    let Some((tip, tip_hash)) = node.latest_finalized() else {
        eyre::bail!("no block finalized");
    };
    info!(target: "holdfast::sim", tip, %tip_hash, "Simulation chain finalized");

    // Turn detected evidence into slashing proofs, as a watchtower would.
    let end = start + (args.blocks + 1) * params.block_time;
    for violation in node.pending_violations() {
        let proof = SlashingProof {
            provider: violation.provider,
            evidence: violation.evidence.clone(),
            timestamp: end,
        };
        let outcome = node.submit_slashing_proof(&proof)?;
        info!(
            target: "holdfast::sim",
            provider = %outcome.provider,
            reason = violation.reason.as_str(),
            penalty = outcome.penalty,
            remaining = outcome.remaining,
            status = outcome.status.as_str(),
            "Provider slashed"
        );
    }

    for key in &keys {
        let address = address_from_key(key.verifying_key());
        if let Some(status) = node.staking_status(&address) {
            println!("{}", serde_json::to_string(&status)?);
        }
    }
    Ok(())
}

fn stake_txid(index: usize) -> B256 {
    keccak256((index as u64).to_le_bytes())
}
