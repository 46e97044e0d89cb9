//! External fact ingestion
//!
//! Collaborator facts reach the node over a buffered channel: SPV-checked
//! stake proofs, rollup block proposals, finality signatures and
//! state-bridge attestations. The relay may reorder, drop and re-deliver;
//! every node operation is idempotent, so the worker applies facts as they
//! arrive and logs the ones the core rejects.

use std::sync::Arc;

use alloy_primitives::B256;
use holdfast_finality::BlockSignature;
use holdfast_stake::{SpvOracle, StakeProof};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::FinalityNode;

/// A fact reported by an external collaborator.
#[derive(Debug, Clone)]
pub enum ExternalFact {
    /// A BTC stake-lock proof from the SPV collaborator
    StakeProof {
        /// The delivered proof
        proof: StakeProof,
    },
    /// A rollup block proposal
    BlockProposed {
        /// Block height
        height: u64,
        /// Block hash
        hash: B256,
        /// Proposal time, unix seconds
        timestamp: u64,
    },
    /// A provider's finality signature
    Signature {
        /// The signature
        signature: BlockSignature,
        /// Delivery time, unix seconds
        received_at: u64,
    },
    /// A state-bridge attestation for (height, hash)
    Attestation {
        /// Block height
        height: u64,
        /// Block hash
        hash: B256,
        /// Delivery time, unix seconds
        received_at: u64,
    },
}

/// Channel for submitting external facts to the worker
pub type FactSender = mpsc::Sender<ExternalFact>;
/// Receiver for external facts
pub type FactReceiver = mpsc::Receiver<ExternalFact>;

/// Creates a buffered channel for external fact delivery
pub fn fact_channel(buffer: usize) -> (FactSender, FactReceiver) {
    mpsc::channel(buffer)
}

/// Applies external facts to the node, one at a time in arrival order.
///
/// Rejected facts are logged and dropped; the sender is not the party at
/// fault for most rejections (duplicates, late deliveries), so nothing is
/// reported back.
#[derive(Debug)]
pub struct FactWorker<O> {
    node: Arc<FinalityNode>,
    oracle: O,
    fact_rx: FactReceiver,
}

impl<O: SpvOracle> FactWorker<O> {
    /// Worker feeding `node`, checking stake proofs against `oracle`
    pub fn new(node: Arc<FinalityNode>, oracle: O, fact_rx: FactReceiver) -> Self {
        Self { node, oracle, fact_rx }
    }

    /// Run the ingestion loop until every sender is dropped.
    pub async fn run(mut self) {
        info!(target: "holdfast::facts", "Fact worker started");

        while let Some(fact) = self.fact_rx.recv().await {
            self.apply(fact);
        }

        info!(target: "holdfast::facts", "Fact worker stopped");
    }

    fn apply(&self, fact: ExternalFact) {
        match fact {
            ExternalFact::StakeProof { proof } => {
                match self.node.register_stake(&proof, &self.oracle) {
                    Ok(stake_id) => debug!(
                        target: "holdfast::facts",
                        stake_id,
                        txid = %proof.btc_txid,
                        "Stake proof applied"
                    ),
                    Err(err) => warn!(
                        target: "holdfast::facts",
                        txid = %proof.btc_txid,
                        %err,
                        "Stake proof rejected"
                    ),
                }
            }
            ExternalFact::BlockProposed { height, hash, timestamp } => {
                if let Err(err) = self.node.propose_block(height, hash, timestamp) {
                    warn!(
                        target: "holdfast::facts",
                        height, %hash, %err,
                        "Block proposal rejected"
                    );
                }
            }
            ExternalFact::Signature { signature, received_at } => {
                let height = signature.height;
                let provider = signature.provider;
                if let Err(err) = self.node.submit_signature(signature, received_at) {
                    warn!(
                        target: "holdfast::facts",
                        height, %provider, %err,
                        "Finality signature rejected"
                    );
                }
            }
            ExternalFact::Attestation { height, hash, received_at } => {
                if let Err(err) = self.node.submit_attestation(height, hash, received_at) {
                    warn!(
                        target: "holdfast::facts",
                        height, %hash, %err,
                        "Attestation rejected"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_chainspec::FinalityParams;
    use holdfast_stake::{CompressedPubkey, StaticOracle};
    use k256::ecdsa::SigningKey;

    fn test_params() -> FinalityParams {
        FinalityParams {
            min_stake: 100,
            min_stake_duration: 10,
            max_stake_duration: 10_000_000,
            ..FinalityParams::default()
        }
    }

    fn provider_key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).unwrap()
    }

    fn stake_fact(byte: u8, amount: u64) -> ExternalFact {
        ExternalFact::StakeProof {
            proof: StakeProof {
                btc_txid: B256::repeat_byte(byte),
                amount,
                confirmations: 6,
                provider_key: CompressedPubkey::from_slice(
                    &provider_key(byte).verifying_key().to_sec1_bytes(),
                ),
                lock_start: 0,
                lock_duration: 1_000_000,
            },
        }
    }

    #[tokio::test]
    async fn test_worker_drives_a_block_to_finality() {
        let node = Arc::new(FinalityNode::new(test_params()));
        let mut oracle = StaticOracle::new();
        oracle.insert(B256::repeat_byte(1));
        oracle.insert(B256::repeat_byte(2));

        let (tx, rx) = fact_channel(32);
        let worker = FactWorker::new(Arc::clone(&node), oracle, rx);

        let hash = B256::repeat_byte(0xaa);
        tx.send(stake_fact(1, 400)).await.unwrap();
        tx.send(stake_fact(2, 600)).await.unwrap();
        tx.send(ExternalFact::BlockProposed { height: 10, hash, timestamp: 100 }).await.unwrap();
        tx.send(ExternalFact::Attestation { height: 10, hash, received_at: 100 }).await.unwrap();
        for byte in [1u8, 2] {
            let signature = BlockSignature::sign(&provider_key(byte), 10, hash, 100).unwrap();
            tx.send(ExternalFact::Signature { signature, received_at: 101 }).await.unwrap();
        }
        drop(tx);
        worker.run().await;

        assert_eq!(node.finalized_hash(10), Some(hash));
    }

    #[tokio::test]
    async fn test_worker_survives_rejected_facts() {
        let node = Arc::new(FinalityNode::new(test_params()));
        let (tx, rx) = fact_channel(8);
        // Empty oracle: every stake proof is rejected.
        let worker = FactWorker::new(Arc::clone(&node), StaticOracle::new(), rx);

        tx.send(stake_fact(1, 400)).await.unwrap();
        // Signature from a provider with no stake.
        let signature =
            BlockSignature::sign(&provider_key(7), 10, B256::repeat_byte(0xaa), 100).unwrap();
        tx.send(ExternalFact::Signature { signature, received_at: 100 }).await.unwrap();
        drop(tx);
        worker.run().await;

        assert_eq!(node.total_active_power(100), 0);
    }
}
