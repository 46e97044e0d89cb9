//! Stake-proof verification
//!
//! Thin adapter over the external SPV collaborator. The collaborator
//! supplies the raw inclusion fact; this module layers the protocol policy
//! on top (confirmation depth, minimum amount, lock duration bounds) and
//! emits a [`VerifiedStake`] the ledger will accept.

use alloy_primitives::B256;
use holdfast_chainspec::FinalityParams;
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::{CompressedPubkey, StakeError};

/// A BTC stake-lock proof as delivered by the SPV collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeProof {
    /// Bitcoin transaction id of the lock
    pub btc_txid: B256,
    /// Locked amount in satoshis
    pub amount: u64,
    /// Confirmation depth at delivery time
    pub confirmations: u32,
    /// Provider's secp256k1 public key (compressed SEC1)
    pub provider_key: CompressedPubkey,
    /// Lock window start, unix seconds
    pub lock_start: u64,
    /// Lock duration, seconds
    pub lock_duration: u64,
}

/// The external SPV boundary: answers whether a transaction is included
/// in the Bitcoin chain at the claimed depth.
///
/// Implementations must not block; the proof is expected to have been
/// fetched and verified before it reaches the core.
pub trait SpvOracle {
    /// Whether `txid` is included with at least `confirmations` depth
    fn is_included(&self, txid: &B256, confirmations: u32) -> bool;
}

/// Oracle backed by a fixed set of known transaction ids.
///
/// Used on devnets and in tests where no Bitcoin chain exists.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    known: HashSet<B256>,
}

impl StaticOracle {
    /// Empty oracle that rejects everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a transaction as included
    pub fn insert(&mut self, txid: B256) {
        self.known.insert(txid);
    }
}

impl SpvOracle for StaticOracle {
    fn is_included(&self, txid: &B256, _confirmations: u32) -> bool {
        self.known.contains(txid)
    }
}

/// A stake proof that passed SPV and policy checks.
///
/// Only the ledger consumes this; duplicate-txid rejection happens there,
/// where the consumed set lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedStake {
    /// Provider's public key
    pub provider_key: CompressedPubkey,
    /// Bitcoin transaction id
    pub btc_txid: B256,
    /// Locked amount in satoshis
    pub amount: u64,
    /// Lock window start, unix seconds
    pub lock_start: u64,
    /// Lock duration, seconds
    pub lock_duration: u64,
}

/// Applies protocol policy to incoming stake proofs.
#[derive(Debug, Clone)]
pub struct ProofVerifier {
    params: FinalityParams,
}

impl ProofVerifier {
    /// Verifier for the given parameters
    pub const fn new(params: FinalityParams) -> Self {
        Self { params }
    }

    /// Verify a proof against the SPV oracle and protocol policy.
    pub fn verify(
        &self,
        proof: &StakeProof,
        oracle: &dyn SpvOracle,
    ) -> Result<VerifiedStake, StakeError> {
        if !oracle.is_included(&proof.btc_txid, proof.confirmations) {
            return Err(StakeError::ProofInvalid {
                reason: format!("tx {} not included per SPV oracle", proof.btc_txid),
            });
        }
        if proof.confirmations < self.params.finality_blocks {
            return Err(StakeError::ProofInvalid {
                reason: format!(
                    "{} confirmations below required depth {}",
                    proof.confirmations, self.params.finality_blocks
                ),
            });
        }
        if proof.amount < self.params.min_stake {
            return Err(StakeError::InsufficientAmount {
                amount: proof.amount,
                minimum: self.params.min_stake,
            });
        }
        if proof.lock_duration < self.params.min_stake_duration
            || proof.lock_duration > self.params.max_stake_duration
        {
            return Err(StakeError::ProofInvalid {
                reason: format!(
                    "lock duration {}s outside [{}, {}]",
                    proof.lock_duration,
                    self.params.min_stake_duration,
                    self.params.max_stake_duration
                ),
            });
        }
        if VerifyingKey::from_sec1_bytes(proof.provider_key.as_slice()).is_err() {
            return Err(StakeError::ProofInvalid {
                reason: "provider key is not a valid compressed secp256k1 point".to_string(),
            });
        }

        debug!(
            target: "holdfast::stake",
            txid = %proof.btc_txid,
            amount = proof.amount,
            confirmations = proof.confirmations,
            "Stake proof verified"
        );

        Ok(VerifiedStake {
            provider_key: proof.provider_key,
            btc_txid: proof.btc_txid,
            amount: proof.amount,
            lock_start: proof.lock_start,
            lock_duration: proof.lock_duration,
        })
    }
}
