//! Holdfast Stake Ledger
//!
//! Tracks each finality provider's locked BTC collateral and the voting
//! power derived from it. The ledger is the single owner of provider and
//! stake mutation: stake registration (gated by a verified BTC inclusion
//! proof), slash write-downs and withdrawals all go through it.
//!
//! # Model
//!
//! - A provider is created on its first accepted stake proof and never
//!   deleted; penalty counters and consumed transaction ids are retained
//!   for audit and duplicate-slash prevention.
//! - A stake is an immutable lock record; a BTC transaction id feeds at
//!   most one stake, ever.
//! - Voting power at a time `t` is the sum of stake remainders whose lock
//!   window covers `t`, and zero while the provider is slashed below the
//!   minimum or withdrawing.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod ledger;
pub mod proof;
pub mod provider;

pub use ledger::{StakeLedger, StakingStatus, WithdrawTicket};
pub use proof::{ProofVerifier, SpvOracle, StakeProof, StaticOracle, VerifiedStake};
pub use provider::{
    address_from_key, CompressedPubkey, FinalityProvider, ProviderStatus, Stake, StakeId,
};

use alloy_primitives::{Address, B256};
use thiserror::Error;

/// Stake ledger errors
#[derive(Debug, Error)]
pub enum StakeError {
    /// The BTC transaction id was already consumed by an earlier stake
    #[error("stake proof for tx {txid} already consumed")]
    DuplicateStakeProof {
        /// Consumed transaction id
        txid: B256,
    },

    /// Stake amount below the configured minimum
    #[error("stake of {amount} sats below minimum {minimum}")]
    InsufficientAmount {
        /// Offered amount in satoshis
        amount: u64,
        /// Required minimum in satoshis
        minimum: u64,
    },

    /// Proof failed verification
    #[error("stake proof rejected: {reason}")]
    ProofInvalid {
        /// What failed
        reason: String,
    },

    /// No such provider in the ledger
    #[error("unknown provider {provider}")]
    UnknownProvider {
        /// Requested provider
        provider: Address,
    },

    /// Funds are still lock-covered or a slash cooldown is running
    #[error("withdrawal locked until {until}")]
    LockActive {
        /// Unix seconds when the lock clears
        until: u64,
    },

    /// Requested more than the free (expired, unslashed) balance
    #[error("requested {requested} sats exceeds free balance {free}")]
    InsufficientStake {
        /// Requested amount in satoshis
        requested: u64,
        /// Withdrawable amount in satoshis
        free: u64,
    },
}
