//! Holdfast Slashing Engine
//!
//! Validates violation proofs and applies stake penalties through the
//! ledger. Three violation classes exist:
//!
//! - **Equivocation**: two valid signatures from one provider for
//!   different hashes at the same height.
//! - **Invalid signature**: a signature recorded as accepted in the quorum
//!   tracker that fails cryptographic verification — a retroactive audit
//!   finding, distinct from an ordinary submission rejection.
//! - **Preconfirmation violation**: a provider validly signed a hash that
//!   was preconfirmed and then lost the finalization race at its height.
//!
//! Detection and penalty application are separate steps: detectors park
//! evidence in the engine's pending pool; stake is only written down when
//! a slashing proof is submitted, and each (provider, reason,
//! evidence-hash) is consumed at most once.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod engine;
pub mod evidence;

pub use engine::{FinalizedHistory, PendingViolation, SlashOutcome, SlashingEngine};
pub use evidence::{SlashingProof, SlashingReason, ViolationEvidence};

use alloy_primitives::Address;
use holdfast_stake::StakeError;
use thiserror::Error;

/// Slashing errors
#[derive(Debug, Error)]
pub enum SlashingError {
    /// Evidence does not establish the claimed violation
    #[error("slashing proof insufficient: {reason}")]
    ProofInsufficient {
        /// What the evidence failed to establish
        reason: String,
    },

    /// This exact evidence was already consumed
    #[error("provider {provider} already slashed for this evidence")]
    AlreadySlashed {
        /// Previously slashed provider
        provider: Address,
    },

    /// Ledger-side failure while applying the penalty
    #[error(transparent)]
    Stake(#[from] StakeError),
}
