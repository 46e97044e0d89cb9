//! Holdfast Finality Layer
//!
//! Collects finality-provider signatures over rollup block hashes and
//! computes the stake-weighted quorum that finalizes a block.
//!
//! # Submission pipeline
//!
//! ```text
//! signature arrives
//!   1. provider must have voting power at the signature timestamp
//!   2. ECDSA verification against the registered key
//!   3. equivocation check: a second hash at the same height is evidence,
//!      not a quorum contribution
//!   4. replayed (provider, height, hash) is an idempotent duplicate
//!   5. otherwise accepted; accumulated power grows by the provider's
//!      voting power at the signature timestamp
//! ```
//!
//! The quorum threshold for a block is snapshotted from the total active
//! power at the first accepted signature, so a late stake change can never
//! retroactively flip a block that already had quorum.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod equivocation;
pub mod quorum;
pub mod signature;

pub use equivocation::{EquivocationEvidence, EquivocationLog, EquivocationVerdict};
pub use quorum::{Acceptance, QuorumRecord, QuorumStatus, QuorumTracker, RecordedReason};
pub use signature::{signing_message, BlockSignature, CompactSignature};

use alloy_primitives::Address;
use thiserror::Error;

/// Finality layer errors
#[derive(Debug, Error)]
pub enum FinalityError {
    /// Submitter has no voting power at the signature timestamp
    #[error("provider {provider} has no voting power at {at}")]
    UnknownProvider {
        /// Submitting provider
        provider: Address,
        /// Signature timestamp, unix seconds
        at: u64,
    },

    /// Signature failed cryptographic verification
    #[error("invalid signature from {provider} at height {height}")]
    SignatureInvalid {
        /// Submitting provider
        provider: Address,
        /// Signed height
        height: u64,
    },

    /// Underlying ECDSA failure while producing a signature
    #[error("signature crypto failure: {0}")]
    Crypto(#[from] k256::ecdsa::Error),
}
