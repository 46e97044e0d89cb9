//! Holdfast Finality Node
//!
//! Wires the stake ledger, quorum tracker, equivocation detector, block
//! lifecycle and slashing engine into one node. The node owns all core
//! state behind a single lock and exposes the operation surface the relay
//! and the query layer call into; the components themselves never see each
//! other except through the node.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod facts;
pub mod node;

pub use facts::{fact_channel, ExternalFact, FactReceiver, FactSender, FactWorker};
pub use node::{FinalityNode, SubmitOutcome};

use holdfast_finality::FinalityError;
use holdfast_lifecycle::LifecycleError;
use holdfast_slashing::SlashingError;
use holdfast_stake::StakeError;
use thiserror::Error;

/// Node-level errors, one variant per component boundary
#[derive(Debug, Error)]
pub enum NodeError {
    /// Stake ledger failure
    #[error(transparent)]
    Stake(#[from] StakeError),

    /// Finality layer failure
    #[error(transparent)]
    Finality(#[from] FinalityError),

    /// Slashing engine failure
    #[error(transparent)]
    Slashing(#[from] SlashingError),

    /// Block lifecycle failure
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
