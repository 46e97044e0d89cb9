//! Holdfast Block Lifecycle
//!
//! Governs the per-(height, hash) phase machine:
//!
//! ```text
//! Proposed → Preconfirmed → Finalized
//! ```
//!
//! Strictly forward. The fast-ack transition to `Preconfirmed` fires when
//! signed power crosses the preconfirmation threshold inside the
//! preconfirmation window; finalization requires full quorum plus the
//! external state-bridge attestation. Exactly one hash finalizes per
//! height; competing preconfirmed hashes become terminally stale, which
//! feeds preconfirmation-violation slashing eligibility.
//!
//! Deadlines are caller-clock checks: a check past its window returns a
//! soft, state-unchanged outcome, never an abort.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use alloy_primitives::B256;
use holdfast_chainspec::FinalityParams;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, error, info};

/// Phase of a block in the finality pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockPhase {
    /// Proposed, no threshold crossed yet
    Proposed,
    /// Fast-ack issued on partial power
    Preconfirmed,
    /// Quorum plus attestation; irreversible
    Finalized,
}

impl BlockPhase {
    /// Short name for logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Preconfirmed => "preconfirmed",
            Self::Finalized => "finalized",
        }
    }
}

/// Outcome of a preconfirmation check. All variants are soft; state only
/// changes on `Preconfirmed` (phase advance) and `Superseded` (stale
/// marking).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconfOutcome {
    /// Threshold crossed inside the window; phase advanced
    Preconfirmed,
    /// Already at or past `Preconfirmed`
    AlreadyPreconfirmed,
    /// Window still open but power below the threshold; retryable
    BelowThreshold {
        /// Accumulated power
        power: u64,
        /// Required preconfirmation power
        threshold: u64,
    },
    /// Window elapsed without the threshold; the block stays `Proposed`
    WindowElapsed,
    /// A different hash finalized this height; the block is terminally
    /// stale and never earns the fast-ack
    Superseded {
        /// The finalized hash
        by: B256,
    },
}

/// Outcome of a finalization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The block finalized now
    Finalized {
        /// Sibling hashes that were preconfirmed and are now terminally
        /// stale
        stale_siblings: Vec<B256>,
    },
    /// This hash already finalized at this height
    AlreadyFinalized,
    /// A different hash won this height; this block never advances
    Superseded {
        /// The finalized hash
        by: B256,
    },
    /// Quorum not yet reported; retryable
    QuorumPending,
    /// Waiting for the external state-bridge attestation; retryable
    AttestationPending,
}

/// Lifecycle errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// The height hit an invariant breach and is halted
    #[error("height {height} is halted after an invariant breach")]
    HeightHalted {
        /// Halted height
        height: u64,
    },

    /// No such block was proposed
    #[error("block {hash} at height {height} is not tracked")]
    UnknownBlock {
        /// Requested height
        height: u64,
        /// Requested hash
        hash: B256,
    },

    /// Two hashes finalized at one height; core corruption
    #[error("finality conflict at height {height}: {finalized} vs {conflicting}")]
    FinalityConflict {
        /// Affected height
        height: u64,
        /// Hash recorded as finalized
        finalized: B256,
        /// Second hash that attempted finalization
        conflicting: B256,
    },
}

/// Idempotent store of external state-bridge attestations.
///
/// The bridge collaborator reports a boolean "state root attested" fact
/// per (height, hash); re-delivery is harmless.
#[derive(Debug, Default)]
pub struct AttestationBook {
    attested: HashSet<(u64, B256)>,
}

impl AttestationBook {
    /// Record an attestation; returns false when already known
    pub fn submit(&mut self, height: u64, hash: B256) -> bool {
        self.attested.insert((height, hash))
    }

    /// Whether (height, hash) is attested
    pub fn contains(&self, height: u64, hash: &B256) -> bool {
        self.attested.contains(&(height, *hash))
    }
}

/// A tracked block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedBlock {
    /// Block height
    pub height: u64,
    /// Block hash
    pub hash: B256,
    /// Current phase
    pub phase: BlockPhase,
    /// Proposal time, unix seconds
    pub proposed_at: u64,
    /// When the fast-ack fired, if it did
    pub preconfirmed_at: Option<u64>,
    /// When the block finalized, if it did
    pub finalized_at: Option<u64>,
    /// Preconfirmed but lost the finalization race
    pub stale: bool,
}

/// Read-only projection for the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreconfStatus {
    /// Block height
    pub height: u64,
    /// Block hash
    pub hash: B256,
    /// Current phase
    pub phase: BlockPhase,
    /// Terminally stale preconfirmation
    pub stale: bool,
    /// State-bridge attestation present
    pub attested: bool,
}

/// The per-block phase machine. Exclusive owner of block state; reads
/// quorum facts as caller-supplied arguments, never mutates them.
#[derive(Debug)]
pub struct BlockLifecycle {
    params: FinalityParams,
    blocks: HashMap<(u64, B256), TrackedBlock>,
    /// One finalized hash per height, ever
    finalized: BTreeMap<u64, B256>,
    /// Heights frozen after an invariant breach; never pruned
    halted: BTreeSet<u64>,
    attestations: AttestationBook,
}

impl BlockLifecycle {
    /// Empty lifecycle for the given parameters
    pub fn new(params: FinalityParams) -> Self {
        Self {
            params,
            blocks: HashMap::new(),
            finalized: BTreeMap::new(),
            halted: BTreeSet::new(),
            attestations: AttestationBook::default(),
        }
    }

    /// Track a proposed block. Idempotent; returns false when already
    /// tracked.
    pub fn propose(&mut self, height: u64, hash: B256, now: u64) -> Result<bool, LifecycleError> {
        self.check_halted(height)?;
        if self.blocks.contains_key(&(height, hash)) {
            return Ok(false);
        }
        self.blocks.insert(
            (height, hash),
            TrackedBlock {
                height,
                hash,
                phase: BlockPhase::Proposed,
                proposed_at: now,
                preconfirmed_at: None,
                finalized_at: None,
                stale: false,
            },
        );
        debug!(target: "holdfast::lifecycle", height, %hash, "Block proposed");
        Ok(true)
    }

    /// Proposal time of a tracked block
    pub fn proposed_at(&self, height: u64, hash: &B256) -> Option<u64> {
        self.blocks.get(&(height, *hash)).map(|b| b.proposed_at)
    }

    /// Record a state-bridge attestation; idempotent
    pub fn submit_attestation(&mut self, height: u64, hash: B256) -> bool {
        self.attestations.submit(height, hash)
    }

    /// Whether (height, hash) carries an attestation
    pub fn attested(&self, height: u64, hash: &B256) -> bool {
        self.attestations.contains(height, hash)
    }

    /// Evaluate the fast-ack transition.
    ///
    /// `power` is the block's accumulated signed power, `threshold` the
    /// preconfirmation power derived from the quorum snapshot. The window
    /// is measured against the proposal time with the caller's clock.
    pub fn check_preconfirmation(
        &mut self,
        height: u64,
        hash: B256,
        power: u64,
        threshold: u64,
        now: u64,
    ) -> Result<PreconfOutcome, LifecycleError> {
        self.check_halted(height)?;
        let preconf_window = self.params.preconf_window;
        let winner = self.finalized.get(&height).copied();
        let block = self
            .blocks
            .get_mut(&(height, hash))
            .ok_or(LifecycleError::UnknownBlock { height, hash })?;

        if let Some(by) = winner.filter(|w| *w != hash) {
            block.stale = true;
            return Ok(PreconfOutcome::Superseded { by });
        }
        if block.phase >= BlockPhase::Preconfirmed {
            return Ok(PreconfOutcome::AlreadyPreconfirmed);
        }
        if now > block.proposed_at.saturating_add(preconf_window) {
            return Ok(PreconfOutcome::WindowElapsed);
        }
        if power < threshold {
            return Ok(PreconfOutcome::BelowThreshold { power, threshold });
        }

        block.phase = BlockPhase::Preconfirmed;
        block.preconfirmed_at = Some(now);
        info!(
            target: "holdfast::lifecycle",
            height, %hash, power, threshold,
            "Block preconfirmed"
        );
        Ok(PreconfOutcome::Preconfirmed)
    }

    /// Attempt the final transition.
    ///
    /// Requires the caller-reported quorum fact plus a stored attestation.
    /// A block that skipped the fast-ack passes through `Preconfirmed` in
    /// the same call — the preconfirmation window gates only the fast-ack,
    /// never finality.
    pub fn try_finalize(
        &mut self,
        height: u64,
        hash: B256,
        quorum_reached: bool,
        now: u64,
    ) -> Result<FinalizeOutcome, LifecycleError> {
        self.check_halted(height)?;
        if !self.blocks.contains_key(&(height, hash)) {
            return Err(LifecycleError::UnknownBlock { height, hash });
        }

        if let Some(winner) = self.finalized.get(&height) {
            if *winner == hash {
                return Ok(FinalizeOutcome::AlreadyFinalized);
            }
            let by = *winner;
            if let Some(block) = self.blocks.get_mut(&(height, hash)) {
                if block.phase == BlockPhase::Preconfirmed {
                    block.stale = true;
                }
            }
            return Ok(FinalizeOutcome::Superseded { by });
        }

        if !quorum_reached {
            return Ok(FinalizeOutcome::QuorumPending);
        }
        if !self.attestations.contains(height, &hash) {
            return Ok(FinalizeOutcome::AttestationPending);
        }

        // A sibling at Finalized without a finalized-index entry means the
        // core state is corrupt: halt the height.
        let sibling_finalized = self
            .blocks
            .iter()
            .find(|((h, k), b)| *h == height && **k != hash && b.phase == BlockPhase::Finalized)
            .map(|((_, k), _)| *k);
        if let Some(finalized) = sibling_finalized {
            self.halt(height);
            return Err(LifecycleError::FinalityConflict {
                height,
                finalized,
                conflicting: hash,
            });
        }

        let block = self
            .blocks
            .get_mut(&(height, hash))
            .ok_or(LifecycleError::UnknownBlock { height, hash })?;
        if block.phase == BlockPhase::Proposed {
            block.preconfirmed_at = Some(now);
        }
        block.phase = BlockPhase::Finalized;
        block.finalized_at = Some(now);
        self.finalized.insert(height, hash);

        let mut stale_siblings = Vec::new();
        for ((h, k), sibling) in &mut self.blocks {
            if *h == height && *k != hash && sibling.phase == BlockPhase::Preconfirmed {
                sibling.stale = true;
                stale_siblings.push(*k);
            }
        }

        info!(
            target: "holdfast::lifecycle",
            height, %hash,
            stale = stale_siblings.len(),
            "Block finalized"
        );
        Ok(FinalizeOutcome::Finalized { stale_siblings })
    }

    /// Freeze a height after an invariant breach; all further transitions
    /// for it are rejected.
    pub fn halt(&mut self, height: u64) {
        error!(
            target: "holdfast::lifecycle",
            height,
            "Invariant breach: halting height"
        );
        self.halted.insert(height);
    }

    /// Whether a height is halted
    pub fn is_halted(&self, height: u64) -> bool {
        self.halted.contains(&height)
    }

    fn check_halted(&self, height: u64) -> Result<(), LifecycleError> {
        if self.halted.contains(&height) {
            return Err(LifecycleError::HeightHalted { height });
        }
        Ok(())
    }

    /// The finalized hash at a height, if any
    pub fn finalized_hash(&self, height: u64) -> Option<B256> {
        self.finalized.get(&height).copied()
    }

    /// The highest finalized (height, hash)
    pub fn latest_finalized(&self) -> Option<(u64, B256)> {
        self.finalized
            .last_key_value()
            .map(|(height, hash)| (*height, *hash))
    }

    /// Whether `hash` ever reached `Preconfirmed` at `height`
    pub fn was_preconfirmed(&self, height: u64, hash: &B256) -> bool {
        self.blocks
            .get(&(height, *hash))
            .is_some_and(|b| b.preconfirmed_at.is_some())
    }

    /// Status projection for the query surface
    pub fn status(&self, height: u64, hash: &B256) -> Option<PreconfStatus> {
        self.blocks.get(&(height, *hash)).map(|b| PreconfStatus {
            height: b.height,
            hash: b.hash,
            phase: b.phase,
            stale: b.stale,
            attested: self.attestations.contains(height, hash),
        })
    }

    /// Drop tracked blocks below `cutoff` height.
    ///
    /// The finalized index and the halted set are retained: audit and
    /// duplicate-slash prevention need them.
    pub fn prune_below(&mut self, cutoff: u64) {
        self.blocks.retain(|(height, _), _| *height >= cutoff);
    }
}
