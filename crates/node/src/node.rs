//! The finality node

use alloy_primitives::{Address, B256};
use holdfast_chainspec::FinalityParams;
use holdfast_finality::{
    Acceptance, BlockSignature, EquivocationLog, EquivocationVerdict, FinalityError, QuorumStatus,
    QuorumTracker, RecordedReason,
};
use holdfast_lifecycle::{BlockLifecycle, FinalizeOutcome, PreconfStatus};
use holdfast_slashing::{
    FinalizedHistory, PendingViolation, SlashOutcome, SlashingEngine, SlashingProof,
    ViolationEvidence,
};
use holdfast_stake::{
    ProofVerifier, SpvOracle, StakeId, StakeLedger, StakeProof, StakingStatus, WithdrawTicket,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::NodeError;

/// Outcome of a signature submission, as reported to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitOutcome {
    /// Counted toward quorum
    Accepted {
        /// Accumulated power for the block after this signature
        accumulated: u64,
        /// Snapshot quorum threshold for the block
        threshold: u64,
        /// Whether the block has quorum after this signature
        quorum_reached: bool,
        /// Whether this submission finalized the block
        finalized: bool,
    },
    /// Replayed (provider, height, hash); no state change
    Duplicate,
    /// Stored for the record only, without power
    Recorded(RecordedReason),
    /// Conflicting signature; evidence parked for slashing, no quorum
    /// contribution
    EquivocationDetected,
}

/// All mutable core state, behind the node's single lock.
#[derive(Debug)]
struct CoreState {
    ledger: StakeLedger,
    verifier: ProofVerifier,
    tracker: QuorumTracker,
    detector: EquivocationLog,
    engine: SlashingEngine,
    lifecycle: BlockLifecycle,
}

/// Read adapter from the lifecycle to the slashing engine's history view.
struct HistoryView<'a>(&'a BlockLifecycle);

impl FinalizedHistory for HistoryView<'_> {
    fn finalized_hash(&self, height: u64) -> Option<B256> {
        self.0.finalized_hash(height)
    }

    fn was_preconfirmed(&self, height: u64, hash: &B256) -> bool {
        self.0.was_preconfirmed(height, hash)
    }
}

/// The Holdfast finality node.
///
/// Owns every component of the gadget and runs the submission pipeline:
/// power gate, signature verification, equivocation check, quorum
/// accounting, then the lifecycle transitions those facts enable. All
/// methods take `&self`; interior state lives behind one write lock so a
/// submission and its follow-on transitions are a single atomic step.
#[derive(Debug)]
pub struct FinalityNode {
    params: FinalityParams,
    state: RwLock<CoreState>,
}

impl FinalityNode {
    /// Node with empty state for the given parameters
    pub fn new(params: FinalityParams) -> Self {
        let state = CoreState {
            ledger: StakeLedger::new(params.clone()),
            verifier: ProofVerifier::new(params.clone()),
            tracker: QuorumTracker::new(params.clone()),
            detector: EquivocationLog::new(),
            engine: SlashingEngine::new(params.clone()),
            lifecycle: BlockLifecycle::new(params.clone()),
        };
        Self {
            params,
            state: RwLock::new(state),
        }
    }

    /// Verify a stake proof against the SPV oracle and register it.
    pub fn register_stake(
        &self,
        proof: &StakeProof,
        oracle: &dyn SpvOracle,
    ) -> Result<StakeId, NodeError> {
        let mut state = self.state.write();
        let CoreState { ledger, verifier, .. } = &mut *state;
        let verified = verifier.verify(proof, oracle)?;
        Ok(ledger.register_stake(verified)?)
    }

    /// Release free balance for withdrawal
    pub fn request_withdraw(
        &self,
        provider: &Address,
        amount: u64,
        now: u64,
    ) -> Result<WithdrawTicket, NodeError> {
        Ok(self.state.write().ledger.request_withdraw(provider, amount, now)?)
    }

    /// Track a proposed block.
    ///
    /// Signatures and attestations may outrun the proposal through the
    /// relay, so a fresh proposal immediately re-evaluates the transitions
    /// any already-collected quorum enables.
    pub fn propose_block(&self, height: u64, hash: B256, now: u64) -> Result<bool, NodeError> {
        let mut state = self.state.write();
        let CoreState { tracker, engine, lifecycle, .. } = &mut *state;

        let fresh = lifecycle.propose(height, hash, now)?;

        // Record-only signatures carry no power and take no snapshot; a
        // record without accepted signatures enables no transition.
        if let Some(record) = tracker.record(height, &hash).filter(|r| !r.is_empty()) {
            let accumulated = record.accumulated;
            let preconf_threshold = self.params.preconf_power(record.snapshot_total);
            lifecycle.check_preconfirmation(height, hash, accumulated, preconf_threshold, now)?;
            finalize_if_ready(tracker, engine, lifecycle, height, hash, now)?;
        }
        Ok(fresh)
    }

    /// Run a finality signature through the submission pipeline.
    ///
    /// `now` is the delivery clock, used for the preconfirmation window and
    /// the quorum collection deadline; voting power is read at the
    /// signature's own timestamp.
    pub fn submit_signature(
        &self,
        signature: BlockSignature,
        now: u64,
    ) -> Result<SubmitOutcome, NodeError> {
        let mut state = self.state.write();
        let CoreState { ledger, tracker, detector, engine, lifecycle, .. } = &mut *state;

        let provider = signature.provider;
        let power = ledger.voting_power(&provider, signature.timestamp);
        if power == 0 {
            return Err(FinalityError::UnknownProvider {
                provider,
                at: signature.timestamp,
            }
            .into());
        }
        let key = ledger.verifying_key(&provider).ok_or(FinalityError::UnknownProvider {
            provider,
            at: signature.timestamp,
        })?;
        if !signature.verify(&key) {
            return Err(FinalityError::SignatureInvalid {
                provider,
                height: signature.height,
            }
            .into());
        }

        if let EquivocationVerdict::Equivocation(evidence) = detector.check_and_record(&signature)
        {
            engine.note_violation(ViolationEvidence::Equivocation(*evidence));
            return Ok(SubmitOutcome::EquivocationDetected);
        }

        let height = signature.height;
        let hash = signature.block_hash;
        // Unknown blocks have no proposal clock; their signatures collect
        // without a deadline until the proposal arrives.
        let past_deadline = lifecycle
            .proposed_at(height, &hash)
            .is_some_and(|proposed| now > proposed.saturating_add(self.params.signature_timeout));
        let total = ledger.total_active_power(signature.timestamp);

        match tracker.accept(signature, power, total, past_deadline) {
            Acceptance::Accepted { accumulated, threshold, quorum_crossed } => {
                let mut finalized = false;
                let tracked =
                    lifecycle.proposed_at(height, &hash).is_some() && !lifecycle.is_halted(height);
                if tracked {
                    let snapshot = tracker
                        .record(height, &hash)
                        .map(|r| r.snapshot_total)
                        .unwrap_or_default();
                    let preconf_threshold = self.params.preconf_power(snapshot);
                    lifecycle.check_preconfirmation(
                        height,
                        hash,
                        accumulated,
                        preconf_threshold,
                        now,
                    )?;
                    // Finalization only sweeps the signers present at the
                    // time; a later backer of a preconfirmed-stale sibling
                    // is caught here.
                    if let Some(winner) = lifecycle.finalized_hash(height).filter(|w| *w != hash) {
                        if lifecycle.was_preconfirmed(height, &hash) {
                            if let Some(sig) = tracker.accepted_signature(height, &hash, &provider)
                            {
                                engine.note_violation(
                                    ViolationEvidence::PreconfirmationViolation {
                                        preconf: sig.clone(),
                                        finalized_hash: winner,
                                    },
                                );
                            }
                        }
                    }
                    if quorum_crossed {
                        let outcome =
                            finalize_if_ready(tracker, engine, lifecycle, height, hash, now)?;
                        finalized = matches!(outcome, FinalizeOutcome::Finalized { .. });
                    }
                }
                let quorum_reached =
                    quorum_crossed || tracker.quorum_status(height, &hash).reached;
                Ok(SubmitOutcome::Accepted {
                    accumulated,
                    threshold,
                    quorum_reached,
                    finalized,
                })
            }
            Acceptance::Duplicate => Ok(SubmitOutcome::Duplicate),
            Acceptance::Recorded(reason) => Ok(SubmitOutcome::Recorded(reason)),
        }
    }

    /// Record a state-bridge attestation and finalize the block when
    /// quorum is already in place.
    ///
    /// An attestation for a block no proposal has reached us for yet is
    /// retained and reports `QuorumPending`; the transition re-runs once
    /// the proposal arrives.
    pub fn submit_attestation(
        &self,
        height: u64,
        hash: B256,
        now: u64,
    ) -> Result<FinalizeOutcome, NodeError> {
        let mut state = self.state.write();
        let CoreState { tracker, engine, lifecycle, .. } = &mut *state;

        lifecycle.submit_attestation(height, hash);
        if lifecycle.proposed_at(height, &hash).is_none() {
            debug!(
                target: "holdfast::node",
                height, %hash,
                "Attestation ahead of proposal, retained"
            );
            return Ok(FinalizeOutcome::QuorumPending);
        }
        finalize_if_ready(tracker, engine, lifecycle, height, hash, now)
    }

    /// Validate a slashing proof and apply the penalty
    pub fn submit_slashing_proof(
        &self,
        proof: &SlashingProof,
    ) -> Result<SlashOutcome, NodeError> {
        let mut state = self.state.write();
        let CoreState { ledger, tracker, engine, lifecycle, .. } = &mut *state;
        Ok(engine.submit(proof, ledger, tracker, &HistoryView(lifecycle))?)
    }

    /// Provider ledger projection
    pub fn staking_status(&self, provider: &Address) -> Option<StakingStatus> {
        self.state.read().ledger.staking_status(provider)
    }

    /// A provider's voting power at time `at`
    pub fn voting_power(&self, provider: &Address, at: u64) -> u64 {
        self.state.read().ledger.voting_power(provider, at)
    }

    /// Total active voting power at time `at`
    pub fn total_active_power(&self, at: u64) -> u64 {
        self.state.read().ledger.total_active_power(at)
    }

    /// Quorum projection for a block
    pub fn signature_quorum(&self, height: u64, hash: &B256) -> QuorumStatus {
        self.state.read().tracker.quorum_status(height, hash)
    }

    /// Lifecycle projection for a block
    pub fn preconfirmation_status(&self, height: u64, hash: &B256) -> Option<PreconfStatus> {
        self.state.read().lifecycle.status(height, hash)
    }

    /// Detected violations awaiting a slashing proof
    pub fn pending_violations(&self) -> Vec<PendingViolation> {
        self.state.read().engine.pending_violations().to_vec()
    }

    /// The finalized hash at a height, if any
    pub fn finalized_hash(&self, height: u64) -> Option<B256> {
        self.state.read().lifecycle.finalized_hash(height)
    }

    /// The highest finalized (height, hash)
    pub fn latest_finalized(&self) -> Option<(u64, B256)> {
        self.state.read().lifecycle.latest_finalized()
    }

    /// Drop finalized tracking state deeper than the reorg horizon below
    /// the finalized tip. Open quorum records, the finalized index, halted
    /// heights and the detector history are all retained.
    pub fn prune(&self) {
        let mut state = self.state.write();
        let Some((tip, _)) = state.lifecycle.latest_finalized() else {
            return;
        };
        let cutoff = tip.saturating_sub(self.params.max_reorg_depth);
        state.tracker.prune_finalized_below(cutoff);
        state.lifecycle.prune_below(cutoff);
        debug!(target: "holdfast::node", cutoff, "Pruned finalized tracking state");
    }
}

/// Attempt the finalization transition and its follow-on effects.
///
/// On success the quorum record freezes and every accepted signer of a
/// now-stale sibling gets preconfirmation-violation evidence parked in the
/// slashing engine.
fn finalize_if_ready(
    tracker: &mut QuorumTracker,
    engine: &mut SlashingEngine,
    lifecycle: &mut BlockLifecycle,
    height: u64,
    hash: B256,
    now: u64,
) -> Result<FinalizeOutcome, NodeError> {
    let reached = tracker.quorum_status(height, &hash).reached;
    let outcome = lifecycle.try_finalize(height, hash, reached, now)?;

    if let FinalizeOutcome::Finalized { stale_siblings } = &outcome {
        tracker.freeze(height, &hash);
        for sibling in stale_siblings {
            for signer in tracker.signers(height, sibling) {
                if let Some(sig) = tracker.accepted_signature(height, sibling, &signer) {
                    engine.note_violation(ViolationEvidence::PreconfirmationViolation {
                        preconf: sig.clone(),
                        finalized_hash: hash,
                    });
                }
            }
        }
        info!(
            target: "holdfast::node",
            height, %hash,
            stale = stale_siblings.len(),
            "Block finalized"
        );
    }
    Ok(outcome)
}
