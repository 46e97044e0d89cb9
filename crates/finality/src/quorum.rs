//! Weighted quorum tracking per (height, block hash)

use alloy_primitives::{Address, B256};
use holdfast_chainspec::FinalityParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::BlockSignature;

/// Why a signature was stored for the record only, without power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordedReason {
    /// The block already finalized; its quorum record is immutable
    RecordFrozen,
    /// Delivered after the quorum collection deadline
    PastDeadline,
}

/// Outcome of offering a signature to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// Counted toward quorum
    Accepted {
        /// Accumulated power after this signature
        accumulated: u64,
        /// Snapshot threshold for this record
        threshold: u64,
        /// True exactly once, on the signature that crosses the threshold
        quorum_crossed: bool,
    },
    /// Exact (provider, height, hash) was already accepted; no state change
    Duplicate,
    /// Stored for audit only, no power contribution
    Recorded(RecordedReason),
}

/// Per-block signature set and running power.
///
/// The total active power and the derived threshold are snapshotted at the
/// first accepted signature and never move for the record's lifetime.
#[derive(Debug, Clone)]
pub struct QuorumRecord {
    /// Block height
    pub height: u64,
    /// Block hash
    pub block_hash: B256,
    signatures: HashMap<Address, BlockSignature>,
    /// Sum of contributing voting power
    pub accumulated: u64,
    /// Total active power at first acceptance
    pub snapshot_total: u64,
    /// Power required for quorum, fixed at first acceptance
    pub threshold: u64,
    /// Set once the block finalized; accepts record-only signatures after
    pub frozen: bool,
    quorum_signalled: bool,
    record_only: Vec<(BlockSignature, RecordedReason)>,
}

impl QuorumRecord {
    fn new(height: u64, block_hash: B256) -> Self {
        Self {
            height,
            block_hash,
            signatures: HashMap::new(),
            accumulated: 0,
            snapshot_total: 0,
            threshold: 0,
            frozen: false,
            quorum_signalled: false,
            record_only: Vec::new(),
        }
    }

    /// The accepted signature from `provider`, if any
    pub fn accepted(&self, provider: &Address) -> Option<&BlockSignature> {
        self.signatures.get(provider)
    }

    /// Providers with accepted signatures
    pub fn signers(&self) -> Vec<Address> {
        self.signatures.keys().copied().collect()
    }

    /// Number of accepted signatures
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Whether no signature was accepted yet
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Signatures kept for audit without power contribution
    pub fn record_only(&self) -> &[(BlockSignature, RecordedReason)] {
        &self.record_only
    }
}

/// Read-only quorum projection for the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumStatus {
    /// Whether accumulated power meets the snapshot threshold
    pub reached: bool,
    /// Accumulated contributing power
    pub power: u64,
    /// Snapshot threshold power
    pub threshold: u64,
    /// Number of accepted signatures
    pub signatures: usize,
}

/// Collects signatures and computes weighted quorum per block.
#[derive(Debug)]
pub struct QuorumTracker {
    params: FinalityParams,
    records: HashMap<(u64, B256), QuorumRecord>,
}

impl QuorumTracker {
    /// Empty tracker for the given parameters
    pub fn new(params: FinalityParams) -> Self {
        Self {
            params,
            records: HashMap::new(),
        }
    }

    /// Offer a signature that already passed the power, crypto and
    /// equivocation gates.
    ///
    /// `power` is the provider's voting power at the signature timestamp,
    /// `total_active` the ledger total at the same instant; the latter is
    /// only read on the record's first acceptance, for the snapshot.
    /// `past_deadline` marks delivery after the quorum collection window.
    pub fn accept(
        &mut self,
        signature: BlockSignature,
        power: u64,
        total_active: u64,
        past_deadline: bool,
    ) -> Acceptance {
        let key = (signature.height, signature.block_hash);
        let record = self
            .records
            .entry(key)
            .or_insert_with(|| QuorumRecord::new(signature.height, signature.block_hash));

        if record.frozen {
            record
                .record_only
                .push((signature, RecordedReason::RecordFrozen));
            return Acceptance::Recorded(RecordedReason::RecordFrozen);
        }
        if past_deadline {
            record
                .record_only
                .push((signature, RecordedReason::PastDeadline));
            return Acceptance::Recorded(RecordedReason::PastDeadline);
        }
        if record.signatures.contains_key(&signature.provider) {
            return Acceptance::Duplicate;
        }

        if record.is_empty() {
            record.snapshot_total = total_active;
            record.threshold = self.params.quorum_power(total_active);
            debug!(
                target: "holdfast::finality",
                height = record.height,
                hash = %record.block_hash,
                total = total_active,
                threshold = record.threshold,
                "Quorum snapshot taken"
            );
        }

        let provider = signature.provider;
        record.signatures.insert(provider, signature);
        record.accumulated = record.accumulated.saturating_add(power);

        let quorum_crossed =
            !record.quorum_signalled && record.accumulated >= record.threshold;
        if quorum_crossed {
            record.quorum_signalled = true;
            info!(
                target: "holdfast::finality",
                height = record.height,
                hash = %record.block_hash,
                power = record.accumulated,
                threshold = record.threshold,
                "Quorum reached"
            );
        }

        Acceptance::Accepted {
            accumulated: record.accumulated,
            threshold: record.threshold,
            quorum_crossed,
        }
    }

    /// Quorum projection for a block; zeroes when no record exists
    pub fn quorum_status(&self, height: u64, block_hash: &B256) -> QuorumStatus {
        match self.records.get(&(height, *block_hash)) {
            Some(r) => QuorumStatus {
                reached: r.quorum_signalled,
                power: r.accumulated,
                threshold: r.threshold,
                signatures: r.len(),
            },
            None => QuorumStatus {
                reached: false,
                power: 0,
                threshold: 0,
                signatures: 0,
            },
        }
    }

    /// Full record for a block
    pub fn record(&self, height: u64, block_hash: &B256) -> Option<&QuorumRecord> {
        self.records.get(&(height, *block_hash))
    }

    /// The accepted signature for (height, hash, provider), if any
    pub fn accepted_signature(
        &self,
        height: u64,
        block_hash: &B256,
        provider: &Address,
    ) -> Option<&BlockSignature> {
        self.records
            .get(&(height, *block_hash))
            .and_then(|r| r.accepted(provider))
    }

    /// Providers with accepted signatures for a block
    pub fn signers(&self, height: u64, block_hash: &B256) -> Vec<Address> {
        self.records
            .get(&(height, *block_hash))
            .map(QuorumRecord::signers)
            .unwrap_or_default()
    }

    /// Freeze a record after its block finalized; later signatures are
    /// stored record-only.
    pub fn freeze(&mut self, height: u64, block_hash: &B256) {
        if let Some(record) = self.records.get_mut(&(height, *block_hash)) {
            record.frozen = true;
        }
    }

    /// Drop frozen records below `cutoff` height.
    ///
    /// Open records are kept regardless; the caller derives the cutoff from
    /// the finalized tip and the reorg horizon.
    pub fn prune_finalized_below(&mut self, cutoff: u64) {
        self.records
            .retain(|(height, _), record| !record.frozen || *height >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn test_params() -> FinalityParams {
        FinalityParams::default()
    }

    fn sig(provider_byte: u8, height: u64, hash: B256) -> BlockSignature {
        BlockSignature {
            height,
            block_hash: hash,
            provider: Address::repeat_byte(provider_byte),
            signature: crate::CompactSignature::ZERO,
            timestamp: 100,
        }
    }

    #[test]
    fn test_threshold_snapshot_at_first_acceptance() {
        let mut tracker = QuorumTracker::new(test_params());
        let hash = B256::repeat_byte(1);

        // Total 100 at first acceptance: threshold 66, forever.
        let first = tracker.accept(sig(1, 10, hash), 65, 100, false);
        assert_matches!(
            first,
            Acceptance::Accepted { accumulated: 65, threshold: 66, quorum_crossed: false }
        );

        // The total shrank to 10 meanwhile; the snapshot does not move.
        let second = tracker.accept(sig(2, 10, hash), 1, 10, false);
        assert_matches!(
            second,
            Acceptance::Accepted { accumulated: 66, threshold: 66, quorum_crossed: true }
        );
    }

    #[test]
    fn test_quorum_not_reached_at_65_of_100() {
        let mut tracker = QuorumTracker::new(test_params());
        let hash = B256::repeat_byte(1);

        tracker.accept(sig(1, 10, hash), 65, 100, false);
        let status = tracker.quorum_status(10, &hash);
        assert!(!status.reached);
        assert_eq!(status.power, 65);
        assert_eq!(status.threshold, 66);
    }

    #[test]
    fn test_quorum_signal_fires_once() {
        let mut tracker = QuorumTracker::new(test_params());
        let hash = B256::repeat_byte(1);

        tracker.accept(sig(1, 10, hash), 70, 100, false);
        let late = tracker.accept(sig(2, 10, hash), 10, 100, false);
        // Already signalled; no second transition signal.
        assert_matches!(late, Acceptance::Accepted { quorum_crossed: false, .. });
        assert!(tracker.quorum_status(10, &hash).reached);
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let mut tracker = QuorumTracker::new(test_params());
        let hash = B256::repeat_byte(1);

        tracker.accept(sig(1, 10, hash), 50, 100, false);
        let replay = tracker.accept(sig(1, 10, hash), 50, 100, false);
        assert_matches!(replay, Acceptance::Duplicate);
        // Power unchanged.
        assert_eq!(tracker.quorum_status(10, &hash).power, 50);
    }

    #[test]
    fn test_frozen_record_stores_without_power() {
        let mut tracker = QuorumTracker::new(test_params());
        let hash = B256::repeat_byte(1);

        tracker.accept(sig(1, 10, hash), 70, 100, false);
        tracker.freeze(10, &hash);

        let late = tracker.accept(sig(2, 10, hash), 30, 100, false);
        assert_matches!(late, Acceptance::Recorded(RecordedReason::RecordFrozen));
        assert_eq!(tracker.quorum_status(10, &hash).power, 70);
        assert_eq!(tracker.record(10, &hash).unwrap().record_only().len(), 1);
    }

    #[test]
    fn test_past_deadline_stores_without_power() {
        let mut tracker = QuorumTracker::new(test_params());
        let hash = B256::repeat_byte(1);

        let late = tracker.accept(sig(1, 10, hash), 70, 100, true);
        assert_matches!(late, Acceptance::Recorded(RecordedReason::PastDeadline));
        assert_eq!(tracker.quorum_status(10, &hash).power, 0);
    }

    #[test]
    fn test_prune_keeps_open_records() {
        let mut tracker = QuorumTracker::new(test_params());
        let finalized = B256::repeat_byte(1);
        let open = B256::repeat_byte(2);

        tracker.accept(sig(1, 5, finalized), 70, 100, false);
        tracker.freeze(5, &finalized);
        tracker.accept(sig(1, 6, open), 10, 100, false);

        tracker.prune_finalized_below(10);
        assert!(tracker.record(5, &finalized).is_none());
        assert!(tracker.record(6, &open).is_some());
    }

    proptest::proptest! {
        /// Quorum is reached exactly when accumulated power meets the
        /// ceiling of the snapshot fraction, for any split of the total.
        #[test]
        fn prop_quorum_iff_threshold_met(total in 1u64..1_000_000, first_share in 0u64..=100) {
            let mut tracker = QuorumTracker::new(test_params());
            let hash = B256::repeat_byte(1);
            let threshold = test_params().quorum_power(total);

            let first_power = total * first_share / 100;
            let rest = total - first_power;

            let a = tracker.accept(sig(1, 1, hash), first_power, total, false);
            if let Acceptance::Accepted { quorum_crossed, .. } = a {
                proptest::prop_assert_eq!(quorum_crossed, first_power >= threshold);
            }
            let b = tracker.accept(sig(2, 1, hash), rest, total, false);
            if let Acceptance::Accepted { accumulated, quorum_crossed, .. } = b {
                proptest::prop_assert_eq!(accumulated, total);
                // The full total always meets any <=100% threshold.
                proptest::prop_assert_eq!(quorum_crossed, first_power < threshold);
            }
        }
    }
}
