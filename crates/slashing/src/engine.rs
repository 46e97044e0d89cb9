//! Proof validation and penalty application

use alloy_primitives::{Address, B256};
use holdfast_chainspec::FinalityParams;
use holdfast_finality::QuorumTracker;
use holdfast_stake::{ProviderStatus, StakeLedger};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::{SlashingError, SlashingProof, SlashingReason, ViolationEvidence};

/// Read-only view of finalization history, implemented by the block
/// lifecycle owner. Needed to judge preconfirmation-violation evidence.
pub trait FinalizedHistory {
    /// The hash that finalized at `height`, if any
    fn finalized_hash(&self, height: u64) -> Option<B256>;

    /// Whether `hash` ever reached the preconfirmed phase at `height`
    fn was_preconfirmed(&self, height: u64, hash: &B256) -> bool;
}

/// Evidence detected but not yet acted on.
///
/// Penalties apply only through [`SlashingEngine::submit`]; the pool makes
/// detections observable so an operator or watchtower can turn them into
/// proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingViolation {
    /// Accused provider
    pub provider: Address,
    /// Violation class
    pub reason: SlashingReason,
    /// The evidence payload
    pub evidence: ViolationEvidence,
    /// Canonical evidence hash
    pub digest: B256,
}

/// Result of a successful slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashOutcome {
    /// Slashed provider
    pub provider: Address,
    /// Applied penalty in satoshis
    pub penalty: u64,
    /// Provider's remaining stake after the write-down
    pub remaining: u64,
    /// Provider status after the write-down
    pub status: ProviderStatus,
}

/// Validates slashing proofs and applies penalties through the ledger.
#[derive(Debug)]
pub struct SlashingEngine {
    params: FinalityParams,
    /// Consumed (provider, reason, evidence-hash) keys; never pruned
    consumed: HashSet<(Address, SlashingReason, B256)>,
    pending: Vec<PendingViolation>,
}

impl SlashingEngine {
    /// Empty engine for the given parameters
    pub fn new(params: FinalityParams) -> Self {
        Self {
            params,
            consumed: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Park detected evidence in the pending pool.
    ///
    /// Deduplicated against both the pool and already-consumed evidence;
    /// detection never applies a penalty by itself.
    pub fn note_violation(&mut self, evidence: ViolationEvidence) {
        let digest = evidence.digest();
        let provider = evidence.provider();
        let reason = evidence.reason();

        if self.consumed.contains(&(provider, reason, digest))
            || self.pending.iter().any(|p| p.digest == digest)
        {
            return;
        }

        info!(
            target: "holdfast::slashing",
            provider = %provider,
            reason = reason.as_str(),
            digest = %digest,
            "Violation evidence recorded"
        );

        self.pending.push(PendingViolation {
            provider,
            reason,
            evidence,
            digest,
        });
    }

    /// Evidence awaiting a slashing proof
    pub fn pending_violations(&self) -> &[PendingViolation] {
        &self.pending
    }

    /// Validate a proof and apply the penalty.
    ///
    /// Rejects duplicates keyed by (provider, reason, evidence-hash) with
    /// `AlreadySlashed`; on success writes the stake down via the ledger,
    /// which also demotes the provider when it falls below the minimum.
    pub fn submit(
        &mut self,
        proof: &SlashingProof,
        ledger: &mut StakeLedger,
        tracker: &QuorumTracker,
        history: &dyn FinalizedHistory,
    ) -> Result<SlashOutcome, SlashingError> {
        let digest = proof.evidence.digest();
        let reason = proof.reason();
        let key = (proof.provider, reason, digest);

        if self.consumed.contains(&key) {
            return Err(SlashingError::AlreadySlashed {
                provider: proof.provider,
            });
        }
        if proof.provider != proof.evidence.provider() {
            return Err(SlashingError::ProofInsufficient {
                reason: "accused provider does not match the evidence".to_string(),
            });
        }

        self.validate_evidence(&proof.evidence, ledger, tracker, history)?;

        let penalty = self.params.slash_amount;
        let remaining = ledger.apply_slash(&proof.provider, penalty, proof.timestamp)?;
        let status = ledger
            .provider(&proof.provider)
            .map(|p| p.status)
            .unwrap_or(ProviderStatus::Slashed);

        self.consumed.insert(key);
        self.pending.retain(|p| p.digest != digest);

        warn!(
            target: "holdfast::slashing",
            provider = %proof.provider,
            reason = reason.as_str(),
            penalty,
            remaining,
            "Provider slashed"
        );

        Ok(SlashOutcome {
            provider: proof.provider,
            penalty,
            remaining,
            status,
        })
    }

    fn validate_evidence(
        &self,
        evidence: &ViolationEvidence,
        ledger: &StakeLedger,
        tracker: &QuorumTracker,
        history: &dyn FinalizedHistory,
    ) -> Result<(), SlashingError> {
        let provider = evidence.provider();
        let key = ledger.verifying_key(&provider).ok_or_else(|| {
            SlashingError::ProofInsufficient {
                reason: format!("no registered key for provider {provider}"),
            }
        })?;

        match evidence {
            ViolationEvidence::Equivocation(ev) => {
                if ev.first.provider != provider || ev.second.provider != provider {
                    return Err(insufficient("signatures are not from the accused provider"));
                }
                if ev.first.height != ev.height || ev.second.height != ev.height {
                    return Err(insufficient("signature heights do not match the evidence"));
                }
                if ev.first.block_hash == ev.second.block_hash {
                    return Err(insufficient("signatures do not conflict"));
                }
                if !ev.first.verify(&key) || !ev.second.verify(&key) {
                    return Err(insufficient("a conflicting signature fails verification"));
                }
                Ok(())
            }
            ViolationEvidence::InvalidSignature { accepted } => {
                let recorded = tracker
                    .accepted_signature(accepted.height, &accepted.block_hash, &provider)
                    .ok_or_else(|| insufficient("signature was never accepted into a quorum"))?;
                if recorded != accepted {
                    return Err(insufficient("signature differs from the accepted record"));
                }
                // An accepted signature that verifies is not a violation.
                if accepted.verify(&key) {
                    return Err(insufficient("accepted signature verifies correctly"));
                }
                Ok(())
            }
            ViolationEvidence::PreconfirmationViolation { preconf, finalized_hash } => {
                if !preconf.verify(&key) {
                    return Err(insufficient("preconfirmation signature fails verification"));
                }
                let winner = history
                    .finalized_hash(preconf.height)
                    .ok_or_else(|| insufficient("no block finalized at the claimed height"))?;
                if winner != *finalized_hash {
                    return Err(insufficient("claimed winner is not the finalized hash"));
                }
                if winner == preconf.block_hash {
                    return Err(insufficient("signed hash is the finalized hash"));
                }
                if !history.was_preconfirmed(preconf.height, &preconf.block_hash) {
                    return Err(insufficient("signed hash was never preconfirmed"));
                }
                Ok(())
            }
        }
    }
}

fn insufficient(reason: &str) -> SlashingError {
    SlashingError::ProofInsufficient {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use holdfast_finality::{Acceptance, BlockSignature, CompactSignature, EquivocationEvidence};
    use holdfast_stake::{CompressedPubkey, VerifiedStake};
    use k256::ecdsa::SigningKey;
    use std::collections::HashMap;

    fn test_params() -> FinalityParams {
        FinalityParams {
            min_stake: 100,
            slash_amount: 50,
            slash_lock_period: 1_000,
            ..FinalityParams::default()
        }
    }

    fn test_key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).unwrap()
    }

    fn staked_ledger(key: &SigningKey, amount: u64) -> StakeLedger {
        let mut ledger = StakeLedger::new(test_params());
        ledger
            .register_stake(VerifiedStake {
                provider_key: CompressedPubkey::from_slice(&key.verifying_key().to_sec1_bytes()),
                btc_txid: B256::repeat_byte(1),
                amount,
                lock_start: 0,
                lock_duration: 1_000_000,
            })
            .unwrap();
        ledger
    }

    /// Finalization history stub for the tests
    #[derive(Debug, Default)]
    struct StubHistory {
        finalized: HashMap<u64, B256>,
        preconfirmed: HashSet<(u64, B256)>,
    }

    impl FinalizedHistory for StubHistory {
        fn finalized_hash(&self, height: u64) -> Option<B256> {
            self.finalized.get(&height).copied()
        }

        fn was_preconfirmed(&self, height: u64, hash: &B256) -> bool {
            self.preconfirmed.contains(&(height, *hash))
        }
    }

    fn equivocation_proof(key: &SigningKey) -> SlashingProof {
        let a = BlockSignature::sign(key, 10, B256::repeat_byte(0xaa), 100).unwrap();
        let b = BlockSignature::sign(key, 10, B256::repeat_byte(0xbb), 101).unwrap();
        SlashingProof {
            provider: a.provider,
            evidence: ViolationEvidence::Equivocation(EquivocationEvidence {
                provider: a.provider,
                height: 10,
                first: a,
                second: b,
            }),
            timestamp: 200,
        }
    }

    #[test]
    fn test_equivocation_slash_once_then_already_slashed() {
        let key = test_key(1);
        let mut ledger = staked_ledger(&key, 500);
        let tracker = QuorumTracker::new(test_params());
        let history = StubHistory::default();
        let mut engine = SlashingEngine::new(test_params());

        let proof = equivocation_proof(&key);
        let outcome = engine.submit(&proof, &mut ledger, &tracker, &history).unwrap();
        assert_eq!(outcome.penalty, 50);
        assert_eq!(outcome.remaining, 450);
        assert_eq!(outcome.status, ProviderStatus::Active);

        // Identical evidence is consumed; no double slash.
        let replay = engine.submit(&proof, &mut ledger, &tracker, &history);
        assert_matches!(replay, Err(SlashingError::AlreadySlashed { .. }));
        assert_eq!(ledger.provider(&proof.provider).unwrap().total_remaining(), 450);
    }

    #[test]
    fn test_equivocation_requires_conflicting_valid_signatures() {
        let key = test_key(1);
        let mut ledger = staked_ledger(&key, 500);
        let tracker = QuorumTracker::new(test_params());
        let history = StubHistory::default();
        let mut engine = SlashingEngine::new(test_params());

        // Same hash twice: no conflict.
        let a = BlockSignature::sign(&key, 10, B256::repeat_byte(0xaa), 100).unwrap();
        let proof = SlashingProof {
            provider: a.provider,
            evidence: ViolationEvidence::Equivocation(EquivocationEvidence {
                provider: a.provider,
                height: 10,
                first: a.clone(),
                second: a.clone(),
            }),
            timestamp: 200,
        };
        assert_matches!(
            engine.submit(&proof, &mut ledger, &tracker, &history),
            Err(SlashingError::ProofInsufficient { .. })
        );

        // Forged second signature: fails verification.
        let mut forged = BlockSignature::sign(&key, 10, B256::repeat_byte(0xbb), 100).unwrap();
        forged.signature = CompactSignature::repeat_byte(7);
        let proof = SlashingProof {
            provider: a.provider,
            evidence: ViolationEvidence::Equivocation(EquivocationEvidence {
                provider: a.provider,
                height: 10,
                first: a.clone(),
                second: forged,
            }),
            timestamp: 200,
        };
        assert_matches!(
            engine.submit(&proof, &mut ledger, &tracker, &history),
            Err(SlashingError::ProofInsufficient { .. })
        );
    }

    #[test]
    fn test_invalid_signature_audit_slash() {
        let key = test_key(1);
        let mut ledger = staked_ledger(&key, 500);
        let history = StubHistory::default();
        let mut engine = SlashingEngine::new(test_params());

        // A forged signature that somehow made it into the accepted set —
        // the retroactive audit case.
        let mut forged = BlockSignature::sign(&key, 10, B256::repeat_byte(0xaa), 100).unwrap();
        forged.signature = CompactSignature::repeat_byte(7);
        let mut tracker = QuorumTracker::new(test_params());
        assert_matches!(
            tracker.accept(forged.clone(), 500, 500, false),
            Acceptance::Accepted { .. }
        );

        let proof = SlashingProof {
            provider: forged.provider,
            evidence: ViolationEvidence::InvalidSignature { accepted: forged },
            timestamp: 200,
        };
        let outcome = engine.submit(&proof, &mut ledger, &tracker, &history).unwrap();
        assert_eq!(outcome.penalty, 50);
    }

    #[test]
    fn test_invalid_signature_rejects_healthy_record() {
        let key = test_key(1);
        let mut ledger = staked_ledger(&key, 500);
        let history = StubHistory::default();
        let mut engine = SlashingEngine::new(test_params());

        // A genuinely valid accepted signature is not slashable.
        let sig = BlockSignature::sign(&key, 10, B256::repeat_byte(0xaa), 100).unwrap();
        let mut tracker = QuorumTracker::new(test_params());
        tracker.accept(sig.clone(), 500, 500, false);

        let proof = SlashingProof {
            provider: sig.provider,
            evidence: ViolationEvidence::InvalidSignature { accepted: sig },
            timestamp: 200,
        };
        assert_matches!(
            engine.submit(&proof, &mut ledger, &tracker, &history),
            Err(SlashingError::ProofInsufficient { .. })
        );
    }

    #[test]
    fn test_preconfirmation_violation() {
        let key = test_key(1);
        let mut ledger = staked_ledger(&key, 500);
        let tracker = QuorumTracker::new(test_params());
        let mut engine = SlashingEngine::new(test_params());

        let losing = B256::repeat_byte(0xaa);
        let winner = B256::repeat_byte(0xbb);
        let sig = BlockSignature::sign(&key, 10, losing, 100).unwrap();

        let mut history = StubHistory::default();
        history.finalized.insert(10, winner);
        history.preconfirmed.insert((10, losing));

        let proof = SlashingProof {
            provider: sig.provider,
            evidence: ViolationEvidence::PreconfirmationViolation {
                preconf: sig.clone(),
                finalized_hash: winner,
            },
            timestamp: 200,
        };
        let outcome = engine.submit(&proof, &mut ledger, &tracker, &history).unwrap();
        assert_eq!(outcome.remaining, 450);

        // Without the preconfirmed fact the same claim is insufficient.
        let mut bare = StubHistory::default();
        bare.finalized.insert(10, winner);
        let sig2 = BlockSignature::sign(&key, 10, B256::repeat_byte(0xcc), 100).unwrap();
        let proof2 = SlashingProof {
            provider: sig2.provider,
            evidence: ViolationEvidence::PreconfirmationViolation {
                preconf: sig2,
                finalized_hash: winner,
            },
            timestamp: 200,
        };
        assert_matches!(
            engine.submit(&proof2, &mut ledger, &tracker, &bare),
            Err(SlashingError::ProofInsufficient { .. })
        );
    }

    #[test]
    fn test_pending_pool_dedup_and_consumption() {
        let key = test_key(1);
        let mut ledger = staked_ledger(&key, 500);
        let tracker = QuorumTracker::new(test_params());
        let history = StubHistory::default();
        let mut engine = SlashingEngine::new(test_params());

        let proof = equivocation_proof(&key);
        engine.note_violation(proof.evidence.clone());
        engine.note_violation(proof.evidence.clone());
        assert_eq!(engine.pending_violations().len(), 1);

        engine.submit(&proof, &mut ledger, &tracker, &history).unwrap();
        // Consumed evidence leaves the pool and cannot re-enter.
        assert!(engine.pending_violations().is_empty());
        engine.note_violation(proof.evidence.clone());
        assert!(engine.pending_violations().is_empty());
    }

    #[test]
    fn test_slash_below_minimum_demotes() {
        let key = test_key(1);
        // 120 staked, one slash of 50 leaves 70, below the 100 minimum.
        let mut ledger = staked_ledger(&key, 120);
        let tracker = QuorumTracker::new(test_params());
        let history = StubHistory::default();
        let mut engine = SlashingEngine::new(test_params());

        let outcome = engine
            .submit(&equivocation_proof(&key), &mut ledger, &tracker, &history)
            .unwrap();
        assert_eq!(outcome.remaining, 70);
        assert_eq!(outcome.status, ProviderStatus::Slashed);
    }
}
