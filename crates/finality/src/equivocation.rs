//! Equivocation detection
//!
//! Tracks, per (height, provider), every block hash the provider has
//! signed. A second hash at the same height is equivocation; the detector
//! packages both signatures as slashing-eligible evidence.
//!
//! The log is append-only and order-independent: state is a set union over
//! the signature history, and the evidence pair is chosen canonically by
//! hash order, so replaying a reordered or duplicated delivery log yields
//! identical verdicts and identical evidence.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::BlockSignature;

/// Two conflicting signatures from one provider at one height.
///
/// `first` carries the lexicographically smaller block hash, regardless of
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivocationEvidence {
    /// Equivocating provider
    pub provider: Address,
    /// Conflicted height
    pub height: u64,
    /// Signature for the smaller block hash
    pub first: BlockSignature,
    /// Signature for the larger block hash
    pub second: BlockSignature,
}

/// Verdict for an incoming signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquivocationVerdict {
    /// Consistent with everything seen for this (height, provider)
    Consistent,
    /// Conflicts with an earlier hash; both signatures packaged as evidence
    Equivocation(Box<EquivocationEvidence>),
}

/// Append-only log of signed hashes per (height, provider).
///
/// Never pruned: duplicate-slash prevention and audit need the full
/// history.
#[derive(Debug, Default)]
pub struct EquivocationLog {
    /// First signature seen per hash, canonically ordered by hash bytes
    seen: HashMap<(u64, Address), BTreeMap<B256, BlockSignature>>,
}

impl EquivocationLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a signature and report whether it conflicts.
    ///
    /// The signature is recorded either way; nothing is ever un-seen. The
    /// conflicting partner in the evidence is the smallest differing hash
    /// on record, which makes the evidence independent of delivery order.
    pub fn check_and_record(&mut self, signature: &BlockSignature) -> EquivocationVerdict {
        let key = (signature.height, signature.provider);
        let hashes = self.seen.entry(key).or_default();

        let conflicting = hashes
            .iter()
            .find(|(hash, _)| **hash != signature.block_hash)
            .map(|(_, sig)| sig.clone());

        hashes
            .entry(signature.block_hash)
            .or_insert_with(|| signature.clone());

        match conflicting {
            None => EquivocationVerdict::Consistent,
            Some(other) => {
                let (first, second) = if other.block_hash < signature.block_hash {
                    (other, signature.clone())
                } else {
                    (signature.clone(), other)
                };
                warn!(
                    target: "holdfast::finality",
                    provider = %signature.provider,
                    height = signature.height,
                    first = %first.block_hash,
                    second = %second.block_hash,
                    "Equivocation detected"
                );
                EquivocationVerdict::Equivocation(Box::new(EquivocationEvidence {
                    provider: signature.provider,
                    height: signature.height,
                    first,
                    second,
                }))
            }
        }
    }

    /// Number of distinct hashes recorded for (height, provider)
    pub fn recorded_hashes(&self, height: u64, provider: &Address) -> usize {
        self.seen
            .get(&(height, *provider))
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}
