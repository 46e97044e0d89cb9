//! Typed violation evidence

use alloy_primitives::{keccak256, Address, B256};
use holdfast_finality::{BlockSignature, EquivocationEvidence};
use serde::{Deserialize, Serialize};

/// The closed set of slashable violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlashingReason {
    /// Conflicting signatures at one height
    Equivocation,
    /// An accepted signature that fails verification
    InvalidSignature,
    /// Preconfirmed a hash that lost the finalization race
    PreconfirmationViolation,
}

impl SlashingReason {
    /// Short name for logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equivocation => "equivocation",
            Self::InvalidSignature => "invalid_signature",
            Self::PreconfirmationViolation => "preconfirmation_violation",
        }
    }

    const fn tag(&self) -> u8 {
        match self {
            Self::Equivocation => 0x01,
            Self::InvalidSignature => 0x02,
            Self::PreconfirmationViolation => 0x03,
        }
    }
}

/// Evidence payload, one variant per reason, carrying only the fields
/// that reason needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationEvidence {
    /// Both conflicting signatures
    Equivocation(EquivocationEvidence),
    /// The accepted-but-unverifiable signature
    InvalidSignature {
        /// Signature as recorded in the quorum tracker
        accepted: BlockSignature,
    },
    /// The stale preconfirmation and the hash that won the height
    PreconfirmationViolation {
        /// The provider's signature for the losing hash
        preconf: BlockSignature,
        /// The hash that finalized at the same height
        finalized_hash: B256,
    },
}

impl ViolationEvidence {
    /// The violation class this evidence claims
    pub const fn reason(&self) -> SlashingReason {
        match self {
            Self::Equivocation(_) => SlashingReason::Equivocation,
            Self::InvalidSignature { .. } => SlashingReason::InvalidSignature,
            Self::PreconfirmationViolation { .. } => SlashingReason::PreconfirmationViolation,
        }
    }

    /// The accused provider
    pub const fn provider(&self) -> Address {
        match self {
            Self::Equivocation(ev) => ev.provider,
            Self::InvalidSignature { accepted } => accepted.provider,
            Self::PreconfirmationViolation { preconf, .. } => preconf.provider,
        }
    }

    /// Canonical evidence hash, the dedup key for slash consumption.
    ///
    /// Keccak-256 over a reason tag and the fixed-width field encoding, so
    /// byte-identical evidence always collides and nothing else does.
    pub fn digest(&self) -> B256 {
        let mut data = Vec::with_capacity(256);
        data.push(self.reason().tag());
        match self {
            Self::Equivocation(ev) => {
                encode_signature(&mut data, &ev.first);
                encode_signature(&mut data, &ev.second);
            }
            Self::InvalidSignature { accepted } => {
                encode_signature(&mut data, accepted);
            }
            Self::PreconfirmationViolation { preconf, finalized_hash } => {
                encode_signature(&mut data, preconf);
                data.extend_from_slice(finalized_hash.as_slice());
            }
        }
        keccak256(&data)
    }
}

fn encode_signature(data: &mut Vec<u8>, sig: &BlockSignature) {
    data.extend_from_slice(&sig.height.to_be_bytes());
    data.extend_from_slice(sig.block_hash.as_slice());
    data.extend_from_slice(sig.provider.as_slice());
    data.extend_from_slice(sig.signature.as_slice());
    data.extend_from_slice(&sig.timestamp.to_be_bytes());
}

/// A submitted slashing proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingProof {
    /// Accused provider; must match the evidence
    pub provider: Address,
    /// The evidence payload
    pub evidence: ViolationEvidence,
    /// Submission time, unix seconds
    pub timestamp: u64,
}

impl SlashingProof {
    /// The claimed violation class
    pub const fn reason(&self) -> SlashingReason {
        self.evidence.reason()
    }
}
