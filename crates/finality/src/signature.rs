//! Finality signatures over rollup block hashes

use alloy_primitives::{keccak256, Address, FixedBytes, B256};
use k256::ecdsa::{
    signature::hazmat::{PrehashSigner, PrehashVerifier},
    Signature, SigningKey, VerifyingKey,
};
use serde::{Deserialize, Serialize};

use holdfast_stake::address_from_key;

use crate::FinalityError;

/// Compact ECDSA signature (r || s, 64 bytes)
pub type CompactSignature = FixedBytes<64>;

/// Domain tag mixed into every signing message
const SIGNING_DOMAIN: &[u8] = b"HOLDFAST_FINALITY:";

/// The digest a provider signs for a block at a height.
///
/// Keccak-256 over the domain tag, the block hash, the big-endian height
/// and the big-endian timestamp. Voting power and the quorum snapshot are
/// evaluated at the timestamp, so it must be provider-attested: covering
/// it in the digest keeps the relay from rewriting it in flight.
/// Equivocation needs no help from the timestamp; conflicts key on the
/// hash alone.
pub fn signing_message(height: u64, block_hash: &B256, timestamp: u64) -> B256 {
    let mut data = Vec::with_capacity(SIGNING_DOMAIN.len() + 48);
    data.extend_from_slice(SIGNING_DOMAIN);
    data.extend_from_slice(block_hash.as_slice());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&timestamp.to_be_bytes());
    keccak256(&data)
}

/// A finality signature for a block at a height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Rollup block height
    pub height: u64,
    /// Signed block hash
    pub block_hash: B256,
    /// Signing provider
    pub provider: Address,
    /// Compact ECDSA signature over [`signing_message`]
    pub signature: CompactSignature,
    /// Submission timestamp, unix seconds
    pub timestamp: u64,
}

impl BlockSignature {
    /// Sign (height, block hash) with the provider key.
    pub fn sign(
        key: &SigningKey,
        height: u64,
        block_hash: B256,
        timestamp: u64,
    ) -> Result<Self, FinalityError> {
        let digest = signing_message(height, &block_hash, timestamp);
        let signature: Signature = key.sign_prehash(digest.as_slice())?;
        Ok(Self {
            height,
            block_hash,
            provider: address_from_key(key.verifying_key()),
            signature: CompactSignature::from_slice(&signature.to_bytes()),
            timestamp,
        })
    }

    /// Verify against a registered provider key.
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        let Ok(signature) = Signature::from_slice(self.signature.as_slice()) else {
            return false;
        };
        let digest = signing_message(self.height, &self.block_hash, self.timestamp);
        key.verify_prehash(digest.as_slice(), &signature).is_ok()
    }
}
