//! Finality provider and stake records

use alloy_primitives::{keccak256, Address, FixedBytes, B256};
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::StakeError;

/// Stable identifier for a stake record
pub type StakeId = u64;

/// A compressed secp256k1 public key (SEC1, 33 bytes)
pub type CompressedPubkey = FixedBytes<33>;

/// Lifecycle status of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    /// Contributing voting power
    Active,
    /// Penalized below the minimum stake; no voting power
    Slashed,
    /// Fully exited; no voting power
    Withdrawing,
}

impl ProviderStatus {
    /// Short name for logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Slashed => "slashed",
            Self::Withdrawing => "withdrawing",
        }
    }
}

/// An immutable BTC lock record.
///
/// `remaining` starts at `initial_amount` and only decreases, via slash
/// write-downs and withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    /// Ledger-assigned identifier
    pub id: StakeId,
    /// Source Bitcoin transaction
    pub btc_txid: B256,
    /// Locked amount at registration, in satoshis
    pub initial_amount: u64,
    /// Amount still held, in satoshis
    pub remaining: u64,
    /// Lock window start, unix seconds
    pub lock_start: u64,
    /// Lock duration, seconds
    pub lock_duration: u64,
}

impl Stake {
    /// End of the lock window, unix seconds
    pub const fn lock_end(&self) -> u64 {
        self.lock_start.saturating_add(self.lock_duration)
    }

    /// Whether the lock window covers `at`
    pub const fn covers(&self, at: u64) -> bool {
        at >= self.lock_start && at < self.lock_end()
    }

    /// Whether the lock has expired at `now`
    pub const fn expired(&self, now: u64) -> bool {
        now >= self.lock_end()
    }
}

/// A finality provider: an entity that locked BTC and signs rollup blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityProvider {
    /// Provider identity, derived from the registered key
    pub address: Address,
    /// Registered secp256k1 public key (compressed SEC1)
    pub public_key: CompressedPubkey,
    /// Current status
    pub status: ProviderStatus,
    /// Cumulative slashed amount, in satoshis
    pub total_penalty: u64,
    /// No withdrawals before this time after a slash, unix seconds
    pub cooldown_until: u64,
    /// All stakes ever registered, including exhausted ones
    pub stakes: Vec<Stake>,
}

impl FinalityProvider {
    /// Create a provider with no stakes yet
    pub const fn new(address: Address, public_key: CompressedPubkey) -> Self {
        Self {
            address,
            public_key,
            status: ProviderStatus::Active,
            total_penalty: 0,
            cooldown_until: 0,
            stakes: Vec::new(),
        }
    }

    /// Sum of remainders over stakes whose lock window covers `at`.
    ///
    /// Status gating (slashed/withdrawing providers have zero power) is
    /// applied by the ledger, not here.
    pub fn lock_covered_amount(&self, at: u64) -> u64 {
        self.stakes
            .iter()
            .filter(|s| s.covers(at))
            .map(|s| s.remaining)
            .sum()
    }

    /// Total remaining across all stakes, regardless of lock windows
    pub fn total_remaining(&self) -> u64 {
        self.stakes.iter().map(|s| s.remaining).sum()
    }

    /// Amount withdrawable at `now`: remainders of expired locks
    pub fn free_balance(&self, now: u64) -> u64 {
        self.stakes
            .iter()
            .filter(|s| s.expired(now))
            .map(|s| s.remaining)
            .sum()
    }

    /// Parse the registered public key
    pub fn verifying_key(&self) -> Result<VerifyingKey, StakeError> {
        VerifyingKey::from_sec1_bytes(self.public_key.as_slice()).map_err(|e| {
            StakeError::ProofInvalid {
                reason: format!("registered key unparseable: {e}"),
            }
        })
    }
}

/// Derive the provider address from a secp256k1 public key.
///
/// Keccak-256 of the uncompressed point (without the SEC1 tag byte),
/// truncated to the low 20 bytes.
pub fn address_from_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn test_key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_address_derivation_is_stable() {
        let key = test_key(1);
        let a = address_from_key(key.verifying_key());
        let b = address_from_key(key.verifying_key());
        assert_eq!(a, b);
        assert_ne!(a, address_from_key(test_key(2).verifying_key()));
    }

    #[test]
    fn test_stake_lock_window() {
        let stake = Stake {
            id: 1,
            btc_txid: B256::repeat_byte(1),
            initial_amount: 100,
            remaining: 100,
            lock_start: 1_000,
            lock_duration: 500,
        };

        assert!(!stake.covers(999));
        assert!(stake.covers(1_000));
        assert!(stake.covers(1_499));
        assert!(!stake.covers(1_500));
        assert!(stake.expired(1_500));
        assert!(!stake.expired(1_499));
    }

    #[test]
    fn test_provider_balances() {
        let key = test_key(1);
        let mut provider = FinalityProvider::new(
            address_from_key(key.verifying_key()),
            CompressedPubkey::from_slice(&key.verifying_key().to_sec1_bytes()),
        );

        provider.stakes.push(Stake {
            id: 1,
            btc_txid: B256::repeat_byte(1),
            initial_amount: 100,
            remaining: 100,
            lock_start: 0,
            lock_duration: 1_000,
        });
        provider.stakes.push(Stake {
            id: 2,
            btc_txid: B256::repeat_byte(2),
            initial_amount: 50,
            remaining: 50,
            lock_start: 500,
            lock_duration: 1_000,
        });

        // Both locks cover t=600.
        assert_eq!(provider.lock_covered_amount(600), 150);
        // Only the second covers t=1100.
        assert_eq!(provider.lock_covered_amount(1_100), 50);
        // First lock expired at t=1000, withdrawable.
        assert_eq!(provider.free_balance(1_100), 100);
        assert_eq!(provider.total_remaining(), 150);
    }
}
