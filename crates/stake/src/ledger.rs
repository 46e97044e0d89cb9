//! The stake ledger

use alloy_primitives::{Address, B256};
use holdfast_chainspec::FinalityParams;
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::{
    address_from_key, FinalityProvider, ProviderStatus, Stake, StakeError, StakeId, VerifiedStake,
};

/// Receipt for an accepted withdrawal request.
///
/// Settlement on Bitcoin is the custody collaborator's concern; the ledger
/// only certifies that the amount was free and has been released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawTicket {
    /// Withdrawing provider
    pub provider: Address,
    /// Released amount in satoshis
    pub amount: u64,
    /// Request time, unix seconds
    pub requested_at: u64,
}

/// Read-only projection of a provider's ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingStatus {
    /// Provider identity
    pub provider: Address,
    /// Current status
    pub status: ProviderStatus,
    /// Total remaining across all stakes, in satoshis
    pub total_staked: u64,
    /// Cumulative slashed amount, in satoshis
    pub total_penalty: u64,
    /// Withdrawal cooldown deadline, unix seconds (0 when none)
    pub cooldown_until: u64,
    /// Number of stake records, including exhausted ones
    pub stake_count: usize,
}

/// The stake ledger: exclusive owner of provider and stake mutation.
#[derive(Debug)]
pub struct StakeLedger {
    params: FinalityParams,
    providers: HashMap<Address, FinalityProvider>,
    /// Each BTC txid feeds at most one stake, ever.
    consumed: HashMap<B256, StakeId>,
    next_stake_id: StakeId,
}

impl StakeLedger {
    /// Empty ledger for the given parameters
    pub fn new(params: FinalityParams) -> Self {
        Self {
            params,
            providers: HashMap::new(),
            consumed: HashMap::new(),
            next_stake_id: 1,
        }
    }

    /// Register a verified stake, creating the provider on first contact.
    ///
    /// A provider that was slashed or fully withdrawn reactivates once its
    /// live total is back at or above the minimum; history is retained.
    pub fn register_stake(&mut self, verified: VerifiedStake) -> Result<StakeId, StakeError> {
        if self.consumed.contains_key(&verified.btc_txid) {
            return Err(StakeError::DuplicateStakeProof {
                txid: verified.btc_txid,
            });
        }

        let key = VerifyingKey::from_sec1_bytes(verified.provider_key.as_slice()).map_err(
            |e| StakeError::ProofInvalid {
                reason: format!("provider key unparseable: {e}"),
            },
        )?;
        let address = address_from_key(&key);

        let provider = self
            .providers
            .entry(address)
            .or_insert_with(|| FinalityProvider::new(address, verified.provider_key));

        if provider.public_key != verified.provider_key {
            return Err(StakeError::ProofInvalid {
                reason: format!("key mismatch for provider {address}"),
            });
        }

        let stake_id = self.next_stake_id;
        self.next_stake_id += 1;

        provider.stakes.push(Stake {
            id: stake_id,
            btc_txid: verified.btc_txid,
            initial_amount: verified.amount,
            remaining: verified.amount,
            lock_start: verified.lock_start,
            lock_duration: verified.lock_duration,
        });
        if provider.total_remaining() >= self.params.min_stake {
            provider.status = ProviderStatus::Active;
        }
        self.consumed.insert(verified.btc_txid, stake_id);

        info!(
            target: "holdfast::stake",
            provider = %address,
            stake_id,
            amount = verified.amount,
            txid = %verified.btc_txid,
            "Stake registered"
        );

        Ok(stake_id)
    }

    /// Look up a provider
    pub fn provider(&self, address: &Address) -> Option<&FinalityProvider> {
        self.providers.get(address)
    }

    /// Parse a provider's registered public key
    pub fn verifying_key(&self, address: &Address) -> Option<VerifyingKey> {
        self.providers
            .get(address)
            .and_then(|p| p.verifying_key().ok())
    }

    /// Voting power of a provider at time `at`.
    ///
    /// Zero unless the provider is active; otherwise the sum of stake
    /// remainders whose lock window covers `at`. Pure read.
    pub fn voting_power(&self, address: &Address, at: u64) -> u64 {
        match self.providers.get(address) {
            Some(p) if p.status == ProviderStatus::Active => p.lock_covered_amount(at),
            _ => 0,
        }
    }

    /// Total voting power across all active providers at time `at`
    pub fn total_active_power(&self, at: u64) -> u64 {
        self.providers
            .values()
            .filter(|p| p.status == ProviderStatus::Active)
            .map(|p| p.lock_covered_amount(at))
            .sum()
    }

    /// Write down a provider's stake by `penalty` satoshis, floored at zero.
    ///
    /// Longest-locked stakes are consumed first, so the soonest-withdrawable
    /// funds are burned last. Starts the withdrawal cooldown and demotes the
    /// provider to `Slashed` when the remainder drops below the minimum.
    /// Returns the new total remaining.
    pub fn apply_slash(
        &mut self,
        address: &Address,
        penalty: u64,
        now: u64,
    ) -> Result<u64, StakeError> {
        let min_stake = self.params.min_stake;
        let cooldown = now.saturating_add(self.params.slash_lock_period);
        let provider = self
            .providers
            .get_mut(address)
            .ok_or(StakeError::UnknownProvider { provider: *address })?;

        let mut order: Vec<usize> = (0..provider.stakes.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(provider.stakes[i].lock_end()));

        let mut left = penalty;
        for i in order {
            if left == 0 {
                break;
            }
            let stake = &mut provider.stakes[i];
            let cut = stake.remaining.min(left);
            stake.remaining -= cut;
            left -= cut;
        }

        let burned = penalty - left;
        provider.total_penalty = provider.total_penalty.saturating_add(burned);
        provider.cooldown_until = provider.cooldown_until.max(cooldown);

        let new_total = provider.total_remaining();
        if new_total < min_stake {
            provider.status = ProviderStatus::Slashed;
        }

        warn!(
            target: "holdfast::stake",
            provider = %address,
            penalty = burned,
            remaining = new_total,
            status = provider.status.as_str(),
            cooldown_until = provider.cooldown_until,
            "Slash applied"
        );

        Ok(new_total)
    }

    /// Request withdrawal of `amount` satoshis of free balance.
    ///
    /// Free balance is the remainder of expired locks. Fails with
    /// `LockActive` while a slash cooldown runs or while everything is
    /// still lock-covered, `InsufficientStake` when the amount exceeds the
    /// free balance. Earliest-expired stakes are drained first.
    pub fn request_withdraw(
        &mut self,
        address: &Address,
        amount: u64,
        now: u64,
    ) -> Result<WithdrawTicket, StakeError> {
        let provider = self
            .providers
            .get_mut(address)
            .ok_or(StakeError::UnknownProvider { provider: *address })?;

        if now < provider.cooldown_until {
            return Err(StakeError::LockActive {
                until: provider.cooldown_until,
            });
        }

        let free = provider.free_balance(now);
        if free == 0 && provider.total_remaining() > 0 {
            let until = provider
                .stakes
                .iter()
                .filter(|s| s.remaining > 0)
                .map(Stake::lock_end)
                .min()
                .unwrap_or(0);
            return Err(StakeError::LockActive { until });
        }
        if amount > free {
            return Err(StakeError::InsufficientStake {
                requested: amount,
                free,
            });
        }

        let mut order: Vec<usize> = (0..provider.stakes.len()).collect();
        order.sort_by_key(|&i| provider.stakes[i].lock_end());

        let mut left = amount;
        for i in order {
            if left == 0 {
                break;
            }
            let stake = &mut provider.stakes[i];
            if !stake.expired(now) {
                continue;
            }
            let cut = stake.remaining.min(left);
            stake.remaining -= cut;
            left -= cut;
        }

        if provider.total_remaining() == 0 {
            provider.status = ProviderStatus::Withdrawing;
        }

        info!(
            target: "holdfast::stake",
            provider = %address,
            amount,
            remaining = provider.total_remaining(),
            "Withdrawal released"
        );

        Ok(WithdrawTicket {
            provider: *address,
            amount,
            requested_at: now,
        })
    }

    /// Read-only status projection for the query surface
    pub fn staking_status(&self, address: &Address) -> Option<StakingStatus> {
        self.providers.get(address).map(|p| StakingStatus {
            provider: p.address,
            status: p.status,
            total_staked: p.total_remaining(),
            total_penalty: p.total_penalty,
            cooldown_until: p.cooldown_until,
            stake_count: p.stakes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompressedPubkey;
    use assert_matches::assert_matches;
    use k256::ecdsa::SigningKey;

    fn test_params() -> FinalityParams {
        FinalityParams {
            min_stake: 100,
            slash_amount: 50,
            slash_lock_period: 1_000,
            min_stake_duration: 10,
            max_stake_duration: 100_000,
            ..FinalityParams::default()
        }
    }

    fn provider_key(byte: u8) -> CompressedPubkey {
        let key = SigningKey::from_slice(&[byte; 32]).unwrap();
        CompressedPubkey::from_slice(&key.verifying_key().to_sec1_bytes())
    }

    fn verified(key_byte: u8, txid_byte: u8, amount: u64, start: u64, duration: u64) -> VerifiedStake {
        VerifiedStake {
            provider_key: provider_key(key_byte),
            btc_txid: B256::repeat_byte(txid_byte),
            amount,
            lock_start: start,
            lock_duration: duration,
        }
    }

    fn provider_address(byte: u8) -> Address {
        let key = SigningKey::from_slice(&[byte; 32]).unwrap();
        address_from_key(key.verifying_key())
    }

    #[test]
    fn test_register_and_power() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 500, 0, 1_000)).unwrap();

        let addr = provider_address(1);
        assert_eq!(ledger.voting_power(&addr, 500), 500);
        // Outside the lock window.
        assert_eq!(ledger.voting_power(&addr, 1_000), 0);
        assert_eq!(ledger.total_active_power(500), 500);
    }

    #[test]
    fn test_duplicate_txid_rejected() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 500, 0, 1_000)).unwrap();

        // Same txid from a different provider must not double-count.
        let result = ledger.register_stake(verified(2, 1, 500, 0, 1_000));
        assert_matches!(result, Err(StakeError::DuplicateStakeProof { .. }));
        assert_eq!(ledger.total_active_power(500), 500);
    }

    #[test]
    fn test_multiple_stakes_sum() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 300, 0, 1_000)).unwrap();
        ledger.register_stake(verified(1, 2, 200, 0, 2_000)).unwrap();

        let addr = provider_address(1);
        assert_eq!(ledger.voting_power(&addr, 500), 500);
        assert_eq!(ledger.voting_power(&addr, 1_500), 200);
    }

    #[test]
    fn test_slash_floors_at_zero_and_demotes() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 120, 0, 1_000)).unwrap();
        let addr = provider_address(1);

        // Penalty larger than the stake: floored, status drops below minimum.
        let remaining = ledger.apply_slash(&addr, 500, 100).unwrap();
        assert_eq!(remaining, 0);
        let status = ledger.staking_status(&addr).unwrap();
        assert_eq!(status.status, ProviderStatus::Slashed);
        assert_eq!(status.total_penalty, 120);
        assert_eq!(status.cooldown_until, 1_100);
        assert_eq!(ledger.voting_power(&addr, 500), 0);
    }

    #[test]
    fn test_slash_consumes_longest_lock_first() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 300, 0, 1_000)).unwrap();
        ledger.register_stake(verified(1, 2, 300, 0, 5_000)).unwrap();
        let addr = provider_address(1);

        ledger.apply_slash(&addr, 200, 100).unwrap();
        let provider = ledger.provider(&addr).unwrap();
        // The longer lock (txid 2) absorbs the penalty.
        assert_eq!(provider.stakes[0].remaining, 300);
        assert_eq!(provider.stakes[1].remaining, 100);
    }

    #[test]
    fn test_slash_unknown_provider() {
        let mut ledger = StakeLedger::new(test_params());
        let result = ledger.apply_slash(&Address::repeat_byte(9), 50, 0);
        assert_matches!(result, Err(StakeError::UnknownProvider { .. }));
    }

    #[test]
    fn test_withdraw_during_cooldown() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 500, 0, 100)).unwrap();
        let addr = provider_address(1);

        ledger.apply_slash(&addr, 50, 200).unwrap();

        // Cooldown runs until 1200.
        let result = ledger.request_withdraw(&addr, 100, 500);
        assert_matches!(result, Err(StakeError::LockActive { until: 1_200 }));

        // After the cooldown the lock has long expired; withdrawal succeeds.
        let ticket = ledger.request_withdraw(&addr, 100, 1_300).unwrap();
        assert_eq!(ticket.amount, 100);
    }

    #[test]
    fn test_withdraw_while_lock_covered() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 500, 0, 1_000)).unwrap();
        let addr = provider_address(1);

        let result = ledger.request_withdraw(&addr, 100, 500);
        assert_matches!(result, Err(StakeError::LockActive { until: 1_000 }));
    }

    #[test]
    fn test_withdraw_exceeding_free_balance() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 500, 0, 100)).unwrap();
        let addr = provider_address(1);

        let result = ledger.request_withdraw(&addr, 600, 200);
        assert_matches!(
            result,
            Err(StakeError::InsufficientStake { requested: 600, free: 500 })
        );
    }

    #[test]
    fn test_full_exit_marks_withdrawing_and_restake_reactivates() {
        let mut ledger = StakeLedger::new(test_params());
        ledger.register_stake(verified(1, 1, 500, 0, 100)).unwrap();
        let addr = provider_address(1);

        ledger.request_withdraw(&addr, 500, 200).unwrap();
        assert_eq!(
            ledger.staking_status(&addr).unwrap().status,
            ProviderStatus::Withdrawing
        );
        assert_eq!(ledger.voting_power(&addr, 50), 0);

        // A fresh stake proof brings the provider back.
        ledger.register_stake(verified(1, 2, 500, 300, 1_000)).unwrap();
        assert_eq!(
            ledger.staking_status(&addr).unwrap().status,
            ProviderStatus::Active
        );
        assert_eq!(ledger.voting_power(&addr, 400), 500);
    }
}
