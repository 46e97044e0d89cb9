//! Holdfast Chain Specifications
//!
//! Defines the protocol parameters for Holdfast networks:
//! - Mainnet (chain ID: 49721)
//! - Testnet (chain ID: 49722)
//! - Devnet (chain ID: 49723)
//!
//! All economic and timing constants of the finality protocol live here:
//! stake minimums, slash amounts, quorum fractions and the timing windows
//! that gate preconfirmation and quorum collection. Amounts are satoshis,
//! durations are unix seconds, thresholds are basis points.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Holdfast mainnet chain ID
pub const HOLDFAST_MAINNET_CHAIN_ID: u64 = 49721;

/// Holdfast testnet chain ID
pub const HOLDFAST_TESTNET_CHAIN_ID: u64 = 49722;

/// Holdfast devnet chain ID
pub const HOLDFAST_DEVNET_CHAIN_ID: u64 = 49723;

/// Basis-point denominator for threshold fractions
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Holdfast mainnet chain spec
pub static HOLDFAST_MAINNET: Lazy<HoldfastChainSpec> = Lazy::new(|| HoldfastChainSpec {
    chain_id: HOLDFAST_MAINNET_CHAIN_ID,
    name: "holdfast-mainnet".to_string(),
    params: FinalityParams::default(),
});

/// Holdfast testnet chain spec
pub static HOLDFAST_TESTNET: Lazy<HoldfastChainSpec> = Lazy::new(|| HoldfastChainSpec {
    chain_id: HOLDFAST_TESTNET_CHAIN_ID,
    name: "holdfast-testnet".to_string(),
    params: FinalityParams {
        // Lower entry bar on testnet, faster exits.
        min_stake: 10_000_000,
        slash_lock_period: 86_400,
        ..FinalityParams::default()
    },
});

/// Holdfast devnet chain spec (for local development)
pub static HOLDFAST_DEV: Lazy<HoldfastChainSpec> = Lazy::new(|| HoldfastChainSpec {
    chain_id: HOLDFAST_DEVNET_CHAIN_ID,
    name: "holdfast-dev".to_string(),
    params: FinalityParams {
        min_stake: 100_000_000,
        min_stake_duration: 60,
        slash_lock_period: 600,
        ..FinalityParams::default()
    },
});

/// Protocol parameters for the finality gadget.
///
/// Every constant is overridable per network; the defaults are the mainnet
/// values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityParams {
    /// Minimum accepted stake in satoshis
    pub min_stake: u64,
    /// Full penalty per violation in satoshis
    pub slash_amount: u64,
    /// Quorum fraction in basis points (6_600 = 66%)
    pub quorum_threshold_bps: u16,
    /// Preconfirmation fraction in basis points, strictly below quorum
    pub preconf_threshold_bps: u16,
    /// Required Bitcoin confirmation depth for stake proofs
    pub finality_blocks: u32,
    /// Retention horizon: tracked state deeper than this below the
    /// finalized tip may be pruned
    pub max_reorg_depth: u64,
    /// Preconfirmation timing budget in seconds
    pub preconf_window: u64,
    /// Rollup block cadence in seconds
    pub block_time: u64,
    /// Quorum collection deadline in seconds, measured from proposal
    pub signature_timeout: u64,
    /// Minimum stake lock duration in seconds
    pub min_stake_duration: u64,
    /// Maximum stake lock duration in seconds
    pub max_stake_duration: u64,
    /// Post-slash withdrawal cooldown in seconds
    pub slash_lock_period: u64,
}

impl Default for FinalityParams {
    fn default() -> Self {
        Self {
            min_stake: 100_000_000, // 1 BTC
            slash_amount: 50_000_000,
            quorum_threshold_bps: 6_600,
            preconf_threshold_bps: 3_300,
            finality_blocks: 6,
            max_reorg_depth: 100,
            preconf_window: 3,
            block_time: 2,
            signature_timeout: 6,
            min_stake_duration: 86_400,        // 1 day
            max_stake_duration: 31_536_000,    // 365 days
            slash_lock_period: 604_800,        // 7 days
        }
    }
}

impl FinalityParams {
    /// Voting power required for quorum given a total active power.
    ///
    /// Rounds up, so quorum is reached exactly when accumulated power is at
    /// least this value: with total 100 and 66% the threshold is 66.
    pub fn quorum_power(&self, total: u64) -> u64 {
        threshold_power(total, self.quorum_threshold_bps)
    }

    /// Voting power required for preconfirmation given a total active power.
    pub fn preconf_power(&self, total: u64) -> u64 {
        threshold_power(total, self.preconf_threshold_bps)
    }

    /// Validate parameter consistency.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.quorum_threshold_bps as u64 > BPS_DENOMINATOR {
            return Err(ParamsError::ThresholdOutOfRange {
                bps: self.quorum_threshold_bps,
            });
        }
        if self.preconf_threshold_bps >= self.quorum_threshold_bps {
            return Err(ParamsError::PreconfNotBelowQuorum {
                preconf: self.preconf_threshold_bps,
                quorum: self.quorum_threshold_bps,
            });
        }
        if self.preconf_window >= self.signature_timeout {
            return Err(ParamsError::WindowOrdering {
                preconf_window: self.preconf_window,
                signature_timeout: self.signature_timeout,
            });
        }
        if self.min_stake_duration >= self.max_stake_duration {
            return Err(ParamsError::DurationBounds {
                min: self.min_stake_duration,
                max: self.max_stake_duration,
            });
        }
        if self.min_stake == 0 {
            return Err(ParamsError::ZeroMinStake);
        }
        Ok(())
    }
}

/// Minimum power that meets `bps` of `total`, rounding up.
fn threshold_power(total: u64, bps: u16) -> u64 {
    let num = total as u128 * bps as u128;
    num.div_ceil(BPS_DENOMINATOR as u128) as u64
}

/// Holdfast chain specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldfastChainSpec {
    /// Chain ID
    pub chain_id: u64,
    /// Chain name
    pub name: String,
    /// Finality protocol parameters
    pub params: FinalityParams,
}

impl HoldfastChainSpec {
    /// Get chain spec by name
    pub fn from_name(name: &str) -> Option<&'static Self> {
        match name {
            "holdfast-mainnet" | "mainnet" => Some(&HOLDFAST_MAINNET),
            "holdfast-testnet" | "testnet" => Some(&HOLDFAST_TESTNET),
            "holdfast-dev" | "dev" => Some(&HOLDFAST_DEV),
            _ => None,
        }
    }

    /// Get chain spec by chain ID
    pub fn from_chain_id(chain_id: u64) -> Option<&'static Self> {
        match chain_id {
            HOLDFAST_MAINNET_CHAIN_ID => Some(&HOLDFAST_MAINNET),
            HOLDFAST_TESTNET_CHAIN_ID => Some(&HOLDFAST_TESTNET),
            HOLDFAST_DEVNET_CHAIN_ID => Some(&HOLDFAST_DEV),
            _ => None,
        }
    }
}

/// Parameter validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    /// Threshold fraction above 100%
    #[error("threshold {bps} bps exceeds the denominator")]
    ThresholdOutOfRange {
        /// Offending basis points value
        bps: u16,
    },

    /// Preconfirmation threshold must be strictly below quorum
    #[error("preconfirmation threshold {preconf} bps not below quorum {quorum} bps")]
    PreconfNotBelowQuorum {
        /// Preconfirmation basis points
        preconf: u16,
        /// Quorum basis points
        quorum: u16,
    },

    /// Preconfirmation window must close before the quorum deadline
    #[error("preconfirmation window {preconf_window}s not below signature timeout {signature_timeout}s")]
    WindowOrdering {
        /// Preconfirmation window in seconds
        preconf_window: u64,
        /// Signature timeout in seconds
        signature_timeout: u64,
    },

    /// Stake duration bounds are inverted
    #[error("minimum stake duration {min}s not below maximum {max}s")]
    DurationBounds {
        /// Minimum duration in seconds
        min: u64,
        /// Maximum duration in seconds
        max: u64,
    },

    /// A zero minimum stake would admit weightless providers
    #[error("minimum stake must be non-zero")]
    ZeroMinStake,
}
