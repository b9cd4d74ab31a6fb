//! Gas cost and miner/validator reward calculations (§4.2).
//!
//! [`GasConfig`] is a pure parameter bag; every function here is a pure
//! function of its explicit arguments, mutated only through a governance
//! transaction applied by the node orchestrator — there is no process-wide
//! singleton default (§9, "process-wide singleton state").

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasConfig {
    pub base_tx: Decimal,
    pub base_contract: Decimal,
    pub per_char: Decimal,
    pub factor: Decimal,

    pub miner_init: Decimal,
    pub miner_decay: Decimal,
    pub miner_min: Decimal,

    pub validator_init: Decimal,
    pub validator_decay: Decimal,
    pub validator_min: Decimal,

    pub load_high: Decimal,
    pub load_low: Decimal,
    pub mul_high: Decimal,
    pub mul_low: Decimal,

    pub contract_min_len: usize,
    pub contract_len_gas_factor: Decimal,

    /// Per-seat founder distribution amount (§4.2, "Founder distribution").
    /// `spec.md`'s Open Questions ask whether this belongs here; DESIGN.md
    /// records the decision to surface it as a `GasConfig` field so a
    /// governance transaction can retune it like every other parameter.
    pub founder_seat_amount: Decimal,
    pub founder_seat_count: u32,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            base_tx: dec!(5),
            base_contract: dec!(10),
            per_char: dec!(2),
            factor: dec!(1000),

            miner_init: dec!(0.1),
            miner_decay: dec!(0.98),
            miner_min: dec!(0.01),

            validator_init: dec!(0.05),
            validator_decay: dec!(0.99),
            validator_min: dec!(0.005),

            load_high: dec!(0.75),
            load_low: dec!(0.25),
            mul_high: dec!(1.2),
            mul_low: dec!(0.8),

            contract_min_len: 1000,
            contract_len_gas_factor: dec!(1.5),

            founder_seat_amount: dec!(10000000),
            founder_seat_count: 10,
        }
    }
}

fn load_multiplier(config: &GasConfig, network_load: Decimal) -> Decimal {
    if network_load > config.load_high {
        config.mul_high
    } else if network_load < config.load_low {
        config.mul_low
    } else {
        Decimal::ONE
    }
}

/// Gas for an ordinary transaction (§4.2). Zero when `is_system_sender`.
pub fn transaction_gas(
    config: &GasConfig,
    is_system_sender: bool,
    sender_len: usize,
    data_len: usize,
    info_len: usize,
    network_load: Decimal,
) -> Decimal {
    if is_system_sender {
        return Decimal::ZERO;
    }
    let char_count = Decimal::from(data_len + info_len + sender_len);
    let base = config.base_tx + char_count * config.per_char / config.factor;
    base * load_multiplier(config, network_load)
}

/// Gas for deploying contract code of length `code_len` (§4.2).
pub fn contract_gas(config: &GasConfig, code_len: usize, network_load: Decimal) -> Decimal {
    let mut gas = config.base_contract + Decimal::from(code_len) * config.per_char / config.factor;
    if code_len > config.contract_min_len {
        gas *= config.contract_len_gas_factor;
    }
    gas * load_multiplier(config, network_load)
}

/// `MinerReward(wallet_count, miner_address)` (§4.2): if the miner has never
/// held a balance, pay the full `miner_init` seat reward; otherwise decay by
/// `wallet_count`, floored at `miner_min`.
pub fn miner_reward(config: &GasConfig, miner_balance_is_zero: bool, wallet_count: u32) -> Decimal {
    if miner_balance_is_zero {
        return config.miner_init;
    }
    let decayed = config.miner_init * config.miner_decay.powi(wallet_count as i64);
    decayed.max(config.miner_min)
}

/// `ValidatorReward`, the analogous computation for validators (§4.2).
pub fn validator_reward(
    config: &GasConfig,
    validator_balance_is_zero: bool,
    wallet_count: u32,
) -> Decimal {
    if validator_balance_is_zero {
        return config.validator_init;
    }
    let decayed = config.validator_init * config.validator_decay.powi(wallet_count as i64);
    decayed.max(config.validator_min)
}

/// Which reward a freshly-minted seat gets: the computed reward, or — while
/// founder seats remain open — the flat founder amount in lieu of it.
///
/// `spec.md` §9 flags the source's reward computation as suspicious: "the
/// current reward code computes `reward = validatorReward` else `reward =
/// minerReward + reward` where `reward` is uninitialized to 0". Read at face
/// value this means the validator-reward branch *replaces* the accumulator
/// while the miner-reward branch *adds into* it; since the accumulator
/// starts at zero and is never reused across calls, the two branches are
/// observably identical (`reward = minerReward + 0`). We preserve that
/// literal behavior rather than silently reinterpreting it — see DESIGN.md.
pub fn settle_reward(
    config: &GasConfig,
    founder_seats_remaining: bool,
    role: RewardRole,
    balance_is_zero: bool,
    wallet_count: u32,
) -> Decimal {
    if founder_seats_remaining {
        return config.founder_seat_amount;
    }
    let mut reward = Decimal::ZERO;
    match role {
        RewardRole::Validator => reward = validator_reward(config, balance_is_zero, wallet_count),
        RewardRole::Miner => {
            reward += miner_reward(config, balance_is_zero, wallet_count);
        }
    }
    reward
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardRole {
    Miner,
    Validator,
}

/// Have founder seats been exhausted? True while
/// `ledger[SYSTEM] > TotalSupply - founder_seat_count * founder_seat_amount`.
pub fn founder_seats_remaining(
    config: &GasConfig,
    total_supply: Decimal,
    system_balance: Decimal,
) -> bool {
    system_balance > total_supply - Decimal::from(config.founder_seat_count) * config.founder_seat_amount
}
