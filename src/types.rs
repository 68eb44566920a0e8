use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::implementations::{
    balance::{self, DECIMALS},
    classifier::UserError,
};

#[derive(Debug, Deserialize)]
pub struct StakeAmountParams {
    pub amount: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StakeParams {
    /// Replaces the current stake input before staking when given.
    #[serde(default)]
    pub amount: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectAccountParams {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AmountOut {
    pub symbol: String,
    pub raw: String,
    pub decimals: u32,
    pub formatted: String,
    /// Fixed-precision rendering for display.
    pub display: String,
}

impl AmountOut {
    pub fn new(symbol: &str, raw: U256, display_dp: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            raw: raw.to_string(),
            decimals: DECIMALS,
            formatted: balance::format_with_decimals(&raw, DECIMALS),
            display: balance::format_fixed(&raw, DECIMALS, display_dp),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BalancesOut {
    pub native_balance: AmountOut,
    pub staked_amount: AmountOut,
    pub pending_reward: AmountOut,
    pub token_balance: AmountOut,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PendingOut {
    pub connect: bool,
    pub stake: bool,
    pub unstake: bool,
    pub claim: bool,
}

/// Everything the front-end needs to draw the session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionView {
    pub connection: crate::layers::session::ConnectionState,
    pub account: Option<String>,
    pub chain_id: Option<u64>,
    pub balances: Option<BalancesOut>,
    pub stake_input: String,
    pub pending: PendingOut,
    pub error: Option<UserError>,
    pub install_url: Option<String>,
}
