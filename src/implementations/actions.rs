use std::fmt;

use ethers::types::{Address, U256};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::Failure,
    implementations::{
        balance,
        classifier::ErrorCategory,
        contracts::{ChainSigner, StakeRecord, StakingHandle, TokenHandle, TxHash},
        refresh::ContractBinding,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Connect,
    Stake,
    Unstake,
    Claim,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Connect => "connect",
            ActionKind::Stake => "stake",
            ActionKind::Unstake => "unstake",
            ActionKind::Claim => "claim",
        };
        f.write_str(name)
    }
}

/// Outcome of a failed check or call inside an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Refused locally; nothing was submitted.
    Refused(ErrorCategory),
    /// The wallet or a contract call failed; still needs classifying.
    Remote(Failure),
}

impl From<Failure> for ActionError {
    fn from(err: Failure) -> Self {
        ActionError::Remote(err)
    }
}

/// A state-changing call on the staking contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Stake(U256),
    Unstake,
    ClaimReward,
}

pub fn lock_elapsed(record: &StakeRecord, now: u64, lock_period_secs: u64) -> bool {
    now >= record.timestamp.saturating_add(lock_period_secs)
}

/// Checks for `stake` that need no chain access.
///
/// `known_balance` is the last committed native balance, consulted only when given.
pub fn preflight_stake(
    input: &str,
    min_wei: U256,
    known_balance: Option<U256>,
) -> Result<U256, ActionError> {
    let amount = balance::parse_stake_amount(input, min_wei).map_err(|err| {
        debug!(?err, input, "stake amount refused");
        ActionError::Refused(ErrorCategory::InvalidAmount)
    })?;
    if known_balance.is_some_and(|balance| amount > balance) {
        return Err(ActionError::Refused(ErrorCategory::InsufficientFunds));
    }
    Ok(amount)
}

/// Active-stake and lock-period checks shared by unstake and claim.
pub async fn require_unlocked_stake<S: ChainSigner>(
    binding: &ContractBinding<S>,
    account: Address,
    now: u64,
    lock_period_secs: u64,
) -> Result<StakeRecord, ActionError> {
    let record = binding.staking.stakes(account).await?;
    if !record.active {
        return Err(ActionError::Refused(ErrorCategory::NoActiveStake));
    }
    if !lock_elapsed(&record, now, lock_period_secs) {
        debug!(
            staked_at = record.timestamp,
            now, lock_period_secs, "lock period still running"
        );
        return Err(ActionError::Refused(ErrorCategory::LockPeriodNotElapsed));
    }
    Ok(record)
}

/// Everything claim can rule out before spending a transaction. Returns the reward to claim.
pub async fn preflight_claim<S: ChainSigner>(
    binding: &ContractBinding<S>,
    account: Address,
    now: u64,
    lock_period_secs: u64,
) -> Result<U256, ActionError> {
    require_unlocked_stake(binding, account, now, lock_period_secs).await?;

    let reward = binding.staking.calculate_reward(account).await?;
    if reward.is_zero() {
        return Err(ActionError::Refused(ErrorCategory::NoRewardsAvailable));
    }

    let reserve = binding.token.balance_of(binding.staking.address()).await?;
    if reserve < reward {
        debug!(%reserve, %reward, "staking contract reserve too low");
        return Err(ActionError::Refused(ErrorCategory::InsufficientContractReserve));
    }
    Ok(reward)
}

/// Submit the call, then wait for it to be finalized.
pub async fn submit_and_finalize<S: ChainSigner>(
    binding: &ContractBinding<S>,
    submission: Submission,
) -> Result<TxHash, Failure> {
    let tx = match submission {
        Submission::Stake(value) => binding.staking.stake(value).await?,
        Submission::Unstake => binding.staking.unstake().await?,
        Submission::ClaimReward => binding.staking.claim_reward().await?,
    };
    info!(?tx, ?submission, "transaction submitted");
    binding.signer.wait_for_finalization(tx).await?;
    Ok(tx)
}
