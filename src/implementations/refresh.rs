use ethers::types::{Address, U256};
use tracing::debug;

use crate::{
    error::Failure,
    implementations::contracts::{ChainSigner, StakingHandle, TokenHandle},
};

/// The staking contract plus the reward token, both bound to one signer.
pub struct ContractBinding<S: ChainSigner> {
    pub signer: S,
    pub staking: S::Staking,
    pub token: S::Token,
}

impl<S: ChainSigner> ContractBinding<S> {
    pub fn new(signer: S, staking_address: Address, token_address: Address) -> Self {
        let staking = signer.bind_staking(staking_address);
        let token = signer.bind_token(token_address);
        Self {
            signer,
            staking,
            token,
        }
    }
}

/// The four on-chain quantities shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadModel {
    pub native_balance: U256,
    pub staked_amount: U256,
    pub pending_reward: U256,
    pub token_balance: U256,
}

/// Read all four quantities for `account`. Any failed read fails the whole fetch.
pub async fn fetch_read_model<S: ChainSigner>(
    binding: &ContractBinding<S>,
    account: Address,
) -> Result<ReadModel, Failure> {
    let native_balance = binding.signer.native_balance(account).await?;
    let stake = binding.staking.stakes(account).await?;
    let pending_reward = binding.staking.calculate_reward(account).await?;
    let token_balance = binding.token.balance_of(account).await?;

    let model = ReadModel {
        native_balance,
        staked_amount: stake.amount,
        pending_reward,
        token_balance,
    };
    debug!(?model, "read model fetched");
    Ok(model)
}
