use std::{str::FromStr, sync::Arc, time::Duration};

use ethers::{
    providers::{Middleware, PendingTransaction},
    types::{Address, H256, U64, U256},
    utils::to_checksum,
};
use ethers_contract::abigen;
use tracing::debug;

use crate::error::Failure;

pub type TxHash = H256;

abigen!(
    EthStaking,
    r#"[
        function stakes(address) view returns (uint256, uint256, bool)
        function calculateReward(address) view returns (uint256)
        function stake() payable
        function unstake()
        function claimReward()
    ]"#
);

abigen!(
    RewardToken,
    r#"[
        function balanceOf(address) view returns (uint256)
    ]"#
);

/// Strict address check: `0x` plus 40 hex digits, and a valid EIP-55 checksum when mixed-case.
pub fn parse_contract_address(raw: &str) -> Option<Address> {
    let hex_part = raw.strip_prefix("0x")?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let address = Address::from_str(hex_part).ok()?;

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum(&address, None) != raw {
        return None;
    }
    Some(address)
}

/// What the staking contract stores for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakeRecord {
    pub amount: U256,
    /// Unix seconds of the stake (or of the last claim).
    pub timestamp: u64,
    pub active: bool,
}

impl From<(U256, U256, bool)> for StakeRecord {
    fn from((amount, timestamp, active): (U256, U256, bool)) -> Self {
        let timestamp = if timestamp > U256::from(u64::MAX) {
            u64::MAX
        } else {
            timestamp.as_u64()
        };
        Self {
            amount,
            timestamp,
            active,
        }
    }
}

/// Signer-bound handle on the staking contract.
#[allow(async_fn_in_trait)]
pub trait StakingHandle {
    fn address(&self) -> Address;
    async fn stakes(&self, owner: Address) -> Result<StakeRecord, Failure>;
    async fn calculate_reward(&self, owner: Address) -> Result<U256, Failure>;
    /// Submit `stake()` carrying `value` wei. Resolves once the node accepted the transaction.
    async fn stake(&self, value: U256) -> Result<TxHash, Failure>;
    async fn unstake(&self) -> Result<TxHash, Failure>;
    async fn claim_reward(&self) -> Result<TxHash, Failure>;
}

/// Signer-bound handle on the reward token.
#[allow(async_fn_in_trait)]
pub trait TokenHandle {
    fn address(&self) -> Address;
    async fn balance_of(&self, owner: Address) -> Result<U256, Failure>;
}

/// A transaction signer for one account, able to bind both contracts.
#[allow(async_fn_in_trait)]
pub trait ChainSigner {
    type Staking: StakingHandle;
    type Token: TokenHandle;

    fn account(&self) -> Address;
    async fn native_balance(&self, owner: Address) -> Result<U256, Failure>;
    /// Wait until a submitted transaction is mined; a reverted or dropped one is a failure.
    async fn wait_for_finalization(&self, tx: TxHash) -> Result<(), Failure>;
    fn bind_staking(&self, address: Address) -> Self::Staking;
    fn bind_token(&self, address: Address) -> Self::Token;
}

/// [`ChainSigner`] over any ethers middleware, normally a `SignerMiddleware`.
#[derive(Debug)]
pub struct EthersSigner<M> {
    client: Arc<M>,
    account: Address,
    confirmations: usize,
    poll_interval: Duration,
}

impl<M> EthersSigner<M> {
    pub fn new(client: Arc<M>, account: Address) -> Self {
        Self {
            client,
            account,
            confirmations: 1,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_confirmations(mut self, confirmations: usize) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl<M> ChainSigner for EthersSigner<M>
where
    M: Middleware + 'static,
{
    type Staking = EthersStaking<M>;
    type Token = EthersToken<M>;

    fn account(&self) -> Address {
        self.account
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, Failure> {
        self.client
            .get_balance(owner, None)
            .await
            .map_err(|err| Failure::from_middleware(&err))
    }

    async fn wait_for_finalization(&self, tx: TxHash) -> Result<(), Failure> {
        let receipt = PendingTransaction::new(tx, self.client.provider())
            .interval(self.poll_interval)
            .confirmations(self.confirmations)
            .await?;

        match receipt {
            None => Err(Failure::message(format!(
                "transaction {tx:#x} was dropped before finalization"
            ))),
            Some(receipt) if receipt.status == Some(U64::zero()) => Err(Failure::message(
                format!("transaction {tx:#x} reverted"),
            )),
            Some(receipt) => {
                debug!(block = ?receipt.block_number, "transaction finalized");
                Ok(())
            }
        }
    }

    fn bind_staking(&self, address: Address) -> Self::Staking {
        EthersStaking {
            contract: EthStaking::new(address, self.client.clone()),
        }
    }

    fn bind_token(&self, address: Address) -> Self::Token {
        EthersToken {
            contract: RewardToken::new(address, self.client.clone()),
        }
    }
}

#[derive(Debug)]
pub struct EthersStaking<M> {
    contract: EthStaking<M>,
}

impl<M> StakingHandle for EthersStaking<M>
where
    M: Middleware + 'static,
{
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn stakes(&self, owner: Address) -> Result<StakeRecord, Failure> {
        self.contract
            .stakes(owner)
            .call()
            .await
            .map(StakeRecord::from)
            .map_err(|err| Failure::from_contract(&err))
    }

    async fn calculate_reward(&self, owner: Address) -> Result<U256, Failure> {
        self.contract
            .calculate_reward(owner)
            .call()
            .await
            .map_err(|err| Failure::from_contract(&err))
    }

    async fn stake(&self, value: U256) -> Result<TxHash, Failure> {
        let call = self.contract.stake().value(value);
        let pending = call.send().await.map_err(|err| Failure::from_contract(&err))?;
        Ok(pending.tx_hash())
    }

    async fn unstake(&self) -> Result<TxHash, Failure> {
        let call = self.contract.unstake();
        let pending = call.send().await.map_err(|err| Failure::from_contract(&err))?;
        Ok(pending.tx_hash())
    }

    async fn claim_reward(&self) -> Result<TxHash, Failure> {
        let call = self.contract.claim_reward();
        let pending = call.send().await.map_err(|err| Failure::from_contract(&err))?;
        Ok(pending.tx_hash())
    }
}

#[derive(Debug)]
pub struct EthersToken<M> {
    contract: RewardToken<M>,
}

impl<M> TokenHandle for EthersToken<M>
where
    M: Middleware + 'static,
{
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, Failure> {
        self.contract
            .balance_of(owner)
            .call()
            .await
            .map_err(|err| Failure::from_contract(&err))
    }
}
