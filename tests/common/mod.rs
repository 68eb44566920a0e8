#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use ethers::{
    types::{Address, H256, U256},
    utils::parse_units,
};
use stakedesk::{
    error::{AppResult, Failure},
    implementations::{
        classifier::{ErrorClassifier, USER_REJECTED_CODE},
        contracts::{ChainSigner, StakeRecord, StakingHandle, TokenHandle, TxHash},
    },
    layers::session::{SessionController, SessionSettings},
    wallet::{HostControls, WalletEvent, WalletProvider},
};
use tokio::sync::{Notify, broadcast};

pub const TARGET_CHAIN: u64 = 11_155_111;
pub const STAKING: &str = "0x00000000000000000000000000000000000000aa";
pub const TOKEN: &str = "0x00000000000000000000000000000000000000bb";
pub const LOCK_PERIOD: u64 = 15;
pub const START: u64 = 1_700_000_000;

pub fn eth(amount: &str) -> U256 {
    parse_units(amount, 18).unwrap().into()
}

pub fn account(n: u64) -> Address {
    Address::from_low_u64_be(0x1000 + n)
}

pub fn staking_address() -> Address {
    STAKING.parse().unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    Native,
    Stakes,
    Reward,
    Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Stake(Address, U256),
    Unstake(Address),
    Claim(Address),
}

/// In-memory stand-in for the node plus both contracts.
#[derive(Debug)]
pub struct FakeChain {
    pub chain_id: u64,
    pub switch_refusal: Option<Failure>,
    pub switch_requests: usize,
    pub native: HashMap<Address, U256>,
    pub stakes: HashMap<Address, StakeRecord>,
    pub rewards: HashMap<Address, U256>,
    pub tokens: HashMap<Address, U256>,
    pub submissions: Vec<Submitted>,
    pub failing_read: Option<Read>,
    pub reads: usize,
    pub next_tx_failure: Option<Failure>,
    pub gas_fee: U256,
    pub now: u64,
    pub finalize_gate: Option<Arc<Notify>>,
    pub authorization_gate: Option<Arc<Notify>>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            chain_id: TARGET_CHAIN,
            switch_refusal: None,
            switch_requests: 0,
            native: HashMap::new(),
            stakes: HashMap::new(),
            rewards: HashMap::new(),
            tokens: HashMap::new(),
            submissions: Vec::new(),
            failing_read: None,
            reads: 0,
            next_tx_failure: None,
            gas_fee: U256::from(21_000u64) * U256::from(1_000_000_000u64),
            now: START,
            finalize_gate: None,
            authorization_gate: None,
        }
    }
}

impl FakeChain {
    fn read(&mut self, kind: Read) -> Result<(), Failure> {
        self.reads += 1;
        if self.failing_read == Some(kind) {
            return Err(Failure::with_code(-32603, format!("{kind:?} read timed out")));
        }
        Ok(())
    }

    fn submit(&mut self, submitted: Submitted) -> Result<TxHash, Failure> {
        self.submissions.push(submitted);
        if let Some(failure) = self.next_tx_failure.take() {
            return Err(failure);
        }
        Ok(H256::from_low_u64_be(self.submissions.len() as u64))
    }

    pub fn stake_of(&self, owner: Address) -> StakeRecord {
        self.stakes.get(&owner).copied().unwrap_or_default()
    }

    pub fn native_of(&self, owner: Address) -> U256 {
        self.native.get(&owner).copied().unwrap_or_default()
    }

    pub fn tokens_of(&self, owner: Address) -> U256 {
        self.tokens.get(&owner).copied().unwrap_or_default()
    }

    /// An active stake old enough that the lock period is over.
    pub fn seed_unlocked_stake(&mut self, owner: Address, amount: U256, reward: U256) {
        self.stakes.insert(
            owner,
            StakeRecord {
                amount,
                timestamp: self.now - LOCK_PERIOD - 1,
                active: true,
            },
        );
        self.rewards.insert(owner, reward);
    }
}

pub type SharedChain = Arc<Mutex<FakeChain>>;

pub struct FakeWallet {
    pub chain: SharedChain,
    keyring: Vec<Address>,
    selected: Mutex<Option<Address>>,
    authorized: AtomicBool,
    pub reject_authorization: AtomicBool,
    pub authorization_requests: AtomicUsize,
    events: broadcast::Sender<WalletEvent>,
}

impl FakeWallet {
    pub fn new(chain: SharedChain, keyring: Vec<Address>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            chain,
            selected: Mutex::new(keyring.first().copied()),
            keyring,
            authorized: AtomicBool::new(false),
            reject_authorization: AtomicBool::new(false),
            authorization_requests: AtomicUsize::new(0),
            events,
        }
    }

    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }
}

impl WalletProvider for FakeWallet {
    type Signer = FakeSigner;

    async fn accounts(&self) -> Result<Vec<Address>, Failure> {
        if !self.authorized.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self.selected.lock().unwrap().iter().copied().collect())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, Failure> {
        self.authorization_requests.fetch_add(1, Ordering::SeqCst);
        let gate = self.chain.lock().unwrap().authorization_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.reject_authorization.load(Ordering::SeqCst) {
            return Err(Failure::with_code(
                USER_REJECTED_CODE,
                "MetaMask Tx Signature: User denied transaction signature.",
            ));
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(self.selected.lock().unwrap().iter().copied().collect())
    }

    async fn chain_id(&self) -> Result<u64, Failure> {
        Ok(self.chain.lock().unwrap().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), Failure> {
        let mut chain = self.chain.lock().unwrap();
        chain.switch_requests += 1;
        if let Some(refusal) = chain.switch_refusal.clone() {
            return Err(refusal);
        }
        chain.chain_id = chain_id;
        Ok(())
    }

    async fn signer(&self, account: Address) -> Result<Self::Signer, Failure> {
        Ok(FakeSigner {
            chain: Arc::clone(&self.chain),
            account,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

impl HostControls for FakeWallet {
    async fn select_account(&self, account: Address) -> AppResult<()> {
        assert!(self.keyring.contains(&account), "unknown test account");
        *self.selected.lock().unwrap() = Some(account);
        if self.authorized.load(Ordering::SeqCst) {
            self.emit(WalletEvent::AccountsChanged(vec![account]));
        }
        Ok(())
    }

    async fn lock(&self) {
        self.authorized.store(false, Ordering::SeqCst);
        self.emit(WalletEvent::AccountsChanged(Vec::new()));
    }
}

pub struct FakeSigner {
    chain: SharedChain,
    account: Address,
}

impl ChainSigner for FakeSigner {
    type Staking = FakeStaking;
    type Token = FakeToken;

    fn account(&self) -> Address {
        self.account
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, Failure> {
        let mut chain = self.chain.lock().unwrap();
        chain.read(Read::Native)?;
        Ok(chain.native_of(owner))
    }

    async fn wait_for_finalization(&self, _tx: TxHash) -> Result<(), Failure> {
        let gate = self.chain.lock().unwrap().finalize_gate.clone();
        match gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        Ok(())
    }

    fn bind_staking(&self, address: Address) -> Self::Staking {
        FakeStaking {
            chain: Arc::clone(&self.chain),
            address,
            account: self.account,
        }
    }

    fn bind_token(&self, address: Address) -> Self::Token {
        FakeToken {
            chain: Arc::clone(&self.chain),
            address,
        }
    }
}

pub struct FakeStaking {
    chain: SharedChain,
    address: Address,
    account: Address,
}

impl StakingHandle for FakeStaking {
    fn address(&self) -> Address {
        self.address
    }

    async fn stakes(&self, owner: Address) -> Result<StakeRecord, Failure> {
        let mut chain = self.chain.lock().unwrap();
        chain.read(Read::Stakes)?;
        Ok(chain.stake_of(owner))
    }

    async fn calculate_reward(&self, owner: Address) -> Result<U256, Failure> {
        let mut chain = self.chain.lock().unwrap();
        chain.read(Read::Reward)?;
        Ok(chain.rewards.get(&owner).copied().unwrap_or_default())
    }

    async fn stake(&self, value: U256) -> Result<TxHash, Failure> {
        let mut chain = self.chain.lock().unwrap();
        let tx = chain.submit(Submitted::Stake(self.account, value))?;
        let cost = value + chain.gas_fee;
        let balance = chain.native_of(self.account);
        if balance < cost {
            return Err(Failure::with_code(
                -32000,
                "insufficient funds for gas * price + value",
            ));
        }
        let now = chain.now;
        let mut record = chain.stake_of(self.account);
        record.amount += value;
        record.timestamp = now;
        record.active = true;
        chain.stakes.insert(self.account, record);
        chain.native.insert(self.account, balance - cost);
        Ok(tx)
    }

    async fn unstake(&self) -> Result<TxHash, Failure> {
        let mut chain = self.chain.lock().unwrap();
        let tx = chain.submit(Submitted::Unstake(self.account))?;
        let record = chain.stake_of(self.account);
        if !record.active {
            return Err(Failure::message("execution reverted: No active stake"));
        }
        if chain.now < record.timestamp + LOCK_PERIOD {
            return Err(Failure::message("execution reverted: Lock period not elapsed"));
        }
        let refund = chain.native_of(self.account) + record.amount - chain.gas_fee;
        chain.native.insert(self.account, refund);
        chain.stakes.insert(self.account, StakeRecord::default());
        Ok(tx)
    }

    async fn claim_reward(&self) -> Result<TxHash, Failure> {
        let mut chain = self.chain.lock().unwrap();
        let tx = chain.submit(Submitted::Claim(self.account))?;
        let reward = chain.rewards.remove(&self.account).unwrap_or_default();
        if reward.is_zero() {
            return Err(Failure::message("execution reverted: No rewards to claim"));
        }
        let reserve = chain.tokens_of(self.address);
        if reserve < reward {
            return Err(Failure::message("execution reverted: ERC20: transfer amount exceeds balance"));
        }
        chain.tokens.insert(self.address, reserve - reward);
        let held = chain.tokens_of(self.account);
        chain.tokens.insert(self.account, held + reward);
        let now = chain.now;
        if let Some(record) = chain.stakes.get_mut(&self.account) {
            record.timestamp = now;
        }
        Ok(tx)
    }
}

pub struct FakeToken {
    chain: SharedChain,
    address: Address,
}

impl TokenHandle for FakeToken {
    fn address(&self) -> Address {
        self.address
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, Failure> {
        let mut chain = self.chain.lock().unwrap();
        chain.read(Read::Token)?;
        Ok(chain.tokens_of(owner))
    }
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        chain_id: TARGET_CHAIN,
        staking_address: STAKING.to_string(),
        token_address: TOKEN.to_string(),
        lock_period_secs: LOCK_PERIOD,
        min_stake_wei: U256::one(),
        wallet_install_url: "https://metamask.io".to_string(),
        token_symbol: "FIT".to_string(),
        uniform_preflight: false,
    }
}

pub struct Harness {
    pub chain: SharedChain,
    pub wallet: Arc<FakeWallet>,
    pub controller: SessionController<Arc<FakeWallet>>,
}

impl Harness {
    /// Two accounts holding 1.0 ETH each; the staking contract holds 1000 tokens.
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        let mut chain = FakeChain::default();
        chain.native.insert(account(1), eth("1.0"));
        chain.native.insert(account(2), eth("1.0"));
        chain.tokens.insert(staking_address(), eth("1000"));
        let chain = Arc::new(Mutex::new(chain));

        let wallet = Arc::new(FakeWallet::new(Arc::clone(&chain), vec![account(1), account(2)]));
        let clock_chain = Arc::clone(&chain);
        let controller = SessionController::new(
            Some(Arc::clone(&wallet)),
            settings,
            ErrorClassifier::default(),
        )
        .with_clock(Arc::new(move || clock_chain.lock().unwrap().now));

        Self {
            chain,
            wallet,
            controller,
        }
    }

    pub fn chain(&self) -> std::sync::MutexGuard<'_, FakeChain> {
        self.chain.lock().unwrap()
    }

    pub fn submissions(&self) -> Vec<Submitted> {
        self.chain().submissions.clone()
    }
}
