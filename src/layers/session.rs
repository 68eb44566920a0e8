//! Session ownership: wallet connection, contract binding, read model and error state.
//!
//! One [`SessionController`] owns all of it. Every operation catches its own
//! failures and turns them into exactly one [`UserError`], which is both stored
//! as the current error state and returned to the caller.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use ethers::{
    types::{Address, U256},
    utils::to_checksum,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult, Failure},
    implementations::{
        actions::{self, ActionError, ActionKind, Submission},
        balance::{NATIVE_DISPLAY_DP, TOKEN_DISPLAY_DP},
        classifier::{ErrorCategory, ErrorClassifier, UserError},
        contracts::{ChainSigner, TxHash, parse_contract_address},
        network::{self, NetworkError},
        refresh::{self, ContractBinding, ReadModel},
    },
    layers::listener::EventListener,
    types::{AmountOut, BalancesOut, PendingOut, SessionView},
    wallet::{WalletEvent, WalletProvider},
};

const NATIVE_SYMBOL: &str = "ETH";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub state: ConnectionState,
}

/// What an external wallet event did to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventOutcome {
    Ignored,
    Rebound { account: Address },
    Disconnected,
    Reloaded { chain_id: u64 },
}

/// Unix seconds, injectable for tests.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    })
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub chain_id: u64,
    pub staking_address: String,
    pub token_address: String,
    pub lock_period_secs: u64,
    pub min_stake_wei: U256,
    pub wallet_install_url: String,
    pub token_symbol: String,
    pub uniform_preflight: bool,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let min_stake_wei = U256::from_dec_str(&config.min_stake_wei)
            .map_err(|err| AppError::Config(format!("invalid min_stake_wei: {err}")))?;
        Ok(Self {
            chain_id: config.chain_id,
            staking_address: config.staking_address.clone(),
            token_address: config.token_address.clone(),
            lock_period_secs: config.lock_period_secs,
            min_stake_wei,
            wallet_install_url: config.wallet_install_url.clone(),
            token_symbol: config.token_symbol.clone(),
            uniform_preflight: config.uniform_preflight,
        })
    }
}

/// One in-flight flag per action kind. A held [`PendingGuard`] keeps its flag raised.
#[derive(Debug, Default)]
pub struct PendingActions {
    connect: AtomicBool,
    stake: AtomicBool,
    unstake: AtomicBool,
    claim: AtomicBool,
}

impl PendingActions {
    fn flag(&self, kind: ActionKind) -> &AtomicBool {
        match kind {
            ActionKind::Connect => &self.connect,
            ActionKind::Stake => &self.stake,
            ActionKind::Unstake => &self.unstake,
            ActionKind::Claim => &self.claim,
        }
    }

    pub fn try_begin(&self, kind: ActionKind) -> Option<PendingGuard<'_>> {
        let flag = self.flag(kind);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PendingGuard { flag })
    }

    pub fn is_pending(&self, kind: ActionKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }

    fn snapshot(&self) -> PendingOut {
        PendingOut {
            connect: self.is_pending(ActionKind::Connect),
            stake: self.is_pending(ActionKind::Stake),
            unstake: self.is_pending(ActionKind::Unstake),
            claim: self.is_pending(ActionKind::Claim),
        }
    }
}

#[derive(Debug)]
pub struct PendingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct SessionState<S: ChainSigner> {
    session: Session,
    binding: Option<Arc<ContractBinding<S>>>,
    read_model: Option<ReadModel>,
    error: Option<UserError>,
    stake_input: String,
    install_prompt: Option<String>,
    /// Bumped on every bind and teardown so in-flight work can tell it went stale.
    epoch: u64,
}

impl<S: ChainSigner> SessionState<S> {
    fn fresh(epoch: u64) -> Self {
        Self {
            session: Session::default(),
            binding: None,
            read_model: None,
            error: None,
            stake_input: String::new(),
            install_prompt: None,
            epoch,
        }
    }

    /// Drop session, binding and read model together.
    fn teardown(&mut self) {
        self.session = Session::default();
        self.binding = None;
        self.read_model = None;
        self.epoch += 1;
    }

    fn bind(&mut self, account: Address, chain_id: u64, binding: Arc<ContractBinding<S>>) {
        self.session = Session {
            account: Some(account),
            chain_id: Some(chain_id),
            state: ConnectionState::Connected,
        };
        self.binding = Some(binding);
        self.read_model = None;
        self.epoch += 1;
    }
}

/// Binding captured by an operation when it starts.
struct Bound<S: ChainSigner> {
    binding: Arc<ContractBinding<S>>,
    account: Address,
    epoch: u64,
}

pub struct SessionController<W: WalletProvider> {
    wallet: Option<W>,
    settings: SessionSettings,
    classifier: ErrorClassifier,
    clock: Clock,
    pending: PendingActions,
    state: RwLock<SessionState<W::Signer>>,
}

impl<W: WalletProvider> SessionController<W> {
    pub fn new(wallet: Option<W>, settings: SessionSettings, classifier: ErrorClassifier) -> Self {
        Self {
            wallet,
            settings,
            classifier,
            clock: system_clock(),
            pending: PendingActions::default(),
            state: RwLock::new(SessionState::fresh(0)),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Listener on the wallet's notifications, if there is a wallet at all.
    pub fn subscribe(&self) -> Option<EventListener> {
        self.wallet.as_ref().map(EventListener::attach)
    }

    pub async fn session(&self) -> Session {
        self.state.read().await.session.clone()
    }

    pub async fn is_bound(&self) -> bool {
        self.state.read().await.binding.is_some()
    }

    pub async fn read_model(&self) -> Option<ReadModel> {
        self.state.read().await.read_model
    }

    pub async fn error(&self) -> Option<UserError> {
        self.state.read().await.error.clone()
    }

    pub fn is_pending(&self, kind: ActionKind) -> bool {
        self.pending.is_pending(kind)
    }

    pub async fn stake_input(&self) -> String {
        self.state.read().await.stake_input.clone()
    }

    pub async fn set_stake_input(&self, input: impl Into<String>) {
        self.state.write().await.stake_input = input.into();
    }

    pub async fn view(&self) -> SessionView {
        let state = self.state.read().await;
        let token_symbol = self.settings.token_symbol.as_str();
        SessionView {
            connection: state.session.state,
            account: state.session.account.map(|account| to_checksum(&account, None)),
            chain_id: state.session.chain_id,
            balances: state.read_model.map(|model| BalancesOut {
                native_balance: AmountOut::new(NATIVE_SYMBOL, model.native_balance, NATIVE_DISPLAY_DP),
                staked_amount: AmountOut::new(NATIVE_SYMBOL, model.staked_amount, NATIVE_DISPLAY_DP),
                pending_reward: AmountOut::new(token_symbol, model.pending_reward, TOKEN_DISPLAY_DP),
                token_balance: AmountOut::new(token_symbol, model.token_balance, TOKEN_DISPLAY_DP),
            }),
            stake_input: state.stake_input.clone(),
            pending: self.pending.snapshot(),
            error: state.error.clone(),
            install_url: state.install_prompt.clone(),
        }
    }

    /// Establish the session: authorize, enforce the network, bind both contracts, refresh once.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<Address, UserError> {
        let Some(_guard) = self.pending.try_begin(ActionKind::Connect) else {
            return Err(ErrorCategory::PendingRequestExists.into());
        };
        self.clear_error().await;

        let Some(wallet) = self.wallet.as_ref() else {
            warn!(
                install_url = %self.settings.wallet_install_url,
                "no wallet provider present"
            );
            let mut state = self.state.write().await;
            state.install_prompt = Some(self.settings.wallet_install_url.clone());
            return Err(record(&mut state, ErrorCategory::NoWalletProvider.into()));
        };

        let epoch = {
            let mut state = self.state.write().await;
            state.teardown();
            state.session.state = ConnectionState::Connecting;
            state.epoch
        };

        let (account, chain_id, binding) = match self.establish(wallet).await {
            Ok(parts) => parts,
            Err(err) => {
                let mut state = self.state.write().await;
                if state.epoch != epoch {
                    return Err(err);
                }
                state.teardown();
                return Err(record(&mut state, err));
            }
        };

        let binding = Arc::new(binding);
        let bound = {
            let mut state = self.state.write().await;
            if state.epoch != epoch {
                info!("session changed while connecting; dropping new binding");
                return Err(ErrorCategory::Unknown.into());
            }
            state.bind(account, chain_id, Arc::clone(&binding));
            Bound {
                binding,
                account,
                epoch: state.epoch,
            }
        };
        info!(account = ?account, chain_id, "wallet connected");

        if let Err(err) = self.refresh_bound(&bound).await {
            debug!("initial refresh failed: {err}");
        }
        Ok(account)
    }

    /// Every fallible connect step. Nothing is stored until all of them succeed.
    async fn establish(&self, wallet: &W) -> Result<(Address, u64, ContractBinding<W::Signer>), UserError> {
        let mut accounts = wallet
            .accounts()
            .await
            .map_err(|err| self.classify(&err))?;
        if accounts.is_empty() {
            info!("requesting account authorization");
            accounts = wallet
                .request_accounts()
                .await
                .map_err(|err| self.classify(&err))?;
        }
        let account = accounts
            .first()
            .copied()
            .ok_or_else(|| UserError::from(ErrorCategory::UserRejected))?;

        let chain_id = network::ensure_network(wallet, self.settings.chain_id)
            .await
            .map_err(|err| match err {
                NetworkError::Unreadable(failure) => self.classify(&failure),
                NetworkError::SwitchFailed(_) => ErrorCategory::NetworkSwitchFailed.into(),
            })?;

        let signer = wallet
            .signer(account)
            .await
            .map_err(|err| self.classify(&err))?;

        let staking_address = self.contract_address("staking", &self.settings.staking_address)?;
        let token_address = self.contract_address("token", &self.settings.token_address)?;

        Ok((
            account,
            chain_id,
            ContractBinding::new(signer, staking_address, token_address),
        ))
    }

    fn contract_address(&self, which: &str, raw: &str) -> Result<Address, UserError> {
        parse_contract_address(raw).ok_or_else(|| {
            error!(contract = which, address = raw, "malformed contract address in configuration");
            UserError::from(ErrorCategory::InvalidContractAddress)
        })
    }

    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        state.teardown();
        state.error = None;
        info!("session disconnected");
    }

    /// Throw the whole session away, as a page reload would.
    #[instrument(skip(self))]
    pub async fn reload(&self) {
        let mut state = self.state.write().await;
        let epoch = state.epoch + 1;
        *state = SessionState::fresh(epoch);
        info!("session reloaded");
    }

    /// Re-fetch the read model for the bound account.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<ReadModel, UserError> {
        self.clear_error().await;
        let bound = self.require_bound().await?;
        self.refresh_bound(&bound).await
    }

    /// Commit all four reads or none of them.
    async fn refresh_bound(&self, bound: &Bound<W::Signer>) -> Result<ReadModel, UserError> {
        match refresh::fetch_read_model(&bound.binding, bound.account).await {
            Ok(model) => {
                let mut state = self.state.write().await;
                if state.epoch == bound.epoch {
                    state.read_model = Some(model);
                } else {
                    debug!("discarding read model for a superseded session");
                }
                Ok(model)
            }
            Err(failure) => {
                warn!("read model refresh failed: {failure}");
                let err = self.classify(&failure);
                Err(self.record_if_current(bound.epoch, err).await)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn stake(&self) -> Result<TxHash, UserError> {
        let Some(_guard) = self.pending.try_begin(ActionKind::Stake) else {
            return Err(ErrorCategory::PendingRequestExists.into());
        };
        self.clear_error().await;
        let bound = self.require_bound().await?;

        let (input, known_balance) = {
            let state = self.state.read().await;
            let known = self
                .settings
                .uniform_preflight
                .then(|| state.read_model.map(|model| model.native_balance))
                .flatten();
            (state.stake_input.clone(), known)
        };
        let amount = match actions::preflight_stake(&input, self.settings.min_stake_wei, known_balance) {
            Ok(amount) => amount,
            Err(err) => return Err(self.settle(bound.epoch, err).await),
        };

        let tx = self.submit(&bound, Submission::Stake(amount)).await?;
        {
            let mut state = self.state.write().await;
            if state.epoch == bound.epoch {
                state.stake_input.clear();
            }
        }
        info!(%amount, "stake finalized");
        self.refresh_after(&bound).await;
        Ok(tx)
    }

    #[instrument(skip(self))]
    pub async fn unstake(&self) -> Result<TxHash, UserError> {
        let Some(_guard) = self.pending.try_begin(ActionKind::Unstake) else {
            return Err(ErrorCategory::PendingRequestExists.into());
        };
        self.clear_error().await;
        let bound = self.require_bound().await?;

        if self.settings.uniform_preflight {
            let checked = actions::require_unlocked_stake(
                &bound.binding,
                bound.account,
                (self.clock)(),
                self.settings.lock_period_secs,
            )
            .await;
            if let Err(err) = checked {
                return Err(self.settle(bound.epoch, err).await);
            }
        }

        let tx = self.submit(&bound, Submission::Unstake).await?;
        info!("unstake finalized");
        self.refresh_after(&bound).await;
        Ok(tx)
    }

    #[instrument(skip(self))]
    pub async fn claim(&self) -> Result<TxHash, UserError> {
        let Some(_guard) = self.pending.try_begin(ActionKind::Claim) else {
            return Err(ErrorCategory::PendingRequestExists.into());
        };
        self.clear_error().await;
        let bound = self.require_bound().await?;

        let reward = match actions::preflight_claim(
            &bound.binding,
            bound.account,
            (self.clock)(),
            self.settings.lock_period_secs,
        )
        .await
        {
            Ok(reward) => reward,
            Err(err) => return Err(self.settle(bound.epoch, err).await),
        };
        debug!(%reward, "claim preflight passed");

        let tx = self.submit(&bound, Submission::ClaimReward).await?;
        info!(%reward, "claim finalized");
        self.refresh_after(&bound).await;
        Ok(tx)
    }

    /// Apply one wallet notification. Callers feed these in one at a time.
    #[instrument(skip(self))]
    pub async fn handle_event(&self, event: WalletEvent) -> EventOutcome {
        match event {
            WalletEvent::ChainChanged(chain_id) => {
                info!(chain_id, "network changed, reloading session");
                self.reload().await;
                EventOutcome::Reloaded { chain_id }
            }
            WalletEvent::AccountsChanged(accounts) if accounts.is_empty() => {
                info!("wallet locked or all accounts revoked");
                self.disconnect().await;
                EventOutcome::Disconnected
            }
            WalletEvent::AccountsChanged(accounts) => {
                if self.session().await.state == ConnectionState::Disconnected {
                    debug!(?accounts, "accounts changed with no session; ignoring");
                    return EventOutcome::Ignored;
                }
                info!(?accounts, "accounts changed, rebinding");
                match self.connect().await {
                    Ok(account) => EventOutcome::Rebound { account },
                    Err(err) if err.category == ErrorCategory::PendingRequestExists => {
                        debug!("connect already in flight; it will pick up the new account");
                        EventOutcome::Ignored
                    }
                    Err(err) => {
                        warn!("rebinding after account change failed: {err}");
                        EventOutcome::Disconnected
                    }
                }
            }
        }
    }

    async fn submit(&self, bound: &Bound<W::Signer>, submission: Submission) -> Result<TxHash, UserError> {
        match actions::submit_and_finalize(&bound.binding, submission).await {
            Ok(tx) => Ok(tx),
            Err(failure) => {
                warn!(?submission, "transaction failed: {failure}");
                Err(self.settle(bound.epoch, ActionError::Remote(failure)).await)
            }
        }
    }

    /// Post-action refresh. Its failure is already recorded; the action itself stands.
    async fn refresh_after(&self, bound: &Bound<W::Signer>) {
        if let Err(err) = self.refresh_bound(bound).await {
            debug!("refresh after action failed: {err}");
        }
    }

    async fn require_bound(&self) -> Result<Bound<W::Signer>, UserError> {
        let mut state = self.state.write().await;
        match (&state.binding, state.session.account) {
            (Some(binding), Some(account)) => Ok(Bound {
                binding: Arc::clone(binding),
                account,
                epoch: state.epoch,
            }),
            _ => {
                debug!("operation needs a connected wallet");
                Err(record(&mut state, ErrorCategory::Unknown.into()))
            }
        }
    }

    async fn clear_error(&self) {
        self.state.write().await.error = None;
    }

    fn classify(&self, failure: &Failure) -> UserError {
        self.classifier.classify(failure, ErrorCategory::Unknown)
    }

    async fn settle(&self, epoch: u64, err: ActionError) -> UserError {
        let user = match err {
            ActionError::Refused(category) => category.into(),
            ActionError::Remote(failure) => self.classify(&failure),
        };
        self.record_if_current(epoch, user).await
    }

    /// Store the error unless the session it belongs to is gone.
    async fn record_if_current(&self, epoch: u64, err: UserError) -> UserError {
        let mut state = self.state.write().await;
        if state.epoch == epoch {
            record(&mut state, err)
        } else {
            debug!("dropping error from a superseded session: {err}");
            err
        }
    }
}

fn record<S: ChainSigner>(
    state: &mut SessionState<S>,
    err: UserError,
) -> UserError {
    state.error = Some(err.clone());
    err
}
