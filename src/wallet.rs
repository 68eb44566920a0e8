use std::{str::FromStr, sync::Arc, time::Duration};

use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::Address,
};
use serde_json::{Value, json};
use tokio::{
    sync::{RwLock, broadcast},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult, Failure},
    implementations::{
        classifier::USER_REJECTED_CODE,
        contracts::{ChainSigner, EthersSigner},
    },
};

const EVENT_CAPACITY: usize = 16;

/// Notifications a wallet pushes to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// The injected-wallet surface the session relies on.
#[allow(async_fn_in_trait)]
pub trait WalletProvider {
    type Signer: ChainSigner;

    /// Accounts the user has already authorized; empty until authorization.
    async fn accounts(&self) -> Result<Vec<Address>, Failure>;
    /// Ask the user to authorize accounts. Suspends until they approve or reject.
    async fn request_accounts(&self) -> Result<Vec<Address>, Failure>;
    async fn chain_id(&self) -> Result<u64, Failure>;
    async fn switch_chain(&self, chain_id: u64) -> Result<(), Failure>;
    async fn signer(&self, account: Address) -> Result<Self::Signer, Failure>;
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

impl<T: WalletProvider> WalletProvider for Arc<T> {
    type Signer = T::Signer;

    async fn accounts(&self) -> Result<Vec<Address>, Failure> {
        (**self).accounts().await
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, Failure> {
        (**self).request_accounts().await
    }

    async fn chain_id(&self) -> Result<u64, Failure> {
        (**self).chain_id().await
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), Failure> {
        (**self).switch_chain(chain_id).await
    }

    async fn signer(&self, account: Address) -> Result<Self::Signer, Failure> {
        (**self).signer(account).await
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        (**self).subscribe()
    }
}

/// Controls the host exposes on the wallet itself rather than on the session.
#[allow(async_fn_in_trait)]
pub trait HostControls {
    async fn select_account(&self, account: Address) -> AppResult<()>;
    async fn lock(&self);
}

pub type KeyringSigner = EthersSigner<SignerMiddleware<Provider<Http>, LocalWallet>>;

/// Keyring-backed wallet that behaves like an injected browser wallet over a JSON-RPC endpoint.
#[derive(Debug)]
pub struct WalletManager {
    provider: Arc<Provider<Http>>,
    keyring: Vec<LocalWallet>,
    authorized: RwLock<bool>,
    selected: RwLock<Option<Address>>,
    events: broadcast::Sender<WalletEvent>,
    confirmations: usize,
}

impl WalletManager {
    pub fn new(provider: Arc<Provider<Http>>, keyring: Vec<LocalWallet>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let selected = keyring.first().map(Signer::address);
        Self {
            provider,
            keyring,
            authorized: RwLock::new(false),
            selected: RwLock::new(selected),
            events,
            confirmations: 1,
        }
    }

    pub fn from_config(config: &AppConfig, provider: Arc<Provider<Http>>) -> AppResult<Self> {
        let keyring = config
            .keyring()
            .iter()
            .map(|key| parse_key(key))
            .collect::<AppResult<Vec<_>>>()?;
        let mut manager = Self::new(provider, keyring);
        manager.confirmations = config.confirmations;
        Ok(manager)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.keyring.iter().map(Signer::address).collect()
    }

    /// Host-side account switch, announced as `AccountsChanged`.
    pub async fn select_account(&self, account: Address) -> AppResult<()> {
        if !self.keyring.iter().any(|key| key.address() == account) {
            return Err(AppError::InvalidInput(format!(
                "account {account:#x} is not in the keyring"
            )));
        }
        *self.selected.write().await = Some(account);
        if *self.authorized.read().await {
            self.emit(WalletEvent::AccountsChanged(vec![account]));
        }
        Ok(())
    }

    /// Revoke authorization, announced as `AccountsChanged` with no accounts.
    pub async fn lock(&self) {
        *self.authorized.write().await = false;
        self.emit(WalletEvent::AccountsChanged(Vec::new()));
    }

    /// Poll the endpoint's chain id and emit `ChainChanged` whenever it moves.
    pub fn spawn_chain_watcher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let wallet = Arc::clone(self);
        tokio::spawn(async move {
            let mut last = None;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match wallet.provider.get_chainid().await {
                    Ok(id) => {
                        let id = id.as_u64();
                        if last.is_some_and(|prev| prev != id) {
                            info!(chain_id = id, "chain changed");
                            wallet.emit(WalletEvent::ChainChanged(id));
                        }
                        last = Some(id);
                    }
                    Err(err) => warn!("chain watcher failed to read chain id: {err}"),
                }
            }
        })
    }

    fn emit(&self, event: WalletEvent) {
        // No subscribers is fine: nobody is connected yet.
        if self.events.send(event).is_err() {
            debug!("wallet event dropped, no subscribers");
        }
    }
}

impl WalletProvider for WalletManager {
    type Signer = KeyringSigner;

    async fn accounts(&self) -> Result<Vec<Address>, Failure> {
        if !*self.authorized.read().await {
            return Ok(Vec::new());
        }
        Ok(self.selected.read().await.iter().copied().collect())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, Failure> {
        let Some(account) = *self.selected.read().await else {
            return Err(Failure::with_code(
                USER_REJECTED_CODE,
                "user rejected the request: keyring is empty",
            ));
        };
        *self.authorized.write().await = true;
        Ok(vec![account])
    }

    async fn chain_id(&self) -> Result<u64, Failure> {
        let id = self.provider.get_chainid().await?;
        Ok(id.as_u64())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), Failure> {
        let params = [json!({ "chainId": format!("{chain_id:#x}") })];
        self.provider
            .request::<_, Value>("wallet_switchEthereumChain", params)
            .await?;

        let current = self.chain_id().await?;
        if current != chain_id {
            return Err(Failure::message(format!(
                "wallet stayed on chain {current} instead of {chain_id}"
            )));
        }
        Ok(())
    }

    async fn signer(&self, account: Address) -> Result<Self::Signer, Failure> {
        let key = self
            .keyring
            .iter()
            .find(|key| key.address() == account)
            .cloned()
            .ok_or_else(|| Failure::message(format!("no key for account {account:#x}")))?;
        let chain_id = self.chain_id().await?;
        let client = SignerMiddleware::new(self.provider.as_ref().clone(), key.with_chain_id(chain_id));
        Ok(EthersSigner::new(Arc::new(client), account)
            .with_confirmations(self.confirmations)
            .with_poll_interval(self.provider.get_interval()))
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

impl HostControls for WalletManager {
    async fn select_account(&self, account: Address) -> AppResult<()> {
        WalletManager::select_account(self, account).await
    }

    async fn lock(&self) {
        WalletManager::lock(self).await
    }
}

fn parse_key(raw: &str) -> AppResult<LocalWallet> {
    let trimmed = raw.trim().trim_start_matches("0x");
    LocalWallet::from_str(trimmed)
        .map_err(|err| AppError::Wallet(format!("failed to parse private key: {err}")))
}
