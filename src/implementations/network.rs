use tracing::{info, warn};

use crate::{error::Failure, wallet::WalletProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The wallet could not report which chain it is on.
    Unreadable(Failure),
    /// The switch request was refused or failed.
    SwitchFailed(Failure),
}

/// Make sure the wallet sits on `target`, asking it to switch exactly once if not.
pub async fn ensure_network<W: WalletProvider>(wallet: &W, target: u64) -> Result<u64, NetworkError> {
    let current = wallet.chain_id().await.map_err(NetworkError::Unreadable)?;
    if current == target {
        return Ok(current);
    }

    info!(current, target, "requesting network switch");
    match wallet.switch_chain(target).await {
        Ok(()) => Ok(target),
        Err(err) => {
            warn!(current, target, "network switch failed: {err}");
            Err(NetworkError::SwitchFailed(err))
        }
    }
}
