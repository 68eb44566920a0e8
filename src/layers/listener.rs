use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::{
    layers::session::{EventOutcome, SessionController},
    wallet::{WalletEvent, WalletProvider},
};

/// Subscription to a wallet's `accountsChanged` / `chainChanged` notifications.
///
/// Dropping the listener unsubscribes.
#[derive(Debug)]
pub struct EventListener {
    events: broadcast::Receiver<WalletEvent>,
}

impl EventListener {
    pub fn new(events: broadcast::Receiver<WalletEvent>) -> Self {
        Self { events }
    }

    pub fn attach<W: WalletProvider>(wallet: &W) -> Self {
        Self::new(wallet.subscribe())
    }

    /// Next notification, or `None` once the wallet is gone.
    pub async fn next(&mut self) -> Option<WalletEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "wallet events lagged; continuing with the latest");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Feed every notification into the session, one at a time, until the wallet goes away.
pub async fn pump<W: WalletProvider>(
    controller: &SessionController<W>,
    mut listener: EventListener,
) -> Vec<EventOutcome> {
    let mut outcomes = Vec::new();
    while let Some(event) = listener.next().await {
        outcomes.push(controller.handle_event(event).await);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_events_in_order_then_none() {
        let (tx, rx) = broadcast::channel(4);
        let mut listener = EventListener::new(rx);
        tx.send(WalletEvent::ChainChanged(1)).unwrap();
        tx.send(WalletEvent::AccountsChanged(vec![])).unwrap();
        drop(tx);

        assert_eq!(listener.next().await, Some(WalletEvent::ChainChanged(1)));
        assert_eq!(listener.next().await, Some(WalletEvent::AccountsChanged(vec![])));
        assert_eq!(listener.next().await, None);
    }

    #[tokio::test]
    async fn lag_skips_to_retained_events() {
        let (tx, rx) = broadcast::channel(1);
        let mut listener = EventListener::new(rx);
        tx.send(WalletEvent::ChainChanged(1)).unwrap();
        tx.send(WalletEvent::ChainChanged(2)).unwrap();

        assert_eq!(listener.next().await, Some(WalletEvent::ChainChanged(2)));
    }
}
