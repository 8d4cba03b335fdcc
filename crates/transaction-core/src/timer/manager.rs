use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::timer::TimerType;
use crate::transaction::{InternalTransactionCommand, TransactionKey, TransactionState};

/// Schedules timer wakeups for transactions.
///
/// The manager holds no timer state beyond the command sender of each
/// registered transaction. A timer is a spawned sleep that sends
/// [`InternalTransactionCommand::Timer`] back into the transaction's
/// event loop; cancellation is the caller aborting the returned
/// [`JoinHandle`]. The machines own their handles (see the per-logic
/// `TimerHandles` structs), so dropping a transaction drops its timers.
#[derive(Debug, Default)]
pub struct TimerManager {
    senders: DashMap<TransactionKey, mpsc::Sender<InternalTransactionCommand>>,
}

impl TimerManager {
    pub fn new() -> Self {
        TimerManager {
            senders: DashMap::new(),
        }
    }

    /// Registers the command sender timers for `key` will fire into.
    pub fn register_transaction(
        &self,
        key: TransactionKey,
        sender: mpsc::Sender<InternalTransactionCommand>,
    ) {
        self.senders.insert(key, sender);
    }

    /// Removes the registration; outstanding timers for `key` become
    /// no-ops when they fire.
    pub fn unregister_transaction(&self, key: &TransactionKey) {
        self.senders.remove(key);
    }

    fn sender_for(&self, key: &TransactionKey) -> Result<mpsc::Sender<InternalTransactionCommand>> {
        self.senders
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))
    }

    /// Starts a one-shot timer that delivers `Timer(name)` to the
    /// transaction after `interval`.
    pub fn start_timer(
        &self,
        key: &TransactionKey,
        timer_type: TimerType,
        interval: Duration,
    ) -> Result<JoinHandle<()>> {
        let sender = self.sender_for(key)?;
        let key = key.clone();
        trace!(%key, timer = %timer_type, ?interval, "starting timer");
        Ok(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if sender
                .send(InternalTransactionCommand::Timer(
                    timer_type.name().to_string(),
                ))
                .await
                .is_err()
            {
                trace!(%key, timer = %timer_type, "timer fired after loop exit");
            }
        }))
    }

    /// Starts a one-shot timer that, on firing, reports the timer and
    /// asks the machine to transition to `target_state`. Used for the
    /// pure wait timers (D, I, J, K) whose only effect is a transition.
    pub fn start_timer_with_transition(
        &self,
        key: &TransactionKey,
        timer_type: TimerType,
        interval: Duration,
        target_state: TransactionState,
    ) -> Result<JoinHandle<()>> {
        let sender = self.sender_for(key)?;
        let key = key.clone();
        Ok(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let timer_cmd =
                InternalTransactionCommand::Timer(timer_type.name().to_string());
            if sender.send(timer_cmd).await.is_err() {
                trace!(%key, timer = %timer_type, "timer fired after loop exit");
                return;
            }
            if sender
                .send(InternalTransactionCommand::TransitionTo(target_state))
                .await
                .is_err()
            {
                warn!(%key, timer = %timer_type, "loop exited between timer and transition");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::Method;

    fn key() -> TransactionKey {
        TransactionKey::new("z9hG4bKtimer", Method::Invite, false)
    }

    #[tokio::test]
    async fn timer_fires_into_registered_channel() {
        let manager = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(10);
        manager.register_transaction(key(), tx);

        manager
            .start_timer(&key(), TimerType::A, Duration::from_millis(10))
            .unwrap();

        match rx.recv().await {
            Some(InternalTransactionCommand::Timer(name)) => assert_eq!(name, "A"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn transition_timer_sends_both_commands() {
        let manager = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(10);
        manager.register_transaction(key(), tx);

        manager
            .start_timer_with_transition(
                &key(),
                TimerType::K,
                Duration::from_millis(10),
                TransactionState::Terminated,
            )
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(InternalTransactionCommand::Timer(name)) if name == "K"
        ));
        assert!(matches!(
            rx.recv().await,
            Some(InternalTransactionCommand::TransitionTo(TransactionState::Terminated))
        ));
    }

    #[tokio::test]
    async fn unregistered_transaction_is_an_error() {
        let manager = TimerManager::new();
        let err = manager
            .start_timer(&key(), TimerType::B, Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, Error::TransactionNotFound(_)));
    }

    #[tokio::test]
    async fn aborted_timer_never_fires() {
        let manager = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(10);
        manager.register_transaction(key(), tx);

        let handle = manager
            .start_timer(&key(), TimerType::G, Duration::from_millis(50))
            .unwrap();
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
