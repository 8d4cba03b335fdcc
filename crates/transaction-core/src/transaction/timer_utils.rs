//! Small helpers the machines use to schedule their timers through the
//! shared [`TimerManager`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::timer::{TimerManager, TimerSettings, TimerType};
use crate::transaction::{InternalTransactionCommand, TransactionKey, TransactionState};

/// Registers the transaction's command sender (idempotent) and starts a
/// one-shot timer for it.
pub fn start_transaction_timer(
    timer_manager: &Arc<TimerManager>,
    tx_id: &TransactionKey,
    timer_type: TimerType,
    interval: Duration,
    command_tx: mpsc::Sender<InternalTransactionCommand>,
) -> Result<JoinHandle<()>> {
    timer_manager.register_transaction(tx_id.clone(), command_tx);
    timer_manager.start_timer(tx_id, timer_type, interval)
}

/// Like [`start_transaction_timer`], but the timer's whole job is a
/// state transition (the wait timers D, I, J, K).
pub fn start_timer_with_transition(
    timer_manager: &Arc<TimerManager>,
    tx_id: &TransactionKey,
    timer_type: TimerType,
    interval: Duration,
    command_tx: mpsc::Sender<InternalTransactionCommand>,
    target_state: TransactionState,
) -> Result<JoinHandle<()>> {
    timer_manager.register_transaction(tx_id.clone(), command_tx);
    timer_manager.start_timer_with_transition(tx_id, timer_type, interval, target_state)
}

/// Exponential backoff for Timers A, E, and G: doubles the interval,
/// capped at T2.
pub fn calculate_backoff_interval(current: Duration, settings: &TimerSettings) -> Duration {
    (current * 2).min(settings.t2)
}

/// Drops the timer registration for `tx_id`; outstanding timers become
/// no-ops.
pub fn unregister_transaction(timer_manager: &Arc<TimerManager>, tx_id: &TransactionKey) {
    timer_manager.unregister_transaction(tx_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_t2() {
        let settings = TimerSettings::default();
        let mut interval = settings.t1;
        interval = calculate_backoff_interval(interval, &settings);
        assert_eq!(interval, Duration::from_secs(1));
        interval = calculate_backoff_interval(interval, &settings);
        assert_eq!(interval, Duration::from_secs(2));
        interval = calculate_backoff_interval(interval, &settings);
        assert_eq!(interval, Duration::from_secs(4));
        interval = calculate_backoff_interval(interval, &settings);
        assert_eq!(interval, settings.t2);
    }
}
