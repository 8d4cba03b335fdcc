//! The generic event loop every transaction machine runs on.
//!
//! A transaction is a spawned [`run_transaction_loop`] task plus a
//! shared data struct. The loop owns the timer handles and the state
//! transitions; the per-kind [`TransactionLogic`] supplies what each
//! command means. The marker traits below are what the loop needs from
//! the data struct, so client and server data types stay independent.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::error::Error;
use crate::transaction::logic::TransactionLogic;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TransactionEvent, TransactionKey,
    TransactionState,
};
use crate::transport::Transport;

pub trait AsRefState {
    fn as_ref_state(&self) -> &Arc<AtomicTransactionState>;
}

pub trait AsRefKey {
    fn as_ref_key(&self) -> &TransactionKey;
}

pub trait HasTransactionEvents {
    fn get_tu_event_sender(&self) -> mpsc::Sender<TransactionEvent>;
}

pub trait HasTransport {
    fn get_transport_layer(&self) -> Arc<dyn Transport>;
}

pub trait HasCommandSender {
    fn get_self_command_sender(&self) -> mpsc::Sender<InternalTransactionCommand>;
}

async fn emit_error<D>(data: &Arc<D>, err: &Error, tx_id: &TransactionKey)
where
    D: HasTransactionEvents,
{
    error!(%tx_id, error = %err, "transaction loop error");
    let _ = data
        .get_tu_event_sender()
        .send(TransactionEvent::error(err, Some(tx_id.clone())))
        .await;
}

/// Drives one transaction until it reaches `Terminated` or its command
/// channel closes. Emits `StateChanged` on every transition and
/// `TransactionTerminated` when the loop exits.
pub async fn run_transaction_loop<D, TH, L>(
    data: Arc<D>,
    logic: Arc<L>,
    mut cmd_rx: mpsc::Receiver<InternalTransactionCommand>,
) where
    D: AsRefState
        + AsRefKey
        + HasTransactionEvents
        + HasTransport
        + HasCommandSender
        + Send
        + Sync
        + 'static,
    TH: Default + Send + 'static,
    L: TransactionLogic<D, TH>,
{
    let tx_id = data.as_ref_key().clone();
    let mut timer_handles = TH::default();
    trace!(%tx_id, kind = %logic.kind(), "transaction loop started");

    while let Some(command) = cmd_rx.recv().await {
        let current_state = data.as_ref_state().get();

        match command {
            InternalTransactionCommand::TransitionTo(new_state) => {
                if new_state == current_state {
                    continue;
                }
                if let Err(e) = AtomicTransactionState::validate_transition(
                    logic.kind(),
                    current_state,
                    new_state,
                    &tx_id,
                ) {
                    emit_error(&data, &e, &tx_id).await;
                    continue;
                }

                logic.cancel_all_specific_timers(&mut timer_handles);
                let previous_state = data.as_ref_state().set(new_state);
                debug!(%tx_id, from = %previous_state, to = %new_state, "state transition");
                let _ = data
                    .get_tu_event_sender()
                    .send(TransactionEvent::StateChanged {
                        transaction_id: tx_id.clone(),
                        previous_state,
                        new_state,
                    })
                    .await;

                if let Err(e) = logic
                    .on_enter_state(
                        &data,
                        new_state,
                        previous_state,
                        &mut timer_handles,
                        data.get_self_command_sender(),
                    )
                    .await
                {
                    emit_error(&data, &e, &tx_id).await;
                }
            }
            InternalTransactionCommand::ProcessMessage(message) => {
                match logic
                    .process_message(&data, message, current_state, &mut timer_handles)
                    .await
                {
                    Ok(Some(next_state)) => {
                        let _ = data
                            .get_self_command_sender()
                            .send(InternalTransactionCommand::TransitionTo(next_state))
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => emit_error(&data, &e, &tx_id).await,
                }
            }
            InternalTransactionCommand::SendResponse(response) => {
                match logic
                    .handle_send_response(&data, response, current_state, &mut timer_handles)
                    .await
                {
                    Ok(Some(next_state)) => {
                        let _ = data
                            .get_self_command_sender()
                            .send(InternalTransactionCommand::TransitionTo(next_state))
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => emit_error(&data, &e, &tx_id).await,
                }
            }
            InternalTransactionCommand::Timer(name) => {
                trace!(%tx_id, timer = %name, state = %current_state, "timer fired");
                match logic
                    .handle_timer(&data, &name, current_state, &mut timer_handles)
                    .await
                {
                    Ok(Some(next_state)) => {
                        let _ = data
                            .get_self_command_sender()
                            .send(InternalTransactionCommand::TransitionTo(next_state))
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => emit_error(&data, &e, &tx_id).await,
                }
            }
            InternalTransactionCommand::TransportError => {
                let _ = data
                    .get_tu_event_sender()
                    .send(TransactionEvent::TransportError {
                        transaction_id: tx_id.clone(),
                    })
                    .await;
                let _ = data
                    .get_self_command_sender()
                    .send(InternalTransactionCommand::TransitionTo(
                        TransactionState::Terminated,
                    ))
                    .await;
            }
            InternalTransactionCommand::Terminate => {
                logic.cancel_all_specific_timers(&mut timer_handles);
                data.as_ref_state().set(TransactionState::Terminated);
                break;
            }
        }

        if data.as_ref_state().get() == TransactionState::Terminated {
            break;
        }
    }

    logic.cancel_all_specific_timers(&mut timer_handles);
    trace!(%tx_id, "transaction loop finished");
    let _ = data
        .get_tu_event_sender()
        .send(TransactionEvent::TransactionTerminated {
            transaction_id: tx_id,
        })
        .await;
}
