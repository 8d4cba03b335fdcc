//! Event emission shared by the four machines. Every helper swallows a
//! closed-channel error: an event the TU no longer listens for must not
//! wedge a state machine.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::trace;

use sipline_sip_core::Response;

use crate::transaction::{TransactionEvent, TransactionKey};

pub async fn send_provisional_response_event(
    events_tx: &mpsc::Sender<TransactionEvent>,
    tx_id: &TransactionKey,
    response: Response,
) {
    trace!(%tx_id, status = %response.status, "provisional response");
    let _ = events_tx
        .send(TransactionEvent::ProvisionalResponse {
            transaction_id: tx_id.clone(),
            response,
        })
        .await;
}

pub async fn send_success_response_event(
    events_tx: &mpsc::Sender<TransactionEvent>,
    tx_id: &TransactionKey,
    response: Response,
    need_ack: bool,
    source: SocketAddr,
) {
    trace!(%tx_id, status = %response.status, need_ack, "success response");
    let _ = events_tx
        .send(TransactionEvent::SuccessResponse {
            transaction_id: tx_id.clone(),
            response,
            need_ack,
            source,
        })
        .await;
}

pub async fn send_failure_response_event(
    events_tx: &mpsc::Sender<TransactionEvent>,
    tx_id: &TransactionKey,
    response: Response,
) {
    trace!(%tx_id, status = %response.status, "failure response");
    let _ = events_tx
        .send(TransactionEvent::FailureResponse {
            transaction_id: tx_id.clone(),
            response,
        })
        .await;
}

pub async fn send_transaction_timeout_event(
    events_tx: &mpsc::Sender<TransactionEvent>,
    tx_id: &TransactionKey,
) {
    trace!(%tx_id, "transaction timeout");
    let _ = events_tx
        .send(TransactionEvent::TransactionTimeout {
            transaction_id: tx_id.clone(),
        })
        .await;
}

pub async fn send_transport_error_event(
    events_tx: &mpsc::Sender<TransactionEvent>,
    tx_id: &TransactionKey,
) {
    trace!(%tx_id, "transport error");
    let _ = events_tx
        .send(TransactionEvent::TransportError {
            transaction_id: tx_id.clone(),
        })
        .await;
}

pub async fn send_timer_triggered_event(
    events_tx: &mpsc::Sender<TransactionEvent>,
    tx_id: &TransactionKey,
    timer: &str,
) {
    let _ = events_tx
        .send(TransactionEvent::TimerTriggered {
            transaction_id: tx_id.clone(),
            timer: timer.to_string(),
        })
        .await;
}
