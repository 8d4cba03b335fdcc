//! Checks the client machines run on incoming messages before acting on
//! them.

use tracing::warn;

use sipline_sip_core::{Message, Response, StatusCode};

use crate::transaction::TransactionKey;

/// Pulls the response out of `message`, logging and returning `None`
/// for the request case (a client machine should never be handed one).
pub fn extract_response<'a>(
    message: &'a Message,
    tx_id: &TransactionKey,
) -> Option<&'a Response> {
    match message.as_response() {
        Some(response) => Some(response),
        None => {
            warn!(%tx_id, "client transaction received a non-response message");
            None
        }
    }
}

/// Whether `response` actually answers this transaction: topmost Via
/// branch and CSeq method must both match.
pub fn response_matches_transaction(response: &Response, tx_id: &TransactionKey) -> bool {
    if response.cseq.method != *tx_id.method() {
        return false;
    }
    response.branch().is_some_and(|b| b == tx_id.branch())
}

/// Splits a status into (provisional, success, failure).
pub fn categorize_response_status(status: StatusCode) -> (bool, bool, bool) {
    (
        status.is_provisional(),
        status.is_success(),
        status.is_failure(),
    )
}
