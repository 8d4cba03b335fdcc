//! The narrow seam between transactions and the dialog layer.
//!
//! The dialog state machine itself lives above this crate; a transaction
//! associated with a dialog only ever makes the four calls below. The
//! manager invokes them while pumping transaction events: remote tag
//! learned from a tagged response, dialog state nudged by response class
//! and timeouts, `ack_received` on the ACK for a non-2xx final, and
//! `start_timer` when a 2xx leaves retransmission duty with the dialog.

use async_trait::async_trait;

use sipline_sip_core::Request;

use crate::transaction::TransactionKey;

/// Dialog states as far as this layer cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Provisional (tagged 1xx) seen.
    Early,
    /// 2xx seen.
    Confirmed,
    /// Transaction timeout tore the early dialog down.
    Terminated,
}

/// Callbacks into a dialog, implemented by the layer above.
#[async_trait]
pub trait DialogHandle: Send + Sync {
    /// The peer's tag, learned from a tagged response.
    async fn set_remote_tag(&self, tag: String);

    /// The ACK for a non-2xx final response arrived.
    async fn ack_received(&self, request: Request);

    /// A 2xx was sent on this server transaction; the dialog now owns
    /// retransmitting it until the ACK arrives.
    async fn start_timer(&self, transaction_id: TransactionKey);

    async fn set_state(&self, state: DialogState);
}
