//! Server transactions (RFC 3261 Section 17.2): the INVITE machine with
//! its 100-Trying grace window, response retransmission, and ACK
//! absorption, and the simpler non-INVITE machine.

pub mod invite;
pub mod non_invite;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use sipline_sip_core::{Request, Response};

use crate::error::{Error, Result};
use crate::transaction::runner::{
    AsRefKey, AsRefState, HasCommandSender, HasTransactionEvents, HasTransport,
};
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, Transaction, TransactionEvent,
    TransactionKey,
};
use crate::transport::Transport;

pub use invite::ServerInviteTransaction;
pub use non_invite::ServerNonInviteTransaction;

/// Shared state of a server transaction.
#[derive(Debug)]
pub struct ServerTransactionData {
    pub id: TransactionKey,
    pub state: Arc<AtomicTransactionState>,
    pub request: Arc<Mutex<Request>>,
    pub last_response: Arc<Mutex<Option<Response>>>,
    pub remote_addr: SocketAddr,
    pub transport: Arc<dyn Transport>,
    pub events_tx: mpsc::Sender<TransactionEvent>,
    pub cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    pub event_loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ServerTransactionData {
    pub(crate) async fn send_command(&self, cmd: InternalTransactionCommand) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(Error::from)
    }

    /// Replays the last response sent, if any. Used for request
    /// retransmissions in Proceeding/Completed.
    pub(crate) async fn retransmit_last_response(&self) -> Result<bool> {
        let response = self.last_response.lock().await.clone();
        match response {
            Some(response) => {
                self.transport
                    .send_message(sipline_sip_core::Message::Response(response), self.remote_addr)
                    .await
                    .map_err(|e| Error::transport_error(e, "response retransmission failed"))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl AsRefState for ServerTransactionData {
    fn as_ref_state(&self) -> &Arc<AtomicTransactionState> {
        &self.state
    }
}

impl AsRefKey for ServerTransactionData {
    fn as_ref_key(&self) -> &TransactionKey {
        &self.id
    }
}

impl HasTransactionEvents for ServerTransactionData {
    fn get_tu_event_sender(&self) -> mpsc::Sender<TransactionEvent> {
        self.events_tx.clone()
    }
}

impl HasTransport for ServerTransactionData {
    fn get_transport_layer(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }
}

impl HasCommandSender for ServerTransactionData {
    fn get_self_command_sender(&self) -> mpsc::Sender<InternalTransactionCommand> {
        self.cmd_tx.clone()
    }
}

/// Public surface of a server transaction.
#[async_trait]
pub trait ServerTransaction: Transaction {
    /// Feeds a retransmitted or related request (ACK) into the machine.
    async fn process_request(&self, request: Request) -> Result<()>;

    /// Hands a TU response to the machine for sending; the machine
    /// transitions according to the response class.
    async fn send_response(&self, response: Response) -> Result<()>;

    async fn original_request(&self) -> Request;

    async fn last_response(&self) -> Option<Response>;
}
