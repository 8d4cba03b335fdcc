//! Client transactions (RFC 3261 Section 17.1): the INVITE machine with
//! its retransmission/ACK duties and the simpler non-INVITE machine.

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

pub use invite::ClientInviteTransaction;
pub use non_invite::ClientNonInviteTransaction;

/// Shared state of a client transaction, owned jointly by the public
/// handle and the spawned event loop.
#[derive(Debug)]
pub struct ClientTransactionData {
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

impl ClientTransactionData {
    pub(crate) async fn send_command(&self, cmd: InternalTransactionCommand) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(Error::from)
    }
}

impl AsRefState for ClientTransactionData {
    fn as_ref_state(&self) -> &Arc<AtomicTransactionState> {
        &self.state
    }
}

impl AsRefKey for ClientTransactionData {
    fn as_ref_key(&self) -> &TransactionKey {
        &self.id
    }
}

impl HasTransactionEvents for ClientTransactionData {
    fn get_tu_event_sender(&self) -> mpsc::Sender<TransactionEvent> {
        self.events_tx.clone()
    }
}

impl HasTransport for ClientTransactionData {
    fn get_transport_layer(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }
}

impl HasCommandSender for ClientTransactionData {
    fn get_self_command_sender(&self) -> mpsc::Sender<InternalTransactionCommand> {
        self.cmd_tx.clone()
    }
}

/// Public surface of a client transaction.
#[async_trait]
pub trait ClientTransaction: Transaction {
    /// Sends the request and starts the machine. Valid once, from the
    /// initial state.
    async fn initiate(&self) -> Result<()>;

    /// Feeds a response received from the transport into the machine.
    async fn process_response(&self, response: Response) -> Result<()>;

    async fn original_request(&self) -> Request;

    async fn last_response(&self) -> Option<Response>;
}
