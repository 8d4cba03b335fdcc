//! The transaction manager: owns the client/server transaction tables,
//! consumes transport events, routes messages to the right machine
//! (RFC 3261 matching with the legacy fallback), runs the CANCEL/ACK
//! special cases, keeps terminated transactions matchable for a linger
//! window, and pumps transaction events to the TU with the dialog hooks
//! applied on the way through.

pub mod functions;
mod handlers;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use sipline_sip_core::prelude::*;

use crate::client::{ClientInviteTransaction, ClientNonInviteTransaction, ClientTransaction};
use crate::dialog::{DialogHandle, DialogState};
use crate::error::{Error, Result};
use crate::server::{ServerInviteTransaction, ServerNonInviteTransaction, ServerTransaction};
use crate::timer::{TimerManager, TimerSettings};
use crate::transaction::{
    InternalTransactionCommand, TransactionEvent, TransactionKey, TransactionKind,
};
use crate::transport::{Transport, TransportEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The transaction layer's front door. Cheap to clone; all state is
/// shared.
#[derive(Clone)]
pub struct TransactionManager {
    transport: Arc<dyn Transport>,
    client_transactions: Arc<DashMap<TransactionKey, Arc<dyn ClientTransaction>>>,
    server_transactions: Arc<DashMap<TransactionKey, Arc<dyn ServerTransaction>>>,
    dialogs: Arc<DashMap<TransactionKey, Arc<dyn DialogHandle>>>,
    timer_manager: Arc<TimerManager>,
    timer_settings: TimerSettings,
    /// TU-facing sender; the pump forwards into it.
    events_tx: mpsc::Sender<TransactionEvent>,
    /// Sender handed to every transaction (and used for the manager's
    /// own events) so everything passes through the pump.
    internal_events_tx: mpsc::Sender<TransactionEvent>,
    linger_tasks: Arc<DashMap<TransactionKey, JoinHandle<()>>>,
    worker_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl TransactionManager {
    /// Builds the manager, spawns the transport intake and event pump
    /// tasks, and returns the TU event stream. Timer settings are
    /// adjusted for the transport's reliability.
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        timer_settings: TimerSettings,
    ) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let timer_settings = timer_settings.for_transport(transport.is_reliable());
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (internal_events_tx, internal_events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let manager = TransactionManager {
            transport,
            client_transactions: Arc::new(DashMap::new()),
            server_transactions: Arc::new(DashMap::new()),
            dialogs: Arc::new(DashMap::new()),
            timer_manager: Arc::new(TimerManager::new()),
            timer_settings,
            events_tx,
            internal_events_tx,
            linger_tasks: Arc::new(DashMap::new()),
            worker_tasks: Arc::new(StdMutex::new(Vec::new())),
        };

        let pump = tokio::spawn(run_event_pump(manager.clone(), internal_events_rx));
        let intake = tokio::spawn(run_transport_intake(manager.clone(), transport_rx));
        if let Ok(mut tasks) = manager.worker_tasks.lock() {
            tasks.push(pump);
            tasks.push(intake);
        }

        (manager, events_rx)
    }

    /// Creates a client transaction for `request` toward `destination`.
    /// A topmost Via (with a fresh RFC 3261 branch) is filled in when
    /// the request lacks one. The request is not sent until
    /// [`send_request`](Self::send_request).
    pub fn create_client_transaction(
        &self,
        mut request: Request,
        destination: SocketAddr,
    ) -> Result<TransactionKey> {
        self.ensure_via(&mut request)?;
        let key = TransactionKey::from_request(&request, false)
            .ok_or_else(|| Error::Other("request has no Via branch".to_string()))?;
        if self.client_transactions.contains_key(&key) {
            return Err(Error::TransactionExists(key));
        }

        let kind = TransactionKind::for_method(&request.method, false);
        let tx: Arc<dyn ClientTransaction> = if kind.is_invite() {
            Arc::new(ClientInviteTransaction::new(
                request,
                destination,
                self.transport.clone(),
                self.internal_events_tx.clone(),
                self.timer_manager.clone(),
                self.timer_settings.clone(),
            )?)
        } else {
            Arc::new(ClientNonInviteTransaction::new(
                request,
                destination,
                self.transport.clone(),
                self.internal_events_tx.clone(),
                self.timer_manager.clone(),
                self.timer_settings.clone(),
            )?)
        };
        self.client_transactions.insert(key.clone(), tx);
        debug!(%key, %kind, "client transaction created");
        Ok(key)
    }

    /// Sends the request of a previously created client transaction.
    pub async fn send_request(&self, key: &TransactionKey) -> Result<()> {
        let tx = self
            .client_transactions
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
        tx.initiate().await
    }

    /// Creates a server transaction for a request the TU obtained out
    /// of band. Requests arriving through the transport channel get
    /// their transactions created automatically.
    pub fn create_server_transaction(
        &self,
        request: Request,
        source: SocketAddr,
    ) -> Result<TransactionKey> {
        let key = TransactionKey::from_request(&request, true)
            .ok_or_else(|| Error::Other("request has no Via branch".to_string()))?;
        if self.server_transactions.contains_key(&key) {
            return Err(Error::TransactionExists(key));
        }
        let kind = TransactionKind::for_method(&request.method, true);
        let tx: Arc<dyn ServerTransaction> = if kind.is_invite() {
            Arc::new(ServerInviteTransaction::new(
                request,
                source,
                self.transport.clone(),
                self.internal_events_tx.clone(),
                self.timer_manager.clone(),
                self.timer_settings.clone(),
            )?)
        } else {
            Arc::new(ServerNonInviteTransaction::new(
                request,
                source,
                self.transport.clone(),
                self.internal_events_tx.clone(),
                self.timer_manager.clone(),
                self.timer_settings.clone(),
            )?)
        };
        self.server_transactions.insert(key.clone(), tx);
        debug!(%key, %kind, "server transaction created");
        Ok(key)
    }

    /// Hands a TU response to the matching server transaction. Sending
    /// a 2xx on an INVITE transaction hands retransmission duty to the
    /// registered dialog via its `start_timer` hook.
    pub async fn send_response(&self, key: &TransactionKey, response: Response) -> Result<()> {
        let tx = self
            .server_transactions
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
        let is_invite_success = response.status.is_success() && key.method().is_invite();
        tx.send_response(response).await?;
        if is_invite_success {
            if let Some(dialog) = self.dialogs.get(key).map(|e| e.value().clone()) {
                dialog.start_timer(key.clone()).await;
            }
        }
        Ok(())
    }

    /// Associates a dialog with a transaction; its hooks fire as events
    /// flow through the pump.
    pub fn register_dialog(&self, key: TransactionKey, dialog: Arc<dyn DialogHandle>) {
        self.dialogs.insert(key, dialog);
    }

    pub fn unregister_dialog(&self, key: &TransactionKey) {
        self.dialogs.remove(key);
    }

    /// Asks a transaction's event loop to stop.
    pub async fn terminate_transaction(&self, key: &TransactionKey) -> Result<()> {
        let sender = self
            .command_sender(key)
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
        sender
            .send(InternalTransactionCommand::Terminate)
            .await
            .map_err(Error::from)
    }

    /// Terminates every live transaction and stops the manager's tasks.
    /// Events already queued may be dropped.
    pub async fn shutdown(&self) {
        let senders: Vec<_> = self
            .client_transactions
            .iter()
            .map(|e| e.value().command_sender())
            .chain(
                self.server_transactions
                    .iter()
                    .map(|e| e.value().command_sender()),
            )
            .collect();
        futures::future::join_all(
            senders
                .iter()
                .map(|sender| sender.send(InternalTransactionCommand::Terminate)),
        )
        .await;
        self.client_transactions.clear();
        self.server_transactions.clear();
        self.dialogs.clear();
        for entry in self.linger_tasks.iter() {
            entry.value().abort();
        }
        self.linger_tasks.clear();
        if let Ok(mut tasks) = self.worker_tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        debug!("transaction manager shut down");
    }

    pub(crate) fn command_sender(
        &self,
        key: &TransactionKey,
    ) -> Option<mpsc::Sender<InternalTransactionCommand>> {
        if let Some(tx) = self.client_transactions.get(key) {
            return Some(tx.value().command_sender());
        }
        self.server_transactions
            .get(key)
            .map(|tx| tx.value().command_sender())
    }

    pub(crate) async fn emit(&self, event: TransactionEvent) {
        if self.internal_events_tx.send(event).await.is_err() {
            warn!("event pump gone, dropping event");
        }
    }

    fn ensure_via(&self, request: &mut Request) -> Result<()> {
        if request.vias.is_empty() {
            let local = self.transport.local_addr()?;
            request.vias.push(Via::new(
                "UDP",
                local.ip().to_string(),
                Some(local.port()),
            ));
        }
        let needs_branch = request
            .top_via()
            .and_then(Via::branch)
            .map(|b| b.is_empty())
            .unwrap_or(true);
        if needs_branch {
            if let Some(via) = request.vias.first_mut() {
                via.set_param(Param::branch(&generate_branch()));
            }
        }
        Ok(())
    }

    /// Keeps a terminated transaction matchable for the linger window,
    /// then drops every trace of it.
    fn schedule_linger_removal(&self, key: TransactionKey) {
        let linger = self.timer_settings.linger;
        let manager = self.clone();
        let removal_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            manager.remove_transaction(&removal_key);
        });
        if let Some(previous) = self.linger_tasks.insert(key, handle) {
            previous.abort();
        }
    }

    fn remove_transaction(&self, key: &TransactionKey) {
        trace!(%key, "linger window over, removing transaction");
        self.client_transactions.remove(key);
        self.server_transactions.remove(key);
        self.dialogs.remove(key);
        self.timer_manager.unregister_transaction(key);
        self.linger_tasks.remove(key);
    }

    async fn apply_dialog_hooks(&self, event: &TransactionEvent) {
        let key = match event {
            TransactionEvent::ProvisionalResponse { transaction_id, .. }
            | TransactionEvent::SuccessResponse { transaction_id, .. }
            | TransactionEvent::TransactionTimeout { transaction_id }
            | TransactionEvent::AckReceived { transaction_id, .. } => transaction_id,
            _ => return,
        };
        let Some(dialog) = self.dialogs.get(key).map(|e| e.value().clone()) else {
            return;
        };
        match event {
            TransactionEvent::ProvisionalResponse { response, .. } => {
                if let Some(tag) = response.to.tag() {
                    dialog.set_remote_tag(tag.to_string()).await;
                    dialog.set_state(DialogState::Early).await;
                }
            }
            TransactionEvent::SuccessResponse { response, .. } => {
                if let Some(tag) = response.to.tag() {
                    dialog.set_remote_tag(tag.to_string()).await;
                }
                dialog.set_state(DialogState::Confirmed).await;
            }
            TransactionEvent::TransactionTimeout { .. } => {
                dialog.set_state(DialogState::Terminated).await;
            }
            TransactionEvent::AckReceived { request, .. } => {
                dialog.ack_received(request.clone()).await;
            }
            _ => {}
        }
    }
}

async fn run_event_pump(
    manager: TransactionManager,
    mut internal_rx: mpsc::Receiver<TransactionEvent>,
) {
    while let Some(event) = internal_rx.recv().await {
        manager.apply_dialog_hooks(&event).await;
        if let TransactionEvent::TransactionTerminated { transaction_id } = &event {
            manager.schedule_linger_removal(transaction_id.clone());
        }
        if manager.events_tx.send(event).await.is_err() {
            debug!("TU event receiver dropped, stopping pump");
            break;
        }
    }
}

async fn run_transport_intake(
    manager: TransactionManager,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = transport_rx.recv().await {
        if let Err(e) = manager.handle_transport_event(event).await {
            warn!(error = %e, "failed to handle transport event");
            let _ = manager
                .internal_events_tx
                .send(TransactionEvent::error(&e, None))
                .await;
        }
    }
    debug!("transport channel closed, intake stopping");
}
