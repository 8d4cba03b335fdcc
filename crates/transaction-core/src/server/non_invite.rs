//! Non-INVITE server transaction (RFC 3261 Section 17.2.2).
//!
//! Trying until the TU answers: provisionals move to Proceeding and are
//! replayed on request retransmissions, a final response parks the
//! machine in Completed under Timer J. There is no ACK and no response
//! retransmission timer; the peer's request retransmissions drive
//! replays.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use sipline_sip_core::{Message, Method, Request, Response};

use crate::error::{Error, Result};
use crate::server::{ServerTransaction, ServerTransactionData};
use crate::timer::{TimerFactory, TimerManager, TimerSettings, TimerType};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::run_transaction_loop;
use crate::transaction::{
    common_logic, timer_utils, AtomicTransactionState, InternalTransactionCommand, Transaction,
    TransactionEvent, TransactionKey, TransactionKind, TransactionState,
};
use crate::transport::Transport;

#[derive(Debug, Default)]
struct ServerNonInviteTimerHandles {
    timer_j: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ServerNonInviteLogic {
    timer_factory: TimerFactory,
}

impl ServerNonInviteLogic {
    fn start_timer_j(
        &self,
        data: &Arc<ServerTransactionData>,
        timer_handles: &mut ServerNonInviteTimerHandles,
    ) -> Result<()> {
        let handle = timer_utils::start_timer_with_transition(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::J,
            self.timer_settings().wait_time_j,
            data.cmd_tx.clone(),
            TransactionState::Terminated,
        )?;
        timer_handles.timer_j = Some(handle);
        Ok(())
    }

    async fn send_response_message(
        &self,
        data: &Arc<ServerTransactionData>,
        response: &Response,
    ) -> Result<()> {
        data.transport
            .send_message(Message::Response(response.clone()), data.remote_addr)
            .await
            .map_err(|e| Error::transport_error(e, "failed to send response"))
    }
}

#[async_trait]
impl TransactionLogic<ServerTransactionData, ServerNonInviteTimerHandles>
    for ServerNonInviteLogic
{
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    fn timer_settings(&self) -> &TimerSettings {
        self.timer_factory.settings()
    }

    fn cancel_all_specific_timers(&self, timer_handles: &mut ServerNonInviteTimerHandles) {
        if let Some(handle) = timer_handles.timer_j.take() {
            handle.abort();
        }
    }

    async fn process_message(
        &self,
        data: &Arc<ServerTransactionData>,
        message: Message,
        current_state: TransactionState,
        _timer_handles: &mut ServerNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let Message::Request(request) = message else {
            warn!(id = %data.id, "server transaction received a response");
            return Ok(None);
        };
        if request.method != *data.id.method() {
            warn!(id = %data.id, method = %request.method, "mismatched request method");
            return Ok(None);
        }
        match current_state {
            // Nothing sent yet; absorb the retransmission.
            TransactionState::Trying => Ok(None),
            TransactionState::Proceeding | TransactionState::Completed => {
                if !data.retransmit_last_response().await? {
                    trace!(id = %data.id, "retransmission before any response");
                }
                Ok(None)
            }
            other => {
                trace!(id = %data.id, state = %other, "ignoring request retransmission");
                Ok(None)
            }
        }
    }

    async fn handle_timer(
        &self,
        data: &Arc<ServerTransactionData>,
        timer_name: &str,
        _current_state: TransactionState,
        _timer_handles: &mut ServerNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        common_logic::send_timer_triggered_event(&data.events_tx, &data.id, timer_name).await;
        match timer_name {
            // Timer J's transition rides in with the timer command.
            "J" => Ok(None),
            other => {
                warn!(id = %data.id, timer = other, "unknown timer");
                Ok(None)
            }
        }
    }

    async fn handle_send_response(
        &self,
        data: &Arc<ServerTransactionData>,
        response: Response,
        current_state: TransactionState,
        _timer_handles: &mut ServerNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        if !matches!(
            current_state,
            TransactionState::Trying | TransactionState::Proceeding
        ) {
            warn!(id = %data.id, state = %current_state, status = %response.status,
                  "response dropped, transaction already completed");
            return Ok(None);
        }
        if let Err(e) = self.send_response_message(data, &response).await {
            warn!(id = %data.id, error = %e, "response send failed");
            common_logic::send_transport_error_event(&data.events_tx, &data.id).await;
            return Ok(Some(TransactionState::Terminated));
        }
        let status = response.status;
        *data.last_response.lock().await = Some(response);

        if status.is_provisional() {
            Ok(if current_state == TransactionState::Trying {
                Some(TransactionState::Proceeding)
            } else {
                None
            })
        } else {
            Ok(Some(TransactionState::Completed))
        }
    }

    async fn on_enter_state(
        &self,
        data: &Arc<ServerTransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timer_handles: &mut ServerNonInviteTimerHandles,
        _command_tx: mpsc::Sender<InternalTransactionCommand>,
    ) -> Result<()> {
        match new_state {
            TransactionState::Completed => self.start_timer_j(data, timer_handles),
            TransactionState::Terminated => {
                timer_utils::unregister_transaction(&self.timer_factory.timer_manager(), &data.id);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Public handle for a non-INVITE server transaction.
#[derive(Debug, Clone)]
pub struct ServerNonInviteTransaction {
    data: Arc<ServerTransactionData>,
}

impl ServerNonInviteTransaction {
    pub fn new(
        request: Request,
        remote_addr: SocketAddr,
        transport: Arc<dyn Transport>,
        events_tx: mpsc::Sender<TransactionEvent>,
        timer_manager: Arc<TimerManager>,
        timer_config: TimerSettings,
    ) -> Result<Self> {
        if matches!(request.method, Method::Invite | Method::Ack) {
            return Err(Error::Other(format!(
                "non-INVITE server transaction cannot carry {}",
                request.method
            )));
        }
        let id = TransactionKey::from_request(&request, true)
            .ok_or_else(|| Error::Other("request has no Via branch".to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(100);
        timer_manager.register_transaction(id.clone(), cmd_tx.clone());

        let data = Arc::new(ServerTransactionData {
            id,
            state: Arc::new(AtomicTransactionState::new(TransactionState::Initial)),
            request: Arc::new(Mutex::new(request)),
            last_response: Arc::new(Mutex::new(None)),
            remote_addr,
            transport,
            events_tx,
            cmd_tx: cmd_tx.clone(),
            event_loop_handle: Arc::new(Mutex::new(None)),
        });
        let logic = Arc::new(ServerNonInviteLogic {
            timer_factory: TimerFactory::new(timer_config, timer_manager),
        });

        let handle = tokio::spawn(run_transaction_loop(data.clone(), logic, cmd_rx));
        if let Ok(mut guard) = data.event_loop_handle.try_lock() {
            *guard = Some(handle);
        }
        cmd_tx
            .try_send(InternalTransactionCommand::TransitionTo(
                TransactionState::Trying,
            ))
            .map_err(|_| Error::ChannelClosed)?;
        Ok(ServerNonInviteTransaction { data })
    }
}

impl Transaction for ServerNonInviteTransaction {
    fn id(&self) -> &TransactionKey {
        &self.data.id
    }

    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    fn state(&self) -> TransactionState {
        self.data.state.get()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.data.remote_addr
    }

    fn command_sender(&self) -> mpsc::Sender<InternalTransactionCommand> {
        self.data.cmd_tx.clone()
    }
}

#[async_trait]
impl ServerTransaction for ServerNonInviteTransaction {
    async fn process_request(&self, request: Request) -> Result<()> {
        self.data
            .send_command(InternalTransactionCommand::ProcessMessage(
                Message::Request(request),
            ))
            .await
    }

    async fn send_response(&self, response: Response) -> Result<()> {
        self.data
            .send_command(InternalTransactionCommand::SendResponse(response))
            .await
    }

    async fn original_request(&self) -> Request {
        self.data.request.lock().await.clone()
    }

    async fn last_response(&self) -> Option<Response> {
        self.data.last_response.lock().await.clone()
    }
}
