//! INVITE server transaction (RFC 3261 Section 17.2.1).
//!
//! The machine starts in a short Trying window: if the TU has not
//! produced any response within the grace period, the layer sends 100
//! Trying itself. Provisionals keep it in Proceeding; a 2xx terminates
//! immediately (the TU owns 2xx retransmission); a non-2xx final parks
//! it in Completed, retransmitting under Timer G until the ACK arrives
//! (-> Confirmed, Timer I) or Timer H gives up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

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
use crate::utils;

#[derive(Debug, Default)]
struct ServerInviteTimerHandles {
    timer_trying100: Option<JoinHandle<()>>,
    timer_g: Option<JoinHandle<()>>,
    current_timer_g_interval: Option<Duration>,
    timer_h: Option<JoinHandle<()>>,
    timer_i: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ServerInviteLogic {
    timer_factory: TimerFactory,
}

impl ServerInviteLogic {
    fn start_timer_trying100(
        &self,
        data: &Arc<ServerTransactionData>,
        timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<()> {
        let handle = timer_utils::start_transaction_timer(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::Trying100,
            self.timer_settings().trying_grace,
            data.cmd_tx.clone(),
        )?;
        timer_handles.timer_trying100 = Some(handle);
        Ok(())
    }

    fn start_timer_g(
        &self,
        data: &Arc<ServerTransactionData>,
        timer_handles: &mut ServerInviteTimerHandles,
        interval: Duration,
    ) -> Result<()> {
        let handle = timer_utils::start_transaction_timer(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::G,
            interval,
            data.cmd_tx.clone(),
        )?;
        timer_handles.timer_g = Some(handle);
        timer_handles.current_timer_g_interval = Some(interval);
        Ok(())
    }

    fn start_timer_h(
        &self,
        data: &Arc<ServerTransactionData>,
        timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<()> {
        let handle = timer_utils::start_transaction_timer(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::H,
            self.timer_settings().wait_time_h,
            data.cmd_tx.clone(),
        )?;
        timer_handles.timer_h = Some(handle);
        Ok(())
    }

    fn start_timer_i(
        &self,
        data: &Arc<ServerTransactionData>,
        timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<()> {
        let handle = timer_utils::start_timer_with_transition(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::I,
            self.timer_settings().wait_time_i,
            data.cmd_tx.clone(),
            TransactionState::Terminated,
        )?;
        timer_handles.timer_i = Some(handle);
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

    async fn handle_trying_grace_expired(
        &self,
        data: &Arc<ServerTransactionData>,
        current_state: TransactionState,
    ) -> Result<Option<TransactionState>> {
        if current_state != TransactionState::Trying {
            return Ok(None);
        }
        if data.last_response.lock().await.is_some() {
            return Ok(None);
        }
        let request = data.request.lock().await.clone();
        let trying = utils::create_trying_response(&request);
        debug!(id = %data.id, "TU quiet past grace window, sending 100 Trying");
        if let Err(e) = self.send_response_message(data, &trying).await {
            warn!(id = %data.id, error = %e, "could not send 100 Trying");
            common_logic::send_transport_error_event(&data.events_tx, &data.id).await;
            return Ok(Some(TransactionState::Terminated));
        }
        *data.last_response.lock().await = Some(trying);
        Ok(Some(TransactionState::Proceeding))
    }

    async fn handle_timer_g_trigger(
        &self,
        data: &Arc<ServerTransactionData>,
        current_state: TransactionState,
        timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        if current_state != TransactionState::Completed {
            return Ok(None);
        }
        if let Err(e) = data.retransmit_last_response().await {
            warn!(id = %data.id, error = %e, "Timer G retransmission failed");
            common_logic::send_transport_error_event(&data.events_tx, &data.id).await;
            return Ok(Some(TransactionState::Terminated));
        }
        let current = timer_handles
            .current_timer_g_interval
            .unwrap_or(self.timer_settings().t1);
        let next = timer_utils::calculate_backoff_interval(current, self.timer_settings());
        self.start_timer_g(data, timer_handles, next)?;
        Ok(None)
    }

    async fn handle_timer_h_trigger(
        &self,
        data: &Arc<ServerTransactionData>,
        current_state: TransactionState,
    ) -> Result<Option<TransactionState>> {
        if current_state != TransactionState::Completed {
            return Ok(None);
        }
        // ACK never came.
        common_logic::send_transaction_timeout_event(&data.events_tx, &data.id).await;
        Ok(Some(TransactionState::Terminated))
    }

    async fn process_request(
        &self,
        data: &Arc<ServerTransactionData>,
        request: Request,
        current_state: TransactionState,
    ) -> Result<Option<TransactionState>> {
        match request.method {
            Method::Invite => match current_state {
                // Nothing sent yet; the grace timer or the TU will
                // answer soon.
                TransactionState::Trying => Ok(None),
                TransactionState::Proceeding | TransactionState::Completed => {
                    data.retransmit_last_response().await?;
                    Ok(None)
                }
                other => {
                    trace!(id = %data.id, state = %other, "ignoring INVITE retransmission");
                    Ok(None)
                }
            },
            Method::Ack => match current_state {
                TransactionState::Completed => {
                    let _ = data
                        .events_tx
                        .send(TransactionEvent::AckReceived {
                            transaction_id: data.id.clone(),
                            request,
                        })
                        .await;
                    Ok(Some(TransactionState::Confirmed))
                }
                TransactionState::Confirmed => {
                    trace!(id = %data.id, "absorbing ACK retransmission");
                    Ok(None)
                }
                other => {
                    warn!(id = %data.id, state = %other, "ACK in unexpected state");
                    Ok(None)
                }
            },
            ref method => {
                warn!(id = %data.id, %method, "unexpected request routed to INVITE server transaction");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TransactionLogic<ServerTransactionData, ServerInviteTimerHandles> for ServerInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
    }

    fn timer_settings(&self) -> &TimerSettings {
        self.timer_factory.settings()
    }

    fn cancel_all_specific_timers(&self, timer_handles: &mut ServerInviteTimerHandles) {
        if let Some(handle) = timer_handles.timer_trying100.take() {
            handle.abort();
        }
        if let Some(handle) = timer_handles.timer_g.take() {
            handle.abort();
        }
        timer_handles.current_timer_g_interval = None;
        if let Some(handle) = timer_handles.timer_h.take() {
            handle.abort();
        }
        if let Some(handle) = timer_handles.timer_i.take() {
            handle.abort();
        }
    }

    async fn process_message(
        &self,
        data: &Arc<ServerTransactionData>,
        message: Message,
        current_state: TransactionState,
        _timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        match message {
            Message::Request(request) => {
                self.process_request(data, request, current_state).await
            }
            Message::Response(_) => {
                warn!(id = %data.id, "server transaction received a response");
                Ok(None)
            }
        }
    }

    async fn handle_timer(
        &self,
        data: &Arc<ServerTransactionData>,
        timer_name: &str,
        current_state: TransactionState,
        timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        common_logic::send_timer_triggered_event(&data.events_tx, &data.id, timer_name).await;
        match timer_name {
            "Trying100" => self.handle_trying_grace_expired(data, current_state).await,
            "G" => {
                self.handle_timer_g_trigger(data, current_state, timer_handles)
                    .await
            }
            "H" => self.handle_timer_h_trigger(data, current_state).await,
            "I" => Ok(None),
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
        _timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        if !matches!(
            current_state,
            TransactionState::Trying | TransactionState::Proceeding
        ) {
            warn!(id = %data.id, state = %current_state, status = %response.status,
                  "response dropped, transaction already has a final response");
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
        } else if status.is_success() {
            // The TU retransmits the 2xx end-to-end; the transaction's
            // work here is done.
            Ok(Some(TransactionState::Terminated))
        } else {
            Ok(Some(TransactionState::Completed))
        }
    }

    async fn on_enter_state(
        &self,
        data: &Arc<ServerTransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timer_handles: &mut ServerInviteTimerHandles,
        _command_tx: mpsc::Sender<InternalTransactionCommand>,
    ) -> Result<()> {
        match new_state {
            TransactionState::Trying => self.start_timer_trying100(data, timer_handles),
            TransactionState::Completed => {
                if !data.transport.is_reliable() {
                    self.start_timer_g(data, timer_handles, self.timer_settings().t1)?;
                }
                self.start_timer_h(data, timer_handles)
            }
            TransactionState::Confirmed => self.start_timer_i(data, timer_handles),
            TransactionState::Terminated => {
                timer_utils::unregister_transaction(&self.timer_factory.timer_manager(), &data.id);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Public handle for an INVITE server transaction.
#[derive(Debug, Clone)]
pub struct ServerInviteTransaction {
    data: Arc<ServerTransactionData>,
}

impl ServerInviteTransaction {
    /// Builds the transaction for a received INVITE and spawns its
    /// event loop, which immediately enters the Trying grace window.
    pub fn new(
        request: Request,
        remote_addr: SocketAddr,
        transport: Arc<dyn Transport>,
        events_tx: mpsc::Sender<TransactionEvent>,
        timer_manager: Arc<TimerManager>,
        timer_config: TimerSettings,
    ) -> Result<Self> {
        if request.method != Method::Invite {
            return Err(Error::Other(format!(
                "INVITE server transaction needs an INVITE, got {}",
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
        let logic = Arc::new(ServerInviteLogic {
            timer_factory: TimerFactory::new(timer_config, timer_manager),
        });

        let handle = tokio::spawn(run_transaction_loop(data.clone(), logic, cmd_rx));
        if let Ok(mut guard) = data.event_loop_handle.try_lock() {
            *guard = Some(handle);
        }
        // Channel is freshly created with room to spare.
        cmd_tx
            .try_send(InternalTransactionCommand::TransitionTo(
                TransactionState::Trying,
            ))
            .map_err(|_| Error::ChannelClosed)?;
        Ok(ServerInviteTransaction { data })
    }
}

impl Transaction for ServerInviteTransaction {
    fn id(&self) -> &TransactionKey {
        &self.data.id
    }

    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
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
impl ServerTransaction for ServerInviteTransaction {
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
