//! INVITE client transaction (RFC 3261 Section 17.1.1).
//!
//! Calling: the INVITE is sent, Timer A retransmits it (unreliable
//! transports), Timer B bounds the whole attempt. A provisional moves
//! the machine to Proceeding, a 2xx hands the response to the TU (which
//! owns the ACK) and terminates, a 3xx-6xx is ACKed here and parks the
//! machine in Completed under Timer D to absorb retransmissions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use sipline_sip_core::{Message, Method, Request, Response};

use crate::client::{ClientTransaction, ClientTransactionData};
use crate::error::{Error, Result};
use crate::timer::{TimerFactory, TimerManager, TimerSettings, TimerType};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::run_transaction_loop;
use crate::transaction::{
    common_logic, timer_utils, validators, AtomicTransactionState, InternalTransactionCommand,
    Transaction, TransactionEvent, TransactionKey, TransactionKind, TransactionState,
};
use crate::transport::Transport;
use crate::utils;

#[derive(Debug, Default)]
struct ClientInviteTimerHandles {
    timer_a: Option<JoinHandle<()>>,
    current_timer_a_interval: Option<Duration>,
    timer_b: Option<JoinHandle<()>>,
    timer_d: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ClientInviteLogic {
    timer_factory: TimerFactory,
}

impl ClientInviteLogic {
    fn start_timer_a(
        &self,
        data: &Arc<ClientTransactionData>,
        timer_handles: &mut ClientInviteTimerHandles,
        interval: Duration,
    ) -> Result<()> {
        let handle = timer_utils::start_transaction_timer(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::A,
            interval,
            data.cmd_tx.clone(),
        )?;
        timer_handles.timer_a = Some(handle);
        timer_handles.current_timer_a_interval = Some(interval);
        Ok(())
    }

    fn start_timer_b(
        &self,
        data: &Arc<ClientTransactionData>,
        timer_handles: &mut ClientInviteTimerHandles,
    ) -> Result<()> {
        let handle = timer_utils::start_transaction_timer(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::B,
            self.timer_settings().transaction_timeout,
            data.cmd_tx.clone(),
        )?;
        timer_handles.timer_b = Some(handle);
        Ok(())
    }

    fn start_timer_d(
        &self,
        data: &Arc<ClientTransactionData>,
        timer_handles: &mut ClientInviteTimerHandles,
    ) -> Result<()> {
        let handle = timer_utils::start_timer_with_transition(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::D,
            self.timer_settings().wait_time_d,
            data.cmd_tx.clone(),
            TransactionState::Terminated,
        )?;
        timer_handles.timer_d = Some(handle);
        Ok(())
    }

    async fn send_request(&self, data: &Arc<ClientTransactionData>) -> Result<()> {
        let request = data.request.lock().await.clone();
        data.transport
            .send_message(Message::Request(request), data.remote_addr)
            .await
            .map_err(|e| Error::transport_error(e, "failed to send INVITE"))
    }

    async fn send_ack(&self, data: &Arc<ClientTransactionData>, response: &Response) -> Result<()> {
        let request = data.request.lock().await.clone();
        let ack = utils::create_ack_from_invite(&request, response)?;
        data.transport
            .send_message(Message::Request(ack), data.remote_addr)
            .await
            .map_err(|e| Error::transport_error(e, "failed to send ACK"))
    }

    async fn handle_timer_a_trigger(
        &self,
        data: &Arc<ClientTransactionData>,
        current_state: TransactionState,
        timer_handles: &mut ClientInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        if current_state != TransactionState::Calling {
            trace!(id = %data.id, "ignoring stale Timer A in {:?}", current_state);
            return Ok(None);
        }
        if let Err(e) = self.send_request(data).await {
            warn!(id = %data.id, error = %e, "INVITE retransmission failed");
            common_logic::send_transport_error_event(&data.events_tx, &data.id).await;
            return Ok(Some(TransactionState::Terminated));
        }
        let current = timer_handles
            .current_timer_a_interval
            .unwrap_or(self.timer_settings().t1);
        let next = timer_utils::calculate_backoff_interval(current, self.timer_settings());
        self.start_timer_a(data, timer_handles, next)?;
        Ok(None)
    }

    async fn handle_timer_b_trigger(
        &self,
        data: &Arc<ClientTransactionData>,
        current_state: TransactionState,
    ) -> Result<Option<TransactionState>> {
        if current_state != TransactionState::Calling {
            return Ok(None);
        }
        common_logic::send_transaction_timeout_event(&data.events_tx, &data.id).await;
        Ok(Some(TransactionState::Terminated))
    }

    async fn process_response(
        &self,
        data: &Arc<ClientTransactionData>,
        response: Response,
        current_state: TransactionState,
    ) -> Result<Option<TransactionState>> {
        if !validators::response_matches_transaction(&response, &data.id) {
            warn!(id = %data.id, status = %response.status, "response does not match transaction");
            return Ok(None);
        }
        *data.last_response.lock().await = Some(response.clone());
        let (is_provisional, is_success, is_failure) =
            validators::categorize_response_status(response.status);

        match current_state {
            TransactionState::Calling | TransactionState::Proceeding => {
                if is_provisional {
                    common_logic::send_provisional_response_event(
                        &data.events_tx,
                        &data.id,
                        response,
                    )
                    .await;
                    return Ok(if current_state == TransactionState::Calling {
                        Some(TransactionState::Proceeding)
                    } else {
                        None
                    });
                }
                if is_success {
                    // The TU owns the ACK for a 2xx; the transaction is
                    // done the moment the response is delivered.
                    common_logic::send_success_response_event(
                        &data.events_tx,
                        &data.id,
                        response,
                        true,
                        data.remote_addr,
                    )
                    .await;
                    return Ok(Some(TransactionState::Terminated));
                }
                if is_failure {
                    if let Err(e) = self.send_ack(data, &response).await {
                        warn!(id = %data.id, error = %e, "ACK for failure response failed");
                        common_logic::send_transport_error_event(&data.events_tx, &data.id).await;
                        return Ok(Some(TransactionState::Terminated));
                    }
                    common_logic::send_failure_response_event(&data.events_tx, &data.id, response)
                        .await;
                    return Ok(Some(TransactionState::Completed));
                }
                Ok(None)
            }
            TransactionState::Completed => {
                // Final response retransmission; re-ACK, stay put.
                if is_failure {
                    if let Err(e) = self.send_ack(data, &response).await {
                        warn!(id = %data.id, error = %e, "re-ACK failed");
                        common_logic::send_transport_error_event(&data.events_tx, &data.id).await;
                        return Ok(Some(TransactionState::Terminated));
                    }
                }
                Ok(None)
            }
            other => {
                trace!(id = %data.id, state = %other, "ignoring response in terminal state");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TransactionLogic<ClientTransactionData, ClientInviteTimerHandles> for ClientInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
    }

    fn timer_settings(&self) -> &TimerSettings {
        self.timer_factory.settings()
    }

    fn cancel_all_specific_timers(&self, timer_handles: &mut ClientInviteTimerHandles) {
        if let Some(handle) = timer_handles.timer_a.take() {
            handle.abort();
        }
        timer_handles.current_timer_a_interval = None;
        if let Some(handle) = timer_handles.timer_b.take() {
            handle.abort();
        }
        if let Some(handle) = timer_handles.timer_d.take() {
            handle.abort();
        }
    }

    async fn process_message(
        &self,
        data: &Arc<ClientTransactionData>,
        message: Message,
        current_state: TransactionState,
        _timer_handles: &mut ClientInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let Some(response) = validators::extract_response(&message, &data.id) else {
            return Ok(None);
        };
        self.process_response(data, response.clone(), current_state)
            .await
    }

    async fn handle_timer(
        &self,
        data: &Arc<ClientTransactionData>,
        timer_name: &str,
        current_state: TransactionState,
        timer_handles: &mut ClientInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        common_logic::send_timer_triggered_event(&data.events_tx, &data.id, timer_name).await;
        match timer_name {
            "A" => {
                self.handle_timer_a_trigger(data, current_state, timer_handles)
                    .await
            }
            "B" => self.handle_timer_b_trigger(data, current_state).await,
            // Timer D's transition rides in with the timer command.
            "D" => Ok(None),
            other => {
                warn!(id = %data.id, timer = other, "unknown timer");
                Ok(None)
            }
        }
    }

    async fn on_enter_state(
        &self,
        data: &Arc<ClientTransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timer_handles: &mut ClientInviteTimerHandles,
        command_tx: mpsc::Sender<InternalTransactionCommand>,
    ) -> Result<()> {
        match new_state {
            TransactionState::Calling => {
                if let Err(e) = self.send_request(data).await {
                    common_logic::send_transport_error_event(&data.events_tx, &data.id).await;
                    let _ = command_tx
                        .send(InternalTransactionCommand::TransitionTo(
                            TransactionState::Terminated,
                        ))
                        .await;
                    return Err(e);
                }
                if !data.transport.is_reliable() {
                    self.start_timer_a(data, timer_handles, self.timer_settings().t1)?;
                }
                self.start_timer_b(data, timer_handles)?;
                Ok(())
            }
            TransactionState::Completed => self.start_timer_d(data, timer_handles),
            TransactionState::Terminated => {
                timer_utils::unregister_transaction(&self.timer_factory.timer_manager(), &data.id);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Public handle for an INVITE client transaction.
#[derive(Debug, Clone)]
pub struct ClientInviteTransaction {
    data: Arc<ClientTransactionData>,
}

impl ClientInviteTransaction {
    /// Builds the transaction and spawns its event loop. The request
    /// must be an INVITE whose topmost Via carries a branch.
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
                "INVITE client transaction needs an INVITE, got {}",
                request.method
            )));
        }
        let id = TransactionKey::from_request(&request, false)
            .ok_or_else(|| Error::Other("request has no Via branch".to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(100);
        timer_manager.register_transaction(id.clone(), cmd_tx.clone());

        let data = Arc::new(ClientTransactionData {
            id,
            state: Arc::new(AtomicTransactionState::new(TransactionState::Initial)),
            request: Arc::new(Mutex::new(request)),
            last_response: Arc::new(Mutex::new(None)),
            remote_addr,
            transport,
            events_tx,
            cmd_tx,
            event_loop_handle: Arc::new(Mutex::new(None)),
        });
        let logic = Arc::new(ClientInviteLogic {
            timer_factory: TimerFactory::new(timer_config, timer_manager),
        });

        let handle = tokio::spawn(run_transaction_loop(data.clone(), logic, cmd_rx));
        if let Ok(mut guard) = data.event_loop_handle.try_lock() {
            *guard = Some(handle);
        }
        Ok(ClientInviteTransaction { data })
    }
}

impl Transaction for ClientInviteTransaction {
    fn id(&self) -> &TransactionKey {
        &self.data.id
    }

    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
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
impl ClientTransaction for ClientInviteTransaction {
    async fn initiate(&self) -> Result<()> {
        let current = self.data.state.get();
        if current != TransactionState::Initial {
            return Err(Error::invalid_state_transition(
                TransactionKind::InviteClient,
                current,
                TransactionState::Calling,
                Some(self.data.id.clone()),
            ));
        }
        self.data
            .send_command(InternalTransactionCommand::TransitionTo(
                TransactionState::Calling,
            ))
            .await
    }

    async fn process_response(&self, response: Response) -> Result<()> {
        self.data
            .send_command(InternalTransactionCommand::ProcessMessage(
                Message::Response(response),
            ))
            .await
    }

    async fn original_request(&self) -> Request {
        self.data.request.lock().await.clone()
    }

    async fn last_response(&self) -> Option<Response> {
        self.data.last_response.lock().await.clone()
    }
}
