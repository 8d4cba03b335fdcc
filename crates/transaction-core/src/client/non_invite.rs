//! Non-INVITE client transaction (RFC 3261 Section 17.1.2).
//!
//! Trying: the request is sent, Timer E retransmits it with backoff,
//! Timer F bounds the attempt. Provisionals move to Proceeding where
//! Timer E slows to T2 and Timer F keeps its original deadline. A final
//! response of any class parks the machine in Completed under Timer K.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
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

#[derive(Debug, Default)]
struct ClientNonInviteTimerHandles {
    timer_e: Option<JoinHandle<()>>,
    current_timer_e_interval: Option<Duration>,
    timer_f: Option<JoinHandle<()>>,
    // Survives state transitions so Timer F keeps its original deadline
    // when restarted on entering Proceeding.
    timer_f_deadline: Option<Instant>,
    timer_k: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ClientNonInviteLogic {
    timer_factory: TimerFactory,
}

impl ClientNonInviteLogic {
    fn start_timer_e(
        &self,
        data: &Arc<ClientTransactionData>,
        timer_handles: &mut ClientNonInviteTimerHandles,
        interval: Duration,
    ) -> Result<()> {
        let handle = timer_utils::start_transaction_timer(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::E,
            interval,
            data.cmd_tx.clone(),
        )?;
        timer_handles.timer_e = Some(handle);
        timer_handles.current_timer_e_interval = Some(interval);
        Ok(())
    }

    fn start_timer_f(
        &self,
        data: &Arc<ClientTransactionData>,
        timer_handles: &mut ClientNonInviteTimerHandles,
        interval: Duration,
    ) -> Result<()> {
        let handle = timer_utils::start_transaction_timer(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::F,
            interval,
            data.cmd_tx.clone(),
        )?;
        timer_handles.timer_f = Some(handle);
        if timer_handles.timer_f_deadline.is_none() {
            timer_handles.timer_f_deadline = Some(Instant::now() + interval);
        }
        Ok(())
    }

    fn start_timer_k(
        &self,
        data: &Arc<ClientTransactionData>,
        timer_handles: &mut ClientNonInviteTimerHandles,
    ) -> Result<()> {
        let handle = timer_utils::start_timer_with_transition(
            &self.timer_factory.timer_manager(),
            &data.id,
            TimerType::K,
            self.timer_settings().wait_time_k,
            data.cmd_tx.clone(),
            TransactionState::Terminated,
        )?;
        timer_handles.timer_k = Some(handle);
        Ok(())
    }

    async fn send_request(&self, data: &Arc<ClientTransactionData>) -> Result<()> {
        let request = data.request.lock().await.clone();
        data.transport
            .send_message(Message::Request(request), data.remote_addr)
            .await
            .map_err(|e| Error::transport_error(e, "failed to send request"))
    }

    async fn handle_timer_e_trigger(
        &self,
        data: &Arc<ClientTransactionData>,
        current_state: TransactionState,
        timer_handles: &mut ClientNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        if !matches!(
            current_state,
            TransactionState::Trying | TransactionState::Proceeding
        ) {
            return Ok(None);
        }
        if let Err(e) = self.send_request(data).await {
            warn!(id = %data.id, error = %e, "retransmission failed");
            common_logic::send_transport_error_event(&data.events_tx, &data.id).await;
            return Ok(Some(TransactionState::Terminated));
        }
        // In Trying the interval backs off toward T2; in Proceeding it
        // is pinned at T2 (RFC 3261 Section 17.1.2.2).
        let next = if current_state == TransactionState::Trying {
            let current = timer_handles
                .current_timer_e_interval
                .unwrap_or(self.timer_settings().t1);
            timer_utils::calculate_backoff_interval(current, self.timer_settings())
        } else {
            self.timer_settings().t2
        };
        self.start_timer_e(data, timer_handles, next)?;
        Ok(None)
    }

    async fn handle_timer_f_trigger(
        &self,
        data: &Arc<ClientTransactionData>,
        current_state: TransactionState,
    ) -> Result<Option<TransactionState>> {
        if !matches!(
            current_state,
            TransactionState::Trying | TransactionState::Proceeding
        ) {
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
        let (is_provisional, _, _) = validators::categorize_response_status(response.status);

        match current_state {
            TransactionState::Trying | TransactionState::Proceeding => {
                if is_provisional {
                    common_logic::send_provisional_response_event(
                        &data.events_tx,
                        &data.id,
                        response,
                    )
                    .await;
                    return Ok(if current_state == TransactionState::Trying {
                        Some(TransactionState::Proceeding)
                    } else {
                        None
                    });
                }
                // Any final response completes a non-INVITE client
                // transaction; no ACK exists here.
                if response.status.is_success() {
                    common_logic::send_success_response_event(
                        &data.events_tx,
                        &data.id,
                        response,
                        false,
                        data.remote_addr,
                    )
                    .await;
                } else {
                    common_logic::send_failure_response_event(&data.events_tx, &data.id, response)
                        .await;
                }
                Ok(Some(TransactionState::Completed))
            }
            other => {
                trace!(id = %data.id, state = %other, "ignoring retransmitted response");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TransactionLogic<ClientTransactionData, ClientNonInviteTimerHandles>
    for ClientNonInviteLogic
{
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
    }

    fn timer_settings(&self) -> &TimerSettings {
        self.timer_factory.settings()
    }

    fn cancel_all_specific_timers(&self, timer_handles: &mut ClientNonInviteTimerHandles) {
        if let Some(handle) = timer_handles.timer_e.take() {
            handle.abort();
        }
        timer_handles.current_timer_e_interval = None;
        if let Some(handle) = timer_handles.timer_f.take() {
            handle.abort();
        }
        if let Some(handle) = timer_handles.timer_k.take() {
            handle.abort();
        }
    }

    async fn process_message(
        &self,
        data: &Arc<ClientTransactionData>,
        message: Message,
        current_state: TransactionState,
        _timer_handles: &mut ClientNonInviteTimerHandles,
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
        timer_handles: &mut ClientNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        common_logic::send_timer_triggered_event(&data.events_tx, &data.id, timer_name).await;
        match timer_name {
            "E" => {
                self.handle_timer_e_trigger(data, current_state, timer_handles)
                    .await
            }
            "F" => self.handle_timer_f_trigger(data, current_state).await,
            "K" => Ok(None),
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
        timer_handles: &mut ClientNonInviteTimerHandles,
        command_tx: mpsc::Sender<InternalTransactionCommand>,
    ) -> Result<()> {
        match new_state {
            TransactionState::Trying => {
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
                    self.start_timer_e(data, timer_handles, self.timer_settings().t1)?;
                }
                self.start_timer_f(data, timer_handles, self.timer_settings().transaction_timeout)
            }
            TransactionState::Proceeding => {
                if !data.transport.is_reliable() {
                    self.start_timer_e(data, timer_handles, self.timer_settings().t2)?;
                }
                let remaining = timer_handles
                    .timer_f_deadline
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                    .unwrap_or(self.timer_settings().transaction_timeout);
                self.start_timer_f(data, timer_handles, remaining)
            }
            TransactionState::Completed => self.start_timer_k(data, timer_handles),
            TransactionState::Terminated => {
                timer_utils::unregister_transaction(&self.timer_factory.timer_manager(), &data.id);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Public handle for a non-INVITE client transaction.
#[derive(Debug, Clone)]
pub struct ClientNonInviteTransaction {
    data: Arc<ClientTransactionData>,
}

impl ClientNonInviteTransaction {
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
                "non-INVITE client transaction cannot carry {}",
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
        let logic = Arc::new(ClientNonInviteLogic {
            timer_factory: TimerFactory::new(timer_config, timer_manager),
        });

        let handle = tokio::spawn(run_transaction_loop(data.clone(), logic, cmd_rx));
        if let Ok(mut guard) = data.event_loop_handle.try_lock() {
            *guard = Some(handle);
        }
        Ok(ClientNonInviteTransaction { data })
    }
}

impl Transaction for ClientNonInviteTransaction {
    fn id(&self) -> &TransactionKey {
        &self.data.id
    }

    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
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
impl ClientTransaction for ClientNonInviteTransaction {
    async fn initiate(&self) -> Result<()> {
        let current = self.data.state.get();
        if current != TransactionState::Initial {
            return Err(Error::invalid_state_transition(
                TransactionKind::NonInviteClient,
                current,
                TransactionState::Trying,
                Some(self.data.id.clone()),
            ));
        }
        self.data
            .send_command(InternalTransactionCommand::TransitionTo(
                TransactionState::Trying,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sipline_sip_core::prelude::*;
    use sipline_sip_core::{RequestBuilder, ResponseBuilder, StatusCode};
    use tokio::time::timeout;

    use crate::test_utils::{fast_timers, MockTransport};

    fn build_options() -> Request {
        RequestBuilder::new(Method::Options, "sip:bob@biloxi.example.com")
            .unwrap()
            .from("Alice", "sip:alice@atlanta.example.com", Some("a-tag"))
            .via("127.0.0.1:5060", "UDP", Some(&generate_branch()))
            .build()
    }

    struct TestSetup {
        transaction: ClientNonInviteTransaction,
        transport: Arc<MockTransport>,
        events_rx: mpsc::Receiver<TransactionEvent>,
        request: Request,
    }

    fn setup() -> TestSetup {
        let transport = MockTransport::new();
        let (events_tx, events_rx) = mpsc::channel(100);
        let request = build_options();
        let transaction = ClientNonInviteTransaction::new(
            request.clone(),
            "127.0.0.1:5070".parse().unwrap(),
            transport.clone(),
            events_tx,
            Arc::new(TimerManager::new()),
            fast_timers(),
        )
        .unwrap();
        TestSetup {
            transaction,
            transport,
            events_rx,
            request,
        }
    }

    async fn expect_event<F>(rx: &mut mpsc::Receiver<TransactionEvent>, pred: F) -> TransactionEvent
    where
        F: Fn(&TransactionEvent) -> bool,
    {
        loop {
            let event = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn rejects_invite_and_ack() {
        let transport = MockTransport::new();
        let (events_tx, _events_rx) = mpsc::channel(10);
        let invite = RequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .unwrap()
            .via("127.0.0.1:5060", "UDP", Some(&generate_branch()))
            .build();
        assert!(ClientNonInviteTransaction::new(
            invite,
            "127.0.0.1:5070".parse().unwrap(),
            transport,
            events_tx,
            Arc::new(TimerManager::new()),
            fast_timers(),
        )
        .is_err());
    }

    #[tokio::test]
    async fn initiate_sends_request_and_enters_trying() {
        let mut setup = setup();
        setup.transaction.initiate().await.unwrap();
        setup
            .transport
            .wait_for_message_sent(Duration::from_secs(1))
            .await
            .unwrap();

        let (message, _) = setup.transport.get_sent_message().await.unwrap();
        assert_eq!(message.as_request().unwrap().method, Method::Options);
        expect_event(&mut setup.events_rx, |e| {
            matches!(
                e,
                TransactionEvent::StateChanged {
                    new_state: TransactionState::Trying,
                    ..
                }
            )
        })
        .await;
    }

    #[tokio::test]
    async fn timer_e_retransmits_in_trying() {
        let setup = setup();
        setup.transaction.initiate().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(setup.transport.sent_count().await >= 2);
    }

    #[tokio::test]
    async fn timer_f_times_out_in_proceeding_too() {
        let mut setup = setup();
        setup.transaction.initiate().await.unwrap();
        setup
            .transaction
            .process_response(
                ResponseBuilder::from_request(&setup.request, StatusCode::Trying).build(),
            )
            .await
            .unwrap();
        expect_event(&mut setup.events_rx, |e| {
            matches!(
                e,
                TransactionEvent::StateChanged {
                    new_state: TransactionState::Proceeding,
                    ..
                }
            )
        })
        .await;

        expect_event(&mut setup.events_rx, |e| {
            matches!(e, TransactionEvent::TransactionTimeout { .. })
        })
        .await;
        expect_event(&mut setup.events_rx, |e| {
            matches!(e, TransactionEvent::TransactionTerminated { .. })
        })
        .await;
    }

    #[tokio::test]
    async fn final_response_completes_then_timer_k_terminates() {
        let mut setup = setup();
        setup.transaction.initiate().await.unwrap();
        setup
            .transaction
            .process_response(
                ResponseBuilder::from_request(&setup.request, StatusCode::Ok).build(),
            )
            .await
            .unwrap();

        let event = expect_event(&mut setup.events_rx, |e| {
            matches!(e, TransactionEvent::SuccessResponse { .. })
        })
        .await;
        match event {
            TransactionEvent::SuccessResponse { need_ack, .. } => assert!(!need_ack),
            _ => unreachable!(),
        }
        expect_event(&mut setup.events_rx, |e| {
            matches!(
                e,
                TransactionEvent::StateChanged {
                    new_state: TransactionState::Completed,
                    ..
                }
            )
        })
        .await;
        expect_event(&mut setup.events_rx, |e| {
            matches!(e, TransactionEvent::TransactionTerminated { .. })
        })
        .await;
        assert_eq!(setup.transaction.state(), TransactionState::Terminated);
    }

    #[tokio::test]
    async fn failure_final_response_reported_as_failure() {
        let mut setup = setup();
        setup.transaction.initiate().await.unwrap();
        setup
            .transaction
            .process_response(
                ResponseBuilder::from_request(&setup.request, StatusCode::NotFound).build(),
            )
            .await
            .unwrap();
        expect_event(&mut setup.events_rx, |e| {
            matches!(e, TransactionEvent::FailureResponse { .. })
        })
        .await;
    }

    #[tokio::test]
    async fn retransmitted_final_response_is_absorbed() {
        let mut setup = setup();
        setup.transaction.initiate().await.unwrap();

        let response = ResponseBuilder::from_request(&setup.request, StatusCode::NotFound).build();
        setup
            .transaction
            .process_response(response.clone())
            .await
            .unwrap();
        expect_event(&mut setup.events_rx, |e| {
            matches!(e, TransactionEvent::FailureResponse { .. })
        })
        .await;
        expect_event(&mut setup.events_rx, |e| {
            matches!(
                e,
                TransactionEvent::StateChanged {
                    new_state: TransactionState::Completed,
                    ..
                }
            )
        })
        .await;

        // The same final response arriving again in Completed must not
        // reach the TU a second time.
        setup.transaction.process_response(response).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = setup.events_rx.try_recv() {
            assert!(!matches!(
                event,
                TransactionEvent::FailureResponse { .. } | TransactionEvent::SuccessResponse { .. }
            ));
        }
        assert_eq!(setup.transaction.state(), TransactionState::Completed);
    }
}
