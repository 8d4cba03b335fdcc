//! Core transaction machinery shared by the four state machines:
//! identification ([`TransactionKey`]), state tracking
//! ([`TransactionState`]), the behavior seam ([`logic::TransactionLogic`]),
//! the generic event loop ([`runner::run_transaction_loop`]), and the
//! events and commands that flow through it.

pub mod common_logic;
pub mod key;
pub mod logic;
pub mod runner;
pub mod state;
pub mod timer_utils;
pub mod validators;

use std::fmt;
use std::net::SocketAddr;

use sipline_sip_core::prelude::*;

pub use key::TransactionKey;
pub use state::{AtomicTransactionState, TransactionState};

use crate::error::Error;

/// The four RFC 3261 transaction machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn is_client(&self) -> bool {
        matches!(
            self,
            TransactionKind::InviteClient | TransactionKind::NonInviteClient
        )
    }

    pub fn is_server(&self) -> bool {
        !self.is_client()
    }

    pub fn is_invite(&self) -> bool {
        matches!(
            self,
            TransactionKind::InviteClient | TransactionKind::InviteServer
        )
    }

    /// Picks the machine for a request arriving at (server) or leaving
    /// (client) this host.
    pub fn for_method(method: &Method, is_server: bool) -> Self {
        match (method.is_invite(), is_server) {
            (true, false) => TransactionKind::InviteClient,
            (false, false) => TransactionKind::NonInviteClient,
            (true, true) => TransactionKind::InviteServer,
            (false, true) => TransactionKind::NonInviteServer,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionKind::InviteClient => "INVITE client",
            TransactionKind::NonInviteClient => "non-INVITE client",
            TransactionKind::InviteServer => "INVITE server",
            TransactionKind::NonInviteServer => "non-INVITE server",
        };
        f.write_str(s)
    }
}

/// Commands sent to a transaction's event loop, either from its public
/// handle, from the manager, or from the loop itself (timer wakeups,
/// self-scheduled transitions).
#[derive(Debug)]
pub enum InternalTransactionCommand {
    /// Move to the given state, running exit/entry actions.
    TransitionTo(TransactionState),
    /// Feed a message received from the transport into the machine.
    ProcessMessage(Message),
    /// Hand a TU-provided response to a server machine for sending.
    SendResponse(Response),
    /// A named timer fired.
    Timer(String),
    /// A send failed at the transport; tear the transaction down.
    TransportError,
    /// Stop the event loop.
    Terminate,
}

/// Events the transaction layer emits toward the transaction user.
#[derive(Debug)]
pub enum TransactionEvent {
    /// A machine changed state.
    StateChanged {
        transaction_id: TransactionKey,
        previous_state: TransactionState,
        new_state: TransactionState,
    },
    /// Client transaction received a 1xx.
    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// Client transaction received a 2xx. For INVITE the ACK belongs to
    /// the TU, so `need_ack` is set and `source` tells it where the
    /// response came from.
    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
        need_ack: bool,
        source: SocketAddr,
    },
    /// Client transaction received a 3xx-6xx final response.
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// A new INVITE server transaction was created for this request.
    InviteRequest {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },
    /// A new non-INVITE server transaction was created for this request.
    NonInviteRequest {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },
    /// ACK arrived for an INVITE server transaction (non-2xx case) or
    /// matched a recently terminated one via dialog identifiers.
    AckReceived {
        transaction_id: TransactionKey,
        request: Request,
    },
    /// CANCEL arrived targeting an INVITE server transaction. The
    /// transaction layer has already answered the CANCEL with 200 and,
    /// when the INVITE was still unanswered, sent 487 on the INVITE
    /// transaction itself. Informational: the TU should stop ringing
    /// and clean up, not send responses.
    CancelReceived {
        transaction_id: TransactionKey,
        cancel_request: Request,
    },
    /// Timer B, F, or H expired without a conclusion.
    TransactionTimeout { transaction_id: TransactionKey },
    /// An INVITE retransmission arrived for a server transaction that
    /// already answered with a 2xx; the TU should retransmit the 2xx.
    TimeoutRetransmit {
        transaction_id: TransactionKey,
        request: Request,
    },
    /// A send failed; the transaction is being torn down.
    TransportError { transaction_id: TransactionKey },
    /// A timer fired. Informational; emitted alongside the timer's
    /// actual effect.
    TimerTriggered {
        transaction_id: TransactionKey,
        timer: String,
    },
    /// The machine reached Terminated and its loop exited.
    TransactionTerminated { transaction_id: TransactionKey },
    /// A request that matched no transaction and starts none (e.g. an
    /// out-of-dialog ACK for a 2xx).
    StrayRequest { request: Request, source: SocketAddr },
    /// A response that matched no client transaction.
    StrayResponse { response: Response, source: SocketAddr },
    /// An ACK that matched nothing, even by dialog identifiers.
    StrayAck { request: Request, source: SocketAddr },
    /// A CANCEL that matched no INVITE server transaction (answered 481
    /// by the layer already).
    StrayCancel { request: Request, source: SocketAddr },
    /// An error the TU should know about.
    Error {
        error: String,
        transaction_id: Option<TransactionKey>,
    },
}

impl TransactionEvent {
    pub fn error(error: &Error, transaction_id: Option<TransactionKey>) -> Self {
        TransactionEvent::Error {
            error: error.to_string(),
            transaction_id,
        }
    }
}

/// Behavior common to all four transaction machines.
pub trait Transaction: Send + Sync {
    fn id(&self) -> &TransactionKey;
    fn kind(&self) -> TransactionKind;
    fn state(&self) -> TransactionState;
    fn remote_addr(&self) -> SocketAddr;

    /// Sender feeding this transaction's event loop. The manager uses
    /// it to route messages and to terminate transactions on shutdown.
    fn command_sender(&self) -> tokio::sync::mpsc::Sender<InternalTransactionCommand>;
}
