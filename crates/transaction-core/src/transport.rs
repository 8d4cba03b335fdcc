//! Transport abstraction the transaction layer sits on.
//!
//! The transaction layer never opens sockets itself. It sends through a
//! [`Transport`] implementation and consumes [`TransportEvent`]s from a
//! channel the transport feeds. Reliability of the underlying transport
//! changes timer behavior: retransmission timers are skipped and wait
//! timers collapse to zero (see [`crate::timer::TimerSettings`]).

use std::fmt::Debug;
use std::net::SocketAddr;

use async_trait::async_trait;

use sipline_sip_core::Message;

use crate::error::Result;

/// Message-level transport used by the transaction layer.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Local address messages are sent from, used to populate Via.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Sends a message to the given destination.
    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()>;

    /// Whether the transport retransmits on its own (TCP, TLS, SCTP).
    fn is_reliable(&self) -> bool {
        false
    }

    /// Whether the transport has been closed.
    fn is_closed(&self) -> bool {
        false
    }

    /// Closes the transport.
    async fn close(&self) -> Result<()>;
}

/// Events a transport implementation delivers to the transaction layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A SIP message arrived.
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
    },
    /// The transport failed in a way not tied to a single send.
    Error { error: String },
    /// The transport shut down; no more messages will arrive.
    Closed,
}
