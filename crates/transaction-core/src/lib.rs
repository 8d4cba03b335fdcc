//! # sipline-transaction-core
//!
//! RFC 3261 transaction layer: the four Section 17 state machines
//! (client/server x INVITE/non-INVITE), their timers, and the
//! [`TransactionManager`] that matches incoming messages to
//! transactions and feeds events to the transaction user.
//!
//! The layer sits between a message-level [`transport::Transport`]
//! (sockets, parsing, and serialization live elsewhere) and the TU
//! (dialog/application layer), which consumes
//! [`transaction::TransactionEvent`]s from the stream returned by
//! [`TransactionManager::new`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use sipline_transaction_core::manager::TransactionManager;
//! use sipline_transaction_core::timer::TimerSettings;
//! use sipline_transaction_core::transport::{Transport, TransportEvent};
//!
//! # async fn run(transport: Arc<dyn Transport>, transport_rx: mpsc::Receiver<TransportEvent>) {
//! let (manager, mut events) =
//!     TransactionManager::new(transport, transport_rx, TimerSettings::default());
//! while let Some(event) = events.recv().await {
//!     // dispatch to the dialog/application layer
//! }
//! # }
//! ```

pub mod client;
pub mod dialog;
pub mod error;
pub mod manager;
pub mod server;
pub mod timer;
pub mod transaction;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::{ClientInviteTransaction, ClientNonInviteTransaction, ClientTransaction};
pub use dialog::{DialogHandle, DialogState};
pub use error::{Error, Result};
pub use manager::TransactionManager;
pub use server::{ServerInviteTransaction, ServerNonInviteTransaction, ServerTransaction};
pub use timer::{TimerFactory, TimerManager, TimerSettings, TimerType};
pub use transaction::{
    Transaction, TransactionEvent, TransactionKey, TransactionKind, TransactionState,
};
pub use transport::{Transport, TransportEvent};
