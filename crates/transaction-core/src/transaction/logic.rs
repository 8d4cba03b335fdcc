use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sipline_sip_core::{Message, Response};

use crate::error::Result;
use crate::timer::TimerSettings;
use crate::transaction::{InternalTransactionCommand, TransactionKind, TransactionState};

/// The behavior of one transaction machine, driven by the generic event
/// loop in [`runner`](crate::transaction::runner).
///
/// `D` is the shared transaction data (request, state cell, transport,
/// channels); `TH` is the machine's own bag of timer handles, created
/// fresh by the loop and threaded through every call so each logic can
/// start and abort exactly the timers its state demands.
#[async_trait]
pub trait TransactionLogic<D, TH>: Send + Sync
where
    D: Send + Sync + 'static,
    TH: Default + Send + 'static,
{
    fn kind(&self) -> TransactionKind;

    /// The timer durations this machine runs with, already adjusted for
    /// transport reliability by the factory that built it.
    fn timer_settings(&self) -> &TimerSettings;

    /// Aborts every timer this machine may have running. Called on
    /// every state transition and when the loop exits.
    fn cancel_all_specific_timers(&self, timer_handles: &mut TH);

    /// Feeds a transport message into the machine. Returns the state to
    /// transition to, if any.
    async fn process_message(
        &self,
        data: &Arc<D>,
        message: Message,
        current_state: TransactionState,
        timer_handles: &mut TH,
    ) -> Result<Option<TransactionState>>;

    /// A named timer fired.
    async fn handle_timer(
        &self,
        data: &Arc<D>,
        timer_name: &str,
        current_state: TransactionState,
        timer_handles: &mut TH,
    ) -> Result<Option<TransactionState>>;

    /// The TU handed a response to a server machine for sending.
    /// Client machines keep the default, which rejects the command.
    async fn handle_send_response(
        &self,
        _data: &Arc<D>,
        _response: Response,
        current_state: TransactionState,
        _timer_handles: &mut TH,
    ) -> Result<Option<TransactionState>> {
        Err(crate::error::Error::Other(format!(
            "{} transaction cannot send responses (state {:?})",
            self.kind(),
            current_state
        )))
    }

    /// Runs the entry actions for `new_state`: sending, starting the
    /// timers that state owns. `command_tx` loops back into this
    /// machine for self-scheduled work.
    async fn on_enter_state(
        &self,
        data: &Arc<D>,
        new_state: TransactionState,
        previous_state: TransactionState,
        timer_handles: &mut TH,
        command_tx: mpsc::Sender<InternalTransactionCommand>,
    ) -> Result<()>;
}
